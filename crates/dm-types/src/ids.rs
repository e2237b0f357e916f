use std::fmt;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Identifies a resolved entity in both the entity-resolution engine and the mart.
///
/// Mirrors the engine's own identifier space directly rather than minting a
/// replicator-local surrogate key, so entity rows can be joined against engine
/// exports without a translation table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, derive_more::Display,
)]
pub struct EntityId(i64);

impl EntityId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Returns `(min, max)` ordered canonically, as required when keying a
    /// relation or report-detail row by an unordered pair of entities.
    #[must_use]
    pub fn ordered_pair(a: Self, b: Self) -> (Self, Self) {
        if a <= b { (a, b) } else { (b, a) }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A short random token minted once per handler invocation.
///
/// Used interchangeably as `creator_id`, `modifier_id`, and `lease_id` so that
/// every write to the mart can be attributed to the operation that made it,
/// and so a report handler can recognize rows it, and only it, currently
/// leases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub struct OperationId(String);

impl OperationId {
    const LEN: usize = 20;

    #[must_use]
    pub fn generate() -> Self {
        let token = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for OperationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A `(data_source, record_id)` pair uniquely identifying a source record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub data_source: String,
    pub record_id: String,
}

impl RecordKey {
    #[must_use]
    pub fn new(data_source: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            record_id: record_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.data_source, self.record_id)
    }
}
