//! The accessor boundary between the replicator core and whatever
//! entity-resolution engine is actually resolving entities.
//!
//! Deliberately a thin trait: this crate does not implement a protocol to
//! any concrete engine (that integration lives outside the core, per its
//! Non-goals) — it only defines the shape callers depend on, plus a mock
//! for exercising the refresh-entity handler without a real engine.

mod mock;

use async_trait::async_trait;
use dm_types::{EntityId, EntityView};
use error_stack::Result;

pub use mock::MockEntityRepository;

/// Version/build information reported by the engine, surfaced for
/// diagnostics and readiness logging. Opaque beyond its `Display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersion(pub String);

impl std::fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The engine did not respond, or responded in a way indicating it isn't
/// ready yet. Always retryable; never returned for "entity does not
/// resolve", which is [`None`], not an error.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("entity-resolution engine unavailable")]
pub struct EngineUnavailable;

/// Read-only access to the entity-resolution engine's current view of the
/// world. No method here has side effects on the engine.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Returns the engine's current view of `entity_id`, or `None` if the
    /// engine does not currently resolve that id to an entity.
    async fn fetch_entity(&self, entity_id: EntityId) -> Result<Option<EntityView>, EngineUnavailable>;

    /// Returns the engine's reported version, used at startup to confirm
    /// connectivity before the core reports itself ready.
    async fn version(&self) -> Result<EngineVersion, EngineUnavailable>;
}
