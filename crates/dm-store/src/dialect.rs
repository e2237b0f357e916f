use std::fmt;

/// Which SQL dialect a mart connection is speaking. Upper layers (C3's
/// ledger, C7's report handlers) branch on this only for placeholder syntax
/// and upsert idioms; the semantics are identical across both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Positional parameter placeholder for the `n`th (1-indexed) bind
    /// value, e.g. `$3` for Postgres, `?3` for SQLite.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::Sqlite => format!("?{n}"),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        })
    }
}
