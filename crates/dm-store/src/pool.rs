use std::sync::{Arc, Mutex as StdMutex};

use dm_types::ConfigInvalid;
use error_stack::{Report, ResultExt};

use crate::dialect::Dialect;
use crate::error::{classify_deadpool_postgres, classify_sqlite, MartError};
use crate::uri::{MartUri, SqlitePath};

/// The mart connection pool. PostgreSQL fans out through `deadpool-postgres`
/// at the configured pool size; SQLite is a single shared connection (the
/// reference design enforces pool size 1 there, so there is nothing to
/// pool) whose blocking calls are pushed onto
/// [`tokio::task::spawn_blocking`] rather than run inline on the async
/// runtime.
#[derive(Clone)]
pub enum MartPool {
    Postgres(deadpool_postgres::Pool),
    Sqlite(Arc<StdMutex<rusqlite::Connection>>),
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("operation requires the other mart dialect")]
struct WrongDialect;

impl MartPool {
    /// Builds the pool named by `uri`. PostgreSQL fans out to
    /// `pool_size` connections; SQLite ignores it and opens exactly one
    /// connection, per §4.2's "pool size 1 enforced" rule — a second
    /// writer would just contend with the first for the same file lock.
    pub async fn connect(uri: &MartUri, pool_size: usize) -> error_stack::Result<Self, ConfigInvalid> {
        match uri {
            MartUri::Postgres(pg) => {
                let mut config = deadpool_postgres::Config::new();
                config.host = Some(pg.host.clone());
                config.port = Some(pg.port);
                config.user = Some(pg.user.clone());
                config.password = Some(pg.password.clone());
                config.dbname = Some(pg.database.clone());
                if let Some(schema) = pg.schema() {
                    config.options = Some(format!("-c search_path={schema}"));
                }
                config.pool = Some(deadpool_postgres::PoolConfig::new(pool_size.max(1)));

                let pool = config
                    .create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
                    .change_context(ConfigInvalid)
                    .attach_printable("failed to build the PostgreSQL connection pool")?;
                Ok(Self::Postgres(pool))
            }
            MartUri::Sqlite(sqlite) => {
                let connection = if sqlite.is_in_memory() {
                    rusqlite::Connection::open_in_memory()
                } else {
                    let SqlitePath::File(path) = &sqlite.path else {
                        unreachable!("is_in_memory() already handled the in-memory variant")
                    };
                    rusqlite::Connection::open(path)
                }
                .change_context(ConfigInvalid)
                .attach_printable("failed to open the SQLite database file")?;
                connection
                    .execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
                    .change_context(ConfigInvalid)?;
                Ok(Self::Sqlite(Arc::new(StdMutex::new(connection))))
            }
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Postgres(_) => Dialect::Postgres,
            Self::Sqlite(_) => Dialect::Sqlite,
        }
    }

    pub async fn postgres_client(&self) -> Result<deadpool_postgres::Client, MartError> {
        match self {
            Self::Postgres(pool) => pool.get().await.map_err(classify_deadpool_postgres),
            Self::Sqlite(_) => Err(MartError::Fatal(
                Report::new(WrongDialect).change_context(dm_types::MartFatal),
            )),
        }
    }

    /// Runs `op` with exclusive access to the single SQLite connection, on
    /// a blocking-pool thread.
    pub async fn with_sqlite<F, R>(&self, op: F) -> Result<R, MartError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, rusqlite::Error> + Send + 'static,
        R: Send + 'static,
    {
        let Self::Sqlite(conn) = self else {
            return Err(MartError::Fatal(
                Report::new(WrongDialect).change_context(dm_types::MartFatal),
            ));
        };
        let conn = Arc::clone(conn);
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().expect("sqlite connection mutex poisoned");
            op(&mut guard)
        })
        .await;

        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(sqlite_error)) => Err(classify_sqlite(sqlite_error)),
            Err(join_error) => Err(MartError::Fatal(
                Report::new(join_error)
                    .change_context(dm_types::MartFatal)
                    .attach_printable("sqlite blocking task panicked"),
            )),
        }
    }
}
