//! Embedded SQL migrations, one set per dialect (`refinery` supports both).
//! Schema versioning itself is an external concern (the mart's on-disk
//! schema is specified only loosely); this just gets a fresh deployment
//! from nothing to the table shapes the rest of this crate reads and
//! writes.

use crate::error::{classify_postgres, MartError};
use crate::pool::MartPool;

mod embedded {
    pub mod postgres {
        refinery::embed_migrations!("src/migrations/postgres");
    }
    pub mod sqlite {
        refinery::embed_migrations!("src/migrations/sqlite");
    }
}

pub async fn run(pool: &MartPool) -> Result<(), MartError> {
    match pool {
        MartPool::Postgres(_) => {
            let mut client = pool.postgres_client().await?;
            embedded::postgres::migrations::runner()
                .run_async(&mut *client)
                .await
                .map_err(|error| MartError::Fatal(error_stack::Report::new(error).change_context(dm_types::MartFatal)))?;
        }
        MartPool::Sqlite(_) => {
            pool.with_sqlite(|conn| {
                embedded::sqlite::migrations::runner()
                    .run(conn)
                    .map(|_report| ())
                    .map_err(|error| rusqlite::Error::ModuleError(format!("migration failed: {error}")))
            })
            .await?;
        }
    }
    Ok(())
}
