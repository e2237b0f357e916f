//! `dm-replicator migrate`: apply the mart schema migrations and exit,
//! without starting the consumer, scheduler, or follow-up loop.

use error_stack::{Result, ResultExt};

use crate::args::MigrateArgs;
use crate::config;
use crate::error::CliError;

pub async fn migrate(args: MigrateArgs) -> Result<(), CliError> {
    let core_settings = args
        .core_settings
        .as_deref()
        .map(config::parse_core_settings)
        .transpose()
        .change_context(CliError)?;

    let pool = config::open_mart_pool(&args.database_uri, core_settings.as_ref(), 1)
        .await
        .change_context(CliError)?;

    dm_store::run_migrations(&pool)
        .await
        .map_err(|error| error_stack::Report::new(CliError).attach_printable(format!("migration failed: {error}")))?;

    tracing::info!("mart schema migrations applied");
    Ok(())
}
