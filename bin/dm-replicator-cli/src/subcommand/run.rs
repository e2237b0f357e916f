//! `dm-replicator run`: wires every collaborator, starts the service, and
//! blocks until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use dm_replicator::{Concurrency, Replicator, ReplicatorConfig};
use error_stack::{Result, ResultExt};

use crate::args::RunArgs;
use crate::config;
use crate::error::CliError;

pub async fn run(args: RunArgs) -> Result<(), CliError> {
    let core_settings = args
        .engine
        .core_settings
        .as_deref()
        .map(config::parse_core_settings)
        .transpose()
        .change_context(CliError)?;

    let concurrency = Concurrency { core: args.core_concurrency.max(1) };

    let pool = Arc::new(
        config::open_mart_pool(&args.database_uri, core_settings.as_ref(), concurrency.pool_size())
            .await
            .change_context(CliError)?,
    );

    let entity_repo = config::build_entity_repository(&args.engine);
    let message_source = config::build_message_source(&args, core_settings.as_ref(), &pool)
        .await
        .change_context(CliError)?;

    let replicator_config = ReplicatorConfig {
        pool,
        entity_repo,
        message_source,
        concurrency,
        processing_rate: args.processing_rate.into(),
    };

    let replicator = Replicator::start(replicator_config).await.map_err(|error| {
        error_stack::Report::new(CliError).attach_printable(format!("failed to start the replicator service: {error}"))
    })?;

    tracing::info!(state = ?replicator.state(), "data-mart replicator is ready");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining");

    let drain_timeout = args.scheduler_drain_timeout_seconds.map(Duration::from_secs);
    replicator.shut_down(drain_timeout).await;
    tracing::info!("shutdown complete");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                tracing::warn!(%error, "failed to install SIGINT handler");
            }
        }
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to install Ctrl+C handler");
    }
}
