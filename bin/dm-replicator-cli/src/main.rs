//! Command-line entry point for the data-mart replicator service.
//!
//! `main` only loads `.env` files, parses arguments, initializes tracing,
//! and dispatches to a subcommand — everything else lives in
//! [`dm_replicator`] and its collaborator crates.

mod args;
mod config;
mod env;
mod error;
mod subcommand;

use clap::Parser;
use error_stack::Result;
use mimalloc::MiMalloc;

use crate::args::{Args, Command};
use crate::error::CliError;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

fn main() -> Result<(), CliError> {
    env::load_dotenv();
    env::strip_prefixed_env_if_requested(args::env_prefix());

    let args = Args::parse();
    init_tracing(&args.log_level);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the Tokio runtime")
        .block_on(dispatch(args))
}

async fn dispatch(args: Args) -> Result<(), CliError> {
    match args.command {
        Command::Run(run_args) => subcommand::run(run_args).await,
        Command::Migrate(migrate_args) => subcommand::migrate(migrate_args).await,
        Command::Completions(completions_args) => {
            subcommand::completions(&completions_args);
            Ok(())
        }
    }
}
