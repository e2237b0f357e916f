//! The command-line surface from spec §6, as a `clap` derive tree: every
//! option gets an `env = "SZ_DM_..."` fallback (suppressed in one place by
//! `--ignore-environment`, see [`crate::env`]), and `--help`/`--version`
//! are free from `clap`'s own `Parser` derive.

use std::fmt;

use clap::{Parser, Subcommand, ValueEnum};
use dm_replicator::ProcessingRate;

const ENV_PREFIX: &str = "SZ_DM_";

#[must_use]
pub const fn env_prefix() -> &'static str {
    ENV_PREFIX
}

#[derive(Debug, Parser)]
#[command(name = "dm-replicator", version, author, about = "Data-mart replicator service", long_about = None)]
pub struct Args {
    /// Disable environment-variable fallback for every other option.
    #[arg(long, global = true)]
    pub ignore_environment: bool,

    /// Tracing filter directive (e.g. `info`, `debug`, `dm_store=trace`).
    /// `RUST_LOG`, if set, takes precedence over this flag.
    #[arg(long, global = true, env = "SZ_DM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the replicator service: consumer, scheduler, report handlers,
    /// and the follow-up loop, until a shutdown signal arrives.
    Run(RunArgs),
    /// Apply mart schema migrations against `--database-uri` and exit.
    Migrate(MigrateArgs),
    /// Emit a shell completion script to stdout.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProcessingRateArg {
    Leisurely,
    Standard,
    Aggressive,
}

impl From<ProcessingRateArg> for ProcessingRate {
    fn from(value: ProcessingRateArg) -> Self {
        match value {
            ProcessingRateArg::Leisurely => Self::Leisurely,
            ProcessingRateArg::Standard => Self::Standard,
            ProcessingRateArg::Aggressive => Self::Aggressive,
        }
    }
}

/// `core-log-level`: accepted as `muted`/`verbose` or the legacy numeric
/// spellings `0`/`1` deployed configs still carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreLogLevel {
    Muted,
    Verbose,
}

impl fmt::Display for CoreLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Muted => "muted",
            Self::Verbose => "verbose",
        })
    }
}

impl std::str::FromStr for CoreLogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "muted" | "0" => Ok(Self::Muted),
            "verbose" | "1" => Ok(Self::Verbose),
            other => Err(format!("expected one of muted, verbose, 0, 1, got {other:?}")),
        }
    }
}

/// Engine-accessor options shared between the entity-resolution engine
/// handle the `run` subcommand wires (§4.1) and anything that needs to
/// report on it (currently nothing else, but kept `flatten`-able rather
/// than private to `RunArgs` in case `migrate` ever needs the engine
/// version for a compatibility check).
#[derive(Debug, Clone, Parser)]
pub struct EngineArgs {
    /// Tag used by the engine accessor to identify this process to the engine.
    #[arg(long, env = "SZ_DM_CORE_INSTANCE_NAME", default_value = "data-mart-replicator")]
    pub core_instance_name: String,

    /// Engine configuration, as JSON text or a path to a JSON file.
    #[arg(long, env = "SZ_DM_CORE_SETTINGS")]
    pub core_settings: Option<String>,

    /// Pins the engine configuration version the accessor should use.
    #[arg(long, env = "SZ_DM_CORE_CONFIG_ID")]
    pub core_config_id: Option<i64>,

    /// Engine accessor verbosity.
    #[arg(long, env = "SZ_DM_CORE_LOG_LEVEL", default_value = "muted")]
    pub core_log_level: CoreLogLevel,

    /// Engine auto-refresh policy: positive is a period in seconds, `0`
    /// means refresh on demand, negative means refresh only when asked
    /// explicitly (manual).
    #[arg(long, env = "SZ_DM_REFRESH_CONFIG_SECONDS", default_value_t = 0)]
    pub refresh_config_seconds: i64,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Base concurrency; the scheduler runs at 2x, the consumer at 2x, the
    /// mart pool size is 1x (SQLite clamps this to 1 regardless).
    #[arg(long, env = "SZ_DM_CORE_CONCURRENCY", default_value_t = 4)]
    pub core_concurrency: usize,

    /// Preset for the scheduler follow-up delay/timeout and the report
    /// follow-up loop's sleep period.
    #[arg(long, value_enum, env = "SZ_DM_PROCESSING_RATE", default_value = "standard")]
    pub processing_rate: ProcessingRateArg,

    /// Consume info messages from the database-backed queue table.
    #[arg(long, env = "SZ_DM_DATABASE_INFO_QUEUE", conflicts_with_all = ["sqs_info_uri", "rabbit_info_uri"])]
    pub database_info_queue: bool,

    /// Consume info messages from an SQS-compatible cloud queue at this URL.
    #[arg(long, env = "SZ_DM_SQS_INFO_URI", conflicts_with_all = ["database_info_queue", "rabbit_info_uri"])]
    pub sqs_info_uri: Option<String>,

    /// Consume info messages from an AMQP broker at this URI.
    #[arg(long, env = "SZ_DM_RABBIT_INFO_URI", requires = "rabbit_info_queue", conflicts_with_all = ["database_info_queue", "sqs_info_uri"])]
    pub rabbit_info_uri: Option<String>,

    /// The broker queue name to subscribe to (required with `--rabbit-info-uri`).
    #[arg(long, env = "SZ_DM_RABBIT_INFO_QUEUE")]
    pub rabbit_info_queue: Option<String>,

    /// Mart database connection URI (PostgreSQL or SQLite grammar, or an
    /// `sz://core-settings/...` indirection resolved against `--core-settings`).
    #[arg(long, env = "SZ_DM_DATABASE_URI")]
    pub database_uri: String,

    /// Bounds how long shutdown waits for in-flight scheduler tasks to
    /// drain before abandoning them. Unset waits indefinitely.
    #[arg(long, env = "SZ_DM_SCHEDULER_DRAIN_TIMEOUT_SECONDS")]
    pub scheduler_drain_timeout_seconds: Option<u64>,
}

#[derive(Debug, Parser)]
pub struct MigrateArgs {
    /// Mart database connection URI to apply schema migrations against.
    #[arg(long, env = "SZ_DM_DATABASE_URI")]
    pub database_uri: String,

    /// Engine configuration, as JSON text or a path to a JSON file, used
    /// only to resolve an `sz://core-settings/...` indirection in
    /// `--database-uri`.
    #[arg(long, env = "SZ_DM_CORE_SETTINGS")]
    pub core_settings: Option<String>,
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
