//! The binary's own error marker. Every fallible path inside this crate
//! folds into one of [`dm_types`]'s taxonomy before it gets here; this
//! wrapper exists only so `main` has a single type to match the process
//! exit code against (§6: `0` on clean shutdown, nonzero on init failure).

#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("the data-mart replicator failed to start or run to completion")]
pub struct CliError;
