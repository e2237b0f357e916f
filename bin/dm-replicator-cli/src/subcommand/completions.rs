//! `dm-replicator completions`: emit a shell completion script to stdout.

use clap::CommandFactory as _;

use crate::args::{Args, CompletionsArgs};

pub fn completions(args: &CompletionsArgs) {
    let mut command = Args::command();
    clap_complete::generate(args.shell, &mut command, env!("CARGO_PKG_NAME"), &mut std::io::stdout());
}
