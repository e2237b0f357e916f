//! `.env` loading and the `--ignore-environment` cutover.
//!
//! Mirrors the layered-dotenv convention (`.env.local`, `.env.<profile>`,
//! `.env`, most specific first) without tying the profile to a build
//! flavor the way a web app would — this service only ever runs one way.

use std::path::PathBuf;

/// Loads `.env` files from the current directory, most specific first.
/// Returns the files that were actually found, for a startup log line.
pub fn load_dotenv() -> Vec<PathBuf> {
    [".env.local", ".env"]
        .into_iter()
        .filter_map(|path| dotenv_flow::from_filename(path).ok())
        .collect()
}

/// `--ignore-environment` (§6) disables every `env = "SZ_DM_..."` fallback
/// clap would otherwise consult, in one place, before argument parsing
/// runs. clap resolves env fallbacks while it parses, so the cutover has
/// to happen before `Args::parse` is called rather than after.
pub fn strip_prefixed_env_if_requested(prefix: &str) {
    let requested = std::env::args().any(|arg| arg == "--ignore-environment");
    if !requested {
        return;
    }
    for (key, _value) in std::env::vars() {
        if key.starts_with(prefix) {
            std::env::remove_var(key);
        }
    }
}
