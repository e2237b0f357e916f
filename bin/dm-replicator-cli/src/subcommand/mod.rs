mod completions;
mod migrate;
mod run;

pub use completions::completions;
pub use migrate::migrate;
pub use run::run;
