use derive_more::{Display, Error};

/// A handler's request to requeue its task with backoff. The scheduler owns
/// the retry/backoff policy; handlers only say "try again".
#[derive(Debug, Display, Error)]
#[display("handler requested a retry")]
pub struct RetryRequested;

/// A handler's request to drop its task permanently.
#[derive(Debug, Display, Error)]
#[display("handler failed fatally")]
pub struct HandlerFailed;

/// The outcome a [`crate::Handler`] reports back to the worker pool.
#[derive(Debug)]
pub enum HandlerOutcome {
    Retryable(error_stack::Report<RetryRequested>),
    Fatal(error_stack::Report<HandlerFailed>),
}

impl std::fmt::Display for HandlerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable(report) => write!(f, "{report:?}"),
            Self::Fatal(report) => write!(f, "{report:?}"),
        }
    }
}
