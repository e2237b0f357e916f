//! The small, closed set of error markers every crate in the workspace maps
//! into. Each is a unit struct; the interesting context lives in the
//! `error_stack::Report` chain attached at the point of failure, not in
//! fields on these types.

use derive_more::{Display, Error};

/// A configuration value was missing, malformed, or internally inconsistent.
/// Always fatal at startup.
#[derive(Debug, Display, Error)]
#[display("invalid configuration")]
pub struct ConfigInvalid;

/// The entity-resolution engine did not respond, or responded with a
/// transport-level failure. Retryable.
#[derive(Debug, Display, Error)]
#[display("entity-resolution engine unavailable")]
pub struct EngineUnavailable;

/// The mart database rejected an operation in a way that is expected to
/// clear on retry (serialization failure, deadlock, connection reset).
#[derive(Debug, Display, Error)]
#[display("mart database operation failed transiently")]
pub struct MartTransient;

/// The mart database rejected an operation in a way retrying will not fix
/// (constraint violation, schema mismatch, syntax error).
#[derive(Debug, Display, Error)]
#[display("mart database operation failed")]
pub struct MartFatal;

/// An inbound message could not be decoded into a recognized info event.
/// Not retryable by redelivery; the message is dead-lettered or dropped per
/// the consumer's configured policy.
#[derive(Debug, Display, Error)]
#[display("message body could not be parsed")]
pub struct MessageUnparseable;

/// A report handler's lease on a pending-delta row expired before it
/// committed, so its write was rejected to avoid double-aggregation.
#[derive(Debug, Display, Error)]
#[display("lease expired before commit")]
pub struct LeaseLost;

/// The service is draining or has drained; the operation was abandoned
/// rather than started.
#[derive(Debug, Display, Error)]
#[display("operation abandoned during shutdown")]
pub struct Shutdown;

/// Whether a failure is worth retrying, distinguishing transient conditions
/// the scheduler should re-enqueue from fatal ones it should surface and
/// drop.
pub trait Retryability {
    fn is_retryable(&self) -> bool;
}

impl Retryability for ConfigInvalid {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Retryability for EngineUnavailable {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryability for MartTransient {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryability for MartFatal {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Retryability for MessageUnparseable {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Retryability for LeaseLost {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryability for Shutdown {
    fn is_retryable(&self) -> bool {
        false
    }
}
