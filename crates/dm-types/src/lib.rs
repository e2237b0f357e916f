//! Value types and error taxonomy shared by every crate in the data-mart
//! replicator workspace: identifiers, the entity view the refresh handler
//! diffs against, the report-key grammar, and the small set of error
//! markers that `error_stack::Report` chains are built from.

pub mod entity_view;
pub mod error;
pub mod hash;
pub mod ids;
pub mod indirect;
pub mod report_key;

pub use entity_view::{EntityView, RelationView};
pub use error::{ConfigInvalid, EngineUnavailable, LeaseLost, MartFatal, MartTransient, MessageUnparseable, Retryability, Shutdown};
pub use hash::entity_view_hash;
pub use ids::{EntityId, OperationId, RecordKey};
pub use indirect::IllegalArgument;
pub use report_key::{ReportFamily, ReportKey, ReportKeyParseError};
