pub mod conformance;
mod error;
mod record;
mod traits;

pub use error::StorageError;
pub use record::{AuditEntryRecord, FlowRecord, SessionRecord};
pub use traits::FlowStorage;
