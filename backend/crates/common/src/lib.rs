pub mod error;

pub use error::{DestinationErrorKind, SyncError, SyncResult};
