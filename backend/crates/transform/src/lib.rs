pub mod convert;
pub mod engine;
pub mod error;
pub mod hash;
pub mod rules;
pub mod value;

pub use engine::{transform, FieldMappings, Payload, TypeRules};
pub use error::TransformError;
pub use hash::content_hash;
pub use rules::FieldRule;
pub use value::{SourceRecord, SourceValue};
