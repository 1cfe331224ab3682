use thiserror::Error;

/// A single field could not be converted to its destination format.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("field {field:?} (from source {source_field:?}): {message}")]
pub struct TransformError {
    pub field: String,
    pub source_field: String,
    pub message: String,
}
