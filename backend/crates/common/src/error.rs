use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a destination call failed. Only `Transient` is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationErrorKind {
    NotFound,
    Unauthorized,
    Transient,
    Permanent,
}

impl DestinationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for DestinationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transformation error: {0}")]
    Transform(String),

    #[error("destination error ({kind}): {message}")]
    Destination {
        kind: DestinationErrorKind,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn destination(kind: DestinationErrorKind, message: impl Into<String>) -> Self {
        Self::Destination {
            kind,
            message: message.into(),
        }
    }

    /// Errors after which a run must not continue: mapping durability or the
    /// source stream itself is gone.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Source(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
