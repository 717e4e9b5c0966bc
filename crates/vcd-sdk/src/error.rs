use thiserror::Error;

pub type SdkResult<T> = Result<T, SdkError>;

/// Failures surfaced by the client library.
///
/// The `[ENF]` prefix mirrors the marker Cloud Director clients use for
/// "entity not found" so log lines stay greppable across tools.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SdkError {
    #[error("[ENF] entity not found: {0}")]
    NotFound(String),
    #[error("remote rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("stale ETag for {0}: the object changed since it was read")]
    StaleEtag(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl SdkError {
    pub fn not_found(what: impl Into<String>) -> Self {
        SdkError::NotFound(what.into())
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        SdkError::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SdkError::NotFound(_))
    }

    /// Reports whether the remote's message contains `marker`.
    pub fn mentions(&self, marker: &str) -> bool {
        match self {
            SdkError::Rejected { message, .. } => message.contains(marker),
            SdkError::Transport(message) => message.contains(marker),
            _ => false,
        }
    }
}
