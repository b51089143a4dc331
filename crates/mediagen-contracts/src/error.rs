use thiserror::Error;

/// Failure taxonomy shared by every generator and the job runner.
///
/// Only `RemoteCall`, `NoMediaFound` and `ContentFiltered` are consumed by the
/// retry loop; everything else escapes it.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("remote call failed: {0}")]
    RemoteCall(String),

    #[error("no media found: {0}")]
    NoMediaFound(String),

    #[error("content filtered: {}", reasons.join("; "))]
    ContentFiltered { reasons: Vec<String> },

    #[error("generation cancelled: {0}")]
    Cancelled(String),

    #[error("failed to write {path}: {source}")]
    OutputWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl GenerationError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteCall(message.into())
    }

    pub fn no_media(message: impl Into<String>) -> Self {
        Self::NoMediaFound(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteCall(_) | Self::NoMediaFound(_) | Self::ContentFiltered { .. }
        )
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }
}
