//! Error types for the moderation pipeline
//!
//! Every external call site classifies its failure into one of these
//! variants instead of propagating platform errors unchecked.

use thiserror::Error;

use crate::moderation::events::Subject;

/// Errors that can occur while detecting or enforcing a violation
#[derive(Debug, Error)]
pub enum ModerationError {
    /// Durable storage I/O failed; the caller may retry
    #[error("storage i/o: {0}")]
    Storage(#[from] std::io::Error),

    /// Restriction state could not be (de)serialized
    #[error("state serialization: {0}")]
    Serialize(#[from] serde_yaml::Error),

    /// The platform did not answer within the bounded timeout
    #[error("platform call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The bot's own privilege is insufficient; terminal, never retried
    #[error("platform refused the action: {0}")]
    PermissionDenied(String),

    /// The subject left the community between detection and enforcement
    #[error("subject no longer present: {0}")]
    SubjectGone(Subject),

    /// Any other platform API failure
    #[error("platform api: {0}")]
    Api(String),
}

impl ModerationError {
    /// Whether the calling layer may retry with backoff.
    ///
    /// Only storage I/O and timeouts qualify; permission and not-found
    /// failures are terminal.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Timeout(_))
    }
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;
