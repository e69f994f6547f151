//! Error types for the inbox subsystem.

use thiserror::Error;

use crate::model::EmailId;

/// Errors that can occur in inbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A paging argument was out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A search query was blank.
    #[error("Search query is empty")]
    EmptyQuery,

    /// Enhancement input was blank.
    #[error("Cannot enhance empty content")]
    EmptyInput,

    /// A draft had no recipient.
    #[error("Please enter at least one recipient")]
    MissingRecipient,

    /// The mail provider could not be reached or failed.
    #[error("Mail provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider no longer accepts the stored sync cursor.
    #[error("Invalid sync cursor: {0}")]
    InvalidCursor(String),

    /// The provider refused to send a message.
    #[error("Send rejected: {0}")]
    SendRejected(String),

    /// The embedding collaborator failed.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The AI rewriting collaborator failed.
    #[error("Enhancement unavailable: {0}")]
    EnhancementUnavailable(String),

    /// The target email is not in the local store.
    #[error("Email not found: {0}")]
    NotFound(EmailId),

    /// Snapshot database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for collaborator failures the caller may retry.
    ///
    /// Validation errors return false: retrying them without changing the
    /// input cannot succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_)
                | Self::InvalidCursor(_)
                | Self::SendRejected(_)
                | Self::EmbeddingUnavailable(_)
                | Self::EnhancementUnavailable(_)
                | Self::Database(_)
                | Self::Io(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
