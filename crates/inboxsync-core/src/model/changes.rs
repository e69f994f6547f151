//! Incremental change sets returned by the mail provider.

use serde::{Deserialize, Serialize};

use super::{Email, EmailId};

/// Opaque position in the provider's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(pub String);

impl SyncCursor {
    /// Create a new cursor.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the cursor token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single change to apply to the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EmailDelta {
    /// Create the email, or overwrite the local copy with the same ID.
    Upsert(Email),
    /// Remove the email.
    Delete {
        /// ID of the removed email.
        id: EmailId,
    },
}

impl EmailDelta {
    /// ID of the email this delta touches.
    #[must_use]
    pub const fn id(&self) -> &EmailId {
        match self {
            Self::Upsert(email) => &email.id,
            Self::Delete { id } => id,
        }
    }
}

/// Changes since a cursor, plus the cursor to resume from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// Deltas in provider order.
    #[serde(default)]
    pub deltas: Vec<EmailDelta>,
    /// Cursor after these deltas.
    pub new_cursor: SyncCursor,
}
