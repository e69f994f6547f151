//! Mutation intents and their lifecycle.

use chrono::{DateTime, Utc};

use super::{Draft, EmailId};

/// Sequence number of an intent; later submissions get larger numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntentId(pub u64);

impl std::fmt::Display for IntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an intent changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    /// The read flag.
    MarkRead,
    /// The starred flag.
    ToggleStar,
    /// A provisional sent email.
    Send,
}

impl IntentKind {
    /// Short name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MarkRead => "mark_read",
            Self::ToggleStar => "toggle_star",
            Self::Send => "send",
        }
    }
}

/// Value an intent asks the provider to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentPayload {
    /// Desired read state.
    Read(bool),
    /// Desired starred state.
    Starred(bool),
    /// Draft being sent.
    Send(Box<Draft>),
}

/// Lifecycle of an intent: `Pending → Confirmed` or `Pending → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    /// Applied locally, awaiting the provider.
    Pending,
    /// The provider accepted the change.
    Confirmed,
    /// The provider refused; the local change is undone.
    Failed,
}

/// A user mutation applied optimistically and awaiting confirmation.
#[derive(Debug, Clone)]
pub struct MutationIntent {
    /// Submission order.
    pub id: IntentId,
    /// Email the intent applies to.
    pub target: EmailId,
    /// What is being changed.
    pub kind: IntentKind,
    /// Requested value.
    pub payload: IntentPayload,
    /// When the user submitted the change.
    pub submitted_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: IntentStatus,
}

impl MutationIntent {
    /// Creates a pending intent.
    #[must_use]
    pub fn new(id: IntentId, target: EmailId, kind: IntentKind, payload: IntentPayload) -> Self {
        Self {
            id,
            target,
            kind,
            payload,
            submitted_at: Utc::now(),
            status: IntentStatus::Pending,
        }
    }

    /// Returns true while awaiting the provider.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == IntentStatus::Pending
    }

    /// `Pending → Confirmed`. Returns false from any other state.
    pub fn confirm(&mut self) -> bool {
        self.transition(IntentStatus::Pending, IntentStatus::Confirmed)
    }

    /// `Pending → Failed`. Returns false from any other state.
    pub fn fail(&mut self) -> bool {
        self.transition(IntentStatus::Pending, IntentStatus::Failed)
    }

    fn transition(&mut self, from: IntentStatus, to: IntentStatus) -> bool {
        if self.status == from {
            self.status = to;
            true
        } else {
            false
        }
    }
}
