//! Registry of pending mutation intents.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::{Email, EmailId, IntentId, IntentKind, IntentPayload, MutationIntent};
use crate::store::ProtectedFields;

/// Pending flag intents for one (email, kind) pair.
#[derive(Debug)]
struct FlagChain {
    /// The only intent whose outcome is applied.
    latest: MutationIntent,
    /// Last value the provider is known to hold.
    baseline: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    next_id: u64,
    flags: HashMap<(EmailId, IntentKind), FlagChain>,
    sends: HashMap<EmailId, MutationIntent>,
}

impl LedgerState {
    fn next_id(&mut self) -> IntentId {
        self.next_id += 1;
        IntentId(self.next_id)
    }
}

/// What to do with a flag intent's provider result.
#[derive(Debug)]
pub enum Resolution {
    /// The intent was the latest and the provider accepted it.
    Confirmed(MutationIntent),
    /// A newer intent owns the field; this result must not touch it.
    Superseded,
    /// The intent was the latest and the provider refused it. The field
    /// must be restored to `restore`.
    RollBack {
        /// The failed intent.
        intent: MutationIntent,
        /// Value to put back.
        restore: bool,
    },
}

/// Tracks which mutation intents are pending.
///
/// For a given email and kind only the most recent intent is authoritative;
/// submitting a new one supersedes the previous one before it resolves.
///
/// Callers that also touch the [`crate::store::MailStore`] take the store
/// lock first and the ledger lock second.
#[derive(Debug, Default)]
pub struct IntentLedger {
    state: Mutex<LedgerState>,
}

impl IntentLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a flag change from `current` to `desired`.
    ///
    /// If an intent for the same email and kind is pending, the new one
    /// replaces it and inherits its baseline.
    pub fn submit_flag(
        &self,
        target: &EmailId,
        kind: IntentKind,
        desired: bool,
        current: bool,
    ) -> IntentId {
        let mut state = self.lock();
        let id = state.next_id();
        let payload = match kind {
            IntentKind::MarkRead => IntentPayload::Read(desired),
            _ => IntentPayload::Starred(desired),
        };
        let intent = MutationIntent::new(id, target.clone(), kind, payload);

        state
            .flags
            .entry((target.clone(), kind))
            .and_modify(|chain| chain.latest = intent.clone())
            .or_insert(FlagChain {
                latest: intent,
                baseline: current,
            });
        id
    }

    /// Records the provider's answer for a flag intent.
    pub fn resolve_flag(
        &self,
        target: &EmailId,
        kind: IntentKind,
        id: IntentId,
        accepted: bool,
        desired: bool,
    ) -> Resolution {
        let mut state = self.lock();
        let key = (target.clone(), kind);

        let Some(chain) = state.flags.get_mut(&key) else {
            return Resolution::Superseded;
        };
        if chain.latest.id != id {
            if accepted && id < chain.latest.id {
                chain.baseline = desired;
            }
            return Resolution::Superseded;
        }

        let Some(FlagChain { mut latest, baseline }) = state.flags.remove(&key) else {
            return Resolution::Superseded;
        };
        if accepted {
            latest.confirm();
            Resolution::Confirmed(latest)
        } else {
            latest.fail();
            Resolution::RollBack {
                intent: latest,
                restore: baseline,
            }
        }
    }

    /// Registers a provisional send.
    pub fn submit_send(&self, provisional: &EmailId, payload: IntentPayload) -> IntentId {
        let mut state = self.lock();
        let id = state.next_id();
        let intent = MutationIntent::new(id, provisional.clone(), IntentKind::Send, payload);
        state.sends.insert(provisional.clone(), intent);
        id
    }

    /// Removes a send intent once the provider answered.
    pub fn resolve_send(&self, provisional: &EmailId, accepted: bool) -> Option<MutationIntent> {
        let mut intent = self.lock().sends.remove(provisional)?;
        if accepted {
            intent.confirm();
        } else {
            intent.fail();
        }
        Some(intent)
    }

    /// Fields of `target` that have a pending intent.
    #[must_use]
    pub fn protected_fields(&self, target: &EmailId) -> ProtectedFields {
        let state = self.lock();
        ProtectedFields {
            read: state
                .flags
                .contains_key(&(target.clone(), IntentKind::MarkRead)),
            starred: state
                .flags
                .contains_key(&(target.clone(), IntentKind::ToggleStar)),
        }
    }

    /// `email` with every protected flag set to the value the provider is
    /// known to hold, for writing to durable storage.
    #[must_use]
    pub fn settled(&self, mut email: Email) -> Email {
        let state = self.lock();
        let baseline = |kind| {
            state
                .flags
                .get(&(email.id.clone(), kind))
                .map(|chain| chain.baseline)
        };
        let read = baseline(IntentKind::MarkRead);
        let starred = baseline(IntentKind::ToggleStar);
        drop(state);

        if let Some(read) = read {
            email.is_read = read;
        }
        if let Some(starred) = starred {
            email.is_starred = starred;
        }
        email
    }

    /// Returns true if any intent is pending.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        let state = self.lock();
        !state.flags.is_empty() || !state.sends.is_empty()
    }
}
