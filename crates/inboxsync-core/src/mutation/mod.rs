//! Optimistic read/star/send mutations.
//!
//! Each call validates its input and applies the local change before
//! returning. The provider round trip runs as a background task that
//! confirms or rolls back the change whether or not anyone awaits the
//! returned [`Confirmation`].

mod ledger;

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use ledger::{IntentLedger, Resolution};

use crate::model::{
    Delivery, Draft, Email, EmailId, FlagUpdate, IntentId, IntentKind, IntentPayload,
    PROVISIONAL_PREFIX, Participants,
};
use crate::remote::MailProvider;
use crate::store::{MailStore, SnapshotWriter};
use crate::{Error, Result};

/// Label carried by locally created sent emails.
pub const SENT_LABEL: &str = "SENT";

/// Handle to a mutation's provider round trip.
///
/// Awaiting it yields the result once the change is confirmed or rolled
/// back. Dropping it does not cancel the round trip.
#[derive(Debug)]
pub struct Confirmation<T> {
    task: JoinHandle<Result<T>>,
}

impl<T: Send + 'static> Confirmation<T> {
    fn spawn(work: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        Self {
            task: tokio::spawn(work),
        }
    }

    /// Returns true once the change is confirmed or rolled back.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Future for Confirmation<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                Err(Error::ProviderUnavailable(format!(
                    "confirmation task failed: {e}"
                )))
            })
        })
    }
}

/// How a flag mutation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The provider accepted the change and it was the latest intent.
    Confirmed,
    /// A newer intent for the same field was submitted; this result was ignored.
    Superseded,
}

/// A send whose provisional record is already visible.
#[derive(Debug)]
pub struct PendingSend {
    /// Local ID of the provisional email.
    pub provisional_id: EmailId,
    /// Resolves to the server-assigned ID.
    pub confirmation: Confirmation<EmailId>,
}

fn flag_mut(email: &mut Email, kind: IntentKind) -> &mut bool {
    match kind {
        IntentKind::MarkRead => &mut email.is_read,
        _ => &mut email.is_starred,
    }
}

/// Applies read/star/send mutations with rollback on failure.
#[derive(Debug)]
pub struct MutationCoordinator<P> {
    provider: Arc<P>,
    store: Arc<MailStore>,
    ledger: Arc<IntentLedger>,
    sender_address: String,
    snapshot: Option<SnapshotWriter>,
}

impl<P> Clone for MutationCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            sender_address: self.sender_address.clone(),
            snapshot: self.snapshot.clone(),
        }
    }
}

impl<P: MailProvider> MutationCoordinator<P> {
    /// Creates a coordinator writing to `store` and recording intents in `ledger`.
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        store: Arc<MailStore>,
        ledger: Arc<IntentLedger>,
        sender_address: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            ledger,
            sender_address: sender_address.into(),
            snapshot: None,
        }
    }

    /// Persists each email once its mutation is confirmed or rolled back.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: SnapshotWriter) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Marks an email as read.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the email is not stored locally. The
    /// confirmation fails with the provider's error after rolling back.
    pub fn mark_read(&self, id: &EmailId) -> Result<Confirmation<MutationOutcome>> {
        self.set_flag(id, IntentKind::MarkRead, true)
    }

    /// Marks an email as unread.
    ///
    /// # Errors
    ///
    /// Same as [`Self::mark_read`].
    pub fn mark_unread(&self, id: &EmailId) -> Result<Confirmation<MutationOutcome>> {
        self.set_flag(id, IntentKind::MarkRead, false)
    }

    /// Stars or unstars an email.
    ///
    /// # Errors
    ///
    /// Same as [`Self::mark_read`].
    pub fn toggle_star(
        &self,
        id: &EmailId,
        desired: bool,
    ) -> Result<Confirmation<MutationOutcome>> {
        self.set_flag(id, IntentKind::ToggleStar, desired)
    }

    fn set_flag(
        &self,
        id: &EmailId,
        kind: IntentKind,
        desired: bool,
    ) -> Result<Confirmation<MutationOutcome>> {
        let ledger = &self.ledger;
        let intent = self
            .store
            .update(id, |email| {
                let field = flag_mut(email, kind);
                let current = *field;
                *field = desired;
                ledger.submit_flag(id, kind, desired, current)
            })
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        debug!("Submitted {} {} for {} ({desired})", kind.as_str(), intent, id);

        let flags = match kind {
            IntentKind::MarkRead => FlagUpdate::read(desired),
            _ => FlagUpdate::starred(desired),
        };
        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let ledger = Arc::clone(&self.ledger);
        let snapshot = self.snapshot.clone();
        let id = id.clone();

        Ok(Confirmation::spawn(async move {
            let result = provider.update_flags(&id, flags).await;
            let outcome = resolve_flag(&store, &ledger, &id, kind, intent, desired, result);
            if !matches!(outcome, Ok(MutationOutcome::Superseded)) {
                persist(snapshot.as_ref(), &id).await;
            }
            outcome
        }))
    }

    /// Sends a draft, showing a provisional record until the provider answers.
    ///
    /// An empty subject or body is allowed and only logged. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRecipient`] if the draft has no `to` address;
    /// nothing is created in that case. The confirmation fails with the
    /// provider's error after removing the provisional record.
    pub fn send(&self, draft: Draft) -> Result<PendingSend> {
        if !draft.has_recipient() {
            return Err(Error::MissingRecipient);
        }
        if draft.subject.trim().is_empty() {
            warn!("Sending email with empty subject");
        }
        if draft.body.trim().is_empty() {
            warn!("Sending email with empty body");
        }

        let provisional = self.provisional_email(&draft);
        let provisional_id = provisional.id.clone();
        self.store.upsert(provisional);
        let intent = self
            .ledger
            .submit_send(&provisional_id, IntentPayload::Send(Box::new(draft.clone())));
        debug!("Submitted send {} as {}", intent, provisional_id);

        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let ledger = Arc::clone(&self.ledger);
        let snapshot = self.snapshot.clone();
        let local_id = provisional_id.clone();

        let confirmation = Confirmation::spawn(async move {
            match provider.send_message(&draft).await {
                Ok(receipt) => {
                    if let Some(intent) = ledger.resolve_send(&local_id, true) {
                        debug!("Send {} {:?}", intent.id, intent.status);
                    }
                    if !store.rekey(&local_id, receipt.server_id.clone()) {
                        debug!("Provisional {} was gone before confirmation", local_id);
                    }
                    persist(snapshot.as_ref(), &receipt.server_id).await;
                    info!("Sent {} as {}", local_id, receipt.server_id);
                    Ok(receipt.server_id)
                }
                Err(e) => {
                    store.remove(&local_id);
                    if let Some(intent) = ledger.resolve_send(&local_id, false) {
                        debug!("Send {} {:?}", intent.id, intent.status);
                    }
                    warn!("Send failed, removed {}: {}", local_id, e);
                    Err(e)
                }
            }
        });

        Ok(PendingSend {
            provisional_id,
            confirmation,
        })
    }

    fn provisional_email(&self, draft: &Draft) -> Email {
        let id = format!("{PROVISIONAL_PREFIX}{}", Uuid::new_v4());
        let mut email = Email::new(id, draft.subject.clone(), Utc::now()).read(true);
        email.thread_id.clone_from(&draft.thread_id);
        email.body_html.clone_from(&draft.body);
        email.participants = Participants {
            from: self.sender_address.clone(),
            to: draft.to.clone(),
            cc: draft.cc.clone(),
            bcc: draft.bcc.clone(),
        };
        email.labels = BTreeSet::from([SENT_LABEL.to_string()]);
        email.delivery = Delivery::Pending;
        email
    }
}

async fn persist(snapshot: Option<&SnapshotWriter>, id: &EmailId) {
    if let Some(snapshot) = snapshot
        && let Err(e) = snapshot.persist_email(id).await
    {
        warn!("Failed to persist {}: {}", id, e);
    }
}

fn resolve_flag(
    store: &MailStore,
    ledger: &IntentLedger,
    id: &EmailId,
    kind: IntentKind,
    intent: IntentId,
    desired: bool,
    result: Result<()>,
) -> Result<MutationOutcome> {
    let accepted = result.is_ok();
    let resolution = store
        .update(id, |email| {
            let resolution = ledger.resolve_flag(id, kind, intent, accepted, desired);
            if let Resolution::RollBack { restore, .. } = &resolution {
                *flag_mut(email, kind) = *restore;
            }
            resolution
        })
        .unwrap_or_else(|| ledger.resolve_flag(id, kind, intent, accepted, desired));

    match (resolution, result) {
        (Resolution::Superseded, _) => {
            debug!("{} {} for {} superseded", kind.as_str(), intent, id);
            Ok(MutationOutcome::Superseded)
        }
        (Resolution::Confirmed(intent), Ok(())) => {
            debug!(
                "{} {} for {} confirmed after {}ms",
                kind.as_str(),
                intent.id,
                id,
                (Utc::now() - intent.submitted_at).num_milliseconds()
            );
            Ok(MutationOutcome::Confirmed)
        }
        (Resolution::RollBack { intent, restore }, Err(e)) => {
            warn!(
                "{} {} failed for {}, restored {}: {}",
                kind.as_str(),
                intent.id,
                id,
                restore,
                e
            );
            Err(e)
        }
        (_, result) => result.map(|()| MutationOutcome::Confirmed),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{FakeMailProvider, Failure};

    struct Fixture {
        provider: Arc<FakeMailProvider>,
        store: Arc<MailStore>,
        ledger: Arc<IntentLedger>,
        mutations: MutationCoordinator<FakeMailProvider>,
    }

    fn fixture(emails: Vec<Email>) -> Fixture {
        let provider = Arc::new(FakeMailProvider::with_emails(emails.clone()));
        let store = Arc::new(MailStore::with_emails(emails));
        let ledger = Arc::new(IntentLedger::new());
        let mutations = MutationCoordinator::new(
            Arc::clone(&provider),
            Arc::clone(&store),
            Arc::clone(&ledger),
            "me@example.com",
        );
        Fixture {
            provider,
            store,
            ledger,
            mutations,
        }
    }

    fn email(id: &str) -> Email {
        Email::new(id, format!("Subject {id}"), Utc::now())
    }

    fn id(s: &str) -> EmailId {
        EmailId::from(s)
    }

    async fn eventually(done: impl Fn() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_mark_read_applies_before_confirmation() {
        let f = fixture(vec![email("a")]);
        let confirmation = f.mutations.mark_read(&id("a")).unwrap();

        assert!(f.store.get(&id("a")).unwrap().is_read);
        assert!(f.ledger.protected_fields(&id("a")).read);

        assert_eq!(confirmation.await.unwrap(), MutationOutcome::Confirmed);
        assert!(!f.ledger.has_pending());
        assert!(f.provider.server_email(&id("a")).unwrap().is_read);
    }

    #[tokio::test]
    async fn test_mark_unread() {
        let f = fixture(vec![email("a").read(true)]);
        f.mutations.mark_unread(&id("a")).unwrap().await.unwrap();
        assert!(!f.store.get(&id("a")).unwrap().is_read);
    }

    #[tokio::test]
    async fn test_unknown_email_is_not_found() {
        let f = fixture(vec![]);
        let result = f.mutations.toggle_star(&id("zzz"), true);
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!f.ledger.has_pending());
    }

    #[tokio::test]
    async fn test_star_failure_restores_previous_value() {
        let f = fixture(vec![email("a").starred(false)]);
        f.provider.script_flag_result(Some(Failure::Unavailable));

        let confirmation = f.mutations.toggle_star(&id("a"), true).unwrap();
        assert!(f.store.get(&id("a")).unwrap().is_starred);

        let err = confirmation.await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(!f.store.get(&id("a")).unwrap().is_starred);
        assert!(!f.ledger.has_pending());
    }

    #[tokio::test]
    async fn test_rollback_restores_exact_value_not_default() {
        let f = fixture(vec![email("a").starred(true)]);
        f.provider.script_flag_result(Some(Failure::Unavailable));

        let _ = f.mutations.toggle_star(&id("a"), false).unwrap().await;
        assert!(f.store.get(&id("a")).unwrap().is_starred);
    }

    #[tokio::test]
    async fn test_duplicate_mark_read_converges_in_order() {
        let f = fixture(vec![email("a")]);
        let first = f.mutations.mark_read(&id("a")).unwrap();
        let second = f.mutations.mark_read(&id("a")).unwrap();

        assert_eq!(first.await.unwrap(), MutationOutcome::Superseded);
        assert_eq!(second.await.unwrap(), MutationOutcome::Confirmed);
        assert!(f.store.get(&id("a")).unwrap().is_read);
    }

    #[tokio::test]
    async fn test_duplicate_mark_read_awaited_out_of_order() {
        let f = fixture(vec![email("a")]);
        let first = f.mutations.mark_read(&id("a")).unwrap();
        let second = f.mutations.mark_read(&id("a")).unwrap();

        assert_eq!(second.await.unwrap(), MutationOutcome::Confirmed);
        assert_eq!(first.await.unwrap(), MutationOutcome::Superseded);
        assert!(f.store.get(&id("a")).unwrap().is_read);
        assert!(!f.ledger.has_pending());
    }

    #[tokio::test]
    async fn test_superseded_failure_does_not_roll_back() {
        let f = fixture(vec![email("a")]);
        f.provider.script_flag_result(Some(Failure::Unavailable));
        f.provider.script_flag_result(None);

        let first = f.mutations.toggle_star(&id("a"), true).unwrap();
        let second = f.mutations.toggle_star(&id("a"), false).unwrap();
        let third = f.mutations.toggle_star(&id("a"), true).unwrap();

        assert_eq!(first.await.unwrap(), MutationOutcome::Superseded);
        assert!(f.store.get(&id("a")).unwrap().is_starred);
        assert_eq!(second.await.unwrap(), MutationOutcome::Superseded);
        assert_eq!(third.await.unwrap(), MutationOutcome::Confirmed);
        assert!(f.store.get(&id("a")).unwrap().is_starred);
    }

    #[tokio::test]
    async fn test_newest_failure_rolls_back_to_confirmed_value() {
        let f = fixture(vec![email("a")]);
        f.provider.script_flag_result(None);
        f.provider.script_flag_result(Some(Failure::Unavailable));

        let first = f.mutations.toggle_star(&id("a"), true).unwrap();
        let second = f.mutations.toggle_star(&id("a"), false).unwrap();

        assert_eq!(first.await.unwrap(), MutationOutcome::Superseded);
        assert!(second.await.is_err());
        // The server accepted `true` from the first call.
        assert!(f.store.get(&id("a")).unwrap().is_starred);
    }

    #[tokio::test]
    async fn test_different_emails_are_independent() {
        let f = fixture(vec![email("a"), email("b")]);
        f.provider.script_flag_result(Some(Failure::Unavailable));
        f.provider.script_flag_result(None);

        let a = f.mutations.toggle_star(&id("a"), true).unwrap();
        let b = f.mutations.toggle_star(&id("b"), true).unwrap();

        assert!(a.await.is_err());
        assert_eq!(b.await.unwrap(), MutationOutcome::Confirmed);
        assert!(!f.store.get(&id("a")).unwrap().is_starred);
        assert!(f.store.get(&id("b")).unwrap().is_starred);
    }

    #[tokio::test]
    async fn test_send_without_recipient_creates_nothing() {
        let f = fixture(vec![]);
        let result = f.mutations.send(Draft::new("", "hi", "hi"));
        assert!(matches!(result, Err(Error::MissingRecipient)));
        assert!(f.store.is_empty());
        assert!(!f.ledger.has_pending());
    }

    #[tokio::test]
    async fn test_send_blank_subject_and_body_creates_provisional() {
        let f = fixture(vec![]);
        let pending = f.mutations.send(Draft::new("a@b.com", "", "")).unwrap();

        assert!(pending.provisional_id.is_provisional());
        let provisional = f.store.get(&pending.provisional_id).unwrap();
        assert_eq!(provisional.delivery, Delivery::Pending);
        assert_eq!(provisional.participants.from, "me@example.com");
        assert!(provisional.labels.contains(SENT_LABEL));
        assert!(provisional.is_read);

        let server_id = pending.confirmation.await.unwrap();
        assert!(!f.store.contains(&pending.provisional_id));
        let sent = f.store.get(&server_id).unwrap();
        assert_eq!(sent.delivery, Delivery::Delivered);
        assert_eq!(f.provider.sent().len(), 1);
        assert!(!f.ledger.has_pending());
    }

    #[tokio::test]
    async fn test_send_failure_removes_provisional() {
        let f = fixture(vec![]);
        f.provider.fail_next_send(Failure::Rejected);

        let pending = f
            .mutations
            .send(Draft::new("a@b.com; c@d.com", "Hi", "Body").cc("e@f.com"))
            .unwrap();
        assert_eq!(f.store.len(), 1);

        let err = pending.confirmation.await.unwrap_err();
        assert!(matches!(err, Error::SendRejected(_)));
        assert!(f.store.is_empty());
        assert!(!f.ledger.has_pending());
        assert!(f.provider.sent().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_confirmation_still_reaches_provider() {
        let f = fixture(vec![email("a")]);
        drop(f.mutations.mark_read(&id("a")).unwrap());

        eventually(|| !f.ledger.has_pending()).await;
        assert!(!f.ledger.has_pending());
        assert!(f.provider.server_email(&id("a")).unwrap().is_read);
        assert!(f.store.get(&id("a")).unwrap().is_read);
    }

    #[tokio::test]
    async fn test_dropped_confirmation_still_rolls_back() {
        let f = fixture(vec![email("a")]);
        f.provider.script_flag_result(Some(Failure::Unavailable));
        drop(f.mutations.toggle_star(&id("a"), true).unwrap());
        assert!(f.store.get(&id("a")).unwrap().is_starred);

        eventually(|| !f.ledger.has_pending()).await;
        assert!(!f.ledger.has_pending());
        assert!(!f.store.get(&id("a")).unwrap().is_starred);
    }

    #[tokio::test]
    async fn test_dropped_send_still_reconciles() {
        let f = fixture(vec![]);
        let pending = f.mutations.send(Draft::new("a@b.com", "Hi", "Body")).unwrap();
        let provisional = pending.provisional_id.clone();
        drop(pending);

        eventually(|| !f.store.contains(&provisional)).await;
        assert!(!f.store.contains(&provisional));
        assert!(!f.ledger.has_pending());
        let stored = f.store.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].delivery, Delivery::Delivered);
        assert_eq!(f.provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_reports_finished() {
        let f = fixture(vec![email("a")]);
        let confirmation = f.mutations.mark_read(&id("a")).unwrap();
        assert!(!confirmation.is_finished());
        eventually(|| confirmation.is_finished()).await;
        assert_eq!(confirmation.await.unwrap(), MutationOutcome::Confirmed);
    }
}
