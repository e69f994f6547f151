//! Per-mailbox incremental synchronization.
//!
//! Each open mailbox has a [`SyncState`] whose `in_flight` flag is the only
//! concurrency gate: the flag is checked and set under one lock, so of any
//! number of concurrent [`SyncCoordinator::trigger`] calls exactly one
//! reaches the provider and the rest return [`SyncOutcome::AlreadyInFlight`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Error;
use crate::model::{EmailId, MailboxId, SyncCursor};
use crate::mutation::IntentLedger;
use crate::remote::MailProvider;
use crate::store::{MailStore, SnapshotWriter};

/// Synchronization state of one mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Last cursor returned by the provider.
    pub cursor: Option<SyncCursor>,
    /// True while a sync is running.
    pub in_flight: bool,
    /// When the last sync completed.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Message of the last failure, cleared by a successful sync.
    pub last_error: Option<String>,
}

/// Changes applied by a completed sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// The synchronized mailbox.
    pub mailbox: MailboxId,
    /// Emails created or overwritten.
    pub upserted: Vec<EmailId>,
    /// Emails removed from the store.
    pub deleted: Vec<EmailId>,
    /// The new cursor.
    pub cursor: SyncCursor,
    /// Completion time.
    pub synced_at: DateTime<Utc>,
}

impl SyncReport {
    /// Returns true if the sync changed nothing locally.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.deleted.is_empty()
    }
}

/// Result of a trigger.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The sync ran and its changes were merged.
    Completed(SyncReport),
    /// Another sync for the mailbox was running; nothing was done.
    AlreadyInFlight,
    /// The provider call failed; the cursor was not advanced.
    Failed(Error),
}

impl SyncOutcome {
    /// The report, if the sync completed.
    #[must_use]
    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }

    /// Returns true if the sync completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

type SyncStates = Arc<Mutex<HashMap<MailboxId, SyncState>>>;

fn lock(
    states: &Mutex<HashMap<MailboxId, SyncState>>,
) -> MutexGuard<'_, HashMap<MailboxId, SyncState>> {
    states.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears `in_flight` when dropped, including when the sync future is
/// cancelled mid-call.
struct InFlightGuard {
    states: SyncStates,
    mailbox: MailboxId,
    armed: bool,
}

impl InFlightGuard {
    /// Updates the state and clears the flag under the same lock.
    fn finish(mut self, apply: impl FnOnce(&mut SyncState)) {
        let mut states = lock(&self.states);
        match states.get_mut(&self.mailbox) {
            Some(state) => {
                apply(state);
                state.in_flight = false;
            }
            None => debug!("Mailbox {} closed during sync", self.mailbox),
        }
        self.armed = false;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.armed
            && let Some(state) = lock(&self.states).get_mut(&self.mailbox)
        {
            state.in_flight = false;
        }
    }
}

/// Keeps the local store in sync with the mail provider.
#[derive(Debug)]
pub struct SyncCoordinator<P> {
    provider: Arc<P>,
    store: Arc<MailStore>,
    ledger: Arc<IntentLedger>,
    states: SyncStates,
    snapshot: Option<SnapshotWriter>,
}

impl<P> Clone for SyncCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            states: Arc::clone(&self.states),
            snapshot: self.snapshot.clone(),
        }
    }
}

impl<P: MailProvider> SyncCoordinator<P> {
    /// Creates a coordinator merging into `store`.
    ///
    /// `ledger` decides which local flags survive a merge.
    #[must_use]
    pub fn new(provider: Arc<P>, store: Arc<MailStore>, ledger: Arc<IntentLedger>) -> Self {
        Self {
            provider,
            store,
            ledger,
            states: Arc::default(),
            snapshot: None,
        }
    }

    /// Persists every completed sync to `snapshot` before the mailbox is
    /// released for the next one.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: SnapshotWriter) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Starts tracking a mailbox, resuming from `cursor` if given.
    ///
    /// Reopening an open mailbox keeps its state.
    pub fn open_mailbox(&self, mailbox: &MailboxId, cursor: Option<SyncCursor>) {
        lock(&self.states)
            .entry(mailbox.clone())
            .or_insert_with(|| SyncState {
                cursor,
                ..SyncState::default()
            });
    }

    /// Stops tracking a mailbox and returns its last state.
    pub fn close_mailbox(&self, mailbox: &MailboxId) -> Option<SyncState> {
        lock(&self.states).remove(mailbox)
    }

    /// Copy of a mailbox's state.
    #[must_use]
    pub fn status(&self, mailbox: &MailboxId) -> Option<SyncState> {
        lock(&self.states).get(mailbox).cloned()
    }

    /// Claims the in-flight flag, opening the mailbox if needed.
    fn begin(&self, mailbox: &MailboxId) -> Option<(InFlightGuard, Option<SyncCursor>)> {
        let mut states = lock(&self.states);
        let state = states.entry(mailbox.clone()).or_default();
        if state.in_flight {
            return None;
        }
        state.in_flight = true;
        let cursor = state.cursor.clone();
        drop(states);

        let guard = InFlightGuard {
            states: Arc::clone(&self.states),
            mailbox: mailbox.clone(),
            armed: true,
        };
        Some((guard, cursor))
    }

    /// Fetches and merges the provider's changes since the stored cursor.
    ///
    /// Never returns an error directly: failures are recorded in the
    /// mailbox's `last_error` and reported as [`SyncOutcome::Failed`].
    pub async fn trigger(&self, mailbox: &MailboxId) -> SyncOutcome {
        let Some((guard, cursor)) = self.begin(mailbox) else {
            debug!("Sync already in flight for {}", mailbox);
            return SyncOutcome::AlreadyInFlight;
        };

        debug!("Syncing {} from cursor {:?}", mailbox, cursor);
        match self.provider.fetch_changes(mailbox, cursor.as_ref()).await {
            Ok(changes) => {
                let ledger = &self.ledger;
                let merged = self
                    .store
                    .apply_deltas(changes.deltas, |id| ledger.protected_fields(id));
                let report = SyncReport {
                    mailbox: mailbox.clone(),
                    upserted: merged.upserted,
                    deleted: merged.deleted,
                    cursor: changes.new_cursor,
                    synced_at: Utc::now(),
                };

                if let Some(snapshot) = &self.snapshot
                    && let Err(e) = snapshot.persist_sync(&report).await
                {
                    warn!("Failed to persist sync of {}: {}", mailbox, e);
                }

                guard.finish(|state| {
                    state.cursor = Some(report.cursor.clone());
                    state.last_synced_at = Some(report.synced_at);
                    state.last_error = None;
                });
                info!(
                    "Synced {}: {} upserted, {} deleted",
                    mailbox,
                    report.upserted.len(),
                    report.deleted.len()
                );
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                warn!("Sync of {} failed: {}", mailbox, e);
                let message = e.to_string();
                guard.finish(|state| state.last_error = Some(message));
                SyncOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::{Email, IntentKind};
    use crate::store::SnapshotRepository;
    use crate::testing::{FakeMailProvider, Failure};

    fn email(id: &str, minute: u32) -> Email {
        Email::new(
            id,
            format!("Subject {id}"),
            Utc.with_ymd_and_hms(2026, 1, 24, 10, minute, 0).unwrap(),
        )
    }

    fn inbox() -> MailboxId {
        MailboxId::new("inbox")
    }

    fn coordinator(
        provider: FakeMailProvider,
    ) -> (
        SyncCoordinator<FakeMailProvider>,
        Arc<FakeMailProvider>,
        Arc<MailStore>,
        Arc<IntentLedger>,
    ) {
        let provider = Arc::new(provider);
        let store = Arc::new(MailStore::default());
        let ledger = Arc::new(IntentLedger::new());
        let sync = SyncCoordinator::new(
            Arc::clone(&provider),
            Arc::clone(&store),
            Arc::clone(&ledger),
        );
        (sync, provider, store, ledger)
    }

    #[tokio::test]
    async fn test_first_sync_pulls_everything() {
        let (sync, _, store, _) =
            coordinator(FakeMailProvider::with_emails([email("a", 1), email("b", 2)]));

        let outcome = sync.trigger(&inbox()).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.upserted.len(), 2);
        assert_eq!(store.len(), 2);

        let state = sync.status(&inbox()).unwrap();
        assert!(!state.in_flight);
        assert_eq!(state.cursor, Some(SyncCursor::new("2")));
        assert!(state.last_synced_at.is_some());
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_make_one_provider_call() {
        let (sync, provider, store, _) = coordinator(FakeMailProvider::with_emails([email("a", 1)]));
        provider.hold_fetches();

        let triggers = futures::future::join_all((0..8).map(|_| {
            let sync = sync.clone();
            async move { sync.trigger(&inbox()).await }
        }));
        let release = async {
            tokio::task::yield_now().await;
            assert!(sync.status(&inbox()).unwrap().in_flight);
            provider.release_fetches();
        };
        let (outcomes, ()) = tokio::join!(triggers, release);

        assert_eq!(provider.fetch_calls(), 1);
        assert_eq!(outcomes.iter().filter(|o| o.is_completed()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, SyncOutcome::AlreadyInFlight))
                .count(),
            7
        );
        assert_eq!(store.len(), 1);
        assert!(!sync.status(&inbox()).unwrap().in_flight);
    }

    #[tokio::test]
    async fn test_second_sync_without_changes_is_idempotent() {
        let (sync, _, store, _) =
            coordinator(FakeMailProvider::with_emails([email("a", 1), email("b", 2)]));

        sync.trigger(&inbox()).await;
        let mut before = store.snapshot();
        before.sort_by(|x, y| x.id.cmp(&y.id));
        let cursor = sync.status(&inbox()).unwrap().cursor;

        let outcome = sync.trigger(&inbox()).await;
        assert!(outcome.report().unwrap().is_empty());
        let mut after = store.snapshot();
        after.sort_by(|x, y| x.id.cmp(&y.id));

        assert_eq!(before, after);
        assert_eq!(sync.status(&inbox()).unwrap().cursor, cursor);
    }

    #[tokio::test]
    async fn test_incremental_changes_are_merged() {
        let (sync, provider, store, _) =
            coordinator(FakeMailProvider::with_emails([email("a", 1), email("b", 2)]));
        sync.trigger(&inbox()).await;

        let mut changed = email("a", 1);
        changed.subject = "Edited".to_string();
        provider.deliver(changed);
        provider.expunge(&"b".into());
        provider.deliver(email("c", 3));

        let outcome = sync.trigger(&inbox()).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.deleted, vec![EmailId::from("b")]);
        assert_eq!(store.get(&"a".into()).unwrap().subject, "Edited");
        assert!(!store.contains(&"b".into()));
        assert!(store.contains(&"c".into()));
    }

    #[tokio::test]
    async fn test_failure_keeps_cursor_and_data() {
        let (sync, provider, store, _) = coordinator(FakeMailProvider::with_emails([email("a", 1)]));
        sync.trigger(&inbox()).await;
        let cursor = sync.status(&inbox()).unwrap().cursor;

        provider.deliver(email("b", 2));
        provider.fail_next_fetch(Failure::Unavailable);
        let outcome = sync.trigger(&inbox()).await;
        assert!(matches!(outcome, SyncOutcome::Failed(Error::ProviderUnavailable(_))));

        let state = sync.status(&inbox()).unwrap();
        assert_eq!(state.cursor, cursor);
        assert!(!state.in_flight);
        assert!(state.last_error.is_some());
        assert_eq!(store.len(), 1);

        // Next trigger retries from the same point and clears the error.
        sync.trigger(&inbox()).await;
        let state = sync.status(&inbox()).unwrap();
        assert!(state.last_error.is_none());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_cursor_is_reported() {
        let (sync, provider, _, _) = coordinator(FakeMailProvider::new());
        sync.open_mailbox(&inbox(), Some(SyncCursor::new("99")));

        let outcome = sync.trigger(&inbox()).await;
        assert!(matches!(outcome, SyncOutcome::Failed(Error::InvalidCursor(_))));
        assert_eq!(provider.fetch_calls(), 1);
        assert_eq!(sync.status(&inbox()).unwrap().cursor, Some(SyncCursor::new("99")));
    }

    #[tokio::test]
    async fn test_pending_intent_protects_local_flag() {
        let (sync, provider, store, ledger) =
            coordinator(FakeMailProvider::with_emails([email("a", 1)]));
        sync.trigger(&inbox()).await;

        store.update(&"a".into(), |e| e.is_starred = true);
        ledger.submit_flag(&"a".into(), IntentKind::ToggleStar, true, false);

        let mut changed = email("a", 1);
        changed.subject = "Edited".to_string();
        provider.deliver(changed);
        sync.trigger(&inbox()).await;

        let stored = store.get(&"a".into()).unwrap();
        assert_eq!(stored.subject, "Edited");
        assert!(stored.is_starred);
    }

    #[tokio::test]
    async fn test_cancelled_sync_releases_flag() {
        let (sync, provider, _, _) = coordinator(FakeMailProvider::with_emails([email("a", 1)]));
        provider.hold_fetches();

        {
            let mailbox = inbox();
            let fut = sync.trigger(&mailbox);
            tokio::pin!(fut);
            assert!(futures::poll!(fut.as_mut()).is_pending());
            assert!(sync.status(&inbox()).unwrap().in_flight);
        }

        assert!(!sync.status(&inbox()).unwrap().in_flight);
        provider.release_fetches();
        assert!(sync.trigger(&inbox()).await.is_completed());
    }

    #[tokio::test]
    async fn test_mailbox_lifecycle() {
        let (sync, _, _, _) = coordinator(FakeMailProvider::new());
        assert!(sync.status(&inbox()).is_none());

        sync.open_mailbox(&inbox(), Some(SyncCursor::new("0")));
        sync.open_mailbox(&inbox(), None);
        assert_eq!(sync.status(&inbox()).unwrap().cursor, Some(SyncCursor::new("0")));

        let closed = sync.close_mailbox(&inbox()).unwrap();
        assert_eq!(closed.cursor, Some(SyncCursor::new("0")));
        assert!(sync.status(&inbox()).is_none());
    }

    #[tokio::test]
    async fn test_completed_sync_is_persisted() {
        let (sync, provider, store, ledger) =
            coordinator(FakeMailProvider::with_emails([email("a", 1), email("b", 2)]));
        let repository = SnapshotRepository::in_memory().await.unwrap();
        let sync = sync.with_snapshot(SnapshotWriter::new(repository.clone(), store, ledger));

        sync.trigger(&inbox()).await;
        provider.expunge(&"a".into());
        sync.trigger(&inbox()).await;

        let saved = repository.load_emails().await.unwrap();
        assert_eq!(saved.len(), 1);
        let cursors = repository.load_cursors().await.unwrap();
        assert_eq!(Some(cursors[0].cursor.clone()), sync.status(&inbox()).unwrap().cursor);
        assert_eq!(cursors[0].cursor, SyncCursor::new("3"));
    }
}
