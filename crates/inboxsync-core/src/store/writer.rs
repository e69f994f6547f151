//! Ordered writes of local state to the snapshot.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::{MailStore, SnapshotRepository};
use crate::Result;
use crate::model::{Email, EmailId};
use crate::mutation::IntentLedger;
use crate::sync::SyncReport;

/// Writes the store to a [`SnapshotRepository`] one change at a time.
///
/// Records are read from the store when the write starts, with every flag
/// that has a pending intent replaced by the value the provider is known to
/// hold. An optimistic flag only reaches the snapshot once it is confirmed.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    repository: SnapshotRepository,
    store: Arc<MailStore>,
    ledger: Arc<IntentLedger>,
    order: Arc<Mutex<()>>,
}

impl SnapshotWriter {
    /// Creates a writer persisting `store` to `repository`.
    #[must_use]
    pub fn new(
        repository: SnapshotRepository,
        store: Arc<MailStore>,
        ledger: Arc<IntentLedger>,
    ) -> Self {
        Self {
            repository,
            store,
            ledger,
            order: Arc::default(),
        }
    }

    /// The underlying repository.
    #[must_use]
    pub const fn repository(&self) -> &SnapshotRepository {
        &self.repository
    }

    /// Persists the emails, deletions and cursor of a completed sync.
    ///
    /// Deleted IDs that are back in the store are kept.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Database`] if a write fails.
    pub async fn persist_sync(&self, report: &SyncReport) -> Result<()> {
        let _order = self.order.lock().await;

        let emails = self.settled(&report.upserted);
        self.repository.save_emails(&emails).await?;

        let gone: Vec<EmailId> = report
            .deleted
            .iter()
            .filter(|id| !self.store.contains(id))
            .cloned()
            .collect();
        self.repository.delete_emails(&gone).await?;

        self.repository
            .save_cursor(&report.mailbox, &report.cursor, report.synced_at)
            .await
    }

    /// Persists the current state of one email. Does nothing if it is no
    /// longer stored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Database`] if the write fails.
    pub async fn persist_email(&self, id: &EmailId) -> Result<()> {
        let _order = self.order.lock().await;
        let emails = self.settled(std::slice::from_ref(id));
        self.repository.save_emails(&emails).await
    }

    fn settled(&self, ids: &[EmailId]) -> Vec<Email> {
        self.store
            .get_many(ids)
            .into_iter()
            .map(|email| self.ledger.settled(email))
            .collect()
    }
}
