//! The surface the UI layer talks to.
//!
//! [`Inbox`] owns the shared store and intent ledger and wires the sync,
//! query, search, mutation and enhancement components around them. With a
//! snapshot attached, completed syncs and settled mutations are written to
//! it; synced emails are also fed to the vector index.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::debounce::Debouncer;
use crate::enhance::{EnhanceMode, EnhancementService};
use crate::model::{
    Draft, Email, EmailId, InboxPage, MailboxId, PageRequest, SearchOutcome, SyncCursor,
};
use crate::mutation::{
    Confirmation, IntentLedger, MutationCoordinator, MutationOutcome, PendingSend,
};
use crate::query::{self, InboxQueryEngine};
use crate::remote::{EmbeddingProvider, Enhancer, MailProvider, VectorIndex};
use crate::search::SemanticSearchEngine;
use crate::store::{MailStore, SnapshotRepository, SnapshotWriter};
use crate::sync::{SyncCoordinator, SyncOutcome, SyncState};
use crate::{Error, Result};

/// Inbox subsystem facade.
#[derive(Debug)]
pub struct Inbox<P, E, V, A> {
    store: Arc<MailStore>,
    ledger: Arc<IntentLedger>,
    sync: SyncCoordinator<P>,
    queries: InboxQueryEngine,
    semantic: SemanticSearchEngine<E, V>,
    mutations: MutationCoordinator<P>,
    enhancement: EnhancementService<A>,
    search_input: Debouncer,
    snapshot: Option<SnapshotWriter>,
}

impl<P, E, V, A> Inbox<P, E, V, A>
where
    P: MailProvider,
    E: EmbeddingProvider,
    V: VectorIndex,
    A: Enhancer,
{
    /// Wires the components around an empty store.
    #[must_use]
    pub fn new(
        config: &Config,
        provider: Arc<P>,
        embedder: Arc<E>,
        index: Arc<V>,
        enhancer: Arc<A>,
    ) -> Self {
        let store = Arc::new(MailStore::new(config.snippet_length));
        let ledger = Arc::new(IntentLedger::new());

        Self {
            sync: SyncCoordinator::new(
                Arc::clone(&provider),
                Arc::clone(&store),
                Arc::clone(&ledger),
            ),
            queries: InboxQueryEngine::new(Arc::clone(&store)),
            semantic: SemanticSearchEngine::new(embedder, index, Arc::clone(&store))
                .with_top_k(config.semantic_top_k)
                .with_min_similarity(config.min_similarity),
            mutations: MutationCoordinator::new(
                provider,
                Arc::clone(&store),
                Arc::clone(&ledger),
                config.sender_address.clone(),
            ),
            enhancement: EnhancementService::new(enhancer),
            search_input: Debouncer::new(config.quiet_interval()),
            snapshot: None,
            store,
            ledger,
        }
    }

    /// Persists synced state and settled mutations to `snapshot`.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: SnapshotRepository) -> Self {
        let writer =
            SnapshotWriter::new(snapshot, Arc::clone(&self.store), Arc::clone(&self.ledger));
        self.sync = self.sync.with_snapshot(writer.clone());
        self.mutations = self.mutations.with_snapshot(writer.clone());
        self.snapshot = Some(writer);
        self
    }

    /// The shared local store.
    #[must_use]
    pub const fn store(&self) -> &Arc<MailStore> {
        &self.store
    }

    /// The shared intent ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<IntentLedger> {
        &self.ledger
    }

    /// Loads the last snapshot into the store and reopens its mailboxes at
    /// their stored cursors. Returns the number of emails loaded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] if the snapshot cannot be read.
    pub async fn restore(&self) -> Result<usize> {
        let Some(snapshot) = self.snapshot.as_ref().map(SnapshotWriter::repository) else {
            return Ok(0);
        };

        let emails = snapshot.load_emails().await?;
        let count = emails.len();
        for email in emails {
            self.store.upsert(email);
        }
        for stored in snapshot.load_cursors().await? {
            self.sync
                .open_mailbox(&stored.mailbox_id, Some(stored.cursor));
        }
        info!("Restored {} emails from snapshot", count);
        Ok(count)
    }

    /// Starts tracking a mailbox.
    pub fn open_mailbox(&self, mailbox: &MailboxId, cursor: Option<SyncCursor>) {
        self.sync.open_mailbox(mailbox, cursor);
    }

    /// Stops tracking a mailbox.
    pub fn close_mailbox(&self, mailbox: &MailboxId) -> Option<SyncState> {
        self.sync.close_mailbox(mailbox)
    }

    /// Runs a sync for `mailbox`, then indexes what changed.
    ///
    /// Indexing failures are logged; they never turn a completed sync into
    /// a failed one.
    pub async fn trigger_sync(&self, mailbox: &MailboxId) -> SyncOutcome {
        let outcome = self.sync.trigger(mailbox).await;
        if let SyncOutcome::Completed(report) = &outcome {
            let emails = self.store.get_many(&report.upserted);
            let indexed = self.semantic.index_emails(&emails).await;
            debug!("Indexed {}/{} synced emails", indexed, emails.len());
        }
        outcome
    }

    /// Runs [`Self::trigger_sync`] in the background.
    ///
    /// Progress is observable through [`Self::sync_status`].
    pub fn spawn_sync(self: &Arc<Self>, mailbox: MailboxId) -> JoinHandle<SyncOutcome> {
        let inbox = Arc::clone(self);
        tokio::spawn(async move { inbox.trigger_sync(&mailbox).await })
    }

    /// Sync state of a mailbox.
    #[must_use]
    pub fn sync_status(&self, mailbox: &MailboxId) -> Option<SyncState> {
        self.sync.status(mailbox)
    }

    /// One page of the local inbox, immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero page or page size.
    pub fn get_inbox_page(&self, request: &PageRequest) -> Result<InboxPage> {
        self.queries.query(request)
    }

    /// Every stored email of a thread, oldest first.
    #[must_use]
    pub fn thread(&self, thread_id: &str) -> Vec<Email> {
        self.queries.thread(thread_id)
    }

    /// Debounced lexical filtering.
    ///
    /// Returns `Ok(None)` if a newer filter or search was submitted during
    /// the quiet interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for bad paging, before waiting.
    pub async fn filter(&self, request: PageRequest) -> Result<Option<SearchOutcome>> {
        query::validate(&request)?;
        if self.search_input.settle().await.is_none() {
            debug!("Filter {:?} superseded", request.filter);
            return Ok(None);
        }
        self.queries.query(&request).map(|page| Some(SearchOutcome::Lexical(page)))
    }

    /// Debounced semantic search.
    ///
    /// Returns `Ok(None)` if a newer filter or search was submitted during
    /// the quiet interval or while waiting for the collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyQuery`] for a blank query, before waiting, and
    /// collaborator errors for the latest request.
    pub async fn search(&self, query: &str) -> Result<Option<SearchOutcome>> {
        if query.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }
        let Some(ticket) = self.search_input.settle().await else {
            debug!("Search {:?} superseded before it was issued", query);
            return Ok(None);
        };

        let result = self.semantic.search(query).await;
        let Some(result) = self.search_input.sequencer().accept(ticket, result) else {
            debug!("Discarding stale results for {:?}", query);
            return Ok(None);
        };
        result.map(|hits| Some(SearchOutcome::Semantic(hits)))
    }

    /// Marks an email as read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the email is not stored.
    pub fn mark_read(&self, id: &EmailId) -> Result<Confirmation<MutationOutcome>> {
        self.mutations.mark_read(id)
    }

    /// Marks an email as unread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the email is not stored.
    pub fn mark_unread(&self, id: &EmailId) -> Result<Confirmation<MutationOutcome>> {
        self.mutations.mark_unread(id)
    }

    /// Stars or unstars an email.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the email is not stored.
    pub fn toggle_star(
        &self,
        id: &EmailId,
        desired: bool,
    ) -> Result<Confirmation<MutationOutcome>> {
        self.mutations.toggle_star(id, desired)
    }

    /// Sends a draft.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRecipient`] if the draft has no `to` address.
    pub fn send(&self, draft: Draft) -> Result<PendingSend> {
        self.mutations.send(draft)
    }

    /// Rewrites compose text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyInput`] for blank text and
    /// [`Error::EnhancementUnavailable`] if the collaborator fails.
    pub async fn enhance(&self, text: &str, mode: EnhanceMode) -> Result<String> {
        self.enhancement.enhance(text, mode).await
    }
}
