//! In-memory collaborators for tests.
//!
//! Each fake records the calls it receives and can be told to fail, so the
//! failure paths of the subsystem can be exercised without a network.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::enhance::EnhanceMode;
use crate::model::{
    ChangeSet, Draft, Email, EmailDelta, EmailId, FlagUpdate, MailboxId, Neighbor, SentReceipt,
    SyncCursor,
};
use crate::remote::{EmbeddingProvider, Enhancer, MailProvider, VectorIndex};
use crate::{Error, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a scripted provider call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// [`Error::ProviderUnavailable`].
    Unavailable,
    /// [`Error::InvalidCursor`].
    InvalidCursor,
    /// [`Error::SendRejected`].
    Rejected,
}

impl Failure {
    fn into_error(self) -> Error {
        match self {
            Self::Unavailable => Error::ProviderUnavailable("simulated outage".to_string()),
            Self::InvalidCursor => Error::InvalidCursor("simulated expiry".to_string()),
            Self::Rejected => Error::SendRejected("simulated rejection".to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    version: u64,
    log: Vec<(u64, EmailDelta)>,
    live: BTreeMap<EmailId, Email>,
    fetch_failures: VecDeque<Failure>,
    flag_results: VecDeque<Option<Failure>>,
    send_failures: VecDeque<Failure>,
    flag_updates: Vec<(EmailId, FlagUpdate)>,
    sent: Vec<Draft>,
    next_server_id: u64,
}

/// Mail provider holding a versioned change log.
///
/// Cursors are the log version as a decimal string.
#[derive(Debug)]
pub struct FakeMailProvider {
    state: Mutex<ProviderState>,
    fetch_calls: AtomicUsize,
    gate: watch::Sender<bool>,
    flag_gate: watch::Sender<bool>,
}

impl Default for FakeMailProvider {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        let (flag_gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(ProviderState::default()),
            fetch_calls: AtomicUsize::new(0),
            gate,
            flag_gate,
        }
    }
}

impl FakeMailProvider {
    /// Creates a provider with an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider whose mailbox already holds `emails`.
    #[must_use]
    pub fn with_emails(emails: impl IntoIterator<Item = Email>) -> Self {
        let provider = Self::default();
        for email in emails {
            provider.deliver(email);
        }
        provider
    }

    /// Adds or changes an email on the server.
    pub fn deliver(&self, email: Email) {
        let mut state = lock(&self.state);
        state.version += 1;
        let version = state.version;
        state.live.insert(email.id.clone(), email.clone());
        state.log.push((version, EmailDelta::Upsert(email)));
    }

    /// Removes an email on the server.
    pub fn expunge(&self, id: &EmailId) {
        let mut state = lock(&self.state);
        state.version += 1;
        let version = state.version;
        state.live.remove(id);
        state.log.push((version, EmailDelta::Delete { id: id.clone() }));
    }

    /// Makes the next `fetch_changes` fail.
    pub fn fail_next_fetch(&self, failure: Failure) {
        lock(&self.state).fetch_failures.push_back(failure);
    }

    /// Scripts the outcome of the next `update_flags` call (`None` = success).
    pub fn script_flag_result(&self, result: Option<Failure>) {
        lock(&self.state).flag_results.push_back(result);
    }

    /// Makes the next `send_message` fail.
    pub fn fail_next_send(&self, failure: Failure) {
        lock(&self.state).send_failures.push_back(failure);
    }

    /// Holds every `fetch_changes` call until [`Self::release_fetches`].
    pub fn hold_fetches(&self) {
        self.gate.send_replace(false);
    }

    /// Lets held and future `fetch_changes` calls proceed.
    pub fn release_fetches(&self) {
        self.gate.send_replace(true);
    }

    /// Holds every `update_flags` call until [`Self::release_flag_updates`].
    pub fn hold_flag_updates(&self) {
        self.flag_gate.send_replace(false);
    }

    /// Lets held and future `update_flags` calls proceed.
    pub fn release_flag_updates(&self) {
        self.flag_gate.send_replace(true);
    }

    /// Number of `fetch_changes` calls received.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Flag updates accepted so far.
    #[must_use]
    pub fn flag_updates(&self) -> Vec<(EmailId, FlagUpdate)> {
        lock(&self.state).flag_updates.clone()
    }

    /// Drafts accepted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Draft> {
        lock(&self.state).sent.clone()
    }

    /// Current server-side copy of an email.
    #[must_use]
    pub fn server_email(&self, id: &EmailId) -> Option<Email> {
        lock(&self.state).live.get(id).cloned()
    }
}

impl MailProvider for FakeMailProvider {
    async fn fetch_changes(
        &self,
        _mailbox: &MailboxId,
        cursor: Option<&SyncCursor>,
    ) -> Result<ChangeSet> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let mut open = self.gate.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = open.wait_for(|open| *open).await;

        let mut state = lock(&self.state);
        if let Some(failure) = state.fetch_failures.pop_front() {
            return Err(failure.into_error());
        }

        let deltas = match cursor {
            None => state
                .live
                .values()
                .cloned()
                .map(EmailDelta::Upsert)
                .collect(),
            Some(cursor) => {
                let since: u64 = cursor
                    .as_str()
                    .parse()
                    .map_err(|_| Error::InvalidCursor(cursor.to_string()))?;
                if since > state.version {
                    return Err(Error::InvalidCursor(cursor.to_string()));
                }
                state
                    .log
                    .iter()
                    .filter(|(version, _)| *version > since)
                    .map(|(_, delta)| delta.clone())
                    .collect()
            }
        };

        Ok(ChangeSet {
            deltas,
            new_cursor: SyncCursor::new(state.version.to_string()),
        })
    }

    async fn send_message(&self, draft: &Draft) -> Result<SentReceipt> {
        tokio::task::yield_now().await;
        let mut state = lock(&self.state);
        if let Some(failure) = state.send_failures.pop_front() {
            return Err(failure.into_error());
        }
        state.next_server_id += 1;
        state.sent.push(draft.clone());
        Ok(SentReceipt {
            server_id: EmailId::new(format!("srv-{}", state.next_server_id)),
        })
    }

    async fn update_flags(&self, id: &EmailId, flags: FlagUpdate) -> Result<()> {
        tokio::task::yield_now().await;
        let mut open = self.flag_gate.subscribe();
        let _ = open.wait_for(|open| *open).await;
        let mut state = lock(&self.state);
        if let Some(Some(failure)) = state.flag_results.pop_front() {
            return Err(failure.into_error());
        }
        if let Some(email) = state.live.get_mut(id) {
            if let Some(read) = flags.is_read {
                email.is_read = read;
            }
            if let Some(starred) = flags.is_starred {
                email.is_starred = starred;
            }
        }
        state.flag_updates.push((id.clone(), flags));
        Ok(())
    }
}

/// Embedder producing letter-frequency vectors, with optional fixed vectors.
#[derive(Debug, Default)]
pub struct FakeEmbedder {
    fixed: Mutex<HashMap<String, Vec<f32>>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    /// Creates an embedder with no fixed vectors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `vector` whenever `text` is embedded.
    pub fn fix(&self, text: impl Into<String>, vector: Vec<f32>) {
        lock(&self.fixed).insert(text.into(), vector);
    }

    /// Makes every call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `embed` calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[allow(clippy::cast_precision_loss)]
    fn letter_frequencies(text: &str) -> Vec<f32> {
        let mut counts = vec![0.0_f32; 26];
        for c in text.chars().filter(char::is_ascii_alphabetic) {
            let index = (c.to_ascii_lowercase() as u8 - b'a') as usize;
            counts[index] += 1.0;
        }
        counts
    }
}

impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingUnavailable("simulated outage".to_string()));
        }
        Ok(lock(&self.fixed)
            .get(text)
            .cloned()
            .unwrap_or_else(|| Self::letter_frequencies(text)))
    }
}

/// Cosine similarity of two vectors; 0 when either is all zeros.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Brute-force cosine vector index.
#[derive(Debug, Default)]
pub struct FakeVectorIndex {
    vectors: Mutex<HashMap<EmailId, Vec<f32>>>,
    queries: AtomicUsize,
}

impl FakeVectorIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.vectors).len()
    }

    /// Returns true if no vectors are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.vectors).is_empty()
    }

    /// Number of `query` calls received.
    #[must_use]
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl VectorIndex for FakeVectorIndex {
    async fn upsert(&self, id: &EmailId, vector: Vec<f32>) -> Result<()> {
        lock(&self.vectors).insert(id.clone(), vector);
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut neighbors: Vec<Neighbor> = lock(&self.vectors)
            .iter()
            .map(|(id, stored)| Neighbor {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
            })
            .collect();
        neighbors.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        neighbors.truncate(k);
        Ok(neighbors)
    }
}

/// Enhancer that tags the text with the mode.
#[derive(Debug, Default)]
pub struct FakeEnhancer {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeEnhancer {
    /// Creates a working enhancer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `rewrite` calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Enhancer for FakeEnhancer {
    async fn rewrite(&self, text: &str, mode: EnhanceMode) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::EnhancementUnavailable("simulated outage".to_string()));
        }
        Ok(format!("[{}] {}", mode.as_str(), text.trim()))
    }
}
