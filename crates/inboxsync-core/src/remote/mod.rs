//! Contracts of the external collaborators, and HTTP clients for them.
//!
//! The subsystem only consumes these contracts. The HTTP clients are thin
//! adapters; [`crate::testing`] provides in-memory implementations.

mod embedding;
mod gateway;
mod upstash;

use std::future::Future;

pub use embedding::OpenAiEmbeddings;
pub use gateway::{HttpEnhancer, HttpMailProvider};
pub use upstash::UpstashVectorIndex;

use crate::Result;
use crate::enhance::EnhanceMode;
use crate::model::{ChangeSet, Draft, EmailId, FlagUpdate, MailboxId, Neighbor, SentReceipt, SyncCursor};

/// Source of mailbox changes and sink for outgoing mail.
pub trait MailProvider: Send + Sync + 'static {
    /// Changes since `cursor`, or the whole mailbox when `cursor` is `None`.
    ///
    /// Fails with [`crate::Error::ProviderUnavailable`] or
    /// [`crate::Error::InvalidCursor`].
    fn fetch_changes(
        &self,
        mailbox: &MailboxId,
        cursor: Option<&SyncCursor>,
    ) -> impl Future<Output = Result<ChangeSet>> + Send;

    /// Sends a message. Fails with [`crate::Error::SendRejected`].
    fn send_message(&self, draft: &Draft) -> impl Future<Output = Result<SentReceipt>> + Send;

    /// Changes flags of a remote email.
    fn update_flags(
        &self,
        id: &EmailId,
        flags: FlagUpdate,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Turns text into an embedding vector.
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Fails with [`crate::Error::EmbeddingUnavailable`].
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;
}

/// Vector store keyed by email ID.
pub trait VectorIndex: Send + Sync + 'static {
    /// Stores or replaces the vector for an email.
    fn upsert(&self, id: &EmailId, vector: Vec<f32>) -> impl Future<Output = Result<()>> + Send;

    /// The `k` nearest neighbors of `vector`, most similar first.
    fn query(&self, vector: &[f32], k: usize) -> impl Future<Output = Result<Vec<Neighbor>>> + Send;
}

/// AI rewriting collaborator.
pub trait Enhancer: Send + Sync + 'static {
    /// Fails with [`crate::Error::EnhancementUnavailable`].
    fn rewrite(&self, text: &str, mode: EnhanceMode) -> impl Future<Output = Result<String>> + Send;
}
