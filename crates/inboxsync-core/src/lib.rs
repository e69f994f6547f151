//! # inboxsync-core
//!
//! Inbox synchronization and retrieval engine.
//!
//! This crate provides:
//! - Incremental per-mailbox sync with a single in-flight gate
//! - Paginated, threaded and filtered inbox queries
//! - Semantic (vector) search layered on the local store
//! - Optimistic read/star/send mutations with rollback
//! - AI-assisted compose enhancement
//! - **Offline Snapshot** - last synced state and cursors in `SQLite`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod debounce;
pub mod enhance;
mod error;
pub mod inbox;
pub mod model;
pub mod mutation;
pub mod query;
pub mod remote;
pub mod search;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use debounce::{Debouncer, RequestSequencer, Ticket};
pub use enhance::{EnhanceMode, EnhancementPatch, EnhancementService, PatchError};
pub use error::{Error, Result};
pub use inbox::Inbox;
pub use model::{
    Delivery, Draft, Email, EmailId, InboxEntry, InboxPage, MailboxId, PageRequest,
    SearchOutcome, SearchSource, SemanticHit, SyncCursor, ThreadKey,
};
pub use mutation::{Confirmation, IntentLedger, MutationCoordinator, MutationOutcome, PendingSend};
pub use query::InboxQueryEngine;
pub use remote::{
    EmbeddingProvider, Enhancer, HttpEnhancer, HttpMailProvider, MailProvider, OpenAiEmbeddings,
    UpstashVectorIndex, VectorIndex,
};
pub use search::SemanticSearchEngine;
pub use store::{MailStore, SnapshotRepository, SnapshotWriter};
pub use sync::{SyncCoordinator, SyncOutcome, SyncReport, SyncState};
