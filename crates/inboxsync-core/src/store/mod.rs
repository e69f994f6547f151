//! Local mailbox storage.
//!
//! [`MailStore`] is the in-memory store every component reads and writes.
//! [`SnapshotRepository`] persists it between sessions so a reopened
//! mailbox shows its last synced state while the next sync runs, and
//! [`SnapshotWriter`] orders the writes made to it.

mod memory;
mod repository;
mod writer;

pub use memory::{MailStore, MergeReport, ProtectedFields};
pub use repository::{SnapshotRepository, StoredCursor};
pub use writer::SnapshotWriter;
