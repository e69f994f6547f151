//! Domain models shared by every component.

mod changes;
mod draft;
mod email;
mod intent;
mod page;
mod search;

pub use changes::{ChangeSet, EmailDelta, SyncCursor};
pub use draft::{Draft, FlagUpdate, SentReceipt, parse_recipients};
pub use email::{
    DEFAULT_SNIPPET_LENGTH, Delivery, Email, EmailId, MailboxId, PROVISIONAL_PREFIX, Participants,
    ThreadKey, derive_snippet,
};
pub use intent::{IntentId, IntentKind, IntentPayload, IntentStatus, MutationIntent};
pub use page::{DEFAULT_PAGE_SIZE, InboxEntry, InboxPage, PageRequest};
pub use search::{Neighbor, SearchOutcome, SearchSource, SemanticHit};
