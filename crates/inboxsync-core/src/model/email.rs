//! Email record types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable, unique identifier of an email.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailId(pub String);

impl EmailId {
    /// Create a new email ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this ID was assigned locally to a provisional record.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }
}

impl std::fmt::Display for EmailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EmailId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Prefix of locally assigned IDs for provisional (unsent) records.
pub const PROVISIONAL_PREFIX: &str = "local-";

/// Identifier of a synchronized mailbox.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MailboxId(pub String);

impl MailboxId {
    /// Create a new mailbox ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MailboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sender and recipients of an email.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Participants {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// CC addresses.
    pub cc: Vec<String>,
    /// BCC addresses.
    pub bcc: Vec<String>,
}

impl Participants {
    /// Iterates over every address, sender first.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.from.as_str())
            .chain(self.to.iter().map(String::as_str))
            .chain(self.cc.iter().map(String::as_str))
            .chain(self.bcc.iter().map(String::as_str))
    }
}

/// Grouping key of an email in threaded view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadKey<'a> {
    /// A conversation shared by every email with this thread ID.
    Thread(&'a str),
    /// An email without a thread, shown on its own.
    Single(&'a EmailId),
}

/// Whether the provider has accepted an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Synchronized from, or confirmed by, the provider.
    #[default]
    Delivered,
    /// Created locally by a send that has not been confirmed yet.
    Pending,
}

/// An email record in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    /// Unique identifier. Never changes once created.
    pub id: EmailId,
    /// Conversation this email belongs to.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Message subject.
    #[serde(default)]
    pub subject: String,
    /// HTML body.
    #[serde(default)]
    pub body_html: String,
    /// Preview text derived from the body.
    #[serde(default)]
    pub snippet: String,
    /// Sender and recipients.
    #[serde(default)]
    pub participants: Participants,
    /// When the message was sent.
    pub sent_at: DateTime<Utc>,
    /// Whether the message has been read.
    #[serde(default)]
    pub is_read: bool,
    /// Whether the message is starred.
    #[serde(default)]
    pub is_starred: bool,
    /// Provider labels.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Delivery state; only local sends are ever pending.
    #[serde(default)]
    pub delivery: Delivery,
}

impl Email {
    /// Creates a new unread, unstarred email with empty content.
    #[must_use]
    pub fn new(id: impl Into<String>, subject: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            id: EmailId::new(id),
            thread_id: None,
            subject: subject.into(),
            body_html: String::new(),
            snippet: String::new(),
            participants: Participants::default(),
            sent_at,
            is_read: false,
            is_starred: false,
            labels: BTreeSet::new(),
            delivery: Delivery::Delivered,
        }
    }

    /// Sets the thread.
    #[must_use]
    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Sets the sender.
    #[must_use]
    pub fn sent_by(mut self, sender: impl Into<String>) -> Self {
        self.participants.from = sender.into();
        self
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.participants.to.push(recipient.into());
        self
    }

    /// Sets the HTML body and derives the snippet from it.
    #[must_use]
    pub fn with_body(mut self, body_html: impl Into<String>) -> Self {
        self.body_html = body_html.into();
        self.snippet = derive_snippet(&self.body_html, DEFAULT_SNIPPET_LENGTH);
        self
    }

    /// Sets the read flag.
    #[must_use]
    pub const fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    /// Sets the starred flag.
    #[must_use]
    pub const fn starred(mut self, is_starred: bool) -> Self {
        self.is_starred = is_starred;
        self
    }

    /// Key that groups this email in threaded view.
    #[must_use]
    pub fn thread_key(&self) -> ThreadKey<'_> {
        self.thread_id
            .as_deref()
            .map_or(ThreadKey::Single(&self.id), ThreadKey::Thread)
    }

    /// Fills in the snippet from the body if the provider left it empty.
    pub fn ensure_snippet(&mut self, max_len: usize) {
        if self.snippet.trim().is_empty() && !self.body_html.is_empty() {
            self.snippet = derive_snippet(&self.body_html, max_len);
        }
    }

    /// Text used to build the semantic embedding of this email.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.subject, self.snippet)
    }
}

/// Snippet length used when none is configured.
pub const DEFAULT_SNIPPET_LENGTH: usize = 100;

/// Derives plain preview text from an HTML body.
#[must_use]
pub fn derive_snippet(body_html: &str, max_len: usize) -> String {
    let text = decode_entities(&strip_tags(body_html));
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_text(&collapsed, max_len)
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Truncate text to a maximum length.
fn truncate_text(text: &str, max_len: usize) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control())
        .take(max_len)
        .collect();

    if text.chars().count() > max_len {
        format!("{cleaned}...")
    } else {
        cleaned
    }
}
