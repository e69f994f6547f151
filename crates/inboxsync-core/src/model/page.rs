//! Paged inbox views.

use serde::{Deserialize, Serialize};

use super::Email;

/// Default number of entries per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Parameters of an inbox page query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// 1-based page number.
    pub page: usize,
    /// Entries per page.
    pub page_size: usize,
    /// Group emails by thread.
    pub thread_view: bool,
    /// Case-insensitive substring filter; empty means no filter.
    #[serde(default)]
    pub filter: String,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            thread_view: true,
            filter: String::new(),
        }
    }
}

impl PageRequest {
    /// Request for a page in flat (unthreaded) view.
    #[must_use]
    pub fn flat(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            thread_view: false,
            filter: String::new(),
        }
    }

    /// Request for a page in threaded view.
    #[must_use]
    pub fn threaded(page: usize, page_size: usize) -> Self {
        Self {
            thread_view: true,
            ..Self::flat(page, page_size)
        }
    }

    /// Sets the text filter.
    #[must_use]
    pub fn filtered(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }
}

/// One row of the inbox list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    /// The email shown; in threaded view, the thread's most recent email.
    pub email: Email,
    /// Emails represented by this row (1 in flat view).
    pub thread_len: usize,
    /// Unread emails represented by this row.
    pub unread_count: usize,
}

/// A page of the inbox.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxPage {
    /// Rows of this page.
    pub entries: Vec<InboxEntry>,
    /// Emails (flat view) or threads (threaded view) across all pages.
    pub total_count: usize,
    /// Number of pages; 0 when nothing matches.
    pub total_pages: usize,
    /// Page number these entries belong to.
    pub page: usize,
}

impl InboxPage {
    /// Emails of this page in display order.
    pub fn emails(&self) -> impl Iterator<Item = &Email> {
        self.entries.iter().map(|e| &e.email)
    }
}
