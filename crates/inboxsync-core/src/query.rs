//! Paginated, threaded and filtered views of the local store.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::model::{Email, InboxEntry, InboxPage, PageRequest, ThreadKey};
use crate::store::MailStore;
use crate::{Error, Result};

/// Inbox order: newest first, ID ascending on ties.
fn newest_first(a: &Email, b: &Email) -> Ordering {
    b.sent_at.cmp(&a.sent_at).then_with(|| a.id.cmp(&b.id))
}

/// Thread order: oldest first, ID ascending on ties.
fn oldest_first(a: &Email, b: &Email) -> Ordering {
    a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id))
}

/// Case-insensitive substring match over subject, snippet and addresses.
fn matches_filter(email: &Email, needle: &str) -> bool {
    email.subject.to_lowercase().contains(needle)
        || email.snippet.to_lowercase().contains(needle)
        || email
            .participants
            .addresses()
            .any(|address| address.to_lowercase().contains(needle))
}

/// Checks the paging arguments of a request.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `page` or `page_size` is zero.
pub fn validate(request: &PageRequest) -> Result<()> {
    if request.page == 0 {
        return Err(Error::InvalidArgument("page must be at least 1".to_string()));
    }
    if request.page_size == 0 {
        return Err(Error::InvalidArgument(
            "page size must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

#[derive(Default)]
struct ThreadStats {
    len: usize,
    unread: usize,
}

/// Read-only queries over the [`MailStore`].
#[derive(Debug, Clone)]
pub struct InboxQueryEngine {
    store: Arc<MailStore>,
}

impl InboxQueryEngine {
    /// Creates an engine reading `store`.
    #[must_use]
    pub const fn new(store: Arc<MailStore>) -> Self {
        Self { store }
    }

    /// Returns one page of the inbox as it is stored right now.
    ///
    /// In thread view each thread appears once, represented by its most
    /// recent matching email, and `total_count` counts threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `page` or `page_size` is zero.
    pub fn query(&self, request: &PageRequest) -> Result<InboxPage> {
        validate(request)?;

        let all = self.store.snapshot();
        let needle = request.filter.trim().to_lowercase();
        let mut matching: Vec<&Email> = all
            .iter()
            .filter(|email| needle.is_empty() || matches_filter(email, &needle))
            .collect();
        matching.sort_by(|a, b| newest_first(a, b));

        let entries: Vec<InboxEntry> = if request.thread_view {
            let mut stats: HashMap<ThreadKey<'_>, ThreadStats> = HashMap::new();
            for email in &all {
                let entry = stats.entry(email.thread_key()).or_default();
                entry.len += 1;
                if !email.is_read {
                    entry.unread += 1;
                }
            }

            let mut seen = HashSet::new();
            matching
                .into_iter()
                .filter(|email| seen.insert(email.thread_key()))
                .map(|email| {
                    let thread = stats.get(&email.thread_key());
                    InboxEntry {
                        email: email.clone(),
                        thread_len: thread.map_or(1, |s| s.len),
                        unread_count: thread.map_or(0, |s| s.unread),
                    }
                })
                .collect()
        } else {
            matching
                .into_iter()
                .map(|email| InboxEntry {
                    email: email.clone(),
                    thread_len: 1,
                    unread_count: usize::from(!email.is_read),
                })
                .collect()
        };

        let total_count = entries.len();
        let offset = (request.page - 1).saturating_mul(request.page_size);
        Ok(InboxPage {
            entries: entries
                .into_iter()
                .skip(offset)
                .take(request.page_size)
                .collect(),
            total_count,
            total_pages: total_count.div_ceil(request.page_size),
            page: request.page,
        })
    }

    /// Every stored email of a thread, oldest first.
    #[must_use]
    pub fn thread(&self, thread_id: &str) -> Vec<Email> {
        let mut emails: Vec<Email> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|email| email.thread_key() == ThreadKey::Thread(thread_id))
            .collect();
        emails.sort_by(oldest_first);
        emails
    }
}
