//! Request coalescing and staleness checks for search input.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic request number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// Hands out tickets and tells whether a ticket is still the newest.
#[derive(Debug, Default, Clone)]
pub struct RequestSequencer {
    latest: Arc<AtomicU64>,
}

impl RequestSequencer {
    /// Creates a sequencer with no requests issued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a ticket newer than every previous one.
    pub fn issue(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Returns true if no newer ticket was issued after `ticket`.
    #[must_use]
    pub fn is_latest(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }

    /// Returns `value` only if `ticket` is still the latest.
    pub fn accept<T>(&self, ticket: Ticket, value: T) -> Option<T> {
        self.is_latest(ticket).then_some(value)
    }
}

/// Lets a submission through only after a quiet interval without newer ones.
#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet: Duration,
    sequencer: RequestSequencer,
}

impl Debouncer {
    /// Creates a debouncer waiting `quiet` after each submission.
    #[must_use]
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            sequencer: RequestSequencer::new(),
        }
    }

    /// The quiet interval.
    #[must_use]
    pub const fn quiet(&self) -> Duration {
        self.quiet
    }

    /// The sequencer backing this debouncer.
    ///
    /// Use it to check staleness again after awaiting collaborators.
    #[must_use]
    pub const fn sequencer(&self) -> &RequestSequencer {
        &self.sequencer
    }

    /// Waits out the quiet interval and returns the ticket if `self` saw no
    /// newer submission in the meantime.
    pub async fn settle(&self) -> Option<Ticket> {
        let ticket = self.sequencer.issue();
        if !self.quiet.is_zero() {
            tokio::time::sleep(self.quiet).await;
        }
        self.sequencer.is_latest(ticket).then_some(ticket)
    }

    /// Waits out the quiet interval, returning `value` if it was not superseded.
    pub async fn debounce<T>(&self, value: T) -> Option<T> {
        self.settle().await.map(|_| value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sequencer_staleness() {
        let seq = RequestSequencer::new();
        let a = seq.issue();
        assert!(seq.is_latest(a));
        let b = seq.issue();
        assert!(b > a);
        assert!(!seq.is_latest(a));
        assert_eq!(seq.accept(a, "old"), None);
        assert_eq!(seq.accept(b, "new"), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_last_submission_passes() {
        let debouncer = Debouncer::new(Duration::from_millis(300));

        let results = futures::future::join_all(["a", "ab", "abc"].map(|q| {
            let debouncer = debouncer.clone();
            async move { debouncer.debounce(q).await }
        }))
        .await;

        assert_eq!(results, vec![None, None, Some("abc")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_submissions_all_pass() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        assert_eq!(debouncer.debounce("a").await, Some("a"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(debouncer.debounce("ab").await, Some("ab"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_submission_within_interval_supersedes() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        let first = tokio::spawn({
            let debouncer = debouncer.clone();
            async move { debouncer.debounce("a").await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = debouncer.debounce("ab").await;

        assert_eq!(first.await.unwrap(), None);
        assert_eq!(second, Some("ab"));
    }

    #[tokio::test]
    async fn test_zero_interval_passes_immediately() {
        let debouncer = Debouncer::new(Duration::ZERO);
        assert_eq!(debouncer.debounce(1).await, Some(1));
    }
}
