//! Semantic (vector) search over the local store.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::model::{Email, SemanticHit};
use crate::remote::{EmbeddingProvider, VectorIndex};
use crate::store::MailStore;
use crate::{Error, Result};

/// Default number of neighbors requested from the index.
pub const DEFAULT_TOP_K: usize = 10;

/// Default minimum similarity; hits scoring exactly this are kept.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.35;

/// Ranked lookup: embed the query, ask the index for neighbors, keep the
/// ones that are similar enough and still stored locally.
#[derive(Debug)]
pub struct SemanticSearchEngine<E, V> {
    embedder: Arc<E>,
    index: Arc<V>,
    store: Arc<MailStore>,
    top_k: usize,
    min_similarity: f32,
}

impl<E, V> Clone for SemanticSearchEngine<E, V> {
    fn clone(&self) -> Self {
        Self {
            embedder: Arc::clone(&self.embedder),
            index: Arc::clone(&self.index),
            store: Arc::clone(&self.store),
            top_k: self.top_k,
            min_similarity: self.min_similarity,
        }
    }
}

impl<E: EmbeddingProvider, V: VectorIndex> SemanticSearchEngine<E, V> {
    /// Creates an engine with the default `k` and threshold.
    #[must_use]
    pub const fn new(embedder: Arc<E>, index: Arc<V>, store: Arc<MailStore>) -> Self {
        Self {
            embedder,
            index,
            store,
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    /// Sets the number of neighbors to request.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Sets the minimum similarity (inclusive).
    #[must_use]
    pub const fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Returns stored emails similar to `query`, best first.
    ///
    /// At most `top_k` hits are returned and the result is never paginated.
    /// Neighbors the local store does not know are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyQuery`] for a blank query, before any call is
    /// made, and the collaborator's error if embedding or lookup fails.
    pub async fn search(&self, query: &str) -> Result<Vec<SemanticHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }

        let vector = self.embedder.embed(query).await?;
        let neighbors = self.index.query(&vector, self.top_k).await?;
        debug!("Index returned {} neighbors for {:?}", neighbors.len(), query);

        let mut hits: Vec<SemanticHit> = neighbors
            .into_iter()
            .filter(|n| n.score >= self.min_similarity)
            .filter_map(|n| {
                let email = self.store.get(&n.id);
                if email.is_none() {
                    debug!("Dropping {} from results: not stored locally", n.id);
                }
                email.map(|email| SemanticHit {
                    email,
                    score: n.score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.email.id.cmp(&b.email.id))
        });
        hits.dedup_by(|a, b| a.email.id == b.email.id);
        Ok(hits)
    }

    /// Embeds and upserts emails into the index.
    ///
    /// Provisional emails are skipped. A failure for one email is logged
    /// and does not stop the others. Returns how many were indexed.
    pub async fn index_emails(&self, emails: &[Email]) -> usize {
        let mut indexed = 0;
        for email in emails.iter().filter(|e| !e.id.is_provisional()) {
            let result = async {
                let vector = self.embedder.embed(&email.embedding_text()).await?;
                self.index.upsert(&email.id, vector).await
            }
            .await;

            match result {
                Ok(()) => indexed += 1,
                Err(e) => warn!("Failed to index {}: {}", email.id, e),
            }
        }
        indexed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::EmailId;
    use crate::testing::{FakeEmbedder, FakeVectorIndex, cosine_similarity};

    struct Fixture {
        embedder: Arc<FakeEmbedder>,
        index: Arc<FakeVectorIndex>,
        store: Arc<MailStore>,
        engine: SemanticSearchEngine<FakeEmbedder, FakeVectorIndex>,
    }

    fn fixture() -> Fixture {
        let embedder = Arc::new(FakeEmbedder::new());
        let index = Arc::new(FakeVectorIndex::new());
        let store = Arc::new(MailStore::default());
        let engine = SemanticSearchEngine::new(
            Arc::clone(&embedder),
            Arc::clone(&index),
            Arc::clone(&store),
        );
        Fixture {
            embedder,
            index,
            store,
            engine,
        }
    }

    fn email(id: &str) -> Email {
        Email::new(id, format!("Subject {id}"), Utc::now())
    }

    async fn index_with_vector(f: &Fixture, id: &str, vector: Vec<f32>) {
        f.index.upsert(&EmailId::from(id), vector).await.unwrap();
    }

    #[tokio::test]
    async fn test_blank_query_rejected_before_any_call() {
        let f = fixture();
        assert!(matches!(f.engine.search("  \t").await, Err(Error::EmptyQuery)));
        assert_eq!(f.embedder.calls(), 0);
        assert_eq!(f.index.queries(), 0);
    }

    #[tokio::test]
    async fn test_results_ranked_and_thresholded() {
        let f = fixture();
        f.embedder.fix("invoice", vec![1.0, 0.0]);
        for id in ["close", "far", "mid"] {
            f.store.upsert(email(id));
        }
        index_with_vector(&f, "close", vec![1.0, 0.0]).await;
        index_with_vector(&f, "mid", vec![0.6, 0.8]).await;
        index_with_vector(&f, "far", vec![0.0, 1.0]).await;

        let hits = f.engine.search("invoice").await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.email.id.as_str()).collect();
        assert_eq!(ids, vec!["close", "mid"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let f = fixture();
        let edge = vec![0.35, 0.9];
        let score = cosine_similarity(&[1.0, 0.0], &edge);
        let engine = f.engine.clone().with_min_similarity(score);
        f.embedder.fix("q", vec![1.0, 0.0]);
        f.store.upsert(email("edge"));
        f.store.upsert(email("below"));
        index_with_vector(&f, "edge", edge).await;
        index_with_vector(&f, "below", vec![0.3, 0.9]).await;

        let hits = engine.search("q").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].email.id.as_str(), "edge");
    }

    #[tokio::test]
    async fn test_ghost_ids_are_dropped() {
        let f = fixture();
        f.embedder.fix("q", vec![1.0, 0.0]);
        f.store.upsert(email("known"));
        index_with_vector(&f, "known", vec![0.9, 0.1]).await;
        index_with_vector(&f, "ghost", vec![1.0, 0.0]).await;

        let hits = f.engine.search("q").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].email.id.as_str(), "known");
    }

    #[tokio::test]
    async fn test_top_k_bounds_results() {
        let f = fixture();
        let engine = f.engine.clone().with_top_k(2).with_min_similarity(-1.0);
        f.embedder.fix("q", vec![1.0, 0.0]);
        for id in ["a", "b", "c"] {
            f.store.upsert(email(id));
            index_with_vector(&f, id, vec![1.0, 0.0]).await;
        }
        assert_eq!(engine.search("q").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_surfaces() {
        let f = fixture();
        f.embedder.set_failing(true);
        let err = f.engine.search("hello").await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
        assert_eq!(f.index.queries(), 0);
    }

    #[tokio::test]
    async fn test_index_emails_skips_provisional_and_counts() {
        let f = fixture();
        let indexed = f
            .engine
            .index_emails(&[email("a"), email("b"), email("local-123")])
            .await;
        assert_eq!(indexed, 2);
        assert_eq!(f.index.len(), 2);

        f.embedder.set_failing(true);
        assert_eq!(f.engine.index_emails(&[email("c")]).await, 0);
        assert_eq!(f.index.len(), 2);
    }
}
