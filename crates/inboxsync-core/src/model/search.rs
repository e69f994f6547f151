//! Search result types.
//!
//! Lexical and semantic results are kept apart in a sum type: semantic
//! scores have no lexical counterpart and the two sets are never merged.

use serde::Serialize;

use super::{Email, EmailId, InboxPage};

/// Where a search result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    /// Substring filter over the local store.
    Lexical,
    /// Nearest-neighbor lookup in the vector index.
    Semantic,
}

/// A neighbor returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    /// ID the vector was stored under.
    pub id: EmailId,
    /// Similarity; higher is more similar.
    pub score: f32,
}

/// A semantic match re-hydrated from the local store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticHit {
    /// The matching email as currently stored.
    pub email: Email,
    /// Similarity to the query; only comparable with other semantic hits.
    pub score: f32,
}

/// Results shown in place of the inbox list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", content = "results", rename_all = "lowercase")]
pub enum SearchOutcome {
    /// A page of the filtered inbox.
    Lexical(InboxPage),
    /// Ranked semantic matches, bounded by the index's k.
    Semantic(Vec<SemanticHit>),
}

impl SearchOutcome {
    /// Where these results came from.
    #[must_use]
    pub const fn source(&self) -> SearchSource {
        match self {
            Self::Lexical(_) => SearchSource::Lexical,
            Self::Semantic(_) => SearchSource::Semantic,
        }
    }

    /// Whether pagination controls apply. Semantic results are never paged.
    #[must_use]
    pub const fn paginated(&self) -> bool {
        matches!(self, Self::Lexical(_))
    }

    /// Number of results available in total.
    #[must_use]
    pub fn total_count(&self) -> usize {
        match self {
            Self::Lexical(page) => page.total_count,
            Self::Semantic(hits) => hits.len(),
        }
    }

    /// Emails in display order.
    #[must_use]
    pub fn emails(&self) -> Vec<&Email> {
        match self {
            Self::Lexical(page) => page.entries.iter().map(|e| &e.email).collect(),
            Self::Semantic(hits) => hits.iter().map(|h| &h.email).collect(),
        }
    }
}
