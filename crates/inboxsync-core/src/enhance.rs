//! AI-assisted compose enhancement.
//!
//! [`EnhancementService`] is a stateless single-shot transform. Applying the
//! result back to the draft is the caller's job; [`EnhancementPatch`] helps
//! with that by re-validating a captured selection before replacing it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::remote::Enhancer;
use crate::{Error, Result};

/// Kind of rewrite to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhanceMode {
    /// Fix grammar and clarity.
    #[default]
    Improve,
    /// Make it more concise.
    Shorten,
    /// Professional tone.
    Formal,
    /// Warmer, casual tone.
    Friendly,
}

impl EnhanceMode {
    /// All modes, in menu order.
    pub const ALL: [Self; 4] = [Self::Improve, Self::Shorten, Self::Formal, Self::Friendly];

    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Improve => "improve",
            Self::Shorten => "shorten",
            Self::Formal => "formal",
            Self::Friendly => "friendly",
        }
    }

    /// Parse from the wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for EnhanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sends text spans to the AI rewriting collaborator.
#[derive(Debug)]
pub struct EnhancementService<A> {
    enhancer: Arc<A>,
}

impl<A> Clone for EnhancementService<A> {
    fn clone(&self) -> Self {
        Self {
            enhancer: Arc::clone(&self.enhancer),
        }
    }
}

impl<A: Enhancer> EnhancementService<A> {
    /// Creates a service using `enhancer`.
    #[must_use]
    pub const fn new(enhancer: Arc<A>) -> Self {
        Self { enhancer }
    }

    /// Rewrites `text` in the requested `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyInput`] for blank text, without contacting the
    /// collaborator, and [`Error::EnhancementUnavailable`] if it fails.
    pub async fn enhance(&self, text: &str, mode: EnhanceMode) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }

        debug!("Enhancing {} chars ({mode})", text.chars().count());
        self.enhancer.rewrite(text, mode).await.inspect_err(|e| {
            warn!("Enhancement failed: {}", e);
        })
    }
}

/// Why a patch could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// The selected text is no longer at its offsets and cannot be found
    /// unambiguously elsewhere.
    #[error("The selected text changed before the enhancement was applied")]
    SelectionMoved,
}

/// Replacement of a document region captured at selection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancementPatch {
    selection: Option<Selection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    start: usize,
    end: usize,
    original: String,
}

impl EnhancementPatch {
    /// Patch replacing the whole document.
    #[must_use]
    pub const fn whole_document() -> Self {
        Self { selection: None }
    }

    /// Captures the first occurrence of `selected` in `document`.
    ///
    /// Falls back to a whole-document patch if `selected` is blank or absent.
    #[must_use]
    pub fn capture(document: &str, selected: &str) -> Self {
        let selected = selected.trim();
        if selected.is_empty() {
            return Self::whole_document();
        }
        document
            .find(selected)
            .map_or_else(Self::whole_document, |start| Self {
                selection: Some(Selection {
                    start,
                    end: start + selected.len(),
                    original: selected.to_string(),
                }),
            })
    }

    /// Text that should be sent for enhancement.
    #[must_use]
    pub fn source<'a>(&'a self, document: &'a str) -> &'a str {
        self.selection
            .as_ref()
            .map_or(document, |s| s.original.as_str())
    }

    /// Applies `replacement` to the current `document`.
    ///
    /// A captured selection is used at its original byte offsets if the text
    /// there is unchanged; otherwise its unique occurrence is patched.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::SelectionMoved`] if the selected text is gone or
    /// now appears more than once.
    pub fn apply(
        &self,
        document: &str,
        replacement: &str,
    ) -> std::result::Result<String, PatchError> {
        let Some(selection) = &self.selection else {
            return Ok(replacement.to_string());
        };

        let in_place = document.get(selection.start..selection.end);
        let start = if in_place == Some(selection.original.as_str()) {
            selection.start
        } else {
            let mut matches = document.match_indices(&selection.original);
            match (matches.next(), matches.next()) {
                (Some((start, _)), None) => start,
                _ => return Err(PatchError::SelectionMoved),
            }
        };

        let end = start + selection.original.len();
        Ok(format!("{}{replacement}{}", &document[..start], &document[end..]))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::FakeEnhancer;

    #[tokio::test]
    async fn test_empty_input_rejected_before_call() {
        let enhancer = Arc::new(FakeEnhancer::new());
        let service = EnhancementService::new(Arc::clone(&enhancer));

        let result = service.enhance("   \n", EnhanceMode::Improve).await;
        assert!(matches!(result, Err(Error::EmptyInput)));
        assert_eq!(enhancer.calls(), 0);
    }

    #[tokio::test]
    async fn test_enhance_returns_rewrite() {
        let service = EnhancementService::new(Arc::new(FakeEnhancer::new()));
        let text = service.enhance("hi there", EnhanceMode::Formal).await.unwrap();
        assert_eq!(text, "[formal] hi there");
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_recoverable() {
        let enhancer = Arc::new(FakeEnhancer::new());
        enhancer.set_failing(true);
        let service = EnhancementService::new(enhancer);

        let err = service.enhance("hi", EnhanceMode::Shorten).await.unwrap_err();
        assert!(matches!(err, Error::EnhancementUnavailable(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(EnhanceMode::parse("Friendly"), Some(EnhanceMode::Friendly));
        assert_eq!(EnhanceMode::parse("rude"), None);
    }

    #[test]
    fn test_patch_whole_document() {
        let patch = EnhancementPatch::capture("<p>hello</p>", "");
        assert_eq!(patch.source("<p>hello</p>"), "<p>hello</p>");
        assert_eq!(patch.apply("<p>hello</p>", "<p>Hello.</p>").unwrap(), "<p>Hello.</p>");
    }

    #[test]
    fn test_patch_selection_in_place() {
        let doc = "Hi team, see you tmrw. Thanks";
        let patch = EnhancementPatch::capture(doc, "see you tmrw.");
        assert_eq!(patch.source(doc), "see you tmrw.");
        assert_eq!(
            patch.apply(doc, "See you tomorrow.").unwrap(),
            "Hi team, See you tomorrow. Thanks"
        );
    }

    #[test]
    fn test_patch_relocates_moved_selection() {
        let patch = EnhancementPatch::capture("Hi team, see you tmrw.", "see you tmrw.");
        let edited = "Hello everyone and team, see you tmrw.";
        assert_eq!(
            patch.apply(edited, "See you tomorrow.").unwrap(),
            "Hello everyone and team, See you tomorrow."
        );
    }

    #[test]
    fn test_patch_fails_when_selection_gone_or_ambiguous() {
        let patch = EnhancementPatch::capture("Hi team, see you tmrw.", "see you tmrw.");
        assert_eq!(
            patch.apply("Hi team, see you Monday.", "x"),
            Err(PatchError::SelectionMoved)
        );
        assert_eq!(
            patch.apply("see you tmrw. and again see you tmrw.", "x"),
            Err(PatchError::SelectionMoved)
        );
    }
}
