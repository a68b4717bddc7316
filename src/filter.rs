//! Content filter applied to retrieved context.
//!
//! Retrieval is best effort: whatever the similarity search returns is
//! screened before it reaches the prompt. Text is rejected when it is empty,
//! a null-like literal, contains a hedging phrase, or mentions an off-topic
//! term. All matching is case-insensitive.

use crate::config::FilterConfig;

/// Outcome of screening a context candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Empty,
    Hedging(String),
    Forbidden(String),
}

#[derive(Debug, Clone)]
pub struct ContextFilter {
    hedging_phrases: Vec<String>,
    forbidden_terms: Vec<String>,
}

impl ContextFilter {
    pub fn new<I, J>(hedging_phrases: I, forbidden_terms: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        let normalize = |s: String| s.trim().to_lowercase();
        Self {
            hedging_phrases: hedging_phrases
                .into_iter()
                .map(normalize)
                .filter(|s| !s.is_empty())
                .collect(),
            forbidden_terms: forbidden_terms
                .into_iter()
                .map(normalize)
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(
            config.hedging_phrases.iter().cloned(),
            config.forbidden_terms.iter().cloned(),
        )
    }

    pub fn check(&self, text: &str) -> Verdict {
        let lower = text.trim().to_lowercase();

        if lower.is_empty() || lower == "none" || lower == "null" {
            return Verdict::Empty;
        }

        if let Some(phrase) = self.hedging_phrases.iter().find(|p| lower.contains(*p)) {
            return Verdict::Hedging(phrase.clone());
        }

        if let Some(term) = self.forbidden_terms.iter().find(|t| lower.contains(*t)) {
            return Verdict::Forbidden(term.clone());
        }

        Verdict::Accepted
    }

    /// Trimmed `text` if accepted, otherwise an empty string.
    pub fn apply(&self, text: &str) -> String {
        match self.check(text) {
            Verdict::Accepted => text.trim().to_string(),
            Verdict::Empty => {
                tracing::debug!("context empty after normalization");
                String::new()
            }
            Verdict::Hedging(phrase) => {
                tracing::debug!(%phrase, "context rejected: hedging phrase");
                String::new()
            }
            Verdict::Forbidden(term) => {
                tracing::debug!(%term, "context rejected: off-topic term");
                String::new()
            }
        }
    }
}
