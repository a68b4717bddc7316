//! Seams between the web layer and the external services it sequences.
//!
//! ```text
//!   POST /ask ──▶ ContextRetriever ──▶ AnswerGenerator ──▶ LogStore
//!                 (TranscriptIndex)    (OpenAiGenerator)
//! ```
//!
//! The server only sees these traits, so the hosted index and model can be
//! swapped for in-process implementations (tests use fixed responses).

use anyhow::Result;
use async_trait::async_trait;

use crate::classify::PromptType;
use crate::models::{GeneratedAnswer, HistoryTurn};

/// Source of course context for a question.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Best-effort context snippet, or an empty string when nothing usable
    /// was found.
    async fn retrieve(&self, question: &str) -> Result<String>;
}

/// Everything the generator needs to answer one question.
#[derive(Debug, Clone)]
pub struct AnswerRequest<'a> {
    pub question: &'a str,
    pub context: &'a str,
    pub history: &'a [HistoryTurn],
    pub prompt_type: PromptType,
    pub is_first_question: bool,
}

/// Produces the tutor's reply.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, request: AnswerRequest<'_>) -> Result<GeneratedAnswer>;
}
