//! Core data models.
//!
//! These types flow through the question pipeline: transcript chunks feed the
//! index, [`HistoryTurn`]s round-trip through the chat page, and every answered
//! question becomes a [`LogEntry`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout stored in `logs.created_at`. Sorts lexicographically.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A chunk of transcript text prior to embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A row of the `logs` table.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub username: String,
    pub question: String,
    pub answer: String,
    pub context: Option<String>,
    pub prompt_type: Option<String>,
    pub module: Option<String>,
    pub lesson: Option<String>,
    pub created_at: String,
}

/// Values for a new `logs` row. `created_at` defaults to now (UTC).
#[derive(Debug, Clone, Default)]
pub struct NewLogEntry {
    pub username: String,
    pub question: String,
    pub answer: String,
    pub context: String,
    pub prompt_type: String,
    pub module: Option<String>,
    pub lesson: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

/// One exchange of the conversation, carried by the page between requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryTurn {
    pub question: String,
    /// Rendered HTML.
    pub answer: String,
    #[serde(default)]
    pub quick_replies: Vec<String>,
    #[serde(default)]
    pub chip: Option<String>,
    #[serde(default)]
    pub progress: u8,
}

/// Output of an answer generator.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub markdown: String,
    pub quick_replies: Vec<String>,
    /// Percent through the current topic, `0..=100`.
    pub progress: u8,
}
