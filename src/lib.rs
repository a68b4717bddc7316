//! # Tutor Chat
//!
//! A web tutoring assistant for an online course. Students log in, ask
//! questions in natural language and get answers grounded in the course's
//! lecture transcripts; every exchange is logged for the instructor's
//! dashboard.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Transcript │──▶│ Chunk+Embed │──▶│ index.sqlite │
//! └────────────┘   └─────────────┘   └──────┬───────┘
//!                                           │ load
//!   POST /ask ─▶ classify ─▶ retrieve ◀─────┘
//!                               │
//!                               ▼
//!                           generate ─▶ markdown ─▶ logs.sqlite
//!                                                      │
//!                                         /dashboard ◀─┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Transcript chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Transcript index build, load and query |
//! | [`filter`] | Context screening |
//! | [`classify`] | Prompt classifier |
//! | [`generate`] | Chat-completion answer generator |
//! | [`markdown`] | Answer rendering |
//! | [`auth`] | Password and session tokens |
//! | [`logstore`] | Interaction log, filters and CSV export |
//! | [`templates`] | HTML pages |
//! | [`server`] | Web routes |
//! | [`stats`] | Log summary command |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`traits`] | Retrieval and generation seams |

pub mod auth;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod db;
pub mod embedding;
pub mod filter;
pub mod generate;
pub mod index;
pub mod logstore;
pub mod markdown;
pub mod migrate;
pub mod models;
pub mod server;
pub mod stats;
pub mod templates;
pub mod traits;
