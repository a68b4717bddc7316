//! Log statistics.
//!
//! Prints a quick summary of the interaction log: how many users asked how
//! many questions, activity per day and the most frequent questions. Used by
//! `tutor stats` to check that the server is logging as expected.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::logstore::{LogFilter, LogStore};

const RECENT_DAYS: usize = 7;

/// Run the stats command: query the log database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = LogStore::new(pool.clone());

    let summary = store.summary(&LogFilter::default()).await?;
    let health_plans = store.count_health_plan().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Tutor — Log Stats");
    println!("=================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Users:         {}", summary.distinct_users);
    println!("  Questions:     {}", summary.total_questions);
    println!("  Health plans:  {}", health_plans);

    if !summary.per_day.is_empty() {
        println!();
        println!("  Recent days:");
        for d in summary.per_day.iter().take(RECENT_DAYS) {
            println!("    {}  {:>5}", d.day, d.total);
        }
    }

    if !summary.top_questions.is_empty() {
        println!();
        println!("  Top questions:");
        for (i, q) in summary.top_questions.iter().enumerate() {
            println!("    {}. {} ({})", i + 1, truncate(&q.question, 60), q.total);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
