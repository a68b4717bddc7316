//! Interaction log: append-only writes plus the reads behind the dashboard.
//!
//! Every answered question becomes one `logs` row; health-plan questions also
//! get a `health_plan_logs` row. Rows are never updated or deleted.
//!
//! Dashboard filters are conjunctive. Empty values are ignored, so a form
//! submitted with blank fields behaves like no filter at all.

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::io::Write;
use thiserror::Error;

use crate::models::{LogEntry, NewLogEntry, TIMESTAMP_FORMAT};

/// Column order of the `logs` table, also the CSV header.
pub const LOG_COLUMNS: [&str; 9] = [
    "id",
    "username",
    "question",
    "answer",
    "context",
    "prompt_type",
    "module",
    "lesson",
    "created_at",
];

const TOP_QUESTIONS: i64 = 5;

/// Query-string filters accepted by `/dashboard` and `/dashboard/export`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogFilter {
    #[serde(default)]
    pub usuario: Option<String>,
    #[serde(default)]
    pub modulo: Option<String>,
    #[serde(default)]
    pub palavra: Option<String>,
    #[serde(default)]
    pub data_inicio: Option<String>,
    #[serde(default)]
    pub data_fim: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid date '{value}' for {field}, expected YYYY-MM-DD")]
pub struct InvalidDate {
    pub field: &'static str,
    pub value: String,
}

/// Timestamp bounds derived from the date filters: `start <= created_at < end`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DateBounds {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl LogFilter {
    pub fn usuario(&self) -> Option<&str> {
        non_empty(&self.usuario)
    }

    pub fn modulo(&self) -> Option<&str> {
        non_empty(&self.modulo)
    }

    pub fn palavra(&self) -> Option<&str> {
        non_empty(&self.palavra)
    }

    /// Parse the date filters. The end date is inclusive of the whole day.
    pub fn date_bounds(&self) -> Result<DateBounds, InvalidDate> {
        let start = match non_empty(&self.data_inicio) {
            Some(v) => Some(parse_date("data_inicio", v)?),
            None => None,
        };
        let end = match non_empty(&self.data_fim) {
            Some(v) => Some(parse_date("data_fim", v)? + Duration::days(1)),
            None => None,
        };
        let fmt = |d: NaiveDate| d.format("%Y-%m-%d").to_string();
        Ok(DateBounds {
            start: start.map(fmt),
            end: end.map(fmt),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.usuario().is_none()
            && self.modulo().is_none()
            && self.palavra().is_none()
            && non_empty(&self.data_inicio).is_none()
            && non_empty(&self.data_fim).is_none()
    }

    /// Append ` WHERE ...` for the active filters.
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) -> Result<(), InvalidDate> {
        let bounds = self.date_bounds()?;
        qb.push(" WHERE 1 = 1");

        if let Some(user) = self.usuario() {
            qb.push(" AND username LIKE ")
                .push_bind(like_pattern(user))
                .push(" ESCAPE '\\'");
        }
        if let Some(module) = self.modulo() {
            qb.push(" AND module = ").push_bind(module.to_string());
        }
        if let Some(word) = self.palavra() {
            let pattern = like_pattern(word);
            qb.push(" AND (question LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR answer LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if let Some(start) = bounds.start {
            qb.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = bounds.end {
            qb.push(" AND created_at < ").push_bind(end);
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, InvalidDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| InvalidDate {
        field,
        value: value.to_string(),
    })
}

/// `%value%` with LIKE wildcards in `value` escaped.
fn like_pattern(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DayCount {
    pub day: String,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuestionCount {
    pub question: String,
    pub total: i64,
}

/// Aggregates shown above the dashboard table.
#[derive(Debug, Clone, Serialize, Default)]
pub struct LogSummary {
    pub distinct_users: i64,
    pub total_questions: i64,
    /// Newest day first.
    pub per_day: Vec<DayCount>,
    pub top_questions: Vec<QuestionCount>,
}

#[derive(Clone)]
pub struct LogStore {
    pool: SqlitePool,
}

impl LogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one row and return its id.
    pub async fn append(&self, entry: &NewLogEntry) -> Result<i64> {
        let created_at = entry
            .created_at
            .unwrap_or_else(|| Utc::now().naive_utc())
            .format(TIMESTAMP_FORMAT)
            .to_string();

        let result = sqlx::query(
            r#"
            INSERT INTO logs (username, question, answer, context, prompt_type, module, lesson, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.username)
        .bind(&entry.question)
        .bind(&entry.answer)
        .bind(&entry.context)
        .bind(&entry.prompt_type)
        .bind(&entry.module)
        .bind(&entry.lesson)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn record_health_plan(&self, username: &str, question: &str) -> Result<()> {
        let created_at = Utc::now().naive_utc().format(TIMESTAMP_FORMAT).to_string();
        sqlx::query("INSERT INTO health_plan_logs (username, question, created_at) VALUES (?, ?, ?)")
            .bind(username)
            .bind(question)
            .bind(&created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn count_health_plan(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM health_plan_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Every row, newest id first.
    pub async fn all(&self) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM logs ORDER BY id DESC",
            LOG_COLUMNS.join(", ")
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entry).collect())
    }

    /// Rows matching every active filter, newest first.
    pub async fn filtered(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM logs", LOG_COLUMNS.join(", ")));
        filter.push_where(&mut qb)?;
        qb.push(" ORDER BY created_at DESC, id DESC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_entry).collect())
    }

    /// Aggregates over the rows matching `filter`.
    pub async fn summary(&self, filter: &LogFilter) -> Result<LogSummary> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(DISTINCT username) AS users, COUNT(*) AS total FROM logs",
        );
        filter.push_where(&mut qb)?;
        let totals = qb.build().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT substr(created_at, 1, 10) AS day, COUNT(*) AS total FROM logs",
        );
        filter.push_where(&mut qb)?;
        qb.push(" GROUP BY day ORDER BY day DESC");
        let per_day = qb
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| DayCount {
                day: row.get("day"),
                total: row.get("total"),
            })
            .collect();

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT question, COUNT(*) AS total FROM logs");
        filter.push_where(&mut qb)?;
        qb.push(" GROUP BY question ORDER BY total DESC, question ASC LIMIT ")
            .push_bind(TOP_QUESTIONS);
        let top_questions = qb
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| QuestionCount {
                question: row.get("question"),
                total: row.get("total"),
            })
            .collect();

        Ok(LogSummary {
            distinct_users: totals.get("users"),
            total_questions: totals.get("total"),
            per_day,
            top_questions,
        })
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> LogEntry {
    LogEntry {
        id: row.get("id"),
        username: row.get("username"),
        question: row.get("question"),
        answer: row.get("answer"),
        context: row.get("context"),
        prompt_type: row.get("prompt_type"),
        module: row.get("module"),
        lesson: row.get("lesson"),
        created_at: row.get("created_at"),
    }
}

/// Write `rows` as CSV with a [`LOG_COLUMNS`] header. Nulls become empty fields.
pub fn write_csv<W: Write>(rows: &[LogEntry], writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(LOG_COLUMNS)?;
    for row in rows {
        let id = row.id.to_string();
        out.write_record([
            id.as_str(),
            row.username.as_str(),
            row.question.as_str(),
            row.answer.as_str(),
            row.context.as_deref().unwrap_or(""),
            row.prompt_type.as_deref().unwrap_or(""),
            row.module.as_deref().unwrap_or(""),
            row.lesson.as_deref().unwrap_or(""),
            row.created_at.as_str(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

pub fn to_csv(rows: &[LogEntry]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_csv(rows, &mut buf)?;
    Ok(buf)
}
