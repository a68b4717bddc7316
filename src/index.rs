//! Transcript vector index.
//!
//! The index is built once from the transcript file and persisted to
//! `index.dir/index.sqlite`:
//!
//! ```text
//! transcricoes.txt ──chunk──▶ chunks ──embed──▶ index_chunks (text + f32 BLOB)
//!                                                index_meta  (model, dims, …)
//! ```
//!
//! At startup [`TranscriptIndex::load`] reads every vector into memory. A
//! missing index is a startup error; the server never rebuilds it lazily.
//! Queries embed the question, rank chunks by cosine similarity, join the
//! best `top_k` and pass the result through the [`ContextFilter`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::chunk::chunk_text;
use crate::config::{self, Config};
use crate::db;
use crate::embedding::{self, EmbeddingProvider, OpenAIEmbedder};
use crate::filter::ContextFilter;
use crate::traits::ContextRetriever;

/// A transcript chunk with its embedding, held in memory.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk_index: i64,
    pub text: String,
    pub vector: Vec<f32>,
}

/// Counts reported by [`build_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub chunks: usize,
    pub dims: usize,
}

/// Read-only, explicitly loaded handle over the persisted index.
pub struct TranscriptIndex {
    model: String,
    dims: usize,
    chunks: Vec<IndexedChunk>,
    embedder: Arc<dyn EmbeddingProvider>,
    filter: ContextFilter,
    top_k: usize,
    min_score: f32,
}

/// Build (or rebuild) the index from `config.index.transcript`.
///
/// Any existing index directory is removed first.
pub async fn build_index(config: &Config, embedder: &dyn EmbeddingProvider) -> Result<BuildStats> {
    let transcript = &config.index.transcript;
    let text = std::fs::read_to_string(transcript)
        .with_context(|| format!("Failed to read transcript: {}", transcript.display()))?;

    let chunks = chunk_text(&text, config.chunking.max_tokens);
    if chunks.is_empty() {
        bail!("Transcript is empty: {}", transcript.display());
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed(&texts).await?;
    if vectors.len() != chunks.len() {
        bail!(
            "Embedding provider returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        );
    }

    let dims = vectors.first().map(Vec::len).unwrap_or(0);
    if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
        bail!("Embedding provider returned vectors of inconsistent dimensions");
    }

    let dir = &config.index.dir;
    if dir.exists() {
        tracing::info!(dir = %dir.display(), "removing previous index");
        std::fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove old index: {}", dir.display()))?;
    }
    std::fs::create_dir_all(dir)?;

    let pool = db::connect_path(&config.index.db_path()).await?;
    create_schema(&pool).await?;

    let mut tx = pool.begin().await?;

    let meta = [
        ("model", embedder.model_name().to_string()),
        ("dims", dims.to_string()),
        ("transcript", transcript.display().to_string()),
        ("built_at", chrono::Utc::now().to_rfc3339()),
    ];
    for (key, value) in &meta {
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
            .bind(*key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            "INSERT INTO index_chunks (chunk_index, text, hash, embedding) VALUES (?, ?, ?, ?)",
        )
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(embedding::vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    pool.close().await;

    tracing::info!(chunks = chunks.len(), dims, "transcript index built");

    Ok(BuildStats {
        chunks: chunks.len(),
        dims,
    })
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_chunks (
            chunk_index INTEGER PRIMARY KEY,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

impl TranscriptIndex {
    /// Load the persisted index into memory.
    ///
    /// Fails when the index is missing or was built with a different
    /// embedding model than `embedder`.
    pub async fn load(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let path = config.index.db_path();
        if !path.exists() {
            bail!(
                "Transcript index not found at {}. Run `tutor index build` first.",
                path.display()
            );
        }

        let pool = db::connect_path(&path).await?;

        let model: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'model'")
                .fetch_optional(&pool)
                .await?;
        let model = model.ok_or_else(|| anyhow::anyhow!("Index metadata is missing the model"))?;
        if model != embedder.model_name() {
            bail!(
                "Index was built with '{}' but the configured embedding model is '{}'. Rebuild the index.",
                model,
                embedder.model_name()
            );
        }

        let rows = sqlx::query("SELECT chunk_index, text, embedding FROM index_chunks ORDER BY chunk_index")
            .fetch_all(&pool)
            .await?;
        pool.close().await;

        let chunks: Vec<IndexedChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexedChunk {
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    vector: embedding::blob_to_vec(&blob),
                }
            })
            .collect();

        let dims = chunks.first().map(|c| c.vector.len()).unwrap_or(0);
        tracing::info!(chunks = chunks.len(), dims, %model, "transcript index loaded");

        Ok(Self::from_chunks(config, chunks, embedder))
    }

    /// Assemble an index from already-embedded chunks.
    pub fn from_chunks(
        config: &Config,
        chunks: Vec<IndexedChunk>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let dims = chunks.first().map(|c| c.vector.len()).unwrap_or(0);
        Self {
            model: embedder.model_name().to_string(),
            dims,
            chunks,
            embedder,
            filter: ContextFilter::from_config(&config.filter),
            top_k: config.retrieval.top_k,
            min_score: config.retrieval.min_score,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Best `top_k` chunks scoring at least `min_score`, highest first.
    pub fn rank(&self, query: &[f32]) -> Vec<(f32, &IndexedChunk)> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .map(|c| (embedding::cosine_similarity(query, &c.vector), c))
            .filter(|(score, _)| *score >= self.min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.chunk_index.cmp(&b.1.chunk_index))
        });
        scored.truncate(self.top_k);
        scored
    }

    /// Unfiltered context: the ranked chunks joined by blank lines.
    pub async fn raw_context(&self, question: &str) -> Result<String> {
        if self.chunks.is_empty() || question.trim().is_empty() {
            return Ok(String::new());
        }

        let query = self.embedder.embed_query(question).await?;
        let ranked = self.rank(&query);
        tracing::debug!(
            hits = ranked.len(),
            best = ranked.first().map(|(s, _)| *s),
            "ranked transcript chunks"
        );

        Ok(ranked
            .iter()
            .map(|(_, c)| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[async_trait]
impl ContextRetriever for TranscriptIndex {
    async fn retrieve(&self, question: &str) -> Result<String> {
        let raw = self.raw_context(question).await?;
        Ok(self.filter.apply(&raw))
    }
}

/// `tutor index build`
pub async fn run_index_build(config: &Config) -> Result<()> {
    let embedder = OpenAIEmbedder::new(&config.embedding, config::openai_api_key()?)?;
    let stats = build_index(config, &embedder).await?;

    println!("Index built at {}", config.index.db_path().display());
    println!("  chunks: {}", stats.chunks);
    println!("  dims: {}", stats.dims);
    Ok(())
}

/// `tutor index query "<question>"`: print raw and filtered context.
pub async fn run_index_query(config: &Config, question: &str) -> Result<()> {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAIEmbedder::new(
        &config.embedding,
        config::openai_api_key()?,
    )?);
    let index = TranscriptIndex::load(config, embedder).await?;

    println!(
        "Index: {} chunks, {} dims ({})",
        index.len(),
        index.dims(),
        index.model()
    );
    if index.is_empty() {
        println!("Index is empty; rebuild it with `tutor index build`.");
    }

    let raw = index.raw_context(question).await?;
    println!("Question: {}", question);
    println!("Verdict: {:?}", index.filter.check(&raw));
    if raw.is_empty() {
        println!("No context found.");
    } else {
        for (i, part) in raw.split("\n\n").enumerate() {
            println!("  [{}] {}", i + 1, part);
        }
    }
    Ok(())
}
