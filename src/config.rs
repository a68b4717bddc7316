//! TOML configuration.
//!
//! Every subsystem reads its settings from one [`Config`] loaded at startup
//! with [`load_config`]. Optional sections fall back to the defaults below;
//! `[db]`, `[index]`, `[auth]` and `[server]` are required.
//!
//! ```toml
//! [db]
//! path = "./data/logs.sqlite"
//!
//! [index]
//! dir = "./storage"
//! transcript = "./transcricoes.txt"
//!
//! [auth]
//! username = "aluno1"
//! password_hash = "$argon2id$v=19$..."
//! admin_users = ["aluno1"]
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding `index.sqlite`. Removed and recreated on every build.
    pub dir: PathBuf,
    /// Plain-text transcript the index is built from.
    pub transcript: PathBuf,
}

impl IndexConfig {
    pub fn db_path(&self) -> PathBuf {
        self.dir.join("index.sqlite")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Chunks scoring below this cosine similarity are never used as context.
    #[serde(default)]
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    #[serde(default = "default_hedging_phrases")]
    pub hedging_phrases: Vec<String>,
    #[serde(default = "default_forbidden_terms")]
    pub forbidden_terms: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            hedging_phrases: default_hedging_phrases(),
            forbidden_terms: default_forbidden_terms(),
        }
    }
}

fn default_hedging_phrases() -> Vec<String> {
    [
        "não tenho certeza",
        "desculpe",
        "não sei",
        "not sure",
        "sorry",
        "don't know",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_forbidden_terms() -> Vec<String> {
    [
        "instagram",
        "vídeos para instagram",
        "celular para gravar",
        "smartphone",
        "tiktok",
        "post viral",
        "gravar vídeos",
        "microfone",
        "câmera",
        "edição de vídeo",
        "hashtags",
        "stories",
        "marketing de conteúdo",
        "produção de vídeo",
        "influencer",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            base_url: default_api_base(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Number of prior turns replayed to the model.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
    /// Overrides the built-in tutor persona.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            base_url: default_api_base(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_llm_timeout_secs(),
            max_history_turns: default_max_history_turns(),
            system_prompt: None,
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_max_history_turns() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub username: String,
    /// Argon2 PHC string, see `tutor hash-password`.
    pub password_hash: String,
    /// Token signing key. `TUTOR_SECRET_KEY` takes precedence.
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
    /// Users allowed on `/dashboard`.
    #[serde(default)]
    pub admin_users: Vec<String>,
    /// Adds the `Secure` attribute to the session cookie.
    #[serde(default)]
    pub cookie_secure: bool,
}

fn default_token_ttl_minutes() -> i64 {
    60
}

/// One year. Keeps `now + ttl` far from `i64` overflow.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 525_600;

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Quick-reply labels. A question equal to one of these is a chip click.
    #[serde(default = "default_chips")]
    pub chips: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            chips: default_chips(),
        }
    }
}

fn default_chips() -> Vec<String> {
    [
        "Ver Exemplo de Plano",
        "Modelo no Canva",
        "Modelo PDF",
        "Novo Tema",
        "Preciso de exemplo",
        "Exemplo para Acne",
        "Tratamento Oral",
        "Cuidados Diários",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_score) {
            bail!("retrieval.min_score must be in [-1.0, 1.0]");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }
        if self.auth.username.trim().is_empty() {
            bail!("auth.username must not be empty");
        }
        if !self.auth.password_hash.starts_with("$argon2") {
            bail!("auth.password_hash must be an argon2 PHC string (see `tutor hash-password`)");
        }
        if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&self.auth.token_ttl_minutes) {
            bail!(
                "auth.token_ttl_minutes must be in [1, {}]",
                MAX_TOKEN_TTL_MINUTES
            );
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Read the hosted model API key. Both embeddings and chat use it.
pub fn openai_api_key() -> Result<String> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("OPENAI_API_KEY environment variable not set"),
    }
}
