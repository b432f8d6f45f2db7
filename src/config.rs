use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragbase_core::chunk::ChunkingConfig;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub chunking: ChunkingSection,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root for `uploads/<kb>/` and `chunks/<kb>/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// SQLite file backing the vector index. Defaults to `<data_dir>/ragbase.sqlite`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: None,
        }
    }
}

impl StorageConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.data_dir.join("chunks")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("ragbase.sqlite"))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `sqlite` (persistent) or `memory`.
    #[serde(default = "default_vector_backend")]
    pub backend: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
        }
    }
}

fn default_vector_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingSection {
    pub fn to_chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
        }
    }
}

fn default_chunk_size() -> usize {
    ragbase_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    ragbase_core::chunk::DEFAULT_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama`, `openai`, or `hashing`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_attempts: default_embedding_attempts(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn model_or_default(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.provider.as_str() {
            "openai" => "text-embedding-3-small".to_string(),
            "hashing" => "hashing".to_string(),
            _ => "nomic-embed-text".to_string(),
        })
    }

    pub fn dims_or_default(&self) -> usize {
        self.dims.unwrap_or(match self.provider.as_str() {
            "openai" => 1536,
            "hashing" => 384,
            _ => 768,
        })
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `ollama`, `openai`, or `stub`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_chat_top_k")]
    pub top_k: usize,
    #[serde(default = "default_ctx_chars_per_chunk")]
    pub ctx_chars_per_chunk: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
            max_attempts: default_generation_attempts(),
            top_k: default_chat_top_k(),
            ctx_chars_per_chunk: default_ctx_chars_per_chunk(),
        }
    }
}

impl GenerationConfig {
    pub fn model_or_default(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.provider.as_str() {
            "openai" => "gpt-4o-mini".to_string(),
            "stub" => "stub".to_string(),
            _ => "llama3.2".to_string(),
        })
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_max_tokens() -> u32 {
    192
}
fn default_generation_timeout_secs() -> u64 {
    300
}
fn default_generation_attempts() -> u32 {
    1
}
fn default_chat_top_k() -> usize {
    3
}
fn default_ctx_chars_per_chunk() -> usize {
    ragbase_core::generation::DEFAULT_CTX_CHARS_PER_CHUNK
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .to_chunking()
        .validate()
        .context("invalid [chunking] section")?;

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    match config.vector.backend.as_str() {
        "sqlite" | "memory" => {}
        other => bail!(
            "Unknown vector backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "ollama" | "openai" | "hashing" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be ollama, openai, or hashing.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_attempts == 0 {
        bail!("embedding.max_attempts must be >= 1");
    }

    match config.generation.provider.as_str() {
        "ollama" | "openai" | "stub" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be ollama, openai, or stub.",
            other
        ),
    }
    if !(1..=2).contains(&config.generation.max_attempts) {
        bail!("generation.max_attempts must be 1 or 2");
    }
    if config.generation.top_k == 0 {
        bail!("generation.top_k must be >= 1");
    }

    Ok(())
}
