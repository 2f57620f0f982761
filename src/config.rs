//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, see [`load_or_default`]) yields a working local setup: in-memory
//! store, hashed embeddings, extractive answers. [`load_config`] validates
//! values that would otherwise fail deep inside the pipeline.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Sessions holding an active collection pointer; the least recently
    /// used one is dropped past this.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    vec!["txt".to_string(), "pdf".to_string()]
}
fn default_max_sessions() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleaningConfig {
    /// Punctuation kept besides ASCII letters, digits, and whitespace.
    #[serde(default = "default_allowed_punctuation")]
    pub allowed_punctuation: String,
    /// Case-insensitive regexes matched at the start of a line.
    #[serde(default = "default_boilerplate_patterns")]
    pub boilerplate_patterns: Vec<String>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            allowed_punctuation: default_allowed_punctuation(),
            boilerplate_patterns: default_boilerplate_patterns(),
        }
    }
}

fn default_allowed_punctuation() -> String {
    ".,!?'\"".to_string()
}
fn default_boilerplate_patterns() -> Vec<String> {
    vec![
        r"page\s+\d+".to_string(),
        "confidential".to_string(),
        r"company\s+name".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Coarse window length in characters.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Characters shared by consecutive windows. Must be below `window_size`.
    #[serde(default = "default_window_overlap")]
    pub window_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_overlap: default_window_overlap(),
        }
    }
}

fn default_window_size() -> usize {
    1000
}
fn default_window_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `memory` or `chroma`.
    #[serde(default = "default_store_provider")]
    pub provider: String,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_database")]
    pub database: String,
    /// Environment variable holding the `x-chroma-token` value, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Base for generated collection names when the upload carries no file id.
    #[serde(default = "default_base_name")]
    pub base_name: String,
    /// Maximum records per write call.
    #[serde(default = "default_store_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_name_attempts")]
    pub max_name_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_store_provider(),
            url: default_store_url(),
            tenant: default_tenant(),
            database: default_database(),
            api_key_env: None,
            base_name: default_base_name(),
            batch_size: default_store_batch_size(),
            max_name_attempts: default_max_name_attempts(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_store_provider() -> String {
    "memory".to_string()
}
fn default_store_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_tenant() -> String {
    "default_tenant".to_string()
}
fn default_database() -> String {
    "default_database".to_string()
}
fn default_base_name() -> String {
    "documents".to_string()
}
fn default_store_batch_size() -> usize {
    100
}
fn default_max_name_attempts() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hashed`, `openai`, or `ollama`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: None,
            batch_size: default_embedding_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashed".to_string()
}
fn default_embedding_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Attach the whole collection text to the generation request.
    #[serde(default = "default_include_document")]
    pub include_document: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            separator: default_separator(),
            max_context_chars: default_max_context_chars(),
            include_document: default_include_document(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_separator() -> String {
    "\n".to_string()
}
fn default_max_context_chars() -> usize {
    8_000
}
fn default_include_document() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `extractive`, `openai` (any OpenAI-compatible chat API), or `ollama`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_max_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_document_chars: default_max_document_chars(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_max_retries(),
        }
    }
}

fn default_generation_provider() -> String {
    "extractive".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_document_chars() -> usize {
    16_000
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_generation_max_retries() -> u32 {
    2
}

/// Read and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        let config = Config::default();
        validate(&config)?;
        Ok(config)
    }
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.window_size == 0 {
        bail!("chunking.window_size must be > 0");
    }
    if config.chunking.window_overlap >= config.chunking.window_size {
        bail!(
            "chunking.window_overlap ({}) must be smaller than chunking.window_size ({})",
            config.chunking.window_overlap,
            config.chunking.window_size
        );
    }

    // Cleaning
    if !config.cleaning.allowed_punctuation.is_ascii() {
        bail!("cleaning.allowed_punctuation must contain only ASCII characters");
    }
    for pattern in &config.cleaning.boilerplate_patterns {
        regex::Regex::new(pattern)
            .with_context(|| format!("Invalid cleaning.boilerplate_patterns entry: '{}'", pattern))?;
    }

    // Server
    if config.server.max_upload_bytes == 0 {
        bail!("server.max_upload_bytes must be > 0");
    }
    if config.server.allowed_extensions.is_empty() {
        bail!("server.allowed_extensions must not be empty");
    }
    if config.server.max_sessions == 0 {
        bail!("server.max_sessions must be > 0");
    }

    // Store
    if config.store.batch_size == 0 {
        bail!("store.batch_size must be > 0");
    }
    if config.store.max_name_attempts == 0 {
        bail!("store.max_name_attempts must be >= 1");
    }
    if config.store.base_name.trim().is_empty() {
        bail!("store.base_name must not be empty");
    }
    match config.store.provider.as_str() {
        "memory" | "chroma" => {}
        other => bail!(
            "Unknown store provider: '{}'. Must be memory or chroma.",
            other
        ),
    }

    // Embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hashed" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hashed, openai, or ollama.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Generation
    match config.generation.provider.as_str() {
        "extractive" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be extractive, openai, or ollama.",
            other
        ),
    }

    Ok(())
}
