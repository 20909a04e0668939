use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::models::FilterConfig;

/// Top-level configuration, loaded from a TOML file.
///
/// Every section has defaults, so an empty file is a valid configuration
/// that ingests from GitHub into `./data/store` with embeddings disabled.
/// Secrets are never read from the file; see [`env_secret`].
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_tenant")]
    pub tenant: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            tenant: default_tenant(),
        }
    }
}

fn default_tenant() -> String {
    "default".to_string()
}

/// Where artifacts and content-addressed blobs live.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `filesystem` or `s3`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    /// Switches to path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            root: default_store_root(),
            bucket: None,
            region: default_region(),
            endpoint_url: None,
        }
    }
}

fn default_store_backend() -> String {
    "filesystem".to_string()
}
fn default_store_root() -> PathBuf {
    PathBuf::from("./data/store")
}
fn default_region() -> String {
    "eu-west-2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/rctx.sqlite")
}

/// Where repository snapshots are read from.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `github` (REST API) or `git` (local clone).
    #[serde(default = "default_source_kind")]
    pub kind: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Path to the local clone when `kind = "git"`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    /// GitHub App installation to authenticate as. The app id and private
    /// key come from `GITHUB_APP_ID` and `GITHUB_PRIVATE_KEY(_PATH)`.
    #[serde(default)]
    pub installation_id: Option<u64>,
    /// Also store a gzipped tarball of each ingested commit.
    #[serde(default)]
    pub save_tarball: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            api_url: default_api_url(),
            path: None,
            timeout_secs: default_source_timeout(),
            installation_id: None,
            save_tarball: false,
        }
    }
}

fn default_source_kind() -> String {
    "github".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_source_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct FiltersConfig {
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "default_max_file_kb")]
    pub max_file_kb: u64,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: default_exclude(),
            max_file_kb: default_max_file_kb(),
        }
    }
}

impl FiltersConfig {
    pub fn to_filter(&self) -> FilterConfig {
        FilterConfig {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            max_file_kb: self.max_file_kb,
        }
    }
}

fn default_include() -> Vec<String> {
    [
        "src/**",
        "README.md",
        ".github/workflows/**",
        "package.json",
        "tsconfig*.json",
        "Dockerfile",
        "scripts/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_exclude() -> Vec<String> {
    [
        "node_modules/**",
        "dist/**",
        "coverage/**",
        "**/*.map",
        "**/*.png",
        "**/*.jpg",
        "**/*.jpeg",
        "**/*.gif",
        "**/*.pdf",
        "**/*.zip",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_file_kb() -> u64 {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Token budget per chunk (1 token ~ 4 bytes).
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Smallest code window unless the file itself is shorter.
    #[serde(default = "default_min_lines")]
    pub min_lines: usize,
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    #[serde(default = "default_model_label")]
    pub model_label: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            max_lines: default_max_lines(),
            min_lines: default_min_lines(),
            overlap_lines: default_overlap_lines(),
            model_label: default_model_label(),
        }
    }
}

fn default_target_tokens() -> usize {
    1600
}
fn default_max_lines() -> usize {
    400
}
fn default_min_lines() -> usize {
    120
}
fn default_overlap_lines() -> usize {
    20
}
fn default_model_label() -> String {
    "chunker-v0.1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Vectors per partition file.
    #[serde(default = "default_partition_size")]
    pub partition_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            partition_size: default_partition_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_partition_size() -> usize {
    2000
}
fn default_max_retries() -> u32 {
    1
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_max_tokens() -> u32 {
    400
}
fn default_temperature() -> f32 {
    0.1
}
fn default_generation_timeout() -> u64 {
    60
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
    8
}

/// Read a secret from the environment, treating empty values as unset.
pub fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Like [`env_secret`], but a missing value is a configuration error.
pub fn require_env(name: &str, purpose: &str) -> Result<String> {
    env_secret(name)
        .ok_or_else(|| PipelineError::config(format!("{} is required for {}", name, purpose)).into())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| PipelineError::config(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let bail = |msg: String| -> Result<()> { Err(PipelineError::config(msg).into()) };

    match config.store.backend.as_str() {
        "filesystem" => {}
        "s3" => {
            if config.store.bucket.as_deref().unwrap_or("").is_empty() {
                return bail("store.bucket must be set when backend is 's3'".into());
            }
        }
        other => {
            return bail(format!(
                "Unknown store backend: '{}'. Must be filesystem or s3.",
                other
            ))
        }
    }

    match config.source.kind.as_str() {
        "github" => {}
        "git" => {
            if config.source.path.is_none() {
                return bail("source.path must be set when kind is 'git'".into());
            }
            if config.source.installation_id.is_some() {
                return bail("source.installation_id only applies when kind is 'github'".into());
            }
        }
        other => {
            return bail(format!(
                "Unknown source kind: '{}'. Must be github or git.",
                other
            ))
        }
    }

    // Validate chunking
    let chunking = &config.chunking;
    if chunking.target_tokens == 0 {
        return bail("chunking.target_tokens must be > 0".into());
    }
    if chunking.max_lines == 0 {
        return bail("chunking.max_lines must be > 0".into());
    }
    if chunking.overlap_lines >= chunking.max_lines {
        return bail("chunking.overlap_lines must be < chunking.max_lines".into());
    }

    // Validate embedding
    let embedding = &config.embedding;
    if embedding.batch_size == 0 {
        return bail("embedding.batch_size must be > 0".into());
    }
    if embedding.partition_size == 0 {
        return bail("embedding.partition_size must be > 0".into());
    }
    match embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if embedding.dims.is_none() || embedding.dims == Some(0) {
                return bail(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    embedding.provider
                ));
            }
            if embedding.provider == "ollama" && embedding.model.is_none() {
                return bail("embedding.model must be specified when provider is 'ollama'".into());
            }
        }
        other => {
            return bail(format!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ))
        }
    }

    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        "ollama" => {
            if config.generation.model.is_none() {
                return bail("generation.model must be specified when provider is 'ollama'".into());
            }
        }
        other => {
            return bail(format!(
                "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ))
        }
    }

    if config.retrieval.top_k == 0 {
        return bail("retrieval.top_k must be >= 1".into());
    }

    Ok(())
}
