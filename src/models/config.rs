use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::search::OutputFormat;
use crate::error::ConfigError;

pub const APP_NAME: &str = "docseek";
pub const DEFAULT_REMOTE_EMBEDDING_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_REMOTE_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_REMOTE_EMBEDDING_DIMENSION: u32 = 1536;
pub const DEFAULT_LOCAL_EMBEDDING_DIMENSION: u32 = 384;
pub const DEFAULT_LOCAL_GENERATION_URL: &str = "http://localhost:8080";
pub const DEFAULT_REMOTE_GENERATION_MODEL: &str = "gpt-4o-mini";

const EMBEDDING_KEY_ENV: &str = "DOCSEEK_EMBEDDING_API_KEY";
const GENERATION_KEY_ENV: &str = "DOCSEEK_GENERATION_API_KEY";
const FALLBACK_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_NAME).join("config.toml"))
    }

    /// Load the configuration file, falling back to defaults when absent,
    /// then apply API keys from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration file, returning its path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    fn apply_env(&mut self) {
        let fallback = std::env::var(FALLBACK_KEY_ENV).ok();
        if self.embedding.api_key.is_none() {
            self.embedding.api_key = std::env::var(EMBEDDING_KEY_ENV).ok().or(fallback.clone());
        }
        if self.generation.api_key.is_none() {
            self.generation.api_key = std::env::var(GENERATION_KEY_ENV).ok().or(fallback);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.indexing.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "indexing.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.indexing.chunk_overlap >= self.indexing.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "indexing.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.indexing.chunk_overlap, self.indexing.chunk_size
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join(APP_NAME)))
            .unwrap_or_else(|| PathBuf::from(".").join(APP_NAME))
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir().join("index.db")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir().join("models")
    }

    pub fn benchmark_results_path(&self) -> PathBuf {
        self.data_dir().join("benchmark_results.json")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Local,
    Remote,
}

impl std::fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProviderKind::Local => write!(f, "local"),
            EmbeddingProviderKind::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    /// Directory holding `model.onnx` and `tokenizer.json` for the local provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_embedding_url() -> String {
    DEFAULT_REMOTE_EMBEDDING_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_REMOTE_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimension() -> u32 {
    DEFAULT_LOCAL_EMBEDDING_DIMENSION
}

fn default_max_tokens() -> u32 {
    512
}

fn default_timeout() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    16
}

fn default_retry_attempts() -> u32 {
    3
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model_path: None,
            url: default_embedding_url(),
            model: default_embedding_model(),
            api_key: None,
            dimension: default_embedding_dimension(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout(),
            batch_size: default_batch_size(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProviderKind {
    #[default]
    None,
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub provider: GenerationProviderKind,

    #[serde(default = "default_generation_url")]
    pub url: String,

    /// Model name for remote providers, or model path for local servers that
    /// route by model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_generation_url() -> String {
    DEFAULT_LOCAL_GENERATION_URL.to_string()
}

fn default_generation_max_tokens() -> u32 {
    256
}

fn default_temperature() -> f32 {
    0.3
}

fn default_generation_timeout() -> u64 {
    120
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProviderKind::default(),
            url: default_generation_url(),
            model: None,
            api_key: None,
            max_tokens: default_generation_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Target chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Characters shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,

    #[serde(default = "default_true")]
    pub respect_word_boundaries: bool,
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.venv/**".to_string(),
        "**/*.lock".to_string(),
    ]
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_chunk_size() -> u32 {
    1000
}

fn default_chunk_overlap() -> u32 {
    200
}

fn default_true() -> bool {
    true
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: default_exclude_patterns(),
            max_file_size: default_max_file_size(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            respect_word_boundaries: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    #[serde(default)]
    pub default_format: OutputFormat,

    #[serde(default)]
    pub synthesize: bool,
}

fn default_limit() -> u32 {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_format: OutputFormat::Text,
            synthesize: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}
