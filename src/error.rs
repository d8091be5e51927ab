//! Error types for docseek.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::JobKind;
use crate::utils::retry::Retryable;

fn is_transient_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("429")
        || msg.contains("unavailable")
        || msg.contains("too many requests")
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding endpoint: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timeout")]
    Timeout,

    #[error("embedding model not found: {0}")]
    ModelNotFound(String),

    #[error("failed to load embedding model: {0}")]
    LoadError(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("inference error: {0}")]
    InferenceError(String),

    #[error("embedding provider not configured: {0}")]
    NotConfigured(String),

    #[error("embedding unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError(msg) => is_transient_message(msg),
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Errors related to answer generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to connect to generation endpoint: {0}")]
    ConnectionError(String),

    #[error("generation server error: {0}")]
    ServerError(String),

    #[error("generation request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid generation response: {0}")]
    InvalidResponse(String),

    #[error("generation timeout")]
    Timeout,

    #[error("failed to load model: {0}")]
    LoadError(String),

    #[error("generation provider not configured: {0}")]
    NotConfigured(String),
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        match self {
            GenerationError::ConnectionError(_) | GenerationError::Timeout => true,
            GenerationError::ServerError(msg) => is_transient_message(msg),
            GenerationError::RequestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Errors related to the vector index, metadata store and indexing runs.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(
        "embedding dimension mismatch: index holds {expected}-d vectors, got {found}-d (a full reindex is required)"
    )]
    ProviderMismatch { expected: usize, found: usize },

    #[error("index store is corrupt: {0}")]
    Corrupt(String),

    #[error("index storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("directory walk error: {0}")]
    WalkError(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index is being updated by another process (lock: {})", .0.display())]
    Locked(PathBuf),

    #[error("indexing cancelled")]
    Cancelled,
}

/// Errors raised by the job orchestrator.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("a {0} job is already running")]
    AlreadyRunning(JobKind),

    #[error("job cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl From<IndexError> for JobError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Cancelled => JobError::Cancelled,
            other => JobError::Failed(other.to_string()),
        }
    }
}

impl From<ModelError> for JobError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Cancelled => JobError::Cancelled,
            other => JobError::Failed(other.to_string()),
        }
    }
}

impl From<BenchmarkError> for JobError {
    fn from(err: BenchmarkError) -> Self {
        match err {
            BenchmarkError::Cancelled => JobError::Cancelled,
            other => JobError::Failed(other.to_string()),
        }
    }
}

/// Errors related to the model catalog, downloads and local inventory.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("another model download is already in progress")]
    AlreadyDownloading,

    #[error("model already downloaded: {}", .0.display())]
    AlreadyPresent(PathBuf),

    #[error("insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("local model not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("model is in use: {}", .0.display())]
    InUse(PathBuf),

    #[error("download failed: {0}")]
    Download(String),

    #[error("download request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("connection closed after {received} of {expected} bytes")]
    Interrupted { received: u64, expected: u64 },

    #[error("downloaded artifact is invalid: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download cancelled")]
    Cancelled,
}

impl Retryable for ModelError {
    fn is_retryable(&self) -> bool {
        match self {
            ModelError::Download(msg) => is_transient_message(msg),
            ModelError::Interrupted { .. } => true,
            ModelError::RequestError(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            _ => false,
        }
    }
}

/// Errors related to benchmark runs.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("a benchmark is already running")]
    AlreadyRunning,

    #[error("no local models to benchmark")]
    NoModels,

    #[error("model inventory error: {0}")]
    Models(#[from] ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("result serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("benchmark cancelled")]
    Cancelled,
}

/// Errors related to search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("search error: {0}")]
    Search(#[from] SearchError),

    #[error("job error: {0}")]
    Job(#[from] JobError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("benchmark error: {0}")]
    Benchmark(#[from] BenchmarkError),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_retryability() {
        assert!(EmbeddingError::ServerError("status 503: busy".into()).is_retryable());
        assert!(EmbeddingError::ServerError("Too Many Requests".into()).is_retryable());
        assert!(!EmbeddingError::ServerError("status 400: bad input".into()).is_retryable());
        assert!(!EmbeddingError::InvalidResponse("garbage".into()).is_retryable());
        assert!(GenerationError::Timeout.is_retryable());
    }

    #[test]
    fn test_cancellation_maps_to_job_cancelled() {
        assert!(matches!(
            JobError::from(IndexError::Cancelled),
            JobError::Cancelled
        ));
        assert!(matches!(
            JobError::from(ModelError::Cancelled),
            JobError::Cancelled
        ));
        assert!(matches!(
            JobError::from(ModelError::Corrupt("empty".into())),
            JobError::Failed(_)
        ));
    }

    #[test]
    fn test_provider_mismatch_message() {
        let err = IndexError::ProviderMismatch {
            expected: 384,
            found: 1536,
        };
        let msg = err.to_string();
        assert!(msg.contains("384"));
        assert!(msg.contains("1536"));
        assert!(msg.contains("reindex"));
    }
}
