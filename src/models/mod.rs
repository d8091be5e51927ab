mod benchmark;
mod catalog;
mod config;
mod document;
mod job;
mod search;

pub use benchmark::{BenchmarkOutcome, BenchmarkReport, ModelBenchmark, SystemSnapshot};
pub use catalog::{
    CATALOG_VERSION, LocalModel, ModelCatalog, ModelCategory, ModelDescriptor, display_name,
};
pub use config::{
    APP_NAME, Config, DEFAULT_LOCAL_EMBEDDING_DIMENSION, DEFAULT_REMOTE_EMBEDDING_DIMENSION,
    DEFAULT_REMOTE_GENERATION_MODEL, EmbeddingConfig, EmbeddingProviderKind, GenerationConfig, GenerationProviderKind,
    IndexingConfig, SearchConfig, StorageConfig,
};
pub use document::{Chunk, ChunkKey, Document};
pub use job::{JobKind, JobProgress, JobState, JobStatus};
pub use search::{OutputFormat, SearchResult, SearchResults};
