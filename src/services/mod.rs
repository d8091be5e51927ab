mod benchmark;
mod chunker;
pub mod embedding;
mod generation;
mod indexer;
mod jobs;
mod model_manager;
mod resources;
mod retrieval;
pub mod vector_store;

pub use benchmark::{BenchmarkHarness, BenchmarkSample, SAMPLES, fact_retention, summary_prompt};
pub use chunker::{TextChunker, TextSpan};
pub use embedding::{Embedder, EmbeddingProvider, LocalEmbedder, ProviderSignature, RemoteEmbedder};
pub use generation::{
    Generation, GenerationOptions, GenerationProvider, Generator, LocalGenerator, ModelRunner,
    RemoteGenerator, ServerModelRunner,
};
pub use indexer::{IndexReport, Indexer, PlainTextExtractor, TextExtractor};
pub use jobs::{JobContext, JobOrchestrator};
pub use model_manager::{ModelLease, ModelLeases, ModelManager};
pub use resources::{BYTES_PER_GB, ResourceProbe, SystemProbe, format_gb};
pub use retrieval::{NO_ANSWER, RetrievalEngine, synthesis_options, synthesis_prompt};
pub use vector_store::{DistanceMetric, IndexStats, ScoredChunk, VectorStore};
