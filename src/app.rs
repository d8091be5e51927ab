//! Wires configuration into the long-lived services.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{AppError, EmbeddingError, GenerationError, IndexError, JobError};
use crate::models::{
    BenchmarkReport, Config, JobKind, JobStatus, LocalModel, ModelCatalog, SearchResults,
};
use crate::services::{
    BenchmarkHarness, DistanceMetric, Embedder, EmbeddingProvider, GenerationProvider, Generator,
    IndexReport, IndexStats, Indexer, JobOrchestrator, ModelManager, ResourceProbe,
    RetrievalEngine, ServerModelRunner, SystemProbe, VectorStore,
};

/// Summary of a stored benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSummary {
    pub timestamp: String,
    pub models: usize,
    pub fastest: Option<String>,
    pub most_accurate: Option<String>,
}

impl From<&BenchmarkReport> for BenchmarkSummary {
    fn from(report: &BenchmarkReport) -> Self {
        Self {
            timestamp: report.timestamp.to_rfc3339(),
            models: report.results.len(),
            fastest: report.fastest().map(|r| r.model_name.clone()),
            most_accurate: report.most_accurate().map(|r| r.model_name.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppStatus {
    pub data_dir: PathBuf,
    pub index: IndexStats,
    pub embedding_provider: String,
    pub generation_provider: String,
    pub jobs: Vec<JobStatus>,
    pub local_models: Vec<LocalModel>,
    pub benchmark: Option<BenchmarkSummary>,
}

/// Owns the store, the job orchestrator and the model services for one process.
pub struct App {
    config: Config,
    store: Arc<VectorStore>,
    jobs: JobOrchestrator,
    models: ModelManager,
    benchmark: BenchmarkHarness,
}

impl App {
    pub fn new(config: Config) -> Self {
        let probe: Arc<dyn ResourceProbe> = Arc::new(SystemProbe::new());
        Self::with_probe(config, probe)
    }

    pub fn with_probe(config: Config, probe: Arc<dyn ResourceProbe>) -> Self {
        let jobs = JobOrchestrator::new();
        let store = Arc::new(VectorStore::load(
            &config.index_path(),
            DistanceMetric::default(),
        ));
        let models = ModelManager::new(
            config.models_dir(),
            ModelCatalog::builtin(),
            jobs.clone(),
            Arc::clone(&probe),
        );
        let benchmark = BenchmarkHarness::new(
            models.clone(),
            Arc::new(ServerModelRunner::new(&config.generation)),
            probe,
            jobs.clone(),
            config.benchmark_results_path(),
        );
        Self {
            config,
            store,
            jobs,
            models,
            benchmark,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn jobs(&self) -> &JobOrchestrator {
        &self.jobs
    }

    pub fn models(&self) -> &ModelManager {
        &self.models
    }

    pub fn benchmark(&self) -> &BenchmarkHarness {
        &self.benchmark
    }

    pub fn embedder(&self) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        Ok(Arc::new(EmbeddingProvider::from_config(
            &self.config.embedding,
        )?))
    }

    pub fn generator(&self) -> Result<Option<Arc<dyn Generator>>, GenerationError> {
        Ok(GenerationProvider::from_config(&self.config.generation)?
            .map(|g| Arc::new(g) as Arc<dyn Generator>))
    }

    /// Start a background index of `root`.
    pub fn start_index(
        &self,
        root: PathBuf,
    ) -> Result<JoinHandle<Result<IndexReport, JobError>>, AppError> {
        if self.jobs.is_running(JobKind::Index) {
            return Err(JobError::AlreadyRunning(JobKind::Index).into());
        }
        let indexer = Indexer::new(
            Arc::clone(&self.store),
            self.embedder()?,
            &self.config.indexing,
            self.config.embedding.batch_size as usize,
            self.config.index_path(),
        );
        let lock = indexer.lock().map_err(|e| match e {
            IndexError::Locked(_) => AppError::Job(JobError::AlreadyRunning(JobKind::Index)),
            other => other.into(),
        })?;
        let key = root.display().to_string();
        Ok(self.jobs.start(JobKind::Index, Some(key), move |ctx| async move {
            indexer
                .run_locked(&lock, &root, &ctx)
                .await
                .map_err(JobError::from)
        })?)
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        synthesize: bool,
    ) -> Result<SearchResults, AppError> {
        // an empty index answers without needing a working embedder
        if self.store.is_empty() && !query.trim().is_empty() && limit > 0 {
            return Ok(SearchResults::empty(query.trim().to_string()));
        }

        let generator = if synthesize {
            self.generator().unwrap_or_else(|e| {
                warn!(error = %e, "generation provider unavailable");
                None
            })
        } else {
            None
        };
        let engine =
            RetrievalEngine::new(Arc::clone(&self.store), self.embedder()?).with_generator(generator);
        Ok(engine.search(query, limit, synthesize).await?)
    }

    pub fn status(&self) -> AppStatus {
        let local_models = self.models.list_local().unwrap_or_else(|e| {
            warn!(error = %e, "cannot list local models");
            Vec::new()
        });
        AppStatus {
            data_dir: self.config.data_dir(),
            index: self.store.stats(),
            embedding_provider: self.config.embedding.provider.to_string(),
            generation_provider: format!("{:?}", self.config.generation.provider).to_lowercase(),
            jobs: JobKind::ALL
                .iter()
                .filter_map(|kind| self.jobs.status(*kind))
                .collect(),
            local_models,
            benchmark: self.benchmark.results().as_ref().map(BenchmarkSummary::from),
        }
    }
}
