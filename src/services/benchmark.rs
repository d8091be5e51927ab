//! Runs a fixed summarisation battery against every local model.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::generation::{GenerationOptions, ModelRunner};
use super::jobs::{JobContext, JobOrchestrator};
use super::model_manager::ModelManager;
use super::resources::{BYTES_PER_GB, ResourceProbe};
use crate::error::{BenchmarkError, JobError};
use crate::models::{
    BenchmarkReport, JobKind, JobProgress, JobStatus, LocalModel, ModelBenchmark, SystemSnapshot,
};
use crate::utils::{atomic_write, count_words};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// A text to summarise plus the concepts a good summary keeps.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkSample {
    pub id: &'static str,
    pub name: &'static str,
    pub text: &'static str,
    pub key_concepts: &'static [&'static str],
}

pub const SAMPLES: [BenchmarkSample; 3] = [
    BenchmarkSample {
        id: "short",
        name: "Short text",
        text: "Machine learning is a branch of artificial intelligence in which systems improve \
               through experience instead of explicit programming. Programs are given data, look \
               for patterns in it, and use what they find to make better decisions later.",
        key_concepts: &[
            "machine learning",
            "artificial intelligence",
            "data",
            "patterns",
            "decisions",
        ],
    },
    BenchmarkSample {
        id: "medium",
        name: "Medium text",
        text: "Cloud computing delivers servers, storage, databases, networking and software over \
               the Internet, so teams pay for what they use instead of running their own hardware.\n\n\
               A public cloud is operated by a third-party provider and shared between customers. \
               A private cloud serves a single organization. A hybrid cloud connects the two so \
               data and applications can move between them.\n\n\
               Organizations adopt the cloud for cost savings, elastic scalability, reliability and \
               security, using it for backups, disaster recovery, analytics and customer-facing \
               applications.",
        key_concepts: &[
            "cloud computing",
            "servers",
            "storage",
            "public cloud",
            "private cloud",
            "hybrid cloud",
            "cost savings",
            "security",
            "scalability",
        ],
    },
    BenchmarkSample {
        id: "long",
        name: "Long text",
        text: "Natural language processing (NLP) is the part of artificial intelligence concerned \
               with letting computers read, interpret and produce human language. It combines \
               computational linguistics with machine learning and deep learning models.\n\n\
               Typical NLP tasks are speech recognition, which turns spoken audio into text; \
               sentiment analysis, which decides whether a passage is positive or negative; named \
               entity recognition; and machine translation between languages.\n\n\
               Virtual assistants rely on NLP to understand requests, mail filters use it to spot \
               spam, and search engines use it to interpret queries. Hospitals apply it to \
               clinical notes.\n\n\
               The transformer architecture changed the field. Models such as BERT and GPT are \
               pre-trained on large text collections and fine-tuned for specific tasks, and large \
               language models now handle text generation, translation, summarization and \
               question answering.",
        key_concepts: &[
            "NLP",
            "natural language processing",
            "machine learning",
            "deep learning",
            "speech recognition",
            "sentiment analysis",
            "transformer",
            "BERT",
            "GPT",
            "virtual assistants",
            "text generation",
            "translation",
        ],
    },
];

pub fn summary_prompt(text: &str) -> String {
    format!("Summarize this text concisely:\n\n{}\n\nSummary:", text)
}

/// Percentage (0-100) of `concepts` that appear in `output`, case-insensitively.
pub fn fact_retention(output: &str, concepts: &[&str]) -> f64 {
    if output.trim().is_empty() || concepts.is_empty() {
        return 0.0;
    }
    let lowered = output.to_lowercase();
    let found = concepts
        .iter()
        .filter(|c| lowered.contains(&c.to_lowercase()))
        .count();
    found as f64 / concepts.len() as f64 * 100.0
}

/// Owns the benchmark job and the last completed result set.
#[derive(Clone)]
pub struct BenchmarkHarness {
    models: ModelManager,
    runner: Arc<dyn ModelRunner>,
    probe: Arc<dyn ResourceProbe>,
    jobs: JobOrchestrator,
    results_path: PathBuf,
    results: Arc<RwLock<Option<BenchmarkReport>>>,
}

impl BenchmarkHarness {
    /// Previously stored results are loaded from `results_path` if readable.
    pub fn new(
        models: ModelManager,
        runner: Arc<dyn ModelRunner>,
        probe: Arc<dyn ResourceProbe>,
        jobs: JobOrchestrator,
        results_path: PathBuf,
    ) -> Self {
        let stored = load_results(&results_path);
        Self {
            models,
            runner,
            probe,
            jobs,
            results_path,
            results: Arc::new(RwLock::new(stored)),
        }
    }

    pub fn results(&self) -> Option<BenchmarkReport> {
        self.results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.jobs.status(JobKind::Benchmark)
    }

    pub fn report_path(&self) -> PathBuf {
        self.results_path.with_extension("md")
    }

    /// Start a run over every local model.
    pub fn run(&self) -> Result<JoinHandle<Result<BenchmarkReport, JobError>>, BenchmarkError> {
        if self.jobs.is_running(JobKind::Benchmark) {
            return Err(BenchmarkError::AlreadyRunning);
        }
        let models = self.models.list_local()?;
        if models.is_empty() {
            return Err(BenchmarkError::NoModels);
        }

        let harness = self.clone();
        self.jobs
            .start(JobKind::Benchmark, None, move |ctx| async move {
                harness.execute(models, &ctx).await.map_err(JobError::from)
            })
            .map_err(|_| BenchmarkError::AlreadyRunning)
    }

    async fn execute(
        &self,
        models: Vec<LocalModel>,
        ctx: &JobContext,
    ) -> Result<BenchmarkReport, BenchmarkError> {
        let total = models.len() as u64;
        let mut results = Vec::with_capacity(models.len());

        for (done, model) in models.iter().enumerate() {
            ctx.checkpoint().map_err(|_| BenchmarkError::Cancelled)?;
            ctx.set_progress(JobProgress::Items {
                done: done as u64,
                total,
                current: Some(model.name.clone()),
            });

            let _lease = self.models.leases().acquire(&model.path);
            let result = self.benchmark_model(model, ctx).await?;
            if result.is_completed() {
                info!(
                    model = %model.id,
                    tps = result.tokens_per_second,
                    fact_score = result.fact_retention_score,
                    "model benchmarked"
                );
            } else {
                warn!(model = %model.id, errors = ?result.errors, "model benchmark failed");
            }
            results.push(result);
        }
        ctx.set_progress(JobProgress::Items {
            done: total,
            total,
            current: None,
        });

        let report = BenchmarkReport {
            timestamp: Utc::now(),
            system: SystemSnapshot {
                total_ram_gb: self.probe.total_memory() as f64 / BYTES_PER_GB,
                available_ram_gb: self.probe.available_memory() as f64 / BYTES_PER_GB,
                cpu_count: self.probe.cpu_count(),
            },
            results,
        };

        self.store(&report)?;
        Ok(report)
    }

    /// Persist then publish, so a failed write keeps the previous set everywhere.
    /// Publish a finished run. The JSON file is the record of truth; the
    /// Markdown report is derived from it and a failure to write it only warns.
    fn store(&self, report: &BenchmarkReport) -> Result<(), BenchmarkError> {
        let json = serde_json::to_vec_pretty(report)?;
        atomic_write(&self.results_path, &json)?;
        {
            let mut current = self.results.write().unwrap_or_else(|e| e.into_inner());
            *current = Some(report.clone());
        }
        info!(path = %self.results_path.display(), models = report.results.len(), "benchmark results saved");

        let report_path = self.report_path();
        if let Err(e) = atomic_write(&report_path, report.to_markdown().as_bytes()) {
            warn!(path = %report_path.display(), error = %e, "could not write benchmark report");
        }
        Ok(())
    }

    async fn benchmark_model(
        &self,
        model: &LocalModel,
        ctx: &JobContext,
    ) -> Result<ModelBenchmark, BenchmarkError> {
        let mut result = ModelBenchmark::new(
            &model.id,
            &model.name,
            &model.path.display().to_string(),
            model.size_mb(),
        );
        let baseline = self.probe.used_memory();
        let mut peak = baseline;

        ctx.set_message(format!("loading {}", model.name));
        let load_started = Instant::now();
        let generator = match self.runner.load(model).await {
            Ok(generator) => generator,
            Err(e) => {
                result.mark_failed(e.to_string());
                return Ok(result);
            }
        };
        result.load_time_s = load_started.elapsed().as_secs_f64();
        peak = peak.max(self.probe.used_memory());

        let options = GenerationOptions::default();
        let mut total_tokens = 0u64;
        let mut total_time = 0.0f64;
        let mut latencies = Vec::new();
        let mut scores = Vec::new();

        for sample in &SAMPLES {
            ctx.checkpoint().map_err(|_| BenchmarkError::Cancelled)?;
            ctx.set_message(format!("{}: {}", model.name, sample.name));

            let started = Instant::now();
            let generation = match generator.generate(&summary_prompt(sample.text), &options).await
            {
                Ok(generation) => generation,
                Err(e) => {
                    result.mark_failed(format!("{}: {}", sample.id, e));
                    break;
                }
            };
            let elapsed = started.elapsed().as_secs_f64();
            peak = peak.max(self.probe.used_memory());
            result.samples_tested += 1;

            let tokens = generation
                .tokens
                .map(u64::from)
                .unwrap_or_else(|| count_words(&generation.text) as u64);
            if tokens == 0 {
                continue;
            }
            total_tokens += tokens;
            total_time += elapsed;
            latencies.push(elapsed / tokens as f64);
            let score = fact_retention(&generation.text, sample.key_concepts);
            debug!(model = %model.id, sample = sample.id, tokens, elapsed, score, "sample done");
            scores.push(score);
        }

        if total_time > 0.0 {
            result.tokens_per_second = total_tokens as f64 / total_time;
        }
        if !latencies.is_empty() {
            result.first_token_latency_ms =
                latencies.iter().sum::<f64>() / latencies.len() as f64 * 1000.0;
        }
        if !scores.is_empty() {
            result.fact_retention_score = scores.iter().sum::<f64>() / scores.len() as f64;
        }
        result.total_generation_time_s = total_time;
        result.peak_memory_mb = peak.saturating_sub(baseline) as f64 / BYTES_PER_MB;
        Ok(result)
    }
}

fn load_results(path: &Path) -> Option<BenchmarkReport> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable benchmark results");
            None
        }
    }
}
