//! Benchmark result records and report rendering.

use std::fmt::Write as FmtWrite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkOutcome {
    Completed,
    Failed,
}

/// Measurements for one local model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBenchmark {
    pub model_id: String,
    pub model_name: String,
    pub model_path: String,
    pub model_size_mb: f64,
    pub outcome: BenchmarkOutcome,
    pub load_time_s: f64,
    pub tokens_per_second: f64,
    pub first_token_latency_ms: f64,
    pub total_generation_time_s: f64,
    pub peak_memory_mb: f64,
    /// Average share of key concepts retained, 0-100
    pub fact_retention_score: f64,
    pub samples_tested: u32,
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ModelBenchmark {
    pub fn new(model_id: &str, model_name: &str, model_path: &str, model_size_mb: f64) -> Self {
        Self {
            model_id: model_id.to_string(),
            model_name: model_name.to_string(),
            model_path: model_path.to_string(),
            model_size_mb,
            outcome: BenchmarkOutcome::Completed,
            load_time_s: 0.0,
            tokens_per_second: 0.0,
            first_token_latency_ms: 0.0,
            total_generation_time_s: 0.0,
            peak_memory_mb: 0.0,
            fact_retention_score: 0.0,
            samples_tested: 0,
            errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.outcome = BenchmarkOutcome::Failed;
        self.errors.push(error.into());
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == BenchmarkOutcome::Completed
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub total_ram_gb: f64,
    pub available_ram_gb: f64,
    pub cpu_count: usize,
}

/// The complete result set of one benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub timestamp: DateTime<Utc>,
    pub system: SystemSnapshot,
    pub results: Vec<ModelBenchmark>,
}

impl BenchmarkReport {
    fn completed(&self) -> impl Iterator<Item = &ModelBenchmark> {
        self.results.iter().filter(|r| r.is_completed())
    }

    pub fn fastest(&self) -> Option<&ModelBenchmark> {
        self.completed()
            .max_by(|a, b| a.tokens_per_second.total_cmp(&b.tokens_per_second))
    }

    pub fn most_accurate(&self) -> Option<&ModelBenchmark> {
        self.completed()
            .max_by(|a, b| a.fact_retention_score.total_cmp(&b.fact_retention_score))
    }

    pub fn most_efficient(&self) -> Option<&ModelBenchmark> {
        self.completed()
            .filter(|r| r.peak_memory_mb > 0.0)
            .min_by(|a, b| a.peak_memory_mb.total_cmp(&b.peak_memory_mb))
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Model Benchmark Results\n");
        let _ = writeln!(out, "*Generated: {}*\n", self.timestamp.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "## System Info\n");
        let _ = writeln!(
            out,
            "- **RAM**: {:.1} GB total, {:.1} GB available",
            self.system.total_ram_gb, self.system.available_ram_gb
        );
        let _ = writeln!(out, "- **CPU Cores**: {}\n", self.system.cpu_count);
        let _ = writeln!(out, "## Results\n");
        let _ = writeln!(out, "| Model | Size | Load Time | TPS | Fact Score | Memory | Status |");
        let _ = writeln!(out, "|-------|------|-----------|-----|------------|--------|--------|");
        for r in &self.results {
            let status = if r.is_completed() { "ok" } else { "failed" };
            let _ = writeln!(
                out,
                "| {} | {:.0}MB | {:.1}s | {:.1} | {:.0}% | {:.0}MB | {} |",
                r.model_name,
                r.model_size_mb,
                r.load_time_s,
                r.tokens_per_second,
                r.fact_retention_score,
                r.peak_memory_mb,
                status
            );
        }

        if let Some(fastest) = self.fastest() {
            let _ = writeln!(out, "\n## Analysis\n");
            let _ = writeln!(
                out,
                "- **Fastest**: {} ({:.1} tokens/sec)",
                fastest.model_name, fastest.tokens_per_second
            );
            if let Some(best) = self.most_accurate() {
                let _ = writeln!(
                    out,
                    "- **Most Accurate**: {} ({:.0}% fact retention)",
                    best.model_name, best.fact_retention_score
                );
            }
            if let Some(lean) = self.most_efficient() {
                let _ = writeln!(
                    out,
                    "- **Most Efficient**: {} ({:.0} MB)",
                    lean.model_name, lean.peak_memory_mb
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, tps: f64, facts: f64, mem: f64) -> ModelBenchmark {
        let mut r = ModelBenchmark::new(name, name, "/models/x.gguf", 100.0);
        r.tokens_per_second = tps;
        r.fact_retention_score = facts;
        r.peak_memory_mb = mem;
        r
    }

    #[test]
    fn test_winners_ignore_failed_models() {
        let mut broken = result("broken", 999.0, 100.0, 1.0);
        broken.mark_failed("load error");
        let report = BenchmarkReport {
            timestamp: Utc::now(),
            system: SystemSnapshot::default(),
            results: vec![
                result("fast", 40.0, 50.0, 900.0),
                result("accurate", 10.0, 90.0, 300.0),
                broken,
            ],
        };
        assert_eq!(report.fastest().unwrap().model_name, "fast");
        assert_eq!(report.most_accurate().unwrap().model_name, "accurate");
        assert_eq!(report.most_efficient().unwrap().model_name, "accurate");
    }

    #[test]
    fn test_markdown_lists_every_model() {
        let mut broken = result("broken", 0.0, 0.0, 0.0);
        broken.mark_failed("load error");
        let report = BenchmarkReport {
            timestamp: Utc::now(),
            system: SystemSnapshot::default(),
            results: vec![result("tiny", 20.0, 60.0, 500.0), broken],
        };
        let md = report.to_markdown();
        assert!(md.contains("| tiny |"));
        assert!(md.contains("| broken |"));
        assert!(md.contains("failed"));
        assert!(md.contains("**Fastest**: tiny"));
    }
}
