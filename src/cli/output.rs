use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::app::AppStatus;
use crate::models::{
    BenchmarkReport, JobProgress, JobStatus, LocalModel, ModelCatalog, OutputFormat,
    SearchResults,
};
use crate::services::{IndexReport, format_gb};

const PREVIEW_CHARS: usize = 200;

pub trait Formatter {
    fn format_search_results(&self, results: &SearchResults) -> String;
    fn format_index_report(&self, report: &IndexReport) -> String;
    fn format_status(&self, status: &AppStatus) -> String;
    fn format_catalog(&self, catalog: &ModelCatalog, local: &[LocalModel]) -> String;
    fn format_local_models(&self, models: &[LocalModel]) -> String;
    fn format_benchmark(&self, report: &BenchmarkReport) -> String;
    fn format_job(&self, status: &JobStatus) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

fn preview(content: &str) -> String {
    let head: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        format!("{}...", head)
    } else {
        head
    }
}

fn progress_label(progress: &JobProgress) -> String {
    match progress {
        JobProgress::None => String::new(),
        JobProgress::Items { done, total, .. } => format!("{}/{}", done, total),
        JobProgress::Bytes {
            downloaded, total, ..
        } => match total {
            Some(total) => format!("{} of {}", format_gb(*downloaded), format_gb(*total)),
            None => format_gb(*downloaded),
        },
    }
}

fn is_downloaded(filename: &str, local: &[LocalModel]) -> bool {
    local.iter().any(|m| m.filename == filename)
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.is_empty() {
            return format!("No results found for: {}\n", results.query);
        }

        let mut output = String::new();
        let _ = writeln!(output, "Search results for: \"{}\"", results.query);
        let _ = writeln!(
            output,
            "Found {} results in {}ms\n",
            results.total, results.duration_ms
        );

        if !results.answer.is_empty() {
            let _ = writeln!(output, "Answer:");
            for line in results.answer.lines() {
                let _ = writeln!(output, "  {}", line);
            }
            let _ = writeln!(output);
        } else if let Some(ref reason) = results.synthesis_error {
            let _ = writeln!(output, "(no answer: {})\n", reason);
        }

        for (i, result) in results.results.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. [Relevance: {:.3}] {}",
                i + 1,
                result.relevance,
                result.filename
            );
            let _ = writeln!(
                output,
                "   Location: {} (chunk {}, bytes {}-{})",
                result.document_path, result.sequence, result.start_offset, result.end_offset
            );
            if !result.tags.is_empty() {
                let _ = writeln!(output, "   Tags: {}", result.tags.join(", "));
            }
            let _ = writeln!(output, "   ---");
            for line in preview(&result.content).lines() {
                let _ = writeln!(output, "   {}", line);
            }
            let _ = writeln!(output);
        }

        output
    }

    fn format_index_report(&self, report: &IndexReport) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Indexing Complete");
        let _ = writeln!(output, "-----------------");
        let _ = writeln!(output, "Root: {}", report.root);
        let _ = writeln!(output, "Files scanned: {}", report.scanned);
        let _ = writeln!(output, "Files indexed: {}", report.indexed);
        let _ = writeln!(output, "Files unchanged: {}", report.unchanged);
        let _ = writeln!(output, "Files removed: {}", report.removed);
        let _ = writeln!(output, "Files skipped: {}", report.skipped);
        let _ = writeln!(output, "Chunks written: {}", report.chunks_written);
        let _ = writeln!(output, "Duration: {}ms", report.duration_ms);
        output
    }

    fn format_status(&self, status: &AppStatus) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Status");
        let _ = writeln!(output, "------");
        let _ = writeln!(output, "Data dir:      {}", status.data_dir.display());
        let _ = writeln!(output, "Embedding:     {}", status.embedding_provider);
        let _ = writeln!(output, "Generation:    {}", status.generation_provider);
        let _ = writeln!(output);

        let index = &status.index;
        let _ = writeln!(output, "Index:");
        let _ = writeln!(output, "  Documents:   {}", index.documents);
        let _ = writeln!(output, "  Chunks:      {}", index.chunks);
        let _ = writeln!(output, "  Metric:      {}", index.metric);
        if let Some(ref sig) = index.signature {
            let _ = writeln!(output, "  Built with:  {}", sig);
        }
        let _ = writeln!(output);

        let _ = writeln!(output, "Local models:  {}", status.local_models.len());
        for model in &status.local_models {
            let _ = writeln!(output, "  {} ({:.0} MB)", model.filename, model.size_mb());
        }

        for job in &status.jobs {
            let _ = writeln!(
                output,
                "Last {} job:  {} {}",
                job.kind,
                job.state,
                progress_label(&job.progress)
            );
            if let Some(ref err) = job.last_error {
                let _ = writeln!(output, "  Error:       {}", err);
            }
        }

        if let Some(ref bench) = status.benchmark {
            let _ = writeln!(output, "Benchmark:     {} model(s) at {}", bench.models, bench.timestamp);
            if let Some(ref fastest) = bench.fastest {
                let _ = writeln!(output, "  Fastest:     {}", fastest);
            }
        }
        output
    }

    fn format_catalog(&self, catalog: &ModelCatalog, local: &[LocalModel]) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Model Catalog (v{})", catalog.version);
        let _ = writeln!(output, "------------------");
        for model in &catalog.models {
            let mark = if is_downloaded(&model.filename, local) {
                "✓"
            } else {
                " "
            };
            let _ = writeln!(output, "{} {} [{}]", mark, model.id, model.category);
            let _ = writeln!(output, "    {} - {}", model.name, model.description);
            let _ = writeln!(
                output,
                "    Download: {}  RAM: {}  Quantization: {}",
                format_gb(model.download_size_bytes),
                format_gb(model.ram_required_bytes),
                model.quantization
            );
        }
        output
    }

    fn format_local_models(&self, models: &[LocalModel]) -> String {
        if models.is_empty() {
            return "No local models.\n".to_string();
        }
        let mut output = String::new();
        let _ = writeln!(output, "Local Models");
        let _ = writeln!(output, "------------");
        for model in models {
            let _ = writeln!(output, "  {} ({:.0} MB)", model.name, model.size_mb());
            let _ = writeln!(output, "    {}", model.path.display());
        }
        output
    }

    fn format_benchmark(&self, report: &BenchmarkReport) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "Benchmark Results ({})",
            report.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(output, "-----------------");
        for r in &report.results {
            if r.is_completed() {
                let _ = writeln!(
                    output,
                    "  {}: {:.1} tok/s, {:.0}% facts, {:.0} MB, load {:.1}s",
                    r.model_name,
                    r.tokens_per_second,
                    r.fact_retention_score,
                    r.peak_memory_mb,
                    r.load_time_s
                );
            } else {
                let _ = writeln!(output, "  {}: failed ({})", r.model_name, r.errors.join("; "));
            }
        }
        if let Some(fastest) = report.fastest() {
            let _ = writeln!(output, "\nFastest:        {}", fastest.model_name);
        }
        if let Some(best) = report.most_accurate() {
            let _ = writeln!(output, "Most accurate:  {}", best.model_name);
        }
        if let Some(lean) = report.most_efficient() {
            let _ = writeln!(output, "Most efficient: {}", lean.model_name);
        }
        output
    }

    fn format_job(&self, status: &JobStatus) -> String {
        let mut output = format!("{} job: {}", status.kind, status.state);
        if let Some(ref key) = status.key {
            let _ = write!(output, " ({})", key);
        }
        let label = progress_label(&status.progress);
        if !label.is_empty() {
            let _ = write!(output, " {}", label);
        }
        output.push('\n');
        if let Some(ref err) = status.last_error {
            let _ = writeln!(output, "  Error: {}", err);
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
    }
}

impl Formatter for JsonFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        self.render(results)
    }

    fn format_index_report(&self, report: &IndexReport) -> String {
        self.render(report)
    }

    fn format_status(&self, status: &AppStatus) -> String {
        self.render(status)
    }

    fn format_catalog(&self, catalog: &ModelCatalog, local: &[LocalModel]) -> String {
        let models: Vec<serde_json::Value> = catalog
            .models
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "name": m.name,
                    "description": m.description,
                    "category": m.category,
                    "quantization": m.quantization,
                    "download_size_bytes": m.download_size_bytes,
                    "ram_required_bytes": m.ram_required_bytes,
                    "downloaded": is_downloaded(&m.filename, local),
                })
            })
            .collect();
        self.render(&serde_json::json!({ "version": catalog.version, "models": models }))
    }

    fn format_local_models(&self, models: &[LocalModel]) -> String {
        self.render(&serde_json::json!({ "models": models }))
    }

    fn format_benchmark(&self, report: &BenchmarkReport) -> String {
        self.render(report)
    }

    fn format_job(&self, status: &JobStatus) -> String {
        self.render(status)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.is_empty() {
            return format!("## No results found\n\nQuery: `{}`\n", results.query);
        }

        let mut output = String::new();
        let _ = writeln!(output, "## Search Results\n");
        let _ = writeln!(output, "**Query:** `{}`\n", results.query);
        let _ = writeln!(
            output,
            "Found {} results in {}ms\n",
            results.total, results.duration_ms
        );
        if !results.answer.is_empty() {
            let _ = writeln!(output, "### Answer\n");
            let _ = writeln!(output, "{}\n", results.answer);
        }

        for (i, result) in results.results.iter().enumerate() {
            let _ = writeln!(
                output,
                "### {}. {} (relevance {:.3})\n",
                i + 1,
                result.filename,
                result.relevance
            );
            let _ = writeln!(output, "**Location:** `{}`\n", result.document_path);
            if !result.tags.is_empty() {
                let tags: Vec<String> = result.tags.iter().map(|t| format!("`{}`", t)).collect();
                let _ = writeln!(output, "**Tags:** {}\n", tags.join(", "));
            }
            let _ = writeln!(output, "```");
            let _ = writeln!(output, "{}", result.content);
            let _ = writeln!(output, "```\n");
        }

        output
    }

    fn format_index_report(&self, report: &IndexReport) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## Indexing Complete\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Root | `{}` |", report.root);
        let _ = writeln!(output, "| Files scanned | {} |", report.scanned);
        let _ = writeln!(output, "| Files indexed | {} |", report.indexed);
        let _ = writeln!(output, "| Files unchanged | {} |", report.unchanged);
        let _ = writeln!(output, "| Files removed | {} |", report.removed);
        let _ = writeln!(output, "| Files skipped | {} |", report.skipped);
        let _ = writeln!(output, "| Chunks written | {} |", report.chunks_written);
        let _ = writeln!(output, "| Duration | {}ms |", report.duration_ms);
        output
    }

    fn format_status(&self, status: &AppStatus) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## Status\n");
        let _ = writeln!(output, "- **Data dir:** `{}`", status.data_dir.display());
        let _ = writeln!(output, "- **Embedding:** {}", status.embedding_provider);
        let _ = writeln!(output, "- **Generation:** {}", status.generation_provider);
        let _ = writeln!(output, "\n### Index\n");
        let _ = writeln!(output, "- **Documents:** {}", status.index.documents);
        let _ = writeln!(output, "- **Chunks:** {}", status.index.chunks);
        let _ = writeln!(output, "- **Metric:** {}", status.index.metric);
        let _ = writeln!(output, "\n### Local Models\n");
        if status.local_models.is_empty() {
            let _ = writeln!(output, "*None*");
        }
        for model in &status.local_models {
            let _ = writeln!(output, "- `{}` ({:.0} MB)", model.filename, model.size_mb());
        }
        if !status.jobs.is_empty() {
            let _ = writeln!(output, "\n### Jobs\n");
            for job in &status.jobs {
                let _ = writeln!(output, "- **{}:** {}", job.kind, job.state);
            }
        }
        output
    }

    fn format_catalog(&self, catalog: &ModelCatalog, local: &[LocalModel]) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "## Model Catalog\n");
        let _ = writeln!(output, "| Id | Name | Category | Download | RAM | Local |");
        let _ = writeln!(output, "|----|------|----------|----------|-----|-------|");
        for m in &catalog.models {
            let mark = if is_downloaded(&m.filename, local) {
                "✅"
            } else {
                ""
            };
            let _ = writeln!(
                output,
                "| `{}` | {} | {} | {} | {} | {} |",
                m.id,
                m.name,
                m.category,
                format_gb(m.download_size_bytes),
                format_gb(m.ram_required_bytes),
                mark
            );
        }
        output
    }

    fn format_local_models(&self, models: &[LocalModel]) -> String {
        if models.is_empty() {
            return "## Local Models\n\n*No local models.*\n".to_string();
        }
        let mut output = String::new();
        let _ = writeln!(output, "## Local Models\n");
        let _ = writeln!(output, "| Model | Size | Path |");
        let _ = writeln!(output, "|-------|------|------|");
        for m in models {
            let _ = writeln!(
                output,
                "| {} | {:.0} MB | `{}` |",
                m.name,
                m.size_mb(),
                m.path.display()
            );
        }
        output
    }

    fn format_benchmark(&self, report: &BenchmarkReport) -> String {
        report.to_markdown()
    }

    fn format_job(&self, status: &JobStatus) -> String {
        let mut output = format!("**{} job:** {}", status.kind, status.state);
        if let Some(ref err) = status.last_error {
            let _ = write!(output, " ({})", err);
        }
        output.push('\n');
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchResult;

    fn sample_results() -> SearchResults {
        let mut results = SearchResults::new(
            "ownership".to_string(),
            vec![SearchResult {
                chunk_id: "c1".to_string(),
                document_path: "/docs/rust.md".to_string(),
                filename: "rust.md".to_string(),
                sequence: 0,
                content: "x".repeat(300),
                start_offset: 0,
                end_offset: 300,
                distance: 0.1,
                relevance: 0.9,
                tags: vec!["rust".to_string()],
            }],
            12,
        );
        results.answer = "Ownership moves values.".to_string();
        results
    }

    #[test]
    fn test_text_output_shows_answer_and_preview() {
        let out = TextFormatter.format_search_results(&sample_results());
        assert!(out.contains("Answer:"));
        assert!(out.contains("Ownership moves values."));
        assert!(out.contains("[Relevance: 0.900] rust.md"));
        assert!(out.contains(&format!("{}...", "x".repeat(PREVIEW_CHARS))));
    }

    #[test]
    fn test_json_output_is_parseable() {
        let out = JsonFormatter::new(false).format_search_results(&sample_results());
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["results"][0]["filename"], "rust.md");
    }

    #[test]
    fn test_catalog_marks_downloaded_models() {
        let catalog = ModelCatalog::builtin();
        let local = vec![LocalModel {
            id: "phi-2.Q4_K_M".to_string(),
            name: "phi 2 Q4_K_M".to_string(),
            filename: "phi-2.Q4_K_M.gguf".to_string(),
            path: "/models/phi-2.Q4_K_M.gguf".into(),
            size_bytes: 10,
        }];
        let out = JsonFormatter::new(false).format_catalog(&catalog, &local);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        let downloaded: Vec<bool> = value["models"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["downloaded"].as_bool().unwrap())
            .collect();
        assert_eq!(downloaded, vec![false, true, false]);
    }

    #[test]
    fn test_empty_results_message() {
        let out = MarkdownFormatter.format_search_results(&SearchResults::empty("q".into()));
        assert!(out.contains("No results found"));
    }
}
