//! Search-related models for queries and results.

use serde::{Deserialize, Serialize};

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// A single ranked chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,

    /// Absolute path of the owning document
    pub document_path: String,

    pub filename: String,

    pub sequence: u32,

    pub content: String,

    pub start_offset: u64,

    pub end_offset: u64,

    /// Raw distance from the query vector (smaller is closer)
    pub distance: f32,

    /// Distance mapped onto 0.0-1.0, larger is better
    pub relevance: f32,

    pub tags: Vec<String>,
}

/// Ranked results plus the optional synthesized answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,

    pub results: Vec<SearchResult>,

    pub total: u64,

    /// Synthesized answer; empty when synthesis was not requested or failed
    pub answer: String,

    /// Why synthesis produced no answer, when it was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_error: Option<String>,

    pub duration_ms: u64,
}

impl SearchResults {
    pub fn new(query: String, results: Vec<SearchResult>, duration_ms: u64) -> Self {
        let total = results.len() as u64;
        Self {
            query,
            results,
            total,
            answer: String::new(),
            synthesis_error: None,
            duration_ms,
        }
    }

    pub fn empty(query: String) -> Self {
        Self::new(query, Vec::new(), 0)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}
