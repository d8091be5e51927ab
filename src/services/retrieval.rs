//! Query embedding, ranking and best-effort answer synthesis.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::embedding::Embedder;
use super::generation::{GenerationOptions, Generator};
use super::vector_store::{DistanceMetric, ScoredChunk, VectorStore};
use crate::error::SearchError;
use crate::models::{SearchResult, SearchResults};

pub const NO_ANSWER: &str = "I couldn't find the answer in the documents.";

const STOP_SEQUENCES: [&str; 3] = ["System:", "Question:", "Context:"];

/// Prompt asking for an answer grounded only in `contexts`.
pub fn synthesis_prompt(question: &str, contexts: &[&str]) -> String {
    format!(
        "System: You are a helpful assistant. Answer the question using ONLY the context below. \
         If the context does not contain the answer, reply \"{}\"\n\n\
         Context:\n{}\n\n\
         Question: {}\n\n\
         Answer:",
        NO_ANSWER,
        contexts.join("\n\n"),
        question
    )
}

pub fn synthesis_options() -> GenerationOptions {
    GenerationOptions {
        max_tokens: 256,
        temperature: 0.3,
        stop: Vec::new(),
    }
    .with_stop(&STOP_SEQUENCES)
}

fn to_result(hit: ScoredChunk, metric: DistanceMetric) -> SearchResult {
    let chunk = hit.chunk;
    let filename = std::path::Path::new(&chunk.document_id)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| chunk.document_id.clone());
    SearchResult {
        chunk_id: chunk.id,
        filename,
        sequence: chunk.sequence,
        content: chunk.text,
        start_offset: chunk.start_offset,
        end_offset: chunk.end_offset,
        distance: hit.distance,
        relevance: metric.relevance(hit.distance),
        tags: chunk.tags,
        document_path: chunk.document_id,
    }
}

#[derive(Clone)]
pub struct RetrievalEngine {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    generator: Option<Arc<dyn Generator>>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            generator: None,
        }
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Option<Arc<dyn Generator>>) -> Self {
        self.generator = generator;
        self
    }

    /// Rank the `k` closest chunks for `query` and optionally synthesize an
    /// answer from them. A synthesis failure never fails the search.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        want_synthesis: bool,
    ) -> Result<SearchResults, SearchError> {
        let started = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery("query is empty".to_string()));
        }
        if k == 0 {
            return Err(SearchError::InvalidQuery(
                "result count must be at least 1".to_string(),
            ));
        }

        if self.store.is_empty() {
            debug!("search against empty index");
            let mut results = SearchResults::empty(query.to_string());
            results.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(results);
        }

        let vector = self.embedder.embed(query).await?;
        let metric = self.store.metric();
        let ranked: Vec<SearchResult> = self
            .store
            .search(&vector, k)?
            .into_iter()
            .map(|hit| to_result(hit, metric))
            .collect();

        let mut results = SearchResults::new(query.to_string(), ranked, 0);
        if want_synthesis && !results.is_empty() {
            match self.synthesize(query, &results.results).await {
                Ok(answer) => results.answer = answer,
                Err(reason) => {
                    warn!(error = %reason, "answer synthesis unavailable");
                    results.synthesis_error = Some(reason);
                }
            }
        }
        results.duration_ms = started.elapsed().as_millis() as u64;
        Ok(results)
    }

    async fn synthesize(&self, query: &str, hits: &[SearchResult]) -> Result<String, String> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| "no generation provider configured".to_string())?;

        let contexts: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        let prompt = synthesis_prompt(query, &contexts);
        let generation = generator
            .generate(&prompt, &synthesis_options())
            .await
            .map_err(|e| e.to_string())?;
        debug!(provider = %generator.name(), tokens = ?generation.tokens, "answer synthesized");
        Ok(generation.text.trim().to_string())
    }
}
