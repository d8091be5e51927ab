//! Vector index plus document/chunk metadata, kept consistent under one lock.
//!
//! Every index entry has exactly one chunk record and vice versa. Writers
//! validate a whole document before touching shared state, so a rejected
//! upsert leaves the previous chunks for that document in place.

mod flat;
mod sqlite;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

pub use flat::{DistanceMetric, FlatIndex};
pub use sqlite::FORMAT_VERSION;

use crate::error::IndexError;
use crate::models::{Chunk, ChunkKey, Document};
use crate::services::embedding::ProviderSignature;

#[derive(Debug, Default)]
pub(crate) struct IndexState {
    index: FlatIndex,
    documents: BTreeMap<String, Document>,
    /// Chunk records without their vectors; vectors live in `index`.
    chunks: BTreeMap<ChunkKey, Chunk>,
    signature: Option<ProviderSignature>,
}

impl IndexState {
    fn new(metric: DistanceMetric) -> Self {
        Self {
            index: FlatIndex::new(metric),
            ..Default::default()
        }
    }

    fn document_keys(&self, path: &str) -> Vec<ChunkKey> {
        self.chunks
            .range(ChunkKey::new(path, 0)..=ChunkKey::new(path, u32::MAX))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn expected_dimension(&self) -> Option<usize> {
        self.index
            .dimension()
            .or_else(|| self.signature.as_ref().map(|s| s.dimension))
    }

    fn clear(&mut self) {
        self.index.clear();
        self.documents.clear();
        self.chunks.clear();
    }
}

/// A chunk returned from a search, with its raw distance.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub entries: usize,
    pub dimension: Option<usize>,
    pub metric: DistanceMetric,
    pub signature: Option<ProviderSignature>,
}

/// Owner of chunk vectors and document/chunk metadata.
#[derive(Debug)]
pub struct VectorStore {
    state: RwLock<IndexState>,
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new(DistanceMetric::default())
    }
}

impl VectorStore {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            state: RwLock::new(IndexState::new(metric)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace every chunk of `document` with `chunks` in one step.
    ///
    /// Each chunk must carry an embedding of the index dimension. On any
    /// validation error nothing is changed.
    pub fn upsert_document(
        &self,
        mut document: Document,
        chunks: Vec<Chunk>,
    ) -> Result<(), IndexError> {
        let mut state = self.write();

        let mut expected = state.expected_dimension();
        for chunk in &chunks {
            if chunk.document_id != document.path {
                return Err(IndexError::InvalidDocument(format!(
                    "chunk {} belongs to {}, not {}",
                    chunk.sequence, chunk.document_id, document.path
                )));
            }
            if chunk.embedding.is_empty() {
                return Err(IndexError::InvalidDocument(format!(
                    "chunk {} of {} has no embedding",
                    chunk.sequence, document.path
                )));
            }
            match expected {
                Some(dim) if dim != chunk.embedding.len() => {
                    return Err(IndexError::ProviderMismatch {
                        expected: dim,
                        found: chunk.embedding.len(),
                    });
                }
                None => expected = Some(chunk.embedding.len()),
                _ => {}
            }
        }

        for key in state.document_keys(&document.path) {
            state.index.remove(&key);
            state.chunks.remove(&key);
        }

        document.chunk_count = chunks.len() as u32;
        for mut chunk in chunks {
            let key = chunk.key();
            let vector = std::mem::take(&mut chunk.embedding);
            state.index.insert(key.clone(), vector);
            state.chunks.insert(key, chunk);
        }
        debug!(path = %document.path, chunks = document.chunk_count, "document upserted");
        state.documents.insert(document.path.clone(), document);
        Ok(())
    }

    /// Delete a document with all its chunks. Returns whether it existed.
    pub fn remove_document(&self, path: &str) -> bool {
        let mut state = self.write();
        for key in state.document_keys(path) {
            state.index.remove(&key);
            state.chunks.remove(&key);
        }
        state.documents.remove(path).is_some()
    }

    /// The `k` nearest chunks, ascending by distance, ties by (document, sequence).
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let state = self.read();
        if state.index.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(dim) = state.index.dimension() {
            if dim != query.len() {
                return Err(IndexError::ProviderMismatch {
                    expected: dim,
                    found: query.len(),
                });
            }
        }

        state
            .index
            .search(query, k)
            .into_iter()
            .map(|(key, distance)| {
                let chunk = state.chunks.get(&key).cloned().ok_or_else(|| {
                    IndexError::Corrupt(format!(
                        "index entry {}#{} has no chunk record",
                        key.document_id, key.sequence
                    ))
                })?;
                Ok(ScoredChunk { chunk, distance })
            })
            .collect()
    }

    pub fn metric(&self) -> DistanceMetric {
        self.read().index.metric()
    }

    pub fn signature(&self) -> Option<ProviderSignature> {
        self.read().signature.clone()
    }

    /// Bind the index to `signature`. A different signature purges every
    /// document so the next run re-embeds everything. Returns whether a purge
    /// happened.
    pub fn ensure_signature(&self, signature: &ProviderSignature) -> bool {
        let mut state = self.write();
        let stale = match &state.signature {
            Some(current) => current != signature,
            None => state
                .index
                .dimension()
                .is_some_and(|dim| dim != signature.dimension),
        };
        if stale {
            warn!(
                previous = ?state.signature,
                current = %signature,
                documents = state.documents.len(),
                "embedding provider changed, purging index"
            );
            state.clear();
        }
        state.signature = Some(signature.clone());
        stale
    }

    pub fn reset(&self) {
        let mut state = self.write();
        state.clear();
        state.signature = None;
    }

    pub fn document(&self, path: &str) -> Option<Document> {
        self.read().documents.get(path).cloned()
    }

    pub fn document_paths(&self) -> Vec<String> {
        self.read().documents.keys().cloned().collect()
    }

    /// Record a new size/mtime for a document whose content is unchanged.
    pub fn restamp(&self, path: &str, size_bytes: u64, modified_ms: i64) -> bool {
        let mut state = self.write();
        match state.documents.get_mut(path) {
            Some(doc) => {
                doc.size_bytes = size_bytes;
                doc.modified_ms = modified_ms;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.read();
        IndexStats {
            documents: state.documents.len(),
            chunks: state.chunks.len(),
            entries: state.index.len(),
            dimension: state.expected_dimension(),
            metric: state.index.metric(),
            signature: state.signature.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read().index.is_empty()
    }

    /// Write a snapshot of the whole store to `path`.
    pub fn persist(&self, path: &Path) -> Result<(), IndexError> {
        let state = self.read();
        sqlite::write(&state, path)?;
        info!(
            path = %path.display(),
            documents = state.documents.len(),
            chunks = state.chunks.len(),
            "index persisted"
        );
        Ok(())
    }

    /// Swap in the snapshot at `path` if one is readable. Returns whether the
    /// state was replaced; otherwise the current state stays.
    pub fn reload(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        match sqlite::read(path) {
            Ok(fresh) => {
                let mut state = self.write();
                *state = fresh;
                debug!(
                    path = %path.display(),
                    documents = state.documents.len(),
                    "index reloaded"
                );
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index snapshot unusable, keeping current state");
                false
            }
        }
    }

    /// Restore a snapshot. A missing, unreadable or foreign-version file
    /// yields an empty store using `metric`.
    pub fn load(path: &Path, metric: DistanceMetric) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "no index snapshot, starting empty");
            return Self::new(metric);
        }
        match sqlite::read(path) {
            Ok(state) => {
                info!(
                    path = %path.display(),
                    documents = state.documents.len(),
                    chunks = state.chunks.len(),
                    "index loaded"
                );
                Self {
                    state: RwLock::new(state),
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index snapshot unusable, starting empty");
                Self::new(metric)
            }
        }
    }
}
