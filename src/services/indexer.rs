//! Incremental indexing of a folder into the vector store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::chunker::TextChunker;
use super::embedding::Embedder;
use super::jobs::JobContext;
use super::vector_store::VectorStore;
use crate::error::IndexError;
use crate::models::{Chunk, Document, IndexingConfig, JobProgress};
use crate::utils::{
    FileLock, calculate_checksum, file_stamp, is_excluded, is_text_file, keyword_tags,
    read_file_content,
};

const TAGS_PER_DOCUMENT: usize = 5;

/// Turns a file on disk into plain text.
pub trait TextExtractor: Send + Sync {
    fn supports(&self, path: &Path) -> bool;

    fn extract(&self, path: &Path, max_size: u64) -> std::io::Result<String>;
}

/// Reads anything that looks like text, lossily decoded as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn supports(&self, path: &Path) -> bool {
        is_text_file(path)
    }

    fn extract(&self, path: &Path, max_size: u64) -> std::io::Result<String> {
        read_file_content(path, max_size)
    }
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub root: String,
    pub scanned: u64,
    pub indexed: u64,
    pub unchanged: u64,
    pub removed: u64,
    pub skipped: u64,
    pub chunks_written: u64,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct Indexer {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
    chunker: TextChunker,
    config: IndexingConfig,
    batch_size: usize,
    index_path: PathBuf,
}

/// Files to index, plus paths that were skipped but still exist. Records
/// under a kept path survive the removal sweep.
#[derive(Default)]
struct Scan {
    files: Vec<PathBuf>,
    kept: Vec<PathBuf>,
}

enum FileOutcome {
    Indexed(u64),
    Unchanged,
    Skipped,
}

impl Indexer {
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: &IndexingConfig,
        batch_size: usize,
        index_path: PathBuf,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor: Arc::new(PlainTextExtractor),
            chunker: TextChunker::from_config(config),
            config: config.clone(),
            batch_size: batch_size.max(1),
            index_path,
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .index_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.index_path.with_file_name(name)
    }

    /// Claim the on-disk index for writing. Fails with `Locked` while another
    /// indexer, in any process, holds it.
    pub fn lock(&self) -> Result<FileLock, IndexError> {
        let path = self.lock_path();
        FileLock::try_acquire(&path)?.ok_or(IndexError::Locked(path))
    }

    /// Lock the index, then [`run_locked`](Self::run_locked).
    pub async fn run(&self, root: &Path, ctx: &JobContext) -> Result<IndexReport, IndexError> {
        let lock = self.lock()?;
        self.run_locked(&lock, root, ctx).await
    }

    /// Scan `root`, bring the store up to date and persist it.
    ///
    /// The store is first refreshed from disk so that work persisted by an
    /// earlier holder of `lock` is not overwritten. The snapshot is written
    /// whatever the outcome, so documents committed before a cancellation or
    /// failure are kept.
    pub async fn run_locked(
        &self,
        lock: &FileLock,
        root: &Path,
        ctx: &JobContext,
    ) -> Result<IndexReport, IndexError> {
        let started = Instant::now();
        let root = root.canonicalize()?;
        debug!(lock = %lock.path().display(), "index lock held");
        self.store.reload(&self.index_path);
        let mut report = IndexReport {
            root: root.to_string_lossy().to_string(),
            ..Default::default()
        };

        let outcome = self.sync(&root, ctx, &mut report).await;
        report.duration_ms = started.elapsed().as_millis() as u64;

        let persisted = self.store.persist(&self.index_path);
        match (&outcome, persisted) {
            (_, Ok(())) => {}
            (Ok(()), Err(e)) => return Err(e),
            (Err(_), Err(e)) => warn!(error = %e, "failed to persist index after interrupted run"),
        }
        outcome?;

        info!(
            root = %report.root,
            indexed = report.indexed,
            unchanged = report.unchanged,
            removed = report.removed,
            skipped = report.skipped,
            chunks = report.chunks_written,
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    async fn sync(
        &self,
        root: &Path,
        ctx: &JobContext,
        report: &mut IndexReport,
    ) -> Result<(), IndexError> {
        self.store.ensure_signature(&self.embedder.signature());

        ctx.set_message("scanning");
        let Scan { files, kept } = self.collect_files(root, report)?;
        let total = files.len() as u64;
        report.scanned = total;
        ctx.set_message("indexing");

        let mut seen = HashSet::with_capacity(files.len());
        for (done, path) in files.iter().enumerate() {
            ctx.checkpoint().map_err(|_| IndexError::Cancelled)?;
            let key = path.to_string_lossy().to_string();
            ctx.set_progress(JobProgress::Items {
                done: done as u64,
                total,
                current: Some(key.clone()),
            });

            match self.index_file(path, &key, ctx).await? {
                FileOutcome::Indexed(chunks) => {
                    report.indexed += 1;
                    report.chunks_written += chunks;
                }
                FileOutcome::Unchanged => report.unchanged += 1,
                FileOutcome::Skipped => report.skipped += 1,
            }
            // skipped files keep their previous record
            seen.insert(key);
        }

        for path in self.store.document_paths() {
            let doc_path = Path::new(&path);
            let still_present = seen.contains(&path) || kept.iter().any(|k| doc_path.starts_with(k));
            if doc_path.starts_with(root) && !still_present {
                self.store.remove_document(&path);
                report.removed += 1;
                debug!(path = %path, "removed missing document");
            }
        }

        ctx.set_progress(JobProgress::Items {
            done: total,
            total,
            current: None,
        });
        Ok(())
    }

    fn collect_files(&self, root: &Path, report: &mut IndexReport) -> Result<Scan, IndexError> {
        if root.is_file() {
            return Ok(Scan {
                files: vec![root.to_path_buf()],
                kept: Vec::new(),
            });
        }
        if !root.is_dir() {
            return Err(IndexError::WalkError(format!(
                "not a file or directory: {}",
                root.display()
            )));
        }

        let mut scan = Scan::default();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    report.skipped += 1;
                    if let Some(path) = e.path() {
                        scan.kept.push(path.to_path_buf());
                    }
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || is_excluded(path, &self.config.exclude_patterns) {
                continue;
            }
            let too_large = entry
                .metadata()
                .map(|m| m.len() > self.config.max_file_size)
                .unwrap_or(true);
            if too_large || !self.extractor.supports(path) {
                report.skipped += 1;
                scan.kept.push(path.to_path_buf());
                continue;
            }
            scan.files.push(path.to_path_buf());
        }
        Ok(scan)
    }

    async fn index_file(
        &self,
        path: &Path,
        key: &str,
        ctx: &JobContext,
    ) -> Result<FileOutcome, IndexError> {
        let stamp = match file_stamp(path) {
            Ok(stamp) => stamp,
            Err(e) => {
                debug!(path = %key, error = %e, "cannot stat file");
                return Ok(FileOutcome::Skipped);
            }
        };

        let existing = self.store.document(key);
        if existing
            .as_ref()
            .is_some_and(|d| d.is_unchanged(stamp.size_bytes, stamp.modified_ms))
        {
            return Ok(FileOutcome::Unchanged);
        }

        let text = match self.extractor.extract(path, self.config.max_file_size) {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %key, error = %e, "extraction failed");
                return Ok(FileOutcome::Skipped);
            }
        };

        let hash = calculate_checksum(&text);
        if existing.as_ref().is_some_and(|d| d.content_hash == hash) {
            self.store.restamp(key, stamp.size_bytes, stamp.modified_ms);
            return Ok(FileOutcome::Unchanged);
        }

        let spans = self.chunker.chunk(&text);
        let tags = spans
            .first()
            .map(|s| keyword_tags(&s.text, TAGS_PER_DOCUMENT))
            .unwrap_or_default();

        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            ctx.checkpoint().map_err(|_| IndexError::Cancelled)?;
            vectors.extend(self.embedder.embed_batch(batch).await?);
        }
        if vectors.len() != spans.len() {
            return Err(IndexError::InvalidDocument(format!(
                "{} chunks but {} embeddings for {}",
                spans.len(),
                vectors.len(),
                key
            )));
        }

        let chunks: Vec<Chunk> = spans
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(seq, (span, vector))| {
                Chunk::new(key, seq as u32, span.text, span.start as u64, span.end as u64)
                    .with_tags(tags.clone())
                    .with_embedding(vector)
            })
            .collect();
        let count = chunks.len() as u64;

        let document = Document::new(key, stamp.size_bytes, stamp.modified_ms, hash);
        self.store.upsert_document(document, chunks)?;
        debug!(path = %key, chunks = count, "indexed");
        Ok(FileOutcome::Indexed(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbeddingError;
    use crate::models::JobKind;
    use crate::services::jobs::detached_context;
    use crate::services::vector_store::DistanceMetric;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};

    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
        texts: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimension(&self) -> usize {
            3
        }

        fn provider_id(&self) -> String {
            "test:counting".to_string()
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EmbeddingError::Unavailable {
                    attempts: 3,
                    last_error: "connection refused".to_string(),
                });
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, t.matches('e').count() as f32])
                .collect())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<VectorStore>,
        embedder: Arc<CountingEmbedder>,
        indexer: Indexer,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        let store = Arc::new(VectorStore::new(DistanceMetric::Cosine));
        let embedder = Arc::new(CountingEmbedder::default());
        let indexer = Indexer::new(
            Arc::clone(&store),
            embedder.clone(),
            &IndexingConfig::default(),
            4,
            dir.path().join("index.db"),
        );
        Fixture {
            dir,
            store,
            embedder,
            indexer,
        }
    }

    impl Fixture {
        fn docs(&self) -> PathBuf {
            self.dir.path().join("docs")
        }

        async fn run(&self) -> Result<IndexReport, IndexError> {
            self.indexer
                .run(&self.docs(), &detached_context(JobKind::Index))
                .await
        }
    }

    #[tokio::test]
    async fn test_long_document_splits_with_overlap() {
        let fx = fixture();
        std::fs::write(fx.docs().join("long.txt"), "a".repeat(1500)).unwrap();

        let report = fx.run().await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.chunks_written, 2);

        let hits = fx.store.search(&[1.0, 1.0, 0.0], 10).unwrap();
        let mut offsets: Vec<_> = hits
            .iter()
            .map(|h| (h.chunk.sequence, h.chunk.start_offset, h.chunk.end_offset))
            .collect();
        offsets.sort();
        assert_eq!(offsets, vec![(0, 0, 1000), (1, 800, 1500)]);
    }

    #[tokio::test]
    async fn test_unchanged_files_are_not_reembedded() {
        let fx = fixture();
        std::fs::write(fx.docs().join("a.txt"), "the quick brown fox").unwrap();
        std::fs::write(fx.docs().join("b.md"), "# notes\n\nembedding vectors everywhere").unwrap();

        let first = fx.run().await.unwrap();
        assert_eq!(first.indexed, 2);
        let calls = fx.embedder.calls.load(Ordering::SeqCst);
        assert!(calls > 0);

        let second = fx.run().await.unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_touched_file_with_same_content_is_restamped() {
        let fx = fixture();
        let path = fx.docs().join("a.txt");
        std::fs::write(&path, "stable content here").unwrap();
        fx.run().await.unwrap();
        let calls = fx.embedder.calls.load(Ordering::SeqCst);

        let later = SystemTime::now() + Duration::from_secs(120);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let report = fx.run().await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), calls);

        let key = path.canonicalize().unwrap().to_string_lossy().to_string();
        let stamp = file_stamp(&path).unwrap();
        assert_eq!(fx.store.document(&key).unwrap().modified_ms, stamp.modified_ms);
    }

    #[tokio::test]
    async fn test_deleted_file_leaves_no_results() {
        let fx = fixture();
        let gone = fx.docs().join("gone.txt");
        std::fs::write(&gone, "temporary document about rust").unwrap();
        std::fs::write(fx.docs().join("kept.txt"), "permanent document").unwrap();
        fx.run().await.unwrap();
        let gone_key = gone.canonicalize().unwrap().to_string_lossy().to_string();

        std::fs::remove_file(&gone).unwrap();
        let report = fx.run().await.unwrap();
        assert_eq!(report.removed, 1);

        let hits = fx.store.search(&[1.0, 1.0, 1.0], 100).unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.chunk.document_id != gone_key));
        assert!(fx.store.document(&gone_key).is_none());
    }

    #[tokio::test]
    async fn test_excluded_binary_and_empty_files() {
        let fx = fixture();
        std::fs::create_dir_all(fx.docs().join("node_modules/pkg")).unwrap();
        std::fs::write(fx.docs().join("node_modules/pkg/readme.md"), "ignored").unwrap();
        std::fs::write(fx.docs().join("image.png"), [0u8, 1, 2, 3]).unwrap();
        std::fs::write(fx.docs().join("blank.txt"), "   \n\n  ").unwrap();
        std::fs::write(fx.docs().join("real.txt"), "real words in a file").unwrap();

        let report = fx.run().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.chunks_written, 1);

        let stats = fx.store.stats();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.chunks, stats.entries);
    }

    #[tokio::test]
    async fn test_tags_come_from_first_chunk() {
        let fx = fixture();
        std::fs::write(
            fx.docs().join("tagged.txt"),
            "Kubernetes clusters schedule containers. Kubernetes nodes run containers.",
        )
        .unwrap();
        fx.run().await.unwrap();

        let hits = fx.store.search(&[1.0, 0.0, 0.0], 1).unwrap();
        let tags = &hits[0].chunk.tags;
        assert_eq!(tags[0], "kubernetes");
        assert!(tags.contains(&"containers".to_string()));
        assert!(tags.len() <= TAGS_PER_DOCUMENT);
    }

    #[tokio::test]
    async fn test_cancelled_run_still_persists() {
        let fx = fixture();
        std::fs::write(fx.docs().join("a.txt"), "some content").unwrap();

        let ctx = detached_context(JobKind::Index);
        ctx.request_cancel();
        let err = fx.indexer.run(&fx.docs(), &ctx).await.unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
        assert!(fx.dir.path().join("index.db").exists());
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_committed_documents() {
        let fx = fixture();
        std::fs::write(fx.docs().join("a.txt"), "first document").unwrap();
        fx.run().await.unwrap();

        std::fs::write(fx.docs().join("b.txt"), "second document").unwrap();
        fx.embedder.fail.store(true, Ordering::SeqCst);
        let err = fx.run().await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::Embedding(EmbeddingError::Unavailable { .. })
        ));

        let reloaded = VectorStore::load(&fx.dir.path().join("index.db"), DistanceMetric::Cosine);
        assert_eq!(reloaded.stats().documents, 1);
    }

    #[tokio::test]
    async fn test_oversized_file_keeps_previous_record() {
        let fx = fixture();
        let config = IndexingConfig {
            max_file_size: 100,
            ..IndexingConfig::default()
        };
        let indexer = Indexer::new(
            Arc::clone(&fx.store),
            fx.embedder.clone(),
            &config,
            4,
            fx.dir.path().join("index.db"),
        );
        let ctx = detached_context(JobKind::Index);
        let path = fx.docs().join("a.txt");
        std::fs::write(&path, "short enough to index").unwrap();
        indexer.run(&fx.docs(), &ctx).await.unwrap();

        std::fs::write(&path, "x".repeat(400)).unwrap();
        let report = indexer.run(&fx.docs(), &ctx).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(fx.store.stats().documents, 1);
    }

    #[tokio::test]
    async fn test_index_lock_shuts_out_other_writers() {
        let fx = fixture();
        std::fs::write(fx.docs().join("a.txt"), "some content").unwrap();
        let other = Indexer::new(
            Arc::new(VectorStore::default()),
            fx.embedder.clone(),
            &IndexingConfig::default(),
            4,
            fx.dir.path().join("index.db"),
        );

        let held = fx.indexer.lock().unwrap();
        let err = other
            .run(&fx.docs(), &detached_context(JobKind::Index))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Locked(_)));
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), 0);

        drop(held);
        other
            .run(&fx.docs(), &detached_context(JobKind::Index))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_indexers_on_stale_snapshots_keep_each_others_work() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("index.db");
        let embedder = Arc::new(CountingEmbedder::default());
        for (root, file) in [("a", "1.txt"), ("b", "2.txt")] {
            std::fs::create_dir_all(dir.path().join(root)).unwrap();
            std::fs::write(dir.path().join(root).join(file), format!("{root} text")).unwrap();
        }

        // both loaded before either run, as two processes would
        let first = Indexer::new(
            Arc::new(VectorStore::load(&index_path, DistanceMetric::Cosine)),
            embedder.clone(),
            &IndexingConfig::default(),
            4,
            index_path.clone(),
        );
        let second = Indexer::new(
            Arc::new(VectorStore::load(&index_path, DistanceMetric::Cosine)),
            embedder.clone(),
            &IndexingConfig::default(),
            4,
            index_path.clone(),
        );

        let ctx = detached_context(JobKind::Index);
        first.run(&dir.path().join("a"), &ctx).await.unwrap();
        second.run(&dir.path().join("b"), &ctx).await.unwrap();

        let on_disk = VectorStore::load(&index_path, DistanceMetric::Cosine);
        assert_eq!(on_disk.stats().documents, 2);
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let fx = fixture();
        for i in 0..3 {
            std::fs::write(fx.docs().join(format!("{i}.txt")), format!("file {i}")).unwrap();
        }
        let ctx = detached_context(JobKind::Index);
        fx.indexer.run(&fx.docs(), &ctx).await.unwrap();
        assert_eq!(ctx.progress().percent(), Some(100));
        assert_eq!(fx.embedder.texts.load(Ordering::SeqCst), 3);
    }
}
