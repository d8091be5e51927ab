//! Model catalog, resumable downloads, admission control and local inventory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{Client, StatusCode, header};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::jobs::{JobContext, JobOrchestrator};
use super::resources::{ResourceProbe, format_gb};
use crate::error::{JobError, ModelError};
use crate::models::{
    JobKind, JobProgress, JobStatus, LocalModel, ModelCatalog, ModelDescriptor, display_name,
};
use crate::utils::{FileLock, RetryConfig, with_retry};

const MODEL_EXTENSION: &str = "gguf";
const GGUF_MAGIC: &[u8; 4] = b"GGUF";
const PARTIAL_DIR: &str = ".partial";
const DOWNLOAD_LOCK: &str = "download.lock";
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Tracks models that are currently loaded by someone.
#[derive(Debug, Clone, Default)]
pub struct ModelLeases {
    held: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

/// Released when dropped.
#[derive(Debug)]
pub struct ModelLease {
    leases: ModelLeases,
    path: PathBuf,
}

impl ModelLeases {
    pub fn acquire(&self, path: &Path) -> ModelLease {
        let path = normalize(path);
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        *held.entry(path.clone()).or_insert(0) += 1;
        ModelLease {
            leases: self.clone(),
            path,
        }
    }

    pub fn is_leased(&self, path: &Path) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.get(&normalize(path)).is_some_and(|n| *n > 0)
    }

    /// Delete `path` unless it is leased. The check and the unlink happen
    /// under the lease table lock, so no lease can be taken in between.
    pub fn remove_unleased(&self, path: &Path) -> Result<(), ModelError> {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.get(&normalize(path)).is_some_and(|n| *n > 0) {
            return Err(ModelError::InUse(path.to_path_buf()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        let mut held = self.leases.held.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(n) = held.get_mut(&self.path) {
            *n -= 1;
            if *n == 0 {
                held.remove(&self.path);
            }
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    catalog: ModelCatalog,
    jobs: JobOrchestrator,
    probe: Arc<dyn ResourceProbe>,
    leases: ModelLeases,
    client: Client,
    retry: RetryConfig,
}

impl ModelManager {
    pub fn new(
        models_dir: PathBuf,
        catalog: ModelCatalog,
        jobs: JobOrchestrator,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        Self {
            models_dir,
            catalog,
            jobs,
            probe,
            leases: ModelLeases::default(),
            client: Client::new(),
            retry: RetryConfig::new(3).with_initial_delay(Duration::from_secs(1)),
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn leases(&self) -> &ModelLeases {
        &self.leases
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.jobs.status(JobKind::Download)
    }

    fn partial_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.models_dir
            .join(PARTIAL_DIR)
            .join(format!("{}.part", descriptor.filename))
    }

    /// Start downloading a catalog model in the background.
    pub fn download(
        &self,
        model_id: &str,
    ) -> Result<JoinHandle<Result<LocalModel, JobError>>, ModelError> {
        let descriptor = self
            .catalog
            .get(model_id)
            .cloned()
            .ok_or_else(|| ModelError::UnknownModel(model_id.to_string()))?;

        if self.jobs.is_running(JobKind::Download) {
            return Err(ModelError::AlreadyDownloading);
        }

        let target = self.models_dir.join(&descriptor.filename);
        if target.exists() {
            return Err(ModelError::AlreadyPresent(target));
        }

        self.admit(&descriptor)?;

        // one download per models directory, across processes
        let lock = FileLock::try_acquire(&self.models_dir.join(PARTIAL_DIR).join(DOWNLOAD_LOCK))?
            .ok_or(ModelError::AlreadyDownloading)?;

        let partial = self.partial_path(&descriptor);
        let client = self.client.clone();
        let retry = self.retry.clone();
        let key = descriptor.id.clone();

        self.jobs
            .start(JobKind::Download, Some(key), move |ctx| async move {
                let _lock = lock;
                transfer(&ctx, &client, &retry, &descriptor, &partial, &target)
                    .await
                    .map_err(JobError::from)
            })
            .map_err(|e| match e {
                JobError::AlreadyRunning(_) => ModelError::AlreadyDownloading,
                other => ModelError::Download(other.to_string()),
            })
    }

    /// Reject a download the host cannot hold before any byte is fetched.
    fn admit(&self, descriptor: &ModelDescriptor) -> Result<(), ModelError> {
        let available_ram = self.probe.available_memory();
        if descriptor.ram_required_bytes > available_ram {
            return Err(ModelError::InsufficientResources(format!(
                "{} needs {} of RAM, only {} available",
                descriptor.name,
                format_gb(descriptor.ram_required_bytes),
                format_gb(available_ram)
            )));
        }

        let already = std::fs::metadata(self.partial_path(descriptor))
            .map(|m| m.len())
            .unwrap_or(0);
        let needed = descriptor.download_size_bytes.saturating_sub(already);
        match self.probe.available_disk(&self.models_dir) {
            Some(free) if needed > free => Err(ModelError::InsufficientResources(format!(
                "{} needs {} of disk space, only {} free",
                descriptor.name,
                format_gb(needed),
                format_gb(free)
            ))),
            Some(_) => Ok(()),
            None => {
                debug!(dir = %self.models_dir.display(), "free disk space unknown, skipping check");
                Ok(())
            }
        }
    }

    /// Every `*.gguf` in the models directory, catalog or not, by filename.
    pub fn list_local(&self) -> Result<Vec<LocalModel>, ModelError> {
        let entries = match std::fs::read_dir(&self.models_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut models = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let is_model = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION));
            if !is_model || !entry.file_type()?.is_file() {
                continue;
            }
            models.push(local_model(&path, entry.metadata()?.len()));
        }
        models.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(models)
    }

    /// Remove a local model file.
    pub fn delete(&self, path: &Path) -> Result<LocalModel, ModelError> {
        let target = normalize(path);
        let model = self
            .list_local()?
            .into_iter()
            .find(|m| normalize(&m.path) == target)
            .ok_or_else(|| ModelError::NotFound(path.to_path_buf()))?;

        self.leases.remove_unleased(&model.path)?;
        info!(model = %model.id, "deleted local model");
        Ok(model)
    }
}

fn local_model(path: &Path, size_bytes: u64) -> LocalModel {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.clone());
    LocalModel {
        name: display_name(&id),
        id,
        filename,
        path: path.to_path_buf(),
        size_bytes,
    }
}

/// Fetch into `partial`, verify, then move into place at `target`.
async fn transfer(
    ctx: &JobContext,
    client: &Client,
    retry: &RetryConfig,
    descriptor: &ModelDescriptor,
    partial: &Path,
    target: &Path,
) -> Result<LocalModel, ModelError> {
    if let Some(dir) = partial.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    info!(model = %descriptor.id, url = %descriptor.url, "download started");

    let fetched = with_retry(retry, || fetch(ctx, client, &descriptor.url, partial))
        .await
        .into_result();
    match fetched {
        Ok(()) => {}
        Err(ModelError::Cancelled) => {
            info!(model = %descriptor.id, partial = %partial.display(), "download cancelled, partial data kept");
            return Err(ModelError::Cancelled);
        }
        Err(e) => return Err(e),
    }

    ctx.set_message("verifying");
    if let Err(e) = verify(partial).await {
        warn!(model = %descriptor.id, error = %e, "downloaded file rejected");
        let _ = tokio::fs::remove_file(partial).await;
        return Err(e);
    }

    tokio::fs::rename(partial, target).await?;
    let size = tokio::fs::metadata(target).await?.len();
    info!(model = %descriptor.id, size, "download complete");
    Ok(local_model(target, size))
}

/// One transfer attempt, resuming from whatever `partial` already holds.
async fn fetch(
    ctx: &JobContext,
    client: &Client,
    url: &str,
    partial: &Path,
) -> Result<(), ModelError> {
    ctx.checkpoint().map_err(|_| ModelError::Cancelled)?;

    let offset = tokio::fs::metadata(partial)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    let mut request = client.get(url);
    if offset > 0 {
        request = request.header(header::RANGE, format!("bytes={}-", offset));
    }
    let response = request.send().await?;
    let status = response.status();

    if offset > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
        debug!(offset, "server reports nothing left to fetch");
        return Ok(());
    }
    if !status.is_success() {
        return Err(ModelError::Download(format!("HTTP {} from {}", status, url)));
    }

    let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
    let mut downloaded = if resumed { offset } else { 0 };
    let total = response.content_length().map(|len| len + downloaded);
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(resumed)
        .truncate(!resumed)
        .open(partial)
        .await?;
    if offset > 0 {
        debug!(offset, resumed, "resuming download");
    }

    let started = Instant::now();
    let base = downloaded;
    let mut last_report = Instant::now();
    let mut stream = response.bytes_stream();

    while let Some(piece) = stream.next().await {
        if ctx.is_cancelled() {
            file.flush().await?;
            return Err(ModelError::Cancelled);
        }
        let piece = piece?;
        file.write_all(&piece).await?;
        downloaded += piece.len() as u64;

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            ctx.set_progress(bytes_progress(downloaded, total, base, started));
            last_report = Instant::now();
        }
    }
    file.flush().await?;
    ctx.set_progress(bytes_progress(downloaded, total, base, started));

    if let Some(expected) = total {
        if downloaded < expected {
            return Err(ModelError::Interrupted {
                received: downloaded,
                expected,
            });
        }
    }
    Ok(())
}

fn bytes_progress(downloaded: u64, total: Option<u64>, base: u64, started: Instant) -> JobProgress {
    let elapsed = started.elapsed().as_secs_f64();
    let rate = if elapsed > 0.0 {
        (downloaded - base) as f64 / elapsed
    } else {
        0.0
    };
    let eta_secs = match total {
        Some(total) if rate > 0.0 => Some((total.saturating_sub(downloaded) as f64 / rate) as u64),
        _ => None,
    };
    JobProgress::Bytes {
        downloaded,
        total,
        eta_secs,
    }
}

/// Check the header only; model files run to several gigabytes.
async fn verify(path: &Path) -> Result<(), ModelError> {
    if tokio::fs::metadata(path).await?.len() == 0 {
        return Err(ModelError::Corrupt("downloaded file is empty".to_string()));
    }

    let mut magic = [0u8; 4];
    let mut file = tokio::fs::File::open(path).await?;
    match file.read_exact(&mut magic).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {}
        Err(e) => return Err(e.into()),
    }
    if &magic != GGUF_MAGIC {
        return Err(ModelError::Corrupt(
            "downloaded file is not a GGUF model".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobState, ModelCategory};
    use crate::services::jobs::detached_context;

    const GB: u64 = 1024 * 1024 * 1024;

    struct FixedProbe {
        ram: u64,
        disk: u64,
    }

    impl ResourceProbe for FixedProbe {
        fn total_memory(&self) -> u64 {
            self.ram * 2
        }

        fn available_memory(&self) -> u64 {
            self.ram
        }

        fn used_memory(&self) -> u64 {
            self.ram
        }

        fn available_disk(&self, _path: &Path) -> Option<u64> {
            Some(self.disk)
        }
    }

    fn descriptor(url: &str, ram: u64) -> ModelDescriptor {
        ModelDescriptor {
            id: "tiny".to_string(),
            name: "Tiny".to_string(),
            description: "test model".to_string(),
            url: url.to_string(),
            filename: "tiny.gguf".to_string(),
            download_size_bytes: 1024,
            ram_required_bytes: ram,
            quantization: "Q4_K_M".to_string(),
            category: ModelCategory::Small,
        }
    }

    fn manager(dir: &Path, url: &str, ram_required: u64, available_ram: u64) -> ModelManager {
        ModelManager::new(
            dir.join("models"),
            ModelCatalog::new(vec![descriptor(url, ram_required)]),
            JobOrchestrator::new(),
            Arc::new(FixedProbe {
                ram: available_ram,
                disk: 100 * GB,
            }),
        )
        .with_retry_config(RetryConfig::new(2).with_initial_delay(Duration::from_millis(5)))
    }

    fn model_bytes() -> Vec<u8> {
        let mut body = GGUF_MAGIC.to_vec();
        body.extend(std::iter::repeat_n(7u8, 2048));
        body
    }

    #[tokio::test]
    async fn test_download_lands_in_models_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tiny.gguf")
            .with_status(200)
            .with_body(model_bytes())
            .create_async()
            .await;

        let mgr = manager(dir.path(), &format!("{}/tiny.gguf", server.url()), GB, 8 * GB);
        let model = mgr.download("tiny").unwrap().await.unwrap().unwrap();

        assert_eq!(model.id, "tiny");
        assert_eq!(model.size_bytes, model_bytes().len() as u64);
        assert!(dir.path().join("models/tiny.gguf").exists());
        assert!(!dir.path().join("models/.partial/tiny.gguf.part").exists());

        let status = mgr.status().unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert!(matches!(
            status.progress,
            JobProgress::Bytes { downloaded, .. } if downloaded == model_bytes().len() as u64
        ));
        mock.assert_async().await;

        assert!(matches!(
            mgr.download("tiny"),
            Err(ModelError::AlreadyPresent(_))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_ram_rejected_before_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tiny.gguf")
            .with_status(200)
            .with_body(model_bytes())
            .expect(0)
            .create_async()
            .await;

        let mgr = manager(dir.path(), &format!("{}/tiny.gguf", server.url()), 8 * GB, 4 * GB);
        let err = mgr.download("tiny").unwrap_err();

        match err {
            ModelError::InsufficientResources(reason) => assert!(reason.contains("RAM")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("models").exists());
        assert!(mgr.status().is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_second_download_rejected_without_touching_first() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = JobOrchestrator::new();
        let mgr = ModelManager::new(
            dir.path().join("models"),
            ModelCatalog::new(vec![descriptor("http://127.0.0.1:9/tiny.gguf", GB)]),
            jobs.clone(),
            Arc::new(FixedProbe {
                ram: 8 * GB,
                disk: 100 * GB,
            }),
        );

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let first = jobs
            .start(JobKind::Download, Some("other".into()), move |ctx| async move {
                ctx.set_progress(JobProgress::Bytes {
                    downloaded: 42,
                    total: Some(100),
                    eta_secs: None,
                });
                let _ = rx.await;
                Ok(())
            })
            .unwrap();

        // wait for the running job to publish progress
        for _ in 0..100 {
            if mgr.status().is_some_and(|s| s.progress.percent() == Some(42)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(matches!(
            mgr.download("tiny"),
            Err(ModelError::AlreadyDownloading)
        ));
        let status = mgr.status().unwrap();
        assert_eq!(status.key.as_deref(), Some("other"));
        assert_eq!(status.progress.percent(), Some(42));

        tx.send(()).unwrap();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_download_deleted_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/tiny.gguf")
            .with_status(200)
            .with_body("<html>not found</html>")
            .create_async()
            .await;

        let mgr = manager(dir.path(), &format!("{}/tiny.gguf", server.url()), GB, 8 * GB);
        let result = mgr.download("tiny").unwrap().await.unwrap();

        assert!(result.is_err());
        let status = mgr.status().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.last_error.unwrap().contains("GGUF"));
        assert!(!dir.path().join("models/tiny.gguf").exists());
        assert!(!dir.path().join("models/.partial/tiny.gguf.part").exists());
    }

    #[tokio::test]
    async fn test_resume_uses_range_request() {
        let dir = tempfile::tempdir().unwrap();
        let body = model_bytes();
        let partial = dir.path().join("models/.partial/tiny.gguf.part");
        std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
        std::fs::write(&partial, &body[..100]).unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tiny.gguf")
            .match_header("range", "bytes=100-")
            .with_status(206)
            .with_body(body[100..].to_vec())
            .create_async()
            .await;

        let mgr = manager(dir.path(), &format!("{}/tiny.gguf", server.url()), GB, 8 * GB);
        mgr.download("tiny").unwrap().await.unwrap().unwrap();

        assert_eq!(std::fs::read(dir.path().join("models/tiny.gguf")).unwrap(), body);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join(".partial/tiny.gguf.part");
        std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
        std::fs::write(&partial, b"GGUF1234").unwrap();

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tiny.gguf")
            .expect(0)
            .create_async()
            .await;

        let ctx = detached_context(JobKind::Download);
        ctx.request_cancel();
        let target = dir.path().join("tiny.gguf");
        let err = transfer(
            &ctx,
            &Client::new(),
            &RetryConfig::new(1),
            &descriptor(&format!("{}/tiny.gguf", server.url()), GB),
            &partial,
            &target,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ModelError::Cancelled));
        assert_eq!(std::fs::read(&partial).unwrap(), b"GGUF1234");
        assert!(!target.exists());
        mock.assert_async().await;
    }

    #[test]
    fn test_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), "http://127.0.0.1:9/x", GB, 8 * GB);
        assert!(matches!(
            mgr.download("nope"),
            Err(ModelError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_list_local_includes_uncatalogued_files() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), "http://127.0.0.1:9/x", GB, 8 * GB);
        assert!(mgr.list_local().unwrap().is_empty());

        let models = dir.path().join("models");
        std::fs::create_dir_all(models.join(".partial")).unwrap();
        std::fs::write(models.join("zeta-7b.Q4.gguf"), b"GGUF").unwrap();
        std::fs::write(models.join("alpha.gguf"), b"GGUFxx").unwrap();
        std::fs::write(models.join("notes.txt"), b"hi").unwrap();
        std::fs::write(models.join(".partial/beta.gguf.part"), b"GG").unwrap();

        let local = mgr.list_local().unwrap();
        let names: Vec<_> = local.iter().map(|m| m.filename.as_str()).collect();
        assert_eq!(names, vec!["alpha.gguf", "zeta-7b.Q4.gguf"]);
        assert_eq!(local[1].id, "zeta-7b.Q4");
        assert_eq!(local[1].name, "zeta 7b Q4");
        assert_eq!(local[0].size_bytes, 6);
    }

    #[test]
    fn test_delete_checks_registration_and_leases() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), "http://127.0.0.1:9/x", GB, 8 * GB);
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        let path = models.join("alpha.gguf");
        std::fs::write(&path, b"GGUF").unwrap();

        let outside = dir.path().join("elsewhere.gguf");
        std::fs::write(&outside, b"GGUF").unwrap();
        assert!(matches!(mgr.delete(&outside), Err(ModelError::NotFound(_))));
        assert!(matches!(
            mgr.delete(&models.join("missing.gguf")),
            Err(ModelError::NotFound(_))
        ));

        let lease = mgr.leases().acquire(&path);
        assert!(matches!(mgr.delete(&path), Err(ModelError::InUse(_))));
        drop(lease);

        let deleted = mgr.delete(&path).unwrap();
        assert_eq!(deleted.id, "alpha");
        assert!(!path.exists());
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn test_verify_reads_header_of_large_file() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big.part");
        let mut body = GGUF_MAGIC.to_vec();
        body.resize(4 * 1024 * 1024, 0);
        std::fs::write(&big, &body).unwrap();
        verify(&big).await.unwrap();

        let html = dir.path().join("html.part");
        let mut page = b"<html>".to_vec();
        page.resize(1024 * 1024, b' ');
        std::fs::write(&html, &page).unwrap();
        assert!(matches!(verify(&html).await, Err(ModelError::Corrupt(_))));

        let short = dir.path().join("short.part");
        std::fs::write(&short, b"GGU").unwrap();
        assert!(matches!(verify(&short).await, Err(ModelError::Corrupt(_))));

        let empty = dir.path().join("empty.part");
        std::fs::write(&empty, b"").unwrap();
        match verify(&empty).await {
            Err(ModelError::Corrupt(reason)) => assert!(reason.contains("empty")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_refused_while_lock_held_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tiny.gguf")
            .expect(0)
            .create_async()
            .await;

        // another process downloading into the same models directory
        let held = FileLock::try_acquire(&dir.path().join("models/.partial/download.lock"))
            .unwrap()
            .unwrap();
        let mgr = manager(dir.path(), &format!("{}/tiny.gguf", server.url()), GB, 8 * GB);
        assert!(matches!(
            mgr.download("tiny"),
            Err(ModelError::AlreadyDownloading)
        ));
        assert!(mgr.status().is_none());
        mock.assert_async().await;

        drop(held);
        assert!(
            FileLock::try_acquire(&dir.path().join("models/.partial/download.lock"))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_interrupted_transfer_is_retryable() {
        use crate::utils::Retryable;

        let err = ModelError::Interrupted {
            received: 10,
            expected: 100,
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "connection closed after 10 of 100 bytes");
        assert!(!ModelError::Download("HTTP 404 Not Found".into()).is_retryable());
    }

    #[test]
    fn test_lease_taken_during_delete_never_sees_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path(), "http://127.0.0.1:9/x", GB, 8 * GB);
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        let path = models.join("alpha.gguf");

        for _ in 0..50 {
            std::fs::write(&path, b"GGUF").unwrap();
            let leases = mgr.leases().clone();
            let leased_path = path.clone();
            let benchmark = std::thread::spawn(move || {
                let lease = leases.acquire(&leased_path);
                let present = leased_path.exists();
                std::thread::yield_now();
                let still_present = leased_path.exists();
                drop(lease);
                // once leased, a present file must stay present
                !present || still_present
            });
            let _ = mgr.delete(&path);
            assert!(benchmark.join().unwrap());
        }

        std::fs::write(&path, b"GGUF").unwrap();
        let lease = mgr.leases().acquire(&path);
        assert!(matches!(
            mgr.leases().remove_unleased(&path),
            Err(ModelError::InUse(_))
        ));
        assert!(path.exists());
        drop(lease);
        mgr.leases().remove_unleased(&path).unwrap();
        assert!(!path.exists());
    }
}
