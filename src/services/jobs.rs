//! Single-flight background jobs with pollable status and cooperative
//! cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::JobError;
use crate::models::{JobKind, JobProgress, JobState, JobStatus};

#[derive(Debug, Default)]
struct JobSlot {
    status: Option<JobStatus>,
    cancel: Arc<AtomicBool>,
}

type SharedSlot = Arc<Mutex<JobSlot>>;

fn lock(slot: &SharedSlot) -> MutexGuard<'_, JobSlot> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Runs at most one job per kind; each kind has its own status cell.
#[derive(Debug, Clone)]
pub struct JobOrchestrator {
    slots: Arc<[SharedSlot; 3]>,
}

impl Default for JobOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl JobOrchestrator {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Default::default()),
        }
    }

    fn slot(&self, kind: JobKind) -> &SharedSlot {
        let idx = match kind {
            JobKind::Index => 0,
            JobKind::Download => 1,
            JobKind::Benchmark => 2,
        };
        &self.slots[idx]
    }

    /// Start `work` in the background. Fails with `AlreadyRunning` while a
    /// job of the same kind is queued or running.
    pub fn start<T, F, Fut>(
        &self,
        kind: JobKind,
        key: Option<String>,
        work: F,
    ) -> Result<JoinHandle<Result<T, JobError>>, JobError>
    where
        T: Send + 'static,
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        let slot = self.slot(kind).clone();
        let cancel = {
            let mut guard = lock(&slot);
            if guard.status.as_ref().is_some_and(|s| s.state.is_active()) {
                return Err(JobError::AlreadyRunning(kind));
            }
            guard.status = Some(JobStatus::queued(kind, key.clone()));
            guard.cancel = Arc::new(AtomicBool::new(false));
            Arc::clone(&guard.cancel)
        };

        let ctx = JobContext { kind, slot, cancel };
        info!(%kind, key = ?key, "job queued");

        Ok(tokio::spawn(async move {
            ctx.update(|s| s.state = JobState::Running);

            // run the work in its own task so a panic is reported as a failure
            let outcome = match tokio::spawn(work(ctx.clone())).await {
                Ok(result) => result,
                Err(e) => Err(JobError::Failed(format!("job aborted: {}", e))),
            };

            ctx.finish(&outcome);
            outcome
        }))
    }

    /// Current status of `kind`, or `None` if it never ran.
    pub fn status(&self, kind: JobKind) -> Option<JobStatus> {
        lock(self.slot(kind)).status.clone()
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        lock(self.slot(kind))
            .status
            .as_ref()
            .is_some_and(|s| s.state.is_active())
    }

    /// Ask the active job of `kind` to stop at its next checkpoint.
    /// Returns false when nothing is running.
    pub fn cancel(&self, kind: JobKind) -> bool {
        let mut guard = lock(self.slot(kind));
        let cancel = Arc::clone(&guard.cancel);
        match guard.status.as_mut() {
            Some(status) if status.state.is_active() => {
                cancel.store(true, Ordering::SeqCst);
                status.cancel_requested = true;
                info!(%kind, "cancellation requested");
                true
            }
            _ => false,
        }
    }
}

/// Handle given to job work for progress reporting and cancellation checks.
#[derive(Debug, Clone)]
pub struct JobContext {
    kind: JobKind,
    slot: SharedSlot,
    cancel: Arc<AtomicBool>,
}

impl JobContext {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Safe point: returns `Cancelled` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn set_progress(&self, progress: JobProgress) {
        self.update(|s| s.progress = progress);
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| s.message = Some(message));
    }

    fn update(&self, f: impl FnOnce(&mut JobStatus)) {
        if let Some(status) = lock(&self.slot).status.as_mut() {
            f(status);
        }
    }

    fn finish<T>(&self, outcome: &Result<T, JobError>) {
        let kind = self.kind;
        self.update(|s| {
            s.finished_at = Some(Utc::now());
            match outcome {
                Ok(_) => {
                    s.state = JobState::Succeeded;
                    info!(%kind, "job succeeded");
                }
                Err(JobError::Cancelled) => {
                    s.state = JobState::Cancelled;
                    info!(%kind, "job cancelled");
                }
                Err(e) => {
                    s.state = JobState::Failed;
                    s.last_error = Some(e.to_string());
                    warn!(%kind, error = %e, "job failed");
                }
            }
        });
    }
}

#[cfg(test)]
impl JobContext {
    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub(crate) fn progress(&self) -> JobProgress {
        lock(&self.slot)
            .status
            .as_ref()
            .map(|s| s.progress.clone())
            .unwrap_or_default()
    }
}

/// Context not registered with any orchestrator, for driving job work directly.
#[cfg(test)]
pub(crate) fn detached_context(kind: JobKind) -> JobContext {
    let slot = SharedSlot::default();
    lock(&slot).status = Some(JobStatus::queued(kind, None));
    JobContext {
        kind,
        slot,
        cancel: Arc::new(AtomicBool::new(false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_single_flight_per_kind() {
        let jobs = JobOrchestrator::new();
        let (tx, rx) = oneshot::channel::<()>();

        let first = jobs
            .start(JobKind::Download, Some("a".into()), move |_ctx| async move {
                let _ = rx.await;
                Ok(())
            })
            .unwrap();

        let second = jobs.start(JobKind::Download, Some("b".into()), |_ctx| async { Ok(()) });
        assert!(matches!(
            second,
            Err(JobError::AlreadyRunning(JobKind::Download))
        ));

        // other kinds are independent
        let bench = jobs
            .start(JobKind::Benchmark, None, |_ctx| async { Ok(1) })
            .unwrap();
        assert_eq!(bench.await.unwrap().unwrap(), 1);

        tx.send(()).unwrap();
        first.await.unwrap().unwrap();
        let status = jobs.status(JobKind::Download).unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.key.as_deref(), Some("a"));
        assert!(status.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_is_cooperative() {
        let jobs = JobOrchestrator::new();
        let handle = jobs
            .start(JobKind::Index, None, |ctx| async move {
                loop {
                    if let Err(e) = ctx.checkpoint() {
                        return Err::<(), _>(e);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(jobs.cancel(JobKind::Index));

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(JobError::Cancelled)));
        let status = jobs.status(JobKind::Index).unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert!(status.cancel_requested);
        assert!(status.last_error.is_none());
        assert!(!jobs.cancel(JobKind::Index));
    }

    #[tokio::test]
    async fn test_failure_and_panic_recorded() {
        let jobs = JobOrchestrator::new();
        let result = jobs
            .start(JobKind::Index, None, |_ctx| async {
                Err::<(), _>(JobError::Failed("disk full".into()))
            })
            .unwrap()
            .await
            .unwrap();
        assert!(result.is_err());
        let status = jobs.status(JobKind::Index).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.last_error.as_deref(), Some("disk full"));

        let result = jobs
            .start(JobKind::Benchmark, None, |_ctx| async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .unwrap()
            .await
            .unwrap();
        assert!(matches!(result, Err(JobError::Failed(_))));
        assert_eq!(
            jobs.status(JobKind::Benchmark).unwrap().state,
            JobState::Failed
        );
    }

    #[tokio::test]
    async fn test_progress_visible_while_running() {
        let jobs = JobOrchestrator::new();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = jobs
            .start(JobKind::Index, None, move |ctx| async move {
                ctx.set_progress(JobProgress::Items {
                    done: 1,
                    total: 3,
                    current: Some("a.txt".into()),
                });
                ctx.set_message("scanning");
                let _ = rx.await;
                Ok(())
            })
            .unwrap();

        let mut seen = false;
        for _ in 0..100 {
            if let Some(status) = jobs.status(JobKind::Index) {
                if status.progress.percent() == Some(33) {
                    assert_eq!(status.state, JobState::Running);
                    assert_eq!(status.message.as_deref(), Some("scanning"));
                    seen = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(seen);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        // a terminal job can be superseded by a new one
        assert!(jobs.start(JobKind::Index, None, |_| async { Ok(()) }).is_ok());
    }

    #[test]
    fn test_no_status_before_first_run() {
        let jobs = JobOrchestrator::new();
        assert!(jobs.status(JobKind::Download).is_none());
        assert!(!jobs.is_running(JobKind::Download));
        assert!(!jobs.cancel(JobKind::Download));
    }
}
