//! Follows a background job in the terminal until it settles.

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

use crate::error::JobError;
use crate::models::{JobKind, JobProgress, JobStatus};
use crate::services::JobOrchestrator;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn style(kind: JobKind) -> ProgressStyle {
    let template = match kind {
        JobKind::Download => {
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}"
        }
        _ => "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    };
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn render(bar: &ProgressBar, status: &JobStatus) {
    match &status.progress {
        JobProgress::None => {}
        JobProgress::Items {
            done,
            total,
            current,
        } => {
            bar.set_length(*total);
            bar.set_position(*done);
            if let Some(current) = current {
                bar.set_message(current.clone());
            }
        }
        JobProgress::Bytes {
            downloaded,
            total,
            eta_secs,
        } => {
            if let Some(total) = total {
                bar.set_length(*total);
            }
            bar.set_position(*downloaded);
            if let Some(eta) = eta_secs {
                bar.set_message(format!("eta {}s", eta));
            }
        }
    }
}

/// Poll `kind` until `handle` finishes, drawing progress unless `quiet`.
/// Ctrl-C requests cancellation and keeps waiting for the job to stop.
pub async fn follow<T>(
    jobs: &JobOrchestrator,
    kind: JobKind,
    mut handle: JoinHandle<Result<T, JobError>>,
    quiet: bool,
) -> Result<T> {
    let bar = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    bar.set_style(style(kind));
    bar.enable_steady_tick(POLL_INTERVAL);

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut cancelling = false;
    let joined = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                jobs.cancel(kind);
                bar.set_message("cancelling...");
            }
            _ = ticker.tick() => {
                if let Some(status) = jobs.status(kind) {
                    render(&bar, &status);
                }
            }
        }
    };
    bar.finish_and_clear();

    let outcome = joined.with_context(|| format!("{} task aborted", kind))?;
    outcome.with_context(|| format!("{} job did not complete", kind))
}
