//! Background job kinds, states and progress snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Index,
    Download,
    Benchmark,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Index, JobKind::Download, JobKind::Benchmark];
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Index => write!(f, "index"),
            JobKind::Download => write!(f, "download"),
            JobKind::Benchmark => write!(f, "benchmark"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "unit", rename_all = "snake_case")]
pub enum JobProgress {
    #[default]
    None,
    Items {
        done: u64,
        total: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<String>,
    },
    Bytes {
        downloaded: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_secs: Option<u64>,
    },
}

impl JobProgress {
    /// Completion on a 0-100 scale, when the total is known.
    pub fn percent(&self) -> Option<u8> {
        let (done, total) = match self {
            JobProgress::None => return None,
            JobProgress::Items { done, total, .. } => (*done, *total),
            JobProgress::Bytes {
                downloaded, total, ..
            } => (*downloaded, (*total)?),
        };
        if total == 0 {
            return Some(100);
        }
        Some(((done.min(total) * 100) / total) as u8)
    }
}

/// Snapshot of one job kind's status cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub state: JobState,
    pub progress: JobProgress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub cancel_requested: bool,
}

impl JobStatus {
    pub fn queued(kind: JobKind, key: Option<String>) -> Self {
        Self {
            kind,
            key,
            state: JobState::Queued,
            progress: JobProgress::None,
            message: None,
            started_at: Utc::now(),
            finished_at: None,
            last_error: None,
            cancel_requested: false,
        }
    }
}
