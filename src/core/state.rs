//! Run and subject state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every subject was processed
    Completed,
    /// Some subjects failed, at least one succeeded
    PartiallyCompleted,
    /// No subject could be processed
    Failed,
}

/// State of a single subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubjectState {
    Completed {
        /// The subject's output directory
        output_dir: PathBuf,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
    },
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub run_id: Uuid,

    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub total_subjects: usize,
    pub completed_subjects: usize,
    pub failed_subjects: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_subjects: 0,
            completed_subjects: 0,
            failed_subjects: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self, total_subjects: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_subjects = total_subjects;
    }

    pub fn record_success(&mut self) {
        self.completed_subjects += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed_subjects += 1;
    }

    /// Close the run, deriving the final status from the counts
    pub fn finish(&mut self) {
        self.status = if self.completed_subjects == 0 {
            ExecutionStatus::Failed
        } else if self.failed_subjects > 0 {
            ExecutionStatus::PartiallyCompleted
        } else {
            ExecutionStatus::Completed
        };
        self.completed_at = Some(Utc::now());
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
