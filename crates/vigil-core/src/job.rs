use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Interrupted => "interrupted",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "interrupted" => Ok(JobStatus::Interrupted),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Job row handed to the persistence sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub total_processed: u64,
    pub active_count: u64,
    pub failed_count: u64,
    /// Aggregate statistics blob (the run's stats document).
    pub stats: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusRecord {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            total_processed: 0,
            active_count: 0,
            failed_count: 0,
            stats: serde_json::Value::Null,
            updated_at: Utc::now(),
        }
    }

    pub fn with_counts(mut self, total_processed: u64, active_count: u64, failed_count: u64) -> Self {
        self.total_processed = total_processed;
        self.active_count = active_count;
        self.failed_count = failed_count;
        self
    }

    pub fn with_stats(mut self, stats: serde_json::Value) -> Self {
        self.stats = stats;
        self
    }
}
