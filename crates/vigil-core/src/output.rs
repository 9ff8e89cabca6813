//! Run exports: results and failures as CSV, aggregate statistics as JSON.
//! Every file is written atomically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{JobProgress, write_atomic};
use crate::error::AppError;
use crate::models::{FailureRecord, VerificationRecord};

/// One line of `results_<job>.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub name: String,
    pub website: String,
    pub is_active: bool,
    pub final_url: String,
    pub category: String,
    /// `; `-separated.
    pub emails: String,
    pub phones: String,
    pub address: String,
    pub staff_count: usize,
    pub method: String,
    pub checked_at: DateTime<Utc>,
    pub correlation_id: String,
}

impl From<&VerificationRecord> for ResultRow {
    fn from(record: &VerificationRecord) -> Self {
        Self {
            name: record.name.clone(),
            website: record.url.clone(),
            is_active: record.is_active,
            final_url: record.resolved_url.clone().unwrap_or_default(),
            category: record.category.clone(),
            emails: record.emails().collect::<Vec<_>>().join("; "),
            phones: record.phones().collect::<Vec<_>>().join("; "),
            address: record.address().unwrap_or_default().to_string(),
            staff_count: record.staff.len(),
            method: record
                .method_used
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            checked_at: record.checked_at,
            correlation_id: record.correlation_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FailureRow<'a> {
    name: &'a str,
    website: &'a str,
    error: &'a str,
    timestamp: DateTime<Utc>,
}

/// Aggregate statistics of one run (`stats_<job>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub job_id: String,
    pub total_processed: u64,
    pub active_websites: u64,
    pub category_distribution: BTreeMap<String, u64>,
    pub failed_count: u64,
    /// Percent, two decimals.
    pub success_rate: f64,
    pub start_time: DateTime<Utc>,
    pub completion_time: DateTime<Utc>,
    pub processing_duration_seconds: f64,
    pub batch_size: usize,
    pub max_workers: usize,
    pub hostname: String,
    pub policy: String,
    pub interrupted: bool,
}

impl RunStats {
    pub fn from_progress(
        progress: &JobProgress,
        start_time: DateTime<Utc>,
        batch_size: usize,
        max_workers: usize,
        policy: &str,
        interrupted: bool,
    ) -> Self {
        let completion_time = Utc::now();
        let duration = (completion_time - start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            job_id: progress.job_id.clone(),
            total_processed: progress.total_processed,
            active_websites: progress.active_count,
            category_distribution: progress.category_counts.clone(),
            failed_count: progress.failed_count(),
            success_rate: progress.success_rate(),
            start_time,
            completion_time,
            processing_duration_seconds: duration,
            batch_size,
            max_workers,
            hostname: hostname(),
            policy: policy.to_string(),
            interrupted,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, AppError> {
        Ok(serde_json::to_value(self)?)
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Writes a job's export files into one directory.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    dir: PathBuf,
    job_id: String,
}

impl ResultWriter {
    pub fn new(dir: impl Into<PathBuf>, job_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            job_id: job_id.into(),
        }
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(format!("results_{}.csv", self.job_id))
    }

    pub fn partial_path(&self) -> PathBuf {
        self.dir.join(format!("results_{}.partial.csv", self.job_id))
    }

    pub fn failed_path(&self) -> PathBuf {
        self.dir.join(format!("failed_{}.csv", self.job_id))
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join(format!("stats_{}.json", self.job_id))
    }

    /// Rewrite the intermediate results file.
    pub fn write_partial(&self, rows: &[ResultRow]) -> Result<(), AppError> {
        write_csv(&self.partial_path(), rows)
    }

    /// Rows saved by an earlier run of the same job, if any.
    pub fn load_partial(&self) -> Result<Vec<ResultRow>, AppError> {
        let path = self.partial_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let rows = reader.deserialize().collect::<Result<Vec<ResultRow>, _>>()?;
        Ok(rows)
    }

    /// Write the final results, failures and statistics.
    pub fn write_final(
        &self,
        rows: &[ResultRow],
        failures: &[FailureRecord],
        stats: &RunStats,
    ) -> Result<(), AppError> {
        write_csv(&self.results_path(), rows)?;

        let failure_rows: Vec<FailureRow<'_>> = failures
            .iter()
            .map(|f| FailureRow {
                name: &f.name,
                website: &f.url,
                error: &f.error,
                timestamp: f.timestamp,
            })
            .collect();
        write_csv(&self.failed_path(), &failure_rows)?;

        write_atomic(&self.stats_path(), &serde_json::to_vec_pretty(stats)?)?;

        tracing::info!(
            results = %self.results_path().display(),
            failed = failures.len(),
            "Exports written"
        );
        Ok(())
    }
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::IoError(e.into_error()))?;
    write_atomic(path, &bytes)
}
