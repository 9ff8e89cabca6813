//! Job progress and its durable checkpoint.
//!
//! Progress is mutated under one lock after every record. Checkpoints are
//! written to `<path>.tmp`, fsynced, then renamed over `<path>`, so a crash
//! mid-write leaves the previous checkpoint intact.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::FailureRecord;

/// Counters and failures of one verification job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_processed: u64,
    pub active_count: u64,
    pub category_counts: BTreeMap<String, u64>,
    pub failed: Vec<FailureRecord>,
    pub job_id: String,
    pub last_updated: DateTime<Utc>,
    /// Normalized URLs already handled; a resumed run skips them.
    #[serde(default)]
    pub processed: BTreeSet<String>,
}

impl JobProgress {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            total_processed: 0,
            active_count: 0,
            category_counts: BTreeMap::new(),
            failed: Vec::new(),
            job_id: job_id.into(),
            last_updated: Utc::now(),
            processed: BTreeSet::new(),
        }
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }

    /// Share of processed records that did not fail, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.total_processed == 0 {
            return 0.0;
        }
        let ok = self.total_processed.saturating_sub(self.failed_count());
        let rate = ok as f64 / self.total_processed as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

/// Shared, lock-protected [`JobProgress`].
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<JobProgress>>,
}

impl ProgressTracker {
    pub fn new(progress: JobProgress) -> Self {
        Self {
            inner: Arc::new(Mutex::new(progress)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobProgress> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned progress lock");
            poisoned.into_inner()
        })
    }

    /// Count a record that was checked (live or not). Returns the new total.
    pub fn record_checked(&self, url: &str, category: &str, is_active: bool) -> u64 {
        let mut progress = self.lock();
        progress.total_processed += 1;
        if is_active {
            progress.active_count += 1;
        }
        *progress
            .category_counts
            .entry(category.to_string())
            .or_insert(0) += 1;
        progress.processed.insert(url.to_string());
        progress.last_updated = Utc::now();
        progress.total_processed
    }

    /// Count a record that failed. Returns the new total.
    pub fn record_failed(&self, url: &str, category: &str, failure: FailureRecord) -> u64 {
        let mut progress = self.lock();
        progress.total_processed += 1;
        *progress
            .category_counts
            .entry(category.to_string())
            .or_insert(0) += 1;
        progress.failed.push(failure);
        progress.processed.insert(url.to_string());
        progress.last_updated = Utc::now();
        progress.total_processed
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.lock().processed.contains(url)
    }

    pub fn total_processed(&self) -> u64 {
        self.lock().total_processed
    }

    pub fn job_id(&self) -> String {
        self.lock().job_id.clone()
    }

    /// Consistent copy of the current progress.
    pub fn snapshot(&self) -> JobProgress {
        self.lock().clone()
    }
}

/// Checkpoint file location plus a lock serializing writers.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint, `None` if there is none yet.
    pub fn load(&self) -> Result<Option<JobProgress>, AppError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Progress to resume for `job_id`: the checkpoint if it belongs to that
    /// job, otherwise a fresh [`JobProgress`].
    pub fn resume(&self, job_id: &str) -> Result<JobProgress, AppError> {
        match self.load()? {
            Some(progress) if progress.job_id == job_id => {
                tracing::info!(
                    %job_id,
                    total_processed = progress.total_processed,
                    failed = progress.failed.len(),
                    "Resuming from checkpoint"
                );
                Ok(progress)
            }
            Some(progress) => {
                tracing::warn!(
                    %job_id,
                    checkpoint_job_id = %progress.job_id,
                    path = %self.path.display(),
                    "Checkpoint belongs to another job, starting fresh"
                );
                Ok(JobProgress::new(job_id))
            }
            None => Ok(JobProgress::new(job_id)),
        }
    }

    /// Snapshot `tracker` and write it atomically.
    ///
    /// The snapshot is taken while holding the write lock, so a slower
    /// writer can never replace a newer checkpoint with an older one.
    pub fn save(&self, tracker: &ProgressTracker) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned checkpoint lock");
            poisoned.into_inner()
        });
        self.write(&tracker.snapshot())
    }

    /// Write a snapshot taken by the caller.
    ///
    /// Callers that snapshot outside the write lock must serialize their own
    /// saves, or an older snapshot can land after a newer one.
    pub fn save_progress(&self, progress: &JobProgress) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned checkpoint lock");
            poisoned.into_inner()
        });
        self.write(progress)
    }

    fn write(&self, progress: &JobProgress) -> Result<(), AppError> {
        let json = serde_json::to_vec_pretty(progress)?;
        write_atomic(&self.path, &json)?;
        tracing::debug!(
            path = %self.path.display(),
            total_processed = progress.total_processed,
            "Checkpoint saved"
        );
        Ok(())
    }
}

/// Write `contents` to `path` through a fsynced temp file and a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(url: &str) -> FailureRecord {
        FailureRecord {
            name: "Slow Motors".into(),
            url: url.into(),
            error: "Request timed out after 15 seconds".into(),
            error_type: "timeout".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_tracker_counts() {
        let tracker = ProgressTracker::new(JobProgress::new("job-1"));
        assert_eq!(tracker.record_checked("https://a.com", "Toyota", true), 1);
        assert_eq!(tracker.record_checked("https://b.com", "Other", false), 2);
        assert_eq!(
            tracker.record_failed("https://c.com", "Toyota", failure("https://c.com")),
            3
        );

        let progress = tracker.snapshot();
        assert_eq!(progress.total_processed, 3);
        assert_eq!(progress.active_count, 1);
        assert_eq!(progress.category_counts["Toyota"], 2);
        assert_eq!(progress.failed_count(), 1);
        assert!(tracker.is_processed("https://b.com"));
        assert!(!tracker.is_processed("https://d.com"));
        assert_eq!(progress.success_rate(), 66.67);
    }

    #[test]
    fn test_save_and_resume_from_42() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let mut progress = JobProgress::new("job-abc");
        progress.total_processed = 42;
        progress.active_count = 30;
        store.save(&ProgressTracker::new(progress)).unwrap();

        let resumed = store.resume("job-abc").unwrap();
        assert_eq!(resumed.total_processed, 42);
        assert_eq!(resumed.active_count, 30);

        let tracker = ProgressTracker::new(resumed);
        assert_eq!(tracker.record_checked("https://next.com", "Other", true), 43);
    }

    #[test]
    fn test_resume_ignores_other_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));
        let mut progress = JobProgress::new("job-old");
        progress.total_processed = 7;
        store.save(&ProgressTracker::new(progress)).unwrap();

        let fresh = store.resume("job-new").unwrap();
        assert_eq!(fresh.total_processed, 0);
        assert_eq!(fresh.job_id, "job-new");
    }

    #[test]
    fn test_missing_checkpoint_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/progress.json"));
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.resume("job-1").unwrap().total_processed, 0);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/progress.json");
        let store = CheckpointStore::new(&path);
        store
            .save(&ProgressTracker::new(JobProgress::new("job-1")))
            .unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("out/progress.json.tmp").exists());
    }

    #[test]
    fn test_checkpoint_without_processed_set_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(
            &path,
            r#"{
                "total_processed": 12,
                "active_count": 9,
                "category_counts": {"Ford": 12},
                "failed": [],
                "job_id": "job-legacy",
                "last_updated": "2024-05-01T12:00:00Z"
            }"#,
        )
        .unwrap();

        let progress = CheckpointStore::new(&path).load().unwrap().unwrap();
        assert_eq!(progress.total_processed, 12);
        assert!(progress.processed.is_empty());
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(&path, "{ not json").unwrap();
        let err = CheckpointStore::new(&path).load().unwrap_err();
        assert!(err.is_persistence());
    }

    #[test]
    fn test_concurrent_saves_keep_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));
        let tracker = ProgressTracker::new(JobProgress::new("job-1"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    tracker.record_checked(&format!("https://site{i}.com"), "Other", true);
                    store.save(&tracker).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.total_processed, 8);
        assert_eq!(saved.processed.len(), 8);
    }
}
