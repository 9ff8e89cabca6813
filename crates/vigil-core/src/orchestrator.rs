//! Batch verification: liveness, classification and hybrid extraction over
//! a record list, with bounded concurrency, checkpoints and graceful stop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::checkpoint::{CheckpointStore, ProgressTracker};
use crate::circuit_breaker::CircuitRegistry;
use crate::classify::CategoryTable;
use crate::config::PipelineConfig;
use crate::context::{TraceContext, short_id};
use crate::coordinator::HybridCoordinator;
use crate::error::AppError;
use crate::job::{JobStatus, JobStatusRecord};
use crate::models::{
    ErrorLogEntry, FailureRecord, LivenessResult, MergedResult, MethodUsed, Target,
    VerificationRecord,
};
use crate::output::{ResultRow, ResultWriter, RunStats};
use crate::retry::retry_with_backoff;
use crate::shutdown::ShutdownSupervisor;
use crate::traits::{ExtractionBackend, LivenessProbe, VerificationSink};
use crate::util::{domain_key, normalize_url};

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    Started {
        job_id: &'a str,
        total: usize,
        pending: usize,
    },
    BatchSubmitted {
        batch: usize,
        size: usize,
    },
    RecordVerified {
        record: &'a VerificationRecord,
    },
    RecordFailed {
        failure: &'a FailureRecord,
    },
    BatchPanicked {
        error: &'a str,
    },
    Progress {
        processed: u64,
        total: usize,
        per_minute: f64,
        eta: Option<Duration>,
    },
    CheckpointSaved {
        total_processed: u64,
    },
    ShutdownRequested,
    Finished {
        stats: &'a RunStats,
    },
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl PipelineReporter for TracingReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::Started {
                job_id,
                total,
                pending,
            } => {
                tracing::info!(%job_id, total, pending, "Verification started");
            }
            PipelineEvent::BatchSubmitted { batch, size } => {
                tracing::debug!(batch, size, "Batch submitted");
            }
            PipelineEvent::RecordVerified { record } => {
                tracing::info!(
                    url = %record.url,
                    is_active = record.is_active,
                    category = %record.category,
                    contacts = record.contacts.len(),
                    staff = record.staff.len(),
                    "Record verified"
                );
            }
            PipelineEvent::RecordFailed { failure } => {
                tracing::warn!(
                    url = %failure.url,
                    error_type = %failure.error_type,
                    error = %failure.error,
                    "Record failed"
                );
            }
            PipelineEvent::BatchPanicked { error } => {
                tracing::error!(%error, "Batch task panicked");
            }
            PipelineEvent::Progress {
                processed,
                total,
                per_minute,
                eta,
            } => {
                tracing::info!(
                    processed,
                    total,
                    per_minute = %format!("{per_minute:.1}"),
                    eta_secs = eta.map(|d| d.as_secs()),
                    "Progress"
                );
            }
            PipelineEvent::CheckpointSaved { total_processed } => {
                tracing::debug!(total_processed, "Checkpoint saved");
            }
            PipelineEvent::ShutdownRequested => {
                tracing::info!("Shutdown requested, draining in-flight batches");
            }
            PipelineEvent::Finished { stats } => {
                tracing::info!(
                    job_id = %stats.job_id,
                    total_processed = stats.total_processed,
                    active = stats.active_websites,
                    failed = stats.failed_count,
                    success_rate = stats.success_rate,
                    interrupted = stats.interrupted,
                    "Verification finished"
                );
            }
        }
    }
}

/// Runs a verification job over a list of targets.
pub struct BatchOrchestrator<P, A, B, S>
where
    P: LivenessProbe + 'static,
    A: ExtractionBackend + 'static,
    B: ExtractionBackend + 'static,
    S: VerificationSink + 'static,
{
    probe: P,
    coordinator: HybridCoordinator<A, B>,
    sink: S,
    config: PipelineConfig,
    supervisor: ShutdownSupervisor,
    categories: Arc<CategoryTable>,
    reporter: Arc<dyn PipelineReporter>,
    checkpoint_path: PathBuf,
    output_dir: PathBuf,
}

impl<P, A, B, S> BatchOrchestrator<P, A, B, S>
where
    P: LivenessProbe + 'static,
    A: ExtractionBackend + 'static,
    B: ExtractionBackend + 'static,
    S: VerificationSink + 'static,
{
    pub fn new(
        probe: P,
        coordinator: HybridCoordinator<A, B>,
        sink: S,
        config: PipelineConfig,
        supervisor: ShutdownSupervisor,
    ) -> Self {
        Self {
            probe,
            coordinator,
            sink,
            config,
            supervisor,
            categories: Arc::new(CategoryTable::default()),
            reporter: Arc::new(TracingReporter),
            checkpoint_path: PathBuf::from("progress.json"),
            output_dir: PathBuf::from("."),
        }
    }

    pub fn with_categories(mut self, table: CategoryTable) -> Self {
        self.categories = Arc::new(table);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn PipelineReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = path.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Verify `targets` under `job_id` (generated when `None`).
    ///
    /// Resumes from the checkpoint when it belongs to the same job. Only
    /// checkpoint, export and sink failures make this return `Err`; record
    /// failures end up in the failure list.
    pub async fn run(&self, targets: Vec<Target>, job_id: Option<&str>) -> Result<RunStats, AppError> {
        self.config.validate()?;
        let job_id = job_id
            .map(String::from)
            .unwrap_or_else(|| format!("job-{}", short_id()));
        let start_time = Utc::now();

        let checkpoint = CheckpointStore::new(&self.checkpoint_path);
        let tracker = ProgressTracker::new(checkpoint.resume(&job_id)?);
        let writer = ResultWriter::new(&self.output_dir, &job_id);
        let rows = if tracker.total_processed() > 0 {
            writer.load_partial()?
        } else {
            Vec::new()
        };
        let state = RunState::new(tracker, checkpoint, writer, rows);
        let tracker = &state.tracker;

        let total = targets.len();
        let pending: Vec<Target> = targets
            .into_iter()
            .filter(|t| !tracker.is_processed(&record_key(t)))
            .collect();
        self.reporter.report(PipelineEvent::Started {
            job_id: &job_id,
            total,
            pending: pending.len(),
        });

        self.sink
            .upsert_job(&JobStatusRecord::new(&job_id, JobStatus::Running))
            .await?;

        {
            let state = state.clone();
            self.supervisor
                .register_cleanup("checkpoint-flush", move || state.save().map(|_| ()));
        }

        let token = self.supervisor.token();
        let worker = BatchWorker {
            probe: self.probe.clone(),
            coordinator: self.coordinator.clone(),
            sink: self.sink.clone(),
            circuits: self.coordinator.circuits().clone(),
            categories: Arc::clone(&self.categories),
            config: self.config.clone(),
            state: state.clone(),
            token: token.clone(),
            reporter: Arc::clone(&self.reporter),
            job_id: job_id.clone(),
        };

        let monitor_stop = token.child_token();
        self.supervisor.spawn(
            "monitor",
            monitor(
                state.clone(),
                Arc::clone(&self.reporter),
                self.config.monitor_interval,
                total,
                monitor_stop.clone(),
            ),
        );

        let (outcome, interrupted) = self.dispatch(&worker, pending, &token).await;
        monitor_stop.cancel();

        if let Err(e) = outcome {
            tracing::error!(%job_id, error = %e, "Aborting run on persistence failure");
            if let Err(save_err) = state.save() {
                tracing::error!(error = %save_err, "Final checkpoint flush failed");
            }
            let failed = JobStatusRecord::new(&job_id, JobStatus::Failed);
            if let Err(sink_err) = self.sink.upsert_job(&failed).await {
                tracing::error!(error = %sink_err, "Could not mark job failed");
            }
            self.coordinator.cleanup().await;
            return Err(e);
        }

        state.save()?;
        let progress = tracker.snapshot();
        let stats = RunStats::from_progress(
            &progress,
            start_time,
            self.config.batch_size,
            self.config.max_workers,
            self.config.policy.as_str(),
            interrupted,
        );
        let rows = state.rows_snapshot();
        state.writer.write_final(&rows, &progress.failed, &stats)?;

        let status = if interrupted {
            JobStatus::Interrupted
        } else {
            JobStatus::Completed
        };
        let job = JobStatusRecord::new(&job_id, status)
            .with_counts(
                progress.total_processed,
                progress.active_count,
                progress.failed_count(),
            )
            .with_stats(stats.to_json()?);
        self.sink.upsert_job(&job).await?;

        self.coordinator.cleanup().await;
        self.reporter.report(PipelineEvent::Finished { stats: &stats });
        Ok(stats)
    }

    /// Submit batches to at most `max_workers` concurrent tasks and wait for
    /// them. Returns the first fatal error, if any, and whether the run was
    /// cut short by shutdown.
    async fn dispatch(
        &self,
        worker: &BatchWorker<P, A, B, S>,
        pending: Vec<Target>,
        token: &CancellationToken,
    ) -> (Result<(), AppError>, bool) {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();
        let mut outcome: Result<(), AppError> = Ok(());
        let mut interrupted = false;

        let batches: Vec<Vec<Target>> = pending
            .chunks(self.config.batch_size)
            .map(<[Target]>::to_vec)
            .collect();

        'submit: for (index, batch) in batches.into_iter().enumerate() {
            while set.len() >= self.config.max_workers {
                tokio::select! {
                    Some(joined) = set.join_next() => {
                        if let Err(e) = self.settle(joined) {
                            outcome = Err(e);
                            break 'submit;
                        }
                    }
                    () = token.cancelled() => {
                        interrupted = true;
                        break 'submit;
                    }
                }
            }
            if token.is_cancelled() {
                interrupted = true;
                break;
            }

            self.reporter.report(PipelineEvent::BatchSubmitted {
                batch: index,
                size: batch.len(),
            });
            set.spawn(self.supervisor.track(worker.clone().process_batch(index, batch)));

            if !self.config.submit_gap.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(self.config.submit_gap) => {}
                    () = token.cancelled() => {
                        interrupted = true;
                        break 'submit;
                    }
                }
            }
        }

        if interrupted {
            self.reporter.report(PipelineEvent::ShutdownRequested);
        }
        let mut deadline = interrupted.then(|| tokio::time::Instant::now() + self.config.grace_period);

        while outcome.is_ok() {
            let joined = match deadline {
                Some(at) => match tokio::time::timeout_at(at, set.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::warn!(
                            stragglers = set.len(),
                            "Batches still running after grace period, aborting them"
                        );
                        break;
                    }
                },
                None => tokio::select! {
                    joined = set.join_next() => joined,
                    () = token.cancelled() => {
                        interrupted = true;
                        self.reporter.report(PipelineEvent::ShutdownRequested);
                        deadline = Some(tokio::time::Instant::now() + self.config.grace_period);
                        continue;
                    }
                },
            };
            let Some(joined) = joined else { break };
            if let Err(e) = self.settle(joined) {
                outcome = Err(e);
            }
        }

        set.shutdown().await;
        (outcome, interrupted)
    }

    /// A batch's own error aborts the run; a panic outside record
    /// verification only loses the rest of that batch.
    fn settle(&self, joined: Result<Result<(), AppError>, JoinError>) -> Result<(), AppError> {
        match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                let error = e.to_string();
                self.reporter.report(PipelineEvent::BatchPanicked { error: &error });
                Ok(())
            }
        }
    }
}

/// Everything one batch task needs, cloned per task.
struct BatchWorker<P, A, B, S>
where
    P: LivenessProbe,
    A: ExtractionBackend,
    B: ExtractionBackend,
    S: VerificationSink,
{
    probe: P,
    coordinator: HybridCoordinator<A, B>,
    sink: S,
    circuits: CircuitRegistry,
    categories: Arc<CategoryTable>,
    config: PipelineConfig,
    state: RunState,
    token: CancellationToken,
    reporter: Arc<dyn PipelineReporter>,
    job_id: String,
}

impl<P, A, B, S> Clone for BatchWorker<P, A, B, S>
where
    P: LivenessProbe,
    A: ExtractionBackend,
    B: ExtractionBackend,
    S: VerificationSink,
{
    fn clone(&self) -> Self {
        Self {
            probe: self.probe.clone(),
            coordinator: self.coordinator.clone(),
            sink: self.sink.clone(),
            circuits: self.circuits.clone(),
            categories: Arc::clone(&self.categories),
            config: self.config.clone(),
            state: self.state.clone(),
            token: self.token.clone(),
            reporter: Arc::clone(&self.reporter),
            job_id: self.job_id.clone(),
        }
    }
}

enum Outcome {
    Verified(VerificationRecord),
    Failed {
        failure: FailureRecord,
        category: String,
    },
}

impl<P, A, B, S> BatchWorker<P, A, B, S>
where
    P: LivenessProbe,
    A: ExtractionBackend,
    B: ExtractionBackend,
    S: VerificationSink,
{
    /// Records inside a batch run one after another; shutdown is checked
    /// between records. A panic while verifying a record becomes that
    /// record's failure.
    async fn process_batch(self, index: usize, batch: Vec<Target>) -> Result<(), AppError> {
        for target in &batch {
            if self.token.is_cancelled() {
                tracing::debug!(batch = index, "Batch stopped by shutdown");
                break;
            }
            let ctx = TraceContext::new(&self.job_id, &target.name);
            let span = ctx.span();
            self.process_record(target, &ctx).instrument(span).await?;
        }
        Ok(())
    }

    async fn process_record(&self, target: &Target, ctx: &TraceContext) -> Result<(), AppError> {
        let key = record_key(target);
        let outcome = match AssertUnwindSafe(self.verify_record(target, ctx))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    url = %target.url,
                    error = %message,
                    "Record verification panicked"
                );
                let mut failure =
                    FailureRecord::new(target, &AppError::Generic(format!("panic: {message}")));
                failure.error_type = "panic".into();
                Outcome::Failed {
                    failure,
                    category: self.categories.classify(&target.name, &target.url),
                }
            }
        };

        let total = match outcome {
            Outcome::Verified(record) => {
                self.sink.upsert_result(&record).await?;
                // The row must be in place before the key counts as processed.
                self.state.push_row(ResultRow::from(&record));
                let total = self
                    .state
                    .tracker
                    .record_checked(&key, &record.category, record.is_active);
                self.reporter
                    .report(PipelineEvent::RecordVerified { record: &record });
                total
            }
            Outcome::Failed { failure, category } => {
                let entry = ErrorLogEntry::from_failure(
                    &failure,
                    &self.job_id,
                    serde_json::json!({
                        "url": failure.url,
                        "name": failure.name,
                        "correlation_id": ctx.correlation_id,
                    }),
                );
                self.sink.append_error(&entry).await?;
                self.reporter
                    .report(PipelineEvent::RecordFailed { failure: &failure });
                self.state.tracker.record_failed(&key, &category, failure)
            }
        };

        if total % self.config.save_interval as u64 == 0 {
            self.save()?;
        }
        Ok(())
    }

    /// Classify, check liveness, and extract when live.
    async fn verify_record(&self, target: &Target, ctx: &TraceContext) -> Outcome {
        let category = self.categories.classify(&target.name, &target.url);

        let url = match normalize_url(&target.url) {
            Ok(url) => url,
            Err(e) => {
                return Outcome::Failed {
                    failure: FailureRecord::new(target, &e),
                    category,
                };
            }
        };

        let host = domain_key(&url);
        let probe = &self.probe;
        let url_ref = url.as_str();
        let limit = self.config.liveness_timeout;
        let checked = retry_with_backoff(&self.circuits, &host, &self.config.retry, move || {
            timed_probe(probe, url_ref, limit)
        })
        .await;

        let live = match checked {
            Ok(live) => live,
            Err(e) if e.is_unreachable() || e.is_circuit_open() => {
                tracing::info!(%url, error = %e, "Site unreachable");
                LivenessResult::unreachable(None, None)
            }
            Err(e) => {
                return Outcome::Failed {
                    failure: FailureRecord::new(target, &e),
                    category,
                };
            }
        };

        if !live.is_reachable {
            return Outcome::Verified(self.build_record(target, &url, category, &live, None, ctx));
        }

        let site_url = live.resolved_url.clone().unwrap_or_else(|| url.clone());
        let site = Target::new(target.name.clone(), site_url);
        let merged = self.coordinator.extract(&site, ctx).await;

        if merged.method_used == MethodUsed::Failed {
            let failure = match &merged.error {
                Some(info) => FailureRecord::from_info(target, info),
                None => FailureRecord::new(
                    target,
                    &AppError::Generic("every extraction backend failed".into()),
                ),
            };
            return Outcome::Failed { failure, category };
        }

        Outcome::Verified(self.build_record(target, &url, category, &live, Some(merged), ctx))
    }

    fn build_record(
        &self,
        target: &Target,
        url: &str,
        category: String,
        live: &LivenessResult,
        merged: Option<MergedResult>,
        ctx: &TraceContext,
    ) -> VerificationRecord {
        let (contacts, staff, method_used) = match merged {
            Some(merged) => (merged.contacts(), merged.staff, Some(merged.method_used)),
            None => (Vec::new(), Vec::new(), None),
        };
        VerificationRecord {
            name: target.name.clone(),
            url: url.to_string(),
            is_active: live.is_reachable,
            resolved_url: live.resolved_url.clone(),
            category,
            contacts,
            staff,
            method_used,
            checked_at: live.checked_at,
            correlation_id: ctx.correlation_id.clone(),
            job_id: ctx.job_id.clone(),
        }
    }

    fn save(&self) -> Result<(), AppError> {
        let total_processed = self.state.save()?;
        self.reporter
            .report(PipelineEvent::CheckpointSaved { total_processed });
        Ok(())
    }
}

/// Progress, result rows and the files they are persisted to.
///
/// Every save writes the partial results before the checkpoint, and the
/// progress snapshot is taken before the rows. A row is pushed before its
/// key is marked processed, so any key in a saved checkpoint has its row in
/// the partial file.
#[derive(Clone)]
struct RunState {
    tracker: ProgressTracker,
    checkpoint: CheckpointStore,
    writer: ResultWriter,
    rows: Arc<Mutex<Vec<ResultRow>>>,
    save_lock: Arc<Mutex<()>>,
}

impl RunState {
    fn new(
        tracker: ProgressTracker,
        checkpoint: CheckpointStore,
        writer: ResultWriter,
        rows: Vec<ResultRow>,
    ) -> Self {
        Self {
            tracker,
            checkpoint,
            writer,
            rows: Arc::new(Mutex::new(rows)),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Persist partial results, then the checkpoint. Returns the saved
    /// processed count.
    fn save(&self) -> Result<u64, AppError> {
        let _guard = self.save_lock.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned save lock");
            poisoned.into_inner()
        });
        let progress = self.tracker.snapshot();
        let rows = self.rows_snapshot();
        self.writer.write_partial(&rows)?;
        self.checkpoint.save_progress(&progress)?;
        Ok(progress.total_processed)
    }

    fn push_row(&self, row: ResultRow) {
        self.lock_rows().push(row);
    }

    fn lock_rows(&self) -> MutexGuard<'_, Vec<ResultRow>> {
        self.rows.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned results lock");
            poisoned.into_inner()
        })
    }

    fn rows_snapshot(&self) -> Vec<ResultRow> {
        self.lock_rows().clone()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn timed_probe<P: LivenessProbe>(
    probe: &P,
    url: &str,
    limit: Duration,
) -> Result<LivenessResult, AppError> {
    tokio::time::timeout(limit, probe.probe(url))
        .await
        .map_err(|_| AppError::Timeout(limit.as_secs()))?
}

/// Key of a record in the checkpoint's `processed` set.
fn record_key(target: &Target) -> String {
    normalize_url(&target.url).unwrap_or_else(|_| target.url.trim().to_lowercase())
}

/// Periodic throughput/ETA report and checkpoint write.
async fn monitor(
    state: RunState,
    reporter: Arc<dyn PipelineReporter>,
    period: Duration,
    total: usize,
    stop: CancellationToken,
) {
    let tracker = &state.tracker;
    let started = Instant::now();
    let baseline = tracker.total_processed();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let processed = tracker.total_processed();
        let minutes = started.elapsed().as_secs_f64() / 60.0;
        let per_minute = if minutes > 0.0 {
            processed.saturating_sub(baseline) as f64 / minutes
        } else {
            0.0
        };
        let remaining = (total as u64).saturating_sub(processed);
        let eta = (per_minute > 0.0)
            .then(|| Duration::from_secs_f64(remaining as f64 / per_minute * 60.0));
        reporter.report(PipelineEvent::Progress {
            processed,
            total,
            per_minute,
            eta,
        });

        match state.save() {
            Ok(total_processed) => reporter.report(PipelineEvent::CheckpointSaved { total_processed }),
            Err(e) => tracing::error!(error = %e, "Periodic checkpoint failed"),
        }
    }
}
