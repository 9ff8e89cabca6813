//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::context::TraceContext;
use crate::error::AppError;
use crate::job::JobStatusRecord;
use crate::models::{ErrorLogEntry, ExtractionResult, LivenessResult, Target, VerificationRecord};
use crate::orchestrator::{PipelineEvent, PipelineReporter};
use crate::traits::{ExtractionBackend, Fetcher, LivenessProbe, VerificationSink};

fn pop_front<T>(queue: &Mutex<Vec<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap();
    if queue.is_empty() {
        None
    } else {
        Some(queue.remove(0))
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher serving queued responses, then pages by URL.
#[derive(Clone, Default)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    /// Served when the queue is empty; unknown URLs get a 404.
    pages: Arc<Mutex<HashMap<String, String>>>,
    pub fetched: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(html.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    /// A small site: `(url, html)` pairs.
    pub fn with_pages(pages: &[(&str, &str)]) -> Self {
        let pages = pages
            .iter()
            .map(|(url, html)| (url.to_string(), html.to_string()))
            .collect();
        Self {
            pages: Arc::new(Mutex::new(pages)),
            ..Self::default()
        }
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(response) = pop_front(&self.responses) {
            return response;
        }
        match self.pages.lock().unwrap().get(url) {
            Some(html) => Ok(html.clone()),
            None => Err(AppError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MockProbe
// ---------------------------------------------------------------------------

type ProbeFn = dyn Fn(&str) -> Result<LivenessResult, AppError> + Send + Sync;

/// Mock liveness probe: queued results, then a handler, then "reachable".
#[derive(Clone, Default)]
pub struct MockProbe {
    responses: Arc<Mutex<Vec<Result<LivenessResult, AppError>>>>,
    handler: Option<Arc<ProbeFn>>,
    pub probed: Arc<Mutex<Vec<String>>>,
}

impl MockProbe {
    /// Every URL answers 200 at itself.
    pub fn reachable() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<LivenessResult, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    pub fn with_handler(
        handler: impl Fn(&str) -> Result<LivenessResult, AppError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.probed.lock().unwrap().len()
    }
}

impl LivenessProbe for MockProbe {
    async fn probe(&self, url: &str) -> Result<LivenessResult, AppError> {
        self.probed.lock().unwrap().push(url.to_string());
        if let Some(response) = pop_front(&self.responses) {
            return response;
        }
        match &self.handler {
            Some(handler) => handler(url),
            None => Ok(LivenessResult::reachable(url, 200)),
        }
    }
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

type ExtractFn = dyn Fn(&Target) -> Result<ExtractionResult, AppError> + Send + Sync;

/// Mock extraction backend: queued results, then a handler, then an empty
/// successful result.
#[derive(Clone)]
pub struct MockBackend {
    id: String,
    responses: Arc<Mutex<Vec<Result<ExtractionResult, AppError>>>>,
    handler: Option<Arc<ExtractFn>>,
    delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
    cleanups: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            responses: Arc::new(Mutex::new(Vec::new())),
            handler: None,
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
            cleanups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_responses(id: &str, responses: Vec<Result<ExtractionResult, AppError>>) -> Self {
        let backend = Self::new(id);
        *backend.responses.lock().unwrap() = responses;
        backend
    }

    pub fn with_handler(
        id: &str,
        handler: impl Fn(&Target) -> Result<ExtractionResult, AppError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
            ..Self::new(id)
        }
    }

    /// Sleep for `delay` on every call before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// URLs passed to `extract`, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

impl ExtractionBackend for MockBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(
        &self,
        target: &Target,
        _ctx: &TraceContext,
    ) -> Result<ExtractionResult, AppError> {
        self.calls.lock().unwrap().push(target.url.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(response) = pop_front(&self.responses) {
            return response;
        }
        match &self.handler {
            Some(handler) => handler(target),
            None => Ok(ExtractionResult::new(&self.id)),
        }
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Mock sink that records every write.
#[derive(Clone, Default)]
pub struct MockSink {
    results: Arc<Mutex<Vec<VerificationRecord>>>,
    jobs: Arc<Mutex<Vec<JobStatusRecord>>>,
    errors: Arc<Mutex<Vec<ErrorLogEntry>>>,
    result_calls: Arc<AtomicUsize>,
    /// 1-based `upsert_result` call that fails, with its error.
    result_error: Arc<Mutex<Option<(usize, AppError)>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose first `upsert_result` fails with `error`.
    pub fn failing_results(error: AppError) -> Self {
        Self::failing_result_at(1, error)
    }

    /// Sink whose `nth` (1-based) `upsert_result` fails with `error`.
    pub fn failing_result_at(nth: usize, error: AppError) -> Self {
        Self {
            result_error: Arc::new(Mutex::new(Some((nth, error)))),
            ..Self::default()
        }
    }

    pub fn results(&self) -> Vec<VerificationRecord> {
        self.results.lock().unwrap().clone()
    }

    pub fn jobs(&self) -> Vec<JobStatusRecord> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ErrorLogEntry> {
        self.errors.lock().unwrap().clone()
    }
}

impl VerificationSink for MockSink {
    async fn upsert_result(&self, record: &VerificationRecord) -> Result<(), AppError> {
        let call = self.result_calls.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut pending = self.result_error.lock().unwrap();
            if pending.as_ref().is_some_and(|(nth, _)| *nth == call) {
                if let Some((_, e)) = pending.take() {
                    return Err(e);
                }
            }
        }
        let mut results = self.results.lock().unwrap();
        results.retain(|r| r.url != record.url);
        results.push(record.clone());
        Ok(())
    }

    async fn upsert_job(&self, job: &JobStatusRecord) -> Result<(), AppError> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn append_error(&self, entry: &ErrorLogEntry) -> Result<(), AppError> {
        self.errors.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock pipeline reporter that records event names.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PipelineReporter for MockReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        let label = match &event {
            PipelineEvent::Started { .. } => "Started",
            PipelineEvent::BatchSubmitted { .. } => "BatchSubmitted",
            PipelineEvent::RecordVerified { .. } => "RecordVerified",
            PipelineEvent::RecordFailed { .. } => "RecordFailed",
            PipelineEvent::BatchPanicked { .. } => "BatchPanicked",
            PipelineEvent::Progress { .. } => "Progress",
            PipelineEvent::CheckpointSaved { .. } => "CheckpointSaved",
            PipelineEvent::ShutdownRequested => "ShutdownRequested",
            PipelineEvent::Finished { .. } => "Finished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
