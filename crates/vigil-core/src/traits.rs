use std::future::Future;

use crate::context::TraceContext;
use crate::error::AppError;
use crate::job::JobStatusRecord;
use crate::models::{ErrorLogEntry, ExtractionResult, LivenessResult, Target, VerificationRecord};

/// Fetches page HTML for a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Checks whether a site answers with a real page.
///
/// `Ok` with `is_reachable == false` is a verdict (dead host, error page);
/// `Err` is reserved for transient trouble the caller may retry.
pub trait LivenessProbe: Send + Sync + Clone {
    fn probe(&self, url: &str) -> impl Future<Output = Result<LivenessResult, AppError>> + Send;
}

/// One extraction strategy: pull contact and staff data out of a site.
pub trait ExtractionBackend: Send + Sync + Clone {
    /// Stable identifier, used in `backend_id` and as the circuit prefix.
    fn id(&self) -> &str;

    fn extract(
        &self,
        target: &Target,
        ctx: &TraceContext,
    ) -> impl Future<Output = Result<ExtractionResult, AppError>> + Send;

    /// Release anything held between calls (browser processes, pools).
    fn cleanup(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Durable destination for verification output.
pub trait VerificationSink: Send + Sync + Clone {
    /// Insert or replace the record for `record.url`.
    fn upsert_result(
        &self,
        record: &VerificationRecord,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn upsert_job(&self, job: &JobStatusRecord) -> impl Future<Output = Result<(), AppError>> + Send;

    fn append_error(&self, entry: &ErrorLogEntry)
    -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op sink for runs that only write local files.
#[derive(Debug, Clone)]
pub struct NullSink;

impl VerificationSink for NullSink {
    async fn upsert_result(&self, _record: &VerificationRecord) -> Result<(), AppError> {
        Ok(())
    }

    async fn upsert_job(&self, _job: &JobStatusRecord) -> Result<(), AppError> {
        Ok(())
    }

    async fn append_error(&self, _entry: &ErrorLogEntry) -> Result<(), AppError> {
        Ok(())
    }
}
