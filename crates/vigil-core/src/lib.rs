pub mod checkpoint;
pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod contact;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod guard;
pub mod job;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod retry;
pub mod scorer;
pub mod shutdown;
pub mod traits;
pub mod util;
pub mod validate;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use checkpoint::{CheckpointStore, JobProgress, ProgressTracker};
pub use circuit_breaker::{CircuitConfig, CircuitRegistry};
pub use classify::CategoryTable;
pub use config::PipelineConfig;
pub use context::TraceContext;
pub use coordinator::{EscalationPolicy, HybridCoordinator};
pub use error::{AppError, ErrorClass};
pub use guard::ResourceGuard;
pub use job::{JobStatus, JobStatusRecord};
pub use models::{
    ContactEntry, ContactKind, ErrorInfo, ErrorLogEntry, ExtractionResult, FailureRecord,
    LivenessResult, MergedResult, MethodUsed, RoleCategory, StaffCandidate, Target,
    VerificationRecord, compute_hash,
};
pub use orchestrator::{BatchOrchestrator, PipelineEvent, PipelineReporter, TracingReporter};
pub use output::{ResultRow, ResultWriter, RunStats};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use scorer::{StaffFragment, StaffScorer};
pub use shutdown::{ShutdownReport, ShutdownSupervisor};
pub use traits::{ExtractionBackend, Fetcher, LivenessProbe, NullSink, VerificationSink};
