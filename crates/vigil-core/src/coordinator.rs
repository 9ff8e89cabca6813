//! Hybrid extraction: local backend first, remote backend on failure or
//! incomplete data, union of whatever succeeded.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitRegistry;
use crate::context::TraceContext;
use crate::error::AppError;
use crate::models::{ErrorInfo, ExtractionResult, MergedResult, MethodUsed, Target};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::scorer::{DEFAULT_MAX_STAFF, finalize};
use crate::traits::ExtractionBackend;
use crate::util::domain_key;

/// When the remote backend is consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationPolicy {
    /// Escalate when the local backend fails or returns incomplete data.
    #[default]
    Auto,
    /// Escalate only when the local backend fails.
    Fallback,
    /// Always run both and merge.
    Combine,
}

impl EscalationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationPolicy::Auto => "auto",
            EscalationPolicy::Fallback => "fallback",
            EscalationPolicy::Combine => "combine",
        }
    }
}

impl fmt::Display for EscalationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EscalationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(EscalationPolicy::Auto),
            "fallback" => Ok(EscalationPolicy::Fallback),
            "combine" => Ok(EscalationPolicy::Combine),
            _ => Err(format!("Unknown escalation policy: {}", s)),
        }
    }
}

/// Runs the local and (optionally) remote backend for one target.
///
/// Each backend call goes through [`retry_with_backoff`] with the resource
/// key `"{backend_id}:{domain}"`, so a domain that keeps failing on one
/// backend does not trip the circuit of the other backend or of other
/// domains.
#[derive(Clone)]
pub struct HybridCoordinator<A, B>
where
    A: ExtractionBackend,
    B: ExtractionBackend,
{
    local: A,
    remote: Option<B>,
    circuits: CircuitRegistry,
    retry: RetryPolicy,
    policy: EscalationPolicy,
    require_staff: bool,
    max_staff: usize,
}

impl<A, B> HybridCoordinator<A, B>
where
    A: ExtractionBackend,
    B: ExtractionBackend,
{
    pub fn new(local: A, remote: Option<B>, circuits: CircuitRegistry) -> Self {
        Self {
            local,
            remote,
            circuits,
            retry: RetryPolicy::default(),
            policy: EscalationPolicy::default(),
            require_staff: false,
            max_staff: DEFAULT_MAX_STAFF,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: EscalationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Count "at least one staff candidate" toward completeness.
    pub fn with_require_staff(mut self, require: bool) -> Self {
        self.require_staff = require;
        self
    }

    pub fn with_max_staff(mut self, max: usize) -> Self {
        self.max_staff = max;
        self
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    pub async fn extract(&self, target: &Target, ctx: &TraceContext) -> MergedResult {
        let domain = domain_key(&target.url);
        let local = self.run(&self.local, &domain, target, ctx).await;

        let escalate = match (&local, self.policy) {
            (Err(_), _) | (_, EscalationPolicy::Combine) => true,
            (Ok(result), EscalationPolicy::Auto) => !result.is_complete(self.require_staff),
            (Ok(_), EscalationPolicy::Fallback) => false,
        };

        let remote = match (&self.remote, escalate) {
            (Some(remote), true) => {
                tracing::info!(
                    url = %target.url,
                    policy = %self.policy,
                    local_failed = local.is_err(),
                    "Escalating to remote backend"
                );
                Some(self.run(remote, &domain, target, ctx).await)
            }
            _ => None,
        };

        let merged = self.merge(local, remote);
        tracing::info!(
            url = %target.url,
            method = %merged.method_used,
            backend = %merged.backend_id,
            emails = merged.emails.len(),
            phones = merged.phones.len(),
            staff = merged.staff.len(),
            has_address = merged.address.is_some(),
            "Extraction finished"
        );
        merged
    }

    /// Release both backends.
    pub async fn cleanup(&self) {
        self.local.cleanup().await;
        if let Some(remote) = &self.remote {
            remote.cleanup().await;
        }
    }

    async fn run<E: ExtractionBackend>(
        &self,
        backend: &E,
        domain: &str,
        target: &Target,
        ctx: &TraceContext,
    ) -> Result<ExtractionResult, AppError> {
        let resource = format!("{}:{}", backend.id(), domain);
        let result = retry_with_backoff(&self.circuits, &resource, &self.retry, move || {
            backend.extract(target, ctx)
        })
        .await;

        if let Err(e) = &result {
            tracing::warn!(
                backend = %backend.id(),
                %resource,
                error = %e,
                circuit_open = e.is_circuit_open(),
                "Backend failed"
            );
        }
        result
    }

    fn merge(
        &self,
        local: Result<ExtractionResult, AppError>,
        remote: Option<Result<ExtractionResult, AppError>>,
    ) -> MergedResult {
        let mut errors: Vec<ErrorInfo> = Vec::new();
        let mut parts: Vec<ExtractionResult> = Vec::new();

        match local {
            Ok(result) => parts.push(result),
            Err(e) => errors.push(ErrorInfo::from(&e)),
        }
        let local_ok = !parts.is_empty();
        match remote {
            Some(Ok(result)) => parts.push(result),
            Some(Err(e)) => errors.push(ErrorInfo::from(&e)),
            None => {}
        }

        let method_used = match (local_ok, parts.len()) {
            (_, 0) => MethodUsed::Failed,
            (true, 1) => MethodUsed::LocalOnly,
            (false, _) => MethodUsed::RemoteOnly,
            (true, _) => MethodUsed::Combined,
        };

        let backend_id = if parts.is_empty() {
            "none".to_string()
        } else {
            parts
                .iter()
                .map(|p| p.backend_id.as_str())
                .collect::<Vec<_>>()
                .join("+")
        };

        let mut merged = MergedResult {
            emails: Default::default(),
            phones: Default::default(),
            address: None,
            staff: Vec::new(),
            backend_id,
            succeeded: !parts.is_empty(),
            error: errors.into_iter().next(),
            method_used,
        };

        let mut staff = Vec::new();
        for part in parts {
            merged.emails.extend(part.emails);
            merged.phones.extend(part.phones);
            if merged.address.is_none() {
                merged.address = part.address;
            }
            staff.extend(part.staff);
        }
        merged.staff = finalize(staff, self.max_staff);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitConfig;
    use crate::models::{RoleCategory, StaffCandidate};
    use crate::testutil::MockBackend;

    fn target() -> Target {
        Target::new("Acme Motors", "https://acmemotors.com")
    }

    fn ctx() -> TraceContext {
        TraceContext::detached("Acme Motors")
    }

    fn partial(id: &str) -> ExtractionResult {
        let mut result = ExtractionResult::new(id);
        result.emails.insert("sales@acmemotors.com".into());
        result.phones.insert("2165551234".into());
        result
    }

    fn complete(id: &str) -> ExtractionResult {
        let mut result = partial(id);
        result.address = Some("4500 Brookpark Rd, Cleveland, OH 44134".into());
        result
    }

    fn person(name: &str, email: &str, confidence: f64) -> StaffCandidate {
        StaffCandidate {
            name: name.into(),
            title: Some("Sales Manager".into()),
            email: Some(email.into()),
            phone: None,
            photo_url: None,
            role_category: RoleCategory::Sales,
            priority: 2,
            confidence,
        }
    }

    fn coordinator(
        local: MockBackend,
        remote: MockBackend,
    ) -> HybridCoordinator<MockBackend, MockBackend> {
        HybridCoordinator::new(local, Some(remote), CircuitRegistry::default())
            .with_retry(RetryPolicy::immediate(1))
    }

    #[tokio::test]
    async fn test_auto_escalates_when_address_missing() {
        let local = MockBackend::with_responses("page", vec![Ok(partial("page"))]);
        let mut remote_result = ExtractionResult::new("remote");
        remote_result.address = Some("4500 Brookpark Rd, Cleveland, OH 44134".into());
        remote_result.emails.insert("service@acmemotors.com".into());
        let remote = MockBackend::with_responses("remote", vec![Ok(remote_result)]);

        let merged = coordinator(local, remote.clone()).extract(&target(), &ctx()).await;

        assert_eq!(merged.method_used, MethodUsed::Combined);
        assert!(merged.succeeded);
        assert_eq!(
            merged.address.as_deref(),
            Some("4500 Brookpark Rd, Cleveland, OH 44134")
        );
        assert_eq!(merged.emails.len(), 2);
        assert_eq!(merged.phones.len(), 1);
        assert_eq!(merged.backend_id, "page+remote");
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_auto_stops_when_local_is_complete() {
        let local = MockBackend::with_responses("page", vec![Ok(complete("page"))]);
        let remote = MockBackend::new("remote");

        let merged = coordinator(local, remote.clone()).extract(&target(), &ctx()).await;

        assert_eq!(merged.method_used, MethodUsed::LocalOnly);
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_require_staff_makes_staffless_result_incomplete() {
        let local = MockBackend::with_responses("page", vec![Ok(complete("page"))]);
        let remote = MockBackend::new("remote");

        let merged = coordinator(local, remote.clone())
            .with_require_staff(true)
            .extract(&target(), &ctx())
            .await;

        assert_eq!(merged.method_used, MethodUsed::Combined);
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_only_escalates_on_failure() {
        let local = MockBackend::with_responses("page", vec![Ok(partial("page"))]);
        let remote = MockBackend::new("remote");

        let merged = coordinator(local, remote.clone())
            .with_policy(EscalationPolicy::Fallback)
            .extract(&target(), &ctx())
            .await;

        assert_eq!(merged.method_used, MethodUsed::LocalOnly);
        assert!(merged.address.is_none());
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_combine_always_runs_both() {
        let local = MockBackend::with_responses("page", vec![Ok(complete("page"))]);
        let remote = MockBackend::new("remote");

        let merged = coordinator(local, remote.clone())
            .with_policy(EscalationPolicy::Combine)
            .extract(&target(), &ctx())
            .await;

        assert_eq!(merged.method_used, MethodUsed::Combined);
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_local_failure_escalates_to_remote_only() {
        let local = MockBackend::with_responses(
            "page",
            vec![Err(AppError::HttpStatus {
                status: 403,
                url: "https://acmemotors.com".into(),
            })],
        );
        let remote = MockBackend::with_responses("remote", vec![Ok(complete("remote"))]);

        let merged = coordinator(local.clone(), remote)
            .with_policy(EscalationPolicy::Fallback)
            .extract(&target(), &ctx())
            .await;

        assert_eq!(merged.method_used, MethodUsed::RemoteOnly);
        assert!(merged.succeeded);
        assert_eq!(merged.error.as_ref().map(|e| e.kind.as_str()), Some("http_status"));
        // 403 is fatal: one attempt, no retry.
        assert_eq!(local.call_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_local_data() {
        let local = MockBackend::with_responses("page", vec![Ok(partial("page"))]);
        let remote = MockBackend::with_responses(
            "remote",
            vec![Err(AppError::MalformedResponse("no data".into()))],
        );

        let merged = coordinator(local, remote).extract(&target(), &ctx()).await;

        assert_eq!(merged.method_used, MethodUsed::LocalOnly);
        assert!(merged.succeeded);
        assert_eq!(merged.emails.len(), 1);
        assert!(merged.error.is_some());
    }

    #[tokio::test]
    async fn test_both_failing_is_failed() {
        let local = MockBackend::with_handler("page", |_| Err(AppError::Timeout(15)));
        let remote = MockBackend::with_handler("remote", |_| Err(AppError::Timeout(30)));

        let merged = coordinator(local.clone(), remote.clone())
            .extract(&target(), &ctx())
            .await;

        assert_eq!(merged.method_used, MethodUsed::Failed);
        assert!(!merged.succeeded);
        assert_eq!(merged.backend_id, "none");
        assert_eq!(merged.error.as_ref().map(|e| e.kind.as_str()), Some("timeout"));
        // immediate(1): two attempts each.
        assert_eq!(local.call_count(), 2);
        assert_eq!(remote.call_count(), 2);
    }

    #[tokio::test]
    async fn test_local_without_remote_configured() {
        let local = MockBackend::with_handler("page", |_| Err(AppError::Timeout(15)));
        let coordinator: HybridCoordinator<MockBackend, MockBackend> =
            HybridCoordinator::new(local, None, CircuitRegistry::default())
                .with_retry(RetryPolicy::immediate(0));

        let merged = coordinator.extract(&target(), &ctx()).await;
        assert_eq!(merged.method_used, MethodUsed::Failed);
    }

    #[tokio::test]
    async fn test_transient_local_error_is_retried() {
        let local = MockBackend::with_responses(
            "page",
            vec![Err(AppError::Timeout(15)), Ok(complete("page"))],
        );
        let remote = MockBackend::new("remote");

        let merged = coordinator(local.clone(), remote.clone())
            .extract(&target(), &ctx())
            .await;

        assert_eq!(merged.method_used, MethodUsed::LocalOnly);
        assert_eq!(local.call_count(), 2);
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_open_local_circuit_still_reaches_remote() {
        let circuits = CircuitRegistry::new(CircuitConfig {
            failure_threshold: 1,
            ..CircuitConfig::default()
        });
        circuits.record_error("page:acmemotors.com", "timeout");

        let local = MockBackend::new("page");
        let remote = MockBackend::with_responses("remote", vec![Ok(complete("remote"))]);
        let coordinator = HybridCoordinator::new(local.clone(), Some(remote), circuits)
            .with_retry(RetryPolicy::immediate(1));

        let merged = coordinator.extract(&target(), &ctx()).await;

        assert_eq!(merged.method_used, MethodUsed::RemoteOnly);
        assert_eq!(local.call_count(), 0);
        assert_eq!(
            merged.error.as_ref().map(|e| e.kind.as_str()),
            Some("circuit_open")
        );
    }

    #[tokio::test]
    async fn test_staff_merge_dedupes_across_backends() {
        let mut local_result = partial("page");
        local_result.staff.push(person("Jane Doe", "jane@acmemotors.com", 5.0));
        let mut remote_result = complete("remote");
        remote_result.staff.push(person("Jane Doe", "jane@acmemotors.com", 7.0));
        remote_result.staff.push(person("John Roe", "john@acmemotors.com", 6.0));

        let local = MockBackend::with_responses("page", vec![Ok(local_result)]);
        let remote = MockBackend::with_responses("remote", vec![Ok(remote_result)]);

        let merged = coordinator(local, remote).extract(&target(), &ctx()).await;

        assert_eq!(merged.staff.len(), 2);
        assert_eq!(merged.staff[0].name, "Jane Doe");
        assert_eq!(merged.staff[0].confidence, 7.0);
    }

    #[tokio::test]
    async fn test_cleanup_reaches_both_backends() {
        let local = MockBackend::new("page");
        let remote = MockBackend::new("remote");
        coordinator(local.clone(), remote.clone()).cleanup().await;
        assert_eq!(local.cleanup_count(), 1);
        assert_eq!(remote.cleanup_count(), 1);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("AUTO".parse::<EscalationPolicy>().unwrap(), EscalationPolicy::Auto);
        assert_eq!(
            "combine".parse::<EscalationPolicy>().unwrap(),
            EscalationPolicy::Combine
        );
        assert!("sometimes".parse::<EscalationPolicy>().is_err());
        assert_eq!(EscalationPolicy::default(), EscalationPolicy::Auto);
    }
}
