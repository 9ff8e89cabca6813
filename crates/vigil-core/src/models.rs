use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// One business to verify: a display name plus its published website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub url: String,
}

impl Target {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Outcome of a liveness check for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResult {
    pub is_reachable: bool,
    /// Final URL after redirects, when the site answered at all.
    pub resolved_url: Option<String>,
    pub status_code: Option<u16>,
    pub checked_at: DateTime<Utc>,
}

impl LivenessResult {
    pub fn reachable(resolved_url: impl Into<String>, status_code: u16) -> Self {
        Self {
            is_reachable: true,
            resolved_url: Some(resolved_url.into()),
            status_code: Some(status_code),
            checked_at: Utc::now(),
        }
    }

    pub fn unreachable(resolved_url: Option<String>, status_code: Option<u16>) -> Self {
        Self {
            is_reachable: false,
            resolved_url,
            status_code,
            checked_at: Utc::now(),
        }
    }
}

/// Serializable summary of an [`AppError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&AppError> for ErrorInfo {
    fn from(err: &AppError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Role bucket of a staff member, derived from their title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleCategory {
    Management,
    Sales,
    Service,
    General,
}

impl RoleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleCategory::Management => "management",
            RoleCategory::Sales => "sales",
            RoleCategory::Service => "service",
            RoleCategory::General => "general",
        }
    }

    /// Sort priority for downstream consumers: higher first.
    pub fn priority(&self) -> u8 {
        match self {
            RoleCategory::Management => 3,
            RoleCategory::Sales => 2,
            RoleCategory::Service => 1,
            RoleCategory::General => 0,
        }
    }
}

impl fmt::Display for RoleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scored person found on a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffCandidate {
    pub name: String,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub role_category: RoleCategory,
    pub priority: u8,
    /// Additive ranking heuristic, not a probability.
    pub confidence: f64,
}

impl StaffCandidate {
    /// Name plus at least one way to identify or reach the person.
    pub fn is_retainable(&self) -> bool {
        !self.name.is_empty()
            && (self.title.is_some() || self.email.is_some() || self.phone.is_some())
    }
}

/// Output of one backend invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    pub address: Option<String>,
    pub staff: Vec<StaffCandidate>,
    pub backend_id: String,
    pub succeeded: bool,
    pub error: Option<ErrorInfo>,
}

impl ExtractionResult {
    /// An empty, successful result for the given backend.
    pub fn new(backend_id: impl Into<String>) -> Self {
        Self {
            emails: BTreeSet::new(),
            phones: BTreeSet::new(),
            address: None,
            staff: Vec::new(),
            backend_id: backend_id.into(),
            succeeded: true,
            error: None,
        }
    }

    pub fn failed(backend_id: impl Into<String>, error: &AppError) -> Self {
        Self {
            succeeded: false,
            error: Some(ErrorInfo::from(error)),
            ..Self::new(backend_id)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
            && self.phones.is_empty()
            && self.address.is_none()
            && self.staff.is_empty()
    }

    /// Email, phone, and address all present, plus staff when requested.
    pub fn is_complete(&self, require_staff: bool) -> bool {
        !self.emails.is_empty()
            && !self.phones.is_empty()
            && self.address.is_some()
            && (!require_staff || !self.staff.is_empty())
    }
}

/// Which backend(s) produced a merged result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodUsed {
    LocalOnly,
    RemoteOnly,
    Combined,
    Failed,
}

impl MethodUsed {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodUsed::LocalOnly => "local-only",
            MethodUsed::RemoteOnly => "remote-only",
            MethodUsed::Combined => "combined",
            MethodUsed::Failed => "failed",
        }
    }
}

impl fmt::Display for MethodUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coordinator output: the union of every contributing backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedResult {
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    pub address: Option<String>,
    pub staff: Vec<StaffCandidate>,
    /// Contributing backend ids joined with `+`.
    pub backend_id: String,
    pub succeeded: bool,
    /// First backend error, if any backend failed.
    pub error: Option<ErrorInfo>,
    pub method_used: MethodUsed,
}

impl MergedResult {
    pub fn contacts(&self) -> Vec<ContactEntry> {
        let mut contacts: Vec<ContactEntry> = self
            .emails
            .iter()
            .map(|e| ContactEntry::new(ContactKind::Email, e))
            .chain(
                self.phones
                    .iter()
                    .map(|p| ContactEntry::new(ContactKind::Phone, p)),
            )
            .collect();
        if let Some(address) = &self.address {
            contacts.push(ContactEntry::new(ContactKind::Address, address));
        }
        contacts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Email,
    Phone,
    Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEntry {
    #[serde(rename = "type")]
    pub kind: ContactKind,
    pub value: String,
}

impl ContactEntry {
    pub fn new(kind: ContactKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Verification result handed to the persistence sink, keyed by URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub name: String,
    pub url: String,
    pub is_active: bool,
    pub resolved_url: Option<String>,
    pub category: String,
    pub contacts: Vec<ContactEntry>,
    pub staff: Vec<StaffCandidate>,
    pub method_used: Option<MethodUsed>,
    pub checked_at: DateTime<Utc>,
    pub correlation_id: String,
    pub job_id: String,
}

impl VerificationRecord {
    pub fn emails(&self) -> impl Iterator<Item = &str> {
        self.contacts_of(ContactKind::Email)
    }

    pub fn phones(&self) -> impl Iterator<Item = &str> {
        self.contacts_of(ContactKind::Phone)
    }

    pub fn address(&self) -> Option<&str> {
        self.contacts_of(ContactKind::Address).next()
    }

    fn contacts_of(&self, kind: ContactKind) -> impl Iterator<Item = &str> {
        self.contacts
            .iter()
            .filter(move |c| c.kind == kind)
            .map(|c| c.value.as_str())
    }

    /// SHA-256 of the extracted payload, for change detection in the sink.
    pub fn data_hash(&self) -> String {
        let payload = serde_json::json!({
            "is_active": self.is_active,
            "resolved_url": self.resolved_url,
            "category": self.category,
            "contacts": self.contacts,
            "staff": self.staff,
        });
        compute_hash(&payload.to_string())
    }
}

/// A record that could not be processed, kept for operator follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub name: String,
    pub url: String,
    pub error: String,
    #[serde(default)]
    pub error_type: String,
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(target: &Target, error: &AppError) -> Self {
        Self::from_info(target, &ErrorInfo::from(error))
    }

    pub fn from_info(target: &Target, info: &ErrorInfo) -> Self {
        Self {
            name: target.name.clone(),
            url: target.url.clone(),
            error: info.message.clone(),
            error_type: info.kind.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Entry appended to the sink's error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub error_type: String,
    pub message: String,
    pub job_id: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn new(error: &AppError, job_id: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            error_type: error.kind().to_string(),
            message: error.to_string(),
            job_id: job_id.into(),
            context,
            created_at: Utc::now(),
        }
    }

    pub fn from_failure(
        failure: &FailureRecord,
        job_id: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            error_type: failure.error_type.clone(),
            message: failure.error.clone(),
            job_id: job_id.into(),
            context,
            created_at: Utc::now(),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
