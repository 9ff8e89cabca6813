use thiserror::Error;

/// Application-wide error types for Vigil.
#[derive(Error, Debug)]
pub enum AppError {
    /// The remote answered with a non-success status code.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// HTTP request failed before a status was available.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded (HTTP 429 or an explicit service signal).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error. `connect` is set when the host could not be
    /// reached at all (refused, unresolvable).
    #[error("Network error: {message}")]
    NetworkError { message: String, connect: bool },

    /// The page is an anti-automation wall (CAPTCHA, access denied).
    #[error("Blocked by anti-automation page: {0}")]
    Blocked(String),

    /// The circuit for this resource is open; the call was not attempted.
    #[error("Circuit open for {resource}")]
    CircuitOpen { resource: String },

    /// A transient error persisted through every retry.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    /// A target record could not be turned into a fetchable URL.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// A remote service returned a payload we could not interpret.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Headless browser failure (launch, navigation, CDP).
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// HTML-to-text conversion failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Filesystem I/O failed (checkpoint, exports).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Work was refused because shutdown is in progress.
    #[error("Shutdown in progress")]
    ShuttingDown,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// How the retry layer treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff.
    Transient,
    /// Retrying will not help.
    Fatal,
}

impl AppError {
    pub fn network(message: impl Into<String>) -> Self {
        AppError::NetworkError {
            message: message.into(),
            connect: false,
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        AppError::NetworkError {
            message: message.into(),
            connect: true,
        }
    }

    /// Maps the error onto the transient/fatal taxonomy.
    ///
    /// Timeouts, network failures, 5xx and 429 are transient. Other 4xx,
    /// malformed responses and everything else are fatal.
    pub fn classify(&self) -> ErrorClass {
        match self {
            AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::NetworkError { .. }
            | AppError::BrowserError(_) => ErrorClass::Transient,
            AppError::HttpStatus { status, .. } if *status == 429 || *status >= 500 => {
                ErrorClass::Transient
            }
            AppError::HttpError(msg)
                if msg.contains("timeout") || msg.contains("connect") || msg.contains("reset") =>
            {
                ErrorClass::Transient
            }
            _ => ErrorClass::Fatal,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Transient
    }

    /// Stable label used as the circuit breaker's per-type counter key
    /// and as the `error_type` of error-log entries.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::HttpStatus { .. } => "http_status",
            AppError::HttpError(_) => "http",
            AppError::Timeout(_) => "timeout",
            AppError::RateLimitExceeded => "rate_limited",
            AppError::NetworkError { .. } => "network",
            AppError::Blocked(_) => "blocked",
            AppError::CircuitOpen { .. } => "circuit_open",
            AppError::RetriesExhausted { source, .. } => source.kind(),
            AppError::InvalidTarget(_) => "invalid_target",
            AppError::MalformedResponse(_) => "malformed_response",
            AppError::BrowserError(_) => "browser",
            AppError::CleanerError(_) => "cleaner",
            AppError::SerializationError(_) => "serialization",
            AppError::IoError(_) => "io",
            AppError::CsvError(_) => "csv",
            AppError::DatabaseError(_) => "database",
            AppError::ConfigError(_) => "config",
            AppError::ShuttingDown => "shutdown",
            AppError::Generic(_) => "generic",
        }
    }

    /// The innermost error, looking through retry exhaustion.
    pub fn root_cause(&self) -> &AppError {
        match self {
            AppError::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True when the host could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self.root_cause(),
            AppError::NetworkError { connect: true, .. }
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, AppError::CircuitOpen { .. })
    }

    /// Errors on the durable-state boundary. These are the only errors
    /// allowed to abort a whole run.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AppError::IoError(_)
                | AppError::CsvError(_)
                | AppError::SerializationError(_)
                | AppError::DatabaseError(_)
        )
    }
}
