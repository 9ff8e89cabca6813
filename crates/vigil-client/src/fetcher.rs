use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use url::Url;
use vigil_core::error::AppError;
use vigil_core::traits::Fetcher;

use crate::stealth::{browser_headers, random_user_agent};

/// HTTP fetcher using reqwest.
///
/// Downloads raw HTML with a rotated desktop User-Agent and browser-like
/// headers on every request. By default, SSRF protection is **enabled**:
/// requests to private/reserved IP ranges are blocked. Use
/// [`allow_private_urls`](Self::allow_private_urls) to disable this (e.g.,
/// for CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let response = self
            .client
            .get(url)
            .headers(browser_headers(random_user_agent()))
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status.as_u16(), url));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }
}

/// Maps a reqwest transport error onto the shared taxonomy.
pub(crate) fn map_request_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::connect(format!("Connection failed: {e}"))
    } else if e.is_request() || e.is_body() {
        AppError::network(e.to_string())
    } else {
        AppError::HttpError(e.to_string())
    }
}

pub(crate) fn status_error(status: u16, url: &str) -> AppError {
    if status == 429 {
        AppError::RateLimitExceeded
    } else {
        AppError::HttpStatus {
            status,
            url: url.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
///
/// An unresolvable host is a connect failure: the site is gone.
pub(crate) async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::InvalidTarget(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::InvalidTarget(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::InvalidTarget(format!("{url}: no host")))?;

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::InvalidTarget(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::connect(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::connect(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    if let Some(private) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return Err(AppError::InvalidTarget(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {}",
            private.ip()
        )));
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254.0.0/16, cloud metadata
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
