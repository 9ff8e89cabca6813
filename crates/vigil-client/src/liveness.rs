use std::time::Duration;

use moka::future::Cache;
use reqwest::{Client, Response, StatusCode};
use vigil_core::error::AppError;
use vigil_core::models::LivenessResult;
use vigil_core::traits::LivenessProbe;

use crate::fetcher::{map_request_error, status_error, validate_url};
use crate::stealth::{browser_headers, random_user_agent};

/// Final-URL fragments that mean the site did not serve its real homepage.
pub const BAD_URL_MARKERS: &[&str] = &[
    "login",
    "error",
    "404",
    "not-found",
    "blocked",
    "unavailable",
    "robot",
];

/// HEAD-then-GET liveness check that follows redirects.
///
/// A 2xx answer at a clean final URL is live. 4xx answers and redirects to
/// login/error pages are a "not live" verdict. 5xx and 429 are returned as
/// errors so the caller's retry policy can try again, and so are connection
/// failures, which the caller classifies as unreachable.
#[derive(Clone)]
pub struct HttpLivenessProbe {
    client: Client,
    timeout_secs: u64,
    ssrf_protection: bool,
    cache: Option<Cache<String, LivenessResult>>,
}

impl HttpLivenessProbe {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            ssrf_protection: true,
            cache: None,
        })
    }

    /// Remember verdicts for `ttl` so duplicate URLs in one input are only
    /// probed once.
    pub fn with_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.cache = Some(
            Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        );
        self
    }

    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    async fn send(&self, method: reqwest::Method, url: &str) -> Result<Response, AppError> {
        self.client
            .request(method, url)
            .headers(browser_headers(random_user_agent()))
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout_secs))
    }

    async fn check(&self, url: &str) -> Result<LivenessResult, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        if let Ok(head) = self.send(reqwest::Method::HEAD, url).await
            && head.status() == StatusCode::OK
        {
            let final_url = head.url().to_string();
            if head.headers().contains_key("cf-ray") {
                tracing::warn!(%url, "Possible Cloudflare protection detected");
            }
            return verdict(url, &final_url, head.status().as_u16());
        }

        let response = self.send(reqwest::Method::GET, url).await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let cf_ray = response.headers().contains_key("cf-ray");

        let result = verdict(url, &final_url, status)?;
        if result.is_reachable {
            let body = response.text().await.unwrap_or_default();
            if cf_ray || body.to_lowercase().contains("captcha") {
                tracing::warn!(%url, "Possible protection page detected");
            }
        }
        Ok(result)
    }
}

/// Turns a final status and URL into a verdict or a retryable error.
fn verdict(url: &str, final_url: &str, status: u16) -> Result<LivenessResult, AppError> {
    if status == 429 || status >= 500 {
        return Err(status_error(status, url));
    }

    let lower = final_url.to_lowercase();
    if let Some(marker) = BAD_URL_MARKERS.iter().find(|m| lower.contains(*m)) {
        tracing::info!(%url, %final_url, marker, "Resolved to a non-content page");
        return Ok(LivenessResult::unreachable(
            Some(final_url.to_string()),
            Some(status),
        ));
    }

    if (200..300).contains(&status) {
        Ok(LivenessResult::reachable(final_url, status))
    } else {
        tracing::info!(%url, status, "Site answered with a client error");
        Ok(LivenessResult::unreachable(
            Some(final_url.to_string()),
            Some(status),
        ))
    }
}

impl LivenessProbe for HttpLivenessProbe {
    async fn probe(&self, url: &str) -> Result<LivenessResult, AppError> {
        if let Some(cache) = &self.cache
            && let Some(hit) = cache.get(url).await
        {
            tracing::debug!(%url, "Liveness cache hit");
            return Ok(hit);
        }

        let result = self.check(url).await?;
        if let Some(cache) = &self.cache {
            cache.insert(url.to_string(), result.clone()).await;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_live() {
        let result = verdict("https://a.com", "https://www.a.com/", 200).unwrap();
        assert!(result.is_reachable);
        assert_eq!(result.resolved_url.as_deref(), Some("https://www.a.com/"));
    }

    #[test]
    fn test_redirect_to_login_is_not_live() {
        let result = verdict("https://a.com", "https://a.com/login?next=/", 200).unwrap();
        assert!(!result.is_reachable);
        let result = verdict("https://a.com", "https://a.com/page-not-found", 200).unwrap();
        assert!(!result.is_reachable);
    }

    #[test]
    fn test_client_error_is_not_live() {
        let result = verdict("https://a.com", "https://a.com/", 403).unwrap();
        assert!(!result.is_reachable);
        assert_eq!(result.status_code, Some(403));
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(verdict("https://a.com", "https://a.com/", 503).unwrap_err().is_retryable());
        assert!(matches!(
            verdict("https://a.com", "https://a.com/", 429),
            Err(AppError::RateLimitExceeded)
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        // Port 9 (discard) is closed on loopback in CI containers.
        let probe = HttpLivenessProbe::new(Duration::from_secs(2))
            .unwrap()
            .allow_private_urls();
        let err = probe.probe("http://127.0.0.1:9/").await.unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_private_targets_rejected_by_default() {
        let probe = HttpLivenessProbe::new(Duration::from_secs(2)).unwrap();
        let err = probe.probe("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTarget(_)));
    }
}
