//! Anti-block countermeasures shared by the HTTP fetcher, the liveness
//! probe and the browser fetcher.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};

/// Desktop browser identities rotated per request.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Lowercased phrases that mark an anti-automation wall.
pub const BLOCK_MARKERS: &[&str] = &["access denied", "captcha", "blocked", "security check"];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]
}

/// Headers a desktop browser sends on a top-level navigation.
pub fn browser_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(user_agent) {
        headers.insert(header::USER_AGENT, ua);
    }
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.5"),
    );
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers
}

/// True when the page looks like a CAPTCHA or access-denied wall.
pub fn is_blocked(html: &str) -> bool {
    let lower = html.to_lowercase();
    BLOCK_MARKERS.iter().any(|m| lower.contains(m))
}

/// A uniformly random pause between `min` and `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDelay {
    pub min: Duration,
    pub max: Duration,
}

impl HumanDelay {
    pub const fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub const fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let span = (self.max - self.min).as_millis() as u64;
        self.min + Duration::from_millis(fastrand::u64(0..=span))
    }

    pub async fn pause(&self) {
        let wait = self.sample();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_user_agent_comes_from_pool() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[test]
    fn test_browser_headers() {
        let headers = browser_headers(USER_AGENTS[0]);
        assert_eq!(headers.get(header::USER_AGENT).unwrap(), USER_AGENTS[0]);
        assert_eq!(headers.get(header::DNT).unwrap(), "1");
        assert!(headers.contains_key(header::ACCEPT_LANGUAGE));
    }

    #[test]
    fn test_block_markers() {
        assert!(is_blocked("<h1>Access Denied</h1>"));
        assert!(is_blocked("Please complete the CAPTCHA"));
        assert!(!is_blocked("<h1>Acme Motors</h1>"));
    }

    #[test]
    fn test_delay_sample_within_bounds() {
        let delay = HumanDelay::new(Duration::from_millis(500), Duration::from_millis(1500));
        for _ in 0..50 {
            let d = delay.sample();
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
        }
        assert_eq!(HumanDelay::none().sample(), Duration::ZERO);
    }
}
