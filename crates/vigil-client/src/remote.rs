use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::Client;
use scraper::Html;
use serde::{Deserialize, Serialize};
use vigil_core::contact::scan_text;
use vigil_core::context::TraceContext;
use vigil_core::error::AppError;
use vigil_core::models::{ExtractionResult, Target};
use vigil_core::scorer::{DEFAULT_MAX_STAFF, StaffFragment, StaffScorer};
use vigil_core::traits::ExtractionBackend;
use vigil_core::util::{domain_key, normalize_url, resolve_link, same_site};
use vigil_core::validate::{normalize_phone, validate_address, validate_email};

use crate::cleaner::HtmdCleaner;
use crate::dom::PageContacts;
use crate::fetcher::{map_request_error, status_error};
use crate::staff::locate_fragments;

pub const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";
const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Pages requested per target, the start page included.
pub const DEFAULT_MAX_PAGES: usize = 10;

/// Only links carrying one of these are followed.
pub const FOLLOW_LINK_KEYWORDS: &[&str] = &["contact", "about", "location", "find us", "directions"];

/// Remote extraction backend for a Firecrawl-compatible scrape API.
///
/// The service renders and fetches pages; this side bounds the crawl to the
/// start page plus keyword-matching same-site links and normalizes every
/// response shape into an [`ExtractionResult`].
#[derive(Clone)]
pub struct RemoteBackend {
    id: String,
    client: Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    max_pages: usize,
    wait_for_ms: u64,
    max_staff: usize,
    cleaner: HtmdCleaner,
}

impl RemoteBackend {
    pub fn new(api_key: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, base_url, DEFAULT_REMOTE_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            max_pages: self.max_pages,
            max_staff: self.max_staff,
            ..Self::build(&self.api_key, &self.base_url, timeout)?
        })
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages.max(1);
        self
    }

    pub fn with_max_staff(mut self, max: usize) -> Self {
        self.max_staff = max;
        self
    }

    fn build(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        if api_key.trim().is_empty() {
            return Err(AppError::ConfigError(
                "remote backend requires an API key".into(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            id: "remote".to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout_secs: timeout.as_secs(),
            max_pages: DEFAULT_MAX_PAGES,
            wait_for_ms: 2000,
            max_staff: DEFAULT_MAX_STAFF,
            cleaner: HtmdCleaner::new(),
        })
    }

    async fn scrape(&self, url: &str) -> Result<ScrapeData, AppError> {
        let endpoint = format!("{}/v1/scrape", self.base_url);
        let request = ScrapeRequest {
            url,
            formats: &["markdown", "html", "links"],
            only_main_content: false,
            wait_for: self.wait_for_ms,
        };

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status.as_u16(), url));
        }

        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| AppError::MalformedResponse(format!("scrape response: {e}")))?;
        body.into_data()
    }

    /// Contacts and staff fragments from one scraped page.
    fn normalize(&self, data: &ScrapeData) -> Result<(PageContacts, Vec<StaffFragment>), AppError> {
        let mut contacts = PageContacts {
            emails: data.emails.iter().filter_map(|e| validate_email(e)).collect(),
            phones: data.phones.iter().filter_map(|p| normalize_phone(p)).collect(),
            address: data.address.as_ref().and_then(AddressField::validated),
        };

        let text = match (&data.markdown, &data.html) {
            (Some(markdown), _) if !markdown.trim().is_empty() => markdown.clone(),
            (_, Some(html)) => self.cleaner.clean(html)?,
            _ => String::new(),
        };
        let (emails, phones, address) = scan_text(&text);
        contacts.merge(PageContacts {
            emails,
            phones,
            address,
        });

        let fragments = data
            .html
            .as_deref()
            .map(|html| locate_fragments(&Html::parse_document(html)))
            .unwrap_or_default();
        Ok((contacts, fragments))
    }
}

/// Same-site links worth a request, deduplicated, at most `limit`.
fn select_links(links: &[String], start_url: &str, limit: usize) -> Vec<String> {
    let start = start_url.trim_end_matches('/');
    let mut seen = BTreeSet::new();
    links
        .iter()
        .filter(|link| {
            let lower = link.to_lowercase();
            FOLLOW_LINK_KEYWORDS
                .iter()
                .any(|k| lower.contains(k) || lower.contains(&k.replace(' ', "-")))
        })
        .filter_map(|link| resolve_link(start_url, link))
        .filter(|link| same_site(start_url, link) && link.trim_end_matches('/') != start)
        .filter(|link| seen.insert(link.clone()))
        .take(limit)
        .collect()
}

impl ExtractionBackend for RemoteBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(
        &self,
        target: &Target,
        ctx: &TraceContext,
    ) -> Result<ExtractionResult, AppError> {
        let url = normalize_url(&target.url)?;
        let start = self.scrape(&url).await?;
        let (mut contacts, mut fragments) = self.normalize(&start)?;

        let follow = select_links(&start.link_urls(), &url, self.max_pages.saturating_sub(1));
        for link in follow {
            match self.scrape(&link).await {
                Ok(data) => match self.normalize(&data) {
                    Ok((sub, sub_fragments)) => {
                        contacts.merge(sub);
                        fragments.extend(sub_fragments);
                    }
                    Err(e) => tracing::debug!(%link, error = %e, "Unusable linked page"),
                },
                Err(AppError::RateLimitExceeded) => {
                    tracing::warn!(
                        correlation_id = %ctx.correlation_id,
                        %url,
                        "Rate limited while crawling, keeping pages so far"
                    );
                    break;
                }
                Err(e) => tracing::debug!(%link, error = %e, "Skipping linked page"),
            }
        }

        let staff = StaffScorer::new(domain_key(&url))
            .with_max_candidates(self.max_staff)
            .rank(&fragments);

        tracing::info!(
            correlation_id = %ctx.correlation_id,
            backend = %self.id,
            %url,
            emails = contacts.emails.len(),
            phones = contacts.phones.len(),
            has_address = contacts.address.is_some(),
            staff = staff.len(),
            "Remote extraction finished"
        );

        Ok(ExtractionResult {
            emails: contacts.emails,
            phones: contacts.phones,
            address: contacts.address,
            staff,
            ..ExtractionResult::new(&self.id)
        })
    }
}

// ---- Scrape API types ----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: &'a [&'a str],
    only_main_content: bool,
    wait_for: u64,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

impl ScrapeResponse {
    fn into_data(self) -> Result<ScrapeData, AppError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(AppError::MalformedResponse(
                "successful response without data".into(),
            )),
            (false, _) => Err(AppError::MalformedResponse(
                self.error.unwrap_or_else(|| "scrape failed".into()),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
    html: Option<String>,
    /// Plain URLs or `{url}` / `{href}` objects.
    #[serde(default)]
    links: Vec<serde_json::Value>,
    #[serde(default)]
    emails: Vec<String>,
    #[serde(default)]
    phones: Vec<String>,
    address: Option<AddressField>,
}

impl ScrapeData {
    fn link_urls(&self) -> Vec<String> {
        self.links
            .iter()
            .filter_map(|link| match link {
                serde_json::Value::String(url) => Some(url.clone()),
                other => other
                    .get("url")
                    .or_else(|| other.get("href"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AddressField {
    One(String),
    Many(Vec<String>),
}

impl AddressField {
    fn validated(&self) -> Option<String> {
        match self {
            AddressField::One(address) => validate_address(address),
            AddressField::Many(parts) => {
                let joined = parts
                    .iter()
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                validate_address(&joined)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> RemoteBackend {
        RemoteBackend::with_base_url("test-key", "http://localhost:3002/").unwrap()
    }

    fn data(json: serde_json::Value) -> ScrapeData {
        let response: ScrapeResponse = serde_json::from_value(json).unwrap();
        response.into_data().unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            RemoteBackend::new("  "),
            Err(AppError::ConfigError(_))
        ));
        assert_eq!(backend().base_url, "http://localhost:3002");
    }

    #[test]
    fn test_request_shape() {
        let request = ScrapeRequest {
            url: "https://acmemotors.com",
            formats: &["markdown", "html", "links"],
            only_main_content: false,
            wait_for: 2000,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["onlyMainContent"], false);
        assert_eq!(json["waitFor"], 2000);
        assert_eq!(json["formats"][2], "links");
    }

    #[test]
    fn test_unsuccessful_payload_is_malformed() {
        let response: ScrapeResponse =
            serde_json::from_value(serde_json::json!({"success": false, "error": "quota"}))
                .unwrap();
        match response.into_data() {
            Err(AppError::MalformedResponse(msg)) => assert_eq!(msg, "quota"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_normalize_markdown_and_preextracted_fields() {
        let data = data(serde_json::json!({
            "success": true,
            "data": {
                "markdown": "Call 216.555.1234 or write info@acmemotors.com",
                "emails": ["SALES@acmemotors.com", "test@example.com"],
                "phones": ["+1 (216) 555-9999", "555-1234"],
                "address": ["1200 Main St,", "Cleveland, OH 44101"]
            }
        }));
        let (contacts, fragments) = backend().normalize(&data).unwrap();
        assert_eq!(
            contacts.emails.iter().collect::<Vec<_>>(),
            vec!["info@acmemotors.com", "sales@acmemotors.com"]
        );
        assert!(contacts.phones.contains("2165551234"));
        assert!(contacts.phones.contains("2165559999"));
        assert_eq!(contacts.phones.len(), 2);
        assert_eq!(
            contacts.address.as_deref(),
            Some("1200 Main St, Cleveland, OH 44101")
        );
        assert!(fragments.is_empty());
    }

    #[test]
    fn test_normalize_html_only_response() {
        let data = data(serde_json::json!({
            "success": true,
            "data": {
                "html": "<div class=\"staff-card\"><h3>Jane Smith</h3>\
                         <span class=\"title\">Sales Manager</span>\
                         <p>jane@acmemotors.com</p></div>\
                         <script>var x = 'noise@acmemotors.com';</script>"
            }
        }));
        let (contacts, fragments) = backend().normalize(&data).unwrap();
        assert!(contacts.emails.contains("jane@acmemotors.com"));
        assert!(!contacts.emails.contains("noise@acmemotors.com"));
        assert_eq!(fragments.len(), 1);
    }

    #[test]
    fn test_link_selection_is_bounded_and_filtered() {
        let data = data(serde_json::json!({
            "success": true,
            "data": {
                "links": [
                    "https://acmemotors.com/contact",
                    {"url": "https://acmemotors.com/about-us"},
                    {"href": "/find-us"},
                    "https://acmemotors.com/inventory",
                    "https://other.com/contact",
                    "https://acmemotors.com/contact",
                    "https://acmemotors.com/locations"
                ]
            }
        }));
        let links = select_links(&data.link_urls(), "https://acmemotors.com", 3);
        assert_eq!(
            links,
            vec![
                "https://acmemotors.com/contact",
                "https://acmemotors.com/about-us",
                "https://acmemotors.com/find-us",
            ]
        );
    }
}
