use std::time::Duration;

use scraper::Html;
use vigil_core::context::TraceContext;
use vigil_core::error::AppError;
use vigil_core::models::{ExtractionResult, Target};
use vigil_core::scorer::{DEFAULT_MAX_STAFF, StaffFragment, StaffScorer};
use vigil_core::traits::{ExtractionBackend, Fetcher};
use vigil_core::util::{domain_key, normalize_url};

use crate::dom::{self, CONTACT_LINK_KEYWORDS, PageContacts};
use crate::staff::locate_fragments;
use crate::stealth::{HumanDelay, is_blocked};

/// Same-site contact/staff pages visited after the start page.
pub const DEFAULT_MAX_HOPS: usize = 3;

/// Local extraction backend: loads pages through a [`Fetcher`] and runs the
/// DOM heuristics over them.
///
/// Works with plain HTTP ([`crate::ReqwestFetcher`]) or a rendered DOM
/// (`BrowserFetcher`, behind the `browser` feature).
#[derive(Clone)]
pub struct PageBackend<F> {
    id: String,
    fetcher: F,
    before_load: HumanDelay,
    after_load: HumanDelay,
    block_wait: HumanDelay,
    max_hops: usize,
    max_staff: usize,
}

/// Everything taken from one parsed page. Owned, so no DOM is held across
/// an await point.
struct PageAnalysis {
    contacts: PageContacts,
    fragments: Vec<StaffFragment>,
    links: Vec<String>,
}

fn analyze(html: &str, url: &str, max_links: usize) -> PageAnalysis {
    let doc = Html::parse_document(html);
    PageAnalysis {
        contacts: dom::extract_contacts(&doc),
        fragments: locate_fragments(&doc),
        links: if max_links > 0 {
            dom::discover_links(&doc, url, CONTACT_LINK_KEYWORDS, max_links)
        } else {
            Vec::new()
        },
    }
}

impl<F: Fetcher> PageBackend<F> {
    pub fn new(id: impl Into<String>, fetcher: F) -> Self {
        Self {
            id: id.into(),
            fetcher,
            before_load: HumanDelay::new(Duration::from_millis(500), Duration::from_millis(1500)),
            after_load: HumanDelay::new(Duration::from_secs(2), Duration::from_secs(4)),
            block_wait: HumanDelay::new(Duration::from_secs(3), Duration::from_secs(5)),
            max_hops: DEFAULT_MAX_HOPS,
            max_staff: DEFAULT_MAX_STAFF,
        }
    }

    pub fn with_delays(mut self, before_load: HumanDelay, after_load: HumanDelay) -> Self {
        self.before_load = before_load;
        self.after_load = after_load;
        self
    }

    pub fn with_block_wait(mut self, wait: HumanDelay) -> Self {
        self.block_wait = wait;
        self
    }

    /// No pauses at all; for tests and local fixtures.
    pub fn without_delays(self) -> Self {
        self.with_delays(HumanDelay::none(), HumanDelay::none())
            .with_block_wait(HumanDelay::none())
    }

    pub fn with_max_hops(mut self, hops: usize) -> Self {
        self.max_hops = hops;
        self
    }

    pub fn with_max_staff(mut self, max: usize) -> Self {
        self.max_staff = max;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch a page with human-like pauses. A block page gets one extended
    /// wait and a second look before the load is declared blocked.
    async fn load(&self, url: &str) -> Result<String, AppError> {
        self.before_load.pause().await;
        let html = self.fetcher.fetch(url).await?;
        self.after_load.pause().await;

        if !is_blocked(&html) {
            return Ok(html);
        }

        tracing::warn!(%url, "Block page detected, waiting before recheck");
        self.block_wait.pause().await;
        let html = self.fetcher.fetch(url).await?;
        if is_blocked(&html) {
            return Err(AppError::Blocked(url.to_string()));
        }
        Ok(html)
    }
}

impl<F: Fetcher> ExtractionBackend for PageBackend<F> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(
        &self,
        target: &Target,
        ctx: &TraceContext,
    ) -> Result<ExtractionResult, AppError> {
        let url = normalize_url(&target.url)?;
        let html = self.load(&url).await?;

        let PageAnalysis {
            mut contacts,
            mut fragments,
            links,
        } = analyze(&html, &url, self.max_hops);

        for link in links {
            match self.load(&link).await {
                Ok(page) => {
                    let sub = analyze(&page, &link, 0);
                    contacts.merge(sub.contacts);
                    fragments.extend(sub.fragments);
                }
                Err(e) => {
                    tracing::debug!(
                        correlation_id = %ctx.correlation_id,
                        %link,
                        error = %e,
                        "Skipping linked page"
                    );
                }
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
            "Page extraction finished"
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
