use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use vigil_core::error::AppError;
use vigil_core::guard::ResourceGuard;
use vigil_core::traits::Fetcher;

use crate::stealth::random_user_agent;

/// Headless-browser fetcher using Chromium via the Chrome DevTools Protocol.
///
/// Renders JavaScript before returning the HTML, so contact details injected
/// by client-side widgets are visible to the DOM heuristics.
///
/// A single Chromium process is shared across all clones; each
/// [`Fetcher::fetch`] call opens its own tab, which a [`ResourceGuard`]
/// closes on every exit path. The fetch timeout covers opening the tab.
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Mutex<Option<Arc<Browser>>>>,
    timeout: Duration,
}

impl BrowserFetcher {
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30)).await
    }

    /// Launches headless Chromium with a rotated User-Agent and automation
    /// markers disabled.
    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={}", random_user_agent()))
            .build()
            .map_err(|e| AppError::BrowserError(format!("config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("launch: {e}")))?;

        // The CDP handler must be polled for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(Some(Arc::new(browser)))),
            timeout,
        })
    }

    /// Snap-packaged Chromium wraps the real binary and drops unknown
    /// flags, so look for the real one first. `CHROME_BIN` wins.
    fn find_chrome_binary() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(p);
            if path.exists() {
                return Some(path);
            }
        }

        [
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
    }

    /// The shared browser handle; the lock is released before any CDP call.
    async fn browser(&self) -> Result<Arc<Browser>, AppError> {
        self.browser
            .lock()
            .await
            .clone()
            .ok_or_else(|| AppError::BrowserError("browser already closed".into()))
    }

    /// Shut the Chromium process down. Later fetches fail.
    ///
    /// With fetches still in flight the process is killed when the last of
    /// them drops its handle.
    pub async fn close(&self) {
        let Some(shared) = self.browser.lock().await.take() else {
            return;
        };
        let Some(mut browser) = Arc::into_inner(shared) else {
            tracing::warn!("Browser still in use by open tabs, leaving shutdown to them");
            return;
        };
        if let Err(e) = browser.close().await {
            tracing::warn!(error = %e, "Browser close failed");
        }
        let _ = browser.wait().await;
        tracing::info!("Browser closed");
    }
}

impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let timeout = self.timeout;
        let browser = self.browser().await?;

        let mut tabs = ResourceGuard::new("browser-tab", |pages: Vec<Page>| {
            for page in pages {
                tokio::spawn(async move {
                    let _ = page.close().await;
                });
            }
            Ok(())
        });

        let rendered = within(timeout, async {
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| AppError::BrowserError(format!("new tab: {e}")))?;
            tabs.add(page.clone());
            page.goto(url)
                .await
                .map_err(|e| AppError::BrowserError(format!("navigate to {url}: {e}")))?;
            page.find_element("body")
                .await
                .map_err(|e| AppError::BrowserError(format!("no body at {url}: {e}")))?;
            page.content()
                .await
                .map_err(|e| AppError::BrowserError(format!("read {url}: {e}")))
        })
        .await;

        tabs.release();
        rendered
    }
}

/// Run `work` under `limit`, reporting an overrun as a timeout.
async fn within<T>(
    limit: Duration,
    work: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| AppError::Timeout(limit.as_secs()))?
}
