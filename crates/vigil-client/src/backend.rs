use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vigil_core::context::TraceContext;
use vigil_core::error::AppError;
use vigil_core::models::{ExtractionResult, Target};
use vigil_core::traits::ExtractionBackend;

#[cfg(feature = "browser")]
use crate::browser_fetcher::BrowserFetcher;
use crate::fetcher::ReqwestFetcher;
use crate::page_backend::PageBackend;
use crate::remote::RemoteBackend;

/// Which backend implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Page,
    Browser,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Page => "page",
            BackendKind::Browser => "browser",
            BackendKind::Remote => "remote",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "page" | "http" => Ok(BackendKind::Page),
            "browser" => Ok(BackendKind::Browser),
            "remote" | "firecrawl" => Ok(BackendKind::Remote),
            other => Err(AppError::ConfigError(format!(
                "unknown backend '{other}' (expected page, browser or remote)"
            ))),
        }
    }
}

/// The closed set of extraction backends.
#[derive(Clone)]
pub enum Backend {
    Page(PageBackend<ReqwestFetcher>),
    #[cfg(feature = "browser")]
    Browser(PageBackend<BrowserFetcher>),
    Remote(RemoteBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Page(_) => BackendKind::Page,
            #[cfg(feature = "browser")]
            Backend::Browser(_) => BackendKind::Browser,
            Backend::Remote(_) => BackendKind::Remote,
        }
    }
}

impl ExtractionBackend for Backend {
    fn id(&self) -> &str {
        match self {
            Backend::Page(b) => b.id(),
            #[cfg(feature = "browser")]
            Backend::Browser(b) => b.id(),
            Backend::Remote(b) => b.id(),
        }
    }

    async fn extract(
        &self,
        target: &Target,
        ctx: &TraceContext,
    ) -> Result<ExtractionResult, AppError> {
        match self {
            Backend::Page(b) => b.extract(target, ctx).await,
            #[cfg(feature = "browser")]
            Backend::Browser(b) => b.extract(target, ctx).await,
            Backend::Remote(b) => b.extract(target, ctx).await,
        }
    }

    async fn cleanup(&self) {
        match self {
            Backend::Page(_) | Backend::Remote(_) => {}
            #[cfg(feature = "browser")]
            Backend::Browser(b) => b.fetcher().close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("page".parse::<BackendKind>().unwrap(), BackendKind::Page);
        assert_eq!(" Browser ".parse::<BackendKind>().unwrap(), BackendKind::Browser);
        assert_eq!("firecrawl".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert!(matches!(
            "selenium".parse::<BackendKind>(),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_dispatch_ids() {
        let page = Backend::Page(PageBackend::new("page", ReqwestFetcher::new().unwrap()));
        assert_eq!(page.id(), "page");
        assert_eq!(page.kind(), BackendKind::Page);

        let remote = Backend::Remote(RemoteBackend::new("key").unwrap());
        assert_eq!(remote.id(), "remote");
        assert_eq!(remote.kind().to_string(), "remote");
    }
}
