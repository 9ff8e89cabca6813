use std::sync::Arc;

use htmd::HtmlToMarkdown;
use vigil_core::error::AppError;

/// HTML-to-text converter using htmd.
///
/// Used when the remote service returns only HTML: the regex families run
/// over the converted text instead of markup, so attribute noise and
/// scripts never reach them.
#[derive(Clone)]
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec!["script", "style", "noscript", "iframe", "svg"])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    pub fn clean(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map_err(|e| AppError::CleanerError(e.to_string()))
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}
