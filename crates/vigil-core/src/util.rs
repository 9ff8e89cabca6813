use url::Url;

use crate::error::AppError;

/// Trim, lowercase, and default the scheme to `https://`.
pub fn normalize_url(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(AppError::InvalidTarget("empty URL".into()));
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| AppError::InvalidTarget(format!("{raw}: {e}")))?;
    if parsed.host_str().is_none() {
        return Err(AppError::InvalidTarget(format!("{raw}: no host")));
    }

    Ok(candidate)
}

/// Resource key for per-site resilience state: the URL host without `www.`.
///
/// Unparseable input falls back to the raw string so every URL still maps
/// to exactly one key.
pub fn domain_key(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| url.to_string())
}

/// True when both URLs point at the same site.
pub fn same_site(a: &str, b: &str) -> bool {
    domain_key(a) == domain_key(b)
}

/// Resolve `href` against `base`, keeping only http(s) results.
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let joined = base.join(href.trim()).ok()?;
    match joined.scheme() {
        "http" | "https" => Some(joined.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_adds_scheme_and_lowercases() {
        assert_eq!(
            normalize_url("  WWW.AcmeMotors.com ").unwrap(),
            "https://www.acmemotors.com"
        );
        assert_eq!(
            normalize_url("http://acme.com/contact").unwrap(),
            "http://acme.com/contact"
        );
    }

    #[test]
    fn test_normalize_url_rejects_empty() {
        assert!(matches!(
            normalize_url("   "),
            Err(AppError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_domain_key_strips_www() {
        assert_eq!(domain_key("https://www.acme.com/about"), "acme.com");
        assert_eq!(domain_key("https://shop.acme.com"), "shop.acme.com");
        assert_eq!(domain_key("not a url"), "not a url");
        assert!(same_site("https://acme.com", "https://www.acme.com/team"));
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(
            resolve_link("https://acme.com/index.html", "/staff").as_deref(),
            Some("https://acme.com/staff")
        );
        assert_eq!(resolve_link("https://acme.com", "mailto:a@b.com"), None);
    }
}
