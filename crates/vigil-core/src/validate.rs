//! Data-quality filters shared by every backend.
//!
//! Rejections here are silent: a candidate that fails validation is simply
//! dropped, never reported as an error.

use std::sync::LazyLock;

use regex::Regex;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

/// Two-letter region code followed (eventually) by a US postal code.
static REGION_POSTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2}\b.*?\b\d{5}(?:-\d{4})?\b").expect("valid address regex")
});

static REGION_POSTAL_TIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2}\b,?\s+\d{5}(?:-\d{4})?\b").expect("valid address regex")
});

static ADDRESS_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(address|location|directions|find us|hours|email)\b[^:]{0,40}:")
        .expect("valid label regex")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Substrings marking template or placeholder addresses.
pub const PLACEHOLDER_EMAIL_PATTERNS: &[&str] = &[
    "example.com",
    "example.org",
    "domain.com",
    "email@example",
    "yourdomain",
    "yourname",
    "youremail",
    "@.",
];

/// Asset suffixes that the email grammar would otherwise accept
/// (`logo@2x.png` in `srcset` attributes).
const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

/// Longest address kept before windowing around the region/postal code.
pub const MAX_ADDRESS_LEN: usize = 200;
const ADDRESS_WINDOW: usize = 100;

/// Returns the lowercased address if it is a plausible, non-placeholder email.
pub fn validate_email(raw: &str) -> Option<String> {
    let email = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '<' | '>' | '"' | '\'' | ',' | ';' | '.'))
        .to_lowercase();

    if !EMAIL_RE.is_match(&email) {
        return None;
    }
    if PLACEHOLDER_EMAIL_PATTERNS.iter().any(|p| email.contains(p)) {
        return None;
    }
    if ASSET_SUFFIXES.iter().any(|s| email.ends_with(s)) {
        return None;
    }
    Some(email)
}

pub fn is_valid_email(raw: &str) -> bool {
    validate_email(raw).is_some()
}

/// Normalizes a phone candidate to 10 digits.
///
/// Ten digits pass through; eleven digits are accepted only with a leading
/// `1` country code, which is stripped. Anything else is rejected.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 => Some(digits),
        11 if digits.starts_with('1') => Some(digits[1..].to_string()),
        _ => None,
    }
}

/// Domain part of an email address.
pub fn email_domain(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, domain)| domain)
}

/// True when `email`'s domain is `site_domain` or one of its subdomains
/// (or the other way round).
pub fn email_matches_domain(email: &str, site_domain: &str) -> bool {
    let Some(domain) = email_domain(email) else {
        return false;
    };
    let domain = domain.to_lowercase();
    let site = site_domain.trim_start_matches("www.").to_lowercase();
    domain == site || domain.ends_with(&format!(".{site}")) || site.ends_with(&format!(".{domain}"))
}

/// Collapse whitespace, strip leading labels, and bound the length,
/// keeping the part around the region/postal code.
pub fn clean_address(raw: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(raw.trim(), " ");
    let stripped = ADDRESS_LABEL_RE.replace_all(&collapsed, "");
    let address = stripped.trim().trim_start_matches([',', '-', ' ']).to_string();

    if address.len() <= MAX_ADDRESS_LEN {
        return address;
    }

    match REGION_POSTAL_TIGHT_RE.find(&address) {
        Some(m) => {
            let start = floor_boundary(&address, m.start().saturating_sub(ADDRESS_WINDOW));
            let end = floor_boundary(&address, (m.end() + ADDRESS_WINDOW).min(address.len()));
            address[start..end].trim().to_string()
        }
        None => address[..floor_boundary(&address, MAX_ADDRESS_LEN)]
            .trim()
            .to_string(),
    }
}

/// An address is only kept if it carries both a region code and a postal
/// code. Returns the cleaned address.
pub fn validate_address(raw: &str) -> Option<String> {
    let cleaned = clean_address(raw);
    if cleaned.is_empty() || !REGION_POSTAL_RE.is_match(&cleaned) {
        return None;
    }
    Some(cleaned)
}

pub fn has_region_and_postal(text: &str) -> bool {
    REGION_POSTAL_RE.is_match(text)
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert_eq!(
            validate_email("person@dealer.com").as_deref(),
            Some("person@dealer.com")
        );
        assert!(!is_valid_email("sales@example.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("john@yourdomain.net"));
        assert!(!is_valid_email("logo@2x.png"));
    }

    #[test]
    fn test_email_is_trimmed_and_lowercased() {
        assert_eq!(
            validate_email(" <Sales@AcmeMotors.com>. ").as_deref(),
            Some("sales@acmemotors.com")
        );
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(normalize_phone("12165551234").as_deref(), Some("2165551234"));
        assert_eq!(normalize_phone("2165551234").as_deref(), Some("2165551234"));
        assert_eq!(normalize_phone("(216) 555-1234").as_deref(), Some("2165551234"));
        assert_eq!(normalize_phone("+1 216.555.1234").as_deref(), Some("2165551234"));
        assert_eq!(normalize_phone("5551234"), None);
        assert_eq!(normalize_phone("22165551234"), None);
        assert_eq!(normalize_phone("121655512345"), None);
    }

    #[test]
    fn test_email_domain_matching() {
        assert!(email_matches_domain("jane@acmemotors.com", "www.acmemotors.com"));
        assert!(email_matches_domain("jane@mail.acmemotors.com", "acmemotors.com"));
        assert!(!email_matches_domain("jane@gmail.com", "acmemotors.com"));
    }

    #[test]
    fn test_address_requires_region_and_postal_code() {
        assert_eq!(
            validate_address("Address: 123 Main St,\n  Cleveland, OH 44101").as_deref(),
            Some("123 Main St, Cleveland, OH 44101")
        );
        assert!(validate_address("123 Main St, Cleveland").is_none());
        assert!(validate_address("Cleveland, OH").is_none());
        assert!(validate_address("").is_none());
    }

    #[test]
    fn test_long_address_is_windowed_around_postal_code() {
        let noise = "Lorem ipsum dolor sit amet ".repeat(20);
        let raw = format!("{noise}123 Main St, Cleveland, OH 44101 {noise}");
        let cleaned = validate_address(&raw).unwrap();
        assert!(cleaned.contains("OH 44101"));
        assert!(cleaned.len() <= 2 * ADDRESS_WINDOW + 10);
    }
}
