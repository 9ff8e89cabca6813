//! Regex families for pulling contact data out of free text.
//!
//! Both backends run these over whatever text they obtain (rendered DOM
//! text, service markdown), then keep only what the validators accept.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::validate::{normalize_phone, validate_address, validate_email};

pub static EMAIL_SCAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid email regex")
});

/// North-American numbers; the area code is optional so that bare
/// seven-digit numbers are found and then rejected by normalization.
pub static PHONE_SCAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[-. ]?)?(?:\(?[0-9]{3}\)?[-. ]?)?[0-9]{3}[-. ]?[0-9]{4}\b")
        .expect("valid phone regex")
});

/// Street line, city, region code, postal code.
pub static STREET_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\d{1,6}\s+[A-Za-z0-9.#' ]{2,60}?,?\s+[A-Za-z .']{2,40},?\s+[A-Z]{2}\s+\d{5}(?:-\d{4})?\b",
    )
    .expect("valid street address regex")
});

static HTML_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|\d+);").expect("valid entity regex"));

/// `"moc.relaed@selas".split("").reverse()` style obfuscation.
static REVERSED_STRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']([-_.a-zA-Z0-9@]+)["'][^;\n]{0,80}?reverse\(\)"#)
        .expect("valid reversed-string regex")
});

static MAILTO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"mailto:([^'"\s&?]+)"#).expect("valid mailto regex"));

/// Phrases that introduce an email address in nearby text.
pub const EMAIL_PROMPTS: &[&str] = &[
    "email me",
    "email us",
    "contact us by email",
    "send us an email",
];

/// Valid, normalized emails found anywhere in `text`.
pub fn find_emails(text: &str) -> BTreeSet<String> {
    EMAIL_SCAN_RE
        .find_iter(text)
        .filter_map(|m| validate_email(m.as_str()))
        .collect()
}

/// Valid, normalized phone numbers found anywhere in `text`.
pub fn find_phones(text: &str) -> BTreeSet<String> {
    PHONE_SCAN_RE
        .find_iter(text)
        .filter_map(|m| normalize_phone(m.as_str()))
        .collect()
}

/// First street address in `text` that survives validation.
pub fn find_address(text: &str) -> Option<String> {
    STREET_ADDRESS_RE
        .find_iter(text)
        .find_map(|m| validate_address(m.as_str()))
}

/// Decode numeric HTML entities (`&#64;`, `&#x40;`).
pub fn decode_numeric_entities(text: &str) -> String {
    HTML_ENTITY_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let code = &caps[1];
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => code.parse::<u32>().ok(),
            };
            value
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Emails hidden in script bodies as reversed strings or inline `mailto:`.
pub fn find_script_emails(script: &str) -> BTreeSet<String> {
    let reversed = REVERSED_STRING_RE.captures_iter(script).filter_map(|caps| {
        let candidate: String = caps[1].chars().rev().collect();
        validate_email(&candidate)
    });
    let mailto = MAILTO_RE
        .captures_iter(script)
        .filter_map(|caps| validate_email(&caps[1]));
    reversed.chain(mailto).chain(find_emails(script)).collect()
}

/// True if `text` contains one of the [`EMAIL_PROMPTS`].
pub fn has_email_prompt(text: &str) -> bool {
    let lower = text.to_lowercase();
    EMAIL_PROMPTS.iter().any(|p| lower.contains(p))
}

/// Every contact signal in a block of text: plain and entity-encoded emails,
/// phones, and the first valid street address.
pub fn scan_text(text: &str) -> (BTreeSet<String>, BTreeSet<String>, Option<String>) {
    let decoded = decode_numeric_entities(text);
    let mut emails = find_emails(&decoded);
    emails.extend(find_script_emails(&decoded));
    (emails, find_phones(&decoded), find_address(&decoded))
}
