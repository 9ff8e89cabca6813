//! DOM heuristics for contact data: emails, phones and a validated street
//! address, plus discovery of same-site contact/staff links.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};
use vigil_core::contact::{find_script_emails, has_email_prompt, scan_text};
use vigil_core::util::{resolve_link, same_site};
use vigil_core::validate::{normalize_phone, validate_address, validate_email};

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

static MAILTO: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href^="mailto:"]"#));
static TEL: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href^="tel:"]"#));
static DATA_EMAIL: LazyLock<Selector> = LazyLock::new(|| selector("[data-email]"));
static SCRIPT: LazyLock<Selector> = LazyLock::new(|| selector("script"));
static HANDLERS: LazyLock<Selector> =
    LazyLock::new(|| selector("[onclick], [onmouseover], [onload]"));
static ADDRESS_CANDIDATES: LazyLock<Selector> =
    LazyLock::new(|| selector("address, div[class], p[class], span[class]"));
static POSTAL_ADDRESS: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"[itemtype*="PostalAddress"]"#));
static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Text that anchors a nearby address block.
pub const ADDRESS_KEYWORDS: &[&str] = &[
    "address",
    "location",
    "directions",
    "find us",
    "visit us",
    "our dealership",
];

/// Link keywords that lead to pages with people and contact details.
pub const CONTACT_LINK_KEYWORDS: &[&str] = &[
    "contact",
    "staff",
    "team",
    "about",
    "people",
    "meet",
    "employees",
    "management",
];

const POSTAL_PROPS: &[&str] = &[
    "streetAddress",
    "addressLocality",
    "addressRegion",
    "postalCode",
];

/// Contact data found on one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContacts {
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    pub address: Option<String>,
}

impl PageContacts {
    /// Union with another page's data; the first address found wins.
    pub fn merge(&mut self, other: PageContacts) {
        self.emails.extend(other.emails);
        self.phones.extend(other.phones);
        if self.address.is_none() {
            self.address = other.address;
        }
    }
}

/// Every text node outside scripts and styles, one per line.
pub fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(|parent| HIDDEN_TAGS.contains(&parent.value().name()));
        let text = text.trim();
        if !hidden && !text.is_empty() {
            out.push_str(text);
            out.push('\n');
        }
    }
    out
}

/// Text of an element with its text nodes separated by spaces.
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run every contact heuristic over a parsed page.
pub fn extract_contacts(doc: &Html) -> PageContacts {
    let text = visible_text(doc);
    let (mut emails, mut phones, text_address) = scan_text(&text);

    emails.extend(mailto_emails(doc));
    emails.extend(
        doc.select(&DATA_EMAIL)
            .filter_map(|el| el.value().attr("data-email"))
            .filter_map(validate_email),
    );
    for script in doc.select(&SCRIPT) {
        emails.extend(find_script_emails(&script.text().collect::<String>()));
    }
    for el in doc.select(&HANDLERS) {
        for (name, value) in el.value().attrs() {
            if name.starts_with("on") {
                emails.extend(find_script_emails(value));
            }
        }
    }
    emails.extend(prompted_emails(doc));

    phones.extend(
        doc.select(&TEL)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| normalize_phone(href.trim_start_matches("tel:"))),
    );

    PageContacts {
        emails,
        phones,
        address: find_dom_address(doc).or(text_address),
    }
}

fn mailto_emails(doc: &Html) -> BTreeSet<String> {
    doc.select(&MAILTO)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(decode_mailto)
        .collect()
}

/// `mailto:` href to a validated address: query stripped, percent-decoded.
pub fn decode_mailto(href: &str) -> Option<String> {
    let raw = href.trim().strip_prefix("mailto:")?;
    let raw = raw.split('?').next()?;
    let decoded = urlencoding::decode(raw).ok()?;
    validate_email(&decoded)
}

/// Emails introduced by an "email us" style prompt: searched in the
/// prompt's element and then its following siblings.
fn prompted_emails(doc: &Html) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    for node in doc.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        if !has_email_prompt(text) {
            continue;
        }
        let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
            continue;
        };

        let candidates = std::iter::once(parent).chain(
            parent
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .take(2),
        );
        for el in candidates {
            let (emails, _, _) = scan_text(&element_text(el));
            found.extend(emails);
            found.extend(
                el.select(&MAILTO)
                    .filter_map(|a| a.value().attr("href"))
                    .filter_map(decode_mailto),
            );
        }
    }
    found
}

/// Structured address markup first, then keyword-anchored blocks, then
/// schema.org `PostalAddress` properties. Every candidate is validated.
pub fn find_dom_address(doc: &Html) -> Option<String> {
    class_address(doc)
        .or_else(|| keyword_address(doc))
        .or_else(|| schema_address(doc))
}

fn class_address(doc: &Html) -> Option<String> {
    doc.select(&ADDRESS_CANDIDATES)
        .filter(|el| {
            el.value().name() == "address"
                || el.value().attr("class").is_some_and(|class| {
                    let class = class.to_lowercase();
                    class.contains("address") || class.contains("location")
                })
        })
        .find_map(|el| validate_address(&element_text(el)))
}

fn keyword_address(doc: &Html) -> Option<String> {
    for node in doc.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let lower = text.to_lowercase();
        if !ADDRESS_KEYWORDS.iter().any(|k| lower.contains(k)) {
            continue;
        }
        let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        if HIDDEN_TAGS.contains(&parent.value().name()) {
            continue;
        }

        // The label is often alone in its element; widen once to the
        // enclosing block.
        let block = parent.parent().and_then(ElementRef::wrap);
        let found = std::iter::once(parent)
            .chain(block)
            .find_map(|el| validate_address(&element_text(el)));
        if found.is_some() {
            return found;
        }
    }
    None
}

fn schema_address(doc: &Html) -> Option<String> {
    doc.select(&POSTAL_ADDRESS).find_map(|item| {
        let parts: Vec<String> = POSTAL_PROPS
            .iter()
            .filter_map(|prop| {
                let sel = Selector::parse(&format!(r#"[itemprop="{prop}"]"#)).ok()?;
                item.select(&sel).next().map(element_text)
            })
            .filter(|part| !part.is_empty())
            .collect();
        validate_address(&parts.join(", "))
    })
}

/// Same-site links whose text or href carries one of `keywords`, in page
/// order, deduplicated, at most `limit`.
pub fn discover_links(doc: &Html, base_url: &str, keywords: &[&str], limit: usize) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut links = Vec::new();

    for a in doc.select(&LINKS) {
        if links.len() >= limit {
            break;
        }
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let href_trimmed = href.trim();
        if href_trimmed.is_empty()
            || href_trimmed.starts_with('#')
            || href_trimmed.starts_with("javascript:")
            || href_trimmed.starts_with("mailto:")
            || href_trimmed.starts_with("tel:")
        {
            continue;
        }

        let text = element_text(a).to_lowercase();
        let href_lower = href_trimmed.to_lowercase();
        if !keywords
            .iter()
            .any(|k| text.contains(k) || href_lower.contains(k))
        {
            continue;
        }

        let Some(mut resolved) = resolve_link(base_url, href_trimmed) else {
            continue;
        };
        if let Some(idx) = resolved.find('#') {
            resolved.truncate(idx);
        }
        let is_start_page = resolved.trim_end_matches('/') == base_url.trim_end_matches('/');
        if is_start_page || !same_site(base_url, &resolved) {
            continue;
        }
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }
    links
}
