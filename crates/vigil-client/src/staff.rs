//! Locates DOM containers that describe people and turns them into
//! [`StaffFragment`]s for the scorer.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use vigil_core::scorer::StaffFragment;

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e}"))
}

/// Person containers, most specific first.
static CONTAINERS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        ".team-member, .staff-member, .employee, .team-item, .staff-item, .team-card, .staff-card",
        r#"[class*="team"], [class*="staff"], [class*="employee"], [class*="people"]"#,
        ".bio, .profile, .person, .member",
        r#"[itemtype*="Person"], [itemtype*="Employee"]"#,
    ]
    .into_iter()
    .map(selector)
    .collect()
});

static NAME_HINTS: LazyLock<Selector> =
    LazyLock::new(|| selector(r#".name, h2, h3, h4, [itemprop="name"], strong"#));
static TITLE_HINTS: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#".title, .position, .job-title, [itemprop="jobTitle"], em, .role"#)
});
static MAILTO: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href^="mailto:"]"#));
static EMAIL_HINTS: LazyLock<Selector> =
    LazyLock::new(|| selector(r#".email, [itemprop="email"]"#));
static TEL: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href^="tel:"]"#));
static PHONE_HINTS: LazyLock<Selector> =
    LazyLock::new(|| selector(r#".phone, [itemprop="telephone"]"#));
static IMG: LazyLock<Selector> = LazyLock::new(|| selector("img"));
static HEADINGS: LazyLock<Selector> = LazyLock::new(|| selector("h1, h2, h3"));
static SECTION_BLOCKS: LazyLock<Selector> = LazyLock::new(|| selector("div, p, li"));

static NAME_LIKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+ [A-Z][a-z]+\b").expect("valid name regex"));

/// Heading text that introduces a staff section.
pub const SECTION_KEYWORDS: &[&str] = &["team", "staff", "about us", "meet", "our people"];

/// Upper bound on fragments taken from one page.
pub const MAX_FRAGMENTS: usize = 200;

/// Person-like fragments on a page.
///
/// Structured containers are preferred. Only the innermost match of nested
/// containers is kept, so a team grid yields its cards and not itself.
/// Without any container, blocks under a staff-section heading are used.
pub fn locate_fragments(doc: &Html) -> Vec<StaffFragment> {
    let mut matched = Vec::new();
    let mut seen = HashSet::new();
    for sel in CONTAINERS.iter() {
        for el in doc.select(sel) {
            if seen.insert(el.id()) {
                matched.push(el);
            }
        }
    }

    let innermost: Vec<ElementRef<'_>> = matched
        .iter()
        .copied()
        .filter(|el| {
            !el.descendants()
                .skip(1)
                .any(|d| seen.contains(&d.id()))
        })
        .collect();

    if !innermost.is_empty() {
        return innermost
            .into_iter()
            .take(MAX_FRAGMENTS)
            .map(fragment_with_sibling)
            .collect();
    }

    section_fragments(doc)
}

fn section_fragments(doc: &Html) -> Vec<StaffFragment> {
    let mut fragments = Vec::new();
    let mut seen = HashSet::new();

    for heading in doc.select(&HEADINGS) {
        let text = heading.text().collect::<String>().to_lowercase();
        if !SECTION_KEYWORDS.iter().any(|k| text.contains(k)) {
            continue;
        }
        let Some(section) = heading.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        for block in section.select(&SECTION_BLOCKS) {
            if fragments.len() >= MAX_FRAGMENTS {
                return fragments;
            }
            let block_text = block.text().collect::<Vec<_>>().join(" ");
            if NAME_LIKE_RE.is_match(&block_text) && seen.insert(block.id()) {
                fragments.push(fragment_with_sibling(block));
            }
        }
    }
    fragments
}

fn fragment_with_sibling(element: ElementRef<'_>) -> StaffFragment {
    let mut base = fragment(element);
    base.sibling = element
        .next_siblings()
        .find_map(ElementRef::wrap)
        .map(|s| Box::new(fragment(s)));
    base
}

/// Signals gathered from one element.
pub fn fragment(element: ElementRef<'_>) -> StaffFragment {
    let texts = |sel: &Selector| -> Vec<String> {
        element
            .select(sel)
            .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    };
    let hrefs = |sel: &Selector, scheme: &str| -> Vec<String> {
        element
            .select(sel)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| href.trim().strip_prefix(scheme))
            .map(|rest| {
                urlencoding::decode(rest)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| rest.to_string())
            })
            .collect()
    };

    let mut email_hints = hrefs(&MAILTO, "mailto:");
    email_hints.extend(texts(&EMAIL_HINTS));
    let mut phone_hints = hrefs(&TEL, "tel:");
    phone_hints.extend(texts(&PHONE_HINTS));

    let photo_urls = element
        .select(&IMG)
        .filter_map(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
        .map(str::to_string)
        .collect();

    StaffFragment {
        name_hints: texts(&NAME_HINTS),
        title_hints: texts(&TITLE_HINTS),
        email_hints,
        phone_hints,
        photo_urls,
        text: block_text(element),
        sibling: None,
    }
}

/// Element text with one line per text node.
fn block_text(element: ElementRef<'_>) -> String {
    element
        .descendants()
        .filter_map(|node| match node.value() {
            Node::Text(text) => Some(text.trim()),
            _ => None,
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
