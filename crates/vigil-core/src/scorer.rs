//! Staff confidence scoring.
//!
//! Turns raw fragments found near staff-like markup into ranked,
//! role-categorized [`StaffCandidate`]s. Confidence is a plain additive
//! heuristic: each independent signal adds a fixed number of points
//! (see [`points`]).

use std::sync::LazyLock;

use regex::Regex;

use crate::contact::{find_emails, find_phones};
use crate::models::{RoleCategory, StaffCandidate};
use crate::validate::{email_matches_domain, normalize_phone, validate_email};

/// Confidence points per signal.
pub mod points {
    /// Name with three or more words, or with a middle initial.
    pub const MULTI_WORD_NAME: f64 = 2.0;
    /// Plain "First Last" name.
    pub const SIMPLE_NAME: f64 = 1.0;
    /// Title containing a management, sales, or service keyword.
    pub const KEYWORD_TITLE: f64 = 2.0;
    pub const ANY_TITLE: f64 = 1.0;
    /// Email on the site's own domain.
    pub const SITE_EMAIL: f64 = 3.0;
    pub const OTHER_EMAIL: f64 = 2.0;
    pub const PHONE: f64 = 1.0;
    pub const PHOTO: f64 = 0.5;
    /// Per field filled in when two same-name candidates are merged.
    pub const MERGED_FIELD: f64 = 0.5;
}

pub const DEFAULT_MAX_STAFF: usize = 20;
pub const MAX_TITLE_LEN: usize = 100;
const MAX_NAME_LEN: usize = 50;

pub const MANAGEMENT_KEYWORDS: &[&str] = &[
    "president",
    "ceo",
    "cfo",
    "coo",
    "owner",
    "partner",
    "general manager",
    "gm",
    "director",
    "executive",
    "principal",
    "vp",
    "vice president",
    "chief",
    "head",
    "founder",
];

pub const SALES_KEYWORDS: &[&str] = &[
    "sales",
    "salesperson",
    "salesman",
    "saleswoman",
    "lease",
    "finance",
    "f&i",
    "business manager",
    "internet sales",
];

pub const SERVICE_KEYWORDS: &[&str] = &[
    "service",
    "technician",
    "mechanic",
    "parts",
    "maintenance",
    "advisor",
    "repair",
    "warranty",
];

/// Words that show a capitalized phrase is a heading or label, not a person.
const NON_NAME_WORDS: &[&str] = &[
    "about", "and", "auto", "call", "center", "contact", "department", "dealership", "directions",
    "email", "finance", "home", "hours", "inventory", "manager", "meet", "more", "motors", "new",
    "our", "parts", "read", "sales", "service", "specials", "staff", "team", "the", "used", "us",
    "view", "welcome",
];

const PHOTO_NOISE: &[&str] = &["icon", "logo", "placeholder"];

const NAME_WORD: &str = r"(?:Mc|Mac|O')?[A-Z][a-z]+(?:-[A-Z][a-z]+)?";

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^{NAME_WORD}(?P<initial>\s+[A-Z]\.?)?(?P<rest>(?:\s+{NAME_WORD}){{1,2}})$"
    ))
    .expect("valid name regex")
});

static NAME_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?:,|\||\s-\s|\s–\s)\s*").expect("valid split regex"));

fn keyword_regex(keywords: &[&str]) -> Regex {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)(?:^|[^a-z])(?:{alternation})(?:$|[^a-z])"))
        .expect("valid keyword regex")
}

static MANAGEMENT_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(MANAGEMENT_KEYWORDS));
static SALES_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(SALES_KEYWORDS));
static SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(SERVICE_KEYWORDS));

/// Role bucket for a title: management beats sales beats service.
pub fn categorize_role(title: Option<&str>) -> RoleCategory {
    let Some(title) = title else {
        return RoleCategory::General;
    };
    if MANAGEMENT_RE.is_match(title) {
        RoleCategory::Management
    } else if SALES_RE.is_match(title) {
        RoleCategory::Sales
    } else if SERVICE_RE.is_match(title) {
        RoleCategory::Service
    } else {
        RoleCategory::General
    }
}

/// How well-formed a parsed name is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameShape {
    /// Three or more words, or a middle initial.
    MultiWord,
    /// Exactly two words.
    Simple,
}

impl NameShape {
    fn points(self) -> f64 {
        match self {
            NameShape::MultiWord => points::MULTI_WORD_NAME,
            NameShape::Simple => points::SIMPLE_NAME,
        }
    }
}

/// Parse a person's name, rejecting anything outside the
/// "Capitalized Capitalized" grammar (optional middle initial).
pub fn parse_name(raw: &str) -> Option<(String, NameShape)> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.len() > MAX_NAME_LEN {
        return None;
    }
    let caps = NAME_RE.captures(&name)?;

    let banned = name
        .split([' ', '-'])
        .any(|w| NON_NAME_WORDS.contains(&w.trim_end_matches('.').to_lowercase().as_str()));
    if banned {
        return None;
    }

    let extra_words = caps
        .name("rest")
        .map(|m| m.as_str().split_whitespace().count())
        .unwrap_or(0);
    let shape = if caps.name("initial").is_some() || extra_words >= 2 {
        NameShape::MultiWord
    } else {
        NameShape::Simple
    };
    Some((name, shape))
}

/// Signals gathered from one DOM container believed to describe a person.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaffFragment {
    /// Text of name-like elements (headings, `.name`, `itemprop=name`, `strong`).
    pub name_hints: Vec<String>,
    /// Text of title-like elements (`.title`, `.position`, `itemprop=jobTitle`, `em`).
    pub title_hints: Vec<String>,
    /// Email candidates from links and `itemprop=email`.
    pub email_hints: Vec<String>,
    /// Phone candidates from `tel:` links and `itemprop=telephone`.
    pub phone_hints: Vec<String>,
    pub photo_urls: Vec<String>,
    /// Whole container text, one line per block element.
    pub text: String,
    /// The next sibling element, searched for fields this one lacks.
    pub sibling: Option<Box<StaffFragment>>,
}

impl StaffFragment {
    fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    fn find_name(&self) -> Option<(String, NameShape)> {
        let from_hints = self.name_hints.iter().find_map(|hint| {
            parse_name(hint).or_else(|| {
                NAME_SPLIT_RE
                    .split(hint)
                    .next()
                    .and_then(parse_name)
            })
        });
        from_hints.or_else(|| {
            self.lines().find_map(|line| {
                parse_name(line).or_else(|| NAME_SPLIT_RE.split(line).next().and_then(parse_name))
            })
        })
    }

    fn find_title(&self, name: &str) -> Option<String> {
        let usable = |t: &str| {
            let t = t.trim();
            !t.is_empty() && t.len() < MAX_TITLE_LEN && t != name
        };

        if let Some(title) = self.title_hints.iter().find(|t| usable(t.as_str())) {
            return Some(title.trim().to_string());
        }

        // "Jane Doe, General Manager" style headings.
        for hint in self.name_hints.iter().map(String::as_str).chain(self.lines()) {
            let mut parts = NAME_SPLIT_RE.split(hint);
            if parts.next().is_some_and(|first| first.trim() == name)
                && let Some(rest) = parts.next()
                && usable(rest)
            {
                return Some(rest.trim().to_string());
            }
        }

        self.lines()
            .find(|&line| usable(line) && categorize_role(Some(line)) != RoleCategory::General)
            .map(str::to_string)
    }

    fn find_email(&self) -> Option<String> {
        self.email_hints
            .iter()
            .find_map(|e| validate_email(e.trim_start_matches("mailto:").split('?').next()?))
            .or_else(|| find_emails(&self.text).into_iter().next())
    }

    fn find_phone(&self) -> Option<String> {
        self.phone_hints
            .iter()
            .find_map(|p| normalize_phone(p.trim_start_matches("tel:")))
            .or_else(|| find_phones(&self.text).into_iter().next())
    }

    fn find_photo(&self) -> Option<String> {
        self.photo_urls
            .iter()
            .find(|src| {
                let lower = src.to_lowercase();
                !PHOTO_NOISE.iter().any(|n| lower.contains(n))
            })
            .cloned()
    }
}

/// Scores fragments for one site and ranks the survivors.
#[derive(Debug, Clone)]
pub struct StaffScorer {
    site_domain: String,
    max_candidates: usize,
}

impl StaffScorer {
    pub fn new(site_domain: impl Into<String>) -> Self {
        Self {
            site_domain: site_domain.into(),
            max_candidates: DEFAULT_MAX_STAFF,
        }
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    /// Score one fragment. `None` when no valid name is found or the name
    /// has no accompanying title, email, or phone.
    pub fn score(&self, fragment: &StaffFragment) -> Option<StaffCandidate> {
        let (name, shape) = fragment.find_name()?;
        let sibling = fragment.sibling.as_deref();

        let title = fragment
            .find_title(&name)
            .or_else(|| sibling.and_then(|s| s.find_title(&name)));
        let email = fragment
            .find_email()
            .or_else(|| sibling.and_then(StaffFragment::find_email));
        let phone = fragment
            .find_phone()
            .or_else(|| sibling.and_then(StaffFragment::find_phone));
        let photo_url = fragment.find_photo();

        let role_category = categorize_role(title.as_deref());
        let mut confidence = shape.points();
        if title.is_some() {
            confidence += if role_category == RoleCategory::General {
                points::ANY_TITLE
            } else {
                points::KEYWORD_TITLE
            };
        }
        if let Some(email) = &email {
            confidence += if email_matches_domain(email, &self.site_domain) {
                points::SITE_EMAIL
            } else {
                points::OTHER_EMAIL
            };
        }
        if phone.is_some() {
            confidence += points::PHONE;
        }
        if photo_url.is_some() {
            confidence += points::PHOTO;
        }

        let candidate = StaffCandidate {
            name,
            title,
            email,
            phone,
            photo_url,
            role_category,
            priority: role_category.priority(),
            confidence,
        };
        candidate.is_retainable().then_some(candidate)
    }

    /// Score, deduplicate, sort by confidence, and cap.
    pub fn rank<'a>(&self, fragments: impl IntoIterator<Item = &'a StaffFragment>) -> Vec<StaffCandidate> {
        let scored: Vec<StaffCandidate> = fragments
            .into_iter()
            .filter_map(|f| self.score(f))
            .collect();
        finalize(scored, self.max_candidates)
    }
}

/// Deduplicate, sort by confidence descending, and keep at most `max`.
pub fn finalize(candidates: Vec<StaffCandidate>, max: usize) -> Vec<StaffCandidate> {
    let mut merged = dedupe(candidates);
    merged.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    merged.truncate(max);
    merged
}

/// Merge candidates describing the same person.
///
/// Same email: the higher-confidence record wins and takes any fields it is
/// missing from the other, keeping its score. Same name where at most one
/// side has an email: fields are filled the same way and the survivor gains
/// [`points::MERGED_FIELD`] per filled field.
pub fn dedupe(mut candidates: Vec<StaffCandidate>) -> Vec<StaffCandidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<StaffCandidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let same_email = candidate.email.as_ref().and_then(|email| {
            kept.iter()
                .position(|k| k.email.as_ref() == Some(email))
        });
        if let Some(i) = same_email {
            fill_missing(&mut kept[i], candidate);
            continue;
        }

        let same_name = kept.iter().position(|k| {
            k.name.eq_ignore_ascii_case(&candidate.name)
                && (k.email.is_none() || candidate.email.is_none())
        });
        if let Some(i) = same_name {
            let filled = fill_missing(&mut kept[i], candidate);
            kept[i].confidence += filled as f64 * points::MERGED_FIELD;
            continue;
        }

        kept.push(candidate);
    }
    kept
}

/// Copy fields `target` lacks from `donor`. Returns how many were filled.
fn fill_missing(target: &mut StaffCandidate, donor: StaffCandidate) -> usize {
    let mut filled = 0;
    for (slot, value) in [
        (&mut target.title, donor.title),
        (&mut target.email, donor.email),
        (&mut target.phone, donor.phone),
        (&mut target.photo_url, donor.photo_url),
    ] {
        if slot.is_none() && value.is_some() {
            *slot = value;
            filled += 1;
        }
    }
    if filled > 0 {
        target.role_category = categorize_role(target.title.as_deref());
        target.priority = target.role_category.priority();
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(name: &str, title: &str, email: &str, phone: &str) -> StaffFragment {
        let opt = |s: &str| {
            if s.is_empty() {
                Vec::new()
            } else {
                vec![s.to_string()]
            }
        };
        StaffFragment {
            name_hints: opt(name),
            title_hints: opt(title),
            email_hints: opt(email),
            phone_hints: opt(phone),
            ..Default::default()
        }
    }

    fn candidate(name: &str, email: Option<&str>, confidence: f64) -> StaffCandidate {
        StaffCandidate {
            name: name.into(),
            title: None,
            email: email.map(String::from),
            phone: None,
            photo_url: None,
            role_category: RoleCategory::General,
            priority: 0,
            confidence,
        }
    }

    #[test]
    fn test_parse_name_grammar() {
        assert_eq!(
            parse_name("Jane Doe"),
            Some(("Jane Doe".to_string(), NameShape::Simple))
        );
        assert_eq!(
            parse_name("John  Q. Public"),
            Some(("John Q. Public".to_string(), NameShape::MultiWord))
        );
        assert_eq!(
            parse_name("Mary Ann McDonald").map(|(_, s)| s),
            Some(NameShape::MultiWord)
        );
        assert!(parse_name("jane doe").is_none());
        assert!(parse_name("Jane").is_none());
        assert!(parse_name("Meet Our Team").is_none());
        assert!(parse_name("Sales Department").is_none());
    }

    #[test]
    fn test_categorize_role_precedence() {
        assert_eq!(categorize_role(Some("General Manager")), RoleCategory::Management);
        assert_eq!(categorize_role(Some("Service Director")), RoleCategory::Management);
        assert_eq!(categorize_role(Some("F&I Manager")), RoleCategory::Sales);
        assert_eq!(categorize_role(Some("Internet Sales Manager")), RoleCategory::Sales);
        assert_eq!(categorize_role(Some("Service Advisor")), RoleCategory::Service);
        assert_eq!(categorize_role(Some("Receptionist")), RoleCategory::General);
        assert_eq!(categorize_role(Some("Overhead Crane")), RoleCategory::General);
        assert_eq!(categorize_role(None), RoleCategory::General);
    }

    #[test]
    fn test_score_accumulates_points() {
        let scorer = StaffScorer::new("acmemotors.com");
        let mut f = fragment(
            "Jane Doe",
            "General Manager",
            "mailto:jane@acmemotors.com",
            "tel:216-555-1234",
        );
        f.photo_urls = vec!["/img/logo.png".into(), "/img/jane.jpg".into()];

        let c = scorer.score(&f).unwrap();
        let expected = points::SIMPLE_NAME
            + points::KEYWORD_TITLE
            + points::SITE_EMAIL
            + points::PHONE
            + points::PHOTO;
        assert_eq!(c.confidence, expected);
        assert_eq!(c.email.as_deref(), Some("jane@acmemotors.com"));
        assert_eq!(c.phone.as_deref(), Some("2165551234"));
        assert_eq!(c.photo_url.as_deref(), Some("/img/jane.jpg"));
        assert_eq!(c.role_category, RoleCategory::Management);
        assert_eq!(c.priority, 3);
    }

    #[test]
    fn test_score_other_domain_email_and_plain_title() {
        let scorer = StaffScorer::new("acmemotors.com");
        let c = scorer
            .score(&fragment("Jane Doe", "Receptionist", "jane@gmail.com", ""))
            .unwrap();
        assert_eq!(
            c.confidence,
            points::SIMPLE_NAME + points::ANY_TITLE + points::OTHER_EMAIL
        );
    }

    #[test]
    fn test_name_only_fragment_is_discarded() {
        let scorer = StaffScorer::new("acmemotors.com");
        assert!(scorer.score(&fragment("Jane Doe", "", "", "")).is_none());
        assert!(scorer.score(&fragment("Our Team", "Sales", "", "")).is_none());
    }

    #[test]
    fn test_fields_found_in_following_sibling() {
        let scorer = StaffScorer::new("acmemotors.com");
        let mut f = fragment("Jane Doe", "", "", "");
        f.sibling = Some(Box::new(StaffFragment {
            text: "Sales Consultant\njane@acmemotors.com".into(),
            ..Default::default()
        }));

        let c = scorer.score(&f).unwrap();
        assert_eq!(c.title.as_deref(), Some("Sales Consultant"));
        assert_eq!(c.email.as_deref(), Some("jane@acmemotors.com"));
        assert_eq!(c.role_category, RoleCategory::Sales);
    }

    #[test]
    fn test_name_and_title_split_from_heading() {
        let scorer = StaffScorer::new("acmemotors.com");
        let c = scorer
            .score(&fragment("Jane Doe, Service Manager", "", "", ""))
            .unwrap();
        assert_eq!(c.name, "Jane Doe");
        assert_eq!(c.title.as_deref(), Some("Service Manager"));
    }

    #[test]
    fn test_dedupe_same_email_keeps_higher_score_and_fills_fields() {
        let mut high = candidate("Jane Doe", Some("jane@acmemotors.com"), 6.0);
        high.title = Some("General Manager".into());
        let mut low = candidate("J. Doe", Some("jane@acmemotors.com"), 3.0);
        low.phone = Some("2165551234".into());
        low.title = Some("Manager".into());

        let merged = dedupe(vec![low, high]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Jane Doe");
        assert_eq!(merged[0].confidence, 6.0);
        assert_eq!(merged[0].title.as_deref(), Some("General Manager"));
        assert_eq!(merged[0].phone.as_deref(), Some("2165551234"));
    }

    #[test]
    fn test_dedupe_same_name_bumps_confidence_per_filled_field() {
        let high = candidate("Jane Doe", Some("jane@acmemotors.com"), 5.0);
        let mut low = candidate("jane doe", None, 2.0);
        low.phone = Some("2165551234".into());
        low.title = Some("Sales Manager".into());

        let merged = dedupe(vec![high, low]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 5.0 + 2.0 * points::MERGED_FIELD);
        assert_eq!(merged[0].role_category, RoleCategory::Sales);
    }

    #[test]
    fn test_same_name_with_different_emails_stays_separate() {
        let a = candidate("Jane Doe", Some("jane@acmemotors.com"), 5.0);
        let b = candidate("Jane Doe", Some("jdoe@othermotors.com"), 4.0);
        assert_eq!(dedupe(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_rank_sorts_and_caps() {
        let scorer = StaffScorer::new("acmemotors.com").with_max_candidates(2);
        let fragments = vec![
            fragment("Amy Adams", "Receptionist", "", ""),
            fragment("Bob Brown", "Owner", "bob@acmemotors.com", ""),
            fragment("Carl Cole", "Sales", "carl@gmail.com", ""),
        ];

        let ranked = scorer.rank(&fragments);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].name, "Bob Brown");
        assert_eq!(ranked[1].name, "Carl Cole");
    }
}
