//! Category (brand) tagging of targets.
//!
//! Exact keyword match on the name or URL host first, then a fuzzy match of
//! each keyword against the words of the name, then "Other".

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::AppError;
use crate::util::domain_key;

pub const OTHER: &str = "Other";
pub const UNKNOWN: &str = "Unknown";

/// Minimum similarity (0-100) for a fuzzy keyword match.
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 80;

/// Built-in table: vehicle manufacturers and the brands sold under them.
pub const DEFAULT_CATEGORIES: &[(&str, &[&str])] = &[
    ("Toyota", &["toyota", "lexus"]),
    ("Ford", &["ford", "lincoln"]),
    ("GM", &["chevrolet", "chevy", "gmc", "buick", "cadillac"]),
    ("Honda", &["honda", "acura"]),
    ("BMW", &["bmw", "mini"]),
    ("Mercedes", &["mercedes", "benz"]),
    ("Hyundai", &["hyundai", "genesis"]),
    ("Kia", &["kia"]),
    ("Stellantis", &["chrysler", "dodge", "jeep", "ram", "fiat"]),
    ("Volkswagen", &["volkswagen", "vw", "audi", "porsche"]),
    ("Nissan", &["nissan", "infiniti"]),
    ("Mazda", &["mazda"]),
    ("Subaru", &["subaru"]),
    ("Volvo", &["volvo"]),
    ("Jaguar Land Rover", &["jaguar", "land rover"]),
    ("Tesla", &["tesla"]),
];

/// Ordered category → keywords table.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    entries: Vec<(String, Vec<String>)>,
    fuzzy_threshold: u8,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_CATEGORIES
                .iter()
                .map(|(c, kws)| (c.to_string(), kws.iter().map(|k| k.to_string()).collect())),
        )
    }
}

impl CategoryTable {
    pub fn new(entries: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(c, kws)| (c, kws.into_iter().map(|k| k.to_lowercase()).collect()))
                .collect(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    /// Load `{"Category": ["keyword", ...]}` from a JSON file. Categories
    /// are matched in alphabetical order.
    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Cannot read category table {}: {e}", path.display()))
        })?;
        let parsed: BTreeMap<String, Vec<String>> = serde_json::from_str(&raw).map_err(|e| {
            AppError::ConfigError(format!("Invalid category table {}: {e}", path.display()))
        })?;
        Ok(Self::new(parsed))
    }

    pub fn with_fuzzy_threshold(mut self, threshold: u8) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    /// Category for a target; `"Other"` when nothing matches and
    /// `"Unknown"` when there is nothing to match against.
    pub fn classify(&self, name: &str, url: &str) -> String {
        let name = name.trim().to_lowercase();
        let host = if url.trim().is_empty() {
            String::new()
        } else {
            domain_key(&url.trim().to_lowercase())
        };
        if name.is_empty() && host.is_empty() {
            return UNKNOWN.to_string();
        }

        let words: Vec<&str> = name
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let padded = format!(" {} ", words.join(" "));

        for (category, keywords) in &self.entries {
            let exact = keywords
                .iter()
                .any(|k| padded.contains(&format!(" {k} ")) || (!host.is_empty() && host.contains(k.as_str())));
            if exact {
                return category.clone();
            }
        }

        for (category, keywords) in &self.entries {
            let fuzzy = keywords.iter().any(|k| {
                similarity_ratio(k, &name) >= self.fuzzy_threshold
                    || words
                        .iter()
                        .any(|w| similarity_ratio(k, w) >= self.fuzzy_threshold)
            });
            if fuzzy {
                tracing::debug!(%name, %category, "Fuzzy category match");
                return category.clone();
            }
        }

        OTHER.to_string()
    }
}

/// Similarity of two strings as `100 * 2 * LCS / (len_a + len_b)`, rounded.
///
/// This is the insertion/deletion edit ratio: 100 for identical strings,
/// 0 when they share no characters in order.
pub fn similarity_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];

    ((200 * lcs) as f64 / total as f64).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_ratio() {
        assert_eq!(similarity_ratio("toyota", "toyota"), 100);
        assert_eq!(similarity_ratio("", ""), 100);
        assert_eq!(similarity_ratio("abc", "xyz"), 0);
        assert_eq!(similarity_ratio("toyota", "toyotta"), 92);
        assert!(similarity_ratio("ford", "fjord") >= 80);
        assert!(similarity_ratio("kia", "kingdom") < 80);
    }

    #[test]
    fn test_exact_match_on_name() {
        let table = CategoryTable::default();
        assert_eq!(table.classify("Lexus of Cleveland", ""), "Toyota");
        assert_eq!(table.classify("Bill's Chevy Center", "https://bills.com"), "GM");
        assert_eq!(table.classify("Westside Land Rover", ""), "Jaguar Land Rover");
    }

    #[test]
    fn test_exact_match_on_url_host() {
        let table = CategoryTable::default();
        assert_eq!(
            table.classify("Westside Motors", "https://www.westsidesubaru.com"),
            "Subaru"
        );
    }

    #[test]
    fn test_keyword_must_be_whole_word_in_name() {
        let table = CategoryTable::default();
        // "ram" inside "Grampian" is not a Ram dealer.
        assert_eq!(table.classify("Grampian Autos", ""), "Other");
    }

    #[test]
    fn test_fuzzy_fallback() {
        let table = CategoryTable::default();
        assert_eq!(table.classify("Toyotta Motors", ""), "Toyota");
        assert_eq!(table.classify("Hyundia World", ""), "Hyundai");
    }

    #[test]
    fn test_other_and_unknown() {
        let table = CategoryTable::default();
        assert_eq!(table.classify("Smith Family Auto", "https://smithauto.com"), "Other");
        assert_eq!(table.classify("  ", ""), "Unknown");
    }

    #[test]
    fn test_custom_table_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("categories.json");
        std::fs::write(&path, r#"{"Boats": ["marine", "yacht"]}"#).unwrap();

        let table = CategoryTable::from_json_file(&path).unwrap();
        assert_eq!(table.categories().collect::<Vec<_>>(), vec!["Boats"]);
        assert_eq!(table.classify("Lakeside Marine", ""), "Boats");
        assert_eq!(table.classify("Lexus of Cleveland", ""), "Other");
    }
}
