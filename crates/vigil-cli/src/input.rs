use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use vigil_core::models::Target;
use vigil_core::util::normalize_url;

/// Read `(name, url)` targets from a CSV file with a header row.
///
/// Rows with an empty URL are skipped, as are repeats of a URL already
/// seen (compared after normalization).
pub fn load_targets(path: &Path, name_column: &str, url_column: &str) -> Result<Vec<Target>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;

    let headers = reader.headers().context("Input file has no header row")?.clone();
    let find = |column: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(column))
    };
    let Some(url_idx) = find(url_column) else {
        bail!("Column '{url_column}' not found in {}", path.display());
    };
    let name_idx = find(name_column);

    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Malformed CSV row {}", line + 2))?;
        let url = row.get(url_idx).unwrap_or("").trim();
        if url.is_empty() {
            continue;
        }
        let key = normalize_url(url).unwrap_or_else(|_| url.to_lowercase());
        if !seen.insert(key) {
            tracing::debug!(url, "Skipping duplicate input row");
            continue;
        }
        let name = name_idx
            .and_then(|i| row.get(i))
            .unwrap_or("")
            .trim();
        targets.push(Target::new(name, url));
    }

    Ok(targets)
}
