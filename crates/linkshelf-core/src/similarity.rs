//! Pairwise likeness between bookmarks.
//!
//! ```text
//! similarity(a, b) = 1.0                                  if url(a) == url(b)
//!                  = 0.5·[url equal] + 0.1·[domain equal]
//!                  + 0.25·jaccard(title) + 0.15·jaccard(description)
//! ```
//!
//! URLs are compared in normalized form, so the first branch covers every
//! pair of records that share a `url_hash`. The score is symmetric and
//! deterministic.

use std::collections::BTreeSet;

use crate::models::{BookmarkRecord, CandidateRecord};
use crate::normalize::normalize_url;

pub const URL_WEIGHT: f64 = 0.5;
pub const DOMAIN_WEIGHT: f64 = 0.1;
pub const TITLE_WEIGHT: f64 = 0.25;
pub const DESCRIPTION_WEIGHT: f64 = 0.15;

/// What the similarity engine looks at.
#[derive(Debug, Clone)]
pub struct SimilarityInput<'a> {
    /// Normalized URL.
    pub url: std::borrow::Cow<'a, str>,
    pub domain: std::borrow::Cow<'a, str>,
    pub title: &'a str,
    pub description: &'a str,
}

impl<'a> From<&'a BookmarkRecord> for SimilarityInput<'a> {
    fn from(r: &'a BookmarkRecord) -> Self {
        Self {
            url: r.url.as_str().into(),
            domain: r.domain.as_str().into(),
            title: &r.title,
            description: &r.description,
        }
    }
}

impl<'a> From<&'a CandidateRecord> for SimilarityInput<'a> {
    /// Candidates carry raw URLs; unparsable ones compare by trimmed text.
    fn from(c: &'a CandidateRecord) -> Self {
        let (url, domain) = match normalize_url(&c.url) {
            Ok(n) => (n.url.into(), n.domain.into()),
            Err(_) => (c.url.trim().into(), "".into()),
        };
        Self {
            url,
            domain,
            title: c.title.as_deref().unwrap_or(""),
            description: c.description.as_deref().unwrap_or(""),
        }
    }
}

/// Lowercase, strip punctuation, split on whitespace, deduplicate.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// |A ∩ B| / |A ∪ B|, defined as 0.0 when both sets are empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Score two bookmarks in `[0, 1]`.
pub fn similarity(a: &SimilarityInput<'_>, b: &SimilarityInput<'_>) -> f64 {
    if a.url == b.url {
        return 1.0;
    }
    let domain = if !a.domain.is_empty() && a.domain == b.domain {
        DOMAIN_WEIGHT
    } else {
        0.0
    };
    let title = jaccard(&tokenize(a.title), &tokenize(b.title));
    let description = jaccard(&tokenize(a.description), &tokenize(b.description));
    (domain + TITLE_WEIGHT * title + DESCRIPTION_WEIGHT * description).clamp(0.0, 1.0)
}

/// Score a slice of records pairwise. Returns `(i, j, score)` for `i < j`.
///
/// Token sets are computed once per record rather than once per pair.
pub fn pairwise(records: &[&BookmarkRecord]) -> Vec<(usize, usize, f64)> {
    let tokens: Vec<(BTreeSet<String>, BTreeSet<String>)> = records
        .iter()
        .map(|r| (tokenize(&r.title), tokenize(&r.description)))
        .collect();

    let mut out = Vec::with_capacity(records.len() * records.len().saturating_sub(1) / 2);
    for i in 0..records.len() {
        for j in (i + 1)..records.len() {
            let (a, b) = (records[i], records[j]);
            let score = if a.url == b.url {
                1.0
            } else {
                let domain = if !a.domain.is_empty() && a.domain == b.domain {
                    DOMAIN_WEIGHT
                } else {
                    0.0
                };
                domain
                    + TITLE_WEIGHT * jaccard(&tokens[i].0, &tokens[j].0)
                    + DESCRIPTION_WEIGHT * jaccard(&tokens[i].1, &tokens[j].1)
            };
            out.push((i, j, score));
        }
    }
    out
}

/// Rank stored records by likeness to a candidate, best first.
///
/// Used by `shelf add` to warn about probable duplicates that differ in URL.
pub fn most_similar<'r>(
    candidate: &CandidateRecord,
    records: &'r [BookmarkRecord],
    min_score: f64,
) -> Vec<(&'r BookmarkRecord, f64)> {
    let needle = SimilarityInput::from(candidate);
    let mut scored: Vec<(&BookmarkRecord, f64)> = records
        .iter()
        .map(|r| (r, similarity(&needle, &SimilarityInput::from(r))))
        .filter(|(_, s)| *s >= min_score)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;

    fn input<'a>(url: &'a str, domain: &'a str, title: &'a str, description: &'a str) -> SimilarityInput<'a> {
        SimilarityInput {
            url: url.into(),
            domain: domain.into(),
            title,
            description,
        }
    }

    #[test]
    fn test_tokenize_strips_punctuation_and_dedups() {
        let t = tokenize("Rust, rust!  The Book.");
        assert_eq!(t.into_iter().collect::<Vec<_>>(), vec!["book", "rust", "the"]);
    }

    #[test]
    fn test_jaccard_empty_is_zero() {
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_equal_url_short_circuits() {
        let a = input("https://a.com/x", "a.com", "One", "");
        let b = input("https://a.com/x", "a.com", "Completely different", "text");
        assert_eq!(similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_reflexive_and_symmetric() {
        let a = input("https://a.com/x", "a.com", "Intro to Rust", "ownership and borrowing");
        let b = input("https://a.com/y", "a.com", "Rust intro", "borrowing explained");
        assert_eq!(similarity(&a, &a), 1.0);
        assert_eq!(similarity(&a, &b), similarity(&b, &a));
    }

    #[test]
    fn test_weighted_components() {
        let a = input("https://a.com/x", "a.com", "rust book", "");
        let b = input("https://a.com/y", "a.com", "rust book", "");
        // domain + full title overlap, no descriptions
        assert!((similarity(&a, &b) - 0.35).abs() < 1e-9);

        let c = input("https://b.com/y", "b.com", "", "");
        assert_eq!(similarity(&a, &c), 0.0);
    }

    #[test]
    fn test_candidate_input_normalizes_url() {
        let c = CandidateRecord::new("HTTPS://Example.com/a/#top", Source::Manual);
        let i = SimilarityInput::from(&c);
        assert_eq!(i.url, "https://example.com/a");
        assert_eq!(i.domain, "example.com");
    }
}
