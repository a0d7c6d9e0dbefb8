//! The field-merge rule shared by import reconciliation and deduplication.
//!
//! A present stored value is never overwritten. Incoming values only fill
//! gaps, `created_at` moves to the earlier of the two, and tags are unioned
//! case-insensitively.

use chrono::{DateTime, Utc};

use crate::models::{BookmarkRecord, CandidateRecord, RecordPatch};

/// The only emptiness rule: a field is present when it is non-empty after trim.
pub fn is_present(field: &str) -> bool {
    !field.trim().is_empty()
}

fn present(field: Option<&str>) -> Option<&str> {
    field.map(str::trim).filter(|f| !f.is_empty())
}

/// Borrowed view of the fields that can flow into a stored record.
#[derive(Debug, Clone, Copy)]
pub struct MergeSource<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub favicon_url: Option<&'a str>,
    pub source_file: Option<&'a str>,
    pub created_at: Option<DateTime<Utc>>,
    pub tags: &'a [String],
}

impl<'a> From<&'a CandidateRecord> for MergeSource<'a> {
    fn from(c: &'a CandidateRecord) -> Self {
        Self {
            title: c.title.as_deref(),
            description: c.description.as_deref(),
            favicon_url: c.favicon_url.as_deref(),
            source_file: Some(c.source_file.as_str()),
            created_at: c.created_at,
            tags: &c.tags,
        }
    }
}

impl<'a> From<&'a BookmarkRecord> for MergeSource<'a> {
    fn from(r: &'a BookmarkRecord) -> Self {
        Self {
            title: Some(r.title.as_str()),
            description: Some(r.description.as_str()),
            favicon_url: Some(r.favicon_url.as_str()),
            source_file: Some(r.source_file.as_str()),
            created_at: Some(r.created_at),
            tags: &r.tags,
        }
    }
}

/// Changes that [`merge_fields`] wants applied to a stored record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldPatch {
    pub fields: RecordPatch,
    /// Tags to associate, none of which the record already has.
    pub add_tags: Vec<String>,
}

impl FieldPatch {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.add_tags.is_empty()
    }

    /// Fold the patch into an in-memory record, as the store would.
    pub fn apply_to(&self, record: &mut BookmarkRecord) {
        self.fields.apply_to(record);
        for tag in &self.add_tags {
            record.tags.push(tag.clone());
        }
        sort_tags(&mut record.tags);
    }
}

/// Sort tag names case-insensitively, ties broken by exact bytes.
pub fn sort_tags(tags: &mut [String]) {
    tags.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });
}

/// Trim names, drop empties and case-insensitive repeats. First spelling wins.
pub fn clean_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let name = tag.as_ref().trim();
        if name.is_empty() {
            continue;
        }
        if seen.insert(name.to_lowercase()) {
            out.push(name.to_string());
        }
    }
    out
}

/// Compute what `incoming` contributes to `stored`.
pub fn merge_fields<'a>(stored: &BookmarkRecord, incoming: impl Into<MergeSource<'a>>) -> FieldPatch {
    let incoming = incoming.into();
    let mut fields = RecordPatch::default();

    let fill = |current: &str, offered: Option<&str>| -> Option<String> {
        match present(offered) {
            Some(v) if !is_present(current) => Some(v.to_string()),
            _ => None,
        }
    };

    fields.title = fill(&stored.title, incoming.title);
    fields.description = fill(&stored.description, incoming.description);
    fields.favicon_url = fill(&stored.favicon_url, incoming.favicon_url);
    fields.source_file = fill(&stored.source_file, incoming.source_file);

    if let Some(ts) = incoming.created_at {
        if ts < stored.created_at {
            fields.created_at = Some(ts);
        }
    }

    let existing: std::collections::HashSet<String> =
        stored.tags.iter().map(|t| t.trim().to_lowercase()).collect();
    let add_tags = clean_tags(incoming.tags)
        .into_iter()
        .filter(|t| !existing.contains(&t.to_lowercase()))
        .collect();

    FieldPatch { fields, add_tags }
}
