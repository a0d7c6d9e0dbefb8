//! Core data models used throughout linkshelf.
//!
//! These types represent the bookmarks, tags, import candidates, and
//! deduplication results that flow between parsers, the reconciler, the
//! deduplication engine, and the store.
//!
//! Text fields are plain `String`s; an absent value is the empty string.
//! Presence is always decided by [`crate::merge::is_present`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Where a bookmark came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    HtmlExport,
    Yaml,
    Feed,
    Manual,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::HtmlExport => "html_export",
            Source::Yaml => "yaml",
            Source::Feed => "feed",
            Source::Manual => "manual",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html_export" => Ok(Source::HtmlExport),
            "yaml" => Ok(Source::Yaml),
            "feed" => Ok(Source::Feed),
            "manual" => Ok(Source::Manual),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

/// Lifecycle status of a stored bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Archived,
    Broken,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Archived => "archived",
            Status::Broken => "broken",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Status::Active),
            "archived" => Ok(Status::Archived),
            "broken" => Ok(Status::Broken),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// A persisted bookmark.
///
/// `url_hash` is unique across the store. `revision` is incremented by the
/// store on every update and is used to guard read-modify-write cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkRecord {
    pub id: i64,
    pub url_hash: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub domain: String,
    pub source: Source,
    pub source_file: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub imported_at: DateTime<Utc>,
    pub status: Status,
    pub favicon_url: String,
    pub read_status: bool,
    pub favorite: bool,
    /// Tag names, sorted case-insensitively.
    pub tags: Vec<String>,
    pub revision: i64,
}

/// Field values for a record that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub url_hash: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub domain: String,
    pub source: Source,
    pub source_file: String,
    pub created_at: DateTime<Utc>,
    pub imported_at: DateTime<Utc>,
    pub favicon_url: String,
}

/// A partial update. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub favicon_url: Option<String>,
    pub source_file: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub status: Option<Status>,
    pub read_status: Option<bool>,
    pub favorite: Option<bool>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        *self == RecordPatch::default()
    }

    /// Apply the patch in place. Does not touch `updated_at` or `revision`.
    pub fn apply_to(&self, record: &mut BookmarkRecord) {
        if let Some(v) = &self.title {
            record.title = v.clone();
        }
        if let Some(v) = &self.description {
            record.description = v.clone();
        }
        if let Some(v) = &self.favicon_url {
            record.favicon_url = v.clone();
        }
        if let Some(v) = &self.source_file {
            record.source_file = v.clone();
        }
        if let Some(v) = self.created_at {
            record.created_at = v;
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = self.read_status {
            record.read_status = v;
        }
        if let Some(v) = self.favorite {
            record.favorite = v;
        }
    }
}

/// A tag. `usage_count` always equals the number of associations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub usage_count: i64,
}

pub const DEFAULT_TAG_COLOR: &str = "#6B7280";

/// A not-yet-persisted bookmark produced by a source parser.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub favicon_url: Option<String>,
    pub source: Source,
    pub source_file: String,
}

impl CandidateRecord {
    pub fn new(url: impl Into<String>, source: Source) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            tags: Vec::new(),
            created_at: None,
            favicon_url: None,
            source,
            source_file: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_favicon_url(mut self, favicon_url: impl Into<String>) -> Self {
        self.favicon_url = Some(favicon_url.into());
        self
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = source_file.into();
        self
    }
}

/// One rejected candidate in an [`ImportSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportError {
    pub url: String,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Result of one import batch. Returned even when some candidates failed.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub source: Source,
    pub source_file: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub created: u64,
    /// Candidates that resolved to an existing record.
    pub merged: u64,
    /// Subset of `merged` that changed nothing.
    pub unchanged: u64,
    pub skipped: u64,
    pub errored: u64,
    pub errors: Vec<ImportError>,
}

impl ImportSummary {
    pub fn new(source: Source, source_file: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            source,
            source_file: source_file.into(),
            started_at: now,
            finished_at: now,
            created: 0,
            merged: 0,
            unchanged: 0,
            skipped: 0,
            errored: 0,
            errors: Vec::new(),
        }
    }

    pub fn processed(&self) -> u64 {
        self.created + self.merged + self.skipped + self.errored
    }
}

/// Similarity of one member pair inside a cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairScore {
    pub a: i64,
    pub b: i64,
    pub score: f64,
}

/// A set of records believed to be the same resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCluster {
    pub cluster_id: usize,
    pub domain: String,
    /// Member ids in ascending order.
    pub member_ids: Vec<i64>,
    pub canonical_id: i64,
    pub pair_scores: Vec<PairScore>,
}
