//! Source parsers: turn exported bookmark files into candidate records.
//!
//! Every parser owns the raw file contents and implements
//! [`SourceParser`]. Parsing is lazy: [`SourceParser::candidates`] returns an
//! iterator that walks the blob on demand, and calling it again starts a
//! fresh pass over the same blob. Malformed entries are skipped with a
//! `warn!` naming the file and the reason; they never abort the file.
//!
//! | Parser | Source | Format |
//! |--------|--------|--------|
//! | [`html::NetscapeHtmlParser`] | `html_export` | browser bookmark export |
//! | [`yaml::YamlMarkdownParser`] | `yaml` | `---`-separated YAML blocks |
//! | [`feed::AtomFeedParser`] | `feed` | Atom / RSS XML |
//! | [`feed::CategoryFeedParser`] | `feed` | one markdown file per category |

pub mod feed;
pub mod html;
pub mod yaml;

use std::path::Path;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use linkshelf_core::models::{CandidateRecord, Source};

/// A lazily-parsed bookmark source.
pub trait SourceParser {
    fn kind(&self) -> Source;

    /// Iterate the candidates in file order.
    fn candidates(&self) -> Box<dyn Iterator<Item = CandidateRecord> + '_>;
}

/// Which configured glob group a file was found by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Html,
    Yaml,
    Feeds,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Html => "html",
            ImportKind::Yaml => "yaml",
            ImportKind::Feeds => "feeds",
        }
    }
}

/// Pick the parser for a file found under `kind`'s globs.
///
/// Feed files ending in `.md` or `.txt` are category files; everything else
/// in the feed group is treated as XML.
pub fn parser_for(kind: ImportKind, path: &Path, source_file: &str, blob: String) -> Box<dyn SourceParser> {
    match kind {
        ImportKind::Html => Box::new(html::NetscapeHtmlParser::new(blob, source_file)),
        ImportKind::Yaml => Box::new(yaml::YamlMarkdownParser::new(blob, source_file)),
        ImportKind::Feeds => {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if ext == "md" || ext == "txt" {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                Box::new(feed::CategoryFeedParser::new(blob, source_file, &stem))
            } else {
                Box::new(feed::AtomFeedParser::new(blob, source_file))
            }
        }
    }
}

/// Parse the timestamp shapes found in bookmark exports: RFC 3339,
/// RFC 2822, `YYYY-MM-DD`, `MM/DD/YYYY`, `DD-MM-YYYY`, and epoch numbers.
///
/// Epoch values above 10^11 are taken as milliseconds, above 10^14 as
/// microseconds (Firefox `places` exports).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return from_epoch(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
        }
    }
    None
}

pub fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n <= 0 {
        return None;
    }
    if n > 100_000_000_000_000 {
        DateTime::from_timestamp_micros(n)
    } else if n > 100_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

/// Split a comma-separated tag string.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().trim_matches(|c| c == '"' || c == '\''))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
