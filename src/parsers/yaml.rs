//! Structured bookmark files (`+++.md`): YAML mappings separated by `---`.
//!
//! ```yaml
//! url: https://example.com/post
//! title: A post
//! tags: [rust, async]
//! created: 2023-04-05
//! author: Someone
//! ---
//! url: https://example.com/other
//! ```

use std::sync::OnceLock;

use regex::{Regex, Split};
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use linkshelf_core::models::{CandidateRecord, Source};

use super::{from_epoch, parse_timestamp, split_tags, SourceParser};

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^---[ \t]*\r?$").expect("separator regex"))
}

pub struct YamlMarkdownParser {
    blob: String,
    source_file: String,
}

impl YamlMarkdownParser {
    pub fn new(blob: String, source_file: &str) -> Self {
        Self {
            blob,
            source_file: source_file.to_string(),
        }
    }
}

impl SourceParser for YamlMarkdownParser {
    fn kind(&self) -> Source {
        Source::Yaml
    }

    fn candidates(&self) -> Box<dyn Iterator<Item = CandidateRecord> + '_> {
        Box::new(Sections {
            sections: separator_re().split(&self.blob),
            source_file: &self.source_file,
        })
    }
}

struct Sections<'a> {
    sections: Split<'static, 'a>,
    source_file: &'a str,
}

impl Iterator for Sections<'_> {
    type Item = CandidateRecord;

    fn next(&mut self) -> Option<CandidateRecord> {
        for section in self.sections.by_ref() {
            let section = section.trim();
            if section.is_empty() {
                continue;
            }
            let value: Value = match serde_yaml::from_str(section) {
                Ok(v) => v,
                Err(e) => {
                    warn!(file = self.source_file, error = %e, "skipping unparsable YAML section");
                    continue;
                }
            };
            let Value::Mapping(map) = value else {
                debug!(file = self.source_file, "skipping non-mapping YAML section");
                continue;
            };
            match candidate_from_mapping(&map, Source::Yaml, self.source_file) {
                Some(c) => return Some(c),
                None => warn!(file = self.source_file, "skipping YAML entry without url"),
            }
        }
        None
    }
}

fn get<'m>(map: &'m Mapping, key: &str) -> Option<&'m Value> {
    map.get(Value::String(key.to_string()))
}

fn scalar_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn tags_from(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_string).collect(),
        Value::String(s) => split_tags(s),
        _ => Vec::new(),
    }
}

/// Build a candidate from a YAML mapping. Returns `None` without a `url`.
///
/// `author` is folded into the description since records have no author
/// field.
pub(crate) fn candidate_from_mapping(map: &Mapping, source: Source, source_file: &str) -> Option<CandidateRecord> {
    let url = get(map, "url").and_then(scalar_string)?;
    let mut candidate = CandidateRecord::new(url, source).with_source_file(source_file);

    if let Some(title) = get(map, "title").and_then(scalar_string) {
        candidate.title = Some(title);
    }

    let description = get(map, "description").and_then(scalar_string);
    let author = get(map, "author").and_then(scalar_string);
    candidate.description = match (description, author) {
        (Some(d), Some(a)) => Some(format!("{d} (Author: {a})")),
        (None, Some(a)) => Some(format!("Author: {a}")),
        (d, None) => d,
    };

    if let Some(tags) = get(map, "tags") {
        candidate.tags = tags_from(tags);
    }

    let created = get(map, "created").or_else(|| get(map, "created_at"));
    candidate.created_at = match created {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).and_then(from_epoch),
        Some(Value::String(s)) => parse_timestamp(s),
        _ => None,
    };

    if let Some(icon) = get(map, "favicon").or_else(|| get(map, "favicon_url")).and_then(scalar_string) {
        candidate.favicon_url = Some(icon);
    }

    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn parse(blob: &str) -> Vec<CandidateRecord> {
        YamlMarkdownParser::new(blob.to_string(), "notes/+++.md")
            .candidates()
            .collect()
    }

    #[test]
    fn test_sections() {
        let blob = "\
url: https://example.com/a
title: First
tags: [rust, web]
created: 2023-04-05
---
url: https://example.com/b
description: Second entry
author: Ada
tags: news, daily
created_at: 1680652800
---

---
";
        let c = parse(blob);
        assert_eq!(c.len(), 2);

        assert_eq!(c[0].url, "https://example.com/a");
        assert_eq!(c[0].title.as_deref(), Some("First"));
        assert_eq!(c[0].tags, vec!["rust", "web"]);
        assert_eq!(c[0].created_at, Some(Utc.with_ymd_and_hms(2023, 4, 5, 0, 0, 0).unwrap()));
        assert_eq!(c[0].source, Source::Yaml);
        assert_eq!(c[0].source_file, "notes/+++.md");

        assert_eq!(c[1].description.as_deref(), Some("Second entry (Author: Ada)"));
        assert_eq!(c[1].tags, vec!["news", "daily"]);
        assert_eq!(c[1].created_at.map(|t| t.timestamp()), Some(1680652800));
        assert!(c[1].title.is_none());
    }

    #[test]
    fn test_author_only() {
        let c = parse("url: https://a.com/\nauthor: Grace\n");
        assert_eq!(c[0].description.as_deref(), Some("Author: Grace"));
    }

    #[test]
    fn test_malformed_sections_skipped() {
        let blob = "\
title: no url here
---
url: [unclosed
---
- just
- a list
---
url: https://ok.com/
";
        let c = parse(blob);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].url, "https://ok.com/");
    }

    #[test]
    fn test_leading_front_matter_delimiter() {
        let c = parse("---\nurl: https://a.com/\n---\n");
        assert_eq!(c.len(), 1);
    }
}
