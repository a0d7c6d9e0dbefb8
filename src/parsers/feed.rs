//! Feed sources.
//!
//! Two shapes land in the feed group:
//!
//! - XML syndication files. [`AtomFeedParser`] reads Atom `<entry>` and RSS
//!   `<item>` elements with a streaming `quick_xml` reader.
//! - Category files under `--db-feeds/`, one markdown file per topic.
//!   [`CategoryFeedParser`] reads `---`-separated entries (YAML when it
//!   parses, `key: value` lines otherwise) and tags every entry with the
//!   category derived from the file name.

use std::sync::OnceLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Regex, Split};
use serde_yaml::Value;
use tracing::{debug, warn};

use linkshelf_core::merge::clean_tags;
use linkshelf_core::models::{CandidateRecord, Source};

use super::yaml::candidate_from_mapping;
use super::{parse_timestamp, split_tags, SourceParser};

// ============ Atom / RSS ============

pub struct AtomFeedParser {
    blob: String,
    source_file: String,
}

impl AtomFeedParser {
    pub fn new(blob: String, source_file: &str) -> Self {
        Self {
            blob,
            source_file: source_file.to_string(),
        }
    }
}

impl SourceParser for AtomFeedParser {
    fn kind(&self) -> Source {
        Source::Feed
    }

    fn candidates(&self) -> Box<dyn Iterator<Item = CandidateRecord> + '_> {
        let mut reader = Reader::from_str(&self.blob);
        reader.config_mut().trim_text(true);
        Box::new(XmlEntries {
            reader,
            source_file: &self.source_file,
            entry: None,
            done: false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Title,
    Summary,
    Content,
    Published,
    Updated,
    Link,
    Category,
    AuthorName,
}

#[derive(Default)]
struct PartialEntry {
    field: Option<Field>,
    in_author: bool,
    link: Option<String>,
    alternate_link: bool,
    title: String,
    summary: String,
    content: String,
    published: String,
    updated: String,
    author: String,
    categories: Vec<String>,
    category_text: String,
}

impl PartialEntry {
    fn push_text(&mut self, text: &str) {
        let Some(field) = self.field else { return };
        let target = match field {
            Field::Title => &mut self.title,
            Field::Summary => &mut self.summary,
            Field::Content => &mut self.content,
            Field::Published => &mut self.published,
            Field::Updated => &mut self.updated,
            Field::Category => &mut self.category_text,
            Field::AuthorName => &mut self.author,
            Field::Link => {
                if self.link.is_none() {
                    self.link = Some(text.trim().to_string());
                }
                return;
            }
        };
        target.push_str(text);
    }

    /// `<link href=.. rel=..>`: the first `alternate` (or rel-less) link wins.
    fn on_link(&mut self, e: &BytesStart) {
        let mut href = None;
        let mut rel = None;
        for attr in e.attributes().flatten() {
            let value = attr.unescape_value().map(|v| v.into_owned()).unwrap_or_default();
            match attr.key.local_name().as_ref() {
                b"href" => href = Some(value),
                b"rel" => rel = Some(value),
                _ => {}
            }
        }
        let Some(href) = href.filter(|h| !h.trim().is_empty()) else {
            return;
        };
        let alternate = rel.as_deref().map_or(true, |r| r == "alternate");
        if self.link.is_none() || (alternate && !self.alternate_link) {
            self.link = Some(href.trim().to_string());
            self.alternate_link = alternate;
        }
    }

    fn on_category(&mut self, e: &BytesStart) {
        for attr in e.attributes().flatten() {
            if attr.key.local_name().as_ref() == b"term" {
                if let Ok(term) = attr.unescape_value() {
                    self.categories.push(term.into_owned());
                }
            }
        }
    }

    fn into_candidate(self, source_file: &str) -> Option<CandidateRecord> {
        let url = self.link.filter(|l| !l.is_empty())?;
        let mut candidate = CandidateRecord::new(url, Source::Feed)
            .with_tags(clean_tags(self.categories))
            .with_source_file(source_file);

        let title = self.title.trim();
        if !title.is_empty() {
            candidate.title = Some(title.to_string());
        }
        let body = if self.summary.trim().is_empty() {
            self.content.trim()
        } else {
            self.summary.trim()
        };
        let author = self.author.trim();
        candidate.description = match (body.is_empty(), author.is_empty()) {
            (false, false) => Some(format!("{body} (Author: {author})")),
            (true, false) => Some(format!("Author: {author}")),
            (false, true) => Some(body.to_string()),
            (true, true) => None,
        };
        candidate.created_at = parse_timestamp(&self.published).or_else(|| parse_timestamp(&self.updated));
        Some(candidate)
    }
}

struct XmlEntries<'a> {
    reader: Reader<&'a [u8]>,
    source_file: &'a str,
    entry: Option<PartialEntry>,
    done: bool,
}

impl XmlEntries<'_> {
    fn on_start(&mut self, e: &BytesStart, empty: bool) {
        let name = e.local_name();
        let name = name.as_ref();
        if name == b"entry" || name == b"item" {
            if self.entry.is_some() {
                warn!(file = self.source_file, "nested feed entry, dropping the outer one");
            }
            self.entry = if empty { None } else { Some(PartialEntry::default()) };
            return;
        }
        let Some(entry) = self.entry.as_mut() else { return };
        // Markup inside a text field (xhtml content) keeps accumulating.
        if entry.field.is_some() {
            return;
        }
        match name {
            b"link" => {
                entry.on_link(e);
                if !empty && entry.link.is_none() {
                    entry.field = Some(Field::Link);
                }
            }
            b"category" => {
                entry.on_category(e);
                if !empty {
                    entry.category_text.clear();
                    entry.field = Some(Field::Category);
                }
            }
            b"author" | b"creator" if !empty => {
                entry.in_author = name == b"author";
                if name == b"creator" {
                    entry.field = Some(Field::AuthorName);
                }
            }
            _ if empty => {}
            b"name" if entry.in_author => entry.field = Some(Field::AuthorName),
            b"title" => entry.field = Some(Field::Title),
            b"summary" | b"description" => entry.field = Some(Field::Summary),
            b"content" | b"encoded" => entry.field = Some(Field::Content),
            b"published" | b"pubDate" | b"date" | b"issued" => entry.field = Some(Field::Published),
            b"updated" | b"modified" => entry.field = Some(Field::Updated),
            _ => {}
        }
    }

    /// Returns a finished candidate when an entry closes.
    fn on_end(&mut self, name: &[u8]) -> Option<CandidateRecord> {
        if name == b"entry" || name == b"item" {
            let entry = self.entry.take()?;
            let candidate = entry.into_candidate(self.source_file);
            if candidate.is_none() {
                warn!(file = self.source_file, "skipping feed entry without link");
            }
            return candidate;
        }
        let entry = self.entry.as_mut()?;
        let closes_field = matches!(
            (entry.field, name),
            (Some(Field::Title), b"title")
                | (Some(Field::Summary), b"summary" | b"description")
                | (Some(Field::Content), b"content" | b"encoded")
                | (Some(Field::Published), b"published" | b"pubDate" | b"date" | b"issued")
                | (Some(Field::Updated), b"updated" | b"modified")
                | (Some(Field::Link), b"link")
                | (Some(Field::Category), b"category")
                | (Some(Field::AuthorName), b"name" | b"creator")
        );
        if closes_field {
            if entry.field == Some(Field::Category) {
                let text = entry.category_text.trim().to_string();
                if !text.is_empty() {
                    entry.categories.push(text);
                }
            }
            entry.field = None;
        }
        if name == b"author" {
            entry.in_author = false;
        }
        None
    }
}

impl Iterator for XmlEntries<'_> {
    type Item = CandidateRecord;

    fn next(&mut self) -> Option<CandidateRecord> {
        if self.done {
            return None;
        }
        loop {
            match self.reader.read_event() {
                Ok(Event::Start(e)) => self.on_start(&e, false),
                Ok(Event::Empty(e)) => self.on_start(&e, true),
                Ok(Event::Text(te)) => {
                    if let Some(entry) = self.entry.as_mut() {
                        let text = te.unescape().unwrap_or_default();
                        entry.push_text(&text);
                    }
                }
                Ok(Event::CData(cd)) => {
                    if let Some(entry) = self.entry.as_mut() {
                        entry.push_text(&String::from_utf8_lossy(&cd));
                    }
                }
                Ok(Event::End(e)) => {
                    if let Some(candidate) = self.on_end(e.local_name().as_ref()) {
                        return Some(candidate);
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    warn!(
                        file = self.source_file,
                        position = self.reader.buffer_position(),
                        error = %e,
                        "malformed feed XML, stopping"
                    );
                    break;
                }
                _ => {}
            }
        }
        self.done = true;
        None
    }
}

// ============ Category files ============

/// `machine-learning` / `machine_learning` -> `Machine Learning`.
pub fn category_from_stem(stem: &str) -> String {
    stem.replace(['-', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

struct LinePatterns {
    url: Regex,
    bare_url: Regex,
    title: Regex,
    description: Regex,
    created: Regex,
    tags_list: Regex,
    tags_line: Regex,
    author: Regex,
    separator: Regex,
}

fn patterns() -> &'static LinePatterns {
    static P: OnceLock<LinePatterns> = OnceLock::new();
    P.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("feed line regex");
        LinePatterns {
            url: re(r"(?mi)^url:\s*(\S+)\s*$"),
            bare_url: re(r"https?://[^\s<>)\]]+"),
            title: re(r"(?mi)^title:\s*(.+?)\s*$"),
            description: re(r"(?mi)^description:\s*(.+?)\s*$"),
            created: re(r"(?mi)^created(?:_at)?:\s*(.+?)\s*$"),
            tags_list: re(r"(?mi)^tags:\s*\[(.*?)\]"),
            tags_line: re(r"(?mi)^tags:\s*(.+?)\s*$"),
            author: re(r"(?mi)^author:\s*(.+?)\s*$"),
            separator: re(r"(?m)^---[ \t]*\r?$"),
        }
    })
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

/// Fallback for sections that are not a YAML mapping: pick `key: value`
/// lines out of free text, or the first bare http(s) URL.
fn simple_entry(section: &str, source_file: &str) -> Option<CandidateRecord> {
    let p = patterns();
    let url = capture(&p.url, section).or_else(|| p.bare_url.find(section).map(|m| m.as_str()))?;
    let mut candidate = CandidateRecord::new(url, Source::Feed).with_source_file(source_file);
    candidate.title = capture(&p.title, section).map(str::to_string);
    let description = capture(&p.description, section);
    let author = capture(&p.author, section);
    candidate.description = match (description, author) {
        (Some(d), Some(a)) => Some(format!("{d} (Author: {a})")),
        (None, Some(a)) => Some(format!("Author: {a}")),
        (d, None) => d.map(str::to_string),
    };
    candidate.created_at = capture(&p.created, section).and_then(parse_timestamp);
    candidate.tags = capture(&p.tags_list, section)
        .or_else(|| capture(&p.tags_line, section))
        .map(split_tags)
        .unwrap_or_default();
    Some(candidate)
}

pub struct CategoryFeedParser {
    blob: String,
    source_file: String,
    category: String,
}

impl CategoryFeedParser {
    pub fn new(blob: String, source_file: &str, stem: &str) -> Self {
        Self {
            blob,
            source_file: source_file.to_string(),
            category: category_from_stem(stem),
        }
    }
}

impl SourceParser for CategoryFeedParser {
    fn kind(&self) -> Source {
        Source::Feed
    }

    fn candidates(&self) -> Box<dyn Iterator<Item = CandidateRecord> + '_> {
        Box::new(CategorySections {
            sections: patterns().separator.split(&self.blob),
            source_file: &self.source_file,
            category: &self.category,
        })
    }
}

struct CategorySections<'a> {
    sections: Split<'static, 'a>,
    source_file: &'a str,
    category: &'a str,
}

impl CategorySections<'_> {
    fn parse_section(&self, section: &str) -> Option<CandidateRecord> {
        if let Ok(Value::Mapping(map)) = serde_yaml::from_str::<Value>(section) {
            if let Some(c) = candidate_from_mapping(&map, Source::Feed, self.source_file) {
                return Some(c);
            }
        }
        simple_entry(section, self.source_file)
    }
}

impl Iterator for CategorySections<'_> {
    type Item = CandidateRecord;

    fn next(&mut self) -> Option<CandidateRecord> {
        while let Some(section) = self.sections.next() {
            let section = section.trim();
            if section.is_empty() {
                continue;
            }
            let Some(mut candidate) = self.parse_section(section) else {
                debug!(file = self.source_file, "skipping feed section without url");
                continue;
            };
            if !self.category.is_empty() {
                candidate.tags.push(self.category.to_string());
                candidate.tags = clean_tags(std::mem::take(&mut candidate.tags));
            }
            return Some(candidate);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn atom(blob: &str) -> Vec<CandidateRecord> {
        AtomFeedParser::new(blob.to_string(), "feeds/blog.atom")
            .candidates()
            .collect()
    }

    #[test]
    fn test_atom_entries() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Feed title is not an entry</title>
  <entry>
    <title>Async &amp; you</title>
    <link rel="self" href="https://blog.example.com/self/1"/>
    <link rel="alternate" href="https://blog.example.com/posts/1"/>
    <summary>Short summary</summary>
    <published>2023-04-05T00:00:00Z</published>
    <author><name>Ferris</name></author>
    <category term="rust"/>
    <category term="Rust"/>
  </entry>
  <entry>
    <title>No link</title>
  </entry>
  <entry>
    <title>Second</title>
    <link href="https://blog.example.com/posts/2"/>
    <content type="html"><![CDATA[<p>Body</p>]]></content>
    <updated>2023-04-06T00:00:00Z</updated>
  </entry>
</feed>"#;
        let c = atom(xml);
        assert_eq!(c.len(), 2);

        assert_eq!(c[0].url, "https://blog.example.com/posts/1");
        assert_eq!(c[0].title.as_deref(), Some("Async & you"));
        assert_eq!(c[0].description.as_deref(), Some("Short summary (Author: Ferris)"));
        assert_eq!(c[0].created_at, Some(Utc.with_ymd_and_hms(2023, 4, 5, 0, 0, 0).unwrap()));
        assert_eq!(c[0].tags, vec!["rust"]);
        assert_eq!(c[0].source, Source::Feed);

        assert_eq!(c[1].url, "https://blog.example.com/posts/2");
        assert_eq!(c[1].description.as_deref(), Some("<p>Body</p>"));
        assert_eq!(c[1].created_at, Some(Utc.with_ymd_and_hms(2023, 4, 6, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_rss_items() {
        let xml = r#"<rss version="2.0"><channel>
  <title>Channel</title>
  <link>https://news.example.com/</link>
  <item>
    <title>Story</title>
    <link>https://news.example.com/story?utm_source=rss</link>
    <description>What happened</description>
    <pubDate>Wed, 05 Apr 2023 00:00:00 +0000</pubDate>
    <category>World</category>
  </item>
</channel></rss>"#;
        let c = atom(xml);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].url, "https://news.example.com/story?utm_source=rss");
        assert_eq!(c[0].title.as_deref(), Some("Story"));
        assert_eq!(c[0].description.as_deref(), Some("What happened"));
        assert_eq!(c[0].tags, vec!["World"]);
        assert_eq!(c[0].created_at, Some(Utc.with_ymd_and_hms(2023, 4, 5, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_malformed_xml_keeps_earlier_entries() {
        let xml = "<feed><entry><link href=\"https://a.com/\"/></entry><entry><title>x</wrong></entry></feed>";
        let c = atom(xml);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].url, "https://a.com/");
    }

    #[test]
    fn test_category_from_stem() {
        assert_eq!(category_from_stem("machine-learning"), "Machine Learning");
        assert_eq!(category_from_stem("web__DEV"), "Web Dev");
        assert_eq!(category_from_stem(""), "");
    }

    #[test]
    fn test_category_file_yaml_and_simple_entries() {
        let blob = "\
url: https://a.com/x
title: Yaml entry
tags: [papers]
---
Some notes about a paper https://arxiv.org/abs/1234.5678 worth reading.
tags: reading, Machine Learning
created: 2023-04-05
---
nothing useful here
";
        let parser = CategoryFeedParser::new(blob.to_string(), "--db-feeds/machine-learning.md", "machine-learning");
        let c: Vec<_> = parser.candidates().collect();
        assert_eq!(c.len(), 2);

        assert_eq!(c[0].title.as_deref(), Some("Yaml entry"));
        assert_eq!(c[0].tags, vec!["papers", "Machine Learning"]);

        assert_eq!(c[1].url, "https://arxiv.org/abs/1234.5678");
        assert_eq!(c[1].tags, vec!["reading", "Machine Learning"]);
        assert_eq!(c[1].created_at, Some(Utc.with_ymd_and_hms(2023, 4, 5, 0, 0, 0).unwrap()));
        assert!(c.iter().all(|c| c.source == Source::Feed));
    }
}
