//! Netscape bookmark file parser (`bookmarks.html` exports).
//!
//! Browser exports are not well-formed HTML: `<DT>` and `<P>` are never
//! closed and nesting is expressed only by `<DL>` blocks. The parser walks
//! the tag stream instead of building a DOM:
//!
//! ```text
//! <DT><H3>Folder</H3>          folder name becomes pending
//! <DL><p>                      pending folder pushed on the stack
//!     <DT><A HREF=.. ADD_DATE=.. ICON=.. TAGS=..>Title</A>
//!     <DD>Description          attaches to the preceding anchor
//! </DL><p>                     stack popped
//! ```
//!
//! The folder stack (minus the "Bookmarks" / "Bookmarks bar" containers)
//! becomes the tag list of every anchor beneath it.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{CaptureMatches, Regex};
use tracing::warn;

use linkshelf_core::models::{CandidateRecord, Source};

use super::{parse_timestamp, split_tags, SourceParser};

const CONTAINER_FOLDERS: &[&str] = &["bookmarks", "bookmarks bar", "bookmarks toolbar", "bookmarks menu"];

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<!--.*?-->|<(/?)([A-Za-z][A-Za-z0-9]*)((?:[^>\x22']|\x22[^\x22]*\x22|'[^']*')*)>")
            .expect("tag regex")
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("attribute regex")
    })
}

/// Parse `key="value"` pairs. Keys are lowercased; values are entity-decoded.
pub fn parse_attributes(raw: &str) -> HashMap<String, String> {
    attr_re()
        .captures_iter(raw)
        .filter_map(|c| {
            let key = c.get(1)?.as_str().to_ascii_lowercase();
            let value = c.get(2).or_else(|| c.get(3)).or_else(|| c.get(4))?.as_str();
            Some((key, decode_entities(value)))
        })
        .collect()
}

/// Decode HTML character references.
///
/// `&nbsp;` is mapped to a space first since XML unescaping rejects it; any
/// other unknown entity leaves the text as-is.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let raw = raw.replace("&nbsp;", " ");
    match quick_xml::escape::unescape(&raw) {
        Ok(s) => s.into_owned(),
        Err(_) => raw,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parser for browser bookmark exports.
pub struct NetscapeHtmlParser {
    blob: String,
    source_file: String,
}

impl NetscapeHtmlParser {
    pub fn new(blob: String, source_file: &str) -> Self {
        Self {
            blob,
            source_file: source_file.to_string(),
        }
    }
}

impl SourceParser for NetscapeHtmlParser {
    fn kind(&self) -> Source {
        Source::HtmlExport
    }

    fn candidates(&self) -> Box<dyn Iterator<Item = CandidateRecord> + '_> {
        Box::new(Entries {
            blob: &self.blob,
            source_file: &self.source_file,
            tags: tag_re().captures_iter(&self.blob),
            pos: 0,
            folders: Vec::new(),
            pending_folder: None,
            h3_text: None,
            anchor: None,
            pending: None,
            dd_text: None,
            done: false,
        })
    }
}

struct Anchor {
    attrs: HashMap<String, String>,
    text: String,
}

struct Entries<'a> {
    blob: &'a str,
    source_file: &'a str,
    tags: CaptureMatches<'static, 'a>,
    /// End of the last tag consumed.
    pos: usize,
    folders: Vec<Option<String>>,
    pending_folder: Option<String>,
    h3_text: Option<String>,
    anchor: Option<Anchor>,
    /// Closed anchor waiting to see whether a `<DD>` follows.
    pending: Option<CandidateRecord>,
    dd_text: Option<String>,
    done: bool,
}

impl Entries<'_> {
    fn push_text(&mut self, text: &str) {
        if let Some(buf) = self.h3_text.as_mut() {
            buf.push_str(text);
        } else if let Some(a) = self.anchor.as_mut() {
            a.text.push_str(text);
        } else if let Some(buf) = self.dd_text.as_mut() {
            buf.push_str(text);
        }
    }

    fn flush(&mut self) -> Option<CandidateRecord> {
        let mut candidate = self.pending.take()?;
        if let Some(dd) = self.dd_text.take() {
            let description = collapse_whitespace(&decode_entities(&dd));
            if !description.is_empty() {
                candidate.description = Some(description);
            }
        }
        Some(candidate)
    }

    fn folder_tags(&self) -> Vec<String> {
        self.folders.iter().flatten().cloned().collect()
    }

    fn close_anchor(&mut self) -> Option<CandidateRecord> {
        let anchor = self.anchor.take()?;
        let href = anchor.attrs.get("href").map(|h| h.trim()).unwrap_or("");
        if href.is_empty() {
            warn!(file = self.source_file, "skipping anchor without HREF");
            return None;
        }

        let title = collapse_whitespace(&decode_entities(&anchor.text));
        let mut tags = self.folder_tags();
        if let Some(extra) = anchor.attrs.get("tags") {
            tags.extend(split_tags(extra));
        }

        let mut candidate = CandidateRecord::new(href, Source::HtmlExport)
            .with_title(title)
            .with_tags(tags)
            .with_source_file(self.source_file);
        if let Some(ts) = anchor.attrs.get("add_date").and_then(|d| parse_timestamp(d)) {
            candidate.created_at = Some(ts);
        }
        let icon = anchor
            .attrs
            .get("icon")
            .or_else(|| anchor.attrs.get("icon_uri"))
            .map(|i| i.trim())
            .filter(|i| !i.is_empty());
        if let Some(icon) = icon {
            candidate.favicon_url = Some(icon.to_string());
        }
        Some(candidate)
    }

    /// Handle one tag. Returns a finished candidate if the tag completed one.
    fn on_tag(&mut self, closing: bool, name: &str, attrs: &str) -> Option<CandidateRecord> {
        match (closing, name) {
            (false, "h3") => {
                self.h3_text = Some(String::new());
                None
            }
            (true, "h3") => {
                let name = self
                    .h3_text
                    .take()
                    .map(|t| collapse_whitespace(&decode_entities(&t)))
                    .unwrap_or_default();
                self.pending_folder = Some(name);
                None
            }
            (false, "dl") => {
                let out = self.flush();
                let folder = self
                    .pending_folder
                    .take()
                    .filter(|f| !f.is_empty() && !CONTAINER_FOLDERS.contains(&f.to_lowercase().as_str()));
                self.folders.push(folder);
                out
            }
            (true, "dl") => {
                let out = self.flush();
                self.folders.pop();
                out
            }
            (false, "dt") => {
                // A folder heading with no `<DL>` of its own owns nothing.
                self.pending_folder = None;
                self.flush()
            }
            (false, "a") => {
                self.pending_folder = None;
                let out = self.flush();
                self.anchor = Some(Anchor {
                    attrs: parse_attributes(attrs),
                    text: String::new(),
                });
                out
            }
            (true, "a") => {
                self.pending = self.close_anchor();
                None
            }
            (false, "dd") => {
                if self.pending.is_some() {
                    self.dd_text = Some(String::new());
                }
                None
            }
            _ => None,
        }
    }
}

impl Iterator for Entries<'_> {
    type Item = CandidateRecord;

    fn next(&mut self) -> Option<CandidateRecord> {
        if self.done {
            return None;
        }
        while let Some(caps) = self.tags.next() {
            let Some(whole) = caps.get(0) else { continue };
            let text = &self.blob[self.pos..whole.start()];
            self.pos = whole.end();
            if !text.is_empty() {
                self.push_text(text);
            }
            // Comments match without a tag name.
            let Some(name) = caps.get(2) else { continue };
            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            let name = name.as_str().to_ascii_lowercase();
            let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            if let Some(candidate) = self.on_tag(closing, &name, attrs) {
                return Some(candidate);
            }
        }

        self.done = true;
        let tail = &self.blob[self.pos..];
        self.push_text(tail);
        if self.anchor.is_some() {
            // Opening an anchor flushes, so nothing is pending here.
            warn!(file = self.source_file, "unterminated anchor at end of file");
            self.pending = self.close_anchor();
        }
        self.flush()
    }
}
