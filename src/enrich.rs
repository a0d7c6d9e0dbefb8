//! HTTP metadata enrichment and link validation.
//!
//! [`HttpMetadataFetcher`] is the production [`MetadataFetcher`]: it GETs a
//! page and scrapes `<title>`, the description meta tags, and the favicon
//! link out of the markup. The same client backs `shelf enrich` (fill
//! empty fields on stored records) and `shelf validate` (mark records whose
//! URL no longer answers as `broken`).

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use linkshelf_core::enrich::{fill_missing, MetadataFetcher, PageMetadata};
use linkshelf_core::error::{EnrichmentError, StoreError};
use linkshelf_core::merge::is_present;
use linkshelf_core::models::{BookmarkRecord, RecordPatch, Status};
use linkshelf_core::store::{Guard, Store, WriteOp, WriteSet};

use crate::config::{Config, EnrichmentConfig};
use crate::db;
use crate::parsers::html::{decode_entities, parse_attributes};
use crate::sqlite_store::SqliteStore;

/// Pages larger than this are cut before scraping.
const MAX_BODY_BYTES: usize = 512 * 1024;

pub struct HttpMetadataFetcher {
    client: reqwest::Client,
}

impl HttpMetadataFetcher {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Check that `url` still answers with a success status. Tries `HEAD`
    /// first and falls back to `GET` for servers that reject it.
    pub async fn check_reachable(&self, url: &str, timeout: Duration) -> Result<(), EnrichmentError> {
        if let Ok(resp) = self.client.head(url).timeout(timeout).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(EnrichmentError::Status(resp.status().as_u16()))
        }
    }
}

fn request_error(e: reqwest::Error, timeout: Duration) -> EnrichmentError {
    if e.is_timeout() {
        EnrichmentError::Timeout(timeout)
    } else {
        EnrichmentError::Request(e.to_string())
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<PageMetadata, EnrichmentError> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status(status.as_u16()));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.to_ascii_lowercase().contains("html") {
            return Err(EnrichmentError::NotHtml(content_type));
        }

        let final_url = resp.url().to_string();
        let bytes = read_capped(resp, MAX_BODY_BYTES)
            .await
            .map_err(|e| request_error(e, timeout))?;
        let body = String::from_utf8_lossy(&bytes);
        Ok(extract_metadata(&body, &final_url))
    }
}

/// Read at most `limit` bytes of the body. The rest is never downloaded.
async fn read_capped(mut resp: reqwest::Response, limit: usize) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = Vec::new();
    while body.len() < limit {
        let Some(chunk) = resp.chunk().await? else {
            break;
        };
        let take = chunk.len().min(limit - body.len());
        body.extend_from_slice(&chunk[..take]);
    }
    Ok(body)
}

struct Patterns {
    title: Regex,
    meta: Regex,
    link: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| Patterns {
        title: Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").expect("title regex"),
        meta: Regex::new(r"(?is)<meta\b([^>]*)>").expect("meta regex"),
        link: Regex::new(r"(?is)<link\b([^>]*)>").expect("link regex"),
    })
}

fn clean_text(raw: &str) -> String {
    decode_entities(raw).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scrape title, description, and favicon from page markup. Relative icon
/// hrefs are resolved against `base`.
pub fn extract_metadata(html: &str, base: &str) -> PageMetadata {
    let p = patterns();
    let mut meta = PageMetadata::default();

    if let Some(t) = p.title.captures(html).and_then(|c| c.get(1)) {
        meta.title = clean_text(t.as_str());
    }

    let mut og_title = String::new();
    let mut og_description = String::new();
    for caps in p.meta.captures_iter(html) {
        let attrs = parse_attributes(caps.get(1).map_or("", |m| m.as_str()));
        let key = attrs
            .get("name")
            .or_else(|| attrs.get("property"))
            .map(|k| k.to_ascii_lowercase())
            .unwrap_or_default();
        let content = attrs.get("content").map(|c| clean_text(c)).unwrap_or_default();
        match key.as_str() {
            "description" if meta.description.is_empty() => meta.description = content,
            "og:description" if og_description.is_empty() => og_description = content,
            "og:title" if og_title.is_empty() => og_title = content,
            _ => {}
        }
    }
    if !is_present(&meta.description) {
        meta.description = og_description;
    }
    if !is_present(&meta.title) {
        meta.title = og_title;
    }

    let base = Url::parse(base).ok();
    let icon_href = p.link.captures_iter(html).find_map(|caps| {
        let attrs = parse_attributes(caps.get(1).map_or("", |m| m.as_str()));
        let rel = attrs.get("rel")?.to_ascii_lowercase();
        let is_icon = rel
            .split_whitespace()
            .any(|r| r == "icon" || r == "apple-touch-icon");
        if is_icon {
            attrs.get("href").filter(|h| !h.trim().is_empty()).cloned()
        } else {
            None
        }
    });
    meta.favicon_url = match (&base, icon_href) {
        (Some(base), Some(href)) => base.join(href.trim()).map(|u| u.to_string()).unwrap_or(href),
        (None, Some(href)) => href,
        (Some(base), None) => base.join("/favicon.ico").map(|u| u.to_string()).unwrap_or_default(),
        (None, None) => String::new(),
    };

    meta
}

fn lacks_metadata(record: &BookmarkRecord) -> bool {
    !is_present(&record.title) || !is_present(&record.description) || !is_present(&record.favicon_url)
}

/// Fill empty fields of one record from fetched metadata. Returns `false`
/// when the page offered nothing new.
async fn enrich_record(
    store: &dyn Store,
    fetcher: &dyn MetadataFetcher,
    record: &BookmarkRecord,
    timeout: Duration,
) -> Result<bool, EnrichmentOutcome> {
    let meta = fetcher
        .fetch(&record.url, timeout)
        .await
        .map_err(EnrichmentOutcome::Fetch)?;

    let (mut title, mut description, mut favicon) = (
        record.title.clone(),
        record.description.clone(),
        record.favicon_url.clone(),
    );
    if !fill_missing(&mut title, &mut description, &mut favicon, &meta) {
        return Ok(false);
    }
    let patch = RecordPatch {
        title: (title != record.title).then_some(title),
        description: (description != record.description).then_some(description),
        favicon_url: (favicon != record.favicon_url).then_some(favicon),
        ..Default::default()
    };
    let writes = WriteSet::new()
        .guard(Guard::Version {
            id: record.id,
            revision: record.revision,
        })
        .op(WriteOp::Update { id: record.id, patch });
    store.apply(writes).await.map_err(EnrichmentOutcome::Store)?;
    Ok(true)
}

enum EnrichmentOutcome {
    Fetch(EnrichmentError),
    Store(StoreError),
}

/// `shelf enrich`: back-fill title, description, and favicon on active
/// records that lack them.
pub async fn run_enrich(config: &Config, limit: Option<usize>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    store.ping().await?;
    let fetcher = HttpMetadataFetcher::new(&config.enrichment)?;
    let timeout = config.enrichment.timeout();

    let records: Vec<BookmarkRecord> = store
        .list_active()
        .await?
        .into_iter()
        .filter(lacks_metadata)
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    info!(candidates = records.len(), "enrichment started");
    let (mut enriched, mut unchanged, mut failed) = (0u64, 0u64, 0u64);
    for record in &records {
        match enrich_record(&store, &fetcher, record, timeout).await {
            Ok(true) => enriched += 1,
            Ok(false) => unchanged += 1,
            Err(EnrichmentOutcome::Fetch(e)) => {
                debug!(url = %record.url, error = %e, "metadata fetch failed");
                failed += 1;
            }
            Err(EnrichmentOutcome::Store(e)) => {
                warn!(id = record.id, error = %e, "could not store fetched metadata");
                failed += 1;
            }
        }
    }

    println!("Enrichment complete.");
    println!("  candidates: {}", records.len());
    println!("  enriched:   {}", enriched);
    println!("  unchanged:  {}", unchanged);
    println!("  failed:     {}", failed);

    pool.close().await;
    Ok(())
}

/// `shelf validate`: check every non-archived record. Failing URLs become
/// `broken`; broken URLs that answer again go back to `active`.
pub async fn run_validate(config: &Config, limit: Option<usize>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    store.ping().await?;
    let fetcher = HttpMetadataFetcher::new(&config.enrichment)?;
    let timeout = config.enrichment.timeout();

    let records: Vec<BookmarkRecord> = store
        .list_all()
        .await?
        .into_iter()
        .filter(|r| r.status != Status::Archived)
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    let (mut ok, mut broken, mut restored) = (0u64, 0u64, 0u64);
    for record in &records {
        let next = match fetcher.check_reachable(&record.url, timeout).await {
            Ok(()) => {
                ok += 1;
                Status::Active
            }
            Err(e) => {
                debug!(url = %record.url, error = %e, "reachability check failed");
                broken += 1;
                Status::Broken
            }
        };
        if next == record.status {
            continue;
        }
        if next == Status::Active {
            restored += 1;
        }
        let writes = WriteSet::new()
            .guard(Guard::Version {
                id: record.id,
                revision: record.revision,
            })
            .op(WriteOp::Update {
                id: record.id,
                patch: RecordPatch {
                    status: Some(next),
                    ..Default::default()
                },
            });
        if let Err(e) = store.apply(writes).await {
            warn!(id = record.id, error = %e, "could not update status");
        }
    }

    println!("Validation complete.");
    println!("  checked:  {}", records.len());
    println!("  ok:       {}", ok);
    println!("  broken:   {}", broken);
    println!("  restored: {}", restored);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <meta charset="utf-8">
  <title>
    Rust &amp; Cargo
  </title>
  <meta property="og:description" content="OG text">
  <meta name="description" content="The  Rust   book">
  <link rel="stylesheet" href="/style.css">
  <link rel="shortcut icon" href="/static/fav.png">
  <link rel="apple-touch-icon" href="/touch.png">
</head><body></body></html>"#;

    #[test]
    fn test_extract_metadata() {
        let meta = extract_metadata(PAGE, "https://doc.example.com/book/index.html");
        assert_eq!(meta.title, "Rust & Cargo");
        assert_eq!(meta.description, "The Rust book");
        assert_eq!(meta.favicon_url, "https://doc.example.com/static/fav.png");
    }

    #[test]
    fn test_extract_metadata_fallbacks() {
        let html = r#"<head><meta property="og:title" content="From OG"><meta property="og:description" content="OG desc"></head>"#;
        let meta = extract_metadata(html, "https://a.com/x/y");
        assert_eq!(meta.title, "From OG");
        assert_eq!(meta.description, "OG desc");
        assert_eq!(meta.favicon_url, "https://a.com/favicon.ico");
    }

    /// Serve one canned HTTP response per connection.
    async fn serve(status: &'static str, content_type: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    content_type,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/page", addr)
    }

    /// Serve a page whose body never ends.
    async fn serve_endless() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<title>Endless</title>";
                    if socket.write_all(head.as_bytes()).await.is_err() {
                        return;
                    }
                    let padding = vec![b' '; 64 * 1024];
                    while socket.write_all(&padding).await.is_ok() {}
                });
            }
        });
        format!("http://{}/page", addr)
    }

    fn fetcher() -> HttpMetadataFetcher {
        HttpMetadataFetcher::new(&EnrichmentConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let url = serve("200 OK", "text/html; charset=utf-8", PAGE).await;
        let meta = fetcher().fetch(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(meta.title, "Rust & Cargo");
        assert!(meta.favicon_url.ends_with("/static/fav.png"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_status_and_content_type() {
        let url = serve("404 Not Found", "text/html", "gone").await;
        assert!(matches!(
            fetcher().fetch(&url, Duration::from_secs(5)).await,
            Err(EnrichmentError::Status(404))
        ));

        let url = serve("200 OK", "application/pdf", "%PDF").await;
        assert!(matches!(
            fetcher().fetch(&url, Duration::from_secs(5)).await,
            Err(EnrichmentError::NotHtml(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_stops_reading_at_body_cap() {
        let url = serve_endless().await;
        let meta = fetcher().fetch(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(meta.title, "Endless");
    }

    #[tokio::test]
    async fn test_check_reachable() {
        let url = serve("200 OK", "text/plain", "ok").await;
        assert!(fetcher().check_reachable(&url, Duration::from_secs(5)).await.is_ok());

        let url = serve("500 Internal Server Error", "text/plain", "no").await;
        assert!(matches!(
            fetcher().check_reachable(&url, Duration::from_secs(5)).await,
            Err(EnrichmentError::Status(500))
        ));
    }
}
