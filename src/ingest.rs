//! Import pipeline orchestration.
//!
//! Coordinates `shelf import`: discover files → skip ones already imported
//! (by content hash) → parse → reconcile → record import history. Each
//! file is one reconciliation batch; a fatal store failure aborts the run.
//!
//! `shelf add` reuses the same reconciler for a single manual bookmark.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{info, warn};
use walkdir::WalkDir;

use linkshelf_core::enrich::MetadataFetcher;
use linkshelf_core::models::{CandidateRecord, ImportSummary, Source, Status};
use linkshelf_core::normalize::normalize_url;
use linkshelf_core::reconcile::{ReconcileOptions, Reconciler};
use linkshelf_core::similarity::most_similar;
use linkshelf_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::enrich::HttpMetadataFetcher;
use crate::parsers::{parser_for, split_tags, ImportKind};
use crate::progress::{ImportProgressEvent, ProgressMode};
use crate::sqlite_store::SqliteStore;

/// `shelf add` warns about stored records at least this similar.
const ADD_SIMILARITY_WARNING: f64 = 0.5;

/// A file selected for import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFile {
    pub path: PathBuf,
    /// Path relative to the scan root; recorded as `source_file`.
    pub relative: String,
    pub kind: ImportKind,
}

pub struct ImportOptions {
    pub only: Option<ImportKind>,
    pub path: Option<PathBuf>,
    pub force: bool,
    pub dry_run: bool,
    pub json: bool,
    pub progress: ProgressMode,
}

/// Per-file result, printed as JSON with `--json`.
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub file: String,
    pub kind: &'static str,
    /// Content unchanged since a previous import; nothing was reconciled.
    pub already_imported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ImportSummary>,
}

struct Matchers {
    html: GlobSet,
    yaml: GlobSet,
    feeds: GlobSet,
    exclude: GlobSet,
}

impl Matchers {
    fn new(config: &Config) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.import.exclude_globs.clone());
        Ok(Self {
            html: build_globset(&config.import.html_globs)?,
            yaml: build_globset(&config.import.yaml_globs)?,
            feeds: build_globset(&config.import.feed_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    fn kind_of(&self, relative: &str) -> Option<ImportKind> {
        if self.exclude.is_match(relative) {
            None
        } else if self.html.is_match(relative) {
            Some(ImportKind::Html)
        } else if self.yaml.is_match(relative) {
            Some(ImportKind::Yaml)
        } else if self.feeds.is_match(relative) {
            Some(ImportKind::Feeds)
        } else {
            None
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Kind of a file named explicitly with `--path` that no glob matched.
fn kind_by_extension(path: &Path) -> Option<ImportKind> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    match ext.as_str() {
        "html" | "htm" => Some(ImportKind::Html),
        "atom" | "xml" | "rss" => Some(ImportKind::Feeds),
        "md" | "yaml" | "yml" => Some(ImportKind::Yaml),
        _ => None,
    }
}

/// Find importable files under `root` (or the single file `root`), sorted
/// by relative path.
pub fn discover(config: &Config, root: &Path, only: Option<ImportKind>) -> Result<Vec<ImportFile>> {
    if !root.exists() {
        bail!("Import path does not exist: {}", root.display());
    }
    let matchers = Matchers::new(config)?;

    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent = root
            .parent()
            .and_then(|p| p.file_name())
            .map(|p| p.to_string_lossy().to_string());
        let in_parent = parent.map(|p| format!("{}/{}", p, name));
        let kind = in_parent
            .as_deref()
            .and_then(|p| matchers.kind_of(p))
            .or_else(|| matchers.kind_of(&name))
            .or_else(|| kind_by_extension(root));
        return Ok(match kind {
            Some(kind) if only.map_or(true, |o| o == kind) => vec![ImportFile {
                path: root.to_path_buf(),
                relative: in_parent.unwrap_or(name),
                kind,
            }],
            _ => Vec::new(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        let Some(kind) = matchers.kind_of(&rel_str) else {
            continue;
        };
        if only.is_some_and(|o| o != kind) {
            continue;
        }
        files.push(ImportFile {
            path: path.to_path_buf(),
            relative: rel_str,
            kind,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

pub fn file_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

async fn already_imported(pool: &SqlitePool, relative: &str, hash: &str) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT id FROM import_history WHERE file_path = ? AND file_hash = ?")
            .bind(relative)
            .bind(hash)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

async fn record_history(pool: &SqlitePool, file: &ImportFile, hash: &str, summary: &ImportSummary) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO import_history (file_path, file_hash, import_type, batch_id, processed_at,
                                    created, merged, unchanged, skipped, errored, errors_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(file_path, file_hash) DO UPDATE SET
            batch_id = excluded.batch_id,
            processed_at = excluded.processed_at,
            created = excluded.created,
            merged = excluded.merged,
            unchanged = excluded.unchanged,
            skipped = excluded.skipped,
            errored = excluded.errored,
            errors_json = excluded.errors_json
        "#,
    )
    .bind(&file.relative)
    .bind(hash)
    .bind(file.kind.as_str())
    .bind(&summary.batch_id)
    .bind(summary.finished_at.timestamp())
    .bind(summary.created as i64)
    .bind(summary.merged as i64)
    .bind(summary.unchanged as i64)
    .bind(summary.skipped as i64)
    .bind(summary.errored as i64)
    .bind(serde_json::to_string(&summary.errors)?)
    .execute(pool)
    .await?;
    Ok(())
}

fn reconcile_options(config: &Config, dry_run: bool) -> ReconcileOptions {
    ReconcileOptions {
        max_consecutive_store_failures: config.import.max_consecutive_store_failures,
        enrich_timeout: config.enrichment.timeout(),
        dry_run,
        ..Default::default()
    }
}

fn print_summary(summary: &ImportSummary, dry_run: bool) {
    let suffix = if dry_run { " (dry-run)" } else { "" };
    println!("import {} [{}]{}", summary.source_file, summary.source, suffix);
    println!("  created:   {}", summary.created);
    println!("  merged:    {} ({} unchanged)", summary.merged, summary.unchanged);
    println!("  skipped:   {}", summary.skipped);
    println!("  errored:   {}", summary.errored);
    for e in &summary.errors {
        println!("    {:?} {}: {}", e.kind, e.url, e.reason);
    }
}

/// `shelf import`.
pub async fn run_import(config: &Config, opts: ImportOptions) -> Result<()> {
    let root = opts.path.clone().unwrap_or_else(|| config.import.root.clone());
    let reporter = opts.progress.reporter();
    reporter.report(ImportProgressEvent::Discovering {
        root: root.display().to_string(),
    });
    let files = discover(config, &root, opts.only)?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let fetcher = if config.enrichment.enabled {
        Some(HttpMetadataFetcher::new(&config.enrichment)?)
    } else {
        None
    };
    let mut reconciler = Reconciler::new(&store).with_options(reconcile_options(config, opts.dry_run));
    if let Some(f) = fetcher.as_ref() {
        reconciler = reconciler.with_fetcher(f as &dyn MetadataFetcher);
    }

    info!(root = %root.display(), files = files.len(), "import started");
    let total = files.len() as u64;
    let mut reports = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        reporter.report(ImportProgressEvent::Importing {
            file: file.relative.clone(),
            n: i as u64 + 1,
            total,
        });

        let bytes = std::fs::read(&file.path)
            .with_context(|| format!("Failed to read {}", file.path.display()))?;
        let hash = file_hash(&bytes);
        if !opts.force && already_imported(&pool, &file.relative, &hash).await? {
            if !opts.json {
                println!("import {}: unchanged since last import, skipping", file.relative);
            }
            reports.push(FileReport {
                file: file.relative.clone(),
                kind: file.kind.as_str(),
                already_imported: true,
                summary: None,
            });
            continue;
        }

        let blob = String::from_utf8_lossy(&bytes).into_owned();
        let parser = parser_for(file.kind, &file.path, &file.relative, blob);
        let summary = reconciler
            .run_batch(parser.kind(), &file.relative, parser.candidates())
            .await
            .with_context(|| format!("Import aborted at {}", file.relative))?;

        if !opts.dry_run {
            record_history(&pool, file, &hash, &summary).await?;
        }
        if !opts.json {
            print_summary(&summary, opts.dry_run);
        }
        reports.push(FileReport {
            file: file.relative.clone(),
            kind: file.kind.as_str(),
            already_imported: false,
            summary: Some(summary),
        });
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        let summaries = reports.iter().filter_map(|r| r.summary.as_ref());
        let (created, merged, errored) = summaries.fold((0, 0, 0), |acc, s| {
            (acc.0 + s.created, acc.1 + s.merged, acc.2 + s.errored)
        });
        println!(
            "files: {}  created: {}  merged: {}  errored: {}",
            reports.len(),
            created,
            merged,
            errored
        );
        println!("ok");
    }

    pool.close().await;
    Ok(())
}

/// Fields for `shelf add`.
pub struct AddRequest {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
}

/// `shelf add`: reconcile one manually entered bookmark.
pub async fn run_add(config: &Config, req: AddRequest) -> Result<()> {
    let normalized = normalize_url(&req.url).with_context(|| format!("Invalid url: {}", req.url))?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    store.ping().await?;

    let mut candidate = CandidateRecord::new(req.url.clone(), Source::Manual)
        .with_tags(req.tags.as_deref().map(split_tags).unwrap_or_default());
    candidate.title = req.title;
    candidate.description = req.description;

    if store.find_by_hash(&normalized.hash).await?.is_none() {
        let neighbours: Vec<_> = store
            .find_by_domain(&normalized.domain)
            .await?
            .into_iter()
            .filter(|r| r.status == Status::Active)
            .collect();
        for (record, score) in most_similar(&candidate, &neighbours, ADD_SIMILARITY_WARNING)
            .into_iter()
            .take(3)
        {
            warn!(id = record.id, url = %record.url, score, "similar bookmark already stored");
            println!("  similar: #{} {} ({:.2})", record.id, record.url, score);
        }
    }

    let fetcher = if config.enrichment.enabled {
        Some(HttpMetadataFetcher::new(&config.enrichment)?)
    } else {
        None
    };
    let mut reconciler = Reconciler::new(&store).with_options(reconcile_options(config, false));
    if let Some(f) = fetcher.as_ref() {
        reconciler = reconciler.with_fetcher(f as &dyn MetadataFetcher);
    }
    let summary = reconciler.run_batch(Source::Manual, "", [candidate]).await?;

    if let Some(e) = summary.errors.first() {
        bail!("Could not add {}: {}", e.url, e.reason);
    }
    let record = store
        .find_by_hash(&normalized.hash)
        .await?
        .context("Bookmark missing after add")?;
    if summary.created > 0 {
        println!("Added #{} {}", record.id, record.url);
    } else if summary.unchanged > 0 {
        println!("Already stored as #{} {}", record.id, record.url);
    } else {
        println!("Merged into #{} {}", record.id, record.url);
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use std::fs;

    fn config(root: &Path) -> Config {
        Config {
            db: DbConfig {
                path: root.join("shelf.sqlite"),
            },
            import: Default::default(),
            dedup: Default::default(),
            enrichment: Default::default(),
        }
    }

    #[test]
    fn test_discover_classifies_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("--db-feeds")).unwrap();
        fs::create_dir_all(root.join("notes/.git")).unwrap();
        fs::write(root.join("bookmarks.html"), "<DL></DL>").unwrap();
        fs::write(root.join("notes/+++.md"), "url: https://a.com/").unwrap();
        fs::write(root.join("notes/readme.md"), "ignored").unwrap();
        fs::write(root.join("notes/.git/config.html"), "ignored").unwrap();
        fs::write(root.join("--db-feeds/rust.md"), "url: https://a.com/").unwrap();
        fs::write(root.join("blog.atom"), "<feed/>").unwrap();

        let cfg = config(root);
        let files = discover(&cfg, root, None).unwrap();
        let found: Vec<(&str, ImportKind)> = files.iter().map(|f| (f.relative.as_str(), f.kind)).collect();
        assert_eq!(
            found,
            vec![
                ("--db-feeds/rust.md", ImportKind::Feeds),
                ("blog.atom", ImportKind::Feeds),
                ("bookmarks.html", ImportKind::Html),
                ("notes/+++.md", ImportKind::Yaml),
            ]
        );

        let only_html = discover(&cfg, root, Some(ImportKind::Html)).unwrap();
        assert_eq!(only_html.len(), 1);
    }

    #[test]
    fn test_discover_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let feeds = dir.path().join("--db-feeds");
        fs::create_dir_all(&feeds).unwrap();
        let file = feeds.join("machine-learning.md");
        fs::write(&file, "url: https://a.com/").unwrap();

        let files = discover(&config(dir.path()), &file, None).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].kind, ImportKind::Feeds);
        assert_eq!(files[0].relative, "--db-feeds/machine-learning.md");
    }

    #[test]
    fn test_discover_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&config(dir.path()), &dir.path().join("nope"), None).is_err());
    }

    #[test]
    fn test_file_hash_stable() {
        assert_eq!(file_hash(b"abc"), file_hash(b"abc"));
        assert_ne!(file_hash(b"abc"), file_hash(b"abd"));
        assert_eq!(file_hash(b"").len(), 64);
    }
}
