//! Export every stored bookmark as JSON or YAML.
//!
//! The output is a flat list of records with their tag names, suitable for
//! backups or feeding other tools.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::Path;

use linkshelf_core::models::{BookmarkRecord, Tag};
use linkshelf_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Serialize)]
struct ExportData {
    exported_at: chrono::DateTime<chrono::Utc>,
    bookmarks: Vec<BookmarkRecord>,
    tags: Vec<Tag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            other => Err(format!("unknown export format '{}' (json, yaml)", other)),
        }
    }
}

fn render(data: &ExportData, format: ExportFormat) -> Result<String> {
    Ok(match format {
        ExportFormat::Json => serde_json::to_string_pretty(data)?,
        ExportFormat::Yaml => serde_yaml::to_string(data)?,
    })
}

/// Export bookmarks and tags.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, format: &str, output: Option<&Path>) -> Result<()> {
    let format: ExportFormat = match format.parse() {
        Ok(f) => f,
        Err(e) => bail!(e),
    };

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    store.ping().await?;

    let data = ExportData {
        exported_at: chrono::Utc::now(),
        bookmarks: store.list_all().await?,
        tags: store.list_tags().await?,
    };
    let text = render(&data, format)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &text)?;
            eprintln!(
                "Exported {} bookmarks, {} tags to {}",
                data.bookmarks.len(),
                data.tags.len(),
                path.display()
            );
        }
        None => {
            println!("{}", text);
        }
    }

    pool.close().await;
    Ok(())
}
