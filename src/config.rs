//! TOML configuration for the `shelf` CLI.
//!
//! Only `[db]` is required. Every other section falls back to defaults so a
//! minimal config is two lines long. See `config/shelf.example.toml`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use linkshelf_core::dedup::{OnMerge, DEFAULT_THRESHOLD};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Directory scanned by `shelf import`.
    #[serde(default = "default_import_root")]
    pub root: PathBuf,
    #[serde(default = "default_html_globs")]
    pub html_globs: Vec<String>,
    #[serde(default = "default_yaml_globs")]
    pub yaml_globs: Vec<String>,
    #[serde(default = "default_feed_globs")]
    pub feed_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_consecutive_store_failures")]
    pub max_consecutive_store_failures: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            root: default_import_root(),
            html_globs: default_html_globs(),
            yaml_globs: default_yaml_globs(),
            feed_globs: default_feed_globs(),
            exclude_globs: Vec::new(),
            max_consecutive_store_failures: default_max_consecutive_store_failures(),
        }
    }
}

fn default_import_root() -> PathBuf {
    PathBuf::from("./data/ingest")
}
fn default_html_globs() -> Vec<String> {
    vec!["**/*.html".to_string(), "**/*.htm".to_string()]
}
fn default_yaml_globs() -> Vec<String> {
    vec!["**/+++*.md".to_string()]
}
fn default_feed_globs() -> Vec<String> {
    vec![
        "--db-feeds/*.md".to_string(),
        "**/*.atom".to_string(),
        "**/*.xml".to_string(),
    ]
}
fn default_max_consecutive_store_failures() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub on_merge: OnMerge,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            on_merge: OnMerge::Archive,
        }
    }
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}
fn default_user_agent() -> String {
    format!("linkshelf/{}", env!("CARGO_PKG_VERSION"))
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if !(0.0..=1.0).contains(&config.dedup.threshold) {
        anyhow::bail!("dedup.threshold must be in [0.0, 1.0]");
    }

    if config.import.max_consecutive_store_failures == 0 {
        anyhow::bail!("import.max_consecutive_store_failures must be >= 1");
    }

    if config.enrichment.timeout_secs == 0 {
        anyhow::bail!("enrichment.timeout_secs must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config("[db]\npath = \"/tmp/shelf.sqlite\"\n");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.dedup.threshold, 0.85);
        assert_eq!(cfg.dedup.on_merge, OnMerge::Archive);
        assert_eq!(cfg.import.max_consecutive_store_failures, 5);
        assert!(!cfg.enrichment.enabled);
        assert_eq!(cfg.enrichment.timeout(), Duration::from_secs(10));
        assert!(cfg.import.feed_globs.contains(&"--db-feeds/*.md".to_string()));
    }

    #[test]
    fn test_on_merge_parses_delete() {
        let file = write_config("[db]\npath = \"x.sqlite\"\n\n[dedup]\non_merge = \"delete\"\n");
        assert_eq!(load_config(file.path()).unwrap().dedup.on_merge, OnMerge::Delete);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let file = write_config("[db]\npath = \"x.sqlite\"\n\n[dedup]\nthreshold = 1.5\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("dedup.threshold"));
    }

    #[test]
    fn test_missing_db_section_rejected() {
        let file = write_config("[dedup]\nthreshold = 0.9\n");
        assert!(load_config(file.path()).is_err());
    }
}
