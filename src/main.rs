//! # linkshelf CLI (`shelf`)
//!
//! The `shelf` binary is the primary interface for linkshelf. It provides
//! commands for database initialization, importing and reconciling
//! bookmarks, deduplication, metadata enrichment, and inspection.
//!
//! ## Usage
//!
//! ```bash
//! shelf --config ./config/shelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelf init` | Create the SQLite database and run schema migrations |
//! | `shelf import` | Import bookmark files found under the import root |
//! | `shelf add --url <url>` | Add (or merge) a single bookmark |
//! | `shelf dedup` | Report or merge near-duplicate bookmarks |
//! | `shelf enrich` | Fill missing titles, descriptions, and favicons |
//! | `shelf validate` | Mark bookmarks whose URL no longer answers as broken |
//! | `shelf tags list\|recount\|prune` | Tag maintenance |
//! | `shelf list` | List bookmarks |
//! | `shelf export` | Dump bookmarks as JSON or YAML |
//! | `shelf stats` | Database overview |
//!
//! Logs go to stderr (`RUST_LOG` or `-v`); results go to stdout.

mod config;
mod db;
mod dedup_cmd;
mod enrich;
mod export;
mod ingest;
mod list;
mod migrate;
mod parsers;
mod progress;
mod sqlite_store;
mod stats;
mod tags;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::parsers::ImportKind;
use crate::progress::ProgressMode;

/// linkshelf: a local-first bookmark manager.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/shelf.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "shelf",
    about = "linkshelf: import, reconcile, and deduplicate bookmarks",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shelf.toml")]
    config: PathBuf,

    /// Verbose logging (debug level) unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceArg {
    All,
    Html,
    Yaml,
    Feeds,
}

impl SourceArg {
    fn kind(self) -> Option<ImportKind> {
        match self {
            SourceArg::All => None,
            SourceArg::Html => Some(ImportKind::Html),
            SourceArg::Yaml => Some(ImportKind::Yaml),
            SourceArg::Feeds => Some(ImportKind::Feeds),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent; running it multiple times is safe.
    Init,

    /// Import bookmark files.
    ///
    /// Walks `[import].root` (or `--path`), parses every file matched by the
    /// configured globs, and reconciles the entries into the store. Files
    /// whose content was already imported are skipped unless `--force`.
    Import {
        /// Which file group to import.
        #[arg(long, value_enum, default_value = "all")]
        source: SourceArg,

        /// Import this file or directory instead of the configured root.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Re-import files even if their content hash was seen before.
        #[arg(long)]
        force: bool,

        /// Parse and plan every entry but write nothing.
        #[arg(long)]
        dry_run: bool,

        /// Print per-file summaries as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. `auto` shows it when stderr is a terminal.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Add a single bookmark, merging into an existing one with the same URL.
    Add {
        #[arg(long)]
        url: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Comma-separated tags.
        #[arg(long)]
        tags: Option<String>,
    },

    /// Find near-duplicate bookmarks within each domain.
    Dedup {
        /// Similarity threshold in [0, 1]. Defaults to `[dedup].threshold`.
        #[arg(long)]
        threshold: Option<f64>,

        /// Merge each cluster into its canonical record.
        #[arg(long)]
        auto: bool,

        /// With `--auto`, delete merged duplicates instead of archiving them.
        #[arg(long)]
        delete: bool,

        /// Skip domains up to and including this one.
        #[arg(long)]
        resume_after: Option<String>,

        /// Also consider archived and broken bookmarks.
        #[arg(long)]
        include_inactive: bool,

        #[arg(long)]
        json: bool,
    },

    /// Fetch page metadata for bookmarks missing a title, description, or favicon.
    Enrich {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Check bookmark URLs and mark unreachable ones as broken.
    Validate {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Tag maintenance.
    Tags {
        #[command(subcommand)]
        action: TagsAction,
    },

    /// List bookmarks.
    List {
        #[arg(long)]
        domain: Option<String>,

        #[arg(long)]
        tag: Option<String>,

        /// `active` (default), `archived`, `broken`, or `all`.
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Export all bookmarks and tags.
    Export {
        /// `json` or `yaml`.
        #[arg(long, default_value = "json")]
        format: String,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show database statistics.
    Stats,
}

/// Tag subcommands.
#[derive(Subcommand)]
enum TagsAction {
    /// List tags with their usage counts.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Recompute every usage count from the associations.
    Recount,
    /// Delete tags no bookmark uses.
    Prune,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            source,
            path,
            force,
            dry_run,
            json,
            progress,
        } => {
            let progress = match progress {
                ProgressArg::Auto => ProgressMode::default_for_tty(),
                ProgressArg::Off => ProgressMode::Off,
                ProgressArg::Human => ProgressMode::Human,
                ProgressArg::Json => ProgressMode::Json,
            };
            ingest::run_import(
                &cfg,
                ingest::ImportOptions {
                    only: source.kind(),
                    path,
                    force,
                    dry_run,
                    json,
                    progress,
                },
            )
            .await?;
        }
        Commands::Add {
            url,
            title,
            description,
            tags,
        } => {
            ingest::run_add(
                &cfg,
                ingest::AddRequest {
                    url,
                    title,
                    description,
                    tags,
                },
            )
            .await?;
        }
        Commands::Dedup {
            threshold,
            auto,
            delete,
            resume_after,
            include_inactive,
            json,
        } => {
            dedup_cmd::run_dedup_cmd(
                &cfg,
                dedup_cmd::DedupArgs {
                    threshold,
                    auto,
                    delete,
                    resume_after,
                    include_inactive,
                    json,
                },
            )
            .await?;
        }
        Commands::Enrich { limit } => {
            enrich::run_enrich(&cfg, limit).await?;
        }
        Commands::Validate { limit } => {
            enrich::run_validate(&cfg, limit).await?;
        }
        Commands::Tags { action } => match action {
            TagsAction::List { json } => tags::run_tags_list(&cfg, json).await?,
            TagsAction::Recount => tags::run_tags_recount(&cfg).await?,
            TagsAction::Prune => tags::run_tags_prune(&cfg).await?,
        },
        Commands::List {
            domain,
            tag,
            status,
            limit,
            json,
        } => {
            list::run_list(
                &cfg,
                list::ListFilter {
                    domain,
                    tag,
                    status,
                    limit,
                    json,
                },
            )
            .await?;
        }
        Commands::Export { format, output } => {
            export::run_export(&cfg, &format, output.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
