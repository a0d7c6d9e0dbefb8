//! `shelf dedup`: find (and optionally merge) near-duplicate bookmarks.
//!
//! Report mode prints clusters and changes nothing. `--auto` folds each
//! cluster into its canonical record and archives (or with `--delete`,
//! removes) the rest. Ctrl-C stops the pass after the current domain
//! bucket; the printed `last_bucket` can be passed to `--resume-after`.

use anyhow::{bail, Result};
use tracing::{info, warn};

use linkshelf_core::dedup::{run_dedup, CancelToken, DedupMode, DedupOptions, DedupReport, OnMerge};
use linkshelf_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub struct DedupArgs {
    pub threshold: Option<f64>,
    pub auto: bool,
    pub delete: bool,
    pub resume_after: Option<String>,
    pub include_inactive: bool,
    pub json: bool,
}

pub fn build_options(config: &Config, args: &DedupArgs, cancel: CancelToken) -> Result<DedupOptions> {
    let threshold = args.threshold.unwrap_or(config.dedup.threshold);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("--threshold must be in [0.0, 1.0], got {}", threshold);
    }
    Ok(DedupOptions {
        threshold,
        mode: if args.auto {
            DedupMode::AutoMerge
        } else {
            DedupMode::Report
        },
        on_merge: if args.delete {
            OnMerge::Delete
        } else {
            config.dedup.on_merge
        },
        include_inactive: args.include_inactive,
        resume_after: args.resume_after.clone(),
        cancel,
    })
}

fn print_report(report: &DedupReport, options: &DedupOptions) {
    if report.clusters.is_empty() {
        println!("No duplicate clusters found (threshold {:.2}).", options.threshold);
    }
    for cluster in &report.clusters {
        println!(
            "cluster {}  {}  canonical #{}  members {:?}",
            cluster.cluster_id, cluster.domain, cluster.canonical_id, cluster.member_ids
        );
        for pair in &cluster.pair_scores {
            println!("    #{} ~ #{}  {:.3}", pair.a, pair.b, pair.score);
        }
    }
    println!();
    println!("  clusters:          {}", report.clusters.len());
    if options.mode == DedupMode::AutoMerge {
        println!("  merged clusters:   {}", report.merged_clusters);
        println!("  archived:          {}", report.archived);
        println!("  deleted:           {}", report.deleted);
    }
    println!("  completed buckets: {}", report.completed_buckets);
    for e in &report.errors {
        println!("  error: cluster {} ({}): {}", e.cluster_id, e.domain, e.reason);
    }
    if report.cancelled {
        match resume_point(report, options) {
            Some(domain) => println!("  cancelled; resume with --resume-after {}", domain),
            None => println!("  cancelled before any bucket completed; rerun to start over"),
        }
    }
}

/// Where a cancelled pass should pick up: the last bucket it committed, or
/// the checkpoint it was itself resumed from.
fn resume_point<'a>(report: &'a DedupReport, options: &'a DedupOptions) -> Option<&'a str> {
    report
        .last_bucket
        .as_deref()
        .or(options.resume_after.as_deref())
}

pub async fn run_dedup_cmd(config: &Config, args: DedupArgs) -> Result<()> {
    let cancel = CancelToken::new();
    let options = build_options(config, &args, cancel.clone())?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    store.ping().await?;

    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current bucket");
            cancel.cancel();
        }
    });

    info!(threshold = options.threshold, mode = ?options.mode, "dedup started");
    let report = run_dedup(&store, &options).await;
    watcher.abort();
    let report = report?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &options);
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;

    fn args() -> DedupArgs {
        DedupArgs {
            threshold: None,
            auto: false,
            delete: false,
            resume_after: None,
            include_inactive: false,
            json: false,
        }
    }

    fn config() -> Config {
        Config {
            db: DbConfig {
                path: "x.sqlite".into(),
            },
            import: Default::default(),
            dedup: Default::default(),
            enrichment: Default::default(),
        }
    }

    #[test]
    fn test_options_from_config() {
        let opts = build_options(&config(), &args(), CancelToken::new()).unwrap();
        assert_eq!(opts.threshold, 0.85);
        assert_eq!(opts.mode, DedupMode::Report);
        assert_eq!(opts.on_merge, OnMerge::Archive);
    }

    #[test]
    fn test_flags_override_config() {
        let a = DedupArgs {
            threshold: Some(0.6),
            auto: true,
            delete: true,
            resume_after: Some("b.com".into()),
            ..args()
        };
        let opts = build_options(&config(), &a, CancelToken::new()).unwrap();
        assert_eq!(opts.threshold, 0.6);
        assert_eq!(opts.mode, DedupMode::AutoMerge);
        assert_eq!(opts.on_merge, OnMerge::Delete);
        assert_eq!(opts.resume_after.as_deref(), Some("b.com"));
    }

    #[test]
    fn test_resume_point_keeps_checkpoint() {
        let resumed = DedupArgs {
            resume_after: Some("b.com".into()),
            ..args()
        };
        let opts = build_options(&config(), &resumed, CancelToken::new()).unwrap();
        let cancelled_early = DedupReport {
            cancelled: true,
            ..Default::default()
        };
        assert_eq!(resume_point(&cancelled_early, &opts), Some("b.com"));

        let progressed = DedupReport {
            cancelled: true,
            last_bucket: Some("c.com".into()),
            ..Default::default()
        };
        assert_eq!(resume_point(&progressed, &opts), Some("c.com"));

        let fresh = build_options(&config(), &args(), CancelToken::new()).unwrap();
        assert_eq!(resume_point(&cancelled_early, &fresh), None);
    }

    #[test]
    fn test_threshold_out_of_range() {
        let a = DedupArgs {
            threshold: Some(1.2),
            ..args()
        };
        assert!(build_options(&config(), &a, CancelToken::new()).is_err());
    }
}
