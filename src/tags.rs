//! `shelf tags`: list tags and maintain their usage counts.

use anyhow::Result;

use linkshelf_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub async fn run_tags_list(config: &Config, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    store.ping().await?;

    let tags = store.list_tags().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
    } else if tags.is_empty() {
        println!("No tags.");
    } else {
        println!("{:<32} {:>8}  {}", "TAG", "USES", "COLOR");
        println!("{}", "-".repeat(52));
        for tag in &tags {
            println!("{:<32} {:>8}  {}", tag.name, tag.usage_count, tag.color);
        }
    }

    pool.close().await;
    Ok(())
}

/// Recompute every usage count from the association table.
pub async fn run_tags_recount(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let fixed = store.recount_tags().await?;
    println!("Recounted tags: {} corrected.", fixed);
    pool.close().await;
    Ok(())
}

/// Delete tags no bookmark uses.
pub async fn run_tags_prune(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let pruned = store.prune_tags().await?;
    println!("Pruned {} unused tag(s).", pruned);
    pool.close().await;
    Ok(())
}
