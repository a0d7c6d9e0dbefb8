//! Database statistics overview.
//!
//! Provides a quick summary of what is stored: bookmark counts by status and
//! source, the busiest domains, tag count, and import history. Used by
//! `shelf stats`.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookmarks")
        .fetch_one(&pool)
        .await?;
    let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
        .fetch_one(&pool)
        .await?;
    let imports: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_history")
        .fetch_one(&pool)
        .await?;
    let last_import: Option<i64> = sqlx::query_scalar("SELECT MAX(processed_at) FROM import_history")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("linkshelf — Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Bookmarks:   {}", total);
    println!("  Tags:        {}", tags);
    println!(
        "  Imports:     {} (last: {})",
        imports,
        last_import.map(format_ts_relative).unwrap_or_else(|| "never".to_string())
    );

    let status_rows = sqlx::query("SELECT status, COUNT(*) AS n FROM bookmarks GROUP BY status ORDER BY status")
        .fetch_all(&pool)
        .await?;
    if !status_rows.is_empty() {
        println!();
        println!("  By status:");
        for row in &status_rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            println!("    {:<12} {:>8}", status, n);
        }
    }

    let source_rows = sqlx::query("SELECT source, COUNT(*) AS n FROM bookmarks GROUP BY source ORDER BY n DESC")
        .fetch_all(&pool)
        .await?;
    if !source_rows.is_empty() {
        println!();
        println!("  By source:");
        for row in &source_rows {
            let source: String = row.get("source");
            let n: i64 = row.get("n");
            println!("    {:<12} {:>8}", source, n);
        }
    }

    let domain_rows = sqlx::query(
        r#"
        SELECT domain, COUNT(*) AS n
        FROM bookmarks
        WHERE status = 'active'
        GROUP BY domain
        ORDER BY n DESC, domain
        LIMIT 10
        "#,
    )
    .fetch_all(&pool)
    .await?;
    if !domain_rows.is_empty() {
        println!();
        println!("  Top domains:");
        for row in &domain_rows {
            let domain: String = row.get("domain");
            let n: i64 = row.get("n");
            println!("    {:<32} {:>6}", domain, n);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }
}
