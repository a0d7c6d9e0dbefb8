//! `shelf list`: print stored bookmarks, filtered by domain, tag, or status.

use anyhow::{bail, Result};

use linkshelf_core::models::{BookmarkRecord, Status};
use linkshelf_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

pub struct ListFilter {
    pub domain: Option<String>,
    pub tag: Option<String>,
    /// A status name, or `all`. Defaults to `active`.
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub json: bool,
}

fn parse_status(raw: Option<&str>) -> Result<Option<Status>> {
    match raw {
        None => Ok(Some(Status::Active)),
        Some("all") => Ok(None),
        Some(s) => match s.parse() {
            Ok(status) => Ok(Some(status)),
            Err(e) => bail!("{} (or 'all')", e),
        },
    }
}

async fn select(store: &dyn Store, filter: &ListFilter) -> Result<Vec<BookmarkRecord>> {
    let status = parse_status(filter.status.as_deref())?;
    let mut records = match (&filter.domain, &filter.tag) {
        (Some(domain), _) => store.find_by_domain(domain).await?,
        (None, Some(tag)) => store.find_by_tag(tag).await?,
        (None, None) => store.list_all().await?,
    };
    if let (Some(_), Some(tag)) = (&filter.domain, &filter.tag) {
        let tag = tag.to_lowercase();
        records.retain(|r| r.tags.iter().any(|t| t.to_lowercase() == tag));
    }
    if let Some(status) = status {
        records.retain(|r| r.status == status);
    }
    if let Some(limit) = filter.limit {
        records.truncate(limit);
    }
    Ok(records)
}

pub async fn run_list(config: &Config, filter: ListFilter) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    store.ping().await?;

    let records = select(&store, &filter).await?;
    if filter.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No bookmarks found.");
    } else {
        for r in &records {
            let title = if r.title.is_empty() { "(untitled)" } else { r.title.as_str() };
            println!("#{:<6} {:<8} {}", r.id, r.status.as_str(), r.url);
            println!("        {}", title);
            if !r.tags.is_empty() {
                println!("        tags: {}", r.tags.join(", "));
            }
        }
        println!();
        println!("{} bookmark(s)", records.len());
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use linkshelf_core::models::{NewRecord, RecordPatch, Source};
    use linkshelf_core::normalize::url_hash;
    use linkshelf_core::store::memory::InMemoryStore;

    async fn seed(store: &InMemoryStore, url: &str, domain: &str) -> i64 {
        let now = Utc::now();
        store
            .create(NewRecord {
                url_hash: url_hash(url),
                url: url.to_string(),
                title: String::new(),
                description: String::new(),
                domain: domain.to_string(),
                source: Source::Manual,
                source_file: String::new(),
                created_at: now,
                imported_at: now,
                favicon_url: String::new(),
            })
            .await
            .unwrap()
    }

    fn filter() -> ListFilter {
        ListFilter {
            domain: None,
            tag: None,
            status: None,
            limit: None,
            json: false,
        }
    }

    #[tokio::test]
    async fn test_filters_combine() {
        let store = InMemoryStore::new();
        let a = seed(&store, "https://a.com/1", "a.com").await;
        let b = seed(&store, "https://a.com/2", "a.com").await;
        let c = seed(&store, "https://b.com/1", "b.com").await;
        store.link_tag(a, "rust").await.unwrap();
        store.link_tag(c, "rust").await.unwrap();
        store
            .update(
                b,
                RecordPatch {
                    status: Some(Status::Archived),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let active = select(&store, &filter()).await.unwrap();
        assert_eq!(active.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, c]);

        let all = select(&store, &ListFilter { status: Some("all".into()), ..filter() }).await.unwrap();
        assert_eq!(all.len(), 3);

        let domain_and_tag = select(
            &store,
            &ListFilter {
                domain: Some("a.com".into()),
                tag: Some("RUST".into()),
                ..filter()
            },
        )
        .await
        .unwrap();
        assert_eq!(domain_and_tag.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a]);

        let limited = select(&store, &ListFilter { limit: Some(1), ..filter() }).await.unwrap();
        assert_eq!(limited.len(), 1);

        assert!(select(&store, &ListFilter { status: Some("gone".into()), ..filter() }).await.is_err());
    }
}
