//! SQLite-backed [`Store`] implementation.
//!
//! Every [`Store::apply`] call runs in a single transaction: guards are
//! checked first, then the operations, then `revision` / `updated_at` are
//! bumped for touched records and `usage_count` is recomputed for touched
//! tags. Any error rolls the transaction back.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::query::Query;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};

use linkshelf_core::error::StoreError;
use linkshelf_core::merge::{clean_tags, sort_tags};
use linkshelf_core::models::{BookmarkRecord, Source, Status, Tag, DEFAULT_TAG_COLOR};
use linkshelf_core::store::{Applied, Guard, RecordRef, Store, WriteOp, WriteSet};

const RECORD_COLUMNS: &str = "id, url_hash, url, title, description, domain, source, source_file, \
     created_at, updated_at, imported_at, status, favicon_url, read_status, favorite, revision";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Map sqlx errors onto the store taxonomy. Connection-level failures are
/// `Unavailable`. Unique violations and lock contention with another writer
/// are `Conflict`, so callers re-read and re-plan.
fn map_sqlx(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(db.message().to_string()),
        sqlx::Error::Database(db) if is_lock_contention(db.as_ref()) => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

/// `SQLITE_BUSY` (5) or `SQLITE_LOCKED` (6), including extended codes such
/// as `SQLITE_BUSY_SNAPSHOT` (517). sqlx reports the extended code.
fn is_lock_contention(db: &dyn sqlx::error::DatabaseError) -> bool {
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn row_to_record(row: &SqliteRow) -> Result<BookmarkRecord, StoreError> {
    let source: String = row.try_get("source").map_err(map_sqlx)?;
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    Ok(BookmarkRecord {
        id: row.try_get("id").map_err(map_sqlx)?,
        url_hash: row.try_get("url_hash").map_err(map_sqlx)?,
        url: row.try_get("url").map_err(map_sqlx)?,
        title: row.try_get("title").map_err(map_sqlx)?,
        description: row.try_get("description").map_err(map_sqlx)?,
        domain: row.try_get("domain").map_err(map_sqlx)?,
        source: Source::from_str(&source).map_err(StoreError::Backend)?,
        source_file: row.try_get("source_file").map_err(map_sqlx)?,
        created_at: ts(row.try_get("created_at").map_err(map_sqlx)?),
        updated_at: ts(row.try_get("updated_at").map_err(map_sqlx)?),
        imported_at: ts(row.try_get("imported_at").map_err(map_sqlx)?),
        status: Status::from_str(&status).map_err(StoreError::Backend)?,
        favicon_url: row.try_get("favicon_url").map_err(map_sqlx)?,
        read_status: row.try_get("read_status").map_err(map_sqlx)?,
        favorite: row.try_get("favorite").map_err(map_sqlx)?,
        tags: Vec::new(),
        revision: row.try_get("revision").map_err(map_sqlx)?,
    })
}

/// Row selection shared by the record queries and their tag lookups.
enum Filter<'a> {
    Hash(&'a str),
    Id(i64),
    Domain(String),
    TagKey(String),
    Active,
    All,
}

impl Filter<'_> {
    fn clause(&self) -> &'static str {
        match self {
            Filter::Hash(_) => "url_hash = ?",
            Filter::Id(_) => "id = ?",
            Filter::Domain(_) => "domain = ?",
            Filter::TagKey(_) => {
                "id IN (SELECT bt.bookmark_id FROM bookmark_tags bt \
                 JOIN tags t ON t.id = bt.tag_id WHERE t.name_key = ?)"
            }
            Filter::Active => "status = 'active'",
            Filter::All => "1 = 1",
        }
    }

    fn order(&self) -> &'static str {
        match self {
            Filter::Active | Filter::All => "domain, id",
            _ => "id",
        }
    }

    fn bind<'q>(&'q self, query: Query<'q, Sqlite, SqliteArguments<'q>>) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match self {
            Filter::Hash(h) => query.bind(*h),
            Filter::Id(id) => query.bind(*id),
            Filter::Domain(d) | Filter::TagKey(d) => query.bind(d.as_str()),
            Filter::Active | Filter::All => query,
        }
    }
}

impl SqliteStore {
    async fn fetch(&self, filter: Filter<'_>) -> Result<Vec<BookmarkRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM bookmarks WHERE {} ORDER BY {}",
            RECORD_COLUMNS,
            filter.clause(),
            filter.order()
        );
        let rows = filter
            .bind(sqlx::query(&sql))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let mut records = rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()?;
        if records.is_empty() {
            return Ok(records);
        }

        let tag_sql = format!(
            "SELECT bt.bookmark_id, t.name FROM bookmark_tags bt \
             JOIN tags t ON t.id = bt.tag_id \
             WHERE bt.bookmark_id IN (SELECT id FROM bookmarks WHERE {})",
            filter.clause()
        );
        let tag_rows = filter
            .bind(sqlx::query(&tag_sql))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let mut by_record: HashMap<i64, Vec<String>> = HashMap::new();
        for row in &tag_rows {
            let id: i64 = row.try_get(0).map_err(map_sqlx)?;
            let name: String = row.try_get(1).map_err(map_sqlx)?;
            by_record.entry(id).or_default().push(name);
        }
        for record in &mut records {
            if let Some(mut tags) = by_record.remove(&record.id) {
                sort_tags(&mut tags);
                record.tags = tags;
            }
        }
        Ok(records)
    }

    async fn fetch_one(&self, filter: Filter<'_>) -> Result<Option<BookmarkRecord>, StoreError> {
        Ok(self.fetch(filter).await?.into_iter().next())
    }
}

async fn record_exists(conn: &mut SqliteConnection, id: i64) -> Result<bool, StoreError> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM bookmarks WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(map_sqlx)?;
    Ok(found.is_some())
}

async fn require_record(conn: &mut SqliteConnection, id: i64) -> Result<(), StoreError> {
    if record_exists(conn, id).await? {
        Ok(())
    } else {
        Err(StoreError::NotFound(id))
    }
}

async fn check_guard(conn: &mut SqliteConnection, guard: &Guard) -> Result<(), StoreError> {
    match guard {
        Guard::Absent { url_hash } => {
            let holder: Option<i64> = sqlx::query_scalar("SELECT id FROM bookmarks WHERE url_hash = ?")
                .bind(url_hash)
                .fetch_optional(conn)
                .await
                .map_err(map_sqlx)?;
            if let Some(id) = holder {
                return Err(StoreError::Conflict(format!(
                    "record {} already holds hash {}",
                    id, url_hash
                )));
            }
        }
        Guard::Version { id, revision } => {
            let current: Option<i64> = sqlx::query_scalar("SELECT revision FROM bookmarks WHERE id = ?")
                .bind(id)
                .fetch_optional(conn)
                .await
                .map_err(map_sqlx)?;
            match current {
                None => return Err(StoreError::Conflict(format!("record {} no longer exists", id))),
                Some(r) if r != *revision => {
                    return Err(StoreError::Conflict(format!(
                        "record {} changed (revision {} != {})",
                        id, r, revision
                    )))
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

async fn tag_id_for(conn: &mut SqliteConnection, name: &str, now: i64) -> Result<i64, StoreError> {
    let key = name.to_lowercase();
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE name_key = ?")
        .bind(&key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let result = sqlx::query("INSERT INTO tags (name, name_key, color, usage_count, created_at) VALUES (?, ?, ?, 0, ?)")
        .bind(name)
        .bind(&key)
        .bind(DEFAULT_TAG_COLOR)
        .bind(now)
        .execute(conn)
        .await
        .map_err(map_sqlx)?;
    Ok(result.last_insert_rowid())
}

async fn linked_tag_ids(conn: &mut SqliteConnection, id: i64) -> Result<Vec<i64>, StoreError> {
    sqlx::query_scalar("SELECT tag_id FROM bookmark_tags WHERE bookmark_id = ?")
        .bind(id)
        .fetch_all(conn)
        .await
        .map_err(map_sqlx)
}

fn row_to_tag(row: &SqliteRow) -> Result<Tag, StoreError> {
    Ok(Tag {
        id: row.try_get("id").map_err(map_sqlx)?,
        name: row.try_get("name").map_err(map_sqlx)?,
        color: row.try_get("color").map_err(map_sqlx)?,
        usage_count: row.try_get("usage_count").map_err(map_sqlx)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1 FROM bookmarks LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{} (did you run `shelf init`?)", e)))?;
        Ok(())
    }

    async fn find_by_hash(&self, url_hash: &str) -> Result<Option<BookmarkRecord>, StoreError> {
        self.fetch_one(Filter::Hash(url_hash)).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<BookmarkRecord>, StoreError> {
        self.fetch_one(Filter::Id(id)).await
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Vec<BookmarkRecord>, StoreError> {
        self.fetch(Filter::Domain(domain.to_lowercase())).await
    }

    async fn find_by_tag(&self, tag: &str) -> Result<Vec<BookmarkRecord>, StoreError> {
        self.fetch(Filter::TagKey(tag.trim().to_lowercase())).await
    }

    async fn list_active(&self) -> Result<Vec<BookmarkRecord>, StoreError> {
        self.fetch(Filter::Active).await
    }

    async fn list_all(&self) -> Result<Vec<BookmarkRecord>, StoreError> {
        self.fetch(Filter::All).await
    }

    async fn apply(&self, writes: WriteSet) -> Result<Applied, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        for guard in &writes.guards {
            check_guard(&mut tx, guard).await?;
        }

        let now = Utc::now().timestamp();
        let mut applied = Applied::default();
        let mut touched_records = BTreeSet::new();
        let mut touched_tags = BTreeSet::new();

        for op in writes.ops {
            match op {
                WriteOp::Create(new) => {
                    check_guard(
                        &mut tx,
                        &Guard::Absent {
                            url_hash: new.url_hash.clone(),
                        },
                    )
                    .await?;
                    let result = sqlx::query(
                        r#"
                        INSERT INTO bookmarks (url_hash, url, title, description, domain, source,
                                               source_file, created_at, updated_at, imported_at,
                                               status, favicon_url, read_status, favorite, revision)
                        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, 0, 0, 0)
                        "#,
                    )
                    .bind(&new.url_hash)
                    .bind(&new.url)
                    .bind(&new.title)
                    .bind(&new.description)
                    .bind(&new.domain)
                    .bind(new.source.as_str())
                    .bind(&new.source_file)
                    .bind(new.created_at.timestamp())
                    .bind(new.imported_at.timestamp())
                    .bind(new.imported_at.timestamp())
                    .bind(&new.favicon_url)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                    applied.created_id = Some(result.last_insert_rowid());
                }
                WriteOp::Update { id, patch } => {
                    require_record(&mut tx, id).await?;
                    if patch.is_empty() {
                        continue;
                    }
                    sqlx::query(
                        r#"
                        UPDATE bookmarks SET
                            title = COALESCE(?, title),
                            description = COALESCE(?, description),
                            favicon_url = COALESCE(?, favicon_url),
                            source_file = COALESCE(?, source_file),
                            created_at = COALESCE(?, created_at),
                            status = COALESCE(?, status),
                            read_status = COALESCE(?, read_status),
                            favorite = COALESCE(?, favorite)
                        WHERE id = ?
                        "#,
                    )
                    .bind(patch.title)
                    .bind(patch.description)
                    .bind(patch.favicon_url)
                    .bind(patch.source_file)
                    .bind(patch.created_at.map(|t| t.timestamp()))
                    .bind(patch.status.map(|s| s.as_str()))
                    .bind(patch.read_status)
                    .bind(patch.favorite)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx)?;
                    touched_records.insert(id);
                }
                WriteOp::LinkTags { record, names } => {
                    let id = match record {
                        RecordRef::Id(id) => id,
                        RecordRef::Created => applied.created_id.ok_or_else(|| {
                            StoreError::Backend("tag link refers to a record not created in this write set".into())
                        })?,
                    };
                    require_record(&mut tx, id).await?;
                    for name in clean_tags(&names) {
                        let tid = tag_id_for(&mut tx, &name, now).await?;
                        let result = sqlx::query(
                            "INSERT OR IGNORE INTO bookmark_tags (bookmark_id, tag_id, created_at) VALUES (?, ?, ?)",
                        )
                        .bind(id)
                        .bind(tid)
                        .bind(now)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx)?;
                        if result.rows_affected() > 0 {
                            applied.linked += 1;
                            touched_tags.insert(tid);
                            touched_records.insert(id);
                        }
                    }
                }
                WriteOp::UnlinkAll { id } => {
                    require_record(&mut tx, id).await?;
                    let tag_ids = linked_tag_ids(&mut tx, id).await?;
                    if tag_ids.is_empty() {
                        continue;
                    }
                    sqlx::query("DELETE FROM bookmark_tags WHERE bookmark_id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx)?;
                    touched_tags.extend(tag_ids);
                    touched_records.insert(id);
                }
                WriteOp::Delete { id } => {
                    require_record(&mut tx, id).await?;
                    touched_tags.extend(linked_tag_ids(&mut tx, id).await?);
                    sqlx::query("DELETE FROM bookmark_tags WHERE bookmark_id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx)?;
                    sqlx::query("DELETE FROM bookmarks WHERE id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx)?;
                    touched_records.remove(&id);
                    applied.deleted += 1;
                }
            }
        }

        for id in touched_records {
            if Some(id) == applied.created_id {
                continue;
            }
            let result = sqlx::query("UPDATE bookmarks SET updated_at = ?, revision = revision + 1 WHERE id = ?")
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            applied.updated += result.rows_affected();
        }

        for tid in touched_tags {
            sqlx::query(
                "UPDATE tags SET usage_count = (SELECT COUNT(*) FROM bookmark_tags WHERE tag_id = tags.id) WHERE id = ?",
            )
            .bind(tid)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(applied)
    }

    async fn upsert_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Backend("tag name is empty".into()));
        }
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        let id = tag_id_for(&mut conn, name, Utc::now().timestamp()).await?;
        let row = sqlx::query("SELECT id, name, color, usage_count FROM tags WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx)?;
        row_to_tag(&row)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, StoreError> {
        let rows = sqlx::query("SELECT id, name, color, usage_count FROM tags ORDER BY name_key")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_tag).collect()
    }

    async fn recount_tags(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tags SET usage_count = (SELECT COUNT(*) FROM bookmark_tags WHERE tag_id = tags.id)
            WHERE usage_count != (SELECT COUNT(*) FROM bookmark_tags WHERE tag_id = tags.id)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn prune_tags(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM tags WHERE id NOT IN (SELECT DISTINCT tag_id FROM bookmark_tags)")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}
