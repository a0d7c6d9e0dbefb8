//! Storage abstraction for linkshelf.
//!
//! The [`Store`] trait is the only way the reconciler and the
//! deduplication engine touch persisted state. Two backends exist: the
//! SQLite store in the application crate and [`memory::InMemoryStore`].
//!
//! Multi-step changes are submitted as a [`WriteSet`]: a list of guards
//! that must hold against the current state plus a list of operations.
//! A store executes a write set atomically. If any guard fails nothing is
//! written and [`StoreError::Conflict`] is returned, so the caller can
//! re-read and re-plan.
//!
//! Every operation that adds or removes tag associations recomputes
//! `usage_count` for the tags it touched from the association table.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{BookmarkRecord, NewRecord, RecordPatch, Tag};

/// Precondition checked before a [`WriteSet`] runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// No record with this hash exists.
    Absent { url_hash: String },
    /// Record `id` exists and is still at `revision`.
    Version { id: i64, revision: i64 },
}

/// Names the record a [`WriteOp`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRef {
    /// The record created earlier in the same write set.
    Created,
    Id(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create(NewRecord),
    /// No-op for an empty patch. Otherwise bumps `updated_at` and `revision`.
    Update { id: i64, patch: RecordPatch },
    /// Associate tags, creating missing tags. Names match case-insensitively.
    LinkTags { record: RecordRef, names: Vec<String> },
    /// Remove every association of a record. Tags themselves remain.
    UnlinkAll { id: i64 },
    /// Remove a record and its associations.
    Delete { id: i64 },
}

/// An atomic unit of guarded writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSet {
    pub guards: Vec<Guard>,
    pub ops: Vec<WriteOp>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn op(mut self, op: WriteOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// What a [`WriteSet`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub created_id: Option<i64>,
    /// Associations newly added.
    pub linked: u64,
    /// Existing records whose fields or tag set changed.
    pub updated: u64,
    pub deleted: u64,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ping`](Store::ping) | Check the backend is reachable |
/// | [`find_by_hash`](Store::find_by_hash) | Look up a record by URL hash |
/// | [`find_by_domain`](Store::find_by_domain) | All records for a host |
/// | [`list_active`](Store::list_active) | Snapshot of active records |
/// | [`apply`](Store::apply) | Execute a guarded [`WriteSet`] atomically |
/// | [`recount_tags`](Store::recount_tags) | Recompute every `usage_count` |
/// | [`prune_tags`](Store::prune_tags) | Delete tags with no associations |
///
/// `create`, `update`, `delete`, `link_tag` and `unlink_all` are
/// single-operation write sets.
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_by_hash(&self, url_hash: &str) -> Result<Option<BookmarkRecord>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<BookmarkRecord>, StoreError>;

    /// Records for a domain, ascending by id.
    async fn find_by_domain(&self, domain: &str) -> Result<Vec<BookmarkRecord>, StoreError>;

    /// Records carrying a tag (case-insensitive), ascending by id.
    async fn find_by_tag(&self, tag: &str) -> Result<Vec<BookmarkRecord>, StoreError>;

    /// Active records ordered by `(domain, id)`.
    async fn list_active(&self) -> Result<Vec<BookmarkRecord>, StoreError>;

    /// All records ordered by `(domain, id)`.
    async fn list_all(&self) -> Result<Vec<BookmarkRecord>, StoreError>;

    /// Execute `writes` atomically. Fails with [`StoreError::Conflict`] if a
    /// guard does not hold, leaving the store unchanged.
    async fn apply(&self, writes: WriteSet) -> Result<Applied, StoreError>;

    /// Find a tag by case-insensitive name or create it.
    async fn upsert_tag(&self, name: &str) -> Result<Tag, StoreError>;

    /// Tags ordered by name, case-insensitively.
    async fn list_tags(&self) -> Result<Vec<Tag>, StoreError>;

    /// Recompute every tag's `usage_count`. Returns how many were wrong.
    async fn recount_tags(&self) -> Result<u64, StoreError>;

    /// Delete tags with zero associations. Returns how many were removed.
    async fn prune_tags(&self) -> Result<u64, StoreError>;

    async fn create(&self, record: NewRecord) -> Result<i64, StoreError> {
        let writes = WriteSet::new()
            .guard(Guard::Absent {
                url_hash: record.url_hash.clone(),
            })
            .op(WriteOp::Create(record));
        self.apply(writes)
            .await?
            .created_id
            .ok_or_else(|| StoreError::Backend("create returned no id".into()))
    }

    async fn update(&self, id: i64, patch: RecordPatch) -> Result<(), StoreError> {
        self.apply(WriteSet::new().op(WriteOp::Update { id, patch }))
            .await
            .map(|_| ())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.apply(WriteSet::new().op(WriteOp::Delete { id }))
            .await
            .map(|_| ())
    }

    /// Returns `true` if the association is new.
    async fn link_tag(&self, id: i64, name: &str) -> Result<bool, StoreError> {
        let applied = self
            .apply(WriteSet::new().op(WriteOp::LinkTags {
                record: RecordRef::Id(id),
                names: vec![name.to_string()],
            }))
            .await?;
        Ok(applied.linked > 0)
    }

    async fn unlink_all(&self, id: i64) -> Result<(), StoreError> {
        self.apply(WriteSet::new().op(WriteOp::UnlinkAll { id }))
            .await
            .map(|_| ())
    }
}
