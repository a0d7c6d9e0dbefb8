//! In-memory [`Store`] implementation for testing and embedding.
//!
//! All state lives in one `State` value behind a `std::sync::RwLock`.
//! [`Store::apply`] first replays a write set against a lightweight view of
//! record ids and URL hashes. Only when every guard and operation would
//! succeed is the state mutated in place, so write sets are all-or-nothing
//! like a SQLite transaction.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::merge::{clean_tags, sort_tags};
use crate::models::{BookmarkRecord, Status, Tag, DEFAULT_TAG_COLOR};

use super::{Applied, Guard, RecordRef, Store, WriteOp, WriteSet};

#[derive(Debug, Default)]
struct State {
    /// Stored with an empty `tags` vec; tags are materialized on read.
    records: BTreeMap<i64, BookmarkRecord>,
    by_hash: HashMap<String, i64>,
    tags: BTreeMap<i64, Tag>,
    /// `(record_id, tag_id)`
    links: BTreeSet<(i64, i64)>,
    next_record_id: i64,
    next_tag_id: i64,
}

impl State {
    fn materialize(&self, record: &BookmarkRecord) -> BookmarkRecord {
        let mut out = record.clone();
        out.tags = self
            .links
            .range((record.id, i64::MIN)..=(record.id, i64::MAX))
            .filter_map(|(_, tid)| self.tags.get(tid).map(|t| t.name.clone()))
            .collect();
        sort_tags(&mut out.tags);
        out
    }

    fn sorted_by_domain<'a>(&self, records: impl Iterator<Item = &'a BookmarkRecord>) -> Vec<BookmarkRecord> {
        let mut out: Vec<BookmarkRecord> = records.map(|r| self.materialize(r)).collect();
        out.sort_by(|a, b| a.domain.cmp(&b.domain).then(a.id.cmp(&b.id)));
        out
    }

    fn find_tag(&self, name: &str) -> Option<i64> {
        let lower = name.to_lowercase();
        self.tags
            .values()
            .find(|t| t.name.to_lowercase() == lower)
            .map(|t| t.id)
    }

    fn tag_id_for(&mut self, name: &str) -> i64 {
        if let Some(id) = self.find_tag(name) {
            return id;
        }
        self.next_tag_id += 1;
        let id = self.next_tag_id;
        self.tags.insert(
            id,
            Tag {
                id,
                name: name.to_string(),
                color: DEFAULT_TAG_COLOR.to_string(),
                usage_count: 0,
            },
        );
        id
    }

    fn count_links(&self, tag_id: i64) -> i64 {
        self.links.iter().filter(|(_, t)| *t == tag_id).count() as i64
    }

    fn recount(&mut self, tag_ids: &BTreeSet<i64>) {
        for tid in tag_ids {
            let count = self.count_links(*tid);
            if let Some(tag) = self.tags.get_mut(tid) {
                tag.usage_count = count;
            }
        }
    }

    fn unlink(&mut self, record_id: i64, touched_tags: &mut BTreeSet<i64>) -> bool {
        let removed: Vec<(i64, i64)> = self
            .links
            .range((record_id, i64::MIN)..=(record_id, i64::MAX))
            .copied()
            .collect();
        for link in &removed {
            self.links.remove(link);
            touched_tags.insert(link.1);
        }
        !removed.is_empty()
    }

    fn check_guard(&self, guard: &Guard) -> Result<(), StoreError> {
        match guard {
            Guard::Absent { url_hash } => {
                if let Some(id) = self.by_hash.get(url_hash) {
                    return Err(StoreError::Conflict(format!(
                        "record {} already holds hash {}",
                        id, url_hash
                    )));
                }
            }
            Guard::Version { id, revision } => match self.records.get(id) {
                None => return Err(StoreError::Conflict(format!("record {} no longer exists", id))),
                Some(r) if r.revision != *revision => {
                    return Err(StoreError::Conflict(format!(
                        "record {} changed (revision {} != {})",
                        id, r.revision, revision
                    )))
                }
                Some(_) => {}
            },
        }
        Ok(())
    }

    /// Fail exactly where [`State::apply`] would, without touching anything.
    fn validate(&self, writes: &WriteSet) -> Result<(), StoreError> {
        for guard in &writes.guards {
            self.check_guard(guard)?;
        }

        let mut next_id = self.next_record_id;
        let mut created: Option<i64> = None;
        let mut born: HashMap<i64, &str> = HashMap::new();
        let mut gone: HashSet<i64> = HashSet::new();
        let mut hashes_added: HashSet<&str> = HashSet::new();
        let mut hashes_removed: HashSet<&str> = HashSet::new();

        let live = |id: i64, born: &HashMap<i64, &str>, gone: &HashSet<i64>| {
            (self.records.contains_key(&id) || born.contains_key(&id)) && !gone.contains(&id)
        };

        for op in &writes.ops {
            match op {
                WriteOp::Create(new) => {
                    let hash = new.url_hash.as_str();
                    let taken = hashes_added.contains(hash)
                        || (self.by_hash.contains_key(hash) && !hashes_removed.contains(hash));
                    if taken {
                        return Err(StoreError::Conflict(format!("hash {} already stored", hash)));
                    }
                    next_id += 1;
                    born.insert(next_id, hash);
                    hashes_added.insert(hash);
                    created = Some(next_id);
                }
                WriteOp::Update { id, .. } | WriteOp::UnlinkAll { id } => {
                    if !live(*id, &born, &gone) {
                        return Err(StoreError::NotFound(*id));
                    }
                }
                WriteOp::LinkTags { record, .. } => {
                    let id = match record {
                        RecordRef::Id(id) => *id,
                        RecordRef::Created => created.ok_or_else(|| {
                            StoreError::Backend("tag link refers to a record not created in this write set".into())
                        })?,
                    };
                    if !live(id, &born, &gone) {
                        return Err(StoreError::NotFound(id));
                    }
                }
                WriteOp::Delete { id } => {
                    if !live(*id, &born, &gone) {
                        return Err(StoreError::NotFound(*id));
                    }
                    let hash = born
                        .get(id)
                        .copied()
                        .or_else(|| self.records.get(id).map(|r| r.url_hash.as_str()));
                    if let Some(hash) = hash {
                        if !hashes_added.remove(hash) {
                            hashes_removed.insert(hash);
                        }
                    }
                    gone.insert(*id);
                }
            }
        }
        Ok(())
    }

    /// Mutates in place; callers run [`State::validate`] first.
    fn apply(&mut self, writes: WriteSet) -> Result<Applied, StoreError> {
        let now = Utc::now();
        let mut applied = Applied::default();
        let mut touched_records = BTreeSet::new();
        let mut touched_tags = BTreeSet::new();

        for op in writes.ops {
            match op {
                WriteOp::Create(new) => {
                    if let Some(id) = self.by_hash.get(&new.url_hash) {
                        return Err(StoreError::Conflict(format!(
                            "record {} already holds hash {}",
                            id, new.url_hash
                        )));
                    }
                    self.next_record_id += 1;
                    let id = self.next_record_id;
                    self.by_hash.insert(new.url_hash.clone(), id);
                    self.records.insert(
                        id,
                        BookmarkRecord {
                            id,
                            url_hash: new.url_hash,
                            url: new.url,
                            title: new.title,
                            description: new.description,
                            domain: new.domain,
                            source: new.source,
                            source_file: new.source_file,
                            created_at: new.created_at,
                            updated_at: new.imported_at,
                            imported_at: new.imported_at,
                            status: Status::Active,
                            favicon_url: new.favicon_url,
                            read_status: false,
                            favorite: false,
                            tags: Vec::new(),
                            revision: 0,
                        },
                    );
                    applied.created_id = Some(id);
                }
                WriteOp::Update { id, patch } => {
                    let record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
                    if !patch.is_empty() {
                        patch.apply_to(record);
                        touched_records.insert(id);
                    }
                }
                WriteOp::LinkTags { record, names } => {
                    let id = match record {
                        RecordRef::Id(id) => id,
                        RecordRef::Created => applied.created_id.ok_or_else(|| {
                            StoreError::Backend("tag link refers to a record not created in this write set".into())
                        })?,
                    };
                    if !self.records.contains_key(&id) {
                        return Err(StoreError::NotFound(id));
                    }
                    for name in clean_tags(&names) {
                        let tid = self.tag_id_for(&name);
                        if self.links.insert((id, tid)) {
                            applied.linked += 1;
                            touched_tags.insert(tid);
                            touched_records.insert(id);
                        }
                    }
                }
                WriteOp::UnlinkAll { id } => {
                    if !self.records.contains_key(&id) {
                        return Err(StoreError::NotFound(id));
                    }
                    if self.unlink(id, &mut touched_tags) {
                        touched_records.insert(id);
                    }
                }
                WriteOp::Delete { id } => {
                    let record = self.records.remove(&id).ok_or(StoreError::NotFound(id))?;
                    self.by_hash.remove(&record.url_hash);
                    self.unlink(id, &mut touched_tags);
                    touched_records.remove(&id);
                    applied.deleted += 1;
                }
            }
        }

        for id in touched_records {
            if Some(id) == applied.created_id {
                continue;
            }
            if let Some(record) = self.records.get_mut(&id) {
                record.updated_at = now;
                record.revision += 1;
                applied.updated += 1;
            }
        }
        self.recount(&touched_tags);

        Ok(applied)
    }
}

/// In-memory store.
pub struct InMemoryStore {
    state: RwLock<State>,
    offline: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            offline: AtomicBool::new(false),
        }
    }

    /// While offline every operation fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.online()?;
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.online()?;
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }

    async fn find_by_hash(&self, url_hash: &str) -> Result<Option<BookmarkRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .by_hash
            .get(url_hash)
            .and_then(|id| state.records.get(id))
            .map(|r| state.materialize(r)))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<BookmarkRecord>, StoreError> {
        let state = self.read()?;
        Ok(state.records.get(&id).map(|r| state.materialize(r)))
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Vec<BookmarkRecord>, StoreError> {
        let state = self.read()?;
        let domain = domain.to_lowercase();
        Ok(state
            .records
            .values()
            .filter(|r| r.domain == domain)
            .map(|r| state.materialize(r))
            .collect())
    }

    async fn find_by_tag(&self, tag: &str) -> Result<Vec<BookmarkRecord>, StoreError> {
        let state = self.read()?;
        let Some(tid) = state.find_tag(tag) else {
            return Ok(Vec::new());
        };
        Ok(state
            .records
            .values()
            .filter(|r| state.links.contains(&(r.id, tid)))
            .map(|r| state.materialize(r))
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<BookmarkRecord>, StoreError> {
        let state = self.read()?;
        Ok(state.sorted_by_domain(state.records.values().filter(|r| r.status == Status::Active)))
    }

    async fn list_all(&self) -> Result<Vec<BookmarkRecord>, StoreError> {
        let state = self.read()?;
        Ok(state.sorted_by_domain(state.records.values()))
    }

    async fn apply(&self, writes: WriteSet) -> Result<Applied, StoreError> {
        let mut state = self.write()?;
        state.validate(&writes)?;
        state.apply(writes)
    }

    async fn upsert_tag(&self, name: &str) -> Result<Tag, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Backend("tag name is empty".into()));
        }
        let mut state = self.write()?;
        let id = state.tag_id_for(name);
        state
            .tags
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::Backend(format!("tag {} vanished", id)))
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, StoreError> {
        let state = self.read()?;
        let mut tags: Vec<Tag> = state.tags.values().cloned().collect();
        tags.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(tags)
    }

    async fn recount_tags(&self) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let ids: Vec<i64> = state.tags.keys().copied().collect();
        let mut fixed = 0;
        for id in ids {
            let count = state.count_links(id);
            if let Some(tag) = state.tags.get_mut(&id) {
                if tag.usage_count != count {
                    tag.usage_count = count;
                    fixed += 1;
                }
            }
        }
        Ok(fixed)
    }

    async fn prune_tags(&self) -> Result<u64, StoreError> {
        let mut state = self.write()?;
        let used: BTreeSet<i64> = state.links.iter().map(|(_, t)| *t).collect();
        let before = state.tags.len();
        state.tags.retain(|id, _| used.contains(id));
        Ok((before - state.tags.len()) as u64)
    }
}
