//! Import reconciliation.
//!
//! The [`Reconciler`] consumes an ordered candidate sequence and decides,
//! per candidate, whether to create a new record or merge into the one that
//! already holds the same URL hash. Each decision is planned against a
//! snapshot read from the store and submitted as one guarded
//! [`WriteSet`]. When a guard fails because another writer got there first,
//! the candidate is re-read and re-planned, up to
//! [`ReconcileOptions::max_attempts`] times.
//!
//! # Failure handling
//!
//! - invalid URLs and per-candidate store failures are recorded in the
//!   [`ImportSummary`] and processing continues
//! - a failed [`Store::ping`] before the batch, or
//!   [`ReconcileOptions::max_consecutive_store_failures`] store failures in
//!   a row, abort the batch with [`ReconcileError::StoreUnavailable`]
//! - enrichment failures are logged at debug level and otherwise ignored
//!
//! Enrichment runs only for candidates that create a record.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::enrich::{fill_missing, MetadataFetcher, PageMetadata};
use crate::error::{ReconcileError, StoreError};
use crate::merge::{clean_tags, is_present, merge_fields, FieldPatch};
use crate::models::{BookmarkRecord, CandidateRecord, ImportError, ImportSummary, NewRecord, Source};
use crate::normalize::{normalize_url, NormalizedUrl};
use crate::store::{Guard, RecordRef, Store, WriteOp, WriteSet};

/// Tuning knobs for a reconciliation batch.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Plan/apply attempts per candidate before giving up on conflicts.
    pub max_attempts: u32,
    pub max_consecutive_store_failures: u32,
    pub enrich_timeout: Duration,
    /// Candidates past this many are counted as skipped.
    pub limit: Option<usize>,
    /// Plan every candidate but write nothing.
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_consecutive_store_failures: 5,
            enrich_timeout: Duration::from_secs(10),
            limit: None,
            dry_run: false,
        }
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created(i64),
    /// Resolved to an existing record. `changed` is false when the candidate
    /// contributed nothing new.
    Merged { id: i64, changed: bool },
}

enum Plan {
    Create(WriteSet),
    Merge { id: i64, writes: Option<WriteSet> },
}

/// Reconciles candidates against a [`Store`].
pub struct Reconciler<'a> {
    store: &'a dyn Store,
    fetcher: Option<&'a dyn MetadataFetcher>,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            fetcher: None,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: &'a dyn MetadataFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Process every candidate once, in order, and summarize the batch.
    pub async fn run_batch<I>(
        &self,
        source: Source,
        source_file: &str,
        candidates: I,
    ) -> Result<ImportSummary, ReconcileError>
    where
        I: IntoIterator<Item = CandidateRecord>,
    {
        self.store
            .ping()
            .await
            .map_err(ReconcileError::StoreUnavailable)?;

        let mut summary = ImportSummary::new(source, source_file);
        info!(
            batch_id = %summary.batch_id,
            source = %source,
            file = source_file,
            dry_run = self.options.dry_run,
            "import batch started"
        );

        let mut consecutive_failures = 0u32;
        let mut dry_run_seen = HashSet::new();

        for (index, candidate) in candidates.into_iter().enumerate() {
            if self.options.limit.is_some_and(|limit| index >= limit) {
                summary.skipped += 1;
                continue;
            }

            let result = if self.options.dry_run {
                self.plan_only(&candidate, &mut dry_run_seen).await
            } else {
                self.reconcile_one(&candidate).await
            };

            match result {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    match outcome {
                        Outcome::Created(_) => summary.created += 1,
                        Outcome::Merged { changed, .. } => {
                            summary.merged += 1;
                            if !changed {
                                summary.unchanged += 1;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(url = %candidate.url, error = %err, "candidate rejected");
                    summary.errored += 1;
                    summary.errors.push(ImportError {
                        url: candidate.url.clone(),
                        kind: err.kind(),
                        reason: err.to_string(),
                    });
                    if let ReconcileError::StoreWriteFailure { source, .. } = err {
                        consecutive_failures += 1;
                        if consecutive_failures >= self.options.max_consecutive_store_failures {
                            warn!(
                                batch_id = %summary.batch_id,
                                failures = consecutive_failures,
                                "aborting batch after repeated store failures"
                            );
                            return Err(ReconcileError::StoreUnavailable(source));
                        }
                    }
                }
            }
        }

        summary.finished_at = Utc::now();
        info!(
            batch_id = %summary.batch_id,
            created = summary.created,
            merged = summary.merged,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            errored = summary.errored,
            "import batch finished"
        );
        Ok(summary)
    }

    /// Reconcile a single candidate against the live store.
    pub async fn reconcile_one(&self, candidate: &CandidateRecord) -> Result<Outcome, ReconcileError> {
        let normalized = normalize(candidate)?;
        let write_failure = |source: StoreError| ReconcileError::StoreWriteFailure {
            url: candidate.url.clone(),
            source,
        };

        let mut metadata: Option<Option<PageMetadata>> = None;
        let mut last_conflict = None;

        for attempt in 1..=self.options.max_attempts.max(1) {
            let existing = self
                .store
                .find_by_hash(&normalized.hash)
                .await
                .map_err(write_failure)?;

            let plan = self.plan(candidate, &normalized, existing, &mut metadata).await;
            let (writes, outcome_for) = match plan {
                Plan::Merge { id, writes: None } => return Ok(Outcome::Merged { id, changed: false }),
                Plan::Merge { id, writes: Some(w) } => (w, Some(id)),
                Plan::Create(w) => (w, None),
            };

            match self.store.apply(writes).await {
                Ok(applied) => {
                    return match outcome_for {
                        Some(id) => Ok(Outcome::Merged { id, changed: true }),
                        None => applied.created_id.map(Outcome::Created).ok_or_else(|| {
                            write_failure(StoreError::Backend("create returned no id".into()))
                        }),
                    };
                }
                Err(e) if e.is_conflict() => {
                    debug!(url = %normalized.url, attempt, error = %e, "write conflict, re-planning");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(write_failure(e)),
            }
        }

        Err(write_failure(last_conflict.unwrap_or_else(|| {
            StoreError::Conflict("retries exhausted".into())
        })))
    }

    /// Dry-run counterpart of [`reconcile_one`](Self::reconcile_one): reads,
    /// never writes. `seen` tracks hashes this batch would have created.
    async fn plan_only(
        &self,
        candidate: &CandidateRecord,
        seen: &mut HashSet<String>,
    ) -> Result<Outcome, ReconcileError> {
        let normalized = normalize(candidate)?;
        let existing = self
            .store
            .find_by_hash(&normalized.hash)
            .await
            .map_err(|source| ReconcileError::StoreWriteFailure {
                url: candidate.url.clone(),
                source,
            })?;
        match existing {
            Some(record) => {
                let changed = !merge_fields(&record, candidate).is_empty();
                Ok(Outcome::Merged { id: record.id, changed })
            }
            None => {
                if seen.insert(normalized.hash) {
                    Ok(Outcome::Created(0))
                } else {
                    Ok(Outcome::Merged { id: 0, changed: true })
                }
            }
        }
    }

    async fn plan(
        &self,
        candidate: &CandidateRecord,
        normalized: &NormalizedUrl,
        existing: Option<BookmarkRecord>,
        metadata: &mut Option<Option<PageMetadata>>,
    ) -> Plan {
        match existing {
            None => {
                let now = Utc::now();
                let mut record = NewRecord {
                    url_hash: normalized.hash.clone(),
                    url: normalized.url.clone(),
                    title: trimmed(candidate.title.as_deref()),
                    description: trimmed(candidate.description.as_deref()),
                    domain: normalized.domain.clone(),
                    source: candidate.source,
                    source_file: candidate.source_file.trim().to_string(),
                    created_at: candidate.created_at.unwrap_or(now),
                    imported_at: now,
                    favicon_url: trimmed(candidate.favicon_url.as_deref()),
                };
                if lacks_metadata(&record.title, &record.description, &record.favicon_url) {
                    if let Some(meta) = self.metadata_for(&normalized.url, metadata).await {
                        fill_missing(&mut record.title, &mut record.description, &mut record.favicon_url, meta);
                    }
                }

                let tags = clean_tags(&candidate.tags);
                let mut writes = WriteSet::new()
                    .guard(Guard::Absent {
                        url_hash: normalized.hash.clone(),
                    })
                    .op(WriteOp::Create(record));
                if !tags.is_empty() {
                    writes = writes.op(WriteOp::LinkTags {
                        record: RecordRef::Created,
                        names: tags,
                    });
                }
                Plan::Create(writes)
            }
            // Stored records are back-filled by `shelf enrich`, not on every re-import.
            Some(record) => {
                let patch = merge_fields(&record, candidate);
                if patch.is_empty() {
                    return Plan::Merge { id: record.id, writes: None };
                }
                Plan::Merge {
                    id: record.id,
                    writes: Some(merge_writes(&record, patch)),
                }
            }
        }
    }

    /// Fetch metadata at most once per candidate, across retries.
    async fn metadata_for<'m>(
        &self,
        url: &str,
        cache: &'m mut Option<Option<PageMetadata>>,
    ) -> Option<&'m PageMetadata> {
        let fetcher = self.fetcher?;
        if cache.is_none() {
            let fetched = match fetcher.fetch(url, self.options.enrich_timeout).await {
                Ok(meta) => Some(meta),
                Err(e) => {
                    debug!(url, error = %e, "enrichment failed");
                    None
                }
            };
            *cache = Some(fetched);
        }
        cache.as_ref().and_then(|m| m.as_ref())
    }
}

/// Guarded write set that applies a merge patch to `record`.
pub fn merge_writes(record: &BookmarkRecord, patch: FieldPatch) -> WriteSet {
    let mut writes = WriteSet::new().guard(Guard::Version {
        id: record.id,
        revision: record.revision,
    });
    if !patch.fields.is_empty() {
        writes = writes.op(WriteOp::Update {
            id: record.id,
            patch: patch.fields,
        });
    }
    if !patch.add_tags.is_empty() {
        writes = writes.op(WriteOp::LinkTags {
            record: RecordRef::Id(record.id),
            names: patch.add_tags,
        });
    }
    writes
}

fn normalize(candidate: &CandidateRecord) -> Result<NormalizedUrl, ReconcileError> {
    normalize_url(&candidate.url).map_err(|reason| ReconcileError::InvalidUrl {
        url: candidate.url.clone(),
        reason,
    })
}

fn trimmed(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

fn lacks_metadata(title: &str, description: &str, favicon_url: &str) -> bool {
    !is_present(title) || !is_present(description) || !is_present(favicon_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EnrichmentError, ErrorKind, InvalidInput};
    use crate::models::{NewRecord, RecordPatch, Tag};
    use crate::normalize::url_hash;
    use crate::store::memory::InMemoryStore;
    use crate::store::Applied;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn yaml(url: &str) -> CandidateRecord {
        CandidateRecord::new(url, Source::Yaml).with_source_file("notes.md")
    }

    async fn reconcile(store: &InMemoryStore, candidates: Vec<CandidateRecord>) -> ImportSummary {
        Reconciler::new(store)
            .run_batch(Source::Yaml, "notes.md", candidates)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_same_resource_twice_in_one_batch() {
        let store = InMemoryStore::new();
        let summary = reconcile(
            &store,
            vec![
                yaml("https://Example.com/").with_title("Example"),
                yaml("https://example.com").with_title(""),
            ],
        )
        .await;

        assert_eq!(
            (summary.created, summary.merged, summary.skipped, summary.errored),
            (1, 1, 0, 0)
        );
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Example");
        assert_eq!(all[0].url_hash, url_hash("https://example.com/"));
    }

    #[tokio::test]
    async fn test_reimport_is_idempotent() {
        let store = InMemoryStore::new();
        let batch = || {
            vec![
                yaml("https://a.com/x").with_title("X").with_tags(["design", "web"]),
                yaml("https://b.com/y").with_description("why").with_tags(["Design"]),
            ]
        };
        reconcile(&store, batch()).await;
        let before = store.list_all().await.unwrap();
        let tags_before = store.list_tags().await.unwrap();

        let second = reconcile(&store, batch()).await;
        assert_eq!((second.created, second.merged, second.unchanged), (0, 2, 2));
        assert_eq!(store.list_all().await.unwrap(), before);
        assert_eq!(store.list_tags().await.unwrap(), tags_before);
    }

    #[tokio::test]
    async fn test_first_present_value_wins_and_fills_gaps() {
        let store = InMemoryStore::new();
        reconcile(&store, vec![yaml("https://a.com/").with_title("Kept")]).await;
        let summary = reconcile(
            &store,
            vec![yaml("https://a.com/").with_title("Ignored").with_description("Filled")],
        )
        .await;
        assert_eq!((summary.merged, summary.unchanged), (1, 0));

        let r = &store.list_all().await.unwrap()[0];
        assert_eq!(r.title, "Kept");
        assert_eq!(r.description, "Filled");
        assert_eq!(r.revision, 1);
    }

    #[tokio::test]
    async fn test_tag_usage_count_matches_records() {
        let store = InMemoryStore::new();
        let candidates = (0..4)
            .map(|i| yaml(&format!("https://site{}.com/", i)).with_tags(["design"]))
            .collect();
        reconcile(&store, candidates).await;
        let tags = store.list_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].usage_count, 4);
    }

    #[tokio::test]
    async fn test_empty_url_is_errored_without_mutation() {
        let store = InMemoryStore::new();
        let summary = reconcile(&store, vec![yaml("")]).await;
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.errors[0].kind, ErrorKind::InvalidInput);
        assert_eq!(summary.errors[0].url, "");
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_candidates_do_not_stop_batch() {
        let store = InMemoryStore::new();
        let summary = reconcile(
            &store,
            vec![
                yaml("javascript:void(0)"),
                yaml("https://ok.com/"),
                yaml("not a url"),
            ],
        )
        .await;
        assert_eq!((summary.created, summary.errored), (1, 2));
        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.processed(), 3);
    }

    #[tokio::test]
    async fn test_created_at_defaults_and_keeps_earliest() {
        let store = InMemoryStore::new();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        reconcile(&store, vec![yaml("https://a.com/").with_created_at(late)]).await;
        reconcile(&store, vec![yaml("https://a.com/").with_created_at(early)]).await;
        assert_eq!(store.list_all().await.unwrap()[0].created_at, early);
    }

    #[tokio::test]
    async fn test_limit_counts_skipped() {
        let store = InMemoryStore::new();
        let summary = Reconciler::new(&store)
            .with_options(ReconcileOptions {
                limit: Some(1),
                ..Default::default()
            })
            .run_batch(Source::Yaml, "notes.md", vec![yaml("https://a.com/"), yaml("https://b.com/")])
            .await
            .unwrap();
        assert_eq!((summary.created, summary.skipped), (1, 1));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = InMemoryStore::new();
        let summary = Reconciler::new(&store)
            .with_options(ReconcileOptions {
                dry_run: true,
                ..Default::default()
            })
            .run_batch(
                Source::Yaml,
                "notes.md",
                vec![yaml("https://a.com/"), yaml("https://a.com"), yaml("")],
            )
            .await
            .unwrap();
        assert_eq!((summary.created, summary.merged, summary.errored), (1, 1, 1));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store_aborts_before_batch() {
        let store = InMemoryStore::new();
        store.set_offline(true);
        let err = Reconciler::new(&store)
            .run_batch(Source::Yaml, "notes.md", vec![yaml("https://a.com/")])
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::StoreUnavailable(_)));
    }

    /// Wraps an [`InMemoryStore`], failing or racing `apply` on demand.
    struct FlakyStore {
        inner: InMemoryStore,
        fail_applies: AtomicUsize,
        race_applies: AtomicUsize,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                fail_applies: AtomicUsize::new(0),
                race_applies: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
        async fn find_by_hash(&self, h: &str) -> Result<Option<BookmarkRecord>, StoreError> {
            self.inner.find_by_hash(h).await
        }
        async fn find_by_id(&self, id: i64) -> Result<Option<BookmarkRecord>, StoreError> {
            self.inner.find_by_id(id).await
        }
        async fn find_by_domain(&self, d: &str) -> Result<Vec<BookmarkRecord>, StoreError> {
            self.inner.find_by_domain(d).await
        }
        async fn find_by_tag(&self, t: &str) -> Result<Vec<BookmarkRecord>, StoreError> {
            self.inner.find_by_tag(t).await
        }
        async fn list_active(&self) -> Result<Vec<BookmarkRecord>, StoreError> {
            self.inner.list_active().await
        }
        async fn list_all(&self) -> Result<Vec<BookmarkRecord>, StoreError> {
            self.inner.list_all().await
        }
        async fn apply(&self, writes: WriteSet) -> Result<Applied, StoreError> {
            if self
                .fail_applies
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Backend("disk full".into()));
            }
            if self
                .race_applies
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                // A concurrent writer touches every guarded record first.
                for guard in &writes.guards {
                    match guard {
                        Guard::Version { id, .. } => {
                            let favorite = self.inner.find_by_id(*id).await?.map(|r| !r.favorite);
                            self.inner
                                .update(*id, RecordPatch { favorite, ..Default::default() })
                                .await?;
                        }
                        Guard::Absent { url_hash } => {
                            let now = Utc::now();
                            self.inner
                                .create(NewRecord {
                                    url_hash: url_hash.clone(),
                                    url: "https://racer.example/".into(),
                                    title: "Racer".into(),
                                    description: String::new(),
                                    domain: "racer.example".into(),
                                    source: Source::Manual,
                                    source_file: String::new(),
                                    created_at: now,
                                    imported_at: now,
                                    favicon_url: String::new(),
                                })
                                .await?;
                        }
                    }
                }
            }
            self.inner.apply(writes).await
        }
        async fn upsert_tag(&self, name: &str) -> Result<Tag, StoreError> {
            self.inner.upsert_tag(name).await
        }
        async fn list_tags(&self) -> Result<Vec<Tag>, StoreError> {
            self.inner.list_tags().await
        }
        async fn recount_tags(&self) -> Result<u64, StoreError> {
            self.inner.recount_tags().await
        }
        async fn prune_tags(&self) -> Result<u64, StoreError> {
            self.inner.prune_tags().await
        }
    }

    #[tokio::test]
    async fn test_conflicting_create_replans_as_merge() {
        let store = FlakyStore::new();
        store.race_applies.store(1, Ordering::SeqCst);
        let outcome = Reconciler::new(&store)
            .reconcile_one(&yaml("https://a.com/").with_description("mine"))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Merged { changed: true, .. }));

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Racer");
        assert_eq!(all[0].description, "mine");
    }

    #[tokio::test]
    async fn test_conflicts_give_up_after_three_attempts() {
        let store = FlakyStore::new();
        Reconciler::new(&store)
            .reconcile_one(&yaml("https://a.com/"))
            .await
            .unwrap();
        store.race_applies.store(3, Ordering::SeqCst);
        let err = Reconciler::new(&store)
            .reconcile_one(&yaml("https://a.com/").with_title("late"))
            .await
            .unwrap_err();
        match err {
            ReconcileError::StoreWriteFailure { source, .. } => assert!(source.is_conflict()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.list_all().await.unwrap()[0].title, "");
    }

    #[tokio::test]
    async fn test_single_store_failure_is_per_candidate() {
        let store = FlakyStore::new();
        store.fail_applies.store(1, Ordering::SeqCst);
        let summary = Reconciler::new(&store)
            .run_batch(Source::Yaml, "notes.md", vec![yaml("https://a.com/"), yaml("https://b.com/")])
            .await
            .unwrap();
        assert_eq!((summary.created, summary.errored), (1, 1));
        assert_eq!(summary.errors[0].kind, ErrorKind::StoreFailure);
    }

    #[tokio::test]
    async fn test_repeated_store_failures_abort_batch() {
        let store = FlakyStore::new();
        store.fail_applies.store(usize::MAX, Ordering::SeqCst);
        let candidates = (0..10).map(|i| yaml(&format!("https://s{}.com/", i))).collect::<Vec<_>>();
        let err = Reconciler::new(&store)
            .run_batch(Source::Yaml, "notes.md", candidates)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::StoreUnavailable(_)));
        assert_eq!(store.fail_applies.load(Ordering::SeqCst), usize::MAX - 5);
    }

    struct FixedFetcher {
        result: Result<PageMetadata, EnrichmentError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataFetcher for FixedFetcher {
        async fn fetch(&self, _url: &str, _timeout: Duration) -> Result<PageMetadata, EnrichmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[tokio::test]
    async fn test_enrichment_fills_only_empty_fields() {
        let store = InMemoryStore::new();
        let fetcher = FixedFetcher {
            result: Ok(PageMetadata {
                title: "Fetched".into(),
                description: "From the page".into(),
                favicon_url: "https://a.com/favicon.ico".into(),
            }),
            calls: AtomicUsize::new(0),
        };
        Reconciler::new(&store)
            .with_fetcher(&fetcher)
            .run_batch(Source::Yaml, "notes.md", vec![yaml("https://a.com/").with_title("Given")])
            .await
            .unwrap();
        let r = &store.list_all().await.unwrap()[0];
        assert_eq!(r.title, "Given");
        assert_eq!(r.description, "From the page");
        assert_eq!(r.favicon_url, "https://a.com/favicon.ico");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_merge_does_not_fetch() {
        let store = InMemoryStore::new();
        let fetcher = FixedFetcher {
            result: Ok(PageMetadata {
                title: "Fetched".into(),
                description: String::new(),
                favicon_url: String::new(),
            }),
            calls: AtomicUsize::new(0),
        };
        let reconciler = Reconciler::new(&store).with_fetcher(&fetcher);
        reconciler
            .run_batch(Source::Yaml, "notes.md", vec![yaml("https://a.com/")])
            .await
            .unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // The stored record still lacks a description and favicon.
        let again = vec![yaml("https://a.com/"), yaml("https://a.com/").with_title("Other")];
        let summary = reconciler.run_batch(Source::Yaml, "notes.md", again).await.unwrap();
        assert_eq!((summary.merged, summary.unchanged), (2, 2));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enrichment_failure_is_ignored() {
        let store = InMemoryStore::new();
        let fetcher = FixedFetcher {
            result: Err(EnrichmentError::Timeout(Duration::from_secs(1))),
            calls: AtomicUsize::new(0),
        };
        let summary = Reconciler::new(&store)
            .with_fetcher(&fetcher)
            .run_batch(Source::Yaml, "notes.md", vec![yaml("https://a.com/")])
            .await
            .unwrap();
        assert_eq!((summary.created, summary.errored), (1, 0));
        assert_eq!(store.list_all().await.unwrap()[0].title, "");
    }

    #[test]
    fn test_invalid_url_kind() {
        let err = normalize(&yaml("  ")).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidUrl { reason: InvalidInput::EmptyUrl, .. }));
    }
}
