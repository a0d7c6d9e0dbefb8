//! Offline duplicate detection and merging.
//!
//! # Algorithm
//!
//! 1. Take a snapshot of records (active only unless asked otherwise).
//! 2. Bucket by domain. Records on different hosts are never compared.
//! 3. Within a bucket, score every pair with [`similarity`] and union the
//!    pairs scoring at or above the threshold in a [`DisjointSet`].
//! 4. Every set with two or more members becomes a [`DuplicateCluster`]
//!    with a canonical member (see [`choose_canonical`]).
//! 5. In [`DedupMode::AutoMerge`], fold each cluster into its canonical
//!    record with the shared merge rule, then archive or delete the rest.
//!
//! Buckets are processed in domain order and each one is committed on its
//! own, so a pass can be cancelled between buckets and later resumed with
//! [`DedupOptions::resume_after`].
//!
//! [`similarity`]: crate::similarity

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dsu::DisjointSet;
use crate::error::StoreError;
use crate::merge::{is_present, merge_fields, FieldPatch};
use crate::models::{BookmarkRecord, DuplicateCluster, PairScore, RecordPatch, Status};
use crate::reconcile::merge_writes;
use crate::similarity::pairwise;
use crate::store::{Guard, Store, WriteOp};

pub const DEFAULT_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Find clusters without touching the store.
    Report,
    AutoMerge,
}

/// What happens to non-canonical members after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnMerge {
    #[default]
    Archive,
    Delete,
}

impl fmt::Display for OnMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OnMerge::Archive => "archive",
            OnMerge::Delete => "delete",
        })
    }
}

impl FromStr for OnMerge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archive" => Ok(OnMerge::Archive),
            "delete" => Ok(OnMerge::Delete),
            other => Err(format!("unknown on_merge action '{}'", other)),
        }
    }
}

/// Shared flag for stopping a pass between buckets.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct DedupOptions {
    pub threshold: f64,
    pub mode: DedupMode,
    pub on_merge: OnMerge,
    pub include_inactive: bool,
    /// Skip every bucket whose domain sorts at or before this one.
    pub resume_after: Option<String>,
    pub cancel: CancelToken,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            mode: DedupMode::Report,
            on_merge: OnMerge::Archive,
            include_inactive: false,
            resume_after: None,
            cancel: CancelToken::new(),
        }
    }
}

/// A cluster that could not be merged.
#[derive(Debug, Clone, Serialize)]
pub struct DedupError {
    pub cluster_id: usize,
    pub domain: String,
    pub reason: String,
}

/// Outcome of a [`run_dedup`] pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupReport {
    pub clusters: Vec<DuplicateCluster>,
    pub merged_clusters: u64,
    pub archived: u64,
    pub deleted: u64,
    pub errors: Vec<DedupError>,
    pub completed_buckets: u64,
    /// Domain of the last committed bucket; pass to `resume_after`.
    pub last_bucket: Option<String>,
    pub cancelled: bool,
}

/// Group records by domain, in domain order. Members keep their input order.
pub fn bucket_by_domain(records: &[BookmarkRecord]) -> BTreeMap<&str, Vec<&BookmarkRecord>> {
    let mut buckets: BTreeMap<&str, Vec<&BookmarkRecord>> = BTreeMap::new();
    for record in records {
        buckets.entry(record.domain.as_str()).or_default().push(record);
    }
    buckets
}

fn metadata_score(record: &BookmarkRecord) -> usize {
    [
        is_present(&record.title),
        is_present(&record.description),
        is_present(&record.favicon_url),
        !record.tags.is_empty(),
    ]
    .iter()
    .filter(|p| **p)
    .count()
}

/// Pick the member that survives a merge: active before inactive, then
/// most present metadata fields, then earliest `created_at`, then lowest id.
pub fn choose_canonical(members: &[&BookmarkRecord]) -> Option<i64> {
    let inactive = |r: &BookmarkRecord| r.status != Status::Active;
    members
        .iter()
        .min_by(|a, b| {
            inactive(a)
                .cmp(&inactive(b))
                .then(metadata_score(b).cmp(&metadata_score(a)))
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        })
        .map(|r| r.id)
}

/// Clusters within one domain bucket. `next_id` numbers them.
pub fn clusters_in_bucket(
    domain: &str,
    members: &[&BookmarkRecord],
    threshold: f64,
    next_id: &mut usize,
) -> Vec<DuplicateCluster> {
    let mut members: Vec<&BookmarkRecord> = members.to_vec();
    members.sort_by_key(|r| r.id);

    let scores = pairwise(&members);
    let mut dsu = DisjointSet::new(members.len());
    for (i, j, score) in &scores {
        if *score >= threshold {
            dsu.union(*i, *j);
        }
    }

    let mut clusters = Vec::new();
    for group in dsu.groups().into_iter().filter(|g| g.len() >= 2) {
        let group_members: Vec<&BookmarkRecord> = group.iter().map(|i| members[*i]).collect();
        let Some(canonical_id) = choose_canonical(&group_members) else {
            continue;
        };
        let pair_scores = scores
            .iter()
            .filter(|(i, j, _)| group.binary_search(i).is_ok() && group.binary_search(j).is_ok())
            .map(|(i, j, score)| PairScore {
                a: members[*i].id,
                b: members[*j].id,
                score: *score,
            })
            .collect();
        *next_id += 1;
        clusters.push(DuplicateCluster {
            cluster_id: *next_id,
            domain: domain.to_string(),
            member_ids: group_members.iter().map(|r| r.id).collect(),
            canonical_id,
            pair_scores,
        });
    }
    clusters
}

/// Find duplicate clusters in a snapshot. Pure; never touches a store.
pub fn find_clusters(records: &[BookmarkRecord], threshold: f64, include_inactive: bool) -> Vec<DuplicateCluster> {
    let eligible: Vec<BookmarkRecord> = records
        .iter()
        .filter(|r| include_inactive || r.status == Status::Active)
        .cloned()
        .collect();
    let mut next_id = 0;
    bucket_by_domain(&eligible)
        .into_iter()
        .flat_map(|(domain, members)| clusters_in_bucket(domain, &members, threshold, &mut next_id))
        .collect()
}

/// Fold every non-canonical member into the canonical record.
fn cluster_patch(canonical: &BookmarkRecord, others: &[&BookmarkRecord]) -> FieldPatch {
    let mut acc = canonical.clone();
    let mut total = FieldPatch::default();
    for other in others {
        let next = merge_fields(&acc, *other);
        next.apply_to(&mut acc);
        let RecordPatch {
            title,
            description,
            favicon_url,
            source_file,
            created_at,
            ..
        } = next.fields;
        // Each field is filled at most once because `acc` already holds
        // earlier contributions; created_at only ever moves earlier.
        total.fields.title = title.or(total.fields.title);
        total.fields.description = description.or(total.fields.description);
        total.fields.favicon_url = favicon_url.or(total.fields.favicon_url);
        total.fields.source_file = source_file.or(total.fields.source_file);
        total.fields.created_at = created_at.or(total.fields.created_at);
        total.add_tags.extend(next.add_tags);
    }
    total
}

async fn merge_cluster(
    store: &dyn Store,
    cluster: &DuplicateCluster,
    by_id: &BTreeMap<i64, &BookmarkRecord>,
    on_merge: OnMerge,
) -> Result<(u64, u64), StoreError> {
    let canonical = by_id
        .get(&cluster.canonical_id)
        .ok_or(StoreError::NotFound(cluster.canonical_id))?;
    let others: Vec<&BookmarkRecord> = cluster
        .member_ids
        .iter()
        .filter(|id| **id != cluster.canonical_id)
        .map(|id| by_id.get(id).copied().ok_or(StoreError::NotFound(*id)))
        .collect::<Result<_, _>>()?;

    let patch = cluster_patch(canonical, &others);
    let mut writes = merge_writes(canonical, patch);
    let (mut archived, mut deleted) = (0, 0);
    for other in &others {
        writes = writes.guard(Guard::Version {
            id: other.id,
            revision: other.revision,
        });
        writes = match on_merge {
            OnMerge::Archive => {
                archived += 1;
                writes.op(WriteOp::Update {
                    id: other.id,
                    patch: RecordPatch {
                        status: Some(Status::Archived),
                        ..Default::default()
                    },
                })
            }
            OnMerge::Delete => {
                deleted += 1;
                writes.op(WriteOp::Delete { id: other.id })
            }
        };
    }
    store.apply(writes).await?;
    Ok((archived, deleted))
}

/// Run a deduplication pass against a store.
///
/// Fails only when the initial snapshot cannot be read. Cluster failures
/// are recorded in the report; an unreachable store stops the pass early
/// with `last_bucket` pointing at the last committed bucket.
pub async fn run_dedup(store: &dyn Store, options: &DedupOptions) -> Result<DedupReport, StoreError> {
    let records = if options.include_inactive {
        store.list_all().await?
    } else {
        store.list_active().await?
    };
    let by_id: BTreeMap<i64, &BookmarkRecord> = records.iter().map(|r| (r.id, r)).collect();

    info!(
        records = records.len(),
        threshold = options.threshold,
        mode = ?options.mode,
        resume_after = options.resume_after.as_deref().unwrap_or(""),
        "dedup pass started"
    );

    let mut report = DedupReport::default();
    let mut next_id = 0;

    'buckets: for (domain, members) in bucket_by_domain(&records) {
        if let Some(after) = &options.resume_after {
            if domain <= after.as_str() {
                continue;
            }
        }
        if options.cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let clusters = clusters_in_bucket(domain, &members, options.threshold, &mut next_id);
        if options.mode == DedupMode::AutoMerge {
            for cluster in &clusters {
                match merge_cluster(store, cluster, &by_id, options.on_merge).await {
                    Ok((archived, deleted)) => {
                        debug!(cluster_id = cluster.cluster_id, domain, canonical = cluster.canonical_id, "cluster merged");
                        report.merged_clusters += 1;
                        report.archived += archived;
                        report.deleted += deleted;
                    }
                    Err(e) => {
                        warn!(cluster_id = cluster.cluster_id, domain, error = %e, "cluster merge failed");
                        report.errors.push(DedupError {
                            cluster_id: cluster.cluster_id,
                            domain: domain.to_string(),
                            reason: e.to_string(),
                        });
                        if matches!(e, StoreError::Unavailable(_)) {
                            report.clusters.extend(clusters.iter().cloned());
                            break 'buckets;
                        }
                    }
                }
            }
        }
        report.clusters.extend(clusters);
        report.completed_buckets += 1;
        report.last_bucket = Some(domain.to_string());
    }

    info!(
        clusters = report.clusters.len(),
        merged = report.merged_clusters,
        archived = report.archived,
        deleted = report.deleted,
        errors = report.errors.len(),
        cancelled = report.cancelled,
        "dedup pass finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRecord, Source};
    use crate::normalize::url_hash;
    use crate::store::memory::InMemoryStore;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(id: i64, url: &str, domain: &str, title: &str, created: i32) -> BookmarkRecord {
        BookmarkRecord {
            id,
            url_hash: format!("{}-{}", url_hash(url), id),
            url: url.to_string(),
            title: title.to_string(),
            description: String::new(),
            domain: domain.to_string(),
            source: Source::Manual,
            source_file: String::new(),
            created_at: ts(created),
            updated_at: ts(created),
            imported_at: ts(created),
            status: Status::Active,
            favicon_url: String::new(),
            read_status: false,
            favorite: false,
            tags: Vec::new(),
            revision: 0,
        }
    }

    #[test]
    fn test_identical_urls_cluster_with_earliest_canonical() {
        let records = vec![
            record(1, "https://a.com/x", "a.com", "", 2022),
            record(2, "https://a.com/x", "a.com", "", 2020),
        ];
        let clusters = find_clusters(&records, DEFAULT_THRESHOLD, false);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids, vec![1, 2]);
        assert_eq!(clusters[0].canonical_id, 2);
        assert_eq!(clusters[0].pair_scores, vec![PairScore { a: 1, b: 2, score: 1.0 }]);
    }

    #[test]
    fn test_never_clusters_across_domains() {
        let records = vec![
            record(1, "https://a.com/x", "a.com", "Same title here", 2020),
            record(2, "https://a.com/x", "b.com", "Same title here", 2020),
        ];
        assert!(find_clusters(&records, 0.0, false).is_empty());
    }

    #[test]
    fn test_similar_titles_below_threshold_stay_apart() {
        let records = vec![
            record(1, "https://a.com/x", "a.com", "Rust book", 2020),
            record(2, "https://a.com/y", "a.com", "Rust book", 2020),
        ];
        // 0.1 domain + 0.25 title
        assert!(find_clusters(&records, DEFAULT_THRESHOLD, false).is_empty());
        assert_eq!(find_clusters(&records, 0.35, false).len(), 1);
    }

    #[test]
    fn test_transitive_clusters_and_inactive_filter() {
        let mut records = vec![
            record(1, "https://a.com/x", "a.com", "", 2020),
            record(2, "https://a.com/x", "a.com", "", 2021),
            record(3, "https://a.com/x", "a.com", "", 2019),
        ];
        records[2].status = Status::Archived;
        let active_only = find_clusters(&records, DEFAULT_THRESHOLD, false);
        assert_eq!(active_only[0].member_ids, vec![1, 2]);

        let all = find_clusters(&records, DEFAULT_THRESHOLD, true);
        assert_eq!(all[0].member_ids, vec![1, 2, 3]);
        // The older archived copy does not outrank active ones.
        assert_eq!(all[0].canonical_id, 1);
    }

    #[test]
    fn test_canonical_is_active_even_when_archived_is_richer() {
        let mut archived = record(1, "https://a.com/x", "a.com", "Title", 2000);
        archived.tags = vec!["t".into()];
        archived.status = Status::Archived;
        let active = record(2, "https://a.com/x", "a.com", "", 2024);
        assert_eq!(choose_canonical(&[&archived, &active]), Some(2));

        let mut broken = active.clone();
        broken.status = Status::Broken;
        assert_eq!(choose_canonical(&[&archived, &broken]), Some(1));
    }

    #[test]
    fn test_canonical_prefers_richer_metadata() {
        let mut rich = record(5, "https://a.com/x", "a.com", "Title", 2024);
        rich.tags = vec!["t".into()];
        let poor = record(1, "https://a.com/x", "a.com", "", 2000);
        assert_eq!(choose_canonical(&[&poor, &rich]), Some(5));
        assert_eq!(choose_canonical(&[]), None);
    }

    #[test]
    fn test_cluster_output_is_deterministic() {
        let records = vec![
            record(4, "https://b.com/x", "b.com", "", 2020),
            record(3, "https://b.com/x", "b.com", "", 2020),
            record(2, "https://a.com/x", "a.com", "", 2020),
            record(1, "https://a.com/x", "a.com", "", 2020),
        ];
        let clusters = find_clusters(&records, DEFAULT_THRESHOLD, false);
        let summary: Vec<(usize, &str, Vec<i64>)> = clusters
            .iter()
            .map(|c| (c.cluster_id, c.domain.as_str(), c.member_ids.clone()))
            .collect();
        assert_eq!(summary, vec![(1, "a.com", vec![1, 2]), (2, "b.com", vec![3, 4])]);
    }

    async fn seed(store: &InMemoryStore, url: &str, legacy: &str, domain: &str, title: &str, created: i32) -> i64 {
        store
            .create(NewRecord {
                url_hash: url_hash(legacy),
                url: url.to_string(),
                title: title.to_string(),
                description: String::new(),
                domain: domain.to_string(),
                source: Source::HtmlExport,
                source_file: String::new(),
                created_at: ts(created),
                imported_at: ts(created),
                favicon_url: String::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_report_mode_does_not_mutate() {
        let store = InMemoryStore::new();
        seed(&store, "https://a.com/x", "legacy-1", "a.com", "", 2020).await;
        seed(&store, "https://a.com/x", "legacy-2", "a.com", "", 2021).await;
        let before = store.list_all().await.unwrap();

        let report = run_dedup(&store, &DedupOptions::default()).await.unwrap();
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.merged_clusters, 0);
        assert_eq!(report.completed_buckets, 1);
        assert_eq!(store.list_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_auto_merge_archives_and_unions() {
        let store = InMemoryStore::new();
        let older = seed(&store, "https://a.com/x", "legacy-1", "a.com", "", 2020).await;
        let richer = seed(&store, "https://a.com/x", "legacy-2", "a.com", "Named", 2021).await;
        store.link_tag(older, "rust").await.unwrap();
        store.link_tag(richer, "web").await.unwrap();

        let options = DedupOptions {
            mode: DedupMode::AutoMerge,
            ..Default::default()
        };
        let report = run_dedup(&store, &options).await.unwrap();
        assert_eq!((report.merged_clusters, report.archived, report.deleted), (1, 1, 0));
        assert_eq!(report.clusters[0].canonical_id, richer);

        let canonical = store.find_by_id(richer).await.unwrap().unwrap();
        assert_eq!(canonical.title, "Named");
        assert_eq!(canonical.created_at, ts(2020));
        assert_eq!(canonical.tags, vec!["rust".to_string(), "web".to_string()]);
        assert_eq!(store.find_by_id(older).await.unwrap().unwrap().status, Status::Archived);
        assert_eq!(store.list_active().await.unwrap().len(), 1);

        let again = run_dedup(&store, &options).await.unwrap();
        assert!(again.clusters.is_empty());
    }

    #[tokio::test]
    async fn test_auto_merge_delete() {
        let store = InMemoryStore::new();
        let keep = seed(&store, "https://a.com/x", "legacy-1", "a.com", "Kept", 2020).await;
        let dup = seed(&store, "https://a.com/x", "legacy-2", "a.com", "", 2021).await;
        store.link_tag(dup, "web").await.unwrap();

        let options = DedupOptions {
            mode: DedupMode::AutoMerge,
            on_merge: OnMerge::Delete,
            ..Default::default()
        };
        let report = run_dedup(&store, &options).await.unwrap();
        assert_eq!(report.clusters[0].canonical_id, keep);
        assert_eq!(report.deleted, 1);
        assert!(store.find_by_id(dup).await.unwrap().is_none());
        let tags = store.list_tags().await.unwrap();
        assert_eq!(tags[0].usage_count, 1);
        assert_eq!(store.find_by_tag("web").await.unwrap()[0].id, keep);
    }

    #[tokio::test]
    async fn test_resume_and_cancel() {
        let store = InMemoryStore::new();
        seed(&store, "https://a.com/x", "a1", "a.com", "", 2020).await;
        seed(&store, "https://a.com/x", "a2", "a.com", "", 2020).await;
        seed(&store, "https://b.com/x", "b1", "b.com", "", 2020).await;
        seed(&store, "https://b.com/x", "b2", "b.com", "", 2020).await;

        let resumed = run_dedup(
            &store,
            &DedupOptions {
                resume_after: Some("a.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(resumed.completed_buckets, 1);
        assert_eq!(resumed.clusters[0].domain, "b.com");
        assert_eq!(resumed.last_bucket.as_deref(), Some("b.com"));

        let options = DedupOptions::default();
        options.cancel.cancel();
        let cancelled = run_dedup(&store, &options).await.unwrap();
        assert!(cancelled.cancelled);
        assert_eq!(cancelled.completed_buckets, 0);
    }

    #[tokio::test]
    async fn test_stale_cluster_is_reported_not_fatal() {
        let store = InMemoryStore::new();
        seed(&store, "https://a.com/x", "a1", "a.com", "", 2020).await;
        let stale = seed(&store, "https://a.com/x", "a2", "a.com", "", 2021).await;
        let records = store.list_active().await.unwrap();
        let by_id: BTreeMap<i64, &BookmarkRecord> = records.iter().map(|r| (r.id, r)).collect();
        let clusters = find_clusters(&records, DEFAULT_THRESHOLD, false);

        store
            .update(stale, RecordPatch { favorite: Some(true), ..Default::default() })
            .await
            .unwrap();
        let err = merge_cluster(&store, &clusters[0], &by_id, OnMerge::Archive).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.list_active().await.unwrap().len(), 2);
    }
}
