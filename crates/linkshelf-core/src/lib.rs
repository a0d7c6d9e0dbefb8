//! # linkshelf core
//!
//! Runtime-free logic for linkshelf: bookmark data models, URL
//! normalization, the similarity engine, the import reconciler, the
//! deduplication engine, and the [`store::Store`] abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem code. Storage
//! and metadata fetching are reached through traits so that the same
//! reconciliation and deduplication paths run against SQLite in the CLI
//! and against [`store::memory::InMemoryStore`] in tests.
//!
//! ## Data Flow
//!
//! ```text
//! CandidateRecord ──▶ reconcile ──▶ Store::apply(WriteSet)
//!                        │
//!                        └── enrich (optional, bounded)
//!
//! Store::list_active ──▶ dedup (bucket by domain → similarity → union-find)
//!                          └──▶ DuplicateCluster / Store::apply per cluster
//! ```

pub mod dedup;
pub mod dsu;
pub mod enrich;
pub mod error;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod similarity;
pub mod store;

pub use error::{EnrichmentError, ErrorKind, InvalidInput, ReconcileError, StoreError};
pub use models::{BookmarkRecord, CandidateRecord, DuplicateCluster, ImportSummary, Source, Status, Tag};
