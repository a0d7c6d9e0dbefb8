//! Error taxonomy shared by the reconciler, the deduplication engine, and
//! store implementations.
//!
//! | Kind | Raised by | Recovery |
//! |------|-----------|----------|
//! | [`InvalidInput`] | URL normalization, empty required fields | candidate or cluster skipped, reported |
//! | [`StoreError`] | store implementations | per candidate / per cluster, reported |
//! | [`ReconcileError::StoreUnavailable`] | reconciler | whole batch aborts |
//! | [`EnrichmentError`] | metadata fetchers | never fatal, ignored |

use serde::Serialize;
use thiserror::Error;

/// Malformed input that can never succeed no matter how often it is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("url is empty")]
    EmptyUrl,
    #[error("url could not be parsed: {0}")]
    Unparsable(String),
    #[error("unsupported url scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("url has no host")]
    MissingHost,
}

/// Failure reported by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A write-set guard did not hold: another writer changed the rows the
    /// plan was computed from.
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("record {0} not found")]
    NotFound(i64),
    /// The backend cannot be reached at all (closed pool, missing file).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Any other backend error for a single operation.
    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Best-effort metadata fetch failure. Callers degrade to "no enrichment".
#[derive(Debug, Clone, Error)]
pub enum EnrichmentError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("http status {0}")]
    Status(u16),
    #[error("unsupported content type '{0}'")]
    NotHtml(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// Coarse error class surfaced in summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    StoreFailure,
}

/// Errors produced while reconciling candidates against the store.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl {
        url: String,
        #[source]
        reason: InvalidInput,
    },
    #[error("store write failed for {url}: {source}")]
    StoreWriteFailure {
        url: String,
        #[source]
        source: StoreError,
    },
    /// Fatal for the whole batch.
    #[error("store unavailable, batch aborted: {0}")]
    StoreUnavailable(#[source] StoreError),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::InvalidUrl { .. } => ErrorKind::InvalidInput,
            ReconcileError::StoreWriteFailure { .. } | ReconcileError::StoreUnavailable(_) => {
                ErrorKind::StoreFailure
            }
        }
    }
}
