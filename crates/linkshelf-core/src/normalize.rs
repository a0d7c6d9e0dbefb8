//! URL normalization and hashing.
//!
//! Two bookmarks are the same resource exactly when their normalized URLs
//! are equal, so everything that compares or keys records goes through
//! [`normalize_url`]. The rules:
//!
//! - trim surrounding whitespace, reject empty input
//! - reject `javascript:`, `data:`, `about:`, `mailto:` and host-less URLs
//! - lowercase scheme and host, drop the default port (done by [`url::Url`])
//! - drop the fragment
//! - drop well-known tracking query parameters, sort the rest by key
//! - strip a trailing `/` from the path unless the path is the root
//!
//! Path case is preserved: many servers treat paths case-sensitively.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::InvalidInput;

const REJECTED_SCHEMES: &[&str] = &["javascript", "data", "about", "mailto"];

const TRACKING_PREFIXES: &[&str] = &["utm_", "hsa_"];

const TRACKING_PARAMS: &[&str] = &[
    "fb_source",
    "fb_ref",
    "fbclid",
    "gclid",
    "gclsrc",
    "ref",
    "source",
    "campaign",
    "_ga",
    "_gac",
    "_gid",
    "mc_cid",
    "mc_eid",
    "hsctatracking",
    "igshid",
    "feature",
    "ncid",
    "cmpid",
    "sr_share",
];

/// A URL in canonical form together with its derived keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub url: String,
    /// Lowercase hex SHA-256 of `url`.
    pub hash: String,
    /// Lowercase host.
    pub domain: String,
}

/// Decoded key of one raw `k=v` query segment.
fn query_key(segment: &str) -> String {
    url::form_urlencoded::parse(segment.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default()
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PREFIXES.iter().any(|p| key.starts_with(p)) || TRACKING_PARAMS.contains(&key.as_str())
}

/// Normalize a raw URL string. See the module docs for the rules.
pub fn normalize_url(raw: &str) -> Result<NormalizedUrl, InvalidInput> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InvalidInput::EmptyUrl);
    }

    let mut url = Url::parse(trimmed).map_err(|e| InvalidInput::Unparsable(e.to_string()))?;

    if REJECTED_SCHEMES.contains(&url.scheme()) {
        return Err(InvalidInput::UnsupportedScheme(url.scheme().to_string()));
    }
    let domain = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_ascii_lowercase(),
        _ => return Err(InvalidInput::MissingHost),
    };

    url.set_fragment(None);

    // Segments are kept byte-for-byte; only whole `k=v` pairs move or go.
    let mut segments: Vec<(String, String)> = url
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|seg| !seg.is_empty())
        .map(|seg| (query_key(seg), seg.to_string()))
        .filter(|(key, _)| !is_tracking_param(key))
        .collect();
    // Stable: repeated keys keep their relative order.
    segments.sort_by(|a, b| a.0.cmp(&b.0));
    if segments.is_empty() {
        url.set_query(None);
    } else {
        let query = segments.into_iter().map(|(_, seg)| seg).collect::<Vec<_>>().join("&");
        url.set_query(Some(query.as_str()));
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let stripped = path.trim_end_matches('/');
        url.set_path(if stripped.is_empty() { "/" } else { stripped });
    }

    let url = url.to_string();
    let hash = url_hash(&url);
    Ok(NormalizedUrl { url, hash, domain })
}

/// Lowercase hex SHA-256 of an already-normalized URL.
pub fn url_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Host of a URL, lowercase. Returns `None` for unparsable or host-less input.
pub fn domain_of(raw: &str) -> Option<String> {
    normalize_url(raw).ok().map(|n| n.domain)
}
