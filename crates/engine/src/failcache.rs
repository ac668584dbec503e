//! # Negative Cache
//!
//! A time-expiring set of artifact paths that every configured upstream
//! failed to supply. Lookups for a listed path short-circuit to 404
//! without issuing any upstream fetches.

use std::time::Duration;

use moka::sync::Cache;

use crate::path::ArtifactPath;

/// Membership-only cache of failed paths with write-expiry.
///
/// Clone is cheap; all clones share the same underlying cache.
#[derive(Clone)]
pub struct FailedPathCache {
    paths: Cache<ArtifactPath, ()>,
}

impl FailedPathCache {
    /// Create a cache whose entries expire `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        let paths = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();
        Self { paths }
    }

    /// True iff `path` was marked failed within the last TTL.
    pub fn is_failed(&self, path: &ArtifactPath) -> bool {
        self.paths.contains_key(path)
    }

    /// Record that all upstreams failed for `path`.
    pub fn mark_failed(&self, path: &ArtifactPath) {
        self.paths.insert(path.clone(), ());
    }
}
