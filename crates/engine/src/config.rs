//! Configuration for the downloader.

use std::time::Duration;

use url::Url;

const DEFAULT_USER_AGENT: &str = concat!("artery/", env!("CARGO_PKG_VERSION"));

/// Options for [`Downloader`](crate::Downloader).
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Ordered set of upstream repository base URLs. Ordering is
    /// cosmetic; fetches against them race in parallel.
    pub upstreams: Vec<Url>,

    /// Overall deadline for one upstream fetch, headers through last
    /// byte. Expiry counts as a transport failure.
    pub fetch_timeout: Duration,

    /// How long a path that failed on every upstream stays in the
    /// negative cache.
    pub failed_path_ttl: Duration,

    /// User agent sent to upstreams.
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            upstreams: Vec::new(),
            fetch_timeout: Duration::from_secs(120),
            failed_path_ttl: Duration::from_secs(5 * 60),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}
