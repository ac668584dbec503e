//! # Artery Engine
//!
//! The caching downloader behind the artery proxy. Looks artifacts up
//! in a path-addressed local store and, on a miss, races one streaming
//! fetch per configured upstream: the first success is promoted into
//! the store and the rest are cancelled. Paths that fail on every
//! upstream are remembered for a while so repeat misses stay local.
//!
//! ## Pieces
//!
//! - [`ArtifactStore`] — local file store with atomic publish
//! - [`FailedPathCache`] — TTL set of known-unavailable paths
//! - [`Downloader`] — the fan-out race coordinator
//! - [`ArtifactPath`] — validated artifact path / cache key

pub mod config;
pub mod downloader;
pub mod error;
pub mod failcache;
mod fetch;
pub mod ids;
pub mod path;
pub mod store;

pub use config::DownloadConfig;
pub use downloader::{CancelHook, DownloadHandle, DownloadOutcome, Downloader};
pub use error::{DownloadError, PathError, StoreError};
pub use failcache::FailedPathCache;
pub use path::ArtifactPath;
pub use store::{ArtifactStore, StoredArtifact};
