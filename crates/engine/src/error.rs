use std::path::PathBuf;

/// Why a request path was rejected before any lookup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("relative paths not allowed")]
    Relative,

    #[error("path contains an empty segment")]
    EmptySegment,
}

/// Local filesystem failure while publishing into the store.
///
/// These are surfaced to the client as 500 and never poison the
/// negative cache: the artifact may well exist upstream, the problem
/// is on our side.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Errors constructing the downloader.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("no upstream repositories configured")]
    NoUpstreams,
}
