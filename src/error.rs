use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid upstream URL {url:?}: {source}")]
    InvalidUpstream {
        url: String,
        source: url::ParseError,
    },

    #[error("Download engine error: {0}")]
    Engine(#[from] artery_engine::DownloadError),

    #[error("Store error: {0}")]
    Store(#[from] artery_engine::StoreError),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}
