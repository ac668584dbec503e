//! Router assembly and shared state.

use std::sync::Arc;

use artery_engine::{ArtifactStore, Downloader};
use axum::routing::get;
use axum::Router;

use crate::handler;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: ArtifactStore,
    pub downloader: Arc<Downloader>,
}

/// Assemble the application router.
///
/// Every path below the root is an artifact path; `get` also answers
/// HEAD, and anything else gets 405 from the method router. The bare
/// root matches no route and falls through to 404.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/*path", get(handler::serve_artifact))
        .with_state(state)
}
