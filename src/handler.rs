//! # Artifact Request Handler
//!
//! Bridges a client GET/HEAD to the store and the download race.
//! Cache hits answer immediately (with conditional-GET support);
//! misses suspend on a race against the upstreams and stream the
//! winner back. A client disconnect while suspended aborts the race
//! through a drop guard.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use artery_engine::{ids, ArtifactPath, CancelHook, DownloadOutcome, PathError, StoredArtifact};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::mime;
use crate::server::AppState;

const CACHE_PUBLIC: &str = "public, must-revalidate";

pub async fn serve_artifact(
    State(state): State<AppState>,
    method: Method,
    Path(raw_path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    request_headers: HeaderMap,
) -> Response {
    if flag(&query, "browse") || flag(&query, "index") {
        // Directory listings are a different handler's job.
        return (StatusCode::NOT_FOUND, "artifact browsing not available\n").into_response();
    }

    let path = match ArtifactPath::parse(&raw_path) {
        Ok(path) => path,
        Err(PathError::Relative) => {
            return (StatusCode::BAD_REQUEST, "Relative paths not allowed\n").into_response()
        }
        Err(_) => return (StatusCode::NOT_FOUND, "no such artifact\n").into_response(),
    };
    let request_id = ids::next_request_id();

    if let Some(artifact) = state.store.find(&path).await {
        info!(path = %path, id = request_id, cached = true, "fetch");
        return cached_response(&method, &request_headers, &path, &artifact).await;
    }

    if state.downloader.is_failed_path(&path) {
        debug!(path = %path, id = request_id, "short-circuiting recently failed path");
        return (StatusCode::NOT_FOUND, "no such artifact\n").into_response();
    }

    // Suspend until the race settles. If the client goes away this
    // future is dropped and the guard aborts the in-flight fetches;
    // after a settled race the guard's firing is a no-op.
    let handle = state.downloader.download(&path, request_id);
    let _guard = CancelOnDisconnect(handle.cancel_hook());
    let outcome = handle.outcome().await;
    download_response(&method, &path, request_id, outcome).await
}

/// Serve a store hit, honoring `If-Modified-Since`.
async fn cached_response(
    method: &Method,
    request_headers: &HeaderMap,
    path: &ArtifactPath,
    artifact: &StoredArtifact,
) -> Response {
    let last_modified = httpdate::fmt_http_date(artifact.modified);

    if let Some(since) = if_modified_since(request_headers) {
        // Compare at whole-second precision, the header's resolution.
        if whole_seconds(artifact.modified) <= whole_seconds(since) {
            return (
                StatusCode::NOT_MODIFIED,
                AppendHeaders([
                    (header::LAST_MODIFIED, last_modified),
                    (header::CACHE_CONTROL, CACHE_PUBLIC.to_string()),
                ]),
            )
                .into_response();
        }
    }

    let headers = AppendHeaders([
        (header::CONTENT_TYPE, mime::content_type(path).to_string()),
        (header::LAST_MODIFIED, last_modified),
        (header::CACHE_CONTROL, CACHE_PUBLIC.to_string()),
        (header::CONTENT_LENGTH, artifact.len.to_string()),
    ]);

    if method == Method::HEAD {
        return (StatusCode::OK, headers, Body::empty()).into_response();
    }

    match tokio::fs::File::open(&artifact.file).await {
        Ok(file) => (
            StatusCode::OK,
            headers,
            Body::from_stream(ReaderStream::new(file)),
        )
            .into_response(),
        Err(e) => {
            warn!(file = ?artifact.file, error = %e, "cached artifact unreadable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "could not read cached artifact\n",
            )
                .into_response()
        }
    }
}

/// Turn a race outcome into the client response.
async fn download_response(
    method: &Method,
    path: &ArtifactPath,
    request_id: u64,
    outcome: Option<DownloadOutcome>,
) -> Response {
    match outcome {
        Some(DownloadOutcome::Complete {
            status,
            artifact,
            headers,
        }) => {
            info!(path = %path, id = request_id, cached = false, "fetch");
            let parts = AppendHeaders(download_headers(path, &headers));
            if method == Method::HEAD {
                return (status, parts, Body::empty()).into_response();
            }
            match tokio::fs::File::open(&artifact.file).await {
                Ok(file) => {
                    (status, parts, Body::from_stream(ReaderStream::new(file))).into_response()
                }
                Err(e) => {
                    warn!(file = ?artifact.file, error = %e, "published artifact unreadable");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "could not read downloaded artifact\n",
                    )
                        .into_response()
                }
            }
        }
        Some(DownloadOutcome::CompleteBuffered {
            status,
            body,
            headers,
        }) => {
            info!(path = %path, id = request_id, cached = false, "fetch");
            let parts = AppendHeaders(download_headers(path, &headers));
            if method == Method::HEAD {
                return (status, parts, Body::empty()).into_response();
            }
            (status, parts, Body::from(body)).into_response()
        }
        Some(DownloadOutcome::Failed { status }) => (
            status,
            format!("Not cached and could not download {path}\n"),
        )
            .into_response(),
        Some(DownloadOutcome::Error { status, message }) => {
            (status, format!("{message}\n")).into_response()
        }
        None => {
            // The race was abandoned; normally nobody is left to read
            // this response.
            warn!(path = %path, id = request_id, "download race abandoned");
            (StatusCode::INTERNAL_SERVER_ERROR, "download abandoned\n").into_response()
        }
    }
}

fn download_headers(
    path: &ArtifactPath,
    upstream: &HeaderMap,
) -> Vec<(header::HeaderName, String)> {
    let mut parts = vec![(
        header::CONTENT_TYPE,
        mime::content_type(path).to_string(),
    )];
    if let Some(last_modified) = upstream
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
    {
        parts.push((header::LAST_MODIFIED, last_modified.to_string()));
    }
    parts
}

fn flag(query: &HashMap<String, String>, name: &str) -> bool {
    query.get(name).is_some_and(|v| v == "true")
}

fn if_modified_since(headers: &HeaderMap) -> Option<SystemTime> {
    let value = headers.get(header::IF_MODIFIED_SINCE)?.to_str().ok()?;
    httpdate::parse_http_date(value).ok()
}

fn whole_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Aborts the race if the response future is dropped before it settles.
struct CancelOnDisconnect(CancelHook);

impl Drop for CancelOnDisconnect {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
