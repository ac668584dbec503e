//! # Download Race Coordinator
//!
//! Fans one artifact path out to every configured upstream in parallel,
//! keeps the first success and cancels the rest. The winning body is
//! promoted into the [`ArtifactStore`]; a path that fails on every
//! upstream is recorded in the [`FailedPathCache`].
//!
//! Fetch tasks report exactly one terminal [`FetchEvent`] over an mpsc
//! channel to a coordinator task, which owns the abort handles. The
//! caller gets a [`DownloadHandle`]: a one-shot outcome receiver plus a
//! [`CancelHook`] to wire into client-disconnect teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::failcache::FailedPathCache;
use crate::fetch::{self, FetchFailure, FetchSuccess};
use crate::ids;
use crate::path::ArtifactPath;
use crate::store::{ArtifactStore, StoredArtifact};

/// Terminal outcome of a download race. Delivered exactly once.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// First upstream success; the body has been promoted into the store.
    Complete {
        status: StatusCode,
        artifact: StoredArtifact,
        headers: HeaderMap,
    },
    /// Success with the body still in memory. Produced by callers of the
    /// in-memory publish variant; the race itself always lands bodies on
    /// disk and reports [`DownloadOutcome::Complete`].
    CompleteBuffered {
        status: StatusCode,
        body: Bytes,
        headers: HeaderMap,
    },
    /// Every upstream failed. `status` is the last failing upstream's
    /// status, or 404 when none was observed.
    Failed { status: StatusCode },
    /// Local storage failure while promoting the winner. The path is
    /// not negative-cached; the next request retries.
    Error { status: StatusCode, message: String },
}

enum FetchEvent {
    Success(FetchSuccess),
    Failure(FetchFailure),
}

/// Shared race bookkeeping, also read by the cancel hook.
struct RaceState {
    /// One-shot winner flag; flipped by exactly one success.
    won: AtomicBool,
    /// Upstream fetches that have not yet reported a terminal outcome.
    remaining: AtomicUsize,
    /// Live fetch tasks by upstream URL, for cancelling losers.
    fetches: Mutex<HashMap<Url, AbortHandle>>,
}

impl RaceState {
    fn new(count: usize) -> Self {
        Self {
            won: AtomicBool::new(false),
            remaining: AtomicUsize::new(count),
            fetches: Mutex::new(HashMap::with_capacity(count)),
        }
    }

    fn register(&self, url: Url, handle: AbortHandle) {
        self.fetches.lock().unwrap().insert(url, handle);
    }

    fn forget(&self, url: &Url) {
        self.fetches.lock().unwrap().remove(url);
    }

    fn cancel_losers(&self, winner: &Url) {
        let mut fetches = self.fetches.lock().unwrap();
        for (url, handle) in fetches.drain() {
            if &url != winner {
                handle.abort();
            }
        }
    }

    fn cancel_all(&self) -> usize {
        let mut fetches = self.fetches.lock().unwrap();
        let count = fetches.len();
        for (_, handle) in fetches.drain() {
            handle.abort();
        }
        count
    }
}

/// Aborts every still-live fetch of one race.
///
/// Installed by the request handler on client disconnect. Once the race
/// has settled `remaining` is zero and firing is a no-op, so the hook
/// can be dropped unconditionally after the response is written.
#[derive(Clone)]
pub struct CancelHook {
    state: Arc<RaceState>,
}

impl CancelHook {
    pub fn cancel(&self) {
        if self.state.remaining.load(Ordering::SeqCst) > 0 {
            let cancelled = self.state.cancel_all();
            if cancelled > 0 {
                debug!(cancelled, "cancelled in-flight upstream fetches");
            }
        }
    }
}

/// One-shot resume guard around the outcome channel.
///
/// A second resume is a programming error and panics; losing the
/// receiver (client gone) is not, and is ignored.
struct Resumer {
    resumed: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<DownloadOutcome>>>,
}

impl Resumer {
    fn new(tx: oneshot::Sender<DownloadOutcome>) -> Self {
        Self {
            resumed: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        }
    }

    fn resume(&self, outcome: DownloadOutcome) {
        if self
            .resumed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            panic!("download resumed twice");
        }
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(outcome);
        }
    }
}

/// An in-flight download race.
pub struct DownloadHandle {
    download_id: String,
    cancel: CancelHook,
    outcome: oneshot::Receiver<DownloadOutcome>,
}

impl DownloadHandle {
    /// The `"<SID>:<n>"` id of this race, for log correlation.
    pub fn download_id(&self) -> &str {
        &self.download_id
    }

    /// Hook for aborting the race when the client goes away.
    pub fn cancel_hook(&self) -> CancelHook {
        self.cancel.clone()
    }

    /// Wait for the terminal outcome. `None` means the race was
    /// abandoned (cancelled, or its coordinator died) and no outcome
    /// will ever arrive.
    pub async fn outcome(self) -> Option<DownloadOutcome> {
        self.outcome.await.ok()
    }
}

/// Issues download races against the configured upstreams.
pub struct Downloader {
    client: Client,
    store: ArtifactStore,
    failed_paths: FailedPathCache,
    upstreams: Vec<Url>,
    fetch_timeout: Duration,
}

impl Downloader {
    /// Build a downloader and its HTTP client.
    ///
    /// The client follows up to 10 redirect hops on its own, so 3xx
    /// responses normally never reach the fetch state machine.
    pub fn new(config: DownloadConfig, store: ArtifactStore) -> Result<Self, DownloadError> {
        if config.upstreams.is_empty() {
            return Err(DownloadError::NoUpstreams);
        }
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .pool_max_idle_per_host(5)
            .build()?;

        let mut upstreams = config.upstreams;
        for base in &mut upstreams {
            // Normalize so that Url::join appends instead of replacing
            // the last path segment.
            if !base.path().ends_with('/') {
                let path = format!("{}/", base.path());
                base.set_path(&path);
            }
        }

        Ok(Self {
            client,
            store,
            failed_paths: FailedPathCache::new(config.failed_path_ttl),
            upstreams,
            fetch_timeout: config.fetch_timeout,
        })
    }

    /// True iff `path` recently failed on every upstream. Callers check
    /// this before starting a race; a listed path answers 404 without
    /// any upstream traffic.
    pub fn is_failed_path(&self, path: &ArtifactPath) -> bool {
        self.failed_paths.is_failed(path)
    }

    /// Start a download race for `path`.
    ///
    /// Returns immediately; the race runs on spawned tasks and reports
    /// through the returned handle exactly once.
    pub fn download(&self, path: &ArtifactPath, request_id: u64) -> DownloadHandle {
        let download_id = ids::next_download_id();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let resumer = Resumer::new(outcome_tx);

        let urls: Vec<Url> = self
            .upstreams
            .iter()
            .filter_map(|base| match base.join(path.as_str()) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(base = %base, path = %path, error = %e, "skipping unjoinable upstream");
                    None
                }
            })
            .collect();

        let state = Arc::new(RaceState::new(urls.len()));
        let handle = DownloadHandle {
            download_id: download_id.clone(),
            cancel: CancelHook {
                state: Arc::clone(&state),
            },
            outcome: outcome_rx,
        };

        if urls.is_empty() {
            // Nothing to race; resolve without touching the negative
            // cache, since no upstream actually answered.
            resumer.resume(DownloadOutcome::Failed {
                status: StatusCode::NOT_FOUND,
            });
            return handle;
        }

        let (events_tx, events_rx) = mpsc::channel(urls.len());
        for url in urls {
            debug!(url = %url, dlid = %download_id, "attempting upstream");
            let client = self.client.clone();
            let events = events_tx.clone();
            let dlid = download_id.clone();
            let timeout = self.fetch_timeout;
            let task_url = url.clone();
            let task = tokio::spawn(async move {
                let event = match fetch::fetch_upstream(&client, task_url, timeout, &dlid).await {
                    Ok(success) => FetchEvent::Success(success),
                    Err(failure) => FetchEvent::Failure(failure),
                };
                let _ = events.send(event).await;
            });
            state.register(url, task.abort_handle());
        }
        drop(events_tx);

        let race = Race {
            state,
            resumer,
            store: self.store.clone(),
            failed_paths: self.failed_paths.clone(),
            path: path.clone(),
            download_id,
            request_id,
        };
        tokio::spawn(race.run(events_rx));

        handle
    }
}

struct Race {
    state: Arc<RaceState>,
    resumer: Resumer,
    store: ArtifactStore,
    failed_paths: FailedPathCache,
    path: ArtifactPath,
    download_id: String,
    request_id: u64,
}

impl Race {
    async fn run(self, mut events: mpsc::Receiver<FetchEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                FetchEvent::Success(success) => {
                    if self
                        .state
                        .won
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        // A second success in the same instant; dropping
                        // it unlinks its temp file.
                        continue;
                    }
                    self.state.remaining.store(0, Ordering::SeqCst);
                    self.state.cancel_losers(&success.upstream);
                    self.promote(success).await;
                    return;
                }
                FetchEvent::Failure(failure) => {
                    if self.state.won.load(Ordering::SeqCst) {
                        continue;
                    }
                    self.state.forget(&failure.upstream);
                    let remaining = self.state.remaining.fetch_sub(1, Ordering::SeqCst) - 1;
                    info!(
                        dlid = %self.download_id,
                        url = %failure.upstream,
                        status = ?failure.status,
                        "upstream fetch failed"
                    );
                    if remaining == 0 {
                        info!(
                            dlid = %self.download_id,
                            path = %self.path,
                            id = self.request_id,
                            "all upstream fetches failed"
                        );
                        self.failed_paths.mark_failed(&self.path);
                        self.resumer.resume(DownloadOutcome::Failed {
                            status: failure.status.unwrap_or(StatusCode::NOT_FOUND),
                        });
                        return;
                    }
                }
            }
        }
        // Every sender is gone without a terminal outcome: the race was
        // cancelled, or a fetch task died. Either way there is nobody
        // left to answer; resuming now would fabricate a result.
        debug!(dlid = %self.download_id, path = %self.path, "race abandoned before completion");
    }

    async fn promote(self, success: FetchSuccess) {
        let FetchSuccess {
            upstream,
            status,
            headers,
            body,
        } = success;
        let last_modified = parse_last_modified(&headers);
        match self.store.publish_file(&self.path, &body, last_modified).await {
            Ok(artifact) => {
                let server = headers
                    .get(reqwest::header::SERVER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                info!(
                    dlid = %self.download_id,
                    id = self.request_id,
                    path = %self.path,
                    from = %upstream,
                    size = artifact.len,
                    status = %status,
                    server,
                    "download complete"
                );
                self.resumer.resume(DownloadOutcome::Complete {
                    status,
                    artifact,
                    headers,
                });
            }
            Err(e) => {
                error!(
                    dlid = %self.download_id,
                    path = %self.path,
                    error = %e,
                    "could not store downloaded artifact"
                );
                self.resumer.resume(DownloadOutcome::Error {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: e.to_string(),
                });
            }
        }
        // `body` dropped here: the fetch temp file is gone whether or
        // not promotion succeeded.
    }
}

/// Upstream `Last-Modified`, already whole-second precision per RFC 7231.
fn parse_last_modified(headers: &HeaderMap) -> Option<SystemTime> {
    headers
        .get(reqwest::header::LAST_MODIFIED)?
        .to_str()
        .ok()
        .and_then(|value| httpdate::parse_http_date(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_modified_parses_rfc_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::LAST_MODIFIED,
            "Wed, 21 Oct 2020 07:28:00 GMT".parse().unwrap(),
        );
        let parsed = parse_last_modified(&headers).unwrap();
        let secs = parsed
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(secs, 1_603_265_280);
    }

    #[test]
    fn last_modified_absent_or_garbage_is_none() {
        let headers = HeaderMap::new();
        assert!(parse_last_modified(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::LAST_MODIFIED, "not a date".parse().unwrap());
        assert!(parse_last_modified(&headers).is_none());
    }

    #[test]
    #[should_panic(expected = "download resumed twice")]
    fn double_resume_panics() {
        let (tx, _rx) = oneshot::channel();
        let resumer = Resumer::new(tx);
        resumer.resume(DownloadOutcome::Failed {
            status: StatusCode::NOT_FOUND,
        });
        resumer.resume(DownloadOutcome::Failed {
            status: StatusCode::NOT_FOUND,
        });
    }

    #[test]
    fn resume_without_receiver_is_silent() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let resumer = Resumer::new(tx);
        resumer.resume(DownloadOutcome::Failed {
            status: StatusCode::NOT_FOUND,
        });
    }
}
