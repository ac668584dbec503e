//! # Upstream Fetch
//!
//! One streaming HTTP GET against one upstream. The body goes straight
//! to a uniquely named temp file in the OS temp directory; the caller
//! receives the temp file handle on success and is responsible for
//! promotion. The temp file unlinks itself on drop, which covers every
//! loss, error, and cancellation path, including task abort.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

/// Terminal success: the full body is on disk, not yet promoted.
#[derive(Debug)]
pub struct FetchSuccess {
    pub upstream: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Self-deleting temp file holding the body.
    pub body: TempPath,
}

/// Terminal failure of one upstream fetch.
///
/// `status` carries the upstream HTTP status when one was observed;
/// transport errors and timeouts report the 500 equivalent.
#[derive(Debug)]
pub struct FetchFailure {
    pub upstream: Url,
    pub status: Option<StatusCode>,
}

impl FetchFailure {
    fn transport(upstream: Url) -> Self {
        Self {
            upstream,
            status: Some(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

/// Fetch `url` and stream the body to a temp file.
///
/// Success requires a `200 OK` or `203 Non-Authoritative` header; any
/// other status is terminal failure. Redirects are followed by the
/// client itself, so a 3xx surfacing here means the hop limit was
/// exceeded and is treated as failure. The whole exchange is bounded
/// by `timeout`.
pub(crate) async fn fetch_upstream(
    client: &Client,
    url: Url,
    timeout: Duration,
    download_id: &str,
) -> Result<FetchSuccess, FetchFailure> {
    let response = match client.get(url.clone()).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(url = %url, dlid = download_id, error = %e, "upstream request failed");
            return Err(FetchFailure::transport(url));
        }
    };

    let status = response.status();
    match status {
        StatusCode::OK | StatusCode::NON_AUTHORITATIVE_INFORMATION => {}
        s if s.is_redirection() => {
            warn!(url = %url, status = %s, "redirect not followed, hop limit exceeded");
            return Err(FetchFailure {
                upstream: url,
                status: Some(s),
            });
        }
        s => {
            debug!(url = %url, dlid = download_id, status = %s, "upstream refused path");
            return Err(FetchFailure {
                upstream: url,
                status: Some(s),
            });
        }
    }

    // Success-starting header: only now does the temp file exist.
    let headers = response.headers().clone();
    let (mut file, body) = match open_temp(download_id) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(url = %url, error = %e, "could not create download temp file");
            return Err(FetchFailure::transport(url));
        }
    };

    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(url = %url, dlid = download_id, error = %e, "body stream interrupted");
                return Err(FetchFailure::transport(url));
            }
        };
        if let Err(e) = file.write_all(&bytes).await {
            warn!(url = %url, error = %e, "could not write download temp file");
            return Err(FetchFailure::transport(url));
        }
        written += bytes.len() as u64;
    }
    if let Err(e) = file.flush().await {
        warn!(url = %url, error = %e, "could not flush download temp file");
        return Err(FetchFailure::transport(url));
    }

    debug!(url = %url, dlid = download_id, size = written, status = %status, "upstream body received");
    Ok(FetchSuccess {
        upstream: url,
        status,
        headers,
        body,
    })
}

fn open_temp(download_id: &str) -> std::io::Result<(tokio::fs::File, TempPath)> {
    let prefix = format!("artery-dl-{}-", download_id.replace(':', "-"));
    let named = tempfile::Builder::new().prefix(&prefix).tempfile()?;
    let file = tokio::fs::File::from_std(named.as_file().try_clone()?);
    Ok((file, named.into_temp_path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn serve(status: u16, body: &[u8]) -> (MockServer, Url) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/g/a/1/a-1.jar"))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/g/a/1/a-1.jar", server.uri())).unwrap();
        (server, url)
    }

    #[tokio::test]
    async fn ok_streams_body_to_temp_file() {
        let (_server, url) = serve(200, b"artifact-bytes").await;
        let client = Client::new();

        let success = fetch_upstream(&client, url.clone(), TIMEOUT, "t:0")
            .await
            .expect("200 should succeed");
        assert_eq!(success.status, StatusCode::OK);
        assert_eq!(success.upstream, url);
        assert_eq!(std::fs::read(&success.body).unwrap(), b"artifact-bytes");
    }

    #[tokio::test]
    async fn temp_file_unlinks_on_drop() {
        let (_server, url) = serve(200, b"x").await;
        let client = Client::new();
        let success = fetch_upstream(&client, url, TIMEOUT, "t:1").await.unwrap();
        let kept = success.body.to_path_buf();
        drop(success);
        assert!(!kept.exists(), "loser temp files must not survive");
    }

    #[tokio::test]
    async fn non_authoritative_is_success() {
        let (_server, url) = serve(203, b"mirrored").await;
        let client = Client::new();
        let success = fetch_upstream(&client, url, TIMEOUT, "t:2").await.unwrap();
        assert_eq!(success.status, StatusCode::NON_AUTHORITATIVE_INFORMATION);
    }

    #[tokio::test]
    async fn http_errors_report_their_status() {
        for code in [404u16, 403, 500, 503] {
            let (_server, url) = serve(code, b"").await;
            let client = Client::new();
            let failure = fetch_upstream(&client, url, TIMEOUT, "t:3")
                .await
                .expect_err("status >= 400 must fail");
            assert_eq!(failure.status, Some(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[tokio::test]
    async fn unexpected_success_status_fails() {
        let (_server, url) = serve(204, b"").await;
        let client = Client::new();
        let failure = fetch_upstream(&client, url, TIMEOUT, "t:4").await.unwrap_err();
        assert_eq!(failure.status, Some(StatusCode::NO_CONTENT));
    }

    #[tokio::test]
    async fn transport_error_maps_to_internal_error() {
        let client = Client::new();
        // Nothing listens here.
        let url = Url::parse("http://127.0.0.1:1/g/a.jar").unwrap();
        let failure = fetch_upstream(&client, url, TIMEOUT, "t:5").await.unwrap_err();
        assert_eq!(failure.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn deadline_expiry_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/slow.jar", server.uri())).unwrap();
        let client = Client::new();

        let failure = fetch_upstream(&client, url, Duration::from_millis(100), "t:6")
            .await
            .unwrap_err();
        assert_eq!(failure.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
