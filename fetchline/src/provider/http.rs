//! Reqwest-backed [`Fetcher`].

use crate::config::DownloadSettings;
use crate::error::FetchError;
use crate::request::NetworkKey;
use crate::traits::{CancelProbe, Fetcher, ProgressSink};
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, trace};

/// Cap on the up-front buffer reservation taken from `Content-Length`.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Streams response bodies over HTTP(S).
///
/// Non-success statuses become [`FetchError::Http`]; timeouts become
/// [`FetchError::Timeout`]. Progress is reported after every chunk and the
/// cancel probe is checked before each one.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher with the given overall request timeout.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Creates a fetcher from the `[download]` section.
    pub fn from_settings(settings: &DownloadSettings) -> Result<Self, FetchError> {
        Self::new(Duration::from_secs(settings.timeout), &settings.user_agent)
    }

    async fn fetch_body(
        &self,
        key: &NetworkKey,
        progress: ProgressSink,
        cancel: CancelProbe,
    ) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(key.as_str())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            debug!(key = %key, status = status.as_u16(), "HTTP request failed");
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut body = BytesMut::with_capacity(total.unwrap_or(0).min(MAX_PREALLOCATION) as usize);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            if cancel.is_canceled() {
                trace!(key = %key, received = body.len(), "Transfer abandoned");
                return Err(FetchError::Canceled);
            }
            let chunk = chunk.map_err(map_reqwest_error)?;
            body.extend_from_slice(&chunk);
            progress.report(body.len() as u64, total);
        }

        trace!(key = %key, bytes = body.len(), "Transfer complete");
        Ok(body.freeze())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        key: &'a NetworkKey,
        progress: ProgressSink,
        cancel: CancelProbe,
    ) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(self.fetch_body(key, progress, cancel))
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = e.status() {
        FetchError::Http {
            status: status.as_u16(),
        }
    } else if e.is_connect() || e.is_request() || e.is_body() {
        FetchError::Io(e.to_string())
    } else {
        FetchError::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the URL to hit.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/resource", addr)
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5), "fetchline-test").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;

        let body = fetcher()
            .fetch(&NetworkKey::new(&url), ProgressSink::noop(), CancelProbe::never())
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let err = fetcher()
            .fetch(&NetworkKey::new(&url), ProgressSink::noop(), CancelProbe::never())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Http { status: 404 });
    }

    #[tokio::test]
    async fn test_connection_refused_is_io() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher()
            .fetch(
                &NetworkKey::new(&format!("http://{}/", addr)),
                ProgressSink::noop(),
                CancelProbe::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Io(_)), "got {err:?}");
    }

    #[test]
    fn test_from_settings() {
        let fetcher = HttpFetcher::from_settings(&DownloadSettings::default()).unwrap();
        assert_eq!(fetcher.name(), "http");
    }
}
