use futures::stream::StreamExt;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that end a feed fetch.
///
/// Only [`FailureKind::Transport`] failures are ever retried; everything else
/// surfaces on the first occurrence.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request or connection establishment exceeded its timeout
    #[error("Request timed out: {0}")]
    Timeout(String),
    /// Hostname could not be resolved, or a transport failure that was not retried
    #[error("Network error: {0}")]
    Network(String),
    /// TLS handshake or certificate failure
    #[error("TLS error: {0}")]
    Tls(String),
    /// Transient transport failures on every allowed attempt
    #[error("Giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request as a whole timed out.
    Timeout,
    /// DNS lookup failed.
    UnresolvedHost,
    /// The TCP connection could not be established in time.
    ConnectTimeout,
    /// TLS handshake failed.
    Tls,
    /// Any other I/O failure (refused, reset, truncated body, ...).
    Transport,
}

/// Decides whether a failed attempt may be repeated.
///
/// `attempt` is 1-based: the first request is attempt 1.
pub fn should_retry(kind: FailureKind, attempt: u32, max_attempts: u32, idempotent: bool) -> bool {
    if attempt >= max_attempts {
        return false;
    }
    match kind {
        FailureKind::Timeout
        | FailureKind::UnresolvedHost
        | FailureKind::ConnectTimeout
        | FailureKind::Tls => false,
        FailureKind::Transport => idempotent,
    }
}

/// Cause-message fragments hyper and hickory use for failed lookups.
const DNS_MARKERS: [&str; 4] = [
    "dns error",
    "failed to lookup address",
    "no record found",
    "name or service not known",
];

/// Cause-message fragments rustls uses for handshake and certificate failures.
const TLS_MARKERS: [&str; 5] = [
    "invalid peer certificate",
    "received fatal alert",
    "peer is incompatible",
    "peer misbehaved",
    "unsupported certificate",
];

/// Maps a reqwest error onto a [`FailureKind`].
///
/// reqwest only exposes timeout/connect flags, so the cause chain decides the
/// rest. See [`classify_causes`].
pub fn classify(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        return if err.is_connect() {
            FailureKind::ConnectTimeout
        } else {
            FailureKind::Timeout
        };
    }

    err.source()
        .map_or(FailureKind::Transport, classify_causes)
}

/// Classifies a cause chain.
///
/// An `io::Error` whose kind marks a dropped or refused connection settles it
/// as [`FailureKind::Transport`], whatever the messages say. Otherwise DNS and
/// TLS failures are recognized by the exact phrases their libraries emit.
fn classify_causes(first: &(dyn StdError + 'static)) -> FailureKind {
    let mut messages = Vec::new();
    let mut cause = Some(first);

    while let Some(err) = cause {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if is_connection_io_kind(io.kind()) {
                return FailureKind::Transport;
            }
        }
        messages.push(err.to_string().to_lowercase());
        cause = err.source();
    }

    let mentions = |markers: &[&str]| {
        messages
            .iter()
            .any(|m| markers.iter().any(|marker| m.contains(marker)))
    };
    if mentions(&DNS_MARKERS) {
        FailureKind::UnresolvedHost
    } else if mentions(&TLS_MARKERS) {
        FailureKind::Tls
    } else {
        FailureKind::Transport
    }
}

fn is_connection_io_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::AddrNotAvailable
    )
}

/// Joins the messages of every underlying cause, skipping the top-level error
/// (whose message embeds the request URL).
fn source_chain(err: &reqwest::Error) -> String {
    let mut parts = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

fn describe(err: &reqwest::Error) -> String {
    let causes = source_chain(err);
    if causes.is_empty() {
        err.to_string()
    } else {
        format!("{err}: {causes}")
    }
}

/// Tunables for [`RetryingFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    /// Total attempts including the first request.
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Delay before the first retry; doubled for each following retry.
    pub backoff: Duration,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            backoff: Duration::from_millis(1000),
        }
    }
}

/// Issues feed GET requests and retries transient transport failures.
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: reqwest::Client,
    max_attempts: u32,
    backoff: Duration,
}

enum AttemptError {
    Transport(reqwest::Error),
    Fatal(FetchError),
}

impl RetryingFetcher {
    /// Builds a fetcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the HTTP client cannot be constructed
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(settings: &FetcherSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .user_agent(concat!("arxiv-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network(describe(&e)))?;
        Ok(Self::with_client(client, settings))
    }

    /// Uses a caller-supplied client; its timeouts must be finite.
    fn with_client(client: reqwest::Client, settings: &FetcherSettings) -> Self {
        Self {
            client,
            max_attempts: settings.max_attempts.max(1),
            backoff: settings.backoff,
        }
    }

    /// Fetches `url` and returns the raw response body.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Timeout`] - request or connect timeout (never retried)
    /// - [`FetchError::Network`] - unresolved hostname (never retried)
    /// - [`FetchError::Tls`] - TLS handshake failure (never retried)
    /// - [`FetchError::Exhausted`] - transport failures on every attempt
    /// - [`FetchError::HttpStatus`] - non-2xx response (never retried)
    /// - [`FetchError::ResponseTooLarge`] - body exceeded 10MB
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut attempt: u32 = 1;

        loop {
            let err = match self.try_once(url).await {
                Ok(bytes) => {
                    tracing::debug!(url = %url, attempt = attempt, bytes = bytes.len(), "Fetched feed");
                    return Ok(bytes);
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transport(e)) => e,
            };

            let kind = classify(&err);
            // Only GET is issued, which carries no body and is always idempotent.
            if should_retry(kind, attempt, self.max_attempts, true) {
                let delay = self
                    .backoff
                    .saturating_mul(2u32.saturating_pow(attempt - 1));
                tracing::warn!(
                    url = %url,
                    attempt = attempt,
                    max_attempts = self.max_attempts,
                    kind = ?kind,
                    delay_ms = delay.as_millis() as u64,
                    error = %describe(&err),
                    "Transient fetch failure, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                continue;
            }

            return Err(self.give_up(kind, attempt, &err));
        }
    }

    fn give_up(&self, kind: FailureKind, attempt: u32, err: &reqwest::Error) -> FetchError {
        let detail = describe(err);
        match kind {
            FailureKind::Timeout | FailureKind::ConnectTimeout => FetchError::Timeout(detail),
            FailureKind::UnresolvedHost => FetchError::Network(detail),
            FailureKind::Tls => FetchError::Tls(detail),
            FailureKind::Transport if attempt >= self.max_attempts => FetchError::Exhausted {
                attempts: attempt,
                last: detail,
            },
            FailureKind::Transport => FetchError::Network(detail),
        }
    }

    async fn try_once(&self, url: &Url) -> Result<Vec<u8>, AttemptError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Fatal(FetchError::HttpStatus(status.as_u16())));
        }

        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, AttemptError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(AttemptError::Fatal(FetchError::ResponseTooLarge));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(AttemptError::Transport)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(AttemptError::Fatal(FetchError::ResponseTooLarge));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ATOM: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom"><entry><id>urn:1</id><title>T</title></entry></feed>"#;

    fn settings(max_attempts: u32) -> FetcherSettings {
        FetcherSettings {
            max_attempts,
            request_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(500),
            backoff: Duration::ZERO,
        }
    }

    fn closed_port_url() -> Url {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Url::parse(&format!("http://127.0.0.1:{port}/api/query")).unwrap()
    }

    #[test]
    fn test_fatal_kinds_never_retry() {
        for kind in [
            FailureKind::Timeout,
            FailureKind::UnresolvedHost,
            FailureKind::ConnectTimeout,
            FailureKind::Tls,
        ] {
            assert!(!should_retry(kind, 1, 5, true), "{:?} should not retry", kind);
        }
    }

    #[test]
    fn test_transport_retries_until_max() {
        assert!(should_retry(FailureKind::Transport, 1, 5, true));
        assert!(should_retry(FailureKind::Transport, 4, 5, true));
        assert!(!should_retry(FailureKind::Transport, 5, 5, true));
        assert!(!should_retry(FailureKind::Transport, 6, 5, true));
    }

    #[test]
    fn test_non_idempotent_transport_not_retried() {
        assert!(!should_retry(FailureKind::Transport, 1, 5, false));
    }

    #[tokio::test]
    async fn test_fetch_success_sends_query() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("sortBy", "lastUpdatedDate"))
            .and(query_param("search_query", "cat:cs.AI OR cat:cs.LG"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(ATOM)
                    .insert_header("Content-Type", "application/atom+xml"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let query = crate::feed::FeedQuery {
            base_url: format!("{}/api/query", mock_server.uri()),
            max_results: 10,
            categories: "cs.AI,cs.LG".to_string(),
        };
        let fetcher = RetryingFetcher::new(&settings(5)).unwrap();

        let bytes = fetcher.fetch(&query.url().unwrap()).await.unwrap();
        assert_eq!(bytes, ATOM.as_bytes());
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = RetryingFetcher::new(&settings(5)).unwrap();
        let url = Url::parse(&format!("{}/api/query", mock_server.uri())).unwrap();

        match fetcher.fetch(&url).await {
            Err(FetchError::Timeout(_)) => {}
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_fails_closed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = RetryingFetcher::new(&settings(5)).unwrap();
        let url = Url::parse(&format!("{}/api/query", mock_server.uri())).unwrap();

        match fetcher.fetch(&url).await {
            Err(FetchError::HttpStatus(503)) => {}
            other => panic!("Expected HttpStatus(503), got {:?}", other),
        }
    }

    #[test]
    fn test_connection_io_kind_wins_over_message() {
        let err = std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "received fatal alert: HandshakeFailure",
        );
        assert_eq!(classify_causes(&err), FailureKind::Transport);
    }

    #[test]
    fn test_rustls_failures_classified_as_tls() {
        let cert = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid peer certificate: UnknownIssuer",
        );
        assert_eq!(classify_causes(&cert), FailureKind::Tls);

        let alert = std::io::Error::other("received fatal alert: HandshakeFailure");
        assert_eq!(classify_causes(&alert), FailureKind::Tls);
    }

    #[test]
    fn test_loose_tls_words_stay_transport() {
        for message in [
            "connection closed before tls session was established by proxy",
            "alert: upstream closed stream",
            "handshake with proxy aborted",
            "certificate store reloaded",
        ] {
            let err = std::io::Error::other(message);
            assert_eq!(classify_causes(&err), FailureKind::Transport, "{message}");
        }
    }

    #[test]
    fn test_dns_failure_classified_as_unresolved() {
        let err = std::io::Error::other("dns error: failed to lookup address information");
        assert_eq!(classify_causes(&err), FailureKind::UnresolvedHost);
    }

    #[tokio::test]
    async fn test_refused_connection_classified_as_transport() {
        let client = reqwest::Client::new();
        let err = client.get(closed_port_url()).send().await.unwrap_err();
        assert_eq!(classify(&err), FailureKind::Transport);
    }

    #[tokio::test]
    async fn test_transport_failure_exhausts_attempts() {
        let fetcher = RetryingFetcher::new(&settings(3)).unwrap();

        match fetcher.fetch(&closed_port_url()).await {
            Err(FetchError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_attempt_budget_exhausts_immediately() {
        let fetcher = RetryingFetcher::new(&settings(1)).unwrap();

        match fetcher.fetch(&closed_port_url()).await {
            Err(FetchError::Exhausted { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; MAX_FEED_SIZE + 1]))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = RetryingFetcher::new(&settings(5)).unwrap();
        let url = Url::parse(&mock_server.uri()).unwrap();

        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(FetchError::ResponseTooLarge)
        ));
    }
}
