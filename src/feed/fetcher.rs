use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::parser::{parse_page, ParseError};
use super::FeedPage;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving a feed page or enclosure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// HTTP response with non-2xx status code
    #[error("HTTP error from {url}: status {status}")]
    HttpStatus { url: String, status: u16 },
    /// Request exceeded the configured timeout
    #[error("Request to {0} timed out")]
    Timeout(String),
    /// Document could not be parsed as a feed
    #[error("Parse error in {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },
    /// A link could not be resolved or points somewhere it must not
    #[error("Invalid link '{href}': {reason}")]
    InvalidLink { href: String, reason: String },
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response from {url} exceeds {limit} bytes")]
    ResponseTooLarge { url: String, limit: usize },
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Pagination went on longer than the configured page limit
    #[error("Feed has more than {0} pages")]
    TooManyPages(usize),
    /// Server demanded authentication we could not satisfy
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Authentication failures, kept apart from other fetch errors so callers
/// can tell "fix your credentials" from "the source is down".
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{url} requires authentication and no credentials are configured")]
    Required { url: String },
    #[error("{url} rejected the configured credentials for user '{username}'")]
    Rejected { url: String, username: String },
}

/// HTTP Basic credentials for a protected feed source.
///
/// The password is masked in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Explicit transport settings passed to [`FeedClient`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub credentials: Option<Credentials>,
    /// Host the credentials belong to. Credentials are never sent while
    /// this is unset; [`Walker::with_client`](super::Walker::with_client)
    /// fills it in from the feed URL.
    pub realm_host: Option<String>,
    /// Deadline for a whole request, body included.
    pub timeout: Duration,
    /// Retries for 429, 5xx and truncated bodies.
    pub max_retries: u32,
    /// Seconds of backoff before the first retry; doubles each time.
    pub backoff_base_secs: u64,
    pub max_file_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            realm_host: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base_secs: 2,
            max_file_size: 512 * 1024 * 1024,
        }
    }
}

/// HTTP client for feed pages and enclosure content.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    config: TransportConfig,
}

impl FeedClient {
    pub fn new(config: TransportConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|source| FetchError::Network {
                url: String::new(),
                source,
            })?;
        Ok(Self { http, config })
    }

    /// Pins the credential realm to `host` unless one was configured.
    pub(crate) fn bind_realm(&mut self, host: Option<&str>) {
        if self.config.realm_host.is_none() {
            self.config.realm_host = host.map(str::to_string);
        }
    }

    /// Fetches and parses one feed page.
    ///
    /// `trusted_host` is the root feed's host; enclosure links leaving it are
    /// checked against private address ranges.
    pub async fn fetch_page(
        &self,
        url: &Url,
        trusted_host: Option<&str>,
    ) -> Result<FeedPage, FetchError> {
        let bytes = self.get_bytes(url, MAX_FEED_SIZE).await?;
        let page = parse_page(&bytes, url, trusted_host).map_err(|source| FetchError::Parse {
            url: url.to_string(),
            source,
        })?;
        tracing::debug!(
            page = %url,
            entries = page.entries.len(),
            has_previous = page.previous.is_some(),
            "Fetched feed page"
        );
        Ok(page)
    }

    /// Downloads enclosure content, bounded by `max_file_size`.
    pub async fn fetch_content(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        self.get_bytes(url, self.config.max_file_size).await
    }

    fn credentials_for(&self, url: &Url) -> Option<&Credentials> {
        let creds = self.config.credentials.as_ref()?;
        let realm = self.config.realm_host.as_deref()?;
        (url.host_str() == Some(realm)).then_some(creds)
    }

    async fn get_bytes(&self, url: &Url, limit: usize) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;
        let credentials = self.credentials_for(url);

        loop {
            let mut request = self.http.get(url.clone());
            if let Some(creds) = credentials {
                request = request.basic_auth(&creds.username, Some(creds.password.expose_secret()));
            }

            let response = tokio::time::timeout(self.config.timeout, request.send())
                .await
                .map_err(|_| FetchError::Timeout(url.to_string()))?
                .map_err(|source| network_error(url, source))?;

            let status = response.status();

            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(match credentials {
                    None => CredentialError::Required {
                        url: url.to_string(),
                    },
                    Some(creds) => CredentialError::Rejected {
                        url: url.to_string(),
                        username: creds.username.clone(),
                    },
                }
                .into());
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= self.config.max_retries {
                    return Err(FetchError::RateLimited(self.config.max_retries));
                }
                let delay_secs = self.backoff(retry_count);
                tracing::warn!(
                    url = %url,
                    retry = retry_count,
                    delay_secs = delay_secs,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= self.config.max_retries {
                    return Err(FetchError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                let delay_secs = self.backoff(retry_count);
                tracing::warn!(
                    url = %url,
                    status = %status,
                    retry = retry_count,
                    delay_secs = delay_secs,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                retry_count += 1;
                continue;
            }

            // 4xx other than auth fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            match read_limited_bytes(url, response, limit).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= self.config.max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }
                    let delay_secs = self.backoff(retry_count);
                    tracing::debug!(
                        url = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        delay_secs = delay_secs,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, retry_count: u32) -> u64 {
        self.config.backoff_base_secs.saturating_mul(1u64 << retry_count.min(16))
    }
}

fn network_error(url: &Url, source: reqwest::Error) -> FetchError {
    if source.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Network {
            url: url.to_string(),
            source,
        }
    }
}

async fn read_limited_bytes(
    url: &Url,
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();
    let too_large = || FetchError::ResponseTooLarge {
        url: url.to_string(),
        limit,
    };

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(too_large());
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| network_error(url, source))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, basic_auth, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_ATOM: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>tag:example.test,2011:datasets</id>
  <title>Test</title>
  <updated>2011-01-01T00:00:00Z</updated>
  <entry><id>1</id><title>Test</title><updated>2011-01-01T00:00:00Z</updated></entry>
</feed>"#;

    fn fast_config() -> TransportConfig {
        TransportConfig {
            backoff_base_secs: 0,
            ..TransportConfig::default()
        }
    }

    fn feed_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/datasets.atom", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_page_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/datasets.atom"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_ATOM)
                    .insert_header("Content-Type", "application/atom+xml"),
            )
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(fast_config()).unwrap();
        let page = client.fetch_page(&feed_url(&mock_server), None).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.context.title, "Test");
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(fast_config()).unwrap();
        let result = client.fetch_page(&feed_url(&mock_server), None).await;
        match result.unwrap_err() {
            FetchError::HttpStatus { status: 404, .. } => {}
            e => panic!("Expected HttpStatus 404, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_500_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(fast_config()).unwrap();
        let result = client.fetch_page(&feed_url(&mock_server), None).await;
        match result.unwrap_err() {
            FetchError::HttpStatus { status: 500, .. } => {}
            e => panic!("Expected HttpStatus 500, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_503_retry_then_success() {
        let mock_server = MockServer::start().await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_ATOM))
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(fast_config()).unwrap();
        let page = client.fetch_page(&feed_url(&mock_server), None).await.unwrap();
        assert_eq!(page.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(fast_config()).unwrap();
        let result = client.fetch_page(&feed_url(&mock_server), None).await;
        assert!(matches!(result, Err(FetchError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_401_without_credentials_is_required() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Basic realm=\"Test\""),
            )
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(fast_config()).unwrap();
        let result = client.fetch_page(&feed_url(&mock_server), None).await;
        assert!(matches!(
            result,
            Err(FetchError::Credential(CredentialError::Required { .. }))
        ));
    }

    #[tokio::test]
    async fn test_basic_auth_attached() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(basic_auth("username", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_ATOM))
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(TransportConfig {
            credentials: Some(Credentials::new("username", "password")),
            realm_host: Some("127.0.0.1".to_string()),
            ..fast_config()
        })
        .unwrap();
        let page = client.fetch_page(&feed_url(&mock_server), None).await.unwrap();
        assert_eq!(page.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_credentials_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(basic_auth("username", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_ATOM))
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(TransportConfig {
            credentials: Some(Credentials::new("username", "wrong")),
            realm_host: Some("127.0.0.1".to_string()),
            ..fast_config()
        })
        .unwrap();
        let result = client.fetch_page(&feed_url(&mock_server), None).await;
        match result.unwrap_err() {
            FetchError::Credential(CredentialError::Rejected { username, .. }) => {
                assert_eq!(username, "username");
            }
            e => panic!("Expected Rejected, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_credentials_not_sent_outside_realm() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(TransportConfig {
            credentials: Some(Credentials::new("username", "password")),
            realm_host: Some("data.example.org".to_string()),
            ..fast_config()
        })
        .unwrap();
        let result = client.fetch_page(&feed_url(&mock_server), None).await;
        assert!(matches!(
            result,
            Err(FetchError::Credential(CredentialError::Required { .. }))
        ));
    }

    #[tokio::test]
    async fn test_credentials_not_sent_without_realm() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(TransportConfig {
            credentials: Some(Credentials::new("username", "password")),
            ..fast_config()
        })
        .unwrap();
        let url = Url::parse(&format!("{}/files/data.bin", mock_server.uri())).unwrap();
        assert_eq!(client.fetch_content(&url).await.unwrap(), b"payload");

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_slow_body_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 64])
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(TransportConfig {
            timeout: Duration::from_millis(200),
            ..fast_config()
        })
        .unwrap();
        let url = Url::parse(&format!("{}/files/slow.bin", mock_server.uri())).unwrap();
        let result = client.fetch_content(&url).await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_content_size_limit() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&mock_server)
            .await;

        let client = FeedClient::new(TransportConfig {
            max_file_size: 16,
            ..fast_config()
        })
        .unwrap();
        let url = Url::parse(&format!("{}/big.bin", mock_server.uri())).unwrap();
        let result = client.fetch_content(&url).await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge { limit: 16, .. })));
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let creds = Credentials::new("username", "hunter2");
        let debug_output = format!("{:?}", creds);
        assert!(!debug_output.contains("hunter2"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
