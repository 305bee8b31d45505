use crate::config::FetchConfig;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Failures before any status line was received.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// No response within the fetch deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Transport failure reported by a non-HTTP fetcher
    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Failures while consuming a response body.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Body stream failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Body exceeded the configured size limit
    #[error("Response too large: limit is {limit} bytes")]
    TooLarge { limit: usize },
    /// Fewer bytes arrived than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
    /// Body did not finish arriving within the read deadline
    #[error("Body read timed out after {0:?}")]
    Timeout(Duration),
}

/// A response whose status is known and whose body has not been read yet.
#[async_trait]
pub trait FetchedResponse: Send {
    fn status(&self) -> u16;

    /// Consumes the whole body.
    async fn read_body(self: Box<Self>) -> Result<Vec<u8>, ReadError>;
}

/// The fetch capability the sync pipeline consumes.
///
/// Implementations own their timeout, TLS and redirect policy. A deadline
/// expiring must surface as a [`TransportError`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Box<dyn FetchedResponse>, TransportError>;
}

/// [`Fetcher`] over a `reqwest::Client`.
///
/// `timeout` is applied twice, as two separate deadlines: once to `send()`
/// (up to the status line and headers), reported as
/// [`TransportError::Timeout`], and once to reading the body, reported as
/// [`ReadError::Timeout`]. The client itself carries no whole-request timeout,
/// so a slow body can never surface as a transport failure.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpFetcher {
    /// Wraps an existing client (caller controls its configuration).
    pub fn new(client: reqwest::Client, timeout: Duration, max_bytes: usize) -> Self {
        Self {
            client,
            timeout,
            max_bytes,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self::new(client, timeout, config.max_feed_bytes))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Box<dyn FetchedResponse>, TransportError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(url.as_str()).send())
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(TransportError::Network)?;

        Ok(Box::new(HttpResponse {
            response,
            limit: self.max_bytes,
            timeout: self.timeout,
        }))
    }
}

struct HttpResponse {
    response: reqwest::Response,
    limit: usize,
    timeout: Duration,
}

#[async_trait]
impl FetchedResponse for HttpResponse {
    fn status(&self) -> u16 {
        self.response.status().as_u16()
    }

    async fn read_body(self: Box<Self>) -> Result<Vec<u8>, ReadError> {
        tokio::time::timeout(self.timeout, read_limited_bytes(self.response, self.limit))
            .await
            .map_err(|_| ReadError::Timeout(self.timeout))?
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ReadError> {
    let expected_length = response.content_length();

    // Fast path: Content-Length already over the limit
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(ReadError::TooLarge { limit });
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ReadError::TooLarge { limit });
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(ReadError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
