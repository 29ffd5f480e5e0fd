use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub database: String,
    pub sql: String,
    pub timeout: Duration,
}

/// A response body read incrementally, so callers can stop early.
#[async_trait]
pub trait ResponseBody: Send {
    /// Next raw chunk, `None` once the body is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportFailure>;
}

/// A body already held in memory, handed out as a single chunk.
#[derive(Debug, Default)]
pub struct BufferedBody {
    remaining: Option<Vec<u8>>,
}

impl BufferedBody {
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            remaining: (!body.is_empty()).then_some(body),
        }
    }
}

#[async_trait]
impl ResponseBody for BufferedBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportFailure> {
        Ok(self.remaining.take())
    }
}

pub struct TransportResponse {
    pub status: u16,
    pub body: Box<dyn ResponseBody>,
}

impl TransportResponse {
    #[must_use]
    pub fn buffered(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: Box::new(BufferedBody::new(body)),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Reads at most `max_bytes` of the body as lossy UTF-8 and drops the rest.
    pub async fn read_text(&mut self, max_bytes: usize) -> Result<String, TransportFailure> {
        let mut collected = Vec::new();
        while collected.len() < max_bytes {
            let Some(chunk) = self.body.next_chunk().await? else {
                break;
            };
            let room = max_bytes - collected.len();
            collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportFailure {
    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Connection(String),
}

/// One request/response exchange with the query backend.
///
/// Implementations must not retry; the executor sends exactly one request per run.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure>;
}

/// Posts the SQL as a `text/plain` body with the database in the `db` query parameter.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    auth_header: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: &str, auth_header: Option<String>) -> Result<Self, TransportFailure> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| TransportFailure::Connection(format!("http client: {error}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .query(&[("db", request.database.as_str())])
            .header(CONTENT_TYPE, "text/plain")
            .timeout(request.timeout)
            .body(request.sql);
        if let Some(auth_header) = &self.auth_header {
            builder = builder.header(AUTHORIZATION, auth_header);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        tracing::debug!(status, "backend response headers received");

        Ok(TransportResponse {
            status,
            body: Box::new(HttpBody(response)),
        })
    }
}

struct HttpBody(reqwest::Response);

#[async_trait]
impl ResponseBody for HttpBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportFailure> {
        let chunk = self.0.chunk().await.map_err(map_reqwest_error)?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportFailure {
    if error.is_timeout() {
        TransportFailure::Timeout
    } else {
        TransportFailure::Connection(error.to_string())
    }
}
