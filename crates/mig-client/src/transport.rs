//! HTTP transport seam
//!
//! [`HttpTransport`] is the only place bytes leave the process. The call
//! client drives retries and logging on top of it; tests substitute an
//! in-memory implementation.

use crate::error::{ErrorKind, NormalizedError, System};
use crate::session::{CertificatePolicy, SessionContext};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::sync::Once;
use std::time::Duration;
use url::Url;

static CERTIFICATE_BYPASS_WARNING: Once = Once::new();

/// One HTTP request, fully resolved
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Method
    pub method: Method,
    /// Absolute URL including query
    pub url: Url,
    /// Headers (auth header marked sensitive)
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// JSON body
    pub body: Option<serde_json::Value>,
    /// Wall-clock limit for this attempt
    pub timeout: Duration,
}

impl TransportRequest {
    /// Header value by name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// Raw response
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Body text (may be empty)
    pub body: String,
}

impl TransportResponse {
    /// Build a JSON response
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    /// Build an empty-bodied response
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

/// Failure before any status was received
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
    /// Attempt exceeded its wall-clock limit
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Could not connect
    #[error("connection failed: {0}")]
    Connect(String),

    /// Anything else below HTTP
    #[error("request failed: {0}")]
    Other(String),
}

/// Sends one request
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request; no retries at this layer
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build from certificate policy
    ///
    /// # Errors
    /// When the TLS backend cannot be initialised.
    pub fn new(certificates: CertificatePolicy) -> Result<Self, NormalizedError> {
        let bypass = certificates == CertificatePolicy::Bypass;
        if bypass {
            CERTIFICATE_BYPASS_WARNING.call_once(|| {
                tracing::warn!(
                    "Certificate validation is DISABLED; connections are vulnerable to interception"
                );
            });
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(bypass)
            .user_agent(concat!("mig/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                NormalizedError::new(
                    System::Local,
                    "http-client",
                    ErrorKind::Validation,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self { client })
    }

    /// Build from a session's certificate policy
    ///
    /// # Errors
    /// When the TLS backend cannot be initialised.
    pub fn from_session(session: &SessionContext) -> Result<Self, NormalizedError> {
        Self::new(session.certificate_policy())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.clone(), value.clone());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| classify(e, request.timeout))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| classify(e, request.timeout))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportFailure {
    let is_timeout = error.is_timeout();
    let is_connect = error.is_connect();
    // The URL may carry query credentials.
    let message = error.without_url().to_string();
    if is_timeout {
        TransportFailure::Timeout(timeout)
    } else if is_connect {
        TransportFailure::Connect(message)
    } else {
        TransportFailure::Other(message)
    }
}
