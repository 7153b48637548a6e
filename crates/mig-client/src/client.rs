//! Resilient call client
//!
//! Executes one logical remote call:
//! - resolves the URL against the session's base URL and appends `api-version`
//! - attaches the auth header from a fresh [`AuthHandle`](crate::session::AuthHandle)
//! - retries 429/500/502/503/504 and transport failures with exponential backoff
//! - returns every other non-accepted status immediately as a terminal
//!   [`NormalizedError`]
//! - logs one redacted line per attempt when the session is verbose

use crate::error::{CallResult, ErrorKind, NormalizedError, System};
use crate::retry::{AttemptOutcome, RetryPolicy, RetryableCall};
use crate::session::SessionContext;
use crate::transport::{HttpTransport, ReqwestTransport, TransportFailure, TransportRequest, TransportResponse};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Non-2xx statuses returned as `Ok` instead of errors
    pub accept: Vec<u16>,
    /// Per-attempt timeout override
    pub timeout: Option<Duration>,
}

/// One logical remote call
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Target system
    pub system: System,
    /// HTTP method
    pub method: Method,
    /// Path relative to the system's base URL, starting with `/`
    pub path: String,
    /// Extra query parameters (`api-version` is added automatically)
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<serde_json::Value>,
    /// Options
    pub options: CallOptions,
}

impl CallRequest {
    /// Create request
    #[must_use]
    pub fn new(system: System, method: Method, path: impl Into<String>) -> Self {
        Self {
            system,
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            options: CallOptions::default(),
        }
    }

    /// GET request
    #[inline]
    #[must_use]
    pub fn get(system: System, path: impl Into<String>) -> Self {
        Self::new(system, Method::GET, path)
    }

    /// POST request with JSON body
    #[inline]
    #[must_use]
    pub fn post(system: System, path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(system, Method::POST, path).with_body(body)
    }

    /// PATCH request with JSON body
    #[inline]
    #[must_use]
    pub fn patch(system: System, path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(system, Method::PATCH, path).with_body(body)
    }

    /// PUT request with JSON body
    #[inline]
    #[must_use]
    pub fn put(system: System, path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(system, Method::PUT, path).with_body(body)
    }

    /// DELETE request
    #[inline]
    #[must_use]
    pub fn delete(system: System, path: impl Into<String>) -> Self {
        Self::new(system, Method::DELETE, path)
    }

    /// With JSON body
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// With query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Treat `status` as a non-error outcome
    #[must_use]
    pub fn accept(mut self, status: u16) -> Self {
        self.options.accept.push(status);
        self
    }

    /// With per-attempt timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Whether this request mutates remote state
    #[inline]
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Successful (or accepted) response
#[derive(Debug, Clone)]
pub struct CallResponse {
    /// Status code
    pub status: u16,
    /// Parsed JSON body, if any
    pub body: Option<serde_json::Value>,
    /// Response headers
    pub headers: HeaderMap,
    /// Attempt trace
    pub trace: RetryableCall,
}

impl CallResponse {
    /// Whether the status is 2xx
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body
    ///
    /// # Errors
    /// `InvalidResponse` when the body is missing or has the wrong shape.
    pub fn json<T: DeserializeOwned>(&self, system: System) -> CallResult<T> {
        let endpoint = format!("{} {}", self.trace.method, self.trace.path);
        let body = self.body.clone().ok_or_else(|| {
            NormalizedError::new(system, endpoint.clone(), ErrorKind::InvalidResponse, "empty response body")
        })?;
        serde_json::from_value(body).map_err(|e| {
            NormalizedError::new(system, endpoint, ErrorKind::InvalidResponse, format!("unexpected response shape: {e}"))
        })
    }
}

/// Typed existence probe
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// Resource exists
    Found(T),
    /// Known absence (404)
    Absent,
}

impl<T> Probe<T> {
    /// Found value, if any
    #[inline]
    pub fn found(self) -> Option<T> {
        match self {
            Probe::Found(v) => Some(v),
            Probe::Absent => None,
        }
    }

    /// Whether the resource was absent
    #[inline]
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Probe::Absent)
    }
}

/// Resilient client over an [`HttpTransport`]
#[derive(Clone)]
pub struct CallClient {
    session: Arc<SessionContext>,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for CallClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallClient")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl CallClient {
    /// Create client over a transport
    #[inline]
    #[must_use]
    pub fn new(session: Arc<SessionContext>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { session, transport }
    }

    /// Create client over reqwest
    ///
    /// # Errors
    /// When the HTTP client cannot be built.
    pub fn with_reqwest(session: Arc<SessionContext>) -> CallResult<Self> {
        let transport = ReqwestTransport::from_session(&session)?;
        Ok(Self::new(session, Arc::new(transport)))
    }

    /// Session handle
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Execute a call with retry
    ///
    /// # Errors
    /// Terminal statuses immediately; retryable statuses and transport failures
    /// once the retry budget is exhausted.
    pub async fn call(&self, request: CallRequest) -> CallResult<CallResponse> {
        let redactor = self.session.redactor().clone();
        let endpoint = redactor.redact(&request.endpoint()).into_owned();
        let url = self.resolve(&request, &endpoint)?;
        let policy = self.session.retry_policy();
        let timeout = request
            .options
            .timeout
            .unwrap_or(self.session.timeouts().request);
        let mut trace = RetryableCall::new(request.method.as_str(), redactor.redact(&request.path).into_owned());
        let mut retry: u32 = 0;

        loop {
            let auth = self.session.auth(request.system).map_err(|mut e| {
                e.endpoint.clone_from(&endpoint);
                e
            })?;
            let mut headers = vec![(ACCEPT, HeaderValue::from_static("application/json"))];
            headers.push((auth.header_name().clone(), auth.header_value().clone()));
            let transport_request = TransportRequest {
                method: request.method.clone(),
                url: url.clone(),
                headers,
                body: request.body.clone(),
                timeout,
            };

            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, self.transport.send(transport_request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportFailure::Timeout(timeout)),
            };
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let attempt = retry + 1;

            let (error, retry_after) = match result {
                Ok(response) => {
                    trace.attempts.push(AttemptOutcome::Status { code: response.status });
                    self.log_attempt(&request, &endpoint, attempt, Some(&response), None, elapsed_ms);

                    let status = response.status;
                    if (200..300).contains(&status) || request.options.accept.contains(&status) {
                        return Ok(CallResponse {
                            status,
                            body: parse_body(&response.body),
                            headers: response.headers,
                            trace,
                        });
                    }

                    let retry_after = retry_after_secs(&response.headers);
                    let message = redactor.redact_body(&response.body);
                    let error = NormalizedError::from_status(request.system, endpoint.clone(), status, message);
                    if !RetryPolicy::is_retryable_status(status) {
                        return Err(error);
                    }
                    (error, retry_after)
                }
                Err(failure) => {
                    let message = redactor.redact(&failure.to_string()).into_owned();
                    trace.attempts.push(AttemptOutcome::TransportFailure { message: message.clone() });
                    self.log_attempt(&request, &endpoint, attempt, None, Some(&message), elapsed_ms);
                    let kind = match failure {
                        TransportFailure::Timeout(_) => ErrorKind::Timeout,
                        _ => ErrorKind::TransientNetwork,
                    };
                    (NormalizedError::new(request.system, endpoint.clone(), kind, message), None)
                }
            };

            if retry >= policy.attempts {
                warn!(
                    system = %request.system,
                    endpoint = %endpoint,
                    attempts = attempt,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(error);
            }

            retry += 1;
            let mut delay = policy.delay_for(retry);
            if let Some(secs) = retry_after {
                delay = delay.max(Duration::from_secs(secs));
            }
            warn!(
                system = %request.system,
                endpoint = %endpoint,
                attempt,
                retry,
                max_retries = policy.attempts,
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "Retrying after transient failure"
            );
            trace.delays.push(delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// GET and deserialize
    ///
    /// # Errors
    /// Any call error, or `InvalidResponse` when the body does not parse.
    pub async fn get_json<T: DeserializeOwned>(&self, system: System, path: impl Into<String>) -> CallResult<T> {
        let response = self.call(CallRequest::get(system, path)).await?;
        response.json(system)
    }

    /// Existence probe: 404 becomes [`Probe::Absent`]
    ///
    /// # Errors
    /// Any other call error.
    pub async fn probe<T: DeserializeOwned>(&self, request: CallRequest) -> CallResult<Probe<T>> {
        let system = request.system;
        let response = self.call(request.accept(404)).await?;
        if response.status == 404 {
            return Ok(Probe::Absent);
        }
        response.json(system).map(Probe::Found)
    }

    fn resolve(&self, request: &CallRequest, endpoint: &str) -> CallResult<Url> {
        let invalid = |message: String| {
            NormalizedError::new(request.system, endpoint, ErrorKind::Validation, message)
        };
        let base = self
            .session
            .base_url(request.system)
            .ok_or_else(|| invalid("system has no base URL".to_string()))?;
        let version = self
            .session
            .api_version(request.system)
            .ok_or_else(|| invalid("system has no API version".to_string()))?;

        let joined = format!("{}{}", base.as_str().trim_end_matches('/'), request.path);
        let mut url = Url::parse(&joined).map_err(|e| invalid(format!("invalid request path: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("api-version", version);
        }
        Ok(url)
    }

    fn log_attempt(
        &self,
        request: &CallRequest,
        endpoint: &str,
        attempt: u32,
        response: Option<&TransportResponse>,
        failure: Option<&str>,
        elapsed_ms: u64,
    ) {
        if !self.session.verbose() {
            return;
        }
        let redactor = self.session.redactor();
        let request_body = request
            .body
            .as_ref()
            .map(|b| redactor.redact_body(&b.to_string()))
            .unwrap_or_default();
        match response {
            Some(response) => info!(
                system = %request.system,
                endpoint = %endpoint,
                attempt,
                status = response.status,
                elapsed_ms,
                request_body = %request_body,
                response_body = %redactor.redact_body(&response.body),
                "Remote call attempt"
            ),
            None => info!(
                system = %request.system,
                endpoint = %endpoint,
                attempt,
                elapsed_ms,
                request_body = %request_body,
                failure = failure.unwrap_or_default(),
                "Remote call attempt failed before response"
            ),
        }
    }
}

fn parse_body(body: &str) -> Option<serde_json::Value> {
    if body.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_string())))
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
