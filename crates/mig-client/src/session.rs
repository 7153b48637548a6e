//! Session context
//!
//! Holds everything a migration run needs to talk to both platforms:
//! - endpoint base URLs and API versions
//! - credentials, kept as [`SecretString`] and only reachable through an
//!   [`AuthHandle`]
//! - retry, timeout and certificate policy
//!
//! The context is built once, shared as `Arc<SessionContext>`, and torn down
//! with [`SessionContext::clear`]. [`SessionGuard`] makes teardown run on every
//! exit path.

use crate::error::{ErrorKind, NormalizedError, System};
use crate::redact::Redactor;
use crate::retry::RetryPolicy;
use base64::Engine as _;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use zeroize::Zeroize;

/// Default source API version query value
pub const DEFAULT_SOURCE_API_VERSION: &str = "4";

/// Session construction errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Destination API version outside the supported set
    #[error("unsupported destination API version '{0}' (supported: 6.0, 7.0, 7.1)")]
    UnsupportedApiVersion(String),

    /// Base URL missing, unparsable or not http(s)
    #[error("invalid {system} endpoint '{url}': {reason}")]
    InvalidEndpoint {
        /// System the endpoint belongs to
        system: System,
        /// Offending value
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Token missing or empty
    #[error("missing {0} credential")]
    MissingCredential(System),
}

/// Supported destination API versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiVersion {
    /// 6.0
    V6_0,
    /// 7.0
    V7_0,
    /// 7.1
    V7_1,
}

impl ApiVersion {
    /// All supported versions
    pub const SUPPORTED: [ApiVersion; 3] = [ApiVersion::V6_0, ApiVersion::V7_0, ApiVersion::V7_1];

    /// Query-string value
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V6_0 => "6.0",
            ApiVersion::V7_0 => "7.0",
            ApiVersion::V7_1 => "7.1",
        }
    }
}

impl Default for ApiVersion {
    fn default() -> Self {
        ApiVersion::V7_1
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiVersion {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApiVersion::SUPPORTED
            .iter()
            .copied()
            .find(|v| v.as_str() == s.trim())
            .ok_or_else(|| SessionError::UnsupportedApiVersion(s.to_string()))
    }
}

/// TLS certificate validation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificatePolicy {
    /// Validate certificates (default)
    #[default]
    Strict,
    /// Accept invalid certificates; emits a one-time warning
    Bypass,
}

/// Hard wall-clock limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Per-attempt limit for remote API calls
    pub request: Duration,
    /// Per-command limit for content transfer
    pub transfer: Duration,
    /// Limit for one round of transient credential scrubbing
    pub scrub: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(60),
            transfer: Duration::from_secs(3600),
            scrub: Duration::from_secs(30),
        }
    }
}

/// Something on disk that may hold an embedded credential
///
/// Registered by the content-transfer layer; run by the session on teardown.
pub trait CredentialScrubber: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Remove embedded credentials; best effort
    fn scrub(&self) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy)]
enum AuthScheme {
    /// `PRIVATE-TOKEN: <token>`
    PrivateToken,
    /// `Authorization: Basic base64(":" + token)`
    BasicPat,
}

struct PlatformSession {
    base_url: Url,
    api_version: String,
    scheme: AuthScheme,
    secret: RwLock<Option<SecretString>>,
}

impl PlatformSession {
    fn new(base_url: Url, api_version: String, scheme: AuthScheme, token: SecretString) -> Self {
        Self {
            base_url,
            api_version,
            scheme,
            secret: RwLock::new(Some(token)),
        }
    }
}

/// Scoped handle for building an auth header
///
/// The raw token is only inside a sensitive [`HeaderValue`]; the handle has no
/// `Display` or `Serialize` implementation and its `Debug` output is masked.
#[derive(Clone)]
pub struct AuthHandle {
    name: HeaderName,
    value: HeaderValue,
}

impl AuthHandle {
    /// Header name to send
    #[inline]
    #[must_use]
    pub fn header_name(&self) -> &HeaderName {
        &self.name
    }

    /// Header value to send (marked sensitive)
    #[inline]
    #[must_use]
    pub fn header_value(&self) -> &HeaderValue {
        &self.value
    }

    /// Compare against an expected header value without exposing ours
    #[must_use]
    pub fn matches(&self, expected: &str) -> bool {
        self.value.as_bytes() == expected.as_bytes()
    }
}

impl fmt::Debug for AuthHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHandle")
            .field("header", &self.name.as_str())
            .field("value", &crate::redact::MASK)
            .finish()
    }
}

/// Credentials, endpoints and policy for one run
pub struct SessionContext {
    source: PlatformSession,
    destination: PlatformSession,
    destination_version: ApiVersion,
    retry: RetryPolicy,
    certificates: CertificatePolicy,
    timeouts: Timeouts,
    verbose: bool,
    redactor: Redactor,
    scrubbers: Mutex<Vec<Arc<dyn CredentialScrubber>>>,
    cleared: AtomicBool,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("source", &self.source.base_url.as_str())
            .field("destination", &self.destination.base_url.as_str())
            .field("api_version", &self.destination_version)
            .field("retry", &self.retry)
            .field("certificates", &self.certificates)
            .field("cleared", &self.is_cleared())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Start building a session
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    fn platform(&self, system: System) -> Option<&PlatformSession> {
        match system {
            System::Source => Some(&self.source),
            System::Destination => Some(&self.destination),
            System::Transport | System::Local => None,
        }
    }

    /// Base URL for a system
    #[must_use]
    pub fn base_url(&self, system: System) -> Option<&Url> {
        self.platform(system).map(|p| &p.base_url)
    }

    /// API version query value for a system
    #[must_use]
    pub fn api_version(&self, system: System) -> Option<&str> {
        self.platform(system).map(|p| p.api_version.as_str())
    }

    /// Destination API version
    #[inline]
    #[must_use]
    pub fn destination_version(&self) -> ApiVersion {
        self.destination_version
    }

    /// Retry policy
    #[inline]
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Certificate policy
    #[inline]
    #[must_use]
    pub fn certificate_policy(&self) -> CertificatePolicy {
        self.certificates
    }

    /// Timeouts
    #[inline]
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Whether per-attempt logging is enabled
    #[inline]
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Redactor preloaded with this session's secrets
    #[inline]
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Whether [`clear`](Self::clear) has run
    #[inline]
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }

    /// Auth header handle for a system
    ///
    /// # Errors
    /// `Authorization` error when the session was cleared or the system has no
    /// credentials.
    pub fn auth(&self, system: System) -> Result<AuthHandle, NormalizedError> {
        let platform = self.platform(system).ok_or_else(|| {
            NormalizedError::new(system, "auth", ErrorKind::Authorization, "no credentials for system")
        })?;
        let guard = platform.secret.read();
        let secret = guard.as_ref().ok_or_else(|| {
            NormalizedError::new(system, "auth", ErrorKind::Authorization, "session credentials cleared")
        })?;

        let (name, mut raw) = match platform.scheme {
            AuthScheme::PrivateToken => (
                HeaderName::from_static("private-token"),
                secret.expose_secret().to_string(),
            ),
            AuthScheme::BasicPat => {
                let mut pair = format!(":{}", secret.expose_secret());
                let encoded = base64::engine::general_purpose::STANDARD.encode(pair.as_bytes());
                pair.zeroize();
                (AUTHORIZATION, format!("Basic {encoded}"))
            }
        };

        let value = HeaderValue::from_str(&raw);
        raw.zeroize();
        let mut value = value.map_err(|_| {
            NormalizedError::new(system, "auth", ErrorKind::Authorization, "credential is not a valid header value")
        })?;
        value.set_sensitive(true);
        Ok(AuthHandle { name, value })
    }

    /// `Authorization` header line for the version-control transport
    ///
    /// Both platforms accept Basic auth over git HTTP. The line is meant for
    /// the child process environment, never for a remote URL or argv.
    ///
    /// # Errors
    /// `Authorization` when cleared or the system has no credentials.
    pub fn transport_header(&self, system: System) -> Result<SecretString, NormalizedError> {
        let platform = self.platform(system).ok_or_else(|| {
            NormalizedError::new(system, "auth", ErrorKind::Authorization, "no credentials for system")
        })?;
        let guard = platform.secret.read();
        let secret = guard.as_ref().ok_or_else(|| {
            NormalizedError::new(system, "auth", ErrorKind::Authorization, "session credentials cleared")
        })?;

        let user = match platform.scheme {
            AuthScheme::PrivateToken => "oauth2",
            AuthScheme::BasicPat => "mig",
        };
        let mut pair = format!("{user}:{}", secret.expose_secret());
        let encoded = base64::engine::general_purpose::STANDARD.encode(pair.as_bytes());
        pair.zeroize();
        self.redactor.register(&encoded);
        Ok(SecretString::from(format!("Authorization: Basic {encoded}")))
    }

    /// Register an on-disk location that may hold an embedded credential
    pub fn register_scrubber(&self, scrubber: Arc<dyn CredentialScrubber>) {
        self.scrubbers.lock().push(scrubber);
    }

    /// Run every registered scrubber without touching in-memory credentials
    ///
    /// Returns the number of scrubbers that failed; failures are logged, never
    /// propagated.
    pub fn scrub_transient(&self) -> usize {
        let scrubbers: Vec<_> = std::mem::take(&mut *self.scrubbers.lock());
        let mut failures = 0;
        for scrubber in scrubbers {
            match scrubber.scrub() {
                Ok(()) => tracing::debug!(location = %scrubber.describe(), "Scrubbed transient credentials"),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(location = %scrubber.describe(), error = %e, "Failed to scrub transient credentials");
                }
            }
        }
        failures
    }

    /// Tear down: zero in-memory secrets and scrub transient stores
    ///
    /// Idempotent. Never fails; scrubber failures are logged.
    pub fn clear(&self) {
        let first = !self.cleared.swap(true, Ordering::SeqCst);
        // Dropping a SecretString zeroizes its buffer.
        drop(self.source.secret.write().take());
        drop(self.destination.secret.write().take());
        let failures = self.scrub_transient();
        self.redactor.forget_all();
        if first {
            tracing::info!(scrub_failures = failures, "Session credentials cleared");
        }
    }
}

/// Calls [`SessionContext::clear`] when dropped
///
/// Hold one for the lifetime of a run so teardown happens on early returns,
/// `?` propagation and unwinding panics alike.
#[derive(Debug)]
pub struct SessionGuard {
    session: Arc<SessionContext>,
}

impl SessionGuard {
    /// Guard a session
    #[inline]
    #[must_use]
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self { session }
    }

    /// Shared session handle
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }
}

impl std::ops::Deref for SessionGuard {
    type Target = SessionContext;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.clear();
    }
}

/// Builder for [`SessionContext`]
#[derive(Default)]
pub struct SessionBuilder {
    source_url: Option<String>,
    source_token: Option<SecretString>,
    source_api_version: Option<String>,
    destination_url: Option<String>,
    destination_token: Option<SecretString>,
    api_version: Option<String>,
    retry: RetryPolicy,
    certificates: CertificatePolicy,
    timeouts: Timeouts,
    verbose: bool,
}

impl SessionBuilder {
    /// Source endpoint and token
    #[must_use]
    pub fn source(mut self, base_url: impl Into<String>, token: SecretString) -> Self {
        self.source_url = Some(base_url.into());
        self.source_token = Some(token);
        self
    }

    /// Source API version query value (default "4")
    #[must_use]
    pub fn source_api_version(mut self, version: impl Into<String>) -> Self {
        self.source_api_version = Some(version.into());
        self
    }

    /// Destination endpoint and token
    #[must_use]
    pub fn destination(mut self, base_url: impl Into<String>, token: SecretString) -> Self {
        self.destination_url = Some(base_url.into());
        self.destination_token = Some(token);
        self
    }

    /// Destination API version; validated in [`build`](Self::build)
    #[must_use]
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Retry policy
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Disable certificate validation
    #[must_use]
    pub fn skip_certificate_validation(mut self, skip: bool) -> Self {
        self.certificates = if skip {
            CertificatePolicy::Bypass
        } else {
            CertificatePolicy::Strict
        };
        self
    }

    /// Timeouts
    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Per-attempt logging
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    /// Unsupported API version, invalid endpoint, or missing credential.
    pub fn build(self) -> Result<SessionContext, SessionError> {
        let destination_version = match self.api_version.as_deref() {
            Some(v) => v.parse::<ApiVersion>()?,
            None => ApiVersion::default(),
        };

        let source_url = parse_endpoint(System::Source, self.source_url.as_deref())?;
        let destination_url = parse_endpoint(System::Destination, self.destination_url.as_deref())?;
        let source_token = require_token(System::Source, self.source_token)?;
        let destination_token = require_token(System::Destination, self.destination_token)?;

        let redactor = Redactor::new();
        redactor.register(source_token.expose_secret());
        redactor.register(destination_token.expose_secret());

        Ok(SessionContext {
            source: PlatformSession::new(
                source_url,
                self.source_api_version
                    .unwrap_or_else(|| DEFAULT_SOURCE_API_VERSION.to_string()),
                AuthScheme::PrivateToken,
                source_token,
            ),
            destination: PlatformSession::new(
                destination_url,
                destination_version.as_str().to_string(),
                AuthScheme::BasicPat,
                destination_token,
            ),
            destination_version,
            retry: self.retry,
            certificates: self.certificates,
            timeouts: self.timeouts,
            verbose: self.verbose,
            redactor,
            scrubbers: Mutex::new(Vec::new()),
            cleared: AtomicBool::new(false),
        })
    }
}

fn parse_endpoint(system: System, raw: Option<&str>) -> Result<Url, SessionError> {
    let raw = raw.ok_or_else(|| SessionError::InvalidEndpoint {
        system,
        url: String::new(),
        reason: "not configured".to_string(),
    })?;
    let url = Url::parse(raw).map_err(|e| SessionError::InvalidEndpoint {
        system,
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SessionError::InvalidEndpoint {
            system,
            url: raw.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(SessionError::InvalidEndpoint {
            system,
            url: url.host_str().unwrap_or_default().to_string(),
            reason: "credentials must not be embedded in the base URL".to_string(),
        });
    }
    Ok(url)
}

fn require_token(system: System, token: Option<SecretString>) -> Result<SecretString, SessionError> {
    match token {
        Some(t) if !t.expose_secret().trim().is_empty() => Ok(t),
        _ => Err(SessionError::MissingCredential(system)),
    }
}
