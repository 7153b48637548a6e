//! MIG Client - remote calls for project migrations
//!
//! The layer every other crate talks to the outside world through:
//! - [`SessionContext`] holds endpoints, credentials and policy for one run
//!   and tears them down on every exit path
//! - [`CallClient`] executes calls with retry, backoff and error normalization
//! - [`Redactor`] keeps tokens out of every log line
//! - [`SourceApi`] / [`DestinationApi`] wrap the two platforms' endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use mig_client::prelude::*;
//! use secrecy::SecretString;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(
//!     SessionContext::builder()
//!         .source("https://gitlab.example.com", SecretString::from("glpat-...".to_string()))
//!         .destination("https://dev.example.com/org", SecretString::from("pat".to_string()))
//!         .build()?,
//! );
//! let _guard = SessionGuard::new(session.clone());
//! let client = CallClient::with_reqwest(session)?;
//! let project = SourceApi::new(client).project("group/app").await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod api;
pub mod client;
pub mod error;
pub mod redact;
pub mod retry;
pub mod session;
pub mod transport;

pub use api::{DestinationApi, SourceApi};
pub use client::{CallClient, CallOptions, CallRequest, CallResponse, Probe};
pub use error::{CallResult, ErrorKind, NormalizedError, System};
pub use redact::{Redactor, MASK};
pub use retry::{AttemptOutcome, RetryPolicy, RetryableCall};
pub use session::{
    ApiVersion, AuthHandle, CertificatePolicy, CredentialScrubber, SessionBuilder, SessionContext,
    SessionError, SessionGuard, Timeouts,
};
pub use transport::{HttpTransport, ReqwestTransport, TransportFailure, TransportRequest, TransportResponse};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with MIG Client
    pub use crate::{
        CallClient, CallRequest, CallResult, DestinationApi, ErrorKind, NormalizedError, Probe,
        RetryPolicy, SessionContext, SessionGuard, SourceApi, System,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
