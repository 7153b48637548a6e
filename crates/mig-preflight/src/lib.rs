//! MIG Preflight - readiness checks before any mutation
//!
//! Gathers source metadata (size, default branch, refs, large-object usage),
//! probes the destination for collisions and both platforms for credential
//! validity, and classifies the result into a [`PreflightReport`]:
//!
//! | Condition | Severity |
//! |---|---|
//! | Missing/invalid credentials | Blocking |
//! | Source project inaccessible | Blocking |
//! | Destination has history, no replace/sync intent | Blocking |
//! | Oversized repository without large-object storage | Warning |

#![warn(unreachable_pub)]

pub mod report;
pub mod validator;

pub use report::{Finding, FindingCode, PreflightMetrics, PreflightReport, Severity, REPORT_SCHEMA_VERSION};
pub use validator::{DestinationRef, PreflightRequest, PreflightValidator, DEFAULT_OVERSIZE_THRESHOLD};
