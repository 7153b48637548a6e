//! Preflight report model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current persisted schema version
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Info,
    /// Proceeds, but needs operator attention
    Warning,
    /// Prevents the unit from starting without an override
    Blocking,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Blocking => "blocking",
        })
    }
}

/// Stable finding codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCode {
    /// A token was rejected
    CredentialsInvalid,
    /// Source project missing or unreadable
    SourceInaccessible,
    /// Destination repository has commits and no replace/sync intent
    DestinationHasHistory,
    /// Destination history will be replaced
    DestinationHistoryReplace,
    /// Destination history will be synced onto
    DestinationHistorySync,
    /// Destination repository exists but is empty
    DestinationRepositoryExists,
    /// Destination project will be created
    DestinationProjectMissing,
    /// Repository above the size threshold without large-object storage
    OversizedWithoutLfs,
    /// Source uses large-object storage
    LargeObjectsPresent,
    /// Source repository has no refs
    SourceEmpty,
    /// Destination could not be queried
    DestinationUnreachable,
}

impl FindingCode {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCode::CredentialsInvalid => "credentials_invalid",
            FindingCode::SourceInaccessible => "source_inaccessible",
            FindingCode::DestinationHasHistory => "destination_has_history",
            FindingCode::DestinationHistoryReplace => "destination_history_replace",
            FindingCode::DestinationHistorySync => "destination_history_sync",
            FindingCode::DestinationRepositoryExists => "destination_repository_exists",
            FindingCode::DestinationProjectMissing => "destination_project_missing",
            FindingCode::OversizedWithoutLfs => "oversized_without_lfs",
            FindingCode::LargeObjectsPresent => "large_objects_present",
            FindingCode::SourceEmpty => "source_empty",
            FindingCode::DestinationUnreachable => "destination_unreachable",
        }
    }
}

impl fmt::Display for FindingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One readiness finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Severity
    pub severity: Severity,
    /// Stable code
    pub code: FindingCode,
    /// Human-readable message
    pub message: String,
}

impl Finding {
    /// Create new finding
    #[inline]
    #[must_use]
    pub fn new(severity: Severity, code: FindingCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
        }
    }

    /// Blocking finding
    #[inline]
    #[must_use]
    pub fn blocking(code: FindingCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Blocking, code, message)
    }

    /// Warning finding
    #[inline]
    #[must_use]
    pub fn warning(code: FindingCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    /// Informational finding
    #[inline]
    #[must_use]
    pub fn info(code: FindingCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }
}

/// Metrics gathered from the source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightMetrics {
    /// Repository size in bytes
    pub repository_size_bytes: u64,
    /// Large-object storage usage in bytes
    pub lfs_size_bytes: u64,
    /// Bytes expected to need large-object handling
    pub large_object_estimate: u64,
    /// Default branch
    pub default_branch: Option<String>,
    /// Branch names
    pub branches: Vec<String>,
    /// Tag names
    pub tags: Vec<String>,
    /// Whether large-object storage is enabled on the source
    pub lfs_enabled: bool,
}

/// Immutable result of one preflight pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    /// Schema version
    pub schema_version: u32,
    /// Source project path
    pub source: String,
    /// Destination `<project>/<repository>`, if one was given
    pub destination: Option<String>,
    /// When the report was produced
    pub generated_at: DateTime<Utc>,
    /// Findings in evaluation order
    pub findings: Vec<Finding>,
    /// Source metrics
    pub metrics: PreflightMetrics,
    /// True iff no blocking finding exists
    pub passed: bool,
}

impl PreflightReport {
    /// Build report; `passed` is derived from the findings
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        destination: Option<String>,
        findings: Vec<Finding>,
        metrics: PreflightMetrics,
    ) -> Self {
        let passed = !findings.iter().any(|f| f.severity == Severity::Blocking);
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            source: source.into(),
            destination,
            generated_at: Utc::now(),
            findings,
            metrics,
            passed,
        }
    }

    /// Blocking findings
    pub fn blocking(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Blocking)
    }

    /// Whether a finding with `code` is present
    #[must_use]
    pub fn has(&self, code: FindingCode) -> bool {
        self.findings.iter().any(|f| f.code == code)
    }

    /// One-line summary of blocking findings
    #[must_use]
    pub fn blocking_summary(&self) -> String {
        self.blocking()
            .map(|f| format!("{}: {}", f.code, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
