//! Preflight validator
//!
//! Read-only pass over both platforms. Every remote failure is turned into a
//! finding; validation itself never errors.

use crate::report::{Finding, FindingCode, PreflightMetrics, PreflightReport};
use mig_client::api::{DestinationApi, SourceApi, SourceProject};
use mig_client::{ErrorKind, NormalizedError, Probe, System};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Default size above which a repository without large-object storage is flagged
pub const DEFAULT_OVERSIZE_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Destination identity of a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationRef {
    /// Destination project name
    pub project: String,
    /// Destination repository name
    pub repository: String,
}

impl DestinationRef {
    /// Create new reference
    #[inline]
    #[must_use]
    pub fn new(project: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            repository: repository.into(),
        }
    }
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.repository)
    }
}

/// What to validate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightRequest {
    /// Source project path
    pub source: String,
    /// Destination, if already decided
    pub destination: Option<DestinationRef>,
    /// Existing destination history may be replaced
    pub replace: bool,
    /// Existing destination history may be pushed onto
    pub sync: bool,
}

impl PreflightRequest {
    /// Create request for a source project
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: None,
            replace: false,
            sync: false,
        }
    }

    /// With destination
    #[must_use]
    pub fn with_destination(mut self, destination: DestinationRef) -> Self {
        self.destination = Some(destination);
        self
    }

    /// With replace intent
    #[must_use]
    pub fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    /// With sync intent
    #[must_use]
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

/// Gathers state from both platforms and classifies readiness
#[derive(Debug, Clone)]
pub struct PreflightValidator {
    source: SourceApi,
    destination: DestinationApi,
    oversize_threshold: u64,
}

impl PreflightValidator {
    /// Create validator
    #[must_use]
    pub fn new(source: SourceApi, destination: DestinationApi) -> Self {
        Self {
            source,
            destination,
            oversize_threshold: DEFAULT_OVERSIZE_THRESHOLD,
        }
    }

    /// With oversize threshold in bytes
    #[must_use]
    pub fn with_oversize_threshold(mut self, bytes: u64) -> Self {
        self.oversize_threshold = bytes;
        self
    }

    /// Run all checks
    pub async fn validate(&self, request: &PreflightRequest) -> PreflightReport {
        let mut findings = Vec::new();
        let mut metrics = PreflightMetrics::default();

        let source_ok = self.check_source_credentials(&mut findings).await;
        let destination_ok = self.check_destination_credentials(&mut findings).await;

        if source_ok {
            self.check_source(request, &mut findings, &mut metrics).await;
        }
        if destination_ok {
            if let Some(destination) = &request.destination {
                self.check_destination(request, destination, &mut findings).await;
            }
        }

        let report = PreflightReport::new(
            request.source.clone(),
            request.destination.as_ref().map(ToString::to_string),
            findings,
            metrics,
        );
        info!(
            source = %report.source,
            destination = report.destination.as_deref().unwrap_or("-"),
            passed = report.passed,
            findings = report.findings.len(),
            "Preflight complete"
        );
        report
    }

    async fn check_source_credentials(&self, findings: &mut Vec<Finding>) -> bool {
        match self.source.current_user().await {
            Ok(user) => {
                debug!(user = %user.username, "Source credentials valid");
                true
            }
            Err(e) if e.is_authorization() => {
                findings.push(Finding::blocking(
                    FindingCode::CredentialsInvalid,
                    format!("source rejected the configured token: {}", e.message),
                ));
                false
            }
            Err(e) => {
                findings.push(Finding::blocking(
                    FindingCode::SourceInaccessible,
                    format!("source identity check failed: {e}"),
                ));
                false
            }
        }
    }

    async fn check_destination_credentials(&self, findings: &mut Vec<Finding>) -> bool {
        match self.destination.connection_data().await {
            Ok(_) => true,
            Err(e) if e.is_authorization() => {
                findings.push(Finding::blocking(
                    FindingCode::CredentialsInvalid,
                    format!("destination rejected the configured token: {}", e.message),
                ));
                false
            }
            Err(e) => {
                findings.push(unreachable(&e));
                false
            }
        }
    }

    async fn check_source(&self, request: &PreflightRequest, findings: &mut Vec<Finding>, metrics: &mut PreflightMetrics) {
        let project = match self.source.project(&request.source).await {
            Ok(Probe::Found(project)) => project,
            Ok(Probe::Absent) => {
                findings.push(Finding::blocking(
                    FindingCode::SourceInaccessible,
                    format!("source project '{}' not found or not visible to the token", request.source),
                ));
                return;
            }
            Err(e) => {
                findings.push(Finding::blocking(
                    FindingCode::SourceInaccessible,
                    format!("source project '{}' could not be read: {e}", request.source),
                ));
                return;
            }
        };

        let refs = async {
            let branches = self.source.branches(project.id).await?;
            let tags = self.source.tags(project.id).await?;
            Ok::<_, NormalizedError>((branches, tags))
        };
        match refs.await {
            Ok((branches, tags)) => {
                metrics.branches = branches.into_iter().map(|r| r.name).collect();
                metrics.tags = tags.into_iter().map(|r| r.name).collect();
            }
            Err(e) => {
                findings.push(Finding::blocking(
                    FindingCode::SourceInaccessible,
                    format!("source refs could not be listed: {e}"),
                ));
                return;
            }
        }

        self.fill_metrics(&project, metrics);

        if project.empty_repo || metrics.branches.is_empty() {
            findings.push(Finding::warning(
                FindingCode::SourceEmpty,
                "source repository has no branches; only metadata will be migrated",
            ));
        }
        if metrics.repository_size_bytes > self.oversize_threshold && !metrics.lfs_enabled {
            findings.push(Finding::warning(
                FindingCode::OversizedWithoutLfs,
                format!(
                    "repository is {} bytes (threshold {}) and large-object storage is disabled",
                    metrics.repository_size_bytes, self.oversize_threshold
                ),
            ));
        }
        if metrics.lfs_size_bytes > 0 {
            findings.push(Finding::info(
                FindingCode::LargeObjectsPresent,
                format!("{} bytes of large objects will be transferred", metrics.lfs_size_bytes),
            ));
        }
    }

    fn fill_metrics(&self, project: &SourceProject, metrics: &mut PreflightMetrics) {
        let stats = project.statistics.unwrap_or_default();
        metrics.repository_size_bytes = stats.repository_size;
        metrics.lfs_size_bytes = stats.lfs_objects_size;
        metrics.lfs_enabled = project.lfs_enabled;
        metrics.default_branch.clone_from(&project.default_branch);
        metrics.large_object_estimate = if project.lfs_enabled {
            stats.lfs_objects_size
        } else {
            stats.repository_size.saturating_sub(self.oversize_threshold)
        };
    }

    async fn check_destination(&self, request: &PreflightRequest, destination: &DestinationRef, findings: &mut Vec<Finding>) {
        match self.destination.project(&destination.project).await {
            Ok(Probe::Found(_)) => {}
            Ok(Probe::Absent) => {
                findings.push(Finding::info(
                    FindingCode::DestinationProjectMissing,
                    format!("destination project '{}' will be created", destination.project),
                ));
                return;
            }
            Err(e) => {
                findings.push(unreachable(&e));
                return;
            }
        }

        let repository = match self
            .destination
            .repository_info(&destination.project, &destination.repository)
            .await
        {
            Ok(Probe::Found(repository)) => repository,
            Ok(Probe::Absent) => return,
            Err(e) => {
                findings.push(unreachable(&e));
                return;
            }
        };

        let ref_count = if repository.size > 0 {
            None
        } else {
            match self.destination.refs(&destination.project, &repository.id).await {
                Ok(refs) => Some(refs.len()),
                Err(e) => {
                    findings.push(unreachable(&e));
                    return;
                }
            }
        };
        let has_history = repository.size > 0 || ref_count.is_some_and(|n| n > 0);

        if !has_history {
            findings.push(Finding::info(
                FindingCode::DestinationRepositoryExists,
                format!("destination repository '{destination}' exists and is empty"),
            ));
        } else if request.replace {
            findings.push(Finding::warning(
                FindingCode::DestinationHistoryReplace,
                format!("destination repository '{destination}' has history and will be deleted and recreated"),
            ));
        } else if request.sync {
            findings.push(Finding::info(
                FindingCode::DestinationHistorySync,
                format!("destination repository '{destination}' has history; refs will be pushed onto it"),
            ));
        } else {
            findings.push(Finding::blocking(
                FindingCode::DestinationHasHistory,
                format!("destination repository '{destination}' already has commits; set replace or sync to proceed"),
            ));
        }
    }
}

fn unreachable(error: &NormalizedError) -> Finding {
    let code = if error.system == System::Destination && error.kind == ErrorKind::Authorization {
        FindingCode::CredentialsInvalid
    } else {
        FindingCode::DestinationUnreachable
    };
    Finding::blocking(code, format!("destination could not be queried: {error}"))
}
