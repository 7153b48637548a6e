//! Migration orchestrator
//!
//! Runs one unit through:
//! - preflight, persisted and re-read before the unit may start
//! - project, repository and governance reconciliation
//! - content transfer
//! - branch policies
//! - optional enrichment hooks
//! - transient credential cleanup
//!
//! The first failing step aborts the rest; cleanup still runs. Every step's
//! outcome and timing lands in a [`UnitSummary`].

use crate::error::MigrationError;
use crate::governance::GovernanceTemplate;
use crate::store::{ArtifactStore, SCHEMA_VERSION};
use crate::transfer::{ContentTransfer, TransferReport, TransferRequest};
use crate::unit::{MigrationUnit, StepFailure, UnitStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mig_client::{CallClient, DestinationApi, ErrorKind, NormalizedError, Probe, SessionContext, SourceApi, System};
use mig_preflight::{PreflightReport, PreflightRequest, PreflightValidator};
use mig_reconcile::{ReconciliationResult, Reconciler};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

/// Orchestrator steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    /// Readiness checks
    Preflight,
    /// Destination project
    EnsureProject,
    /// Destination repository
    EnsureRepository,
    /// Groups, memberships, wiki
    EnsureGovernance,
    /// Refs, tags, large objects
    TransferContent,
    /// Default-branch policies
    ApplyBranchPolicies,
    /// Post-creation hooks
    Enrichment,
    /// Transient credential cleanup
    ClearCredentials,
}

impl MigrationStep {
    /// Steps after preflight, in order
    pub const EXECUTION: [MigrationStep; 7] = [
        MigrationStep::EnsureProject,
        MigrationStep::EnsureRepository,
        MigrationStep::EnsureGovernance,
        MigrationStep::TransferContent,
        MigrationStep::ApplyBranchPolicies,
        MigrationStep::Enrichment,
        MigrationStep::ClearCredentials,
    ];
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationStep::Preflight => "preflight",
            MigrationStep::EnsureProject => "ensure_project",
            MigrationStep::EnsureRepository => "ensure_repository",
            MigrationStep::EnsureGovernance => "ensure_governance",
            MigrationStep::TransferContent => "transfer_content",
            MigrationStep::ApplyBranchPolicies => "apply_branch_policies",
            MigrationStep::Enrichment => "enrichment",
            MigrationStep::ClearCredentials => "clear_credentials",
        })
    }
}

/// Step outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Completed
    Succeeded,
    /// Failed; later steps skipped
    Failed,
    /// Not executed
    Skipped,
}

/// Record of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step
    pub step: MigrationStep,
    /// Outcome
    pub outcome: StepOutcome,
    /// Start time
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Duration
    pub duration_ms: u64,
    /// Extra context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Reconciliation results of this step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reconciliation: Vec<ReconciliationResult>,
    /// Transfer report of this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferReport>,
    /// Failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NormalizedError>,
}

impl StepRecord {
    fn skipped(step: MigrationStep, detail: impl Into<String>) -> Self {
        Self {
            step,
            outcome: StepOutcome::Skipped,
            started_at: None,
            duration_ms: 0,
            detail: Some(detail.into()),
            reconciliation: Vec::new(),
            transfer: None,
            error: None,
        }
    }
}

/// Per-unit summary artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSummary {
    /// Schema version
    pub schema_version: u32,
    /// Unit id
    pub unit_id: String,
    /// Source project
    pub source: String,
    /// Destination `<project>/<repository>`
    pub destination: String,
    /// Final status
    pub status: UnitStatus,
    /// Every step, in order
    pub steps: Vec<StepRecord>,
    /// Failing step
    #[serde(default)]
    pub failed_step: Option<MigrationStep>,
    /// Failure
    #[serde(default)]
    pub error: Option<NormalizedError>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Total duration
    pub duration_ms: u64,
}

impl UnitSummary {
    /// Record of a step
    #[must_use]
    pub fn step(&self, step: MigrationStep) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.step == step)
    }
}

/// What a hook sees
#[derive(Debug, Clone)]
pub struct EnrichmentContext {
    /// Unit being migrated
    pub unit: MigrationUnit,
    /// Destination repository state
    pub repository: Option<Value>,
    /// Transfer report
    pub transfer: Option<TransferReport>,
}

/// Optional post-creation enrichment (work items, dashboards, ...)
#[async_trait]
pub trait PostCreationHook: Send + Sync {
    /// Hook name for logs and summaries
    fn name(&self) -> String;

    /// Run the enrichment; returns a short detail line
    async fn enrich(&self, context: &EnrichmentContext) -> Result<Option<String>, NormalizedError>;
}

#[derive(Default)]
struct StepOutput {
    detail: Option<String>,
    reconciliation: Vec<ReconciliationResult>,
    transfer: Option<TransferReport>,
}

impl StepOutput {
    fn detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::default()
        }
    }

    fn reconciled(results: Vec<ReconciliationResult>) -> Self {
        Self {
            reconciliation: results,
            ..Self::default()
        }
    }
}

/// Step failure, carrying whatever the step produced before it failed
struct StepError {
    error: NormalizedError,
    output: StepOutput,
}

impl From<NormalizedError> for StepError {
    fn from(error: NormalizedError) -> Self {
        Self {
            error,
            output: StepOutput::default(),
        }
    }
}

#[derive(Default)]
struct RunState {
    report: Option<PreflightReport>,
    repository: Option<Value>,
    transfer: Option<TransferReport>,
}

/// Drives one unit at a time
pub struct Orchestrator {
    session: Arc<SessionContext>,
    source: SourceApi,
    destination: DestinationApi,
    validator: PreflightValidator,
    reconciler: Reconciler,
    transfer: Arc<dyn ContentTransfer>,
    store: ArtifactStore,
    governance: GovernanceTemplate,
    hooks: Vec<Arc<dyn PostCreationHook>>,
    cancel: CancellationToken,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create orchestrator over one client and transfer
    #[must_use]
    pub fn new(client: CallClient, transfer: Arc<dyn ContentTransfer>, store: ArtifactStore) -> Self {
        let session = client.session().clone();
        let source = SourceApi::new(client.clone());
        let destination = DestinationApi::new(client);
        Self {
            session,
            validator: PreflightValidator::new(source.clone(), destination.clone()),
            reconciler: Reconciler::for_destination(&destination),
            source,
            destination,
            transfer,
            store,
            governance: GovernanceTemplate::default(),
            hooks: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// With governance template
    #[must_use]
    pub fn with_governance(mut self, governance: GovernanceTemplate) -> Self {
        self.governance = governance;
        self
    }

    /// With post-creation hook
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PostCreationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// With cancellation token, checked between steps
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// With oversize threshold for preflight
    #[must_use]
    pub fn with_oversize_threshold(mut self, bytes: u64) -> Self {
        self.validator = self.validator.with_oversize_threshold(bytes);
        self
    }

    /// With a custom reconciler
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Artifact store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Cancellation token
    #[inline]
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run preflight, persist the report, and move the unit to Validated or Blocked
    ///
    /// # Errors
    /// Report persistence failure or an illegal status change.
    pub async fn preflight(&self, unit: &mut MigrationUnit) -> Result<PreflightReport, MigrationError> {
        let request = PreflightRequest::new(unit.source.project_path.clone())
            .with_destination(unit.destination.clone())
            .with_replace(unit.intent.replace)
            .with_sync(unit.intent.sync);
        let report = self.validator.validate(&request).await;

        let path = self.store.save_preflight(&unit.id, &report)?;
        unit.preflight_report = Some(path);
        unit.transition(if report.passed {
            UnitStatus::Validated
        } else {
            UnitStatus::Blocked
        })?;
        Ok(report)
    }

    /// Run a unit end to end
    ///
    /// Step failures are recorded in the summary and on the unit, not returned.
    ///
    /// # Errors
    /// Artifact persistence failure or an illegal status change.
    pub async fn run(&self, unit: &mut MigrationUnit) -> Result<UnitSummary, MigrationError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut steps = Vec::with_capacity(MigrationStep::EXECUTION.len() + 1);
        let mut state = RunState::default();
        info!(unit = %unit.id, source = %unit.source, destination = %unit.destination, "Starting unit");

        // Preflight
        let step_clock = (Utc::now(), Instant::now());
        if let Err(error) = self.check_cancelled(MigrationStep::Preflight) {
            steps.push(finished(MigrationStep::Preflight, step_clock, Err(error.clone().into())));
            return self.finish(unit, steps, Some((MigrationStep::Preflight, error)), started_at, clock);
        }
        self.preflight(unit).await?;

        // The gate reads the persisted report, not the in-memory one.
        let latest = self.store.load_preflight(&unit.id)?;
        let passed = latest.as_ref().is_some_and(|r| r.passed);
        let blocking = latest.as_ref().map(PreflightReport::blocking_summary).unwrap_or_default();
        state.report = latest;

        if !passed && !unit.intent.force {
            steps.push(finished(
                MigrationStep::Preflight,
                step_clock,
                Ok(StepOutput::detail(format!("blocked: {blocking}"))),
            ));
            for step in MigrationStep::EXECUTION {
                if step == MigrationStep::ClearCredentials {
                    steps.push(self.clear_credentials(None).await);
                } else {
                    steps.push(StepRecord::skipped(step, "preflight blocked"));
                }
            }
            warn!(unit = %unit.id, findings = %blocking, "Unit blocked by preflight");
            return self.finish(unit, steps, None, started_at, clock);
        }

        let detail = if passed {
            "passed".to_string()
        } else {
            format!("override: {blocking}")
        };
        steps.push(finished(MigrationStep::Preflight, step_clock, Ok(StepOutput::detail(detail))));

        unit.start()?;

        let mut failure: Option<(MigrationStep, NormalizedError)> = None;
        for step in MigrationStep::EXECUTION {
            if step == MigrationStep::ClearCredentials {
                steps.push(self.clear_credentials(failure.as_ref().map(|(s, _)| *s)).await);
                continue;
            }
            if let Some((failed, _)) = &failure {
                steps.push(StepRecord::skipped(step, format!("{failed} failed")));
                continue;
            }

            let step_clock = (Utc::now(), Instant::now());
            let result = match self.check_cancelled(step) {
                Ok(()) => self.execute(step, unit, &mut state).await,
                Err(e) => Err(e.into()),
            };
            if let Err(failed) = &result {
                warn!(unit = %unit.id, step = %step, error = %failed.error, "Step failed");
                failure = Some((step, failed.error.clone()));
            } else {
                info!(unit = %unit.id, step = %step, "Step succeeded");
            }
            steps.push(finished(step, step_clock, result));
        }

        self.finish(unit, steps, failure, started_at, clock)
    }

    async fn execute(&self, step: MigrationStep, unit: &MigrationUnit, state: &mut RunState) -> Result<StepOutput, StepError> {
        let project = unit.destination.project.as_str();
        let repository = unit.destination.repository.as_str();
        match step {
            MigrationStep::EnsureProject => {
                let result = self.reconciler.ensure(&self.governance.project_descriptor(project)).await;
                reconciled(vec![result])
            }
            MigrationStep::EnsureRepository => {
                let descriptor = self
                    .governance
                    .repository_descriptor(project, repository, unit.intent.replace);
                let result = self.reconciler.ensure(&descriptor).await;
                state.repository.clone_from(&result.resource);
                reconciled(vec![result])
            }
            MigrationStep::EnsureGovernance => {
                let descriptors = self.governance.governance_descriptors(project);
                if descriptors.is_empty() {
                    return Ok(StepOutput::detail("no governance resources configured"));
                }
                reconciled(self.reconciler.ensure_all(&descriptors).await)
            }
            MigrationStep::TransferContent => {
                let report = self.transfer_content(unit, state).await?;
                let detail = format!("{} refs pushed", report.refs_pushed);
                state.transfer = Some(report.clone());
                Ok(StepOutput {
                    detail: Some(detail),
                    transfer: Some(report),
                    ..StepOutput::default()
                })
            }
            MigrationStep::ApplyBranchPolicies => {
                let branch = state
                    .report
                    .as_ref()
                    .and_then(|r| r.metrics.default_branch.clone());
                let Some(branch) = branch else {
                    return Ok(StepOutput::detail("source has no default branch"));
                };
                let descriptors = self.governance.policy_descriptors(project, repository, &branch);
                if descriptors.is_empty() {
                    return Ok(StepOutput::detail("no branch policies configured"));
                }
                reconciled(self.reconciler.ensure_all(&descriptors).await)
            }
            MigrationStep::Enrichment => {
                if self.hooks.is_empty() {
                    return Ok(StepOutput::detail("no hooks registered"));
                }
                let context = EnrichmentContext {
                    unit: unit.clone(),
                    repository: state.repository.clone(),
                    transfer: state.transfer.clone(),
                };
                let mut details = Vec::with_capacity(self.hooks.len());
                for hook in &self.hooks {
                    let detail = hook.enrich(&context).await?;
                    details.push(format!("{}: {}", hook.name(), detail.as_deref().unwrap_or("ok")));
                }
                Ok(StepOutput::detail(details.join("; ")))
            }
            MigrationStep::Preflight | MigrationStep::ClearCredentials => Ok(StepOutput::default()),
        }
    }

    async fn transfer_content(&self, unit: &MigrationUnit, state: &RunState) -> Result<TransferReport, NormalizedError> {
        let source = match self.source.project(&unit.source.project_path).await? {
            Probe::Found(project) => project,
            Probe::Absent => {
                return Err(NormalizedError::new(
                    System::Source,
                    unit.source.project_path.clone(),
                    ErrorKind::NotFound,
                    "source project disappeared after preflight",
                ))
            }
        };
        let source_url = parse_url(System::Source, &source.http_url_to_repo)?;

        let remote = state
            .repository
            .as_ref()
            .and_then(|r| r.get("remoteUrl"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                NormalizedError::new(
                    System::Destination,
                    unit.destination.to_string(),
                    ErrorKind::InvalidResponse,
                    "destination repository has no clone URL",
                )
            })?;
        let destination_url = parse_url(System::Destination, remote)?;

        let lfs_bytes = state.report.as_ref().map_or(0, |r| r.metrics.lfs_size_bytes);
        let request = TransferRequest {
            unit_id: unit.id.clone(),
            source_url,
            destination_url,
            lfs: source.lfs_enabled && lfs_bytes > 0,
        };
        self.transfer.transfer(&self.session, &request).await
    }

    /// Scrubbers do blocking I/O, so they run off the async workers under the
    /// session's scrub limit. A scrubber that overruns is abandoned, not awaited.
    async fn clear_credentials(&self, failed: Option<MigrationStep>) -> StepRecord {
        let step_clock = (Utc::now(), Instant::now());
        let limit = self.session.timeouts().scrub;
        let session = Arc::clone(&self.session);
        let scrub = tokio::task::spawn_blocking(move || session.scrub_transient());
        let mut detail = match tokio::time::timeout(limit, scrub).await {
            Ok(Ok(0)) => "transient credentials removed".to_string(),
            Ok(Ok(failures)) => format!("{failures} credential location(s) could not be scrubbed"),
            Ok(Err(e)) => {
                warn!(error = %e, "Credential scrubbing aborted");
                "credential scrubbing aborted".to_string()
            }
            Err(_) => {
                warn!(limit_ms = limit.as_millis(), "Credential scrubbing timed out");
                format!("credential scrubbing timed out after {}ms", limit.as_millis())
            }
        };
        if let Some(step) = failed {
            detail = format!("{detail} after {step} failure");
        }
        finished(MigrationStep::ClearCredentials, step_clock, Ok(StepOutput::detail(detail)))
    }

    fn check_cancelled(&self, step: MigrationStep) -> Result<(), NormalizedError> {
        if self.cancel.is_cancelled() {
            Err(NormalizedError::cancelled(step.to_string()))
        } else {
            Ok(())
        }
    }

    fn finish(
        &self,
        unit: &mut MigrationUnit,
        steps: Vec<StepRecord>,
        failure: Option<(MigrationStep, NormalizedError)>,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> Result<UnitSummary, MigrationError> {
        let reconciliation: Vec<_> = steps.iter().flat_map(|s| s.reconciliation.iter().cloned()).collect();
        if !reconciliation.is_empty() {
            self.store.save_reconciliation(&unit.id, &reconciliation)?;
        }

        match &failure {
            Some((step, error)) => {
                unit.transition(UnitStatus::Failed)?;
                unit.last_error = Some(StepFailure {
                    step: *step,
                    error: error.clone(),
                });
            }
            None if unit.status == UnitStatus::InProgress => unit.transition(UnitStatus::Succeeded)?,
            None => {}
        }

        let summary = UnitSummary {
            schema_version: SCHEMA_VERSION,
            unit_id: unit.id.clone(),
            source: unit.source.to_string(),
            destination: unit.destination.to_string(),
            status: unit.status,
            steps,
            failed_step: failure.as_ref().map(|(s, _)| *s),
            error: failure.map(|(_, e)| e),
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed_ms(clock),
        };
        unit.summary = Some(self.store.save_summary(&summary)?);
        info!(
            unit = %unit.id,
            status = %summary.status,
            failed_step = summary.failed_step.map(|s| s.to_string()).unwrap_or_default(),
            duration_ms = summary.duration_ms,
            "Unit finished"
        );
        Ok(summary)
    }
}

fn reconciled(results: Vec<ReconciliationResult>) -> Result<StepOutput, StepError> {
    if let Some(failed) = results.iter().find(|r| r.outcome.is_failure()) {
        let error = failed.error.clone().unwrap_or_else(|| {
            NormalizedError::new(
                System::Destination,
                failed.key.clone(),
                ErrorKind::Conflict,
                failed.detail.clone().unwrap_or_else(|| "reconciliation failed".into()),
            )
        });
        return Err(StepError {
            error,
            output: StepOutput::reconciled(results),
        });
    }
    Ok(StepOutput::reconciled(results))
}

fn finished(
    step: MigrationStep,
    (started_at, clock): (DateTime<Utc>, Instant),
    result: Result<StepOutput, StepError>,
) -> StepRecord {
    let duration_ms = elapsed_ms(clock);
    match result {
        Ok(output) => StepRecord {
            step,
            outcome: StepOutcome::Succeeded,
            started_at: Some(started_at),
            duration_ms,
            detail: output.detail,
            reconciliation: output.reconciliation,
            transfer: output.transfer,
            error: None,
        },
        Err(StepError { error, output }) => StepRecord {
            step,
            outcome: StepOutcome::Failed,
            started_at: Some(started_at),
            duration_ms,
            detail: output.detail,
            reconciliation: output.reconciliation,
            transfer: output.transfer,
            error: Some(error),
        },
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn parse_url(system: System, raw: &str) -> Result<Url, NormalizedError> {
    Url::parse(raw).map_err(|e| {
        NormalizedError::new(system, "clone url", ErrorKind::InvalidResponse, format!("invalid clone URL: {e}"))
    })
}
