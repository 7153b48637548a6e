//! Bulk coordinator
//!
//! Drives the orchestrator over an ordered batch and keeps `bulk-run.json`
//! current after every unit, so an interrupted or partially failed batch can
//! be re-run. On re-run, units already `Succeeded` are left alone.

use crate::error::MigrationError;
use crate::orchestrator::{MigrationStep, Orchestrator, UnitSummary};
use crate::store::SCHEMA_VERSION;
use crate::unit::{MigrationUnit, SourceRef, UnitIntent, UnitStatus};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use mig_preflight::DestinationRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One source-to-repository mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Source project path
    pub source: String,
    /// Destination repository; defaults to the last source segment
    #[serde(default)]
    pub repository: Option<String>,
    /// Proceed despite blocking findings
    #[serde(default)]
    pub force: bool,
    /// Replace a destination repository with history
    #[serde(default)]
    pub replace: bool,
    /// Push onto a destination repository with history
    #[serde(default)]
    pub sync: bool,
}

/// Declarative batch: one destination project, many sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    /// Schema version
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Shared destination project
    pub destination_project: String,
    /// Mappings in execution order
    pub units: Vec<BatchEntry>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BatchDescriptor {
    /// Load from a JSON file
    ///
    /// # Errors
    /// Unreadable file or invalid descriptor.
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MigrationError::Descriptor(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Parse JSON
    ///
    /// # Errors
    /// Malformed JSON, unsupported schema, or an empty batch.
    pub fn from_json_str(raw: &str) -> Result<Self, MigrationError> {
        let descriptor: Self = serde_json::from_str(raw).map_err(|e| MigrationError::Descriptor(e.to_string()))?;
        if descriptor.schema_version != SCHEMA_VERSION {
            return Err(MigrationError::Descriptor(format!(
                "unsupported schema version {}",
                descriptor.schema_version
            )));
        }
        if descriptor.destination_project.trim().is_empty() {
            return Err(MigrationError::Descriptor("destination_project is empty".into()));
        }
        if descriptor.units.is_empty() {
            return Err(MigrationError::Descriptor("batch has no units".into()));
        }
        Ok(descriptor)
    }

    /// Units in descriptor order
    ///
    /// # Errors
    /// Two entries resolving to the same destination repository.
    pub fn units(&self) -> Result<Vec<MigrationUnit>, MigrationError> {
        let mut seen = HashSet::new();
        let mut units = Vec::with_capacity(self.units.len());
        for entry in &self.units {
            let source = SourceRef::new(entry.source.clone());
            let repository = entry.repository.clone().unwrap_or_else(|| source.name().to_string());
            let unit = MigrationUnit::new(
                source,
                DestinationRef::new(self.destination_project.clone(), repository),
                UnitIntent {
                    force: entry.force,
                    replace: entry.replace,
                    sync: entry.sync,
                },
            );
            if !seen.insert(unit.id.clone()) {
                return Err(MigrationError::Descriptor(format!(
                    "duplicate destination {} (unit {})",
                    unit.destination, unit.id
                )));
            }
            units.push(unit);
        }
        Ok(units)
    }
}

/// Batch execution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkPolicy {
    /// Stop starting units after the first failure
    pub stop_on_first_failure: bool,
    /// Units run concurrently; 1 is sequential
    pub max_parallel: usize,
}

impl Default for BulkPolicy {
    fn default() -> Self {
        Self {
            stop_on_first_failure: false,
            max_parallel: 1,
        }
    }
}

/// Counts by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkCounters {
    /// Units in the batch
    pub total: usize,
    /// Succeeded, this run or earlier
    pub succeeded: usize,
    /// Failed
    pub failed: usize,
    /// Blocked by preflight
    pub blocked: usize,
    /// Not started this run
    pub skipped: usize,
    /// Left alone because an earlier run succeeded
    pub resumed: usize,
}

/// A unit that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Unit id
    pub unit_id: String,
    /// Final status
    pub status: UnitStatus,
    /// Failing step
    #[serde(default)]
    pub step: Option<MigrationStep>,
    /// Reason
    pub reason: String,
}

/// Persisted batch state and summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRun {
    /// Schema version
    pub schema_version: u32,
    /// Id of the latest invocation
    pub run_id: String,
    /// Units in descriptor order
    pub units: Vec<MigrationUnit>,
    /// Counters
    pub counters: BulkCounters,
    /// Failed and blocked units with reasons
    pub failures: Vec<UnitFailure>,
    /// Units not started this run
    pub skipped: Vec<String>,
    /// Start of the latest invocation
    pub started_at: DateTime<Utc>,
    /// End of the latest invocation
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Elapsed time of the latest invocation
    pub elapsed_ms: u64,
}

impl BulkRun {
    /// Create run over units
    #[must_use]
    pub fn new(units: Vec<MigrationUnit>) -> Self {
        let mut run = Self {
            schema_version: SCHEMA_VERSION,
            run_id: ulid::Ulid::new().to_string(),
            units,
            counters: BulkCounters::default(),
            failures: Vec::new(),
            skipped: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            elapsed_ms: 0,
        };
        run.recount(0);
        run
    }

    /// Unit by id
    #[must_use]
    pub fn unit(&self, id: &str) -> Option<&MigrationUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Whether every unit succeeded
    #[inline]
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.counters.succeeded == self.counters.total
    }

    fn recount(&mut self, resumed: usize) {
        let skipped: HashSet<&str> = self.skipped.iter().map(String::as_str).collect();
        let mut counters = BulkCounters {
            total: self.units.len(),
            resumed,
            ..BulkCounters::default()
        };
        for unit in &self.units {
            if skipped.contains(unit.id.as_str()) {
                counters.skipped += 1;
                continue;
            }
            match unit.status {
                UnitStatus::Succeeded => counters.succeeded += 1,
                UnitStatus::Failed => counters.failed += 1,
                UnitStatus::Blocked => counters.blocked += 1,
                _ => counters.skipped += 1,
            }
        }
        self.counters = counters;
    }
}

/// Carry prior state into freshly described units
///
/// Status, timestamps and artifact references come from the previous run;
/// intent comes from the descriptor. Units no longer described are dropped.
#[must_use]
pub fn merge_units(prior: Option<BulkRun>, described: Vec<MigrationUnit>) -> Vec<MigrationUnit> {
    let Some(prior) = prior else {
        return described;
    };
    let mut previous: HashMap<String, MigrationUnit> = prior.units.into_iter().map(|u| (u.id.clone(), u)).collect();
    described
        .into_iter()
        .map(|fresh| match previous.remove(&fresh.id) {
            Some(mut old) => {
                old.intent = fresh.intent;
                old.source = fresh.source;
                old
            }
            None => fresh,
        })
        .collect()
}

enum UnitRun {
    Finished(MigrationUnit, Box<UnitSummary>),
    Errored(MigrationUnit, String),
    NotStarted(MigrationUnit),
}

/// Runs batches through one orchestrator
#[derive(Debug, Clone)]
pub struct BulkCoordinator {
    orchestrator: Arc<Orchestrator>,
    policy: BulkPolicy,
}

impl BulkCoordinator {
    /// Create coordinator
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, policy: BulkPolicy) -> Self {
        Self { orchestrator, policy }
    }

    /// Run a descriptor, resuming from the stored state
    ///
    /// # Errors
    /// Invalid descriptor or state persistence failure.
    pub async fn run_descriptor(&self, descriptor: &BatchDescriptor) -> Result<BulkRun, MigrationError> {
        self.run(descriptor.units()?).await
    }

    /// Run units, resuming from the stored state
    ///
    /// # Errors
    /// State persistence failure. Unit failures are recorded, not returned.
    pub async fn run(&self, units: Vec<MigrationUnit>) -> Result<BulkRun, MigrationError> {
        let store = self.orchestrator.store();
        let clock = Instant::now();
        let prior = store.load_bulk_run()?;
        let mut run = BulkRun::new(merge_units(prior, units));

        let pending: Vec<(usize, MigrationUnit)> = run
            .units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.needs_processing())
            .map(|(i, u)| (i, u.clone()))
            .collect();
        let resumed = run.units.len() - pending.len();
        info!(
            run = %run.run_id,
            total = run.units.len(),
            pending = pending.len(),
            resumed,
            parallel = self.policy.max_parallel,
            "Starting batch"
        );
        store.save_bulk_run(&run)?;

        let halted = AtomicBool::new(false);
        let mut results = stream::iter(pending)
            .map(|(index, unit)| {
                let halted = &halted;
                async move { (index, self.run_unit(unit, halted).await) }
            })
            .buffered(self.policy.max_parallel.max(1));

        while let Some((index, outcome)) = results.next().await {
            match outcome {
                UnitRun::Finished(unit, summary) => {
                    if let Some(failure) = failure_of(&unit, &summary) {
                        run.failures.push(failure);
                    }
                    run.units[index] = unit;
                }
                UnitRun::Errored(unit, reason) => {
                    run.failures.push(UnitFailure {
                        unit_id: unit.id.clone(),
                        status: unit.status,
                        step: unit.last_error.as_ref().map(|f| f.step),
                        reason,
                    });
                    run.units[index] = unit;
                }
                UnitRun::NotStarted(unit) => run.skipped.push(unit.id),
            }
            run.recount(resumed);
            store.save_bulk_run(&run)?;
        }
        drop(results);

        run.finished_at = Some(Utc::now());
        run.elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        run.recount(resumed);
        store.save_bulk_run(&run)?;
        info!(
            run = %run.run_id,
            succeeded = run.counters.succeeded,
            failed = run.counters.failed,
            blocked = run.counters.blocked,
            skipped = run.counters.skipped,
            elapsed_ms = run.elapsed_ms,
            "Batch finished"
        );
        Ok(run)
    }

    async fn run_unit(&self, mut unit: MigrationUnit, halted: &AtomicBool) -> UnitRun {
        if halted.load(Ordering::SeqCst) || self.orchestrator.cancellation().is_cancelled() {
            return UnitRun::NotStarted(unit);
        }
        match self.orchestrator.run(&mut unit).await {
            Ok(summary) => {
                if self.policy.stop_on_first_failure && summary.status != UnitStatus::Succeeded {
                    halted.store(true, Ordering::SeqCst);
                }
                UnitRun::Finished(unit, Box::new(summary))
            }
            Err(e) => {
                warn!(unit = %unit.id, error = %e, "Unit aborted");
                if unit.status != UnitStatus::Failed && unit.transition(UnitStatus::Failed).is_err() {
                    warn!(unit = %unit.id, status = %unit.status, "Cannot mark unit failed");
                }
                if self.policy.stop_on_first_failure {
                    halted.store(true, Ordering::SeqCst);
                }
                UnitRun::Errored(unit, e.to_string())
            }
        }
    }
}

fn failure_of(unit: &MigrationUnit, summary: &UnitSummary) -> Option<UnitFailure> {
    match summary.status {
        UnitStatus::Succeeded => None,
        UnitStatus::Blocked => Some(UnitFailure {
            unit_id: unit.id.clone(),
            status: summary.status,
            step: Some(MigrationStep::Preflight),
            reason: summary
                .step(MigrationStep::Preflight)
                .and_then(|r| r.detail.clone())
                .unwrap_or_else(|| "blocked by preflight".into()),
        }),
        _ => Some(UnitFailure {
            unit_id: unit.id.clone(),
            status: summary.status,
            step: summary.failed_step,
            reason: summary
                .error
                .as_ref()
                .map_or_else(|| "unknown failure".into(), ToString::to_string),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BATCH: &str = r#"{
        "schema_version": 1,
        "destination_project": "Alpha",
        "units": [
            { "source": "group/app" },
            { "source": "group/lib", "repository": "core-lib", "force": true }
        ]
    }"#;

    #[test]
    fn repository_defaults_to_source_name() {
        let units = BatchDescriptor::from_json_str(BATCH).unwrap().units().unwrap();
        assert_eq!(units[0].destination, DestinationRef::new("Alpha", "app"));
        assert_eq!(units[1].destination, DestinationRef::new("Alpha", "core-lib"));
        assert!(units[1].intent.force);
    }

    #[test]
    fn duplicate_destination_rejected() {
        let raw = r#"{"destination_project": "A", "units": [{"source": "x/app"}, {"source": "y/app"}]}"#;
        let err = BatchDescriptor::from_json_str(raw).unwrap().units().unwrap_err();
        assert!(matches!(err, MigrationError::Descriptor(_)));
    }

    #[test]
    fn empty_batch_rejected() {
        let raw = r#"{"destination_project": "A", "units": []}"#;
        assert!(BatchDescriptor::from_json_str(raw).is_err());
    }

    #[test]
    fn merge_keeps_prior_status_and_new_intent() {
        let descriptor = BatchDescriptor::from_json_str(BATCH).unwrap();
        let mut prior = descriptor.units().unwrap();
        prior[0].status = UnitStatus::Succeeded;
        prior[1].status = UnitStatus::Failed;
        prior[1].intent.force = false;

        let merged = merge_units(Some(BulkRun::new(prior)), descriptor.units().unwrap());
        assert_eq!(merged[0].status, UnitStatus::Succeeded);
        assert_eq!(merged[1].status, UnitStatus::Failed);
        assert!(merged[1].intent.force);
    }

    #[test]
    fn merge_adds_new_units_as_pending() {
        let descriptor = BatchDescriptor::from_json_str(BATCH).unwrap();
        let mut prior = descriptor.units().unwrap();
        prior.truncate(1);
        prior[0].status = UnitStatus::Succeeded;

        let merged = merge_units(Some(BulkRun::new(prior)), descriptor.units().unwrap());
        assert_eq!(merged[1].status, UnitStatus::Pending);
    }

    #[test]
    fn counters_split_blocked_and_skipped() {
        let mut units = BatchDescriptor::from_json_str(BATCH).unwrap().units().unwrap();
        units[0].status = UnitStatus::Blocked;
        let mut run = BulkRun::new(units);
        run.skipped.push(run.units[1].id.clone());
        run.recount(0);

        assert_eq!(run.counters.blocked, 1);
        assert_eq!(run.counters.skipped, 1);
        assert_eq!(run.counters.succeeded, 0);
        assert!(!run.all_succeeded());
    }
}
