//! Migration units and their status machine

use crate::error::TransitionError;
use crate::orchestrator::MigrationStep;
use chrono::{DateTime, Utc};
use mig_client::NormalizedError;
use mig_preflight::DestinationRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Unit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Not yet validated
    Pending,
    /// Preflight passed
    Validated,
    /// Preflight found blocking issues
    Blocked,
    /// Steps running
    InProgress,
    /// All steps succeeded
    Succeeded,
    /// A step failed
    Failed,
}

impl UnitStatus {
    /// All statuses
    pub const ALL: [UnitStatus; 6] = [
        UnitStatus::Pending,
        UnitStatus::Validated,
        UnitStatus::Blocked,
        UnitStatus::InProgress,
        UnitStatus::Succeeded,
        UnitStatus::Failed,
    ];

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        allowed_transitions(*self).is_empty()
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Validated => "validated",
            UnitStatus::Blocked => "blocked",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Succeeded => "succeeded",
            UnitStatus::Failed => "failed",
        })
    }
}

/// Statuses reachable from `from`
#[must_use]
pub fn allowed_transitions(from: UnitStatus) -> Vec<UnitStatus> {
    use UnitStatus::*;
    match from {
        Pending => vec![Validated, Blocked, Failed],
        Validated => vec![InProgress, Validated, Blocked, Failed],
        // InProgress from Blocked only through `MigrationUnit::start` with override.
        Blocked => vec![InProgress, Validated, Blocked],
        InProgress => vec![Succeeded, Failed],
        Failed => vec![Validated, Blocked, Failed],
        Succeeded => vec![],
    }
}

/// Validate a status change against the table
///
/// # Errors
/// `TransitionError::Illegal` when `to` is not reachable from `from`.
pub fn validate_transition(from: UnitStatus, to: UnitStatus) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError::Illegal { from, to })
    }
}

/// Source side of a unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// Namespaced project path
    pub project_path: String,
}

impl SourceRef {
    /// Create new reference
    #[inline]
    #[must_use]
    pub fn new(project_path: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
        }
    }

    /// Last path segment
    #[must_use]
    pub fn name(&self) -> &str {
        self.project_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.project_path)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.project_path)
    }
}

/// Per-unit operator intent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitIntent {
    /// Proceed despite blocking preflight findings
    #[serde(default)]
    pub force: bool,
    /// Delete and recreate a destination repository that has history
    #[serde(default)]
    pub replace: bool,
    /// Push onto a destination repository that has history
    #[serde(default)]
    pub sync: bool,
}

/// The step and error that failed a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Failing step
    pub step: MigrationStep,
    /// Error
    pub error: NormalizedError,
}

/// One project to migrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationUnit {
    /// Deterministic id derived from the destination
    pub id: String,
    /// Source project
    pub source: SourceRef,
    /// Destination project and repository
    pub destination: DestinationRef,
    /// Operator intent
    #[serde(default)]
    pub intent: UnitIntent,
    /// Status
    pub status: UnitStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// When the last attempt entered `InProgress`
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the last attempt finished
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Latest preflight report
    #[serde(default)]
    pub preflight_report: Option<PathBuf>,
    /// Latest summary artifact
    #[serde(default)]
    pub summary: Option<PathBuf>,
    /// Failure of the last attempt
    #[serde(default)]
    pub last_error: Option<StepFailure>,
}

impl MigrationUnit {
    /// Create pending unit
    #[must_use]
    pub fn new(source: SourceRef, destination: DestinationRef, intent: UnitIntent) -> Self {
        let now = Utc::now();
        Self {
            id: unit_id(&destination),
            source,
            destination,
            intent,
            status: UnitStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            preflight_report: None,
            summary: None,
            last_error: None,
        }
    }

    /// Change status
    ///
    /// # Errors
    /// When the table does not allow the change.
    pub fn transition(&mut self, to: UnitStatus) -> Result<(), TransitionError> {
        validate_transition(self.status, to)?;
        let now = Utc::now();
        match to {
            UnitStatus::InProgress => {
                self.started_at = Some(now);
                self.finished_at = None;
                self.last_error = None;
            }
            UnitStatus::Succeeded | UnitStatus::Failed => self.finished_at = Some(now),
            _ => {}
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Enter `InProgress`; a blocked unit needs `force`
    ///
    /// # Errors
    /// `OverrideRequired` for a blocked unit without force, `Illegal` otherwise.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        if self.status == UnitStatus::Blocked && !self.intent.force {
            return Err(TransitionError::OverrideRequired);
        }
        self.transition(UnitStatus::InProgress)
    }

    /// Whether a batch re-run should process this unit
    #[inline]
    #[must_use]
    pub fn needs_processing(&self) -> bool {
        self.status != UnitStatus::Succeeded
    }
}

/// Deterministic unit id: `<project-slug>--<repository-slug>`
#[must_use]
pub fn unit_id(destination: &DestinationRef) -> String {
    format!("{}--{}", slug(&destination.project), slug(&destination.repository))
}

fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit() -> MigrationUnit {
        MigrationUnit::new(
            SourceRef::new("group/sub/app"),
            DestinationRef::new("Team Alpha", "app"),
            UnitIntent::default(),
        )
    }

    #[test]
    fn id_is_slug_of_destination() {
        assert_eq!(unit().id, "team-alpha--app");
        assert_eq!(unit_id(&DestinationRef::new("A/B", "c.d")), "a-b--c-d");
        assert_eq!(unit_id(&DestinationRef::new("***", "x")), "unnamed--x");
    }

    #[test]
    fn source_name_is_last_segment() {
        assert_eq!(SourceRef::new("group/sub/app").name(), "app");
        assert_eq!(SourceRef::new("app").name(), "app");
    }

    #[test]
    fn pending_cannot_skip_preflight() {
        let mut u = unit();
        assert_eq!(
            u.transition(UnitStatus::InProgress),
            Err(TransitionError::Illegal {
                from: UnitStatus::Pending,
                to: UnitStatus::InProgress
            })
        );
    }

    #[test]
    fn blocked_unit_needs_force() {
        let mut u = unit();
        u.transition(UnitStatus::Blocked).unwrap();
        assert_eq!(u.start(), Err(TransitionError::OverrideRequired));

        u.intent.force = true;
        u.start().unwrap();
        assert_eq!(u.status, UnitStatus::InProgress);
        assert!(u.started_at.is_some());
    }

    #[test]
    fn succeeded_is_terminal() {
        let mut u = unit();
        u.transition(UnitStatus::Validated).unwrap();
        u.start().unwrap();
        u.transition(UnitStatus::Succeeded).unwrap();
        assert!(u.status.is_terminal());
        assert!(!u.needs_processing());
        assert!(u.finished_at.is_some());
    }

    #[test]
    fn failed_unit_can_be_revalidated() {
        let mut u = unit();
        u.transition(UnitStatus::Validated).unwrap();
        u.start().unwrap();
        u.transition(UnitStatus::Failed).unwrap();
        assert!(u.needs_processing());
        u.transition(UnitStatus::Validated).unwrap();
    }

    fn any_status() -> impl Strategy<Value = UnitStatus> {
        prop::sample::select(UnitStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn validation_matches_table(from in any_status(), to in any_status()) {
            let allowed = allowed_transitions(from);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
        }

        #[test]
        fn in_progress_only_from_validated_or_blocked(from in any_status()) {
            if validate_transition(from, UnitStatus::InProgress).is_ok() {
                prop_assert!(matches!(from, UnitStatus::Validated | UnitStatus::Blocked));
            }
        }
    }
}
