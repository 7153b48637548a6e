//! Generic ensure algorithm

use crate::handler::{CreateConflict, ResourceHandler};
use crate::kinds::{
    BranchPolicyHandler, GroupHandler, MembershipHandler, ProjectHandler, RepositoryHandler, WikiPageHandler,
};
use crate::resource::{ReconcileOutcome, ReconciliationResult, ReplaceIntent, ResourceDescriptor, ResourceKind};
use mig_client::{DestinationApi, ErrorKind, NormalizedError, Probe, System};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Drives descriptors to their desired state
#[derive(Clone, Default)]
pub struct Reconciler {
    handlers: HashMap<ResourceKind, Arc<dyn ResourceHandler>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("Reconciler").field("kinds", &kinds).finish()
    }
}

impl Reconciler {
    /// Create empty reconciler
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciler with every built-in kind bound to `api`
    #[must_use]
    pub fn for_destination(api: &DestinationApi) -> Self {
        Self::new()
            .with_handler(Arc::new(ProjectHandler::new(api.clone())))
            .with_handler(Arc::new(RepositoryHandler::new(api.clone())))
            .with_handler(Arc::new(GroupHandler::new(api.clone())))
            .with_handler(Arc::new(MembershipHandler::new(api.clone())))
            .with_handler(Arc::new(BranchPolicyHandler::new(api.clone())))
            .with_handler(Arc::new(WikiPageHandler::new(api.clone())))
    }

    /// Register (or replace) the handler for its kind
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ResourceHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    /// Ensure one descriptor
    pub async fn ensure(&self, desired: &ResourceDescriptor) -> ReconciliationResult {
        let result = match self.handlers.get(&desired.kind) {
            Some(handler) => self.ensure_with(handler.as_ref(), desired).await,
            None => ReconciliationResult::failed(
                desired,
                NormalizedError::new(
                    System::Local,
                    format!("ensure {}", desired.kind),
                    ErrorKind::Validation,
                    format!("no handler registered for {}", desired.kind),
                ),
            ),
        };

        if result.outcome.is_failure() {
            warn!(
                kind = %result.kind,
                key = %result.key,
                error = result.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                "Reconciliation failed"
            );
        } else {
            info!(kind = %result.kind, key = %result.key, outcome = %result.outcome, "Reconciled");
        }
        result
    }

    /// Ensure descriptors in order, stopping after the first failure
    pub async fn ensure_all(&self, desired: &[ResourceDescriptor]) -> Vec<ReconciliationResult> {
        let mut results = Vec::with_capacity(desired.len());
        for descriptor in desired {
            let result = self.ensure(descriptor).await;
            let failed = result.outcome.is_failure();
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    async fn ensure_with(&self, handler: &dyn ResourceHandler, desired: &ResourceDescriptor) -> ReconciliationResult {
        let observed = match handler.read(desired).await {
            Ok(Probe::Found(observed)) => observed,
            Ok(Probe::Absent) => return self.create(handler, desired, None).await,
            Err(e) => return ReconciliationResult::failed(desired, e),
        };

        if desired.replace == ReplaceIntent::Replace {
            if let Err(e) = handler.delete(desired, &observed).await {
                return ReconciliationResult::failed(desired, e)
                    .with_detail("delete failed; create not attempted");
            }
            return self.create(handler, desired, Some("replaced existing resource")).await;
        }

        self.converge(handler, desired, observed).await
    }

    /// Compare an existing resource with the desired state and patch mutable drift
    async fn converge(&self, handler: &dyn ResourceHandler, desired: &ResourceDescriptor, observed: Value) -> ReconciliationResult {
        let diff = handler.diff(desired, &observed);
        if diff.is_empty() {
            return ReconciliationResult::new(desired, ReconcileOutcome::AlreadyConformant)
                .with_resource(Some(observed));
        }

        if diff.iter().any(|d| d.protected) {
            let fields: Vec<_> = diff.iter().filter(|d| d.protected).map(|d| d.field.as_str()).collect();
            let detail = format!("protected fields differ: {}", fields.join(", "));
            return ReconciliationResult::new(desired, ReconcileOutcome::ConflictSkipped)
                .with_detail(detail)
                .with_diff(diff)
                .with_resource(Some(observed));
        }

        match handler.patch(desired, &observed, &diff).await {
            Ok(updated) => ReconciliationResult::new(desired, ReconcileOutcome::Updated)
                .with_diff(diff)
                .with_resource(non_null(updated).or(Some(observed))),
            Err(e) => ReconciliationResult::failed(desired, e).with_diff(diff),
        }
    }

    async fn create(
        &self,
        handler: &dyn ResourceHandler,
        desired: &ResourceDescriptor,
        detail: Option<&str>,
    ) -> ReconciliationResult {
        match handler.create(desired).await {
            Ok(created) => {
                let result = ReconciliationResult::new(desired, ReconcileOutcome::Created).with_resource(non_null(created));
                match detail {
                    Some(detail) => result.with_detail(detail),
                    None => result,
                }
            }
            Err(e) if e.kind == ErrorKind::Conflict => match handler.create_conflict(&e) {
                CreateConflict::AlreadyMember => ReconciliationResult::new(desired, ReconcileOutcome::ConflictSkipped)
                    .with_detail("already a member"),
                // Another writer won the race; its attributes may differ from ours.
                CreateConflict::AlreadyExists => match handler.read(desired).await {
                    Ok(Probe::Found(observed)) => {
                        let result = self.converge(handler, desired, observed).await;
                        if result.detail.is_some() {
                            result
                        } else {
                            result.with_detail("created concurrently")
                        }
                    }
                    Ok(Probe::Absent) => ReconciliationResult::failed(desired, e)
                        .with_detail("create conflicted but resource is not readable"),
                    Err(read) => ReconciliationResult::failed(desired, read),
                },
                CreateConflict::Genuine => ReconciliationResult::failed(desired, e),
            },
            Err(e) => ReconciliationResult::failed(desired, e),
        }
    }
}

fn non_null(value: Value) -> Option<Value> {
    (!value.is_null()).then_some(value)
}
