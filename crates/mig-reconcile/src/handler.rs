//! Per-kind resource handler contract

use crate::resource::{conforms, AttributeDiff, ResourceDescriptor, ResourceKind};
use async_trait::async_trait;
use mig_client::{CallResult, ErrorKind, NormalizedError, Probe, System};
use serde_json::Value;

/// Fields the destination manages itself; never compared
pub const SERVER_MANAGED_FIELDS: &[&str] = &[
    "id",
    "url",
    "_links",
    "revision",
    "lastUpdateTime",
    "createdDate",
    "createdBy",
];

/// How a 409 on create should be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateConflict {
    /// Duplicate membership add; the desired state already holds
    AlreadyMember,
    /// Created concurrently between read and create
    AlreadyExists,
    /// A real conflict
    Genuine,
}

/// Read/create/diff/patch/delete for one resource kind
///
/// The generic algorithm in [`Reconciler`](crate::Reconciler) is written once
/// against this trait.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Kind handled
    fn kind(&self) -> ResourceKind;

    /// Current state, or known absence
    async fn read(&self, desired: &ResourceDescriptor) -> CallResult<Probe<Value>>;

    /// Create from the descriptor; returns the created state
    async fn create(&self, desired: &ResourceDescriptor) -> CallResult<Value>;

    /// Apply `diff` (mutable fields only); returns the updated state
    async fn patch(&self, desired: &ResourceDescriptor, observed: &Value, diff: &[AttributeDiff]) -> CallResult<Value>;

    /// Delete an existing resource; only reached with replace intent
    async fn delete(&self, desired: &ResourceDescriptor, _observed: &Value) -> CallResult<()> {
        Err(NormalizedError::new(
            System::Local,
            format!("delete {}", desired.kind),
            ErrorKind::Validation,
            format!("{} resources cannot be replaced", desired.kind),
        ))
    }

    /// Attributes that cannot change in place
    fn protected_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Attributes owned by the server
    fn server_managed_fields(&self) -> &'static [&'static str] {
        SERVER_MANAGED_FIELDS
    }

    /// Divergent desired attributes
    fn diff(&self, desired: &ResourceDescriptor, observed: &Value) -> Vec<AttributeDiff> {
        let server_managed = self.server_managed_fields();
        let protected = self.protected_fields();
        desired
            .attributes
            .iter()
            .filter(|(field, _)| !server_managed.contains(&field.as_str()))
            .filter_map(|(field, want)| {
                let have = observed.get(field);
                if have.is_some_and(|h| conforms(want, h)) {
                    return None;
                }
                Some(AttributeDiff {
                    field: field.clone(),
                    observed: have.cloned(),
                    desired: want.clone(),
                    protected: protected.contains(&field.as_str()),
                })
            })
            .collect()
    }

    /// Interpret a conflict returned by `create`
    fn create_conflict(&self, _error: &NormalizedError) -> CreateConflict {
        CreateConflict::Genuine
    }
}

/// Patch body carrying only the divergent mutable fields
#[must_use]
pub fn patch_body(diff: &[AttributeDiff]) -> Value {
    Value::Object(
        diff.iter()
            .filter(|d| !d.protected)
            .map(|d| (d.field.clone(), d.desired.clone()))
            .collect(),
    )
}
