//! MIG Reconcile - idempotent "ensure desired state"
//!
//! For every descriptor:
//! 1. Read current state
//! 2. Absent: create, yielding `Created`
//! 3. Conformant (server-managed fields ignored): `AlreadyConformant`, no write
//! 4. Divergent on mutable fields: patch the minimal diff, yielding `Updated`
//! 5. Divergent on protected fields: `ConflictSkipped`, left for manual resolution
//!
//! Replace intent turns step 3-5 into delete-then-create; a failed delete
//! stops before any create.

#![warn(unreachable_pub)]

pub mod handler;
pub mod kinds;
pub mod reconciler;
pub mod resource;

pub use handler::{CreateConflict, ResourceHandler, SERVER_MANAGED_FIELDS};
pub use kinds::PolicyType;
pub use reconciler::Reconciler;
pub use resource::{
    conforms, AttributeDiff, Attributes, ReconcileOutcome, ReconciliationResult, ReplaceIntent, ResourceDescriptor,
    ResourceKind,
};
