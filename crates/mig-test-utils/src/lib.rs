//! Testing utilities for MIG workspace
//!
//! In-memory platforms, a fake content transfer and session fixtures shared
//! by the integration tests of every crate.

#![allow(missing_docs)]

pub mod platforms;
pub mod transfer;

pub use platforms::{
    attributes, session, session_with_retry, FakePlatforms, FakeSourceProject, Platform, RecordedRequest,
    DESTINATION_TOKEN, DESTINATION_URL, SOURCE_TOKEN, SOURCE_URL,
};
pub use transfer::FakeTransfer;

use mig_core::{ArtifactStore, Orchestrator};
use std::sync::Arc;

/// Orchestrator over `platforms` with a fake transfer and a store at `root`
pub fn orchestrator(platforms: &FakePlatforms, transfer: &FakeTransfer, root: &std::path::Path) -> Orchestrator {
    Orchestrator::new(platforms.client(), Arc::new(transfer.clone()), ArtifactStore::new(root))
}
