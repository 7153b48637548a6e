//! MIG Core - migration orchestration
//!
//! Moves projects from the source platform to the destination platform:
//! - [`Orchestrator`] runs one [`MigrationUnit`] through preflight, reconciliation,
//!   content transfer, policies and cleanup
//! - [`BulkCoordinator`] runs a batch and resumes it after partial failure
//! - [`ArtifactStore`] persists reports, reconciliation results and summaries
//! - [`MigrationConfig`] loads endpoints, policy and governance from TOML
//!
//! # Example
//!
//! ```rust,ignore
//! use mig_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = MigrationConfig::load("mig.toml".as_ref())?;
//! let session = Arc::new(config.session()?);
//! let _guard = SessionGuard::new(session.clone());
//!
//! let client = CallClient::with_reqwest(session)?;
//! let orchestrator = Orchestrator::new(
//!     client,
//!     Arc::new(GitTransfer::new(config.cache_dir())),
//!     ArtifactStore::new(&config.artifacts_dir),
//! )
//! .with_governance(config.governance.clone());
//!
//! let batch = BatchDescriptor::load("batch.json".as_ref())?;
//! let run = BulkCoordinator::new(Arc::new(orchestrator), config.bulk)
//!     .run_descriptor(&batch)
//!     .await?;
//! println!("{} of {} succeeded", run.counters.succeeded, run.counters.total);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod bulk;
pub mod config;
pub mod error;
pub mod governance;
pub mod orchestrator;
pub mod store;
pub mod transfer;
pub mod unit;

pub use bulk::{merge_units, BatchDescriptor, BatchEntry, BulkCoordinator, BulkCounters, BulkPolicy, BulkRun, UnitFailure};
pub use config::{EndpointConfig, MigrationConfig, PreflightConfig, RetryConfig, TimeoutConfig};
pub use error::{ConfigError, MigrationError, StoreError, TransitionError};
pub use governance::{BranchPolicyTemplate, GovernanceTemplate, GroupTemplate, ProjectTemplate, WikiTemplate};
pub use orchestrator::{
    EnrichmentContext, MigrationStep, Orchestrator, PostCreationHook, StepOutcome, StepRecord, UnitSummary,
};
pub use store::{ArtifactStore, ReconciliationRecord, SCHEMA_VERSION};
pub use transfer::{ContentTransfer, GitRunner, GitTransfer, TransferReport, TransferRequest};
pub use unit::{
    allowed_transitions, unit_id, validate_transition, MigrationUnit, SourceRef, StepFailure, UnitIntent, UnitStatus,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with MIG Core
    pub use crate::{
        ArtifactStore, BatchDescriptor, BulkCoordinator, BulkPolicy, BulkRun, GitTransfer, MigrationConfig,
        MigrationError, MigrationStep, MigrationUnit, Orchestrator, UnitStatus, UnitSummary,
    };
    pub use mig_client::prelude::*;
    pub use mig_preflight::DestinationRef;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
