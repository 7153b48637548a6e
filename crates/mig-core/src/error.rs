//! Error types for MIG Core
//!
//! - [`TransitionError`] - illegal unit status changes
//! - [`StoreError`] - artifact persistence
//! - [`ConfigError`] - configuration loading
//! - [`MigrationError`] - umbrella for orchestrator and coordinator callers

use crate::unit::UnitStatus;
use mig_client::{NormalizedError, SessionError, System};
use std::path::PathBuf;

/// Main MIG error type
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Status change refused
    #[error("transition error: {0}")]
    Transition(#[from] TransitionError),

    /// Artifact could not be read or written
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote call failed
    #[error("remote error: {0}")]
    Remote(#[from] NormalizedError),

    /// Batch descriptor invalid
    #[error("invalid batch descriptor: {0}")]
    Descriptor(String),
}

impl MigrationError {
    /// Check if re-running may succeed without operator action
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::Remote(e) => e.is_retryable(),
            MigrationError::Store(StoreError::Io { .. }) => true,
            _ => false,
        }
    }
}

/// Illegal unit status change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Not in the transition table
    #[error("illegal transition {from} -> {to}")]
    Illegal {
        /// Current status
        from: UnitStatus,
        /// Requested status
        to: UnitStatus,
    },

    /// Blocked unit started without override
    #[error("unit is blocked by preflight findings; an override is required")]
    OverrideRequired,
}

/// Artifact persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON encode/decode failure
    #[error("malformed artifact {}: {source}", path.display())]
    Json {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Written by an incompatible version
    #[error("unsupported schema version {found} in {} (expected {expected})", path.display())]
    UnsupportedSchema {
        /// Path involved
        path: PathBuf,
        /// Version found
        found: u32,
        /// Version supported
        expected: u32,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File unreadable
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML invalid
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Token environment variable unset or empty
    #[error("{system} token variable '{var}' is not set")]
    MissingToken {
        /// System the token is for
        system: System,
        /// Variable name
        var: String,
    },

    /// Value out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Session rejected the settings
    #[error(transparent)]
    Session(#[from] SessionError),
}
