//! Versioned JSON artifacts on disk
//!
//! Layout under the artifacts root:
//! - `units/<unit-id>/preflight.json`
//! - `units/<unit-id>/reconciliation.json`
//! - `units/<unit-id>/summary.json`
//! - `bulk-run.json`
//!
//! Writes go to a temp file in the target directory and are renamed into
//! place, so readers never see a partial artifact.

use crate::bulk::BulkRun;
use crate::error::StoreError;
use crate::orchestrator::UnitSummary;
use mig_preflight::PreflightReport;
use mig_reconcile::ReconciliationResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Schema version written into every artifact
pub const SCHEMA_VERSION: u32 = 1;

const PREFLIGHT_FILE: &str = "preflight.json";
const RECONCILIATION_FILE: &str = "reconciliation.json";
const SUMMARY_FILE: &str = "summary.json";
const BULK_RUN_FILE: &str = "bulk-run.json";

/// Persisted reconciliation results of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    /// Schema version
    pub schema_version: u32,
    /// Unit id
    pub unit_id: String,
    /// Results in reconciliation order
    pub results: Vec<ReconciliationResult>,
}

/// Artifact store rooted at a directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create store; the directory is created lazily
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one unit
    #[must_use]
    pub fn unit_dir(&self, unit_id: &str) -> PathBuf {
        self.root.join("units").join(unit_id)
    }

    /// Path of the bulk state file
    #[must_use]
    pub fn bulk_run_path(&self) -> PathBuf {
        self.root.join(BULK_RUN_FILE)
    }

    /// Persist a preflight report
    ///
    /// # Errors
    /// I/O or serialization failure.
    pub fn save_preflight(&self, unit_id: &str, report: &PreflightReport) -> Result<PathBuf, StoreError> {
        let path = self.unit_dir(unit_id).join(PREFLIGHT_FILE);
        write_json(&path, report)?;
        Ok(path)
    }

    /// Latest preflight report of a unit
    ///
    /// # Errors
    /// I/O failure, malformed JSON, or unsupported schema.
    pub fn load_preflight(&self, unit_id: &str) -> Result<Option<PreflightReport>, StoreError> {
        read_json(&self.unit_dir(unit_id).join(PREFLIGHT_FILE))
    }

    /// Persist reconciliation results
    ///
    /// # Errors
    /// I/O or serialization failure.
    pub fn save_reconciliation(&self, unit_id: &str, results: &[ReconciliationResult]) -> Result<PathBuf, StoreError> {
        let path = self.unit_dir(unit_id).join(RECONCILIATION_FILE);
        let record = ReconciliationRecord {
            schema_version: SCHEMA_VERSION,
            unit_id: unit_id.to_string(),
            results: results.to_vec(),
        };
        write_json(&path, &record)?;
        Ok(path)
    }

    /// Reconciliation results of a unit
    ///
    /// # Errors
    /// I/O failure, malformed JSON, or unsupported schema.
    pub fn load_reconciliation(&self, unit_id: &str) -> Result<Option<ReconciliationRecord>, StoreError> {
        read_json(&self.unit_dir(unit_id).join(RECONCILIATION_FILE))
    }

    /// Persist a unit summary
    ///
    /// # Errors
    /// I/O or serialization failure.
    pub fn save_summary(&self, summary: &UnitSummary) -> Result<PathBuf, StoreError> {
        let path = self.unit_dir(&summary.unit_id).join(SUMMARY_FILE);
        write_json(&path, summary)?;
        Ok(path)
    }

    /// Summary of a unit
    ///
    /// # Errors
    /// I/O failure, malformed JSON, or unsupported schema.
    pub fn load_summary(&self, unit_id: &str) -> Result<Option<UnitSummary>, StoreError> {
        read_json(&self.unit_dir(unit_id).join(SUMMARY_FILE))
    }

    /// Persist the bulk state
    ///
    /// # Errors
    /// I/O or serialization failure.
    pub fn save_bulk_run(&self, run: &BulkRun) -> Result<PathBuf, StoreError> {
        let path = self.bulk_run_path();
        write_json(&path, run)?;
        Ok(path)
    }

    /// Bulk state from a previous invocation
    ///
    /// # Errors
    /// I/O failure, malformed JSON, or unsupported schema.
    pub fn load_bulk_run(&self) -> Result<Option<BulkRun>, StoreError> {
        read_json(&self.bulk_run_path())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    serde_json::to_writer_pretty(&mut temp, value).map_err(|e| StoreError::json(path, e))?;
    temp.write_all(b"\n").map_err(|e| StoreError::io(path, e))?;
    temp.as_file().sync_all().map_err(|e| StoreError::io(path, e))?;
    temp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| StoreError::json(path, e))?;

    let found = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0);
    if found != SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            path: path.to_path_buf(),
            found,
            expected: SCHEMA_VERSION,
        });
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| StoreError::json(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mig_preflight::{Finding, FindingCode, PreflightMetrics};
    use mig_reconcile::{Attributes, ReconcileOutcome, ResourceDescriptor};
    use pretty_assertions::assert_eq;

    fn report() -> PreflightReport {
        PreflightReport::new(
            "group/app",
            Some("alpha/app".into()),
            vec![Finding::warning(FindingCode::OversizedWithoutLfs, "big")],
            PreflightMetrics::default(),
        )
    }

    #[test]
    fn preflight_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let saved = report();
        let path = store.save_preflight("alpha--app", &saved).unwrap();
        assert!(path.ends_with("units/alpha--app/preflight.json"));
        assert_eq!(store.load_preflight("alpha--app").unwrap(), Some(saved));
    }

    #[test]
    fn missing_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.load_summary("nope").unwrap().is_none());
        assert!(store.load_bulk_run().unwrap().is_none());
    }

    #[test]
    fn unknown_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.unit_dir("u").join(PREFLIGHT_FILE);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"schema_version": 99}"#).unwrap();

        let err = store.load_preflight("u").unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchema { found: 99, .. }));
    }

    #[test]
    fn reconciliation_record_wraps_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let descriptor = ResourceDescriptor::project("alpha", Attributes::new());
        let results = vec![ReconciliationResult::new(&descriptor, ReconcileOutcome::Created)];

        store.save_reconciliation("u", &results).unwrap();
        let record = store.load_reconciliation("u").unwrap().unwrap();
        assert_eq!(record.schema_version, SCHEMA_VERSION);
        assert_eq!(record.results, results);
    }

    #[test]
    fn overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save_preflight("u", &report()).unwrap();
        store.save_preflight("u", &report()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(store.unit_dir("u")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
