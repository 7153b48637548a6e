//! Bulk coordinator against in-memory platforms

use mig_core::{ArtifactStore, BatchDescriptor, BulkCoordinator, BulkPolicy, MigrationStep, UnitStatus};
use mig_test_utils::{orchestrator, FakePlatforms, FakeSourceProject, FakeTransfer};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    platforms: FakePlatforms,
    transfer: FakeTransfer,
    dir: TempDir,
}

impl Fixture {
    fn new(sources: &[&str]) -> Self {
        let platforms = FakePlatforms::new();
        for (id, path) in (1u64..).zip(sources) {
            platforms.add_source_project(FakeSourceProject::new(id, path).with_tags(&["v1"]));
        }
        let transfer = FakeTransfer::new(&platforms);
        Self {
            platforms,
            transfer,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn coordinator(&self, policy: BulkPolicy) -> BulkCoordinator {
        let orchestrator = orchestrator(&self.platforms, &self.transfer, self.dir.path());
        BulkCoordinator::new(Arc::new(orchestrator), policy)
    }
}

fn batch(units: serde_json::Value) -> BatchDescriptor {
    BatchDescriptor::from_json_str(&json!({ "destination_project": "alpha", "units": units }).to_string()).unwrap()
}

fn statuses(run: &mig_core::BulkRun) -> Vec<(String, UnitStatus)> {
    run.units.iter().map(|u| (u.id.clone(), u.status)).collect()
}

#[tokio::test]
async fn batch_runs_every_unit_in_order() {
    let fx = Fixture::new(&["team/a", "team/b", "team/c"]);
    let descriptor = batch(json!([{ "source": "team/a" }, { "source": "team/b" }, { "source": "team/c" }]));

    let run = fx
        .coordinator(BulkPolicy::default())
        .run_descriptor(&descriptor)
        .await
        .unwrap();

    assert_eq!(
        statuses(&run),
        vec![
            ("alpha--a".to_string(), UnitStatus::Succeeded),
            ("alpha--b".to_string(), UnitStatus::Succeeded),
            ("alpha--c".to_string(), UnitStatus::Succeeded),
        ]
    );
    assert_eq!(run.counters.total, 3);
    assert_eq!(run.counters.succeeded, 3);
    assert_eq!(run.counters.resumed, 0);
    assert!(run.all_succeeded());
    assert!(run.finished_at.is_some());
    assert_eq!(fx.transfer.calls(), 3);
    assert_eq!(fx.platforms.refs("alpha", "b"), vec!["refs/heads/main".to_string(), "refs/tags/v1".to_string()]);
}

#[tokio::test]
async fn batch_state_is_persisted() {
    let fx = Fixture::new(&["team/a"]);
    let run = fx
        .coordinator(BulkPolicy::default())
        .run_descriptor(&batch(json!([{ "source": "team/a" }])))
        .await
        .unwrap();

    let stored = ArtifactStore::new(fx.dir.path()).load_bulk_run().unwrap().unwrap();
    assert_eq!(stored.run_id, run.run_id);
    assert_eq!(stored.counters, run.counters);
    assert_eq!(stored.units[0].status, UnitStatus::Succeeded);
}

#[tokio::test]
async fn resume_only_reprocesses_the_failed_unit() {
    let fx = Fixture::new(&["team/a", "team/b", "team/c"]);
    fx.transfer.fail_source("team/c");
    let descriptor = batch(json!([{ "source": "team/a" }, { "source": "team/b" }, { "source": "team/c" }]));

    let first = fx
        .coordinator(BulkPolicy::default())
        .run_descriptor(&descriptor)
        .await
        .unwrap();
    assert_eq!(first.counters.succeeded, 2);
    assert_eq!(first.counters.failed, 1);
    assert_eq!(first.failures[0].unit_id, "alpha--c");
    assert_eq!(first.failures[0].step, Some(MigrationStep::TransferContent));

    fx.transfer.clear_failures();
    fx.platforms.clear_requests();
    let second = fx
        .coordinator(BulkPolicy::default())
        .run_descriptor(&descriptor)
        .await
        .unwrap();

    assert_eq!(second.counters.succeeded, 3);
    assert_eq!(second.counters.resumed, 2);
    assert_eq!(second.counters.failed, 0);
    let touched: Vec<_> = fx
        .platforms
        .requests()
        .into_iter()
        .filter(|r| r.path.contains("team/a") || r.path.contains("team/b") || r.path.ends_with("/a") || r.path.ends_with("/b"))
        .collect();
    assert!(touched.is_empty(), "{touched:?}");
    assert_eq!(fx.platforms.refs("alpha", "c"), vec!["refs/heads/main".to_string(), "refs/tags/v1".to_string()]);
}

#[tokio::test]
async fn resume_picks_up_changed_intent_for_blocked_unit() {
    let fx = Fixture::new(&["team/a", "team/b", "team/c"]);
    fx.platforms.add_destination_project("alpha");
    fx.platforms.add_destination_repository("alpha", "c", &["refs/heads/main"]);
    let entries = json!([{ "source": "team/a" }, { "source": "team/b" }, { "source": "team/c" }]);

    let first = fx
        .coordinator(BulkPolicy::default())
        .run_descriptor(&batch(entries))
        .await
        .unwrap();
    assert_eq!(first.counters.succeeded, 2);
    assert_eq!(first.counters.blocked, 1);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].unit_id, "alpha--c");
    assert_eq!(first.failures[0].step, Some(MigrationStep::Preflight));

    // Operator opts into pushing onto the existing history and re-runs.
    fx.platforms.clear_requests();
    let entries = json!([
        { "source": "team/a" },
        { "source": "team/b" },
        { "source": "team/c", "sync": true }
    ]);
    let second = fx
        .coordinator(BulkPolicy::default())
        .run_descriptor(&batch(entries))
        .await
        .unwrap();

    assert_eq!(second.counters.succeeded, 3);
    assert_eq!(second.counters.resumed, 2);
    assert!(second.failures.is_empty());
    assert_eq!(fx.platforms.count("GET", "projects/team/a"), 0);
    assert_eq!(fx.platforms.count("GET", "projects/team/b"), 0);
    assert!(fx.platforms.count("GET", "projects/team/c") > 0);
    assert_eq!(fx.transfer.calls(), 3);
}

#[tokio::test]
async fn failed_unit_is_retried_on_the_next_run() {
    let fx = Fixture::new(&["team/a", "team/b"]);
    fx.transfer.fail_with(Some("connection reset"));
    let first = fx
        .coordinator(BulkPolicy::default())
        .run_descriptor(&batch(json!([{ "source": "team/a" }])))
        .await
        .unwrap();
    assert_eq!(first.counters.failed, 1);
    assert_eq!(first.failures[0].step, Some(MigrationStep::TransferContent));
    assert!(first.failures[0].reason.contains("connection reset"));

    fx.transfer.fail_with(None);
    let second = fx
        .coordinator(BulkPolicy::default())
        .run_descriptor(&batch(json!([{ "source": "team/a" }, { "source": "team/b" }])))
        .await
        .unwrap();

    assert_eq!(second.counters.succeeded, 2);
    assert_eq!(second.counters.resumed, 0);
    let a = second.unit("alpha--a").unwrap();
    assert!(a.last_error.is_none());
}

#[tokio::test]
async fn stop_on_first_failure_leaves_rest_pending() {
    // team/a does not exist on the source.
    let fx = Fixture::new(&["team/b", "team/c"]);
    let policy = BulkPolicy {
        stop_on_first_failure: true,
        ..BulkPolicy::default()
    };

    let run = fx
        .coordinator(policy)
        .run_descriptor(&batch(json!([{ "source": "team/a" }, { "source": "team/b" }, { "source": "team/c" }])))
        .await
        .unwrap();

    assert_eq!(
        statuses(&run),
        vec![
            ("alpha--a".to_string(), UnitStatus::Blocked),
            ("alpha--b".to_string(), UnitStatus::Pending),
            ("alpha--c".to_string(), UnitStatus::Pending),
        ]
    );
    assert_eq!(run.counters.blocked, 1);
    assert_eq!(run.counters.skipped, 2);
    assert_eq!(run.skipped, vec!["alpha--b".to_string(), "alpha--c".to_string()]);
    assert_eq!(fx.transfer.calls(), 0);
    assert!(!run.all_succeeded());
}

#[tokio::test]
async fn without_stop_policy_later_units_still_run() {
    let fx = Fixture::new(&["team/b"]);

    let run = fx
        .coordinator(BulkPolicy::default())
        .run_descriptor(&batch(json!([{ "source": "team/a" }, { "source": "team/b" }])))
        .await
        .unwrap();

    assert_eq!(run.counters.blocked, 1);
    assert_eq!(run.counters.succeeded, 1);
    assert_eq!(run.unit("alpha--b").unwrap().status, UnitStatus::Succeeded);
}

#[tokio::test]
async fn parallel_units_keep_batch_order() {
    let fx = Fixture::new(&["team/a", "team/b", "team/c", "team/d"]);
    let policy = BulkPolicy {
        max_parallel: 3,
        ..BulkPolicy::default()
    };

    let run = fx
        .coordinator(policy)
        .run_descriptor(&batch(json!([
            { "source": "team/a" },
            { "source": "team/b" },
            { "source": "team/c" },
            { "source": "team/d" }
        ])))
        .await
        .unwrap();

    let ids: Vec<_> = run.units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha--a", "alpha--b", "alpha--c", "alpha--d"]);
    assert_eq!(run.counters.succeeded, 4);
    assert!(fx.platforms.project("alpha").is_some());
    assert_eq!(fx.transfer.calls(), 4);
}

#[tokio::test]
async fn cancelled_batch_starts_nothing() {
    let fx = Fixture::new(&["team/a", "team/b"]);
    let orchestrator = orchestrator(&fx.platforms, &fx.transfer, fx.dir.path());
    orchestrator.cancellation().cancel();

    let run = BulkCoordinator::new(Arc::new(orchestrator), BulkPolicy::default())
        .run_descriptor(&batch(json!([{ "source": "team/a" }, { "source": "team/b" }])))
        .await
        .unwrap();

    assert_eq!(run.counters.skipped, 2);
    assert!(fx.platforms.requests().is_empty());
}
