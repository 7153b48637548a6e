//! Preflight against in-memory platforms

use mig_client::api::{DestinationApi, SourceApi};
use mig_preflight::{DestinationRef, FindingCode, PreflightRequest, PreflightValidator, Severity};
use mig_test_utils::{FakePlatforms, FakeSourceProject};
use pretty_assertions::assert_eq;

fn validator(platforms: &FakePlatforms) -> PreflightValidator {
    let client = platforms.client();
    PreflightValidator::new(SourceApi::new(client.clone()), DestinationApi::new(client))
}

fn request() -> PreflightRequest {
    PreflightRequest::new("team/app").with_destination(DestinationRef::new("alpha", "app"))
}

fn severity_of(report: &mig_preflight::PreflightReport, code: FindingCode) -> Option<Severity> {
    report.findings.iter().find(|f| f.code == code).map(|f| f.severity)
}

#[tokio::test]
async fn clean_project_passes_with_metrics() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(
        FakeSourceProject::new(7, "team/app")
            .with_branches(&["main", "release/1.0"])
            .with_tags(&["v1.0"]),
    );

    let report = validator(&platforms).validate(&request()).await;

    assert!(report.passed);
    assert_eq!(report.metrics.branches, vec!["main".to_string(), "release/1.0".to_string()]);
    assert_eq!(report.metrics.tags, vec!["v1.0".to_string()]);
    assert_eq!(report.metrics.default_branch.as_deref(), Some("main"));
    assert_eq!(report.metrics.repository_size_bytes, 4096);
    assert_eq!(
        severity_of(&report, FindingCode::DestinationProjectMissing),
        Some(Severity::Info)
    );
    assert!(platforms.mutations().is_empty());
}

#[tokio::test]
async fn missing_source_blocks() {
    let platforms = FakePlatforms::new();

    let report = validator(&platforms).validate(&request()).await;

    assert!(!report.passed);
    assert_eq!(
        severity_of(&report, FindingCode::SourceInaccessible),
        Some(Severity::Blocking)
    );
}

#[tokio::test]
async fn destination_history_without_intent_blocks() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(FakeSourceProject::new(7, "team/app"));
    platforms.add_destination_project("alpha");
    platforms.add_destination_repository("alpha", "app", &["refs/heads/main"]);

    let report = validator(&platforms).validate(&request()).await;

    assert!(!report.passed);
    assert_eq!(report.blocking().count(), 1);
    assert!(report.has(FindingCode::DestinationHasHistory));
}

#[tokio::test]
async fn destination_history_with_replace_warns() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(FakeSourceProject::new(7, "team/app"));
    platforms.add_destination_project("alpha");
    platforms.add_destination_repository("alpha", "app", &["refs/heads/main"]);

    let report = validator(&platforms).validate(&request().with_replace(true)).await;

    assert!(report.passed);
    assert_eq!(
        severity_of(&report, FindingCode::DestinationHistoryReplace),
        Some(Severity::Warning)
    );
}

#[tokio::test]
async fn destination_history_with_sync_is_informational() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(FakeSourceProject::new(7, "team/app"));
    platforms.add_destination_project("alpha");
    platforms.add_destination_repository("alpha", "app", &["refs/heads/main"]);

    let report = validator(&platforms).validate(&request().with_sync(true)).await;

    assert!(report.passed);
    assert_eq!(
        severity_of(&report, FindingCode::DestinationHistorySync),
        Some(Severity::Info)
    );
}

#[tokio::test]
async fn empty_destination_repository_is_informational() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(FakeSourceProject::new(7, "team/app"));
    platforms.add_destination_project("alpha");
    platforms.add_destination_repository("alpha", "app", &[]);

    let report = validator(&platforms).validate(&request()).await;

    assert!(report.passed);
    assert!(report.has(FindingCode::DestinationRepositoryExists));
}

#[tokio::test]
async fn empty_source_warns() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(FakeSourceProject::new(7, "team/app").empty());

    let report = validator(&platforms).validate(&request()).await;

    assert!(report.passed);
    assert_eq!(severity_of(&report, FindingCode::SourceEmpty), Some(Severity::Warning));
    assert!(report.metrics.branches.is_empty());
}

#[tokio::test]
async fn oversized_without_lfs_warns() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(FakeSourceProject::new(7, "team/app").with_size(10_000));

    let report = validator(&platforms)
        .with_oversize_threshold(5_000)
        .validate(&request())
        .await;

    assert!(report.passed);
    assert_eq!(
        severity_of(&report, FindingCode::OversizedWithoutLfs),
        Some(Severity::Warning)
    );
    assert_eq!(report.metrics.large_object_estimate, 5_000);
}

#[tokio::test]
async fn oversized_with_lfs_reports_large_objects() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(
        FakeSourceProject::new(7, "team/app")
            .with_size(10_000)
            .with_lfs(8_000),
    );

    let report = validator(&platforms)
        .with_oversize_threshold(5_000)
        .validate(&request())
        .await;

    assert!(!report.has(FindingCode::OversizedWithoutLfs));
    assert!(report.has(FindingCode::LargeObjectsPresent));
    assert_eq!(report.metrics.large_object_estimate, 8_000);
}

#[tokio::test]
async fn rejected_credentials_block_both_sides() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(FakeSourceProject::new(7, "team/app"));
    platforms.reject_credentials(true);

    let report = validator(&platforms).validate(&request()).await;

    assert!(!report.passed);
    let invalid = report
        .findings
        .iter()
        .filter(|f| f.code == FindingCode::CredentialsInvalid)
        .count();
    assert_eq!(invalid, 2);
    assert!(!report.has(FindingCode::SourceInaccessible));
}

#[tokio::test]
async fn unreachable_destination_is_a_finding_not_an_error() {
    let platforms = FakePlatforms::new();
    platforms.add_source_project(FakeSourceProject::new(7, "team/app"));
    platforms.fail("GET", "_apis/projects/alpha", 400, None);

    let report = validator(&platforms).validate(&request()).await;

    assert!(report.has(FindingCode::DestinationUnreachable));
}
