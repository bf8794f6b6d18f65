//! Write retries, prerequisite failures and the time budget.

mod common;

use std::time::Duration;

use common::*;
use esco_rs::edges::RelationKind;
use esco_rs::nodes::EntityKind;
use esco_rs::pipeline::RunStatus;
use esco_rs::IngestionOutcome;

// ---------------------------------------------------------------------------
// Write retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transient_write_failures_are_retried() {
    let snap = Snapshot::minimal();
    let store = TestStore::failing(2);
    let mut config = snap.config();
    config.ingestion.max_write_attempts = 5;

    let outcome = ingest(&store, &config).await;
    assert_eq!(outcome.exit_code(), 0, "{outcome:?}");
    assert_eq!(entity_count(&store, EntityKind::Skill).await, 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let snap = Snapshot::minimal();
    let store = TestStore::failing(u32::MAX);
    let mut config = snap.config();
    config.ingestion.max_write_attempts = 3;

    let outcome = ingest(&store, &config).await;
    assert_eq!(outcome.exit_code(), 3);
    let IngestionOutcome::Failed { run_id, error, summary } = &outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(error.contains("after 3 attempts"), "{error}");
    assert!(summary.totals().failed > 0);

    let run = store.latest();
    assert_eq!(Some(run.run_id), *run_id);
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_summary.unwrap().contains("Write failed"));
    assert!(run.summary.is_some());
    assert!(run.completed_stages.is_empty());
}

// ---------------------------------------------------------------------------
// Prerequisites
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_file_fails_prerequisites_without_run() {
    let snap = Snapshot::minimal();
    snap.remove(RelationKind::OccupationSkill.file_name());
    let store = TestStore::new();

    let outcome = ingest(&store, &snap.config()).await;
    assert_eq!(outcome.exit_code(), 2);
    let IngestionOutcome::PrerequisitesFailed(report) = &outcome else {
        panic!("expected prerequisite failure, got {outcome:?}");
    };
    let failed: Vec<_> = report.failures().map(|c| c.name.clone()).collect();
    assert_eq!(
        failed,
        vec![format!("file {}", RelationKind::OccupationSkill.file_name())]
    );
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn test_bad_header_fails_prerequisites() {
    let snap = Snapshot::minimal();
    snap.write(EntityKind::IscoGroup.file_name(), "conceptUri,preferredLabel\nC1,x\n");
    let store = TestStore::new();

    let outcome = ingest(&store, &snap.config()).await;
    let IngestionOutcome::PrerequisitesFailed(report) = &outcome else {
        panic!("expected prerequisite failure, got {outcome:?}");
    };
    let detail = report.failures().next().unwrap().detail.clone().unwrap();
    assert!(detail.contains("code"), "{detail}");
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn test_missing_data_dir_fails_prerequisites() {
    let snap = Snapshot::empty();
    let store = TestStore::new();
    let mut config = snap.config();
    config.data_dir = snap.path().join("nope");

    assert_eq!(ingest(&store, &config).await.exit_code(), 2);
}

#[tokio::test]
async fn test_unreachable_store_fails_prerequisites() {
    let snap = Snapshot::minimal();
    let store = TestStore::unreachable();

    let outcome = ingest(&store, &snap.config()).await;
    assert_eq!(outcome.exit_code(), 2);
    let IngestionOutcome::PrerequisitesFailed(report) = &outcome else {
        panic!("expected prerequisite failure");
    };
    assert!(!report.passed());
}

// ---------------------------------------------------------------------------
// Time budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_time_budget_exceeded_marks_run_failed() {
    let snap = Snapshot::minimal();
    let store = TestStore::slow(Duration::from_secs(2));
    let mut config = snap.config();
    config.ingestion.time_budget_secs = Some(1);

    let outcome = ingest(&store, &config).await;
    assert_eq!(outcome.exit_code(), 4);
    let IngestionOutcome::TimedOut { run_id } = &outcome else {
        panic!("expected timeout, got {outcome:?}");
    };

    let run = store.latest();
    assert_eq!(*run_id, Some(run.run_id));
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_summary.as_deref(), Some("time budget exceeded"));
}
