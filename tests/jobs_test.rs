//! Queued jobs: persistence, dispatch and record retention.

use netctrl_core::{
    engine::CancellationToken,
    jobs::{JobPayload, JobRunner, Operation},
    model::EntityKind,
    EngineError,
};
use serde_json::json;
use tempfile::tempdir;
use test_log::test;

mod common;
use common::{exists, id, open_engine, seed_dataset};

#[test(tokio::test)]
async fn successful_jobs_leave_the_queue() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;
    let runner = JobRunner::new(engine.clone());

    let job = runner
        .enqueue(&JobPayload::new(
            Operation::Create,
            Some(EntityKind::Node),
            json!([{ "id": "n7", "fields": [{ "field_id": "f2", "value": "BRCA1" }] }]),
        ))
        .await
        .unwrap();
    let queued = runner.get(&job).await.unwrap().unwrap();
    assert_eq!(queued.operation, "create");
    assert_eq!(queued.kind.as_deref(), Some("node"));

    let report = runner.run(&job, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.committed, 1);
    assert!(exists(&engine, EntityKind::Node, "n7").await);
    assert!(runner.get(&job).await.unwrap().is_none());
}

#[test(tokio::test)]
async fn delete_and_stop_jobs_take_identifiers() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;
    let runner = JobRunner::new(engine.clone());
    let token = CancellationToken::new();

    let stop = runner
        .enqueue(&JobPayload::new(Operation::StopAnalyses, None, json!(["a2"])))
        .await
        .unwrap();
    let delete = runner
        .enqueue(&JobPayload::new(
            Operation::Delete,
            Some(EntityKind::Edge),
            json!(["e1"]),
        ))
        .await
        .unwrap();

    let stopped = runner.run(&stop, &token).await.unwrap();
    assert_eq!(stopped.kind, EntityKind::Analysis);
    assert_eq!(stopped.committed, 1);
    let deleted = runner.run(&delete, &token).await.unwrap();
    assert_eq!(deleted.cascaded[&EntityKind::Network], 1);
    assert!(!exists(&engine, EntityKind::Edge, "e1").await);
    assert!(runner.list().await.unwrap().is_empty());
}

#[test(tokio::test)]
async fn failed_jobs_keep_their_record() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    let runner = JobRunner::new(engine);
    let token = CancellationToken::new();

    let garbage = runner.enqueue_raw("{ not json").await.unwrap();
    assert!(matches!(
        runner.run(&garbage, &token).await,
        Err(EngineError::Serialization(_))
    ));
    assert_eq!(runner.get(&garbage).await.unwrap().unwrap().operation, "unknown");

    let no_items = runner
        .enqueue_raw(r#"{ "operation": "delete", "kind": "node", "items": null }"#)
        .await
        .unwrap();
    assert!(matches!(
        runner.run(&no_items, &token).await,
        Err(EngineError::InvalidArgument(_))
    ));
    let stored = runner.get(&no_items).await.unwrap().unwrap();
    assert_eq!(stored.operation, "delete");
    assert_eq!(stored.kind.as_deref(), Some("node"));

    let no_kind = runner
        .enqueue_raw(r#"{ "operation": "create", "items": [] }"#)
        .await
        .unwrap();
    assert!(runner.run(&no_kind, &token).await.is_err());

    assert_eq!(runner.list().await.unwrap().len(), 3);
}

#[test(tokio::test)]
async fn unknown_jobs_are_not_found() {
    let dir = tempdir().unwrap();
    let runner = JobRunner::new(open_engine(&dir, 10).await);
    assert!(matches!(
        runner.run(&id("nope"), &CancellationToken::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[test(tokio::test)]
async fn cancelled_jobs_stay_queued_for_a_rerun() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;
    let runner = JobRunner::new(engine.clone());

    let job = runner
        .enqueue(&JobPayload::new(
            Operation::Delete,
            Some(EntityKind::Database),
            json!(["d2"]),
        ))
        .await
        .unwrap();
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let report = runner.run(&job, &cancelled).await.unwrap();
    assert!(report.cancelled);
    assert!(exists(&engine, EntityKind::Database, "d2").await);
    assert!(runner.get(&job).await.unwrap().is_some());

    let rerun = runner.run(&job, &CancellationToken::new()).await.unwrap();
    assert!(!rerun.cancelled);
    assert!(!exists(&engine, EntityKind::Database, "d2").await);
    assert!(runner.get(&job).await.unwrap().is_none());
}

#[test(tokio::test)]
async fn run_pending_reports_every_job() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;
    let runner = JobRunner::new(engine.clone());

    let good = runner
        .enqueue(&JobPayload::new(
            Operation::Delete,
            Some(EntityKind::Node),
            json!(["n4"]),
        ))
        .await
        .unwrap();
    let bad = runner
        .enqueue(&JobPayload::new(
            Operation::Create,
            Some(EntityKind::Path),
            json!([]),
        ))
        .await
        .unwrap();

    let results = runner.run_pending(&CancellationToken::new()).await.unwrap();
    assert_eq!(results.len(), 2);
    for (job, result) in &results {
        if *job == good {
            assert_eq!(result.as_ref().unwrap().committed, 1);
        } else {
            assert_eq!(*job, bad);
            assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
        }
    }
    let remaining = runner.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, bad);
    assert!(!exists(&engine, EntityKind::Network, "w2").await);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(runner.run_pending(&cancelled).await.unwrap().is_empty());
}
