//! Analysis snapshots, run lifecycle and control path storage.

use netctrl_core::{
    engine::{AnalysisInput, CancellationToken, ControlPathInput, PathInput, RejectionReason},
    model::{AnalysisAlgorithm, AnalysisNodeRole, AnalysisStatus, EntityKind, Id},
    EngineError,
};
use tempfile::tempdir;
use test_log::test;

mod common;
use common::{analysis_input, exists, id, ids, open_engine, seed_dataset};

fn control_path(control_path_id: &str, analysis_id: &str, paths: &[&[&str]]) -> ControlPathInput {
    ControlPathInput {
        id: Some(id(control_path_id)),
        analysis_id: id(analysis_id),
        algorithm: AnalysisAlgorithm::Greedy,
        paths: paths
            .iter()
            .map(|nodes| PathInput {
                id: None,
                node_ids: ids(nodes),
            })
            .collect(),
    }
}

async fn start(engine: &netctrl_core::engine::Engine, analysis_id: &str) {
    engine
        .update_analysis_status(&id(analysis_id), AnalysisStatus::Ongoing, "worker picked up")
        .await
        .unwrap();
}

#[test(tokio::test)]
async fn snapshot_records_roles_for_every_network_node() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;

    let mut both = analysis_input("a3", "u1", "w1", &["n1", "n3"], &["n3"]);
    both.source_node_collection_ids = ids(&["c1"]);
    let no_target = analysis_input("a4", "u1", "w1", &["n1"], &["n4"]);
    let no_owner = analysis_input("a5", "ghost", "w1", &[], &["n3"]);
    let report = engine
        .create(&[both, no_target, no_owner], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.accepted, ids(&["a3"]));
    let reasons = report
        .rejected
        .iter()
        .map(|rejection| rejection.reason)
        .collect::<Vec<_>>();
    assert_eq!(
        reasons,
        vec![RejectionReason::UnresolvedReferences, RejectionReason::NoOwner]
    );

    let a3 = engine.db().get_analysis(&id("a3")).await.unwrap().unwrap();
    assert_eq!(a3.status, AnalysisStatus::Initializing);
    assert_eq!(a3.nodes[&id("n1")], AnalysisNodeRole::Source);
    assert_eq!(a3.nodes[&id("n3")], AnalysisNodeRole::Target);
    assert_eq!(a3.edge_ids.iter().cloned().collect::<Vec<_>>(), ids(&["e1"]));
    assert_eq!(a3.node_collections[&id("c1")], AnalysisNodeRole::Source);
    assert_eq!(a3.parameters["max_iterations"], 10);
    assert!(a3.date_started.is_none());
}

#[test(tokio::test)]
async fn lifecycle_stamps_dates_and_appends_to_the_log() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;
    let a1 = id("a1");

    start(&engine, "a1").await;
    let ongoing = engine.db().get_analysis(&a1).await.unwrap().unwrap();
    assert_eq!(ongoing.status, AnalysisStatus::Ongoing);
    assert!(ongoing.date_started.is_some());
    assert!(ongoing.date_ended.is_none());

    engine
        .update_analysis_status(&a1, AnalysisStatus::Completed, "")
        .await
        .unwrap();
    let completed = engine.db().get_analysis(&a1).await.unwrap().unwrap();
    assert_eq!(completed.status, AnalysisStatus::Completed);
    assert!(completed.date_ended >= completed.date_started);
    assert_eq!(completed.log.len(), 2);
    assert!(completed.log[0].ends_with("Initializing -> Ongoing: worker picked up"));
    assert!(completed.log[1].ends_with("Ongoing -> Completed"));

    match engine
        .update_analysis_status(&a1, AnalysisStatus::Ongoing, "again")
        .await
    {
        Err(EngineError::InvalidTransition { from, to, .. }) => {
            assert_eq!(from, "Completed");
            assert_eq!(to, "Ongoing");
        }
        other => panic!("expected an invalid transition, got {other:?}"),
    }
    assert!(matches!(
        engine
            .update_analysis_status(&id("missing"), AnalysisStatus::Ongoing, "")
            .await,
        Err(EngineError::NotFound(_))
    ));
}

#[test(tokio::test)]
async fn analysis_edits_only_touch_metadata() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;

    let mut renamed: AnalysisInput = analysis_input("a1", "u2", "w2", &[], &["n4"]);
    renamed.name = "  Renamed  ".to_string();
    let report = engine
        .edit(&[renamed], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.committed, 1);

    let a1 = engine.db().get_analysis(&id("a1")).await.unwrap().unwrap();
    assert_eq!(a1.name, "Renamed");
    assert_eq!(a1.network_ids.into_iter().collect::<Vec<_>>(), ids(&["w1"]));
    assert_eq!(a1.user_ids.into_iter().collect::<Vec<_>>(), ids(&["u1"]));
}

#[test(tokio::test)]
async fn control_paths_need_a_running_analysis_and_snapshot_nodes() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;
    let token = CancellationToken::new();

    let early = engine
        .create(&[control_path("cp1", "a1", &[&["n1", "n3"]])], &token)
        .await
        .unwrap();
    assert_eq!(early.rejected[0].reason, RejectionReason::Invalid);

    start(&engine, "a1").await;
    let report = engine
        .create(
            &[
                control_path("cp1", "a1", &[&["n1", "n3"], &["n3"]]),
                control_path("cp2", "a1", &[&["n1", "n4"]]),
                control_path("cp3", "a1", &[&[]]),
                control_path("cp4", "gone", &[&["n1"]]),
            ],
            &token,
        )
        .await
        .unwrap();
    assert_eq!(report.accepted, ids(&["cp1"]));
    let reasons = report
        .rejected
        .iter()
        .map(|rejection| rejection.reason)
        .collect::<Vec<_>>();
    assert_eq!(
        reasons,
        vec![
            RejectionReason::Invalid,
            RejectionReason::Invalid,
            RejectionReason::UnresolvedReferences
        ]
    );

    let stored = engine.db().get_control_paths(&id("a1")).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].paths.len(), 2);
    assert!(stored[0]
        .paths
        .iter()
        .any(|path| path.node_ids == ids(&["n1", "n3"])));

    let edit = engine
        .edit(&[control_path("cp1", "a1", &[&["n1"]])], &token)
        .await
        .unwrap();
    assert_eq!(edit.rejected[0].reason, RejectionReason::Immutable);
    assert_eq!(edit.committed, 0);
}

#[test(tokio::test)]
async fn replacing_results_drops_the_previous_ones() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 1).await;
    seed_dataset(&engine).await;
    let token = CancellationToken::new();
    start(&engine, "a1").await;

    engine
        .create(
            &[
                control_path("old1", "a1", &[&["n1", "n3"], &["n1"]]),
                control_path("old2", "a1", &[&["n3"]]),
            ],
            &token,
        )
        .await
        .unwrap();

    let fresh = vec![ControlPathInput {
        id: Some(id("new1")),
        analysis_id: id("a1"),
        algorithm: AnalysisAlgorithm::Genetic,
        paths: vec![PathInput {
            id: Some(id("p1")),
            node_ids: ids(&["n3", "n1"]),
        }],
    }];
    let report = engine
        .replace_control_paths(&id("a1"), &fresh, &token)
        .await
        .unwrap();
    assert_eq!(report.cascaded[&EntityKind::Path], 3);
    assert_eq!(report.cascaded[&EntityKind::ControlPath], 2);
    assert_eq!(report.committed, 1);

    let stored = engine.db().get_control_paths(&id("a1")).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id("new1"));
    assert_eq!(stored[0].paths[0].id, id("p1"));
    assert_eq!(stored[0].paths[0].node_ids, ids(&["n3", "n1"]));

    let stray = control_path("x", "a2", &[&["n4"]]);
    assert!(matches!(
        engine.replace_control_paths(&id("a1"), &[stray], &token).await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.replace_control_paths(&id("nope"), &[], &token).await,
        Err(EngineError::NotFound(_))
    ));
}

#[test(tokio::test)]
async fn path_identifiers_are_unique_across_the_call() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;
    let token = CancellationToken::new();
    start(&engine, "a1").await;

    let with_path = |control_path_id: &str, path_id: &str| {
        let mut input = control_path(control_path_id, "a1", &[&["n1", "n3"]]);
        input.paths[0].id = Some(id(path_id));
        input
    };
    let shared = engine
        .create(&[with_path("cp1", "p-shared"), with_path("cp2", "p-shared")], &token)
        .await;
    match shared {
        Err(EngineError::DuplicateIdentifier(duplicates)) => {
            assert_eq!(duplicates, ids(&["p-shared"]))
        }
        other => panic!("expected a duplicate identifier error, got {other:?}"),
    }
    assert!(engine.db().get_control_paths(&id("a1")).await.unwrap().is_empty());

    let first = engine
        .create(&[with_path("cp1", "p1")], &token)
        .await
        .unwrap();
    assert_eq!(first.committed, 1);
    let reused = engine
        .create(&[with_path("cp2", "p1"), with_path("cp3", "p3")], &token)
        .await
        .unwrap();
    assert_eq!(reused.accepted, ids(&["cp3"]));
    assert_eq!(reused.rejected[0].reason, RejectionReason::IdentifierExists);
    assert!(!exists(&engine, EntityKind::ControlPath, "cp2").await);
    assert!(exists(&engine, EntityKind::Path, "p3").await);
}

#[test(tokio::test)]
async fn stopping_depends_on_the_current_status() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;
    start(&engine, "a1").await;
    engine
        .create(
            &[analysis_input("a3", "u1", "w1", &[], &["n1"])],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    engine
        .update_analysis_status(&id("a3"), AnalysisStatus::Error, "crashed")
        .await
        .unwrap();

    let report = engine
        .stop_analyses(&ids(&["a1", "a2", "a3", "zz", "a1"]), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.accepted, ids(&["a1", "a2"]));
    assert_eq!(report.committed, 2);
    let reasons = report
        .rejected
        .iter()
        .map(|rejection| (rejection.id.clone(), rejection.reason))
        .collect::<Vec<_>>();
    assert_eq!(
        reasons,
        vec![
            (Some(id("a3")), RejectionReason::Invalid),
            (Some(id("zz")), RejectionReason::IdentifierNotFound)
        ]
    );

    let status = |analysis: &str| {
        let analysis = Id::from(analysis);
        let db = engine.db().clone();
        async move { db.get_analysis(&analysis).await.unwrap().unwrap() }
    };
    assert_eq!(status("a1").await.status, AnalysisStatus::Stopping);
    let a2 = status("a2").await;
    assert_eq!(a2.status, AnalysisStatus::Stopped);
    assert!(a2.date_ended.is_some());
    assert!(a2.log[0].ends_with("stop requested"));
}

#[test(tokio::test)]
async fn deleting_an_analysis_deletes_its_results() {
    let dir = tempdir().unwrap();
    let engine = open_engine(&dir, 10).await;
    seed_dataset(&engine).await;
    let token = CancellationToken::new();
    start(&engine, "a1").await;
    engine
        .create(&[control_path("cp1", "a1", &[&["n1", "n3"]])], &token)
        .await
        .unwrap();

    let report = engine
        .delete(EntityKind::Analysis, &ids(&["a1"]), &token)
        .await
        .unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(report.cascaded[&EntityKind::ControlPath], 1);
    assert_eq!(report.cascaded[&EntityKind::Path], 1);
    assert!(!exists(&engine, EntityKind::ControlPath, "cp1").await);
    assert!(exists(&engine, EntityKind::Network, "w1").await);
}
