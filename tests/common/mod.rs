//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::collections::BTreeMap;

use netctrl_core::{
    config::EngineConfig,
    engine::{
        AnalysisInput, CancellationToken, DatabaseFieldInput, DatabaseInput, DatabaseTypeInput,
        EdgeEndpointInput, EdgeInput, Engine, FieldValueInput, NetworkInput, NodeCollectionInput,
        NodeInput, UserInput,
    },
    model::{AnalysisAlgorithm, EdgeRole, EntityKind, Id},
};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// An engine over a fresh store inside `dir`.
#[allow(dead_code)]
pub async fn open_engine(dir: &TempDir, batch_size: usize) -> Engine {
    init_logging();
    Engine::open(EngineConfig {
        database: dir.path().join("netctrl.db"),
        batch_size,
        page_size: 4,
    })
    .await
    .unwrap()
}

pub fn id(value: &str) -> Id {
    Id::from(value)
}

#[allow(dead_code)]
pub fn ids(values: &[&str]) -> Vec<Id> {
    values.iter().map(|value| Id::from(*value)).collect()
}

#[allow(dead_code)]
pub fn field(field_id: &str, value: &str) -> FieldValueInput {
    FieldValueInput {
        field_id: id(field_id),
        value: value.to_string(),
    }
}

#[allow(dead_code)]
pub fn node_input(node_id: &str, field_id: &str) -> NodeInput {
    NodeInput {
        id: Some(id(node_id)),
        description: None,
        fields: vec![field(field_id, &node_id.to_uppercase())],
    }
}

#[allow(dead_code)]
pub fn edge_input(edge_id: &str, source: &str, target: &str, field_id: &str) -> EdgeInput {
    EdgeInput {
        id: Some(id(edge_id)),
        description: None,
        endpoints: vec![
            EdgeEndpointInput {
                node_id: id(source),
                role: EdgeRole::Source,
            },
            EdgeEndpointInput {
                node_id: id(target),
                role: EdgeRole::Target,
            },
        ],
        fields: vec![field(field_id, "interaction")],
    }
}

#[allow(dead_code)]
pub async fn counts(engine: &Engine) -> BTreeMap<EntityKind, usize> {
    engine.db().stats().await.unwrap()
}

#[allow(dead_code)]
pub async fn exists(engine: &Engine, kind: EntityKind, entity: &str) -> bool {
    !engine
        .db()
        .existing_ids(kind, &[id(entity)])
        .await
        .unwrap()
        .is_empty()
}

/// A two-database dataset:
///
/// ```text
/// type "curated"
///  ├─ d1: f1 (searchable), f1x (plain)      d2: f2 (searchable)
///  │   n1, n3 ── e1: n1 -> n3                  n2, n4 ── e2: n2 -> n4
///  │   c1 = {n1, n3}
///  users u1, u2
///  w1 (u1): n1, n3, e1, c1                  w2 (u1, u2): n2, n4, e2
///  a1 (u1): w1, source n1, target n3        a2 (u2): w2, target n4
/// ```
#[allow(dead_code)]
pub async fn seed_dataset(engine: &Engine) {
    let token = CancellationToken::new();
    let ok = |report: netctrl_core::engine::MutationReport| {
        assert!(report.rejected.is_empty(), "{:?}", report.rejected);
        report
    };

    ok(engine
        .create(
            &[DatabaseTypeInput {
                id: Some(id("curated")),
                name: "Curated".to_string(),
                description: None,
            }],
            &token,
        )
        .await
        .unwrap());
    ok(engine
        .create(
            &["d1", "d2"].map(|database| DatabaseInput {
                id: Some(id(database)),
                name: format!("Database {database}"),
                description: None,
                url: None,
                is_public: true,
                database_type_id: id("curated"),
            }),
            &token,
        )
        .await
        .unwrap());
    ok(engine
        .create(
            &[("f1", "d1", true), ("f1x", "d1", false), ("f2", "d2", true)].map(
                |(field_id, database, is_searchable)| DatabaseFieldInput {
                    id: Some(id(field_id)),
                    name: format!("Field {field_id}"),
                    description: None,
                    url: None,
                    is_searchable,
                    database_id: id(database),
                },
            ),
            &token,
        )
        .await
        .unwrap());
    ok(engine
        .create(
            &[
                node_input("n1", "f1"),
                node_input("n3", "f1"),
                node_input("n2", "f2"),
                node_input("n4", "f2"),
            ],
            &token,
        )
        .await
        .unwrap());
    ok(engine
        .create(
            &[
                edge_input("e1", "n1", "n3", "f1"),
                edge_input("e2", "n2", "n4", "f2"),
            ],
            &token,
        )
        .await
        .unwrap());
    ok(engine
        .create(
            &[NodeCollectionInput {
                id: Some(id("c1")),
                name: "Pathway".to_string(),
                description: None,
                node_ids: ids(&["n1", "n3"]),
                database_ids: ids(&["d1"]),
            }],
            &token,
        )
        .await
        .unwrap());
    ok(engine
        .create(
            &["u1", "u2"].map(|user| UserInput {
                id: Some(id(user)),
                email: format!("{user}@example.org"),
                display_name: None,
                role_ids: Vec::new(),
            }),
            &token,
        )
        .await
        .unwrap());
    ok(engine
        .create(
            &[
                NetworkInput {
                    id: Some(id("w1")),
                    name: "Network 1".to_string(),
                    user_ids: ids(&["u1"]),
                    node_ids: ids(&["n1", "n3"]),
                    edge_ids: ids(&["e1"]),
                    node_collection_ids: ids(&["c1"]),
                    ..Default::default()
                },
                NetworkInput {
                    id: Some(id("w2")),
                    name: "Network 2".to_string(),
                    user_ids: ids(&["u1", "u2"]),
                    node_ids: ids(&["n2", "n4"]),
                    edge_ids: ids(&["e2"]),
                    ..Default::default()
                },
            ],
            &token,
        )
        .await
        .unwrap());
    ok(engine
        .create(
            &[
                analysis_input("a1", "u1", "w1", &["n1"], &["n3"]),
                analysis_input("a2", "u2", "w2", &[], &["n4"]),
            ],
            &token,
        )
        .await
        .unwrap());
}

#[allow(dead_code)]
pub fn analysis_input(
    analysis_id: &str,
    user: &str,
    network: &str,
    sources: &[&str],
    targets: &[&str],
) -> AnalysisInput {
    AnalysisInput {
        id: Some(id(analysis_id)),
        name: format!("Analysis {analysis_id}"),
        description: None,
        algorithm: AnalysisAlgorithm::Greedy,
        parameters: serde_json::json!({ "max_iterations": 10 }),
        user_ids: ids(&[user]),
        network_ids: ids(&[network]),
        source_node_ids: ids(sources),
        target_node_ids: ids(targets),
        source_node_collection_ids: Vec::new(),
        target_node_collection_ids: Vec::new(),
    }
}
