//! Shared fixtures for store-backed unit tests.

use std::collections::BTreeSet;

use tempfile::TempDir;

use crate::{
    db::{db_init, DbConnection, Transaction},
    engine::batch::Insertable,
    model::{
        now_millis, Database, DatabaseField, FieldValue, Id, Network, Node, Role,
        GENERIC_DATABASE_TYPE_ID,
    },
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A freshly migrated store in its own temporary directory. Keep the directory alive for as long
/// as the connection is used.
pub async fn temp_store() -> (TempDir, DbConnection) {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let pool = db_init(dir.path().join("store.db")).await.unwrap();
    (dir, DbConnection(pool))
}

/// Commits `items` in a single transaction.
pub async fn insert<T: Insertable>(db: &DbConnection, items: &[T]) {
    let mut tx = Transaction::new();
    for item in items {
        item.stage_insert(&mut tx);
    }
    tx.execute(&db.0).await.unwrap();
}

pub async fn delete(db: &DbConnection, table: &'static str, ids: &[Id]) {
    let mut tx = Transaction::new();
    tx.delete_where_in(table, "id", ids);
    tx.execute(&db.0).await.unwrap();
}

/// Database `d1` with searchable field `f1`.
pub async fn seed_catalog(db: &DbConnection) {
    insert(
        db,
        &[Database {
            id: Id::from("d1"),
            name: "Reference 1".to_string(),
            description: None,
            url: None,
            is_public: true,
            database_type_id: Id::from(GENERIC_DATABASE_TYPE_ID),
            date_created: now_millis(),
        }],
    )
    .await;
    insert(
        db,
        &[DatabaseField {
            id: Id::from("f1"),
            name: "Gene symbol".to_string(),
            description: None,
            url: None,
            is_searchable: true,
            database_id: Id::from("d1"),
            date_created: now_millis(),
        }],
    )
    .await;
}

/// A node of `d1` named by its `f1` value.
pub fn node(id: &str) -> Node {
    Node {
        id: Id::from(id),
        name: id.to_uppercase(),
        description: None,
        date_created: now_millis(),
        fields: vec![FieldValue {
            field_id: Id::from("f1"),
            value: id.to_uppercase(),
        }],
        database_ids: BTreeSet::from([Id::from("d1")]),
    }
}

pub fn network(id: &str, nodes: &[&str]) -> Network {
    Network {
        id: Id::from(id),
        name: format!("Network {id}"),
        description: None,
        algorithm: None,
        date_created: now_millis(),
        user_ids: BTreeSet::new(),
        database_ids: BTreeSet::from([Id::from("d1")]),
        node_ids: nodes.iter().map(|node| Id::from(*node)).collect(),
        edge_ids: BTreeSet::new(),
        node_collection_ids: BTreeSet::new(),
    }
}

pub fn role(id: &str) -> Role {
    Role {
        id: Id::from(id),
        name: format!("Role {id}"),
        date_created: now_millis(),
    }
}
