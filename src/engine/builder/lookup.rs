//! Batched reference lookups shared by the input kinds.
//!
//! Each lookup issues one query per window of at most [`SQLITE_LIMIT_VARIABLE_NUMBER`] ids,
//! however many payloads reference them.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, Sqlite};

use crate::{
    db::{push_id_list, DbConnection, SQLITE_LIMIT_VARIABLE_NUMBER},
    error::EngineError,
    model::{AnalysisStatus, EntityKind, Id},
};

async fn fetch_by<T>(
    db: &DbConnection,
    select: &str,
    column: &str,
    ids: &BTreeSet<Id>,
) -> Result<Vec<T>, EngineError>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let ids = ids.iter().cloned().collect::<Vec<_>>();
    let mut rows = Vec::new();
    for window in ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("{select} WHERE "));
        push_id_list(&mut qb, column, window);
        let sql = qb.sql().to_string();
        rows.extend(
            qb.build_query_as::<T>()
                .fetch_all(&db.0)
                .await
                .map_err(|e| {
                    tracing::error!("[lookup] SQL error processing '{}'\n\terror: {}", sql, e);
                    e
                })?,
        );
    }
    Ok(rows)
}

fn group(rows: Vec<(String, String)>) -> BTreeMap<Id, BTreeSet<Id>> {
    let mut grouped = BTreeMap::<Id, BTreeSet<Id>>::new();
    for (owner, member) in rows {
        grouped
            .entry(Id::from(owner))
            .or_default()
            .insert(Id::from(member));
    }
    grouped
}

pub async fn existing(
    db: &DbConnection,
    kind: EntityKind,
    ids: &BTreeSet<Id>,
) -> Result<BTreeSet<Id>, EngineError> {
    db.existing_ids(kind, &ids.iter().cloned().collect::<Vec<_>>())
        .await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub database_id: Id,
    pub is_searchable: bool,
}

pub async fn fields(
    db: &DbConnection,
    ids: &BTreeSet<Id>,
) -> Result<BTreeMap<Id, FieldInfo>, EngineError> {
    let rows = fetch_by::<(String, String, bool)>(
        db,
        "SELECT id, database_id, is_searchable FROM database_fields",
        "id",
        ids,
    )
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, database_id, is_searchable)| {
            (
                Id::from(id),
                FieldInfo {
                    database_id: Id::from(database_id),
                    is_searchable,
                },
            )
        })
        .collect())
}

/// Stored type of each database.
pub async fn database_types(
    db: &DbConnection,
    ids: &BTreeSet<Id>,
) -> Result<BTreeMap<Id, Id>, EngineError> {
    let rows = fetch_by::<(String, String)>(
        db,
        "SELECT id, database_type_id FROM databases",
        "id",
        ids,
    )
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, database_type)| (Id::from(id), Id::from(database_type)))
        .collect())
}

pub async fn node_names(
    db: &DbConnection,
    ids: &BTreeSet<Id>,
) -> Result<BTreeMap<Id, String>, EngineError> {
    let rows = fetch_by::<(String, String)>(db, "SELECT id, name FROM nodes", "id", ids).await?;
    Ok(rows
        .into_iter()
        .map(|(id, name)| (Id::from(id), name))
        .collect())
}

/// Owning databases of each node. Nodes without any owner are absent.
pub async fn node_databases(
    db: &DbConnection,
    ids: &BTreeSet<Id>,
) -> Result<BTreeMap<Id, BTreeSet<Id>>, EngineError> {
    let rows = fetch_by::<(String, String)>(
        db,
        "SELECT node_id, database_id FROM database_nodes",
        "node_id",
        ids,
    )
    .await?;
    Ok(group(rows))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeEnds {
    pub sources: BTreeSet<Id>,
    pub targets: BTreeSet<Id>,
}

pub async fn edge_endpoints(
    db: &DbConnection,
    ids: &BTreeSet<Id>,
) -> Result<BTreeMap<Id, EdgeEnds>, EngineError> {
    let rows = fetch_by::<(String, String, String)>(
        db,
        "SELECT edge_id, node_id, role FROM edge_nodes",
        "edge_id",
        ids,
    )
    .await?;
    let mut ends = BTreeMap::<Id, EdgeEnds>::new();
    for (edge_id, node_id, role) in rows {
        let entry = ends.entry(Id::from(edge_id)).or_default();
        match role.as_str() {
            "Source" => entry.sources.insert(Id::from(node_id)),
            _ => entry.targets.insert(Id::from(node_id)),
        };
    }
    Ok(ends)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkMembers {
    pub nodes: BTreeSet<Id>,
    pub edges: BTreeSet<Id>,
    pub node_collections: BTreeSet<Id>,
}

/// Members of each existing network. Networks that do not exist are absent.
pub async fn network_members(
    db: &DbConnection,
    ids: &BTreeSet<Id>,
) -> Result<BTreeMap<Id, NetworkMembers>, EngineError> {
    let found = existing(db, EntityKind::Network, ids).await?;
    let mut members = found
        .iter()
        .map(|id| (id.clone(), NetworkMembers::default()))
        .collect::<BTreeMap<_, _>>();
    let tables = [
        ("network_nodes", "node_id"),
        ("network_edges", "edge_id"),
        ("network_node_collections", "node_collection_id"),
    ];
    for (table, column) in tables {
        let rows = fetch_by::<(String, String)>(
            db,
            &format!("SELECT network_id, {column} FROM {table}"),
            "network_id",
            &found,
        )
        .await?;
        for (network, member_ids) in group(rows) {
            let Some(entry) = members.get_mut(&network) else {
                continue;
            };
            match table {
                "network_nodes" => entry.nodes = member_ids,
                "network_edges" => entry.edges = member_ids,
                _ => entry.node_collections = member_ids,
            }
        }
    }
    Ok(members)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSnapshot {
    pub status: AnalysisStatus,
    pub nodes: BTreeSet<Id>,
}

pub async fn analyses(
    db: &DbConnection,
    ids: &BTreeSet<Id>,
) -> Result<BTreeMap<Id, AnalysisSnapshot>, EngineError> {
    let statuses =
        fetch_by::<(String, String)>(db, "SELECT id, status FROM analyses", "id", ids).await?;
    let mut nodes = group(
        fetch_by::<(String, String)>(
            db,
            "SELECT analysis_id, node_id FROM analysis_nodes",
            "analysis_id",
            ids,
        )
        .await?,
    );
    let mut snapshots = BTreeMap::new();
    for (id, status) in statuses {
        let id = Id::from(id);
        let snapshot = AnalysisSnapshot {
            status: AnalysisStatus::try_from(status.as_str())?,
            nodes: nodes.remove(&id).unwrap_or_default(),
        };
        snapshots.insert(id, snapshot);
    }
    Ok(snapshots)
}
