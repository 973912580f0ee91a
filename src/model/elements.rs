//! Element store: biological nodes and the interactions (edges) between them.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, Row, Sqlite};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use crate::{
    db::Transaction,
    engine::batch::{Editable, Insertable, Keyed},
    error::EngineError,
    model::{EntityKind, Id},
};

/// A value stored against one database field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_id: Id,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub date_created: i64,
    pub fields: Vec<FieldValue>,
    pub database_ids: BTreeSet<Id>,
}

fn stage_field_values(tx: &mut Transaction, table: &'static str, owner: &'static str, id: &Id, fields: &[FieldValue]) {
    for field in fields {
        tx.insert_row(
            table,
            &[owner, "database_field_id", "value"],
            vec![id.into(), (&field.field_id).into(), field.value.clone().into()],
        );
    }
}

fn stage_owning_databases(
    tx: &mut Transaction,
    table: &'static str,
    owner: &'static str,
    id: &Id,
    database_ids: &BTreeSet<Id>,
) {
    for database_id in database_ids {
        tx.insert_row(
            table,
            &["database_id", owner],
            vec![database_id.into(), id.into()],
        );
    }
}

impl Keyed for Node {
    const KIND: EntityKind = EntityKind::Node;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl Insertable for Node {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "nodes",
            &["id", "name", "description", "date_created"],
            vec![
                (&self.id).into(),
                self.name.clone().into(),
                self.description.clone().into(),
                self.date_created.into(),
            ],
        );
        stage_field_values(tx, "node_fields", "node_id", &self.id, &self.fields);
        stage_owning_databases(tx, "database_nodes", "node_id", &self.id, &self.database_ids);
    }
}

impl Editable for Node {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row(
            "nodes",
            &self.id,
            vec![
                ("name", self.name.clone().into()),
                ("description", self.description.clone().into()),
            ],
        );
        tx.delete_where_in("node_fields", "node_id", std::slice::from_ref(&self.id));
        tx.delete_where_in("database_nodes", "node_id", std::slice::from_ref(&self.id));
        stage_field_values(tx, "node_fields", "node_id", &self.id, &self.fields);
        if !self.database_ids.is_empty() {
            let mut owners =
                QueryBuilder::<Sqlite>::new("INSERT INTO database_nodes (database_id, node_id) ");
            owners.push_values(&self.database_ids, |mut b, database_id| {
                b.push_bind(database_id.to_string())
                    .push_bind(self.id.to_string());
            });
            tx.push(owners);
        }
        self.stage_collection_repair(tx);
        self.stage_edge_names(tx);
    }
}

impl Node {
    /// Edges are named "<source> - <target>"; re-derives the names of this node's edges.
    fn stage_edge_names(&self, tx: &mut Transaction) {
        let mut names = QueryBuilder::<Sqlite>::new(
            "UPDATE edges SET name = \
             (SELECT n.name FROM edge_nodes e JOIN nodes n ON n.id = e.node_id \
              WHERE e.edge_id = edges.id AND e.role = 'Source') || ' - ' || \
             (SELECT n.name FROM edge_nodes e JOIN nodes n ON n.id = e.node_id \
              WHERE e.edge_id = edges.id AND e.role = 'Target') \
             WHERE id IN (SELECT edge_id FROM edge_nodes WHERE node_id = ",
        );
        names.push_bind(self.id.to_string()).push(")");
        tx.push(names);
    }

    /// Keeps every collection holding this node consistent with its new owning databases. Runs
    /// after the new `database_nodes` rows are in place.
    ///
    /// Collection databases no member node belongs to any more are dropped first, then the node
    /// leaves every collection it no longer shares a database with.
    fn stage_collection_repair(&self, tx: &mut Transaction) {
        let mut databases = QueryBuilder::<Sqlite>::new(
            "DELETE FROM node_collection_databases WHERE node_collection_id IN \
             (SELECT node_collection_id FROM node_collection_nodes WHERE node_id = ",
        );
        databases.push_bind(self.id.to_string()).push(
            ") AND NOT EXISTS (SELECT 1 FROM node_collection_nodes m \
             JOIN database_nodes d ON d.node_id = m.node_id \
             WHERE m.node_collection_id = node_collection_databases.node_collection_id \
             AND d.database_id = node_collection_databases.database_id)",
        );
        tx.push(databases);

        let mut members =
            QueryBuilder::<Sqlite>::new("DELETE FROM node_collection_nodes WHERE node_id = ");
        members
            .push_bind(self.id.to_string())
            .push(
                " AND node_collection_id NOT IN (SELECT c.node_collection_id \
                 FROM node_collection_databases c \
                 JOIN database_nodes d ON d.database_id = c.database_id WHERE d.node_id = ",
            )
            .push_bind(self.id.to_string())
            .push(")");
        tx.push(members);
    }
}

/// Decodes the `nodes` row only; associations are loaded by [`crate::db::DbConnection::get_node`].
impl FromRow<'_, SqliteRow> for Node {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Node {
            id: Id::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            date_created: row.try_get("date_created")?,
            fields: Vec::new(),
            database_ids: BTreeSet::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeRole {
    Source,
    Target,
}

impl EdgeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeRole::Source => "Source",
            EdgeRole::Target => "Target",
        }
    }
}

impl Display for EdgeRole {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EdgeRole {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "Source" => Ok(EdgeRole::Source),
            "Target" => Ok(EdgeRole::Target),
            other => Err(EngineError::Serialization(format!(
                "unknown edge role '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeEndpoint {
    pub node_id: Id,
    pub role: EdgeRole,
}

/// An interaction between exactly one Source node and one Target node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub date_created: i64,
    pub endpoints: Vec<EdgeEndpoint>,
    pub fields: Vec<FieldValue>,
    pub database_ids: BTreeSet<Id>,
}

impl Edge {
    fn endpoint(&self, role: EdgeRole) -> Option<&Id> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.role == role)
            .map(|endpoint| &endpoint.node_id)
    }

    pub fn source(&self) -> Option<&Id> {
        self.endpoint(EdgeRole::Source)
    }

    pub fn target(&self) -> Option<&Id> {
        self.endpoint(EdgeRole::Target)
    }
}

impl Keyed for Edge {
    const KIND: EntityKind = EntityKind::Edge;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl Edge {
    fn stage_associations(&self, tx: &mut Transaction) {
        for endpoint in &self.endpoints {
            tx.insert_row(
                "edge_nodes",
                &["edge_id", "node_id", "role"],
                vec![
                    (&self.id).into(),
                    (&endpoint.node_id).into(),
                    endpoint.role.as_str().into(),
                ],
            );
        }
        stage_field_values(tx, "edge_fields", "edge_id", &self.id, &self.fields);
        stage_owning_databases(tx, "database_edges", "edge_id", &self.id, &self.database_ids);
    }
}

impl Insertable for Edge {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "edges",
            &["id", "name", "description", "date_created"],
            vec![
                (&self.id).into(),
                self.name.clone().into(),
                self.description.clone().into(),
                self.date_created.into(),
            ],
        );
        self.stage_associations(tx);
    }
}

impl Editable for Edge {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row(
            "edges",
            &self.id,
            vec![
                ("name", self.name.clone().into()),
                ("description", self.description.clone().into()),
            ],
        );
        let id = std::slice::from_ref(&self.id);
        tx.delete_where_in("edge_nodes", "edge_id", id);
        tx.delete_where_in("edge_fields", "edge_id", id);
        tx.delete_where_in("database_edges", "edge_id", id);
        self.stage_associations(tx);
    }
}

impl FromRow<'_, SqliteRow> for Edge {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Edge {
            id: Id::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            date_created: row.try_get("date_created")?,
            endpoints: Vec::new(),
            fields: Vec::new(),
            database_ids: BTreeSet::new(),
        })
    }
}
