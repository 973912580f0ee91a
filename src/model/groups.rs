//! Group store: named node collections spanning one or more databases.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::collections::BTreeSet;

use crate::{
    db::Transaction,
    engine::batch::{Editable, Insertable, Keyed},
    model::{EntityKind, Id},
};

/// Every member node shares at least one owning database with the collection, and every member
/// database owns at least one member node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCollection {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub date_created: i64,
    pub node_ids: BTreeSet<Id>,
    pub database_ids: BTreeSet<Id>,
}

impl Keyed for NodeCollection {
    const KIND: EntityKind = EntityKind::NodeCollection;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl NodeCollection {
    fn stage_members(&self, tx: &mut Transaction) {
        tx.link(
            "node_collection_nodes",
            ("node_collection_id", &self.id),
            "node_id",
            &self.node_ids,
        );
        tx.link(
            "node_collection_databases",
            ("node_collection_id", &self.id),
            "database_id",
            &self.database_ids,
        );
    }
}

impl Insertable for NodeCollection {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "node_collections",
            &["id", "name", "description", "date_created"],
            vec![
                (&self.id).into(),
                self.name.clone().into(),
                self.description.clone().into(),
                self.date_created.into(),
            ],
        );
        self.stage_members(tx);
    }
}

impl Editable for NodeCollection {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row(
            "node_collections",
            &self.id,
            vec![
                ("name", self.name.clone().into()),
                ("description", self.description.clone().into()),
            ],
        );
        let id = std::slice::from_ref(&self.id);
        tx.delete_where_in("node_collection_nodes", "node_collection_id", id);
        tx.delete_where_in("node_collection_databases", "node_collection_id", id);
        self.stage_members(tx);
    }
}

impl FromRow<'_, SqliteRow> for NodeCollection {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(NodeCollection {
            id: Id::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            date_created: row.try_get("date_created")?,
            node_ids: BTreeSet::new(),
            database_ids: BTreeSet::new(),
        })
    }
}
