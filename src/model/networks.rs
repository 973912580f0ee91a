//! Network store.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::collections::BTreeSet;

use crate::{
    db::Transaction,
    engine::batch::{Editable, Insertable, Keyed},
    model::{EntityKind, Id},
};

/// A frozen selection of elements owned by one or more users.
///
/// Networks are snapshots: once created, an edit or delete of any node, edge or collection they
/// were built from deletes the network (and every analysis built on it) rather than repairing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub algorithm: Option<String>,
    pub date_created: i64,
    pub user_ids: BTreeSet<Id>,
    pub database_ids: BTreeSet<Id>,
    pub node_ids: BTreeSet<Id>,
    pub edge_ids: BTreeSet<Id>,
    pub node_collection_ids: BTreeSet<Id>,
}

impl Keyed for Network {
    const KIND: EntityKind = EntityKind::Network;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl Network {
    fn stage_members(&self, tx: &mut Transaction) {
        let owner = ("network_id", &self.id);
        tx.link("network_users", owner, "user_id", &self.user_ids);
        tx.link("network_databases", owner, "database_id", &self.database_ids);
        tx.link("network_nodes", owner, "node_id", &self.node_ids);
        tx.link("network_edges", owner, "edge_id", &self.edge_ids);
        tx.link(
            "network_node_collections",
            owner,
            "node_collection_id",
            &self.node_collection_ids,
        );
    }
}

impl Insertable for Network {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "networks",
            &["id", "name", "description", "algorithm", "date_created"],
            vec![
                (&self.id).into(),
                self.name.clone().into(),
                self.description.clone().into(),
                self.algorithm.clone().into(),
                self.date_created.into(),
            ],
        );
        self.stage_members(tx);
    }
}

impl Editable for Network {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row(
            "networks",
            &self.id,
            vec![
                ("name", self.name.clone().into()),
                ("description", self.description.clone().into()),
                ("algorithm", self.algorithm.clone().into()),
            ],
        );
        let id = std::slice::from_ref(&self.id);
        for table in [
            "network_users",
            "network_databases",
            "network_nodes",
            "network_edges",
            "network_node_collections",
        ] {
            tx.delete_where_in(table, "network_id", id);
        }
        self.stage_members(tx);
    }
}

impl FromRow<'_, SqliteRow> for Network {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Network {
            id: Id::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            algorithm: row.try_get("algorithm")?,
            date_created: row.try_get("date_created")?,
            user_ids: BTreeSet::new(),
            database_ids: BTreeSet::new(),
            node_ids: BTreeSet::new(),
            edge_ids: BTreeSet::new(),
            node_collection_ids: BTreeSet::new(),
        })
    }
}
