use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    db::DbConnection,
    engine::builder::{
        lookup::{self, EdgeEnds},
        optional_text, referenced, required_name, BuildMode, Candidate, EntityInput,
        RejectionReason,
    },
    error::EngineError,
    model::{now_millis, EntityKind, Id, Network},
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub user_ids: Vec<Id>,
    #[serde(default)]
    pub database_ids: Vec<Id>,
    #[serde(default)]
    pub node_ids: Vec<Id>,
    #[serde(default)]
    pub edge_ids: Vec<Id>,
    #[serde(default)]
    pub node_collection_ids: Vec<Id>,
}

#[derive(Debug, Default)]
pub struct NetworkContext {
    users: BTreeSet<Id>,
    databases: BTreeSet<Id>,
    nodes: BTreeSet<Id>,
    node_databases: BTreeMap<Id, BTreeSet<Id>>,
    edges: BTreeMap<Id, EdgeEnds>,
    node_collections: BTreeSet<Id>,
}

fn resolved(ids: &[Id], known: &BTreeSet<Id>) -> BTreeSet<Id> {
    ids.iter().filter(|id| known.contains(*id)).cloned().collect()
}

impl EntityInput for NetworkInput {
    type Entity = Network;
    type Context = NetworkContext;

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        candidates: &[Candidate<'_, Self>],
        _mode: BuildMode,
        db: &DbConnection,
    ) -> Result<NetworkContext, EngineError> {
        let users = referenced(candidates, |input| input.user_ids.iter());
        let databases = referenced(candidates, |input| input.database_ids.iter());
        let nodes = referenced(candidates, |input| input.node_ids.iter());
        let edges = referenced(candidates, |input| input.edge_ids.iter());
        let collections = referenced(candidates, |input| input.node_collection_ids.iter());
        Ok(NetworkContext {
            users: lookup::existing(db, EntityKind::User, &users).await?,
            databases: lookup::existing(db, EntityKind::Database, &databases).await?,
            node_databases: lookup::node_databases(db, &nodes).await?,
            nodes: lookup::existing(db, EntityKind::Node, &nodes).await?,
            edges: lookup::edge_endpoints(db, &edges).await?,
            node_collections: lookup::existing(db, EntityKind::NodeCollection, &collections)
                .await?,
        })
    }

    /// A network needs an owner and at least one node. Edges whose endpoints fall outside the
    /// network's nodes are left out, and the owners of every node join the network's databases.
    fn assemble(
        candidate: &Candidate<'_, Self>,
        _mode: BuildMode,
        context: &NetworkContext,
    ) -> Result<Network, RejectionReason> {
        let input = candidate.input;
        let name = required_name(&input.name)?;
        let user_ids = resolved(&input.user_ids, &context.users);
        if user_ids.is_empty() {
            return Err(RejectionReason::NoOwner);
        }
        let node_ids = resolved(&input.node_ids, &context.nodes);
        if node_ids.is_empty() {
            return Err(RejectionReason::UnresolvedReferences);
        }
        let edge_ids = input
            .edge_ids
            .iter()
            .filter(|id| {
                context.edges.get(*id).is_some_and(|ends| {
                    ends.sources
                        .iter()
                        .chain(ends.targets.iter())
                        .all(|node| node_ids.contains(node))
                })
            })
            .cloned()
            .collect();
        let mut database_ids = resolved(&input.database_ids, &context.databases);
        for node in &node_ids {
            if let Some(owners) = context.node_databases.get(node) {
                database_ids.extend(owners.iter().cloned());
            }
        }
        Ok(Network {
            id: candidate.id.clone(),
            name,
            description: optional_text(&input.description),
            algorithm: optional_text(&input.algorithm),
            date_created: now_millis(),
            user_ids,
            database_ids,
            node_ids,
            edge_ids,
            node_collection_ids: resolved(&input.node_collection_ids, &context.node_collections),
        })
    }
}
