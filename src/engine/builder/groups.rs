use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    db::DbConnection,
    engine::builder::{
        lookup, optional_text, referenced, required_name, BuildMode, Candidate, EntityInput,
        RejectionReason,
    },
    error::EngineError,
    model::{now_millis, EntityKind, Id, NodeCollection},
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeCollectionInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub node_ids: Vec<Id>,
    #[serde(default)]
    pub database_ids: Vec<Id>,
}

#[derive(Debug, Default)]
pub struct CollectionContext {
    databases: BTreeSet<Id>,
    node_databases: BTreeMap<Id, BTreeSet<Id>>,
}

impl EntityInput for NodeCollectionInput {
    type Entity = NodeCollection;
    type Context = CollectionContext;

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        candidates: &[Candidate<'_, Self>],
        _mode: BuildMode,
        db: &DbConnection,
    ) -> Result<CollectionContext, EngineError> {
        let databases = referenced(candidates, |input| input.database_ids.iter());
        let nodes = referenced(candidates, |input| input.node_ids.iter());
        Ok(CollectionContext {
            databases: lookup::existing(db, EntityKind::Database, &databases).await?,
            node_databases: lookup::node_databases(db, &nodes).await?,
        })
    }

    /// Keeps only the node/database pairs that are actually related: a node stays when one of the
    /// requested databases owns it, a database stays when it owns one of the kept nodes.
    fn assemble(
        candidate: &Candidate<'_, Self>,
        _mode: BuildMode,
        context: &CollectionContext,
    ) -> Result<NodeCollection, RejectionReason> {
        let input = candidate.input;
        let name = required_name(&input.name)?;
        let requested = input
            .database_ids
            .iter()
            .filter(|id| context.databases.contains(*id))
            .collect::<BTreeSet<_>>();

        let mut node_ids = BTreeSet::new();
        let mut database_ids = BTreeSet::new();
        for node in &input.node_ids {
            let Some(owners) = context.node_databases.get(node) else {
                continue;
            };
            let shared = owners
                .iter()
                .filter(|owner| requested.contains(owner))
                .cloned()
                .collect::<Vec<_>>();
            if !shared.is_empty() {
                node_ids.insert(node.clone());
                database_ids.extend(shared);
            }
        }
        if node_ids.is_empty() {
            return Err(RejectionReason::UnresolvedReferences);
        }
        Ok(NodeCollection {
            id: candidate.id.clone(),
            name,
            description: optional_text(&input.description),
            date_created: now_millis(),
            node_ids,
            database_ids,
        })
    }
}
