use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    db::DbConnection,
    engine::builder::{
        lookup::{self, NetworkMembers},
        optional_text, referenced, required_name, BuildMode, Candidate, EntityInput,
        RejectionReason,
    },
    error::EngineError,
    model::{
        now_millis, Analysis, AnalysisAlgorithm, AnalysisNodeRole, AnalysisStatus, EntityKind, Id,
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub algorithm: AnalysisAlgorithm,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub user_ids: Vec<Id>,
    #[serde(default)]
    pub network_ids: Vec<Id>,
    #[serde(default)]
    pub source_node_ids: Vec<Id>,
    #[serde(default)]
    pub target_node_ids: Vec<Id>,
    #[serde(default)]
    pub source_node_collection_ids: Vec<Id>,
    #[serde(default)]
    pub target_node_collection_ids: Vec<Id>,
}

#[derive(Debug, Default)]
pub struct AnalysisContext {
    users: BTreeSet<Id>,
    networks: BTreeMap<Id, NetworkMembers>,
}

impl EntityInput for AnalysisInput {
    type Entity = Analysis;
    type Context = AnalysisContext;

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        candidates: &[Candidate<'_, Self>],
        mode: BuildMode,
        db: &DbConnection,
    ) -> Result<AnalysisContext, EngineError> {
        if mode == BuildMode::Edit {
            return Ok(AnalysisContext::default());
        }
        let users = referenced(candidates, |input| input.user_ids.iter());
        let networks = referenced(candidates, |input| input.network_ids.iter());
        Ok(AnalysisContext {
            users: lookup::existing(db, EntityKind::User, &users).await?,
            networks: lookup::network_members(db, &networks).await?,
        })
    }

    /// Freezes the members of the referenced networks into the analysis. Every network node enters
    /// the snapshot with role `None`; requested sources and targets found among them are marked,
    /// and a node requested as both ends up a target.
    ///
    /// Edits only carry the descriptive metadata: the snapshot itself never changes.
    fn assemble(
        candidate: &Candidate<'_, Self>,
        mode: BuildMode,
        context: &AnalysisContext,
    ) -> Result<Analysis, RejectionReason> {
        let input = candidate.input;
        let mut analysis = Analysis {
            id: candidate.id.clone(),
            name: required_name(&input.name)?,
            description: optional_text(&input.description),
            algorithm: input.algorithm,
            parameters: input.parameters.clone(),
            status: AnalysisStatus::Initializing,
            date_created: now_millis(),
            date_started: None,
            date_ended: None,
            log: Vec::new(),
            user_ids: BTreeSet::new(),
            network_ids: BTreeSet::new(),
            nodes: BTreeMap::new(),
            edge_ids: BTreeSet::new(),
            node_collections: BTreeMap::new(),
        };
        if mode == BuildMode::Edit {
            return Ok(analysis);
        }

        analysis.user_ids = input
            .user_ids
            .iter()
            .filter(|id| context.users.contains(*id))
            .cloned()
            .collect();
        if analysis.user_ids.is_empty() {
            return Err(RejectionReason::NoOwner);
        }

        let mut collections = BTreeSet::new();
        for network in &input.network_ids {
            let Some(members) = context.networks.get(network) else {
                continue;
            };
            analysis.network_ids.insert(network.clone());
            for node in &members.nodes {
                analysis.nodes.insert(node.clone(), AnalysisNodeRole::None);
            }
            analysis.edge_ids.extend(members.edges.iter().cloned());
            collections.extend(members.node_collections.iter().cloned());
        }
        if analysis.network_ids.is_empty() {
            return Err(RejectionReason::UnresolvedReferences);
        }

        for (ids, role) in [
            (&input.source_node_ids, AnalysisNodeRole::Source),
            (&input.target_node_ids, AnalysisNodeRole::Target),
        ] {
            for id in ids {
                if let Some(slot) = analysis.nodes.get_mut(id) {
                    *slot = role;
                }
            }
        }
        if analysis
            .nodes_with_role(AnalysisNodeRole::Target)
            .next()
            .is_none()
        {
            return Err(RejectionReason::UnresolvedReferences);
        }

        for (ids, role) in [
            (&input.source_node_collection_ids, AnalysisNodeRole::Source),
            (&input.target_node_collection_ids, AnalysisNodeRole::Target),
        ] {
            for id in ids.iter().filter(|id| collections.contains(*id)) {
                analysis.node_collections.insert(id.clone(), role);
            }
        }
        Ok(analysis)
    }
}
