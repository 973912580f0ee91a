use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    db::DbConnection,
    engine::builder::{
        lookup::{self, FieldInfo},
        optional_text, referenced, BuildMode, Candidate, EntityInput, RejectionReason,
    },
    error::EngineError,
    model::{now_millis, Edge, EdgeEndpoint, EdgeRole, FieldValue, Id, Node},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValueInput {
    pub field_id: Id,
    pub value: String,
}

/// Keeps the first non-blank value per resolved field, in payload order.
fn resolve_fields<'a>(
    values: &'a [FieldValueInput],
    fields: &'a BTreeMap<Id, FieldInfo>,
) -> Vec<(FieldValue, &'a FieldInfo)> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .filter(|value| !value.value.trim().is_empty())
        .filter_map(|value| fields.get(&value.field_id).map(|info| (value, info)))
        .filter(|(value, _)| seen.insert(value.field_id.clone()))
        .map(|(value, info)| {
            (
                FieldValue {
                    field_id: value.field_id.clone(),
                    value: value.value.trim().to_string(),
                },
                info,
            )
        })
        .collect()
}

fn owning_databases(fields: &[(FieldValue, &FieldInfo)]) -> BTreeSet<Id> {
    fields
        .iter()
        .map(|(_, info)| info.database_id.clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeInput {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldValueInput>,
}

impl EntityInput for NodeInput {
    type Entity = Node;
    type Context = BTreeMap<Id, FieldInfo>;

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        candidates: &[Candidate<'_, Self>],
        _mode: BuildMode,
        db: &DbConnection,
    ) -> Result<Self::Context, EngineError> {
        let fields = referenced(candidates, |input| {
            input.fields.iter().map(|value| &value.field_id)
        });
        lookup::fields(db, &fields).await
    }

    /// The node takes its name from its first searchable value and its owning databases from the
    /// databases of all resolved fields.
    fn assemble(
        candidate: &Candidate<'_, Self>,
        _mode: BuildMode,
        fields: &Self::Context,
    ) -> Result<Node, RejectionReason> {
        let input = candidate.input;
        let resolved = resolve_fields(&input.fields, fields);
        if resolved.is_empty() {
            return Err(RejectionReason::UnresolvedReferences);
        }
        let name = resolved
            .iter()
            .find(|(_, info)| info.is_searchable)
            .map(|(value, _)| value.value.clone())
            .ok_or(RejectionReason::NoSearchableField)?;
        Ok(Node {
            id: candidate.id.clone(),
            name,
            description: optional_text(&input.description),
            date_created: now_millis(),
            database_ids: owning_databases(&resolved),
            fields: resolved.into_iter().map(|(value, _)| value).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEndpointInput {
    pub node_id: Id,
    pub role: EdgeRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdgeInput {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<EdgeEndpointInput>,
    #[serde(default)]
    pub fields: Vec<FieldValueInput>,
}

#[derive(Debug, Default)]
pub struct EdgeContext {
    node_names: BTreeMap<Id, String>,
    fields: BTreeMap<Id, FieldInfo>,
}

impl EntityInput for EdgeInput {
    type Entity = Edge;
    type Context = EdgeContext;

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        candidates: &[Candidate<'_, Self>],
        _mode: BuildMode,
        db: &DbConnection,
    ) -> Result<EdgeContext, EngineError> {
        let nodes = referenced(candidates, |input| {
            input.endpoints.iter().map(|endpoint| &endpoint.node_id)
        });
        let fields = referenced(candidates, |input| {
            input.fields.iter().map(|value| &value.field_id)
        });
        Ok(EdgeContext {
            node_names: lookup::node_names(db, &nodes).await?,
            fields: lookup::fields(db, &fields).await?,
        })
    }

    /// Keeps the first resolved Source and the first resolved Target; further endpoints are
    /// ignored. The edge is named after its endpoints.
    fn assemble(
        candidate: &Candidate<'_, Self>,
        _mode: BuildMode,
        context: &EdgeContext,
    ) -> Result<Edge, RejectionReason> {
        let input = candidate.input;
        let resolved = input
            .endpoints
            .iter()
            .filter_map(|endpoint| {
                context
                    .node_names
                    .get(&endpoint.node_id)
                    .map(|name| (endpoint, name))
            })
            .collect::<Vec<_>>();
        if resolved.is_empty() {
            return Err(RejectionReason::UnresolvedReferences);
        }
        let first = |role: EdgeRole| {
            resolved
                .iter()
                .find(|(endpoint, _)| endpoint.role == role)
                .copied()
                .ok_or(RejectionReason::MissingSourceOrTarget)
        };
        let (source, source_name) = first(EdgeRole::Source)?;
        let (target, target_name) = first(EdgeRole::Target)?;

        let fields = resolve_fields(&input.fields, &context.fields);
        if fields.is_empty() {
            return Err(RejectionReason::UnresolvedReferences);
        }
        Ok(Edge {
            id: candidate.id.clone(),
            name: format!("{source_name} - {target_name}"),
            description: optional_text(&input.description),
            date_created: now_millis(),
            endpoints: vec![
                EdgeEndpoint {
                    node_id: source.node_id.clone(),
                    role: EdgeRole::Source,
                },
                EdgeEndpoint {
                    node_id: target.node_id.clone(),
                    role: EdgeRole::Target,
                },
            ],
            database_ids: owning_databases(&fields),
            fields: fields.into_iter().map(|(value, _)| value).collect(),
        })
    }
}
