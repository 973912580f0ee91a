use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    db::DbConnection,
    engine::builder::{
        lookup::{self, AnalysisSnapshot},
        referenced, BuildMode, Candidate, EntityInput, RejectionReason,
    },
    error::EngineError,
    model::{now_millis, AnalysisAlgorithm, ControlPath, EntityKind, Id, Path},
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub node_ids: Vec<Id>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPathInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub analysis_id: Id,
    pub algorithm: AnalysisAlgorithm,
    #[serde(default)]
    pub paths: Vec<PathInput>,
}

#[derive(Debug, Default)]
pub struct ResultContext {
    analyses: BTreeMap<Id, AnalysisSnapshot>,
    taken_paths: BTreeSet<Id>,
}

impl EntityInput for ControlPathInput {
    type Entity = ControlPath;
    type Context = ResultContext;

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        candidates: &[Candidate<'_, Self>],
        mode: BuildMode,
        db: &DbConnection,
    ) -> Result<ResultContext, EngineError> {
        if mode == BuildMode::Edit {
            return Ok(ResultContext::default());
        }
        let mut paths = BTreeSet::new();
        let repeated = candidates
            .iter()
            .flat_map(|candidate| candidate.input.paths.iter())
            .filter_map(|path| path.id.as_ref())
            .filter(|id| !paths.insert((*id).clone()))
            .cloned()
            .collect::<BTreeSet<_>>();
        if !repeated.is_empty() {
            tracing::warn!(
                "[EntityBuilder] path identifiers {:?} repeat across control paths, aborting",
                repeated
            );
            return Err(EngineError::DuplicateIdentifier(repeated.into_iter().collect()));
        }
        let analyses = referenced(candidates, |input| [&input.analysis_id]);
        Ok(ResultContext {
            analyses: lookup::analyses(db, &analyses).await?,
            taken_paths: lookup::existing(db, EntityKind::Path, &paths).await?,
        })
    }

    /// A control path is stored only against an analysis that has started producing results, and
    /// every path must walk nodes of that analysis' snapshot.
    fn assemble(
        candidate: &Candidate<'_, Self>,
        mode: BuildMode,
        context: &ResultContext,
    ) -> Result<ControlPath, RejectionReason> {
        if mode == BuildMode::Edit {
            return Err(RejectionReason::Immutable);
        }
        let input = candidate.input;
        let analysis = context
            .analyses
            .get(&input.analysis_id)
            .ok_or(RejectionReason::UnresolvedReferences)?;
        if !analysis.status.accepts_results() {
            return Err(RejectionReason::Invalid);
        }

        let date_created = now_millis();
        let mut paths = Vec::with_capacity(input.paths.len());
        for path in &input.paths {
            let walks_snapshot = !path.node_ids.is_empty()
                && path.node_ids.iter().all(|node| analysis.nodes.contains(node));
            if !walks_snapshot {
                return Err(RejectionReason::Invalid);
            }
            let id = match &path.id {
                Some(id) if context.taken_paths.contains(id) => {
                    return Err(RejectionReason::IdentifierExists)
                }
                Some(id) => id.clone(),
                None => Id::generate(),
            };
            paths.push(Path {
                id,
                control_path_id: candidate.id.clone(),
                date_created,
                node_ids: path.node_ids.clone(),
            });
        }
        Ok(ControlPath {
            id: candidate.id.clone(),
            analysis_id: input.analysis_id.clone(),
            algorithm: input.algorithm,
            date_created,
            paths,
        })
    }
}
