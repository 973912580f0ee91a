//! The mutation engine.
//!
//! [`Engine`] is the entry point collaborators use: create, edit and delete per entity kind, plus
//! the analysis lifecycle and result storage. Underneath it:
//!
//! - [`builder`] turns caller payloads into valid entities, rejecting bad items individually,
//! - [`cascade`] holds the fixed deletion order for every root kind,
//! - [`resolver`] pages through the live dependents of a root set,
//! - [`orchestrator`] walks a cascade chain, deleting dependents before the root layer,
//! - [`batch`] commits homogeneous work one bounded chunk at a time,
//! - [`cancel`] carries the cooperative stop signal checked between chunks and pages.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    config::EngineConfig,
    db::{db_init, DbConnection},
    error::EngineError,
    model::{
        now_millis, Analysis, AnalysisStatus, AnalysisStatusUpdate, ControlPath, EntityKind, Id, Path,
        GENERIC_DATABASE_TYPE_ID,
    },
};

pub mod batch;
pub mod builder;
pub mod cancel;
pub mod cascade;
pub mod orchestrator;
pub mod resolver;

pub use batch::{
    BatchMutator, BatchOperation, BatchOutcome, BatchProgress, DeleteView, Editable, HasParent,
    Insertable, Keyed, ProgressHook,
};
pub use builder::{
    kind_of, AnalysisInput, BuildMode, BuildReport, ControlPathInput, DatabaseFieldInput,
    DatabaseInput, DatabaseTypeInput, EdgeEndpointInput, EdgeInput, EntityBuilder, EntityInput,
    FieldValueInput, NetworkInput, NodeCollectionInput, NodeInput, PathInput, Rejection,
    RejectionReason, RoleInput, UserInput,
};
pub use cancel::CancellationToken;
pub use cascade::{CascadeChain, CascadeTable, Mutation, CASCADE_TABLE};
pub use orchestrator::{CascadeOrchestrator, CascadeOutcome};
pub use resolver::{DependencyResolver, DependentPages};

/// What one engine call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    pub kind: EntityKind,
    /// Identifiers that passed validation and were handed to the mutator.
    pub accepted: Vec<Id>,
    pub rejected: Vec<Rejection>,
    /// Entities of the target kind committed (created, updated or deleted).
    pub committed: usize,
    /// Dependents deleted per kind by the cascade.
    pub cascaded: BTreeMap<EntityKind, usize>,
    pub chunks: usize,
    pub cancelled: bool,
}

impl MutationReport {
    fn new(kind: EntityKind) -> Self {
        MutationReport {
            kind,
            accepted: Vec::new(),
            rejected: Vec::new(),
            committed: 0,
            cascaded: BTreeMap::new(),
            chunks: 0,
            cancelled: false,
        }
    }

    fn absorb_cascade(&mut self, outcome: &CascadeOutcome) {
        for (kind, count) in &outcome.cascaded {
            *self.cascaded.entry(*kind).or_default() += count;
        }
        self.committed += outcome.roots;
        self.chunks += outcome.chunks;
        self.cancelled |= outcome.cancelled;
    }

    fn absorb_batch(&mut self, outcome: &BatchOutcome) {
        self.committed += outcome.items;
        self.chunks += outcome.chunks;
        self.cancelled |= outcome.cancelled;
    }

    fn absorb_dependents(&mut self, kind: EntityKind, outcome: &BatchOutcome) {
        *self.cascaded.entry(kind).or_default() += outcome.items;
        self.chunks += outcome.chunks;
        self.cancelled |= outcome.cancelled;
    }
}

#[derive(Clone)]
pub struct Engine {
    db: DbConnection,
    config: EngineConfig,
    progress: Option<ProgressHook>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Engine {
    pub fn new(db: DbConnection, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Engine {
            db,
            config,
            progress: None,
        })
    }

    /// Opens (creating and migrating when needed) the store named by `config.database`.
    pub async fn open(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let pool = db_init(config.database.clone()).await?;
        Engine::new(DbConnection(pool), config)
    }

    /// Registers a callback invoked after every committed chunk.
    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    pub fn db(&self) -> &DbConnection {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn mutator(&self) -> Result<BatchMutator, EngineError> {
        Ok(BatchMutator::new(self.db.clone(), self.config.batch_size)?
            .with_progress(self.progress.clone()))
    }

    /// Creates the valid subset of `inputs`. Payloads whose identifier already exists are skipped,
    /// so re-running a partially completed create only adds what is missing.
    #[tracing::instrument(skip(self, inputs, token), fields(kind = %kind_of::<I>(), count = inputs.len()))]
    pub async fn create<I: EntityInput>(
        &self,
        inputs: &[I],
        token: &CancellationToken,
    ) -> Result<MutationReport, EngineError> {
        let builder = EntityBuilder::new(self.db.clone());
        let (entities, build) = builder.build(inputs, BuildMode::Create).await?;
        let mut report = MutationReport::new(kind_of::<I>());
        report.accepted = entities.iter().map(|entity| entity.id().clone()).collect();
        report.rejected = build.rejected;
        let outcome = self.mutator()?.create(&entities, token).await?;
        report.absorb_batch(&outcome);
        Ok(report)
    }

    /// Applies the valid subset of `inputs` as full replacements of the targeted entities.
    ///
    /// Snapshot entities built on the edited entities are deleted first; the edit itself only runs
    /// when that invalidation finished without cancellation.
    #[tracing::instrument(skip(self, inputs, token), fields(kind = %kind_of::<I>(), count = inputs.len()))]
    pub async fn edit<I: EntityInput>(
        &self,
        inputs: &[I],
        token: &CancellationToken,
    ) -> Result<MutationReport, EngineError> {
        let kind = kind_of::<I>();
        let builder = EntityBuilder::new(self.db.clone());
        let (entities, build) = builder.build(inputs, BuildMode::Edit).await?;
        let mut report = MutationReport::new(kind);
        report.accepted = entities.iter().map(|entity| entity.id().clone()).collect();
        report.rejected = build.rejected;
        if entities.is_empty() {
            return Ok(report);
        }

        let mutator = self.mutator()?;
        let orchestrator = CascadeOrchestrator::new(&mutator, self.db.clone(), self.config.page_size);
        let invalidated = orchestrator.invalidate(kind, &report.accepted, token).await?;
        report.absorb_cascade(&invalidated);
        if report.cancelled {
            tracing::warn!(
                "[Engine] edit of {} cancelled during invalidation, no entity updated",
                kind
            );
            return Ok(report);
        }
        let outcome = mutator.edit(&entities, token).await?;
        report.absorb_batch(&outcome);
        Ok(report)
    }

    /// Deletes `ids` of `kind` together with everything built on them.
    ///
    /// Repeated ids are collapsed; ids that do not exist are reported, not treated as errors, so a
    /// delete can be re-run after a partial or cancelled attempt.
    #[tracing::instrument(skip(self, ids, token), fields(count = ids.len()))]
    pub async fn delete(
        &self,
        kind: EntityKind,
        ids: &[Id],
        token: &CancellationToken,
    ) -> Result<MutationReport, EngineError> {
        let mut report = MutationReport::new(kind);
        let mut seen = BTreeSet::new();
        let mut requested = Vec::new();
        for (index, id) in ids.iter().enumerate() {
            if !seen.insert(id) {
                continue;
            }
            if kind == EntityKind::DatabaseType && id.as_str() == GENERIC_DATABASE_TYPE_ID {
                report.rejected.push(Rejection {
                    index,
                    id: Some(id.clone()),
                    reason: RejectionReason::Protected,
                });
                continue;
            }
            requested.push((index, id.clone()));
        }

        let existing = self
            .db
            .existing_ids(
                kind,
                &requested.iter().map(|(_, id)| id.clone()).collect::<Vec<_>>(),
            )
            .await?;
        for (index, id) in requested {
            if existing.contains(&id) {
                report.accepted.push(id);
            } else {
                report.rejected.push(Rejection {
                    index,
                    id: Some(id),
                    reason: RejectionReason::IdentifierNotFound,
                });
            }
        }
        report.rejected.sort_by_key(|rejection| rejection.index);
        if report.accepted.is_empty() {
            tracing::debug!("[Engine] nothing to delete for {}", kind);
            return Ok(report);
        }

        let mutator = self.mutator()?;
        let orchestrator = CascadeOrchestrator::new(&mutator, self.db.clone(), self.config.page_size);
        let outcome = orchestrator.delete(kind, &report.accepted, token).await?;
        report.absorb_cascade(&outcome);
        Ok(report)
    }

    /// Moves one analysis to `status`, stamping its start or end time and appending `message` to
    /// its log.
    #[tracing::instrument(skip(self, message))]
    pub async fn update_analysis_status(
        &self,
        id: &Id,
        status: AnalysisStatus,
        message: &str,
    ) -> Result<(), EngineError> {
        let Some(analysis) = self.db.get_row::<Analysis>(EntityKind::Analysis, id).await? else {
            return Err(EngineError::NotFound(format!("analysis {id}")));
        };
        if !analysis.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                id: id.clone(),
                from: analysis.status.to_string(),
                to: status.to_string(),
            });
        }
        let update = status_update(id, analysis.status, status, message);
        self.mutator()?
            .edit(&[update], &CancellationToken::new())
            .await?;
        tracing::info!(
            "[Engine] analysis {}: {} -> {}",
            id,
            analysis.status,
            status
        );
        Ok(())
    }

    /// Asks running analyses to stop: `Ongoing` ones move to `Stopping`, `Initializing` ones go
    /// straight to `Stopped`. Analyses in any other status are reported as `Invalid`.
    #[tracing::instrument(skip(self, ids, token), fields(count = ids.len()))]
    pub async fn stop_analyses(
        &self,
        ids: &[Id],
        token: &CancellationToken,
    ) -> Result<MutationReport, EngineError> {
        let mut report = MutationReport::new(EntityKind::Analysis);
        let requested = ids.iter().cloned().collect::<BTreeSet<_>>();
        let snapshots = builder::lookup::analyses(&self.db, &requested).await?;
        let mut seen = BTreeSet::new();
        let mut updates = Vec::new();
        for (index, id) in ids.iter().enumerate() {
            if !seen.insert(id) {
                continue;
            }
            let next = match snapshots.get(id).map(|snapshot| snapshot.status) {
                None => Err(RejectionReason::IdentifierNotFound),
                Some(AnalysisStatus::Ongoing) => Ok((AnalysisStatus::Ongoing, AnalysisStatus::Stopping)),
                Some(AnalysisStatus::Initializing) => {
                    Ok((AnalysisStatus::Initializing, AnalysisStatus::Stopped))
                }
                Some(_) => Err(RejectionReason::Invalid),
            };
            match next {
                Ok((from, to)) => {
                    report.accepted.push(id.clone());
                    updates.push(status_update(id, from, to, "stop requested"));
                }
                Err(reason) => report.rejected.push(Rejection {
                    index,
                    id: Some(id.clone()),
                    reason,
                }),
            }
        }
        let outcome = self.mutator()?.edit(&updates, token).await?;
        report.absorb_batch(&outcome);
        Ok(report)
    }

    /// Replaces every stored result of one analysis with `inputs`.
    ///
    /// Prior paths and control paths are deleted first, children before parents. A cancellation
    /// during that phase leaves the new results unstored.
    #[tracing::instrument(skip(self, inputs, token), fields(count = inputs.len()))]
    pub async fn replace_control_paths(
        &self,
        analysis_id: &Id,
        inputs: &[ControlPathInput],
        token: &CancellationToken,
    ) -> Result<MutationReport, EngineError> {
        if let Some(stray) = inputs.iter().find(|input| &input.analysis_id != analysis_id) {
            return Err(EngineError::InvalidArgument(format!(
                "control path for analysis {} passed while replacing results of {}",
                stray.analysis_id, analysis_id
            )));
        }
        if self
            .db
            .existing_ids(EntityKind::Analysis, std::slice::from_ref(analysis_id))
            .await?
            .is_empty()
        {
            return Err(EngineError::NotFound(format!("analysis {analysis_id}")));
        }

        let mut report = MutationReport::new(EntityKind::ControlPath);
        let mutator = self.mutator()?;
        let previous = self
            .db
            .linked_ids("control_paths", "analysis_id", analysis_id, "id")
            .await?
            .into_iter()
            .collect::<Vec<_>>();
        let paths = mutator
            .delete_related::<Path, ControlPath>(&previous, token)
            .await?;
        report.absorb_dependents(EntityKind::Path, &paths);
        if report.cancelled {
            return Ok(report);
        }
        let control_paths = mutator
            .delete_related::<ControlPath, Analysis>(std::slice::from_ref(analysis_id), token)
            .await?;
        report.absorb_dependents(EntityKind::ControlPath, &control_paths);
        if report.cancelled {
            return Ok(report);
        }

        let created = self.create(inputs, token).await?;
        report.accepted = created.accepted;
        report.rejected = created.rejected;
        report.committed += created.committed;
        report.chunks += created.chunks;
        report.cancelled |= created.cancelled;
        Ok(report)
    }
}

fn status_update(
    id: &Id,
    from: AnalysisStatus,
    to: AnalysisStatus,
    message: &str,
) -> AnalysisStatusUpdate {
    let now = now_millis();
    let mut log_line = format!("{now} {from} -> {to}");
    if !message.trim().is_empty() {
        log_line.push_str(": ");
        log_line.push_str(message.trim());
    }
    AnalysisStatusUpdate {
        id: id.clone(),
        status: to,
        date_started: (to == AnalysisStatus::Ongoing).then_some(now),
        date_ended: to.is_terminal().then_some(now),
        log_line,
    }
}
