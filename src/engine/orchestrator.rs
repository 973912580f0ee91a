use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    db::DbConnection,
    engine::{
        batch::{BatchMutator, BatchOutcome, DeleteView},
        cancel::CancellationToken,
        cascade::{CascadeTable, Mutation, CASCADE_TABLE},
        resolver::{DependencyResolver, ROOT_WINDOW},
    },
    error::EngineError,
    model::{EntityKind, Id},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeOutcome {
    /// Dependents deleted per kind.
    pub cascaded: BTreeMap<EntityKind, usize>,
    /// Root entities deleted. Always zero for invalidation runs.
    pub roots: usize,
    pub chunks: usize,
    pub cancelled: bool,
}

impl CascadeOutcome {
    fn absorb(&mut self, kind: Option<EntityKind>, outcome: &BatchOutcome) {
        match kind {
            Some(kind) => *self.cascaded.entry(kind).or_default() += outcome.items,
            None => self.roots += outcome.items,
        }
        self.chunks += outcome.chunks;
        self.cancelled |= outcome.cancelled;
    }
}

/// Runs cascade chains: every dependent layer is deleted, most-downstream first, before the root
/// layer is touched.
///
/// A failure while resolving or deleting one layer aborts the rest of the chain. Layers already
/// processed stay deleted; the root is never mutated after an abort or a cancellation.
pub struct CascadeOrchestrator<'a> {
    mutator: &'a BatchMutator,
    resolver: DependencyResolver,
    table: &'a CascadeTable,
    page_size: usize,
}

impl<'a> CascadeOrchestrator<'a> {
    pub fn new(mutator: &'a BatchMutator, db: DbConnection, page_size: usize) -> Self {
        CascadeOrchestrator {
            mutator,
            resolver: DependencyResolver::new(db),
            table: &CASCADE_TABLE,
            page_size,
        }
    }

    async fn run_chain(
        &self,
        mutation: Mutation,
        root: EntityKind,
        root_ids: &[Id],
        token: &CancellationToken,
        outcome: &mut CascadeOutcome,
    ) -> Result<(), EngineError> {
        let chain = self.table.chain(mutation, root)?;
        for step in chain.steps.iter().copied() {
            if token.is_cancelled() {
                outcome.cancelled = true;
                return Ok(());
            }
            let result = match self
                .resolver
                .find_dependents_of_kind(mutation, root, step, root_ids, self.page_size)
                .await
            {
                Ok(pages) => {
                    self.mutator
                        .delete(step, DeleteView::Dependents(pages), token)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(step_outcome) => {
                    outcome.absorb(Some(step), &step_outcome);
                    if step_outcome.cancelled {
                        return Ok(());
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "[CascadeOrchestrator] {:?} chain for {} aborted at {}: {}",
                        mutation,
                        root,
                        step,
                        e
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Deletes every entity invalidated by a material edit of `root_ids`. The roots themselves are
    /// left for the caller to update.
    #[tracing::instrument(skip(self, root_ids, token), fields(roots = root_ids.len()))]
    pub async fn invalidate(
        &self,
        root: EntityKind,
        root_ids: &[Id],
        token: &CancellationToken,
    ) -> Result<CascadeOutcome, EngineError> {
        let mut outcome = CascadeOutcome::default();
        for window in root_ids.chunks(ROOT_WINDOW) {
            self.run_chain(Mutation::Edit, root, window, token, &mut outcome)
                .await?;
            if outcome.cancelled {
                break;
            }
        }
        Ok(outcome)
    }

    /// Deletes `root_ids` and everything that depends on them.
    #[tracing::instrument(skip(self, root_ids, token), fields(roots = root_ids.len()))]
    pub async fn delete(
        &self,
        root: EntityKind,
        root_ids: &[Id],
        token: &CancellationToken,
    ) -> Result<CascadeOutcome, EngineError> {
        let mut outcome = CascadeOutcome::default();
        for window in root_ids.chunks(ROOT_WINDOW) {
            self.run_chain(Mutation::Delete, root, window, token, &mut outcome)
                .await?;
            if outcome.cancelled {
                break;
            }
            let root_outcome = self
                .mutator
                .delete(root, DeleteView::Ids(window.to_vec()), token)
                .await?;
            outcome.absorb(None, &root_outcome);
            if outcome.cancelled {
                break;
            }
        }
        if outcome.cancelled {
            tracing::warn!(
                "[CascadeOrchestrator] delete of {} cancelled: {} root(s) and {:?} dependent(s) removed",
                root,
                outcome.roots,
                outcome.cascaded
            );
        } else {
            tracing::info!(
                "[CascadeOrchestrator] deleted {} {}(s), cascaded {:?}",
                outcome.roots,
                root,
                outcome.cascaded
            );
        }
        Ok(outcome)
    }
}
