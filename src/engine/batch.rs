//! Chunked create / edit / delete over homogeneous entity sets.
//!
//! Every chunk is staged into its own [`Transaction`] and committed before the next one starts.
//! Cancellation is observed only between chunks, so a cancelled run always leaves a whole number
//! of committed chunks behind.

use std::{fmt::Debug, sync::Arc};

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use crate::{
    db::{push_id_list, DbConnection, Transaction, SQLITE_LIMIT_VARIABLE_NUMBER},
    engine::{cancel::CancellationToken, resolver::DependentPages},
    error::EngineError,
    model::{EntityKind, Id},
};

/// An entity with a stable identifier and a fixed kind.
pub trait Keyed {
    const KIND: EntityKind;

    fn id(&self) -> &Id;
}

pub trait Insertable: Keyed {
    /// Stages the entity row and all of its association rows.
    fn stage_insert(&self, tx: &mut Transaction);
}

pub trait Editable: Keyed {
    /// Stages replacement of the mutable columns and the full set of associations.
    fn stage_update(&self, tx: &mut Transaction);
}

/// Marks an entity owned by exactly one parent of kind `P`, referenced through `PARENT_COLUMN`.
pub trait HasParent<P: Keyed>: Keyed {
    const PARENT_COLUMN: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOperation {
    Create,
    Edit,
    Delete,
}

/// Reported after every committed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub operation: BatchOperation,
    pub kind: EntityKind,
    /// 1-based index of the chunk just committed.
    pub chunk: usize,
    pub chunk_items: usize,
    /// Items committed so far by this call.
    pub items: usize,
}

pub type ProgressHook = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub chunks: usize,
    pub items: usize,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn merge(&mut self, other: &BatchOutcome) {
        self.chunks += other.chunks;
        self.items += other.items;
        self.cancelled |= other.cancelled;
    }
}

/// The set of entities a delete walks through.
///
/// `Ids` and `Where` are live views: each chunk is re-materialised as the first `batch_size`
/// matching rows still present, so rows removed by earlier chunks (or by anyone else) simply drop
/// out of the view.
#[derive(Debug)]
pub enum DeleteView {
    Ids(Vec<Id>),
    Where { column: &'static str, ids: Vec<Id> },
    Dependents(DependentPages),
}

#[derive(Clone)]
pub struct BatchMutator {
    db: DbConnection,
    batch_size: usize,
    progress: Option<ProgressHook>,
}

impl Debug for BatchMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchMutator")
            .field("batch_size", &self.batch_size)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl BatchMutator {
    pub fn new(db: DbConnection, batch_size: usize) -> Result<Self, EngineError> {
        if batch_size == 0 {
            return Err(EngineError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }
        Ok(BatchMutator {
            db,
            batch_size,
            progress: None,
        })
    }

    pub fn with_progress(mut self, hook: Option<ProgressHook>) -> Self {
        self.progress = hook;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn committed(&self, outcome: &mut BatchOutcome, operation: BatchOperation, kind: EntityKind, items: usize) {
        outcome.chunks += 1;
        outcome.items += items;
        tracing::debug!(
            "[BatchMutator] {:?} {}: committed chunk {} ({} item(s), {} total)",
            operation,
            kind,
            outcome.chunks,
            items,
            outcome.items
        );
        if let Some(hook) = &self.progress {
            hook(&BatchProgress {
                operation,
                kind,
                chunk: outcome.chunks,
                chunk_items: items,
                items: outcome.items,
            });
        }
    }

    fn stopped(&self, outcome: &mut BatchOutcome, operation: BatchOperation, kind: EntityKind) {
        outcome.cancelled = true;
        tracing::warn!(
            "[BatchMutator] {:?} {} cancelled after {} chunk(s) ({} item(s) committed)",
            operation,
            kind,
            outcome.chunks,
            outcome.items
        );
    }

    async fn staged<T, F>(
        &self,
        operation: BatchOperation,
        items: &[T],
        token: &CancellationToken,
        stage: F,
    ) -> Result<BatchOutcome, EngineError>
    where
        T: Keyed,
        F: Fn(&T, &mut Transaction),
    {
        let mut outcome = BatchOutcome::default();
        for chunk in items.chunks(self.batch_size) {
            if token.is_cancelled() {
                self.stopped(&mut outcome, operation, T::KIND);
                break;
            }
            let mut tx = Transaction::new();
            for item in chunk {
                stage(item, &mut tx);
            }
            tx.execute(&self.db.0).await?;
            self.committed(&mut outcome, operation, T::KIND, chunk.len());
        }
        tracing::info!(
            "[BatchMutator] {:?} {}: {} item(s) in {} chunk(s)",
            operation,
            T::KIND,
            outcome.items,
            outcome.chunks
        );
        Ok(outcome)
    }

    #[tracing::instrument(skip(self, items, token), fields(kind = %T::KIND, count = items.len()))]
    pub async fn create<T: Insertable>(
        &self,
        items: &[T],
        token: &CancellationToken,
    ) -> Result<BatchOutcome, EngineError> {
        self.staged(BatchOperation::Create, items, token, T::stage_insert)
            .await
    }

    #[tracing::instrument(skip(self, items, token), fields(kind = %T::KIND, count = items.len()))]
    pub async fn edit<T: Editable>(
        &self,
        items: &[T],
        token: &CancellationToken,
    ) -> Result<BatchOutcome, EngineError> {
        self.staged(BatchOperation::Edit, items, token, T::stage_update)
            .await
    }

    async fn delete_chunk(&self, kind: EntityKind, ids: &[Id]) -> Result<usize, EngineError> {
        let mut tx = Transaction::new();
        tx.delete_where_in(kind.table(), "id", ids);
        Ok(tx.execute(&self.db.0).await? as usize)
    }

    /// The first `batch_size` rows of `kind` still matching `column IN ids`.
    async fn take(&self, kind: EntityKind, column: &str, ids: &[Id]) -> Result<Vec<Id>, EngineError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT id FROM {} WHERE ", kind.table()));
        push_id_list(&mut qb, column, ids);
        qb.push(" ORDER BY id LIMIT ").push_bind(self.batch_size as i64);
        let rows = qb.build_query_scalar::<String>().fetch_all(&self.db.0).await?;
        Ok(rows.into_iter().map(Id::from).collect())
    }

    async fn delete_live_view(
        &self,
        kind: EntityKind,
        column: &'static str,
        ids: &[Id],
        token: &CancellationToken,
        outcome: &mut BatchOutcome,
    ) -> Result<(), EngineError> {
        for window in ids.chunks(SQLITE_LIMIT_VARIABLE_NUMBER - 1) {
            loop {
                if token.is_cancelled() {
                    self.stopped(outcome, BatchOperation::Delete, kind);
                    return Ok(());
                }
                let chunk = self.take(kind, column, window).await?;
                if chunk.is_empty() {
                    break;
                }
                let deleted = self.delete_chunk(kind, &chunk).await?;
                if deleted == 0 {
                    break;
                }
                self.committed(outcome, BatchOperation::Delete, kind, deleted);
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, view, token))]
    pub async fn delete(
        &self,
        kind: EntityKind,
        view: DeleteView,
        token: &CancellationToken,
    ) -> Result<BatchOutcome, EngineError> {
        let mut outcome = BatchOutcome::default();
        match view {
            DeleteView::Ids(ids) => {
                self.delete_live_view(kind, "id", &ids, token, &mut outcome)
                    .await?
            }
            DeleteView::Where { column, ids } => {
                self.delete_live_view(kind, column, &ids, token, &mut outcome)
                    .await?
            }
            DeleteView::Dependents(mut pages) => {
                'pages: while let Some(page) = pages.next_page().await? {
                    for chunk in page.chunks(self.batch_size) {
                        if token.is_cancelled() {
                            self.stopped(&mut outcome, BatchOperation::Delete, kind);
                            break 'pages;
                        }
                        let deleted = self.delete_chunk(kind, chunk).await?;
                        self.committed(&mut outcome, BatchOperation::Delete, kind, deleted);
                    }
                }
            }
        }
        if outcome.items > 0 {
            tracing::info!(
                "[BatchMutator] Delete {}: {} item(s) in {} chunk(s)",
                kind,
                outcome.items,
                outcome.chunks
            );
        }
        Ok(outcome)
    }

    /// Deletes every `T` whose parent is one of `parent_ids`.
    pub async fn delete_related<T, P>(
        &self,
        parent_ids: &[Id],
        token: &CancellationToken,
    ) -> Result<BatchOutcome, EngineError>
    where
        T: HasParent<P>,
        P: Keyed,
    {
        tracing::debug!(
            "[BatchMutator] deleting {} children of {} {}(s)",
            T::KIND,
            parent_ids.len(),
            P::KIND
        );
        self.delete(
            T::KIND,
            DeleteView::Where {
                column: T::PARENT_COLUMN,
                ids: parent_ids.to_vec(),
            },
            token,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::Role,
        tests::helpers::{insert, role, temp_store},
    };
    use std::sync::Mutex;
    use test_log::test;

    fn roles(count: usize) -> Vec<Role> {
        (0..count).map(|i| role(&format!("r{i:02}"))).collect()
    }

    #[test(tokio::test)]
    async fn zero_batch_size_is_rejected() {
        let (_dir, db) = temp_store().await;
        assert!(matches!(
            BatchMutator::new(db, 0),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test(tokio::test)]
    async fn create_commits_one_chunk_at_a_time() {
        let (_dir, db) = temp_store().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = seen.clone();
        let hook: ProgressHook = Arc::new(move |progress: &BatchProgress| {
            hook_seen
                .lock()
                .unwrap()
                .push((progress.chunk, progress.chunk_items, progress.items));
        });
        let mutator = BatchMutator::new(db.clone(), 3).unwrap().with_progress(Some(hook));

        let outcome = mutator
            .create(&roles(7), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BatchOutcome {
                chunks: 3,
                items: 7,
                cancelled: false
            }
        );
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3, 3), (2, 3, 6), (3, 1, 7)]);
        assert_eq!(db.count(EntityKind::Role).await.unwrap(), 7);
    }

    #[test(tokio::test)]
    async fn cancelled_token_stops_before_the_next_chunk() {
        let (_dir, db) = temp_store().await;
        let token = CancellationToken::new();
        let hook_token = token.clone();
        let hook: ProgressHook = Arc::new(move |progress: &BatchProgress| {
            if progress.chunk == 2 {
                hook_token.cancel();
            }
        });
        let mutator = BatchMutator::new(db.clone(), 4).unwrap().with_progress(Some(hook));

        let outcome = mutator.create(&roles(20), &token).await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.chunks, 2);
        assert_eq!(db.count(EntityKind::Role).await.unwrap(), 8);
    }

    #[test(tokio::test)]
    async fn live_view_delete_tolerates_missing_ids() {
        let (_dir, db) = temp_store().await;
        insert(&db, &roles(5)).await;
        let mutator = BatchMutator::new(db.clone(), 2).unwrap();
        let mut ids = db.ids(EntityKind::Role).await.unwrap();
        ids.push(Id::from("gone"));

        let outcome = mutator
            .delete(EntityKind::Role, DeleteView::Ids(ids.clone()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.items, 5);
        assert_eq!(outcome.chunks, 3);
        assert_eq!(db.count(EntityKind::Role).await.unwrap(), 0);

        let again = mutator
            .delete(EntityKind::Role, DeleteView::Ids(ids), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again, BatchOutcome::default());
    }
}
