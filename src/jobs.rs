//! Persisted mutation jobs.
//!
//! A job records one requested mutation (`operation`, entity `kind`, JSON `items`) in the
//! `background_jobs` table. [`JobRunner::run`] executes it through the [`Engine`] and deletes the
//! record only when the routine returned without error and without being cancelled; anything else
//! leaves the record queued so the same job can be inspected or re-run.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};

use crate::{
    engine::{
        AnalysisInput, CancellationToken, ControlPathInput, DatabaseFieldInput, DatabaseInput,
        DatabaseTypeInput, EdgeInput, Engine, EntityInput, MutationReport, NetworkInput,
        NodeCollectionInput, NodeInput, RoleInput, UserInput,
    },
    error::EngineError,
    model::{now_millis, EntityKind, Id},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Edit,
    Delete,
    StopAnalyses,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Edit => "edit",
            Operation::Delete => "delete",
            Operation::StopAnalyses => "stop_analyses",
        }
    }
}

/// The body of a job record.
///
/// `items` holds input payloads for create and edit, and identifiers for delete and
/// stop_analyses. A missing or null `items` fails the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntityKind>,
    #[serde(default)]
    pub items: Option<serde_json::Value>,
}

impl JobPayload {
    pub fn new(operation: Operation, kind: Option<EntityKind>, items: serde_json::Value) -> Self {
        JobPayload {
            operation,
            kind,
            items: Some(items),
        }
    }

    fn required_kind(&self) -> Result<EntityKind, EngineError> {
        self.kind.ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "{} job without an entity kind",
                self.operation.as_str()
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub id: Id,
    /// Operation name as recorded at enqueue time; informational only.
    pub operation: String,
    pub kind: Option<String>,
    /// Raw JSON body, parsed into a [`JobPayload`] when the job runs.
    pub payload: String,
    pub date_created: i64,
}

impl FromRow<'_, SqliteRow> for BackgroundJob {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(BackgroundJob {
            id: Id::from(row.try_get::<String, _>("id")?),
            operation: row.try_get("operation")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            date_created: row.try_get("date_created")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct JobRunner {
    engine: Engine,
}

impl JobRunner {
    pub fn new(engine: Engine) -> Self {
        JobRunner { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn enqueue(&self, payload: &JobPayload) -> Result<Id, EngineError> {
        let body = serde_json::to_string(payload)?;
        self.enqueue_raw(&body).await
    }

    /// Queues `body` verbatim. It is only parsed when the job runs.
    pub async fn enqueue_raw(&self, body: &str) -> Result<Id, EngineError> {
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        let field = |name: &str| {
            parsed
                .as_ref()
                .and_then(|value| value.get(name))
                .and_then(|value| value.as_str())
                .map(str::to_string)
        };
        let operation = field("operation").unwrap_or_else(|| "unknown".to_string());
        let kind = field("kind");
        self.insert(&operation, kind, body.to_string()).await
    }

    async fn insert(
        &self,
        operation: &str,
        kind: Option<String>,
        body: String,
    ) -> Result<Id, EngineError> {
        let id = Id::generate();
        sqlx::query(
            "INSERT INTO background_jobs (id, operation, kind, payload, date_created) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(operation)
        .bind(kind)
        .bind(body)
        .bind(now_millis())
        .execute(&self.engine.db().0)
        .await?;
        tracing::debug!("[JobRunner] queued {} job {}", operation, id);
        Ok(id)
    }

    /// Queued jobs, oldest first.
    pub async fn list(&self) -> Result<Vec<BackgroundJob>, EngineError> {
        let jobs = sqlx::query_as::<_, BackgroundJob>(
            "SELECT * FROM background_jobs ORDER BY date_created, id",
        )
        .fetch_all(&self.engine.db().0)
        .await?;
        Ok(jobs)
    }

    pub async fn get(&self, id: &Id) -> Result<Option<BackgroundJob>, EngineError> {
        let job = sqlx::query_as::<_, BackgroundJob>("SELECT * FROM background_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.engine.db().0)
            .await?;
        Ok(job)
    }

    async fn complete(&self, id: &Id) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM background_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.engine.db().0)
            .await?;
        Ok(())
    }

    /// Runs one queued job.
    #[tracing::instrument(skip(self, token))]
    pub async fn run(
        &self,
        id: &Id,
        token: &CancellationToken,
    ) -> Result<MutationReport, EngineError> {
        let Some(job) = self.get(id).await? else {
            return Err(EngineError::NotFound(format!("background job {id}")));
        };
        let result = match serde_json::from_str::<JobPayload>(&job.payload) {
            Ok(payload) => self.dispatch(payload, token).await,
            Err(e) => Err(EngineError::from(e)),
        };
        match result {
            Ok(report) if report.cancelled => {
                tracing::warn!(
                    "[JobRunner] job {} cancelled after {} chunk(s); record kept for re-run",
                    id,
                    report.chunks
                );
                Ok(report)
            }
            Ok(report) => {
                self.complete(id).await?;
                tracing::info!(
                    "[JobRunner] job {} ({} {}) done: {} committed, {} rejected, cascaded {:?}",
                    id,
                    job.operation,
                    report.kind,
                    report.committed,
                    report.rejected.len(),
                    report.cascaded
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!("[JobRunner] job {} failed, record kept: {}", id, e);
                Err(e)
            }
        }
    }

    /// Runs every queued job in order until the token is cancelled. A failing job does not stop
    /// the ones after it.
    pub async fn run_pending(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<(Id, Result<MutationReport, EngineError>)>, EngineError> {
        let mut results = Vec::new();
        for job in self.list().await? {
            if token.is_cancelled() {
                break;
            }
            let result = self.run(&job.id, token).await;
            results.push((job.id, result));
        }
        Ok(results)
    }

    async fn dispatch(
        &self,
        payload: JobPayload,
        token: &CancellationToken,
    ) -> Result<MutationReport, EngineError> {
        let Some(items) = payload.items.clone() else {
            return Err(EngineError::InvalidArgument(format!(
                "{} job without items",
                payload.operation.as_str()
            )));
        };
        match payload.operation {
            Operation::StopAnalyses => {
                let ids = serde_json::from_value::<Vec<Id>>(items)?;
                self.engine.stop_analyses(&ids, token).await
            }
            Operation::Delete => {
                let kind = payload.required_kind()?;
                let ids = serde_json::from_value::<Vec<Id>>(items)?;
                self.engine.delete(kind, &ids, token).await
            }
            Operation::Create | Operation::Edit => {
                let kind = payload.required_kind()?;
                match kind {
                    EntityKind::DatabaseType => {
                        self.mutate::<DatabaseTypeInput>(payload.operation, items, token)
                            .await
                    }
                    EntityKind::Database => {
                        self.mutate::<DatabaseInput>(payload.operation, items, token)
                            .await
                    }
                    EntityKind::DatabaseField => {
                        self.mutate::<DatabaseFieldInput>(payload.operation, items, token)
                            .await
                    }
                    EntityKind::User => self.mutate::<UserInput>(payload.operation, items, token).await,
                    EntityKind::Role => self.mutate::<RoleInput>(payload.operation, items, token).await,
                    EntityKind::Node => self.mutate::<NodeInput>(payload.operation, items, token).await,
                    EntityKind::Edge => self.mutate::<EdgeInput>(payload.operation, items, token).await,
                    EntityKind::NodeCollection => {
                        self.mutate::<NodeCollectionInput>(payload.operation, items, token)
                            .await
                    }
                    EntityKind::Network => {
                        self.mutate::<NetworkInput>(payload.operation, items, token)
                            .await
                    }
                    EntityKind::Analysis => {
                        self.mutate::<AnalysisInput>(payload.operation, items, token)
                            .await
                    }
                    EntityKind::ControlPath => {
                        self.mutate::<ControlPathInput>(payload.operation, items, token)
                            .await
                    }
                    EntityKind::Path => Err(EngineError::InvalidArgument(
                        "paths are stored through their control path".to_string(),
                    )),
                }
            }
        }
    }

    async fn mutate<I: EntityInput>(
        &self,
        operation: Operation,
        items: serde_json::Value,
        token: &CancellationToken,
    ) -> Result<MutationReport, EngineError> {
        let inputs = serde_json::from_value::<Vec<I>>(items)?;
        match operation {
            Operation::Edit => self.engine.edit(&inputs, token).await,
            _ => self.engine.create(&inputs, token).await,
        }
    }
}
