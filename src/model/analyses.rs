//! Analysis store: frozen snapshots of networks plus the run status of the control algorithm.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, Row, Sqlite};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
};

use crate::{
    db::Transaction,
    engine::batch::{Editable, Insertable, Keyed},
    error::EngineError,
    model::{EntityKind, Id},
};

/// Run status of an analysis.
///
/// ```text
/// Initializing ──> Ongoing ──> Completed
///      │              │──────> Error
///      │              └──────> Stopping ──> Stopped
///      └──> Error | Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnalysisStatus {
    Initializing,
    Ongoing,
    Stopping,
    Stopped,
    Completed,
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Initializing => "Initializing",
            AnalysisStatus::Ongoing => "Ongoing",
            AnalysisStatus::Stopping => "Stopping",
            AnalysisStatus::Stopped => "Stopped",
            AnalysisStatus::Completed => "Completed",
            AnalysisStatus::Error => "Error",
        }
    }

    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;
        matches!(
            (self, next),
            (Initializing, Ongoing)
                | (Initializing, Error)
                | (Initializing, Stopped)
                | (Ongoing, Completed)
                | (Ongoing, Error)
                | (Ongoing, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Error)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::Stopped | AnalysisStatus::Completed | AnalysisStatus::Error
        )
    }

    /// Whether control paths may be stored against an analysis in this status.
    pub fn accepts_results(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::Ongoing | AnalysisStatus::Stopping | AnalysisStatus::Completed
        )
    }
}

impl Display for AnalysisStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AnalysisStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, EngineError> {
        [
            AnalysisStatus::Initializing,
            AnalysisStatus::Ongoing,
            AnalysisStatus::Stopping,
            AnalysisStatus::Stopped,
            AnalysisStatus::Completed,
            AnalysisStatus::Error,
        ]
        .into_iter()
        .find(|status| status.as_str() == value)
        .ok_or_else(|| EngineError::Serialization(format!("unknown analysis status '{value}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnalysisAlgorithm {
    Greedy,
    Genetic,
}

impl AnalysisAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisAlgorithm::Greedy => "Greedy",
            AnalysisAlgorithm::Genetic => "Genetic",
        }
    }
}

impl TryFrom<&str> for AnalysisAlgorithm {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, EngineError> {
        match value {
            "Greedy" => Ok(AnalysisAlgorithm::Greedy),
            "Genetic" => Ok(AnalysisAlgorithm::Genetic),
            other => Err(EngineError::Serialization(format!(
                "unknown analysis algorithm '{other}'"
            ))),
        }
    }
}

/// Role a node or collection plays in an analysis snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnalysisNodeRole {
    None,
    Source,
    Target,
}

impl AnalysisNodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisNodeRole::None => "None",
            AnalysisNodeRole::Source => "Source",
            AnalysisNodeRole::Target => "Target",
        }
    }
}

impl TryFrom<&str> for AnalysisNodeRole {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, EngineError> {
        match value {
            "None" => Ok(AnalysisNodeRole::None),
            "Source" => Ok(AnalysisNodeRole::Source),
            "Target" => Ok(AnalysisNodeRole::Target),
            other => Err(EngineError::Serialization(format!(
                "unknown analysis node role '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub algorithm: AnalysisAlgorithm,
    /// Algorithm parameters, stored as JSON text.
    pub parameters: serde_json::Value,
    pub status: AnalysisStatus,
    pub date_created: i64,
    pub date_started: Option<i64>,
    pub date_ended: Option<i64>,
    pub log: Vec<String>,
    pub user_ids: BTreeSet<Id>,
    pub network_ids: BTreeSet<Id>,
    pub nodes: BTreeMap<Id, AnalysisNodeRole>,
    pub edge_ids: BTreeSet<Id>,
    pub node_collections: BTreeMap<Id, AnalysisNodeRole>,
}

impl Analysis {
    pub fn nodes_with_role(&self, role: AnalysisNodeRole) -> impl Iterator<Item = &Id> {
        self.nodes
            .iter()
            .filter(move |(_, node_role)| **node_role == role)
            .map(|(id, _)| id)
    }
}

impl Keyed for Analysis {
    const KIND: EntityKind = EntityKind::Analysis;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl Insertable for Analysis {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "analyses",
            &[
                "id",
                "name",
                "description",
                "algorithm",
                "parameters",
                "status",
                "date_created",
                "date_started",
                "date_ended",
                "log",
            ],
            vec![
                (&self.id).into(),
                self.name.clone().into(),
                self.description.clone().into(),
                self.algorithm.as_str().into(),
                self.parameters.to_string().into(),
                self.status.as_str().into(),
                self.date_created.into(),
                self.date_started.into(),
                self.date_ended.into(),
                serde_json::Value::from(self.log.clone()).to_string().into(),
            ],
        );
        let owner = ("analysis_id", &self.id);
        tx.link("analysis_users", owner, "user_id", &self.user_ids);
        tx.link("analysis_networks", owner, "network_id", &self.network_ids);
        tx.link("analysis_edges", owner, "edge_id", &self.edge_ids);
        for (node_id, role) in &self.nodes {
            tx.insert_row(
                "analysis_nodes",
                &["analysis_id", "node_id", "role"],
                vec![(&self.id).into(), node_id.into(), role.as_str().into()],
            );
        }
        for (collection_id, role) in &self.node_collections {
            tx.insert_row(
                "analysis_node_collections",
                &["analysis_id", "node_collection_id", "role"],
                vec![(&self.id).into(), collection_id.into(), role.as_str().into()],
            );
        }
    }
}

/// Analyses are snapshots: an edit only touches descriptive metadata.
impl Editable for Analysis {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row(
            "analyses",
            &self.id,
            vec![
                ("name", self.name.clone().into()),
                ("description", self.description.clone().into()),
            ],
        );
    }
}

impl FromRow<'_, SqliteRow> for Analysis {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let decode = |column: &str, err: EngineError| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(err),
        };
        let algorithm: String = row.try_get("algorithm")?;
        let status: String = row.try_get("status")?;
        let parameters: String = row.try_get("parameters")?;
        let log: String = row.try_get("log")?;
        Ok(Analysis {
            id: Id::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            algorithm: AnalysisAlgorithm::try_from(algorithm.as_str())
                .map_err(|e| decode("algorithm", e))?,
            parameters: serde_json::from_str(&parameters)
                .map_err(|e| decode("parameters", EngineError::from(e)))?,
            status: AnalysisStatus::try_from(status.as_str()).map_err(|e| decode("status", e))?,
            date_created: row.try_get("date_created")?,
            date_started: row.try_get("date_started")?,
            date_ended: row.try_get("date_ended")?,
            log: serde_json::from_str(&log).map_err(|e| decode("log", EngineError::from(e)))?,
            user_ids: BTreeSet::new(),
            network_ids: BTreeSet::new(),
            nodes: BTreeMap::new(),
            edge_ids: BTreeSet::new(),
            node_collections: BTreeMap::new(),
        })
    }
}

/// A status change for one analysis: the new status, timestamp stamping and one appended log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisStatusUpdate {
    pub id: Id,
    pub status: AnalysisStatus,
    pub date_started: Option<i64>,
    pub date_ended: Option<i64>,
    pub log_line: String,
}

impl Keyed for AnalysisStatusUpdate {
    const KIND: EntityKind = EntityKind::Analysis;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl Editable for AnalysisStatusUpdate {
    fn stage_update(&self, tx: &mut Transaction) {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE analyses SET status = ");
        qb.push_bind(self.status.as_str().to_string());
        if let Some(started) = self.date_started {
            qb.push(", date_started = ").push_bind(started);
        }
        if let Some(ended) = self.date_ended {
            qb.push(", date_ended = ").push_bind(ended);
        }
        qb.push(", log = json_insert(log, '$[#]', ")
            .push_bind(self.log_line.clone())
            .push(") WHERE id = ")
            .push_bind(self.id.to_string());
        tx.push(qb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AnalysisStatus::*;

    #[test]
    fn lifecycle_transitions() {
        assert!(Initializing.can_transition_to(Ongoing));
        assert!(Ongoing.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(Ongoing.can_transition_to(Completed));
        assert!(Initializing.can_transition_to(Stopped));

        assert!(!Completed.can_transition_to(Ongoing));
        assert!(!Stopped.can_transition_to(Ongoing));
        assert!(!Ongoing.can_transition_to(Initializing));
        assert!(!Initializing.can_transition_to(Completed));
        assert!(!Ongoing.can_transition_to(Stopped));
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        let all = [Initializing, Ongoing, Stopping, Stopped, Completed, Error];
        for status in all.iter().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|next| !status.can_transition_to(*next)));
        }
    }

    #[test]
    fn status_text_round_trip() {
        for status in [Initializing, Ongoing, Stopping, Stopped, Completed, Error] {
            assert_eq!(AnalysisStatus::try_from(status.as_str()).unwrap(), status);
        }
        assert!(AnalysisStatus::try_from("Paused").is_err());
    }
}
