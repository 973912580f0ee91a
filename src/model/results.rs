//! Result store: control paths produced by an analysis run, and the node paths they contain.
//!
//! Results are never edited. They are replaced wholesale when an analysis reports a new set, and
//! deleted with the analysis that owns them.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};

use crate::{
    db::Transaction,
    engine::batch::{Editable, HasParent, Insertable, Keyed},
    model::{Analysis, AnalysisAlgorithm, EntityKind, Id},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPath {
    pub id: Id,
    pub analysis_id: Id,
    pub algorithm: AnalysisAlgorithm,
    pub date_created: i64,
    pub paths: Vec<Path>,
}

impl Keyed for ControlPath {
    const KIND: EntityKind = EntityKind::ControlPath;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl HasParent<Analysis> for ControlPath {
    const PARENT_COLUMN: &'static str = "analysis_id";
}

impl Insertable for ControlPath {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "control_paths",
            &["id", "analysis_id", "algorithm", "date_created"],
            vec![
                (&self.id).into(),
                (&self.analysis_id).into(),
                self.algorithm.as_str().into(),
                self.date_created.into(),
            ],
        );
        for path in &self.paths {
            path.stage_insert(tx);
        }
    }
}

/// Results are immutable; the builder rejects edits before they reach a transaction.
impl Editable for ControlPath {
    fn stage_update(&self, _tx: &mut Transaction) {}
}

impl FromRow<'_, SqliteRow> for ControlPath {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let algorithm: String = row.try_get("algorithm")?;
        Ok(ControlPath {
            id: Id::from(row.try_get::<String, _>("id")?),
            analysis_id: Id::from(row.try_get::<String, _>("analysis_id")?),
            algorithm: AnalysisAlgorithm::try_from(algorithm.as_str()).map_err(|e| {
                sqlx::Error::ColumnDecode {
                    index: "algorithm".to_string(),
                    source: Box::new(e),
                }
            })?,
            date_created: row.try_get("date_created")?,
            paths: Vec::new(),
        })
    }
}

/// An ordered sequence of nodes from a control source to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub id: Id,
    pub control_path_id: Id,
    pub date_created: i64,
    pub node_ids: Vec<Id>,
}

impl Keyed for Path {
    const KIND: EntityKind = EntityKind::Path;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl HasParent<ControlPath> for Path {
    const PARENT_COLUMN: &'static str = "control_path_id";
}

impl Insertable for Path {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "paths",
            &["id", "control_path_id", "date_created"],
            vec![
                (&self.id).into(),
                (&self.control_path_id).into(),
                self.date_created.into(),
            ],
        );
        for (position, node_id) in self.node_ids.iter().enumerate() {
            tx.insert_row(
                "path_nodes",
                &["path_id", "node_id", "position"],
                vec![(&self.id).into(), node_id.into(), (position as i64).into()],
            );
        }
    }
}

impl FromRow<'_, SqliteRow> for Path {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Path {
            id: Id::from(row.try_get::<String, _>("id")?),
            control_path_id: Id::from(row.try_get::<String, _>("control_path_id")?),
            date_created: row.try_get("date_created")?,
            node_ids: Vec::new(),
        })
    }
}
