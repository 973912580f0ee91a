//! Persisted entities of the layered network dataset.
//!
//! The dependency order, leaves first, is:
//!
//! 1. [`catalog`]: `DatabaseType` → `Database` → `DatabaseField` (reference metadata)
//! 2. [`elements`]: `Node`, `Edge`
//! 3. [`groups`]: `NodeCollection`
//! 4. [`networks`]: `Network`
//! 5. [`analyses`]: `Analysis`
//! 6. [`results`]: `ControlPath` → `Path`
//!
//! [`identity`] (`User`, `Role`) sits beside the graph: networks and analyses are owned by users,
//! but users are not built from any other layer.

use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    time::{SystemTime, UNIX_EPOCH},
};
use uuid::Uuid;

use crate::error::EngineError;

pub mod analyses;
pub mod catalog;
pub mod elements;
pub mod groups;
pub mod identity;
pub mod networks;
pub mod results;

pub use analyses::{
    Analysis, AnalysisAlgorithm, AnalysisNodeRole, AnalysisStatus, AnalysisStatusUpdate,
};
pub use catalog::{Database, DatabaseField, DatabaseType, GENERIC_DATABASE_TYPE_ID};
pub use elements::{Edge, EdgeEndpoint, EdgeRole, FieldValue, Node};
pub use groups::NodeCollection;
pub use identity::{Role, User};
pub use networks::Network;
pub use results::{ControlPath, Path};

/// Entity identifier.
///
/// Identifiers are opaque strings so callers may assign their own (imported datasets carry the
/// upstream accession ids); [`Id::generate`] produces a UUID v4 when the caller supplies none.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn generate() -> Self {
        Id(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id(value.to_string())
    }
}

impl From<&Id> for String {
    fn from(value: &Id) -> Self {
        value.0.clone()
    }
}

impl From<Id> for String {
    fn from(value: Id) -> Self {
        value.0
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Current time as Unix milliseconds, the timestamp representation used by every table.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or_default()
}

/// One tier of the dependency graph.
#[derive(Debug, Serialize, Deserialize, EnumSetType, PartialOrd, Ord, Hash)]
#[enumset(serialize_repr = "list")]
pub enum Layer {
    ReferenceCatalog,
    Identity,
    ElementStore,
    GroupStore,
    NetworkStore,
    AnalysisStore,
    ResultStore,
}

/// Every persisted entity kind the engine can create, edit or delete.
#[derive(Debug, Serialize, Deserialize, EnumSetType, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
#[enumset(serialize_repr = "list")]
pub enum EntityKind {
    DatabaseType,
    Database,
    DatabaseField,
    User,
    Role,
    Node,
    Edge,
    NodeCollection,
    Network,
    Analysis,
    ControlPath,
    Path,
}

impl EntityKind {
    pub fn all() -> EnumSet<EntityKind> {
        EnumSet::all()
    }

    /// Table holding one row per entity of this kind, keyed by `id`.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::DatabaseType => "database_types",
            EntityKind::Database => "databases",
            EntityKind::DatabaseField => "database_fields",
            EntityKind::User => "users",
            EntityKind::Role => "roles",
            EntityKind::Node => "nodes",
            EntityKind::Edge => "edges",
            EntityKind::NodeCollection => "node_collections",
            EntityKind::Network => "networks",
            EntityKind::Analysis => "analyses",
            EntityKind::ControlPath => "control_paths",
            EntityKind::Path => "paths",
        }
    }

    pub fn layer(&self) -> Layer {
        match self {
            EntityKind::DatabaseType | EntityKind::Database | EntityKind::DatabaseField => {
                Layer::ReferenceCatalog
            }
            EntityKind::User | EntityKind::Role => Layer::Identity,
            EntityKind::Node | EntityKind::Edge => Layer::ElementStore,
            EntityKind::NodeCollection => Layer::GroupStore,
            EntityKind::Network => Layer::NetworkStore,
            EntityKind::Analysis => Layer::AnalysisStore,
            EntityKind::ControlPath | EntityKind::Path => Layer::ResultStore,
        }
    }

    /// Kinds this kind holds references to. Deleting or materially editing any of them can
    /// invalidate an entity of this kind.
    pub fn references(&self) -> EnumSet<EntityKind> {
        match self {
            EntityKind::DatabaseType | EntityKind::Role => EnumSet::empty(),
            EntityKind::Database => EntityKind::DatabaseType.into(),
            EntityKind::DatabaseField => EntityKind::Database.into(),
            EntityKind::User => EntityKind::Role.into(),
            EntityKind::Node => EntityKind::Database | EntityKind::DatabaseField,
            EntityKind::Edge => EntityKind::Database | EntityKind::DatabaseField | EntityKind::Node,
            EntityKind::NodeCollection => EntityKind::Database | EntityKind::Node,
            EntityKind::Network => {
                EntityKind::User
                    | EntityKind::Database
                    | EntityKind::Node
                    | EntityKind::Edge
                    | EntityKind::NodeCollection
            }
            EntityKind::Analysis => {
                EntityKind::User
                    | EntityKind::Node
                    | EntityKind::Edge
                    | EntityKind::NodeCollection
                    | EntityKind::Network
            }
            EntityKind::ControlPath => EntityKind::Analysis.into(),
            EntityKind::Path => EntityKind::ControlPath | EntityKind::Node,
        }
    }

    /// Snapshot entities freeze their associations at creation; an upstream change deletes them
    /// rather than repairing them.
    pub fn is_snapshot(&self) -> bool {
        matches!(self, EntityKind::Network | EntityKind::Analysis)
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl TryFrom<&str> for EntityKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.replace(['-', '_', ' '], "").to_lowercase();
        EntityKind::all()
            .iter()
            .find(|kind| format!("{kind:?}").to_lowercase() == normalized)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown entity kind '{value}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = Id::generate();
        let b = Id::generate();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn entity_kind_parses_loose_names() {
        assert_eq!(
            EntityKind::try_from("node_collection").unwrap(),
            EntityKind::NodeCollection
        );
        assert_eq!(
            EntityKind::try_from("DatabaseField").unwrap(),
            EntityKind::DatabaseField
        );
        assert!(EntityKind::try_from("widget").is_err());
    }

    #[test]
    fn references_never_point_downstream() {
        for kind in EntityKind::all() {
            for referenced in kind.references() {
                assert!(
                    referenced.layer() <= kind.layer() || referenced.layer() == Layer::Identity,
                    "{kind} references downstream {referenced}"
                );
            }
        }
    }
}
