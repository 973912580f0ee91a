use std::{fmt, io};

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use sqlx::{migrate::MigrateError, Error as SqlxError};
use thiserror::Error;

use crate::model::Id;

/// Call-level failures of the mutation engine.
///
/// Per-item problems (an unresolved reference, a missing Source role, an identifier that already
/// exists) are never reported through this type: they are dropped from the working set and listed
/// in the [`crate::engine::BuildReport`]. Everything here aborts the whole call and leaves the job
/// record queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum EngineError {
    #[error("Cascade table error: {0}")]
    Cascade(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Duplicate identifier(s) within one payload: {0:?}")]
    DuplicateIdentifier(Vec<Id>),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid status transition for analysis {id}: {from} -> {to}")]
    InvalidTransition { id: Id, from: String, to: String },
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Whether re-running the same job could plausibly succeed without changing its payload.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Database(_) | EngineError::Io(_))
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(src: toml::de::Error) -> EngineError {
        EngineError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(src: toml::ser::Error) -> EngineError {
        EngineError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for EngineError {
    fn from(src: JsonError) -> EngineError {
        EngineError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for EngineError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => EngineError::NotFound(format!("{x}")),
            _ => EngineError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}

impl From<fmt::Error> for EngineError {
    fn from(x: fmt::Error) -> Self {
        EngineError::Serialization(format!("{x}"))
    }
}

impl From<SqlxError> for EngineError {
    fn from(db_error: SqlxError) -> Self {
        match db_error {
            SqlxError::RowNotFound => EngineError::NotFound("database row not found".to_string()),
            SqlxError::Io(io_error) => EngineError::from(io_error),
            other => EngineError::Database(format!("{other}")),
        }
    }
}

impl From<MigrateError> for EngineError {
    fn from(migrate_error: MigrateError) -> Self {
        EngineError::Database(format!("migration failed: {migrate_error}"))
    }
}
