use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    db::DbConnection,
    engine::builder::{
        lookup::{self, FieldInfo},
        optional_text, referenced, required_name, BuildMode, Candidate, EntityInput,
        RejectionReason,
    },
    error::EngineError,
    model::{now_millis, Database, DatabaseField, DatabaseType, EntityKind, Id, GENERIC_DATABASE_TYPE_ID},
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatabaseTypeInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl EntityInput for DatabaseTypeInput {
    type Entity = DatabaseType;
    type Context = ();

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        _candidates: &[Candidate<'_, Self>],
        _mode: BuildMode,
        _db: &DbConnection,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn assemble(
        candidate: &Candidate<'_, Self>,
        mode: BuildMode,
        _context: &(),
    ) -> Result<DatabaseType, RejectionReason> {
        if mode == BuildMode::Edit && candidate.id.as_str() == GENERIC_DATABASE_TYPE_ID {
            return Err(RejectionReason::Protected);
        }
        Ok(DatabaseType {
            id: candidate.id.clone(),
            name: required_name(&candidate.input.name)?,
            description: optional_text(&candidate.input.description),
            date_created: now_millis(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub database_type_id: Id,
}

#[derive(Debug, Default)]
pub struct DatabaseContext {
    types: BTreeSet<Id>,
    /// Stored type of each edited database.
    current_types: BTreeMap<Id, Id>,
}

/// Identifiers of the candidates, for looking up their stored rows on edit.
fn candidate_ids<I>(candidates: &[Candidate<'_, I>]) -> BTreeSet<Id> {
    candidates.iter().map(|candidate| candidate.id.clone()).collect()
}

impl EntityInput for DatabaseInput {
    type Entity = Database;
    type Context = DatabaseContext;

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        candidates: &[Candidate<'_, Self>],
        mode: BuildMode,
        db: &DbConnection,
    ) -> Result<DatabaseContext, EngineError> {
        let types = referenced(candidates, |input| [&input.database_type_id]);
        let current_types = match mode {
            BuildMode::Edit => lookup::database_types(db, &candidate_ids(candidates)).await?,
            BuildMode::Create => BTreeMap::new(),
        };
        Ok(DatabaseContext {
            types: lookup::existing(db, EntityKind::DatabaseType, &types).await?,
            current_types,
        })
    }

    /// On edit the database type must stay the stored one.
    fn assemble(
        candidate: &Candidate<'_, Self>,
        mode: BuildMode,
        context: &DatabaseContext,
    ) -> Result<Database, RejectionReason> {
        let input = candidate.input;
        if !context.types.contains(&input.database_type_id) {
            return Err(RejectionReason::UnresolvedReferences);
        }
        if mode == BuildMode::Edit
            && context.current_types.get(&candidate.id) != Some(&input.database_type_id)
        {
            return Err(RejectionReason::Immutable);
        }
        Ok(Database {
            id: candidate.id.clone(),
            name: required_name(&input.name)?,
            description: optional_text(&input.description),
            url: optional_text(&input.url),
            is_public: input.is_public,
            database_type_id: input.database_type_id.clone(),
            date_created: now_millis(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFieldInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub is_searchable: bool,
    pub database_id: Id,
}

#[derive(Debug, Default)]
pub struct FieldContext {
    databases: BTreeSet<Id>,
    /// Stored owner and searchability of each edited field.
    current: BTreeMap<Id, FieldInfo>,
}

impl EntityInput for DatabaseFieldInput {
    type Entity = DatabaseField;
    type Context = FieldContext;

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        candidates: &[Candidate<'_, Self>],
        mode: BuildMode,
        db: &DbConnection,
    ) -> Result<FieldContext, EngineError> {
        let databases = referenced(candidates, |input| [&input.database_id]);
        let current = match mode {
            BuildMode::Edit => lookup::fields(db, &candidate_ids(candidates)).await?,
            BuildMode::Create => BTreeMap::new(),
        };
        Ok(FieldContext {
            databases: lookup::existing(db, EntityKind::Database, &databases).await?,
            current,
        })
    }

    /// On edit the owning database and searchability must match the stored field.
    fn assemble(
        candidate: &Candidate<'_, Self>,
        mode: BuildMode,
        context: &FieldContext,
    ) -> Result<DatabaseField, RejectionReason> {
        let input = candidate.input;
        if !context.databases.contains(&input.database_id) {
            return Err(RejectionReason::UnresolvedReferences);
        }
        if mode == BuildMode::Edit {
            let unchanged = context.current.get(&candidate.id).is_some_and(|stored| {
                stored.database_id == input.database_id
                    && stored.is_searchable == input.is_searchable
            });
            if !unchanged {
                return Err(RejectionReason::Immutable);
            }
        }
        Ok(DatabaseField {
            id: candidate.id.clone(),
            name: required_name(&input.name)?,
            description: optional_text(&input.description),
            url: optional_text(&input.url),
            is_searchable: input.is_searchable,
            database_id: input.database_id.clone(),
            date_created: now_millis(),
        })
    }
}
