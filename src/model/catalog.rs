//! Reference catalog: database types, databases and the typed fields they own.

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};

use crate::{
    db::Transaction,
    engine::batch::{Editable, HasParent, Insertable, Keyed},
    model::{EntityKind, Id},
};

/// Fixed id of the seeded "Generic" database type. Databases of this type hold user-authored
/// nodes and edges rather than canonical reference data.
pub const GENERIC_DATABASE_TYPE_ID: &str = "00000000-0000-0000-0000-000000000000";
pub const GENERIC_DATABASE_TYPE_NAME: &str = "Generic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseType {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub date_created: i64,
}

impl DatabaseType {
    pub fn is_generic(&self) -> bool {
        self.id.as_str() == GENERIC_DATABASE_TYPE_ID
    }
}

impl Keyed for DatabaseType {
    const KIND: EntityKind = EntityKind::DatabaseType;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl Insertable for DatabaseType {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "database_types",
            &["id", "name", "description", "date_created"],
            vec![
                (&self.id).into(),
                self.name.clone().into(),
                self.description.clone().into(),
                self.date_created.into(),
            ],
        );
    }
}

impl Editable for DatabaseType {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row(
            "database_types",
            &self.id,
            vec![
                ("name", self.name.clone().into()),
                ("description", self.description.clone().into()),
            ],
        );
    }
}

impl FromRow<'_, SqliteRow> for DatabaseType {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(DatabaseType {
            id: Id::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            date_created: row.try_get("date_created")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub is_public: bool,
    pub database_type_id: Id,
    pub date_created: i64,
}

impl Database {
    pub fn is_generic(&self) -> bool {
        self.database_type_id.as_str() == GENERIC_DATABASE_TYPE_ID
    }
}

impl Keyed for Database {
    const KIND: EntityKind = EntityKind::Database;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl HasParent<DatabaseType> for Database {
    const PARENT_COLUMN: &'static str = "database_type_id";
}

impl Insertable for Database {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "databases",
            &[
                "id",
                "name",
                "description",
                "url",
                "is_public",
                "database_type_id",
                "date_created",
            ],
            vec![
                (&self.id).into(),
                self.name.clone().into(),
                self.description.clone().into(),
                self.url.clone().into(),
                self.is_public.into(),
                (&self.database_type_id).into(),
                self.date_created.into(),
            ],
        );
    }
}

/// The owning type is fixed once created.
impl Editable for Database {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row(
            "databases",
            &self.id,
            vec![
                ("name", self.name.clone().into()),
                ("description", self.description.clone().into()),
                ("url", self.url.clone().into()),
                ("is_public", self.is_public.into()),
            ],
        );
    }
}

impl FromRow<'_, SqliteRow> for Database {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Database {
            id: Id::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            url: row.try_get("url")?,
            is_public: row.try_get("is_public")?,
            database_type_id: Id::from(row.try_get::<String, _>("database_type_id")?),
            date_created: row.try_get("date_created")?,
        })
    }
}

/// A typed field owned by one database. Searchable fields can provide a node's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseField {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub is_searchable: bool,
    pub database_id: Id,
    pub date_created: i64,
}

impl Keyed for DatabaseField {
    const KIND: EntityKind = EntityKind::DatabaseField;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl HasParent<Database> for DatabaseField {
    const PARENT_COLUMN: &'static str = "database_id";
}

impl Insertable for DatabaseField {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "database_fields",
            &[
                "id",
                "name",
                "description",
                "url",
                "is_searchable",
                "database_id",
                "date_created",
            ],
            vec![
                (&self.id).into(),
                self.name.clone().into(),
                self.description.clone().into(),
                self.url.clone().into(),
                self.is_searchable.into(),
                (&self.database_id).into(),
                self.date_created.into(),
            ],
        );
    }
}

/// Owner and searchability are fixed once created.
impl Editable for DatabaseField {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row(
            "database_fields",
            &self.id,
            vec![
                ("name", self.name.clone().into()),
                ("description", self.description.clone().into()),
                ("url", self.url.clone().into()),
            ],
        );
    }
}

impl FromRow<'_, SqliteRow> for DatabaseField {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(DatabaseField {
            id: Id::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            url: row.try_get("url")?,
            is_searchable: row.try_get("is_searchable")?,
            database_id: Id::from(row.try_get::<String, _>("database_id")?),
            date_created: row.try_get("date_created")?,
        })
    }
}
