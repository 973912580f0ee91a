use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::collections::BTreeSet;

use crate::{
    db::Transaction,
    engine::batch::{Editable, Insertable, Keyed},
    model::{EntityKind, Id},
};

/// An owner of networks and analyses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub display_name: Option<String>,
    pub date_created: i64,
    pub role_ids: BTreeSet<Id>,
}

impl Keyed for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl Insertable for User {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "users",
            &["id", "email", "display_name", "date_created"],
            vec![
                (&self.id).into(),
                self.email.clone().into(),
                self.display_name.clone().into(),
                self.date_created.into(),
            ],
        );
        tx.link("user_roles", ("user_id", &self.id), "role_id", &self.role_ids);
    }
}

impl Editable for User {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row(
            "users",
            &self.id,
            vec![
                ("email", self.email.clone().into()),
                ("display_name", self.display_name.clone().into()),
            ],
        );
        tx.delete_where_in("user_roles", "user_id", std::slice::from_ref(&self.id));
        tx.link("user_roles", ("user_id", &self.id), "role_id", &self.role_ids);
    }
}

impl FromRow<'_, SqliteRow> for User {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(User {
            id: Id::from(row.try_get::<String, _>("id")?),
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            date_created: row.try_get("date_created")?,
            role_ids: BTreeSet::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Id,
    pub name: String,
    pub date_created: i64,
}

impl Keyed for Role {
    const KIND: EntityKind = EntityKind::Role;

    fn id(&self) -> &Id {
        &self.id
    }
}

impl Insertable for Role {
    fn stage_insert(&self, tx: &mut Transaction) {
        tx.insert_row(
            "roles",
            &["id", "name", "date_created"],
            vec![
                (&self.id).into(),
                self.name.clone().into(),
                self.date_created.into(),
            ],
        );
    }
}

impl Editable for Role {
    fn stage_update(&self, tx: &mut Transaction) {
        tx.update_row("roles", &self.id, vec![("name", self.name.clone().into())]);
    }
}

impl FromRow<'_, SqliteRow> for Role {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Role {
            id: Id::from(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            date_created: row.try_get("date_created")?,
        })
    }
}
