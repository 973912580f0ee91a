use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    db::DbConnection,
    engine::builder::{
        lookup, optional_text, referenced, required_name, BuildMode, Candidate, EntityInput,
        RejectionReason,
    },
    error::EngineError,
    model::{now_millis, EntityKind, Id, Role, User},
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub name: String,
}

impl EntityInput for RoleInput {
    type Entity = Role;
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
        _mode: BuildMode,
        _context: &(),
    ) -> Result<Role, RejectionReason> {
        Ok(Role {
            id: candidate.id.clone(),
            name: required_name(&candidate.input.name)?,
            date_created: now_millis(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserInput {
    #[serde(default)]
    pub id: Option<Id>,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<Id>,
}

impl EntityInput for UserInput {
    type Entity = User;
    /// Roles that exist.
    type Context = BTreeSet<Id>;

    fn supplied_id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    async fn resolve(
        candidates: &[Candidate<'_, Self>],
        _mode: BuildMode,
        db: &DbConnection,
    ) -> Result<BTreeSet<Id>, EngineError> {
        let roles = referenced(candidates, |input| input.role_ids.iter());
        lookup::existing(db, EntityKind::Role, &roles).await
    }

    /// Unknown roles are dropped; a user needs no role to exist.
    fn assemble(
        candidate: &Candidate<'_, Self>,
        _mode: BuildMode,
        roles: &BTreeSet<Id>,
    ) -> Result<User, RejectionReason> {
        let input = candidate.input;
        let email = required_name(&input.email)?;
        if !email.contains('@') {
            return Err(RejectionReason::Invalid);
        }
        Ok(User {
            id: candidate.id.clone(),
            email,
            display_name: optional_text(&input.display_name),
            date_created: now_millis(),
            role_ids: input
                .role_ids
                .iter()
                .filter(|id| roles.contains(*id))
                .cloned()
                .collect(),
        })
    }
}
