//! Validation and assembly of caller-supplied payloads into entities.
//!
//! Building never fails because of a single bad payload. Each payload that cannot become a valid
//! entity is dropped from the working set and recorded as a [`Rejection`]; only call-level problems
//! (duplicate identifiers within one payload set, store failures) abort the build.
//!
//! Per call, the builder
//!
//! 1. rejects the whole call if a caller-supplied identifier repeats,
//! 2. keeps identifiers absent from the store (create) or present in it (edit),
//! 3. resolves every referenced lower-layer identifier with one batched query per kind,
//! 4. lets the input kind validate each candidate against those lookups and assemble the entity.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
    future::Future,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    db::DbConnection,
    engine::batch::{Editable, Insertable, Keyed},
    error::EngineError,
    model::{EntityKind, Id},
};

pub mod analyses;
pub mod catalog;
pub mod elements;
pub mod groups;
pub mod identity;
pub mod lookup;
pub mod networks;
pub mod results;

pub use analyses::AnalysisInput;
pub use catalog::{DatabaseFieldInput, DatabaseInput, DatabaseTypeInput};
pub use elements::{EdgeEndpointInput, EdgeInput, FieldValueInput, NodeInput};
pub use groups::NodeCollectionInput;
pub use identity::{RoleInput, UserInput};
pub use networks::NetworkInput;
pub use results::{ControlPathInput, PathInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildMode {
    Create,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    /// Create payload whose identifier is already taken.
    IdentifierExists,
    /// Edit payload whose identifier does not exist.
    IdentifierNotFound,
    /// Edit payload without an identifier.
    MissingIdentifier,
    /// None of the required lower-layer references could be resolved.
    UnresolvedReferences,
    /// Edge without a resolved Source or Target node.
    MissingSourceOrTarget,
    /// Node without a value for a searchable field.
    NoSearchableField,
    /// Network or analysis without a resolved owning user.
    NoOwner,
    /// The reserved Generic database type.
    Protected,
    /// Edit of results, or of a catalog relationship lower layers were built on.
    Immutable,
    /// Payload fails a local check (empty name, empty path, wrong analysis status).
    Invalid,
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Position of the payload in the caller's list.
    pub index: usize,
    pub id: Option<Id>,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub rejected: Vec<Rejection>,
}

impl BuildReport {
    pub fn reject(&mut self, index: usize, id: Option<Id>, reason: RejectionReason) {
        self.rejected.push(Rejection { index, id, reason });
    }

    pub fn reasons(&self) -> BTreeMap<RejectionReason, usize> {
        let mut reasons = BTreeMap::new();
        for rejection in &self.rejected {
            *reasons.entry(rejection.reason).or_default() += 1;
        }
        reasons
    }
}

/// A payload that survived the identifier checks, with its final identifier.
#[derive(Debug)]
pub struct Candidate<'a, I> {
    pub index: usize,
    pub id: Id,
    pub input: &'a I,
}

/// A caller-supplied payload for one entity kind.
pub trait EntityInput: Sized + Sync + Serialize + DeserializeOwned {
    type Entity: Insertable + Editable + Sync;
    /// Everything `assemble` needs from the store, fetched once per call.
    type Context: Send;

    fn supplied_id(&self) -> Option<&Id>;

    fn resolve(
        candidates: &[Candidate<'_, Self>],
        mode: BuildMode,
        db: &DbConnection,
    ) -> impl Future<Output = Result<Self::Context, EngineError>> + Send;

    fn assemble(
        candidate: &Candidate<'_, Self>,
        mode: BuildMode,
        context: &Self::Context,
    ) -> Result<Self::Entity, RejectionReason>;
}

pub fn kind_of<I: EntityInput>() -> EntityKind {
    <I::Entity as Keyed>::KIND
}

/// Trims `name`, rejecting it when nothing is left.
pub(crate) fn required_name(name: &str) -> Result<String, RejectionReason> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(RejectionReason::Invalid)
    } else {
        Ok(trimmed.to_string())
    }
}

pub(crate) fn optional_text(text: &Option<String>) -> Option<String> {
    text.as_ref()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Every id `select` yields across the candidates.
pub(crate) fn referenced<'a, I, F, It>(candidates: &'a [Candidate<'a, I>], select: F) -> BTreeSet<Id>
where
    F: Fn(&'a I) -> It,
    It: IntoIterator<Item = &'a Id>,
{
    candidates
        .iter()
        .flat_map(|candidate| select(candidate.input))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct EntityBuilder {
    db: DbConnection,
}

impl EntityBuilder {
    pub fn new(db: DbConnection) -> Self {
        EntityBuilder { db }
    }

    /// Builds the valid subset of `inputs`.
    #[tracing::instrument(skip(self, inputs), fields(kind = %kind_of::<I>(), count = inputs.len()))]
    pub async fn build<I: EntityInput>(
        &self,
        inputs: &[I],
        mode: BuildMode,
    ) -> Result<(Vec<I::Entity>, BuildReport), EngineError> {
        let kind = kind_of::<I>();
        let mut seen = BTreeSet::new();
        let duplicates = inputs
            .iter()
            .filter_map(|input| input.supplied_id())
            .filter(|id| !seen.insert(*id))
            .cloned()
            .collect::<BTreeSet<_>>();
        if !duplicates.is_empty() {
            tracing::warn!(
                "[EntityBuilder] {:?} {}: duplicate identifiers {:?}, aborting",
                mode,
                kind,
                duplicates
            );
            return Err(EngineError::DuplicateIdentifier(
                duplicates.into_iter().collect(),
            ));
        }

        let supplied = inputs
            .iter()
            .filter_map(|input| input.supplied_id())
            .cloned()
            .collect::<Vec<_>>();
        let existing = self.db.existing_ids(kind, &supplied).await?;

        let mut report = BuildReport::default();
        let mut candidates = Vec::new();
        for (index, input) in inputs.iter().enumerate() {
            let supplied = input.supplied_id().filter(|id| !id.is_empty());
            match (mode, supplied) {
                (BuildMode::Create, Some(id)) if existing.contains(id) => {
                    report.reject(index, Some(id.clone()), RejectionReason::IdentifierExists)
                }
                (BuildMode::Create, id) => candidates.push(Candidate {
                    index,
                    id: id.cloned().unwrap_or_else(Id::generate),
                    input,
                }),
                (BuildMode::Edit, None) => {
                    report.reject(index, None, RejectionReason::MissingIdentifier)
                }
                (BuildMode::Edit, Some(id)) if !existing.contains(id) => {
                    report.reject(index, Some(id.clone()), RejectionReason::IdentifierNotFound)
                }
                (BuildMode::Edit, Some(id)) => candidates.push(Candidate {
                    index,
                    id: id.clone(),
                    input,
                }),
            }
        }

        let mut entities = Vec::with_capacity(candidates.len());
        if !candidates.is_empty() {
            let context = I::resolve(&candidates, mode, &self.db).await?;
            for candidate in &candidates {
                match I::assemble(candidate, mode, &context) {
                    Ok(entity) => entities.push(entity),
                    Err(reason) => report.reject(candidate.index, Some(candidate.id.clone()), reason),
                }
            }
        }
        report.rejected.sort_by_key(|rejection| rejection.index);

        if !report.rejected.is_empty() {
            tracing::warn!(
                "[EntityBuilder] {:?} {}: dropped {} of {} payload(s): {:?}",
                mode,
                kind,
                report.rejected.len(),
                inputs.len(),
                report.reasons()
            );
        }
        tracing::debug!(
            "[EntityBuilder] {:?} {}: {} entity(ies) ready",
            mode,
            kind,
            entities.len()
        );
        Ok((entities, report))
    }
}
