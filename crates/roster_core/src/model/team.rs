//! Team entity.
//!
//! # Invariants
//! - `members` is an inverse view of `Member.team` and is never written.
//! - Removing a team requires its members to be removed or unassigned first
//!   (`TeamRepository::delete_with_members`).

use crate::context::{Identities, Registry};
use crate::model::entity::{Entity, EntityId, LazyCollection, Property, ReferenceResolver};
use crate::model::member::Member;
use crate::repo::RepoResult;
use crate::store::Row;
use rusqlite::types::Value;

pub type TeamId = EntityId;

const PROPERTIES: &[Property] = &[
    Property::id("id", "team_id"),
    Property::updatable("name", "name"),
];

#[derive(Debug, Clone)]
pub struct Team {
    id: Option<TeamId>,
    pub name: String,
    members: LazyCollection<Member>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            members: LazyCollection::Loaded(Vec::new()),
        }
    }

    pub fn id(&self) -> Option<TeamId> {
        self.id
    }

    /// Inverse view; use `PersistenceContext::members_of` to initialize it.
    pub fn members(&self) -> &LazyCollection<Member> {
        &self.members
    }

    pub(crate) fn members_mut(&mut self) -> &mut LazyCollection<Member> {
        &mut self.members
    }
}

impl PartialEq for Team {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Entity for Team {
    const NAME: &'static str = "Team";
    const TABLE: &'static str = "team";

    fn properties() -> &'static [Property] {
        PROPERTIES
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn assign_id(&mut self, id: EntityId) {
        if self.id.is_none() {
            self.id = Some(id);
        }
    }

    fn column_values(&self, _refs: &dyn ReferenceResolver) -> RepoResult<Vec<Value>> {
        Ok(vec![Value::Text(self.name.clone())])
    }

    fn from_row(row: &Row, prefix: &str) -> RepoResult<Self> {
        Ok(Self {
            id: Some(row.get_prefixed(prefix, "team_id")?),
            name: row.get_prefixed(prefix, "name")?,
            members: LazyCollection::Unloaded,
        })
    }

    fn merge_into(self, managed: &mut Self) {
        managed.name = self.name;
    }

    fn identities(registry: &Registry) -> &Identities<Self> {
        &registry.teams
    }

    fn identities_mut(registry: &mut Registry) -> &mut Identities<Self> {
        &mut registry.teams
    }
}
