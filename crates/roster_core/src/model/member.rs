//! Member entity.
//!
//! # Responsibility
//! - Hold member attributes and the owning side of the team association.
//! - Map onto the `member` table, including audit columns.
//!
//! # Invariants
//! - `id` is `None` while transient and immutable once assigned.
//! - `team` is authoritative; `Team` only mirrors it.
//! - `age >= 0` is expected but not enforced.

use crate::context::{Identities, Registry};
use crate::model::audit::AuditFields;
use crate::model::entity::{
    Entity, EntityId, Handle, Lazy, LazyCollection, Property, ReferenceResolver,
};
use crate::model::team::Team;
use crate::repo::{RepoError, RepoResult};
use crate::store::Row;
use rusqlite::types::Value;

pub type MemberId = EntityId;

const PROPERTIES: &[Property] = &[
    Property::id("id", "member_id"),
    Property::updatable("username", "username"),
    Property::updatable("age", "age"),
    Property::updatable("team", "team_id"),
    Property::insert_only("createdDate", "created_date"),
    Property::updatable("lastModifiedDate", "last_modified_date"),
    Property::insert_only("createdBy", "created_by"),
    Property::updatable("lastModifiedBy", "last_modified_by"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    id: Option<MemberId>,
    pub username: String,
    pub age: i32,
    /// Many-to-one, resolved through `PersistenceContext::team_of`.
    ///
    /// Assigning directly only changes this side; use
    /// `PersistenceContext::change_team` to keep `Team::members` in step.
    pub team: Option<Lazy<Team>>,
    audit: AuditFields,
}

impl Member {
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_age(username, 0)
    }

    pub fn with_age(username: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            username: username.into(),
            age,
            team: None,
            audit: AuditFields::default(),
        }
    }

    /// Creates a member already pointing at a managed team.
    ///
    /// The team's member collection picks it up once the member is tracked
    /// or persisted, if that collection is loaded.
    pub fn with_team(username: impl Into<String>, age: i32, team: Handle<Team>) -> Self {
        let mut member = Self::with_age(username, age);
        member.team = Some(Lazy::Loaded(team));
        member
    }

    pub fn id(&self) -> Option<MemberId> {
        self.id
    }

    pub fn audit(&self) -> &AuditFields {
        &self.audit
    }
}

impl Entity for Member {
    const NAME: &'static str = "Member";
    const TABLE: &'static str = "member";

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

    fn column_values(&self, refs: &dyn ReferenceResolver) -> RepoResult<Vec<Value>> {
        let team_id = match self.team {
            None => Value::Null,
            Some(Lazy::Unloaded(id)) => Value::Integer(id),
            Some(Lazy::Loaded(handle)) if handle.context() != refs.context() => {
                return Err(RepoError::Detached { entity: Team::NAME });
            }
            Some(Lazy::Loaded(handle)) => refs
                .resolve_id(Team::TABLE, handle.key())
                .map(Value::Integer)
                .ok_or(RepoError::TransientReference { entity: Team::NAME })?,
        };

        Ok(vec![
            Value::Text(self.username.clone()),
            Value::Integer(i64::from(self.age)),
            team_id,
            self.audit.created_at.map_or(Value::Null, Value::Integer),
            self.audit.updated_at.map_or(Value::Null, Value::Integer),
            self.audit.created_by.clone().map_or(Value::Null, Value::Text),
            self.audit.updated_by.clone().map_or(Value::Null, Value::Text),
        ])
    }

    fn from_row(row: &Row, prefix: &str) -> RepoResult<Self> {
        let team_id: Option<EntityId> = row.get_prefixed(prefix, "team_id")?;
        Ok(Self {
            id: Some(row.get_prefixed(prefix, "member_id")?),
            username: row.get_prefixed(prefix, "username")?,
            age: row.get_prefixed(prefix, "age")?,
            team: team_id.map(Lazy::Unloaded),
            audit: AuditFields {
                created_at: row.get_prefixed(prefix, "created_date")?,
                updated_at: row.get_prefixed(prefix, "last_modified_date")?,
                created_by: row.get_prefixed(prefix, "created_by")?,
                updated_by: row.get_prefixed(prefix, "last_modified_by")?,
            },
        })
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        Some(&mut self.audit)
    }

    fn unlink(registry: &mut Registry, key: u64) {
        if let Some(LazyCollection::Loaded(handles)) = loaded_team_members(registry, key) {
            handles.retain(|handle| handle.key() != key);
        }
    }

    fn link(registry: &mut Registry, key: u64) {
        let context = registry.context();
        if let Some(LazyCollection::Loaded(handles)) = loaded_team_members(registry, key) {
            if handles.iter().all(|handle| handle.key() != key) {
                handles.push(Handle::new(context, key));
            }
        }
    }

    fn release(&mut self, registry: &Registry) {
        if let Some(Lazy::Loaded(team)) = self.team {
            if let Some(team_id) = registry.teams.id_of(team.key()) {
                self.team = Some(Lazy::Unloaded(team_id));
            }
        }
    }

    fn identities(registry: &Registry) -> &Identities<Self> {
        &registry.members
    }

    fn identities_mut(registry: &mut Registry) -> &mut Identities<Self> {
        &mut registry.members
    }
}

fn loaded_team_members(registry: &mut Registry, key: u64) -> Option<&mut LazyCollection<Member>> {
    let team_key = match registry.members.entity(key)?.team? {
        Lazy::Loaded(team) => team.key(),
        Lazy::Unloaded(id) => registry.teams.key_of(id)?,
    };
    Some(registry.teams.entity_mut(team_key)?.members_mut())
}
