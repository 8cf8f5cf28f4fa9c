//! Team repository and explicit orphan removal.
//!
//! # Invariants
//! - A team is only removed after each of its members was removed or
//!   unassigned in the same unit of work.
//! - Plain `delete`, `delete_by_id` and `delete_all` remove the members too.

use crate::context::PersistenceContext;
use crate::model::entity::{EntityId, Handle};
use crate::model::member::Member;
use crate::model::team::Team;
use crate::page::{Page, PageRequest};
use crate::query::derived::DerivedQuery;
use crate::query::predicate::Arg;
use crate::query::sort::Sort;
use crate::repo::entity_repo::{CrudRepository, EntityRepository};
use crate::repo::RepoResult;
use log::info;

/// What happens to the members of a deleted team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberDisposal {
    /// Delete the members with the team.
    RemoveMembers,
    /// Keep the members, without a team.
    UnassignMembers,
}

#[derive(Debug, Clone)]
pub struct TeamRepository {
    crud: EntityRepository<Team>,
    by_name: DerivedQuery<Team>,
}

impl TeamRepository {
    pub fn new() -> RepoResult<Self> {
        Ok(Self {
            crud: EntityRepository::new(),
            by_name: DerivedQuery::parse("findByName")?,
        })
    }

    pub fn find_by_name(
        &self,
        ctx: &mut PersistenceContext<'_>,
        name: &str,
    ) -> RepoResult<Vec<Handle<Team>>> {
        Ok(self.by_name.find(ctx, &[Arg::from(name)])?.list())
    }

    pub fn members_of(
        &self,
        ctx: &mut PersistenceContext<'_>,
        team: Handle<Team>,
    ) -> RepoResult<Vec<Handle<Member>>> {
        ctx.members_of(team)
    }

    /// Schedules `team` for deletion together with its members, or after
    /// unassigning them. Returns the number of members handled.
    pub fn delete_with_members(
        &self,
        ctx: &mut PersistenceContext<'_>,
        team: Handle<Team>,
        disposal: MemberDisposal,
    ) -> RepoResult<usize> {
        let members = ctx.members_of(team)?;
        for member in &members {
            match disposal {
                MemberDisposal::RemoveMembers => ctx.remove(*member)?,
                MemberDisposal::UnassignMembers => ctx.change_team(*member, None)?,
            }
        }
        ctx.remove(team)?;
        info!(
            "event=team_delete module=repo status=ok disposal={disposal:?} members={}",
            members.len()
        );
        Ok(members.len())
    }
}

impl CrudRepository<Team> for TeamRepository {
    fn save(&self, ctx: &mut PersistenceContext<'_>, entity: Team) -> RepoResult<Handle<Team>> {
        self.crud.save(ctx, entity)
    }

    fn find_by_id(
        &self,
        ctx: &mut PersistenceContext<'_>,
        id: EntityId,
    ) -> RepoResult<Option<Handle<Team>>> {
        self.crud.find_by_id(ctx, id)
    }

    fn find_all(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<Vec<Handle<Team>>> {
        self.crud.find_all(ctx)
    }

    fn find_all_sorted(
        &self,
        ctx: &mut PersistenceContext<'_>,
        sort: &Sort,
    ) -> RepoResult<Vec<Handle<Team>>> {
        self.crud.find_all_sorted(ctx, sort)
    }

    fn find_all_paged(
        &self,
        ctx: &mut PersistenceContext<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<Handle<Team>>> {
        self.crud.find_all_paged(ctx, request)
    }

    fn count(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<u64> {
        self.crud.count(ctx)
    }

    fn delete(&self, ctx: &mut PersistenceContext<'_>, handle: Handle<Team>) -> RepoResult<()> {
        self.delete_with_members(ctx, handle, MemberDisposal::RemoveMembers)?;
        Ok(())
    }

    fn delete_all(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<usize> {
        let handles = self.crud.find_all(ctx)?;
        for handle in &handles {
            self.delete_with_members(ctx, *handle, MemberDisposal::RemoveMembers)?;
        }
        Ok(handles.len())
    }
}
