//! Member repository: CRUD plus the declared member queries.
//!
//! # Responsibility
//! - Declare every member query once and validate it when the repository
//!   is built.
//! - Map query results onto managed `Member` handles, projections or
//!   scalars.
//!
//! # Invariants
//! - A `MemberRepository` only exists if all of its queries are valid
//!   against the store schema.
//! - Fetch-join style queries resolve `Member.team` in the same statement.

use crate::context::PersistenceContext;
use crate::model::dto::MemberDto;
use crate::model::entity::{Entity, EntityId, Handle, Lazy};
use crate::model::member::Member;
use crate::model::team::Team;
use crate::page::{Page, PageRequest, Slice};
use crate::query::derived::DerivedQuery;
use crate::query::explicit::ExplicitQuery;
use crate::query::predicate::Arg;
use crate::query::select_list;
use crate::query::sort::Sort;
use crate::repo::entity_repo::{CrudRepository, EntityRepository};
use crate::repo::RepoResult;
use crate::store::{Row, Store};
use log::info;
use rusqlite::types::Value;
use std::time::Instant;

const TEAM_PREFIX: &str = "team__";

/// Hand-written member queries kept outside the declarative set.
pub trait CustomMemberQueries {
    /// Every member, through a raw query.
    fn find_custom_member(
        &self,
        ctx: &mut PersistenceContext<'_>,
    ) -> RepoResult<Vec<Handle<Member>>>;
}

pub struct MemberRepository {
    crud: EntityRepository<Member>,
    by_username_and_age_greater_than: DerivedQuery<Member>,
    list_by_username: DerivedQuery<Member>,
    member_by_username: DerivedQuery<Member>,
    by_username: DerivedQuery<Member>,
    page_by_age: DerivedQuery<Member>,
    slice_by_age: DerivedQuery<Member>,
    read_only_by_username: DerivedQuery<Member>,
    user: ExplicitQuery,
    usernames: ExplicitQuery,
    member_dto: ExplicitQuery,
    by_names: ExplicitQuery,
    member_all_by: ExplicitQuery,
    age_in_bulk: ExplicitQuery,
    age_in_bulk_keeping_context: ExplicitQuery,
    fetch_join: ExplicitQuery,
    team_graph: ExplicitQuery,
    custom_member: ExplicitQuery,
}

impl MemberRepository {
    /// Parses and validates every declared query.
    ///
    /// # Errors
    /// - `MalformedQuery` naming the first invalid query.
    pub fn new(store: &dyn Store) -> RepoResult<Self> {
        let started_at = Instant::now();
        let team_columns = select_list::<Team>(Some("t"), TEAM_PREFIX);

        let repository = Self {
            crud: EntityRepository::new(),
            by_username_and_age_greater_than: DerivedQuery::parse(
                "findByUsernameAndAgeGreaterThan",
            )?,
            list_by_username: DerivedQuery::parse("findMemberListByUsername")?,
            member_by_username: DerivedQuery::parse("findMemberByUsername")?,
            by_username: DerivedQuery::parse("findByUsername")?,
            page_by_age: DerivedQuery::parse("findPageByAge")?,
            slice_by_age: DerivedQuery::parse("findSliceByAge")?,
            read_only_by_username: DerivedQuery::parse("findReadOnlyByUsername")?.read_only(),
            user: ExplicitQuery::prepare(
                store,
                "findUser",
                "SELECT m.* FROM member m WHERE m.username = :username AND m.age = :age",
            )?,
            usernames: ExplicitQuery::prepare(
                store,
                "findUsernames",
                "SELECT m.username FROM member m JOIN team t ON t.team_id = m.team_id",
            )?,
            member_dto: ExplicitQuery::prepare(
                store,
                "findMemberDto",
                "SELECT m.member_id AS id, m.username AS username, t.name AS team_name \
                 FROM member m JOIN team t ON t.team_id = m.team_id",
            )?,
            by_names: ExplicitQuery::prepare(
                store,
                "findByNames",
                "SELECT m.* FROM member m WHERE m.username IN (:names)",
            )?,
            member_all_by: ExplicitQuery::prepare(
                store,
                "findMemberAllBy",
                "SELECT m.* FROM member m LEFT JOIN team t ON t.team_id = m.team_id",
            )?
            .with_count_query(store, "SELECT COUNT(m.username) FROM member m")?,
            age_in_bulk: ExplicitQuery::prepare(
                store,
                "updateAgeInBulk",
                "UPDATE member SET age = age + 1 WHERE age >= :age",
            )?
            .modifying(Member::TABLE, true),
            age_in_bulk_keeping_context: ExplicitQuery::prepare(
                store,
                "updateAgeInBulkKeepingContext",
                "UPDATE member SET age = age + 1 WHERE age >= :age",
            )?
            .modifying(Member::TABLE, false),
            fetch_join: ExplicitQuery::prepare(
                store,
                "findMemberFetchJoin",
                &format!(
                    "SELECT m.*, {team_columns} FROM member m JOIN team t ON t.team_id = m.team_id"
                ),
            )?,
            team_graph: ExplicitQuery::prepare(
                store,
                "findMemberBy",
                &format!(
                    "SELECT m.*, {team_columns} FROM member m LEFT JOIN team t ON t.team_id = m.team_id"
                ),
            )?,
            custom_member: ExplicitQuery::prepare(
                store,
                "findCustomMember",
                "SELECT m.* FROM member m",
            )?,
        };

        info!(
            "event=repo_init module=repo status=ok repository=member duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(repository)
    }

    pub fn find_by_username_and_age_greater_than(
        &self,
        ctx: &mut PersistenceContext<'_>,
        username: &str,
        age: i32,
    ) -> RepoResult<Vec<Handle<Member>>> {
        Ok(self
            .by_username_and_age_greater_than
            .find(ctx, &[Arg::from(username), Arg::from(age)])?
            .list())
    }

    pub fn find_user(
        &self,
        ctx: &mut PersistenceContext<'_>,
        username: &str,
        age: i32,
    ) -> RepoResult<Vec<Handle<Member>>> {
        Ok(self
            .user
            .entities(ctx, &[("username", Arg::from(username)), ("age", Arg::from(age))])?
            .list())
    }

    /// Usernames of members that belong to a team.
    pub fn find_usernames(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<Vec<String>> {
        Ok(self.usernames.scalars(ctx, &[])?.list())
    }

    pub fn find_member_dto(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<Vec<MemberDto>> {
        Ok(self.member_dto.dtos(ctx, &[])?.list())
    }

    pub fn find_by_names(
        &self,
        ctx: &mut PersistenceContext<'_>,
        names: &[&str],
    ) -> RepoResult<Vec<Handle<Member>>> {
        let names = Arg::list(names.iter().map(|name| name.to_string()));
        Ok(self.by_names.entities(ctx, &[("names", names)])?.list())
    }

    /// Every member named `username`; empty when none.
    pub fn find_member_list_by_username(
        &self,
        ctx: &mut PersistenceContext<'_>,
        username: &str,
    ) -> RepoResult<Vec<Handle<Member>>> {
        Ok(self.list_by_username.find(ctx, &[Arg::from(username)])?.list())
    }

    /// The member named `username`, `None` when absent.
    pub fn find_member_by_username(
        &self,
        ctx: &mut PersistenceContext<'_>,
        username: &str,
    ) -> RepoResult<Option<Handle<Member>>> {
        self.member_by_username
            .find(ctx, &[Arg::from(username)])?
            .optional()
    }

    pub fn find_by_username(
        &self,
        ctx: &mut PersistenceContext<'_>,
        username: &str,
    ) -> RepoResult<Option<Handle<Member>>> {
        self.by_username.find(ctx, &[Arg::from(username)])?.optional()
    }

    pub fn find_page_by_age(
        &self,
        ctx: &mut PersistenceContext<'_>,
        age: i32,
        request: &PageRequest,
    ) -> RepoResult<Page<Handle<Member>>> {
        self.page_by_age.page(ctx, &[Arg::from(age)], request)
    }

    pub fn find_slice_by_age(
        &self,
        ctx: &mut PersistenceContext<'_>,
        age: i32,
        request: &PageRequest,
    ) -> RepoResult<Slice<Handle<Member>>> {
        self.slice_by_age.slice(ctx, &[Arg::from(age)], request)
    }

    /// All members with their teams left-joined, counted without the join.
    pub fn find_member_all_by(
        &self,
        ctx: &mut PersistenceContext<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<Handle<Member>>> {
        self.member_all_by.page::<Member>(ctx, &[], request)
    }

    /// `age = age + 1` for every member aged `age` or older. The context is
    /// cleared afterwards; returns the number of updated rows.
    pub fn update_age_in_bulk(
        &self,
        ctx: &mut PersistenceContext<'_>,
        age: i32,
    ) -> RepoResult<usize> {
        self.age_in_bulk.execute_update(ctx, &[("age", Arg::from(age))])
    }

    /// Same update without clearing the context; members loaded before it
    /// are stale afterwards.
    pub fn update_age_in_bulk_keeping_context(
        &self,
        ctx: &mut PersistenceContext<'_>,
        age: i32,
    ) -> RepoResult<usize> {
        self.age_in_bulk_keeping_context
            .execute_update(ctx, &[("age", Arg::from(age))])
    }

    /// Members that have a team, each team loaded by the same statement.
    pub fn find_member_fetch_join(
        &self,
        ctx: &mut PersistenceContext<'_>,
    ) -> RepoResult<Vec<Handle<Member>>> {
        let rows = self.fetch_join.rows(ctx, &[])?;
        attach_with_team(ctx, &rows)
    }

    /// Every member, teams loaded by the same statement when present.
    pub fn find_member_by(
        &self,
        ctx: &mut PersistenceContext<'_>,
    ) -> RepoResult<Vec<Handle<Member>>> {
        let rows = self.team_graph.rows(ctx, &[])?;
        attach_with_team(ctx, &rows)
    }

    /// Loads the member named `username` without a snapshot; changes to it
    /// are never flushed.
    pub fn find_read_only_by_username(
        &self,
        ctx: &mut PersistenceContext<'_>,
        username: &str,
    ) -> RepoResult<Option<Handle<Member>>> {
        self.read_only_by_username
            .find(ctx, &[Arg::from(username)])?
            .optional()
    }
}

impl CustomMemberQueries for MemberRepository {
    fn find_custom_member(
        &self,
        ctx: &mut PersistenceContext<'_>,
    ) -> RepoResult<Vec<Handle<Member>>> {
        Ok(self.custom_member.entities::<Member>(ctx, &[])?.list())
    }
}

impl CrudRepository<Member> for MemberRepository {
    fn save(&self, ctx: &mut PersistenceContext<'_>, entity: Member) -> RepoResult<Handle<Member>> {
        self.crud.save(ctx, entity)
    }

    fn find_by_id(
        &self,
        ctx: &mut PersistenceContext<'_>,
        id: EntityId,
    ) -> RepoResult<Option<Handle<Member>>> {
        self.crud.find_by_id(ctx, id)
    }

    fn find_all(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<Vec<Handle<Member>>> {
        self.crud.find_all(ctx)
    }

    fn find_all_sorted(
        &self,
        ctx: &mut PersistenceContext<'_>,
        sort: &Sort,
    ) -> RepoResult<Vec<Handle<Member>>> {
        self.crud.find_all_sorted(ctx, sort)
    }

    fn find_all_paged(
        &self,
        ctx: &mut PersistenceContext<'_>,
        request: &PageRequest,
    ) -> RepoResult<Page<Handle<Member>>> {
        self.crud.find_all_paged(ctx, request)
    }

    fn count(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<u64> {
        self.crud.count(ctx)
    }

    fn delete(&self, ctx: &mut PersistenceContext<'_>, handle: Handle<Member>) -> RepoResult<()> {
        self.crud.delete(ctx, handle)
    }

    fn delete_all(&self, ctx: &mut PersistenceContext<'_>) -> RepoResult<usize> {
        self.crud.delete_all(ctx)
    }
}

/// Attaches members and their joined teams (`team__*` columns). Members
/// that were already managed keep their in-memory team reference.
fn attach_with_team(
    ctx: &mut PersistenceContext<'_>,
    rows: &[Row],
) -> RepoResult<Vec<Handle<Member>>> {
    let members = ctx.attach_rows::<Member>(rows, "", false)?;
    for (row, member) in rows.iter().zip(&members) {
        let team_id = match row.value(&format!("{TEAM_PREFIX}team_id")) {
            Some(Value::Integer(team_id)) => *team_id,
            _ => continue,
        };
        let Some(team) = ctx
            .attach_rows::<Team>(std::slice::from_ref(row), TEAM_PREFIX, false)?
            .into_iter()
            .next()
        else {
            continue;
        };
        let member = ctx.get_mut(*member)?;
        if member.team == Some(Lazy::Unloaded(team_id)) {
            member.team = Some(Lazy::Loaded(team));
        }
    }
    Ok(members)
}
