use roster_core::{
    open_store_in_memory, CrudRepository, Handle, Lazy, Member, MemberDisposal, MemberRepository,
    PersistenceContext, RepoError, SqliteStore, Team, TeamRepository,
};

struct Fixture {
    team_a: Handle<Team>,
    team_b: Handle<Team>,
    member1: Handle<Member>,
    member2: Handle<Member>,
    member3: Handle<Member>,
}

fn seed(ctx: &mut PersistenceContext<'_>) -> Fixture {
    let teams = TeamRepository::new().unwrap();
    let members = MemberRepository::new(ctx.store()).unwrap();
    let team_a = teams.save(ctx, Team::new("teamA")).unwrap();
    let team_b = teams.save(ctx, Team::new("teamB")).unwrap();
    Fixture {
        team_a,
        team_b,
        member1: members.save(ctx, Member::with_team("member1", 10, team_a)).unwrap(),
        member2: members.save(ctx, Member::with_team("member2", 20, team_b)).unwrap(),
        member3: members.save(ctx, Member::with_team("member3", 30, team_a)).unwrap(),
    }
}

#[test]
fn members_of_initializes_the_collection_once() {
    let store = open_store_in_memory().unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&mut ctx);
    ctx.clear();

    let team_a = teams.find_by_name(&mut ctx, "teamA").unwrap()[0];
    assert!(!ctx.get(team_a).unwrap().members().is_loaded());
    let before = store.executed_queries();
    let loaded = ctx.members_of(team_a).unwrap();
    assert_eq!(store.executed_queries() - before, 1);
    let usernames: Vec<_> = loaded
        .iter()
        .map(|member| ctx.get(*member).unwrap().username.clone())
        .collect();
    assert_eq!(usernames, vec!["member1", "member3"]);

    let before = store.executed_queries();
    let again = ctx.members_of(team_a).unwrap();
    assert_eq!(again, loaded);
    assert_eq!(store.executed_queries(), before);
}

#[test]
fn new_members_join_a_loaded_collection() {
    let store = open_store_in_memory().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let fixture = seed(&mut ctx);

    assert_eq!(
        ctx.members_of(fixture.team_a).unwrap(),
        vec![fixture.member1, fixture.member3]
    );
    let member4 = ctx.track(Member::with_team("member4", 40, fixture.team_b)).unwrap();
    assert_eq!(
        ctx.get(fixture.team_b).unwrap().members().handles(),
        Some(&[fixture.member2, member4][..])
    );
}

#[test]
fn change_team_moves_between_loaded_collections() {
    let store = open_store_in_memory().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let fixture = seed(&mut ctx);
    ctx.members_of(fixture.team_a).unwrap();
    ctx.members_of(fixture.team_b).unwrap();

    ctx.change_team(fixture.member1, Some(fixture.team_b)).unwrap();

    let team_a = ctx.get(fixture.team_a).unwrap();
    assert_eq!(team_a.members().handles(), Some(&[fixture.member3][..]));
    let team_b = ctx.get(fixture.team_b).unwrap();
    assert_eq!(
        team_b.members().handles(),
        Some(&[fixture.member2, fixture.member1][..])
    );
}

#[test]
fn change_team_is_persisted_through_the_owning_side() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let fixture = seed(&mut ctx);

    ctx.change_team(fixture.member1, Some(fixture.team_b)).unwrap();
    ctx.flush().unwrap();
    ctx.clear();

    let member1 = members.find_by_username(&mut ctx, "member1").unwrap().unwrap();
    let team = ctx.team_of(member1).unwrap().unwrap();
    assert_eq!(ctx.get(team).unwrap().name, "teamB");

    let team_b = ctx.members_of(team).unwrap();
    assert_eq!(team_b.len(), 2);
    assert!(team_b.contains(&member1));
}

#[test]
fn unloaded_collection_reflects_unflushed_moves() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&mut ctx);
    ctx.clear();

    let team_a = teams.find_by_name(&mut ctx, "teamA").unwrap()[0];
    let member2 = members.find_by_username(&mut ctx, "member2").unwrap().unwrap();
    ctx.change_team(member2, Some(team_a)).unwrap();
    let loaded = ctx.members_of(team_a).unwrap();

    assert_eq!(loaded.len(), 3);
    assert!(loaded.contains(&member2));
}

#[test]
fn deleting_a_member_drops_it_from_its_team() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let fixture = seed(&mut ctx);
    ctx.members_of(fixture.team_a).unwrap();

    members.delete(&mut ctx, fixture.member1).unwrap();

    assert_eq!(
        ctx.get(fixture.team_a).unwrap().members().handles(),
        Some(&[fixture.member3][..])
    );
}

#[test]
fn delete_with_members_removes_the_whole_team() {
    let store = open_store_in_memory().unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let fixture = seed(&mut ctx);

    let handled = teams
        .delete_with_members(&mut ctx, fixture.team_a, MemberDisposal::RemoveMembers)
        .unwrap();
    ctx.flush().unwrap();

    assert_eq!(handled, 2);
    assert_eq!(row_count(&store, "team"), 1);
    assert_eq!(row_count(&store, "member"), 1);
    assert!(!ctx.contains(fixture.member1));
    assert!(ctx.contains(fixture.member2));
}

#[test]
fn delete_with_members_can_keep_members_unassigned() {
    let store = open_store_in_memory().unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let fixture = seed(&mut ctx);

    teams
        .delete_with_members(&mut ctx, fixture.team_a, MemberDisposal::UnassignMembers)
        .unwrap();
    ctx.flush().unwrap();

    assert_eq!(row_count(&store, "team"), 1);
    assert_eq!(row_count(&store, "member"), 3);
    assert_eq!(ctx.get(fixture.member1).unwrap().team, None);
    let unassigned: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM member WHERE team_id IS NULL", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(unassigned, 2);
}

#[test]
fn deleting_a_team_removes_its_members() {
    let store = open_store_in_memory().unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let fixture = seed(&mut ctx);

    teams.delete(&mut ctx, fixture.team_a).unwrap();
    ctx.flush().unwrap();

    assert_eq!(row_count(&store, "team"), 1);
    assert_eq!(row_count(&store, "member"), 1);
    assert!(matches!(ctx.get(fixture.member1), Err(RepoError::Detached { .. })));
    assert!(ctx.contains(fixture.member2));
}

#[test]
fn deleting_a_reloaded_team_by_id_removes_its_members() {
    let store = open_store_in_memory().unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let fixture = seed(&mut ctx);
    let team_b_id = ctx.get(fixture.team_b).unwrap().id().unwrap();
    ctx.clear();

    teams.delete_by_id(&mut ctx, team_b_id).unwrap();
    ctx.flush().unwrap();

    assert_eq!(row_count(&store, "team"), 1);
    assert_eq!(row_count(&store, "member"), 2);
}

#[test]
fn deleting_every_team_leaves_no_members_behind() {
    let store = open_store_in_memory().unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&mut ctx);
    ctx.clear();

    assert_eq!(teams.delete_all(&mut ctx).unwrap(), 2);
    ctx.flush().unwrap();

    assert_eq!(row_count(&store, "team"), 0);
    assert_eq!(row_count(&store, "member"), 0);
}

#[test]
fn detached_member_merges_into_another_context_by_team_id() {
    let store = open_store_in_memory().unwrap();
    let teams = TeamRepository::new().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut first = PersistenceContext::new(&store);
    let fixture = seed(&mut first);

    let mut detached = first.detach(fixture.member1).unwrap();
    assert!(matches!(detached.team, Some(Lazy::Unloaded(_))));
    assert_eq!(
        first.get(fixture.team_a).unwrap().members().handles(),
        Some(&[fixture.member3][..])
    );
    detached.username = "renamed".to_string();

    let mut second = PersistenceContext::new(&store);
    teams.find_by_name(&mut second, "teamB").unwrap();
    teams.find_by_name(&mut second, "teamA").unwrap();
    members.save(&mut second, detached).unwrap();
    second.flush().unwrap();

    assert_eq!(team_name_of(&store, "renamed"), "teamA");
}

#[test]
fn handles_from_another_context_are_rejected() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut first = PersistenceContext::new(&store);
    let fixture = seed(&mut first);
    let mut copy = first.get(fixture.member1).unwrap().clone();
    copy.username = "renamed".to_string();

    let mut second = PersistenceContext::new(&store);
    seed(&mut second);

    assert_ne!(first.id(), second.id());
    assert!(matches!(second.get(fixture.member1), Err(RepoError::Detached { .. })));
    assert!(matches!(second.get(fixture.team_a), Err(RepoError::Detached { .. })));
    let err = members.save(&mut second, copy).unwrap_err();
    assert!(matches!(err, RepoError::Detached { entity: "Team" }));

    second.track(Member::with_team("member4", 40, fixture.team_b)).unwrap();
    assert!(matches!(second.flush(), Err(RepoError::Detached { .. })));
    assert_eq!(team_name_of(&store, "member1"), "teamA");
}

#[test]
fn find_by_name_returns_every_match() {
    let store = open_store_in_memory().unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&mut ctx);
    teams.save(&mut ctx, Team::new("teamA")).unwrap();

    assert_eq!(teams.find_by_name(&mut ctx, "teamA").unwrap().len(), 2);
    assert_eq!(teams.find_by_name(&mut ctx, "teamB").unwrap().len(), 1);
    assert!(teams.find_by_name(&mut ctx, "teamC").unwrap().is_empty());
}

#[test]
fn merging_a_detached_team_keeps_the_loaded_members() {
    let store = open_store_in_memory().unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let fixture = seed(&mut ctx);
    ctx.members_of(fixture.team_a).unwrap();

    let mut renamed = ctx.get(fixture.team_a).unwrap().clone();
    renamed.name = "teamA2".to_string();
    let merged = teams.save(&mut ctx, renamed).unwrap();

    assert_eq!(merged, fixture.team_a);
    let team = ctx.get(merged).unwrap();
    assert_eq!(team.name, "teamA2");
    assert_eq!(team.members().handles().map(<[_]>::len), Some(2));
}

fn team_name_of(store: &SqliteStore, username: &str) -> String {
    store
        .connection()
        .query_row(
            "SELECT t.name FROM member m JOIN team t ON t.team_id = m.team_id WHERE m.username = ?1",
            [username],
            |row| row.get(0),
        )
        .unwrap()
}

fn row_count(store: &SqliteStore, table: &str) -> i64 {
    store
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}
