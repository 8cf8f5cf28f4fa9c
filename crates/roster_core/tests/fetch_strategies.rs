use roster_core::{
    open_store_in_memory, CrudRepository, Handle, Lazy, Member, MemberRepository,
    PersistenceContext, Team, TeamRepository,
};

#[test]
fn lazy_team_loads_once_per_distinct_team() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&members, &mut ctx);
    ctx.clear();

    let before = store.executed_queries();
    let loaded = members.find_all(&mut ctx).unwrap();
    assert_eq!(store.executed_queries() - before, 1);
    assert_eq!(loaded.len(), 4);
    for handle in &loaded {
        let team = ctx.get(*handle).unwrap().team;
        assert!(team.map_or(true, |team| !team.is_loaded()));
    }

    let before = store.executed_queries();
    let mut team_names = Vec::new();
    for handle in &loaded {
        if let Some(team) = ctx.team_of(*handle).unwrap() {
            team_names.push(ctx.get(team).unwrap().name.clone());
        }
    }
    assert_eq!(store.executed_queries() - before, 2);
    team_names.sort();
    assert_eq!(team_names, vec!["teamA", "teamA", "teamB"]);
}

#[test]
fn resolved_team_is_shared_by_members() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&members, &mut ctx);
    ctx.clear();

    let member1 = members.find_by_username(&mut ctx, "member1").unwrap().unwrap();
    let member3 = members.find_by_username(&mut ctx, "member3").unwrap().unwrap();

    let first = ctx.team_of(member1).unwrap().unwrap();
    let before = store.executed_queries();
    let second = ctx.team_of(member3).unwrap().unwrap();

    assert_eq!(store.executed_queries(), before);
    assert_eq!(first, second);
    assert_eq!(ctx.get(member1).unwrap().team, Some(Lazy::Loaded(first)));
}

#[test]
fn fetch_join_loads_members_and_teams_in_one_statement() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&members, &mut ctx);
    ctx.clear();

    let before = store.executed_queries();
    let loaded = members.find_member_fetch_join(&mut ctx).unwrap();
    let mut team_names = Vec::new();
    for handle in &loaded {
        let team = ctx.get(*handle).unwrap().team.and_then(|team| team.handle());
        let team = team.expect("fetch join loads the team");
        team_names.push(ctx.get(team).unwrap().name.clone());
    }

    assert_eq!(store.executed_queries() - before, 1);
    assert_eq!(loaded.len(), 3);
    team_names.sort();
    assert_eq!(team_names, vec!["teamA", "teamA", "teamB"]);
}

#[test]
fn fetch_join_reuses_one_instance_per_team() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&members, &mut ctx);
    ctx.clear();

    let loaded = members.find_member_fetch_join(&mut ctx).unwrap();
    let teams: Vec<Handle<Team>> = loaded
        .iter()
        .filter_map(|handle| ctx.get(*handle).unwrap().team.and_then(|team| team.handle()))
        .collect();
    let team_a: Vec<_> = teams
        .iter()
        .filter(|team| ctx.get(**team).unwrap().name == "teamA")
        .collect();

    assert_eq!(team_a.len(), 2);
    assert_eq!(team_a[0], team_a[1]);
}

#[test]
fn entity_graph_query_keeps_members_without_team() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&members, &mut ctx);
    ctx.clear();

    let before = store.executed_queries();
    let loaded = members.find_member_by(&mut ctx).unwrap();
    assert_eq!(store.executed_queries() - before, 1);
    assert_eq!(loaded.len(), 4);

    let mut teamless = 0;
    for handle in &loaded {
        match ctx.get(*handle).unwrap().team {
            None => teamless += 1,
            Some(team) => assert!(team.is_loaded()),
        }
    }
    assert_eq!(teamless, 1);

    let before = store.executed_queries();
    for handle in &loaded {
        ctx.team_of(*handle).unwrap();
    }
    assert_eq!(store.executed_queries(), before);
}

#[test]
fn fetch_join_loaded_members_are_not_dirty() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    seed(&members, &mut ctx);
    ctx.clear();

    members.find_member_fetch_join(&mut ctx).unwrap();
    let before = store.executed_queries();
    ctx.flush().unwrap();

    assert_eq!(store.executed_queries(), before);
}

fn seed(members: &MemberRepository, ctx: &mut PersistenceContext<'_>) {
    let teams = TeamRepository::new().unwrap();
    let team_a = teams.save(ctx, Team::new("teamA")).unwrap();
    let team_b = teams.save(ctx, Team::new("teamB")).unwrap();
    members.save(ctx, Member::with_team("member1", 10, team_a)).unwrap();
    members.save(ctx, Member::with_team("member2", 20, team_b)).unwrap();
    members.save(ctx, Member::with_team("member3", 30, team_a)).unwrap();
    members.save(ctx, Member::with_age("member4", 40)).unwrap();
}
