use roster_core::{
    open_store_in_memory, Arg, CrudRepository, DerivedQuery, Direction, Member, MemberRepository,
    PageRequest, PersistenceContext, RepoError, Sort, SqliteStore, Team, TeamRepository,
};

#[test]
fn page_by_age_reports_totals() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    save_five_members(&members, &mut ctx, None);

    let request = PageRequest::sorted(0, 3, Sort::by(Direction::Desc, &["username"])).unwrap();
    let statements = Statements::start(&store);
    let page = members.find_page_by_age(&mut ctx, 10, &request).unwrap();

    assert_eq!(statements.issued(&store), 2);
    assert_eq!(page.content().len(), 3);
    assert_eq!(page.total_elements(), 5);
    assert_eq!(page.total_pages(), 2);
    assert_eq!(page.number(), 0);
    assert!(page.is_first());
    assert!(page.has_next());
    assert_eq!(
        usernames(&ctx, page.content()),
        vec!["member5", "member4", "member3"]
    );
}

#[test]
fn short_last_page_skips_the_count_query() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    save_five_members(&members, &mut ctx, None);

    let request = PageRequest::sorted(1, 3, Sort::by(Direction::Asc, &["username"])).unwrap();
    let statements = Statements::start(&store);
    let page = members.find_page_by_age(&mut ctx, 10, &request).unwrap();

    assert_eq!(statements.issued(&store), 1);
    assert_eq!(page.total_elements(), 5);
    assert!(page.is_last());
    assert!(page.has_previous());
    assert_eq!(usernames(&ctx, page.content()), vec!["member4", "member5"]);
}

#[test]
fn empty_page_past_the_end_still_counts() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    save_five_members(&members, &mut ctx, None);

    let request = PageRequest::of(4, 3).unwrap();
    let page = members.find_page_by_age(&mut ctx, 10, &request).unwrap();

    assert!(page.content().is_empty());
    assert_eq!(page.total_elements(), 5);
}

#[test]
fn slice_fetches_one_extra_row_and_never_counts() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    save_five_members(&members, &mut ctx, None);

    let request = PageRequest::of(0, 3).unwrap();
    let statements = Statements::start(&store);
    let slice = members.find_slice_by_age(&mut ctx, 10, &request).unwrap();

    assert_eq!(statements.issued(&store), 1);
    assert_eq!(slice.content().len(), 3);
    assert_eq!(slice.number(), 0);
    assert!(slice.is_first());
    assert!(slice.has_next());

    let last = members
        .find_slice_by_age(&mut ctx, 10, &request.next())
        .unwrap();
    assert_eq!(last.content().len(), 2);
    assert!(!last.has_next());
}

#[test]
fn explicit_page_uses_the_declared_count_query() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let teams = TeamRepository::new().unwrap();
    let mut ctx = PersistenceContext::new(&store);
    let team = teams.save(&mut ctx, Team::new("teamA")).unwrap();
    save_five_members(&members, &mut ctx, Some(team));

    let request = PageRequest::of(0, 3).unwrap();
    let statements = Statements::start(&store);
    let page = members.find_member_all_by(&mut ctx, &request).unwrap();

    assert_eq!(statements.issued(&store), 2);
    assert_eq!(page.content().len(), 3);
    assert_eq!(page.total_elements(), 5);
    assert_eq!(page.total_pages(), 2);
    assert_eq!(page.number(), 0);
    assert!(page.is_first());
    assert!(page.has_next());
}

#[test]
fn explicit_page_honours_sort() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    save_five_members(&members, &mut ctx, None);

    let request = PageRequest::sorted(0, 2, Sort::by(Direction::Desc, &["username"])).unwrap();
    let page = members.find_member_all_by(&mut ctx, &request).unwrap();

    assert_eq!(usernames(&ctx, page.content()), vec!["member5", "member4"]);
}

#[test]
fn find_all_paged_maps_content() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    save_five_members(&members, &mut ctx, None);

    let request = PageRequest::sorted(0, 2, Sort::by(Direction::Asc, &["username"])).unwrap();
    let page = members.find_all_paged(&mut ctx, &request).unwrap();
    let names = page.map(|handle| ctx.get(handle).unwrap().username.clone());

    assert_eq!(names.content(), ["member1", "member2"]);
    assert_eq!(names.total_pages(), 3);
}

#[test]
fn sort_on_unknown_property_is_malformed() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);

    let request = PageRequest::sorted(0, 3, Sort::by(Direction::Desc, &["nickname"])).unwrap();
    let err = members.find_page_by_age(&mut ctx, 10, &request).unwrap_err();

    assert!(matches!(err, RepoError::MalformedQuery { .. }));
}

#[test]
fn top_limit_bounds_pages_and_slices() {
    let store = open_store_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    save_five_members(&members, &mut ctx, None);
    let top3 = DerivedQuery::<Member>::parse("findTop3ByAge").unwrap();
    let args = [Arg::from(10)];
    let request = |page| {
        PageRequest::sorted(page, 2, Sort::by(Direction::Asc, &["username"])).unwrap()
    };

    let first = top3.page(&mut ctx, &args, &request(0)).unwrap();
    assert_eq!(usernames(&ctx, first.content()), vec!["member1", "member2"]);
    assert_eq!(first.total_elements(), 3);
    assert_eq!(first.total_pages(), 2);

    let second = top3.page(&mut ctx, &args, &request(1)).unwrap();
    assert_eq!(usernames(&ctx, second.content()), vec!["member3"]);
    assert_eq!(second.total_elements(), 3);
    assert!(second.is_last());

    let past = top3.page(&mut ctx, &args, &request(2)).unwrap();
    assert!(past.content().is_empty());
    assert_eq!(past.total_elements(), 3);

    let head = top3.slice(&mut ctx, &args, &request(0)).unwrap();
    assert!(head.has_next());
    let tail = top3.slice(&mut ctx, &args, &request(1)).unwrap();
    assert_eq!(usernames(&ctx, tail.content()), vec!["member3"]);
    assert!(!tail.has_next());
}

#[test]
fn page_beyond_the_addressable_range_is_rejected() {
    let err = PageRequest::of(u64::MAX, 2).unwrap_err();
    assert!(matches!(err, RepoError::InvalidArgument(_)));
}

#[test]
fn zero_page_size_is_rejected() {
    let err = PageRequest::of(0, 0).unwrap_err();
    assert!(matches!(err, RepoError::InvalidArgument(_)));
}

struct Statements(u64);

impl Statements {
    fn start(store: &SqliteStore) -> Self {
        Self(store.executed_queries())
    }

    fn issued(&self, store: &SqliteStore) -> u64 {
        store.executed_queries() - self.0
    }
}

fn save_five_members(
    members: &MemberRepository,
    ctx: &mut PersistenceContext<'_>,
    team: Option<roster_core::Handle<Team>>,
) {
    for index in 1..=5 {
        let username = format!("member{index}");
        let member = match team {
            Some(team) => Member::with_team(username, 10, team),
            None => Member::with_age(username, 10),
        };
        members.save(ctx, member).unwrap();
    }
}

fn usernames(ctx: &PersistenceContext<'_>, handles: &[roster_core::Handle<Member>]) -> Vec<String> {
    handles
        .iter()
        .map(|handle| ctx.get(*handle).unwrap().username.clone())
        .collect()
}
