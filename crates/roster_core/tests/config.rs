use roster_core::{
    open_store, ConfigError, CoreConfig, CrudRepository, Direction, Member, MemberRepository,
    PersistenceContext, Sort,
};
use std::fs;
use tempfile::TempDir;

#[test]
fn config_file_is_loaded_and_validated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("roster.json");
    fs::write(
        &path,
        r#"{ "database_path": "roster.db", "log_level": "debug", "default_page_size": 5 }"#,
    )
    .unwrap();

    let config = CoreConfig::from_file(&path).unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.default_page_size, 5);
    assert_eq!(config.max_page_size, 2_000);
    assert_eq!(config.busy_timeout_ms, 5_000);
}

#[test]
fn missing_config_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let err = CoreConfig::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn malformed_config_file_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("roster.json");
    fs::write(&path, "{ not json").unwrap();

    let err = CoreConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn file_store_keeps_members_across_reopen() {
    let dir = TempDir::new().unwrap();
    let config = CoreConfig {
        database_path: Some(dir.path().join("roster.db")),
        ..CoreConfig::default()
    };

    {
        let store = open_store(&config).unwrap();
        let members = MemberRepository::new(&store).unwrap();
        let mut ctx = PersistenceContext::new(&store);
        members.save(&mut ctx, Member::with_age("member1", 10)).unwrap();
        members.save(&mut ctx, Member::with_age("member2", 20)).unwrap();
    }

    let store = open_store(&config).unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut ctx = PersistenceContext::new(&store);
    assert_eq!(members.count(&mut ctx).unwrap(), 2);

    let request = config
        .page_request(0, None, Sort::by(Direction::Desc, &["age"]))
        .unwrap();
    let page = members.find_all_paged(&mut ctx, &request).unwrap();
    assert_eq!(page.size(), 20);
    assert_eq!(ctx.get(page.content()[0]).unwrap().username, "member2");
}
