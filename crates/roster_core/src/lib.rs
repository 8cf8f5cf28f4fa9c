//! Roster persistence core: members, teams and a unit-of-work repository
//! layer over SQLite.
//!
//! Entities live in a `PersistenceContext`; repositories are stateless and
//! take the context explicitly on every call.

pub mod audit;
pub mod config;
pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod page;
pub mod query;
pub mod repo;
pub mod store;

pub use audit::{Auditing, AuditorAware, Clock, FixedAuditor, SystemClock, UuidAuditor};
pub use config::{open_store, open_store_in_memory, ConfigError, CoreConfig};
pub use context::{FlushMode, PersistenceContext};
pub use db::{StoreError, StoreResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::audit::{ActorId, AuditFields};
pub use model::dto::MemberDto;
pub use model::entity::{Entity, EntityId, Handle, Lazy, LazyCollection};
pub use model::member::{Member, MemberId};
pub use model::team::{Team, TeamId};
pub use page::{Page, PageRequest, Slice};
pub use query::derived::DerivedQuery;
pub use query::explicit::ExplicitQuery;
pub use query::predicate::Arg;
pub use query::sort::{Direction, Order, Sort};
pub use query::QueryResult;
pub use repo::entity_repo::{CrudRepository, EntityRepository};
pub use repo::member_repo::{CustomMemberQueries, MemberRepository};
pub use repo::team_repo::{MemberDisposal, TeamRepository};
pub use repo::{RepoError, RepoResult};
pub use store::{FromRow, FromValue, Params, Row, SqliteStore, Statement, Store};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
