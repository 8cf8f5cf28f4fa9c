//! Repository layer: generic CRUD plus per-entity declared queries.
//!
//! # Responsibility
//! - Define the repository error taxonomy shared by the whole crate.
//! - Provide typed CRUD and query surfaces for `Member` and `Team`.
//!
//! # Invariants
//! - Declared queries are parsed/validated when a repository is built, so a
//!   malformed query fails at startup instead of on first call.
//! - Store failures are propagated unchanged inside `RepoError::Store`.

pub mod entity_repo;
pub mod member_repo;
pub mod team_repo;

use crate::db::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors raised by the persistence context, queries and repositories.
#[derive(Debug)]
pub enum RepoError {
    /// Exactly one row was required, none matched.
    NotFound { entity: &'static str, key: String },
    /// At most one row was required, several matched.
    AmbiguousResult { query: String, found: usize },
    /// A flush would overwrite rows changed by an un-cleared bulk write.
    StaleState { table: &'static str },
    /// Derived-query name or query text failed to parse.
    MalformedQuery { query: String, reason: String },
    /// `track` was called with an entity that already has an identity.
    AlreadyPersistent { entity: &'static str, id: i64 },
    /// Handle does not belong to (or was cleared from) this context.
    Detached { entity: &'static str },
    /// A write references an entity that has no identity yet.
    TransientReference { entity: &'static str },
    InvalidArgument(String),
    InvalidData(String),
    Store(StoreError),
}

impl RepoError {
    pub(crate) fn malformed(query: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedQuery {
            query: query.into(),
            reason: reason.into(),
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::AmbiguousResult { query, found } => write!(
                f,
                "query `{query}` expected at most one result but found {found}"
            ),
            Self::StaleState { table } => write!(
                f,
                "flush would overwrite rows of `{table}` changed by a bulk write; clear the context after bulk updates"
            ),
            Self::MalformedQuery { query, reason } => {
                write!(f, "malformed query `{query}`: {reason}")
            }
            Self::AlreadyPersistent { entity, id } => {
                write!(f, "{entity} already has identity {id}; use save/merge instead of track")
            }
            Self::Detached { entity } => {
                write!(f, "{entity} handle is not managed by this persistence context")
            }
            Self::TransientReference { entity } => write!(
                f,
                "reference to transient {entity}; persist it before flushing its owner"
            ),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(value))
    }
}
