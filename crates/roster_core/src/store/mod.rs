//! Storage adapter contract.
//!
//! # Responsibility
//! - Define the minimal surface the persistence context needs from a
//!   relational store: run a query, run writes, demarcate transactions.
//! - Keep driver types out of repository signatures, except for the
//!   `rusqlite::types::Value` cell representation.
//!
//! # Invariants
//! - Adapter calls never retry; failures surface as `StoreError` unchanged.
//! - `validate` parses a statement without executing it.

mod row;
mod sqlite;

pub use row::{FromRow, FromValue, Row};
pub use sqlite::SqliteStore;

use crate::db::StoreResult;
use rusqlite::types::Value;

/// Bound parameters for one statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    /// Bound to `?` placeholders in order.
    Positional(Vec<Value>),
    /// Bound to `:name` placeholders. Names are stored without the colon.
    Named(Vec<(String, Value)>),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Positional(values) => values.is_empty(),
            Self::Named(values) => values.is_empty(),
        }
    }
}

/// One write statement with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Params,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Params) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Minimal relational store contract consumed by the persistence context.
pub trait Store {
    /// Runs one statement that yields rows.
    fn execute_query(&self, sql: &str, params: &Params) -> StoreResult<Vec<Row>>;
    /// Runs write statements in order and returns the total affected rows.
    fn execute_write(&self, statements: &[Statement]) -> StoreResult<usize>;
    fn begin_transaction(&self) -> StoreResult<()>;
    fn commit(&self) -> StoreResult<()>;
    fn rollback(&self) -> StoreResult<()>;
    /// Parses `sql` without running it and returns its named parameters.
    fn validate(&self, sql: &str) -> StoreResult<Vec<String>>;
}
