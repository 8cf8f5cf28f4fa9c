//! `Store` implementation over a single `rusqlite::Connection`.
//!
//! # Invariants
//! - Every `execute_query`/`execute_write` statement bumps the executed
//!   statement counter; transaction control and `validate` do not.
//! - The store is bound to one thread (`Cell` counter), matching the
//!   one-context-per-unit-of-work model.

use super::{Params, Row, Statement, Store};
use crate::db::{StoreError, StoreResult};
use log::debug;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::cell::Cell;
use std::rc::Rc;

/// SQLite-backed store adapter.
pub struct SqliteStore {
    conn: Connection,
    executed: Cell<u64>,
    log_sql: bool,
}

impl SqliteStore {
    /// Wraps a migrated connection, see `db::open_db`.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            executed: Cell::new(0),
            log_sql: false,
        }
    }

    /// Enables `debug` logging of every executed statement.
    pub fn with_sql_logging(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of statements executed through this adapter so far.
    pub fn executed_queries(&self) -> u64 {
        self.executed.get()
    }

    fn record(&self, sql: &str, params: &Params) {
        self.executed.set(self.executed.get() + 1);
        if self.log_sql {
            debug!(
                "event=sql module=store statement_no={} sql={} params={:?}",
                self.executed.get(),
                sql.split_whitespace().collect::<Vec<_>>().join(" "),
                params
            );
        }
    }

    fn prepare_bound(&self, sql: &str, params: &Params) -> StoreResult<rusqlite::Statement<'_>> {
        let mut stmt = self.conn.prepare(sql)?;
        match params {
            Params::None => {}
            Params::Positional(values) => {
                for (index, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(index + 1, value)?;
                }
            }
            Params::Named(values) => {
                for (name, value) in values {
                    let placeholder = format!(":{name}");
                    let index = stmt
                        .parameter_index(&placeholder)?
                        .ok_or_else(|| rusqlite::Error::InvalidParameterName(placeholder.clone()))?;
                    stmt.raw_bind_parameter(index, value)?;
                }
            }
        }
        Ok(stmt)
    }

    fn transaction_control(&self, sql: &str) -> StoreResult<()> {
        self.conn.execute_batch(sql)?;
        if self.log_sql {
            debug!("event=sql module=store sql={sql}");
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn execute_query(&self, sql: &str, params: &Params) -> StoreResult<Vec<Row>> {
        self.record(sql, params);
        let mut stmt = self.prepare_bound(sql, params)?;
        let columns: Rc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();
        let column_count = columns.len();

        let mut rows = stmt.raw_query();
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for index in 0..column_count {
                values.push(row.get::<_, Value>(index)?);
            }
            result.push(Row::new(Rc::clone(&columns), values));
        }
        Ok(result)
    }

    fn execute_write(&self, statements: &[Statement]) -> StoreResult<usize> {
        let mut affected = 0;
        for statement in statements {
            self.record(&statement.sql, &statement.params);
            let mut stmt = self.prepare_bound(&statement.sql, &statement.params)?;
            affected += stmt.raw_execute()?;
        }
        Ok(affected)
    }

    fn begin_transaction(&self) -> StoreResult<()> {
        if !self.conn.is_autocommit() {
            return Err(StoreError::TransactionState("transaction already active"));
        }
        self.transaction_control("BEGIN;")
    }

    fn commit(&self) -> StoreResult<()> {
        if self.conn.is_autocommit() {
            return Err(StoreError::TransactionState("no active transaction to commit"));
        }
        self.transaction_control("COMMIT;")
    }

    fn rollback(&self) -> StoreResult<()> {
        if self.conn.is_autocommit() {
            return Err(StoreError::TransactionState("no active transaction to roll back"));
        }
        self.transaction_control("ROLLBACK;")
    }

    fn validate(&self, sql: &str) -> StoreResult<Vec<String>> {
        let stmt = self.conn.prepare(sql)?;
        let mut names = Vec::new();
        for index in 1..=stmt.parameter_count() {
            if let Some(name) = stmt.parameter_name(index) {
                let name = name.trim_start_matches([':', '@', '$']).to_string();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }
}
