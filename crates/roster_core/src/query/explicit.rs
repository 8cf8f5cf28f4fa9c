//! Explicit SQL queries with named parameters.
//!
//! # Responsibility
//! - Validate declared SQL once, when the owning repository is built.
//! - Bind arguments by name, expanding list arguments for `IN (:names)`.
//! - Map rows to entities, scalars or projections; page and count.
//!
//! # Invariants
//! - A query that fails validation never becomes an `ExplicitQuery`.
//! - Every declared parameter must be bound; unknown names are rejected.
//! - Only queries declared `modifying` may run as updates.

use crate::context::PersistenceContext;
use crate::model::entity::{Entity, Handle};
use crate::page::{self, Page, PageRequest, Slice};
use crate::query::predicate::Arg;
use crate::query::QueryResult;
use crate::repo::{RepoError, RepoResult};
use crate::store::{FromRow, FromValue, Params, Row, Statement, Store};
use log::debug;
use regex::{NoExpand, Regex};
use rusqlite::types::Value;

/// Bulk-update declaration of a modifying query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modifying {
    /// Table touched by the update; used to mark loaded state stale.
    pub table: &'static str,
    /// Clear the persistence context after the update.
    pub clear_automatically: bool,
}

/// Named SQL query validated against the store.
#[derive(Debug, Clone)]
pub struct ExplicitQuery {
    name: String,
    sql: String,
    parameters: Vec<String>,
    count: Option<CountQuery>,
    modifying: Option<Modifying>,
}

#[derive(Debug, Clone)]
struct CountQuery {
    sql: String,
    parameters: Vec<String>,
}

impl ExplicitQuery {
    /// Parses `sql` against the store schema. Unknown tables or columns and
    /// syntax errors surface here as `MalformedQuery`.
    pub fn prepare(store: &dyn Store, name: &str, sql: &str) -> RepoResult<Self> {
        let parameters = store
            .validate(sql)
            .map_err(|err| RepoError::malformed(name, err.to_string()))?;
        debug!(
            "event=query_prepare module=query status=ok name={name} params={}",
            parameters.len()
        );
        Ok(Self {
            name: name.to_string(),
            sql: sql.to_string(),
            parameters,
            count: None,
            modifying: None,
        })
    }

    /// Overrides the count query used by `page`. Its parameters must be a
    /// subset of the main query's.
    pub fn with_count_query(mut self, store: &dyn Store, sql: &str) -> RepoResult<Self> {
        let parameters = store
            .validate(sql)
            .map_err(|err| RepoError::malformed(&self.name, format!("count query: {err}")))?;
        if let Some(extra) = parameters
            .iter()
            .find(|parameter| !self.parameters.contains(parameter))
        {
            return Err(RepoError::malformed(
                &self.name,
                format!("count query parameter `:{extra}` is not bound by the main query"),
            ));
        }
        self.count = Some(CountQuery {
            sql: sql.to_string(),
            parameters,
        });
        Ok(self)
    }

    /// Declares the query as a bulk update of `table`.
    pub fn modifying(mut self, table: &'static str, clear_automatically: bool) -> Self {
        self.modifying = Some(Modifying {
            table,
            clear_automatically,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Declared parameter names, without the leading colon.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Raw rows, after flushing pending changes.
    pub fn rows(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
    ) -> RepoResult<Vec<Row>> {
        let (sql, params) = self.bind(&self.sql, &self.parameters, args)?;
        ctx.query_rows(&sql, Params::Named(params))
    }

    /// Rows mapped to managed entities of `E`.
    pub fn entities<E: Entity>(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
    ) -> RepoResult<QueryResult<Handle<E>>> {
        self.entities_with(ctx, args, false)
    }

    /// Rows mapped to read-only entities of `E`.
    pub fn entities_read_only<E: Entity>(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
    ) -> RepoResult<QueryResult<Handle<E>>> {
        self.entities_with(ctx, args, true)
    }

    /// First column of every row.
    pub fn scalars<T: FromValue>(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
    ) -> RepoResult<QueryResult<T>> {
        let rows = self.rows(ctx, args)?;
        let values = rows
            .iter()
            .map(|row| row.first::<T>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResult::new(self.name.clone(), "value", values))
    }

    /// Rows mapped through a projection type.
    pub fn dtos<T: FromRow>(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
    ) -> RepoResult<QueryResult<T>> {
        let rows = self.rows(ctx, args)?;
        let values = rows
            .iter()
            .map(T::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryResult::new(self.name.clone(), "projection", values))
    }

    /// One page of entities. The window wraps the declared SQL, so sorts
    /// name unqualified columns of its result.
    pub fn page<E: Entity>(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
        request: &PageRequest,
    ) -> RepoResult<Page<Handle<E>>> {
        let rows = self.window::<E>(ctx, args, request, request.size())?;
        let content = ctx.attach_rows::<E>(&rows, "", false)?;
        let total = match page::known_total(request, content.len()) {
            Some(total) => total,
            None => self.count(ctx, args)?,
        };
        Ok(Page::new(content, request, total))
    }

    /// One window of entities, reading one extra row for `has_next`.
    pub fn slice<E: Entity>(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
        request: &PageRequest,
    ) -> RepoResult<Slice<Handle<E>>> {
        let mut rows = self.window::<E>(ctx, args, request, request.size() + 1)?;
        let has_next = rows.len() as u64 > request.size();
        rows.truncate(request.size() as usize);
        let content = ctx.attach_rows::<E>(&rows, "", false)?;
        Ok(Slice::new(content, request, has_next))
    }

    /// Total rows matched, through the declared count query when present.
    pub fn count(&self, ctx: &mut PersistenceContext<'_>, args: &[(&str, Arg)]) -> RepoResult<u64> {
        let (sql, params) = match &self.count {
            Some(count) => self.bind(&count.sql, &count.parameters, args)?,
            None => {
                let (sql, params) = self.bind(&self.sql, &self.parameters, args)?;
                (format!("SELECT COUNT(*) FROM ({sql})"), params)
            }
        };
        let rows = ctx.query_rows(&sql, Params::Named(params))?;
        let count: i64 = match rows.first() {
            Some(row) => row.first()?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    /// Runs a modifying query as a bulk update and returns affected rows.
    /// Pending changes are flushed first; see `PersistenceContext::execute_bulk`.
    pub fn execute_update(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
    ) -> RepoResult<usize> {
        let modifying = self.modifying.ok_or_else(|| {
            RepoError::InvalidArgument(format!("query `{}` is not declared modifying", self.name))
        })?;
        let (sql, params) = self.bind(&self.sql, &self.parameters, args)?;
        ctx.execute_bulk(
            Statement::new(sql, Params::Named(params)),
            modifying.table,
            modifying.clear_automatically,
        )
    }

    fn entities_with<E: Entity>(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
        read_only: bool,
    ) -> RepoResult<QueryResult<Handle<E>>> {
        let rows = self.rows(ctx, args)?;
        let handles = ctx.attach_rows::<E>(&rows, "", read_only)?;
        Ok(QueryResult::new(self.name.clone(), E::NAME, handles))
    }

    fn window<E: Entity>(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[(&str, Arg)],
        request: &PageRequest,
        limit: u64,
    ) -> RepoResult<Vec<Row>> {
        let (sql, mut params) = self.bind(&self.sql, &self.parameters, args)?;
        let order = if request.sort().is_unsorted() {
            String::new()
        } else {
            format!(" ORDER BY {}", request.sort().to_sql::<E>(None)?)
        };
        let sql = format!(
            "SELECT * FROM ({sql}){order} LIMIT :page__limit OFFSET :page__offset"
        );
        let (limit, offset) = request.sql_bounds(limit)?;
        params.push(("page__limit".to_string(), Value::Integer(limit)));
        params.push(("page__offset".to_string(), Value::Integer(offset)));
        ctx.query_rows(&sql, Params::Named(params))
    }

    /// Binds `args` to the `declared` parameters of `sql`. List arguments
    /// rewrite `:name` into one placeholder per element.
    fn bind(
        &self,
        sql: &str,
        declared: &[String],
        args: &[(&str, Arg)],
    ) -> RepoResult<(String, Vec<(String, Value)>)> {
        if let Some((unknown, _)) = args
            .iter()
            .find(|(name, _)| !self.parameters.iter().any(|parameter| parameter == name))
        {
            return Err(RepoError::InvalidArgument(format!(
                "query `{}` has no parameter `:{unknown}`",
                self.name
            )));
        }

        let mut sql = sql.to_string();
        let mut params = Vec::with_capacity(declared.len());
        for parameter in declared {
            let (_, arg) = args
                .iter()
                .find(|(name, _)| name == parameter)
                .ok_or_else(|| {
                    RepoError::InvalidArgument(format!(
                        "query `{}` is missing parameter `:{parameter}`",
                        self.name
                    ))
                })?;
            match arg {
                Arg::Value(value) => params.push((parameter.clone(), value.clone())),
                Arg::List(values) => {
                    let names = (0..values.len())
                        .map(|index| format!("{parameter}__{index}"))
                        .collect::<Vec<_>>();
                    let placeholders = names
                        .iter()
                        .map(|name| format!(":{name}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let pattern = Regex::new(&format!(r":{}\b", regex::escape(parameter)))
                        .map_err(|err| RepoError::malformed(&self.name, err.to_string()))?;
                    sql = pattern
                        .replace_all(&sql, NoExpand(&placeholders))
                        .into_owned();
                    params.extend(names.into_iter().zip(values.iter().cloned()));
                }
            }
        }
        Ok((sql, params))
    }
}
