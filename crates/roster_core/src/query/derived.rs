//! Derived queries: criteria parsed from a method name.
//!
//! # Responsibility
//! - Parse names like `findTop3ByUsernameAndAgeGreaterThanOrderByAgeDesc`
//!   against the property list of one entity.
//! - Execute the parsed query through a persistence context.
//!
//! # Invariants
//! - Parsing fails with `MalformedQuery`; it never guesses a property.
//! - Argument count is checked at call time against `Predicate::arity`;
//!   a mismatch is `MalformedQuery`, like a bad name.
//! - Only conjunctions are supported. `Or` is rejected at parse time.

use crate::context::PersistenceContext;
use crate::model::entity::{Entity, Handle, Property};
use crate::page::{self, Page, PageRequest, Slice};
use crate::query::predicate::{Arg, Criterion, Operator, Predicate};
use crate::query::sort::{Direction, Order, Sort};
use crate::query::{select_list, QueryResult};
use crate::repo::{RepoError, RepoResult};
use crate::store::{Params, Row};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use std::marker::PhantomData;

static METHOD_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(find|read|get|query|search|stream|count|exists|delete|remove)([A-Za-z0-9]*?)By([A-Za-z0-9]*)$")
        .expect("valid derived query regex")
});

static SUBJECT_LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:Top|First)(\d*)").expect("valid subject limit regex"));

/// Operator keywords, longest spelling first within each family.
const OPERATOR_KEYWORDS: &[(&str, Operator)] = &[
    ("GreaterThanEqual", Operator::GreaterThanEqual),
    ("GreaterThan", Operator::GreaterThan),
    ("LessThanEqual", Operator::LessThanEqual),
    ("LessThan", Operator::LessThan),
    ("Between", Operator::Between),
    ("NotLike", Operator::NotLike),
    ("Like", Operator::Like),
    ("StartingWith", Operator::StartingWith),
    ("StartsWith", Operator::StartingWith),
    ("EndingWith", Operator::EndingWith),
    ("EndsWith", Operator::EndingWith),
    ("Containing", Operator::Containing),
    ("Contains", Operator::Containing),
    ("NotIn", Operator::NotIn),
    ("In", Operator::In),
    ("NotNull", Operator::IsNotNull),
    ("Null", Operator::IsNull),
    ("True", Operator::True),
    ("False", Operator::False),
    ("Not", Operator::NotEquals),
    ("Equals", Operator::Equals),
];

/// What the method prefix asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Find,
    Count,
    Exists,
    Delete,
}

/// A query parsed from a method name, bound to entity `E`.
#[derive(Debug, Clone)]
pub struct DerivedQuery<E> {
    method: String,
    action: Action,
    distinct: bool,
    limit: Option<u64>,
    predicate: Predicate,
    sort: Sort,
    read_only: bool,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> DerivedQuery<E> {
    /// Parses `method` against the properties of `E`.
    pub fn parse(method: &str) -> RepoResult<Self> {
        let captures = METHOD_NAME_RE.captures(method).ok_or_else(|| {
            RepoError::malformed(
                method,
                "expected `<find|count|exists|delete...><Subject>By<Criteria>`",
            )
        })?;
        let action = match &captures[1] {
            "count" => Action::Count,
            "exists" => Action::Exists,
            "delete" | "remove" => Action::Delete,
            _ => Action::Find,
        };
        let (distinct, limit) = parse_subject(method, &captures[2])?;

        let rest = &captures[3];
        let (criteria_text, order_text) = match rest.find("OrderBy") {
            Some(index) => (&rest[..index], Some(&rest[index + "OrderBy".len()..])),
            None => (rest, None),
        };
        let criteria = parse_criteria::<E>(method, criteria_text)?;
        let sort = match order_text {
            Some(text) => parse_order::<E>(method, text)?,
            None => Sort::unsorted(),
        };

        Ok(Self {
            method: method.to_string(),
            action,
            distinct,
            limit,
            predicate: Predicate::all(criteria),
            sort,
            read_only: false,
            _marker: PhantomData,
        })
    }

    /// Unrestricted query over every row of `E`.
    pub fn all() -> Self {
        Self {
            method: "findAll".to_string(),
            action: Action::Find,
            distinct: false,
            limit: None,
            predicate: Predicate::Always,
            sort: Sort::unsorted(),
            read_only: false,
            _marker: PhantomData,
        }
    }

    /// Loads results as read-only: never snapshotted, never flushed.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Number of arguments each call must supply.
    pub fn arity(&self) -> usize {
        self.predicate.arity()
    }

    pub fn find(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[Arg],
    ) -> RepoResult<QueryResult<Handle<E>>> {
        self.find_sorted(ctx, args, &Sort::unsorted())
    }

    /// Like `find`, with `sort` applied after the sort named in the method.
    pub fn find_sorted(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[Arg],
        sort: &Sort,
    ) -> RepoResult<QueryResult<Handle<E>>> {
        self.expect_action(&[Action::Find])?;
        let (where_sql, binds) = self.where_clause(args)?;
        let limit = self
            .limit
            .map(|limit| format!(" LIMIT {limit}"))
            .unwrap_or_default();
        let sql = format!(
            "{}{}{}{}",
            self.select_sql(),
            where_sql,
            self.order_clause(sort)?,
            limit
        );
        let rows = ctx.query_rows(&sql, Params::Positional(binds))?;
        let handles = ctx.attach_rows::<E>(&rows, "", self.read_only)?;
        Ok(QueryResult::new(self.method.clone(), E::NAME, handles))
    }

    /// One page of results plus the total count.
    ///
    /// The count query is skipped when the content alone determines the
    /// total (short first page, or non-empty short last page). A `Top` or
    /// `First` limit bounds the paged result: pages past it are empty and
    /// the total never exceeds it.
    pub fn page(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[Arg],
        request: &PageRequest,
    ) -> RepoResult<Page<Handle<E>>> {
        self.expect_action(&[Action::Find])?;
        let rows = self.window(ctx, args, request, request.size())?;
        let content = ctx.attach_rows::<E>(&rows, "", self.read_only)?;
        let total = match page::known_total(request, content.len()) {
            Some(total) => total,
            None => self.count(ctx, args)?,
        };
        let total = self.limit.map_or(total, |limit| total.min(limit));
        Ok(Page::new(content, request, total))
    }

    /// One window of results without a count query. Fetches one extra row
    /// to learn whether a next window exists.
    pub fn slice(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[Arg],
        request: &PageRequest,
    ) -> RepoResult<Slice<Handle<E>>> {
        self.expect_action(&[Action::Find])?;
        let mut rows = self.window(ctx, args, request, request.size() + 1)?;
        let has_next = rows.len() as u64 > request.size();
        rows.truncate(request.size() as usize);
        let content = ctx.attach_rows::<E>(&rows, "", self.read_only)?;
        Ok(Slice::new(content, request, has_next))
    }

    pub fn count(&self, ctx: &mut PersistenceContext<'_>, args: &[Arg]) -> RepoResult<u64> {
        self.expect_action(&[Action::Find, Action::Count])?;
        let (where_sql, binds) = self.where_clause(args)?;
        let sql = if self.distinct {
            format!("SELECT COUNT(*) FROM ({}{where_sql})", self.select_sql())
        } else {
            format!("SELECT COUNT(*) FROM {}{where_sql}", E::TABLE)
        };
        let rows = ctx.query_rows(&sql, Params::Positional(binds))?;
        let count: i64 = match rows.first() {
            Some(row) => row.first()?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    pub fn exists(&self, ctx: &mut PersistenceContext<'_>, args: &[Arg]) -> RepoResult<bool> {
        self.expect_action(&[Action::Find, Action::Exists])?;
        let (where_sql, binds) = self.where_clause(args)?;
        let sql = format!("SELECT 1 FROM {}{where_sql} LIMIT 1", E::TABLE);
        let rows = ctx.query_rows(&sql, Params::Positional(binds))?;
        Ok(!rows.is_empty())
    }

    /// Loads every match and removes it through the context, so removals
    /// are flushed like any other state change. Returns the match count.
    pub fn delete(&self, ctx: &mut PersistenceContext<'_>, args: &[Arg]) -> RepoResult<usize> {
        self.expect_action(&[Action::Delete])?;
        let (where_sql, binds) = self.where_clause(args)?;
        let sql = format!("{}{}", self.select_sql(), where_sql);
        let rows = ctx.query_rows(&sql, Params::Positional(binds))?;
        let handles = ctx.attach_rows::<E>(&rows, "", false)?;
        for handle in &handles {
            ctx.remove(*handle)?;
        }
        Ok(handles.len())
    }

    /// Up to `size` rows from the start of the requested page, never past
    /// the method's result limit.
    fn window(
        &self,
        ctx: &mut PersistenceContext<'_>,
        args: &[Arg],
        request: &PageRequest,
        size: u64,
    ) -> RepoResult<Vec<Row>> {
        let size = self.capped_window(request, size);
        if size == 0 {
            return Ok(Vec::new());
        }
        let (limit, offset) = request.sql_bounds(size)?;
        let (where_sql, binds) = self.where_clause(args)?;
        let sql = format!(
            "{}{}{} LIMIT {limit} OFFSET {offset}",
            self.select_sql(),
            where_sql,
            self.order_clause(request.sort())?,
        );
        ctx.query_rows(&sql, Params::Positional(binds))
    }

    fn capped_window(&self, request: &PageRequest, size: u64) -> u64 {
        match self.limit {
            Some(limit) => size.min(limit.saturating_sub(request.offset())),
            None => size,
        }
    }

    fn select_sql(&self) -> String {
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        format!(
            "SELECT {distinct}{} FROM {}",
            select_list::<E>(None, ""),
            E::TABLE
        )
    }

    fn where_clause(&self, args: &[Arg]) -> RepoResult<(String, Vec<Value>)> {
        if args.len() != self.arity() {
            return Err(RepoError::malformed(
                &self.method,
                format!("expects {} argument(s), got {}", self.arity(), args.len()),
            ));
        }
        let mut binds = Vec::new();
        let clause = self.predicate.render(None, &mut args.iter(), &mut binds)?;
        let sql = clause
            .map(|clause| format!(" WHERE {clause}"))
            .unwrap_or_default();
        Ok((sql, binds))
    }

    fn order_clause(&self, extra: &Sort) -> RepoResult<String> {
        let sort = self.sort.clone().and(extra.clone());
        if sort.is_unsorted() {
            return Ok(String::new());
        }
        Ok(format!(" ORDER BY {}", sort.to_sql::<E>(None)?))
    }

    fn expect_action(&self, allowed: &[Action]) -> RepoResult<()> {
        if allowed.contains(&self.action) {
            return Ok(());
        }
        Err(RepoError::InvalidArgument(format!(
            "`{}` is a {:?} query",
            self.method, self.action
        )))
    }
}

fn parse_subject(method: &str, subject: &str) -> RepoResult<(bool, Option<u64>)> {
    let distinct = subject.contains("Distinct");
    let limit = match SUBJECT_LIMIT_RE.captures(subject) {
        Some(captures) => {
            let digits = &captures[1];
            let limit = if digits.is_empty() {
                1
            } else {
                digits
                    .parse::<u64>()
                    .map_err(|err| RepoError::malformed(method, err.to_string()))?
            };
            if limit == 0 {
                return Err(RepoError::malformed(method, "result limit must be positive"));
            }
            Some(limit)
        }
        None => None,
    };
    Ok((distinct, limit))
}

fn parse_criteria<E: Entity>(method: &str, text: &str) -> RepoResult<Vec<Criterion>> {
    let mut criteria = Vec::new();
    let mut rest = text;
    if rest.is_empty() {
        return Ok(criteria);
    }

    loop {
        let (property, after) = match_property::<E>(rest).ok_or_else(|| {
            RepoError::malformed(
                method,
                format!("no property of {} matches `{rest}`", E::NAME),
            )
        })?;
        let (operator, after) = match_operator(after).ok_or_else(|| {
            RepoError::malformed(
                method,
                format!("unknown operator `{after}` for `{}`", property.name),
            )
        })?;
        criteria.push(Criterion { property, operator });

        if after.is_empty() {
            return Ok(criteria);
        }
        if let Some(next) = after.strip_prefix("And") {
            if next.is_empty() {
                return Err(RepoError::malformed(method, "dangling `And`"));
            }
            rest = next;
            continue;
        }
        if after.starts_with("Or") {
            return Err(RepoError::malformed(
                method,
                "`Or` predicates are not supported",
            ));
        }
        return Err(RepoError::malformed(method, format!("unexpected `{after}`")));
    }
}

fn parse_order<E: Entity>(method: &str, text: &str) -> RepoResult<Sort> {
    if text.is_empty() {
        return Err(RepoError::malformed(method, "`OrderBy` without a property"));
    }
    let mut orders = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let (property, after) = match_property::<E>(rest).ok_or_else(|| {
            RepoError::malformed(
                method,
                format!("no property of {} matches `{rest}`", E::NAME),
            )
        })?;
        let (direction, after) = if let Some(after) = after.strip_prefix("Desc") {
            (Direction::Desc, after)
        } else if let Some(after) = after.strip_prefix("Asc") {
            (Direction::Asc, after)
        } else {
            (Direction::Asc, after)
        };
        orders.push(Order {
            property: property.name.to_string(),
            direction,
        });
        rest = after;
    }
    Ok(Sort::from_orders(orders))
}

/// Longest property whose capitalized name prefixes `text`.
fn match_property<E: Entity>(text: &str) -> Option<(&'static Property, &str)> {
    E::properties()
        .iter()
        .filter(|property| starts_with_property(text, property.name))
        .max_by_key(|property| property.name.len())
        .map(|property| (property, &text[property.name.len()..]))
}

fn starts_with_property(text: &str, name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let mut capitalized = first.to_uppercase().to_string();
    capitalized.push_str(chars.as_str());
    text.starts_with(&capitalized)
}

/// Operator at the head of `text`, followed by a criterion boundary.
fn match_operator(text: &str) -> Option<(Operator, &str)> {
    let text = text.strip_prefix("Is").unwrap_or(text);
    let keyword = OPERATOR_KEYWORDS
        .iter()
        .filter(|(keyword, _)| text.starts_with(keyword) && at_boundary(&text[keyword.len()..]))
        .max_by_key(|(keyword, _)| keyword.len());
    match keyword {
        Some((keyword, operator)) => Some((*operator, &text[keyword.len()..])),
        None if at_boundary(text) => Some((Operator::Equals, text)),
        None => None,
    }
}

fn at_boundary(rest: &str) -> bool {
    rest.is_empty() || rest.starts_with("And") || rest.starts_with("Or")
}
