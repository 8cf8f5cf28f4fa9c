//! Predicate tree and call-time argument binding.
//!
//! # Invariants
//! - A predicate is a conjunction; there is no OR node.
//! - Arguments bind positionally, `Operator::arity` values per criterion.

use crate::model::entity::Property;
use crate::repo::{RepoError, RepoResult};
use rusqlite::types::Value;

/// One call-time argument. `List` feeds `In`/`NotIn` criteria and
/// collection placeholders of explicit queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    List(Vec<Value>),
}

impl Arg {
    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    pub fn null() -> Self {
        Self::Value(Value::Null)
    }
}

macro_rules! arg_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Self::Value(Value::from(value))
                }
            }
        )*
    };
}

arg_from_scalar!(i32, i64, u32, bool, f64, String);

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Value(Value::Text(value.to_string()))
    }
}

impl From<Option<i64>> for Arg {
    fn from(value: Option<i64>) -> Self {
        Self::Value(value.map_or(Value::Null, Value::Integer))
    }
}

impl From<Vec<&str>> for Arg {
    fn from(values: Vec<&str>) -> Self {
        Self::list(values.into_iter().map(str::to_string))
    }
}

impl From<Vec<String>> for Arg {
    fn from(values: Vec<String>) -> Self {
        Self::list(values)
    }
}

impl From<Vec<i64>> for Arg {
    fn from(values: Vec<i64>) -> Self {
        Self::list(values)
    }
}

/// Comparison applied to one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Between,
    Like,
    NotLike,
    StartingWith,
    EndingWith,
    Containing,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    True,
    False,
}

impl Operator {
    /// Number of positional arguments consumed.
    pub fn arity(self) -> usize {
        match self {
            Self::IsNull | Self::IsNotNull | Self::True | Self::False => 0,
            Self::Between => 2,
            _ => 1,
        }
    }
}

/// `property operator ?`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Criterion {
    pub property: &'static Property,
    pub operator: Operator,
}

/// Conjunctive predicate tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Matches every row.
    Always,
    Compare(Criterion),
    And(Vec<Predicate>),
}

impl Predicate {
    /// Builds the conjunction of `criteria`, collapsing trivial cases.
    pub fn all(criteria: Vec<Criterion>) -> Self {
        match criteria.len() {
            0 => Self::Always,
            1 => Self::Compare(criteria[0]),
            _ => Self::And(criteria.into_iter().map(Self::Compare).collect()),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::Always => 0,
            Self::Compare(criterion) => criterion.operator.arity(),
            Self::And(children) => children.iter().map(Self::arity).sum(),
        }
    }

    /// Renders the predicate as SQL, consuming `args` in order and pushing
    /// bind values for `?` placeholders. `None` means no WHERE clause.
    pub(crate) fn render(
        &self,
        alias: Option<&str>,
        args: &mut std::slice::Iter<'_, Arg>,
        binds: &mut Vec<Value>,
    ) -> RepoResult<Option<String>> {
        match self {
            Self::Always => Ok(None),
            Self::Compare(criterion) => render_criterion(criterion, alias, args, binds).map(Some),
            Self::And(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(part) = child.render(alias, args, binds)? {
                        parts.push(part);
                    }
                }
                if parts.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(parts.join(" AND ")))
                }
            }
        }
    }
}

fn render_criterion(
    criterion: &Criterion,
    alias: Option<&str>,
    args: &mut std::slice::Iter<'_, Arg>,
    binds: &mut Vec<Value>,
) -> RepoResult<String> {
    let column = match alias {
        Some(alias) => format!("{alias}.{}", criterion.property.column),
        None => criterion.property.column.to_string(),
    };
    let property = criterion.property.name;

    let sql = match criterion.operator {
        Operator::Equals => compare(&column, "=", next_scalar(property, args)?, binds),
        Operator::NotEquals => compare(&column, "<>", next_scalar(property, args)?, binds),
        Operator::GreaterThan => compare(&column, ">", next_scalar(property, args)?, binds),
        Operator::GreaterThanEqual => compare(&column, ">=", next_scalar(property, args)?, binds),
        Operator::LessThan => compare(&column, "<", next_scalar(property, args)?, binds),
        Operator::LessThanEqual => compare(&column, "<=", next_scalar(property, args)?, binds),
        Operator::Between => {
            binds.push(next_scalar(property, args)?);
            binds.push(next_scalar(property, args)?);
            format!("{column} BETWEEN ? AND ?")
        }
        Operator::Like => compare(&column, "LIKE", next_scalar(property, args)?, binds),
        Operator::NotLike => compare(&column, "NOT LIKE", next_scalar(property, args)?, binds),
        Operator::StartingWith => {
            let text = escape_like(&next_text(property, args)?);
            like_escaped(&column, format!("{text}%"), binds)
        }
        Operator::EndingWith => {
            let text = escape_like(&next_text(property, args)?);
            like_escaped(&column, format!("%{text}"), binds)
        }
        Operator::Containing => {
            let text = escape_like(&next_text(property, args)?);
            like_escaped(&column, format!("%{text}%"), binds)
        }
        Operator::In => membership(&column, "IN", next_list(property, args)?, binds),
        Operator::NotIn => membership(&column, "NOT IN", next_list(property, args)?, binds),
        Operator::IsNull => format!("{column} IS NULL"),
        Operator::IsNotNull => format!("{column} IS NOT NULL"),
        Operator::True => format!("{column} = 1"),
        Operator::False => format!("{column} = 0"),
    };
    Ok(sql)
}

fn compare(column: &str, op: &str, value: Value, binds: &mut Vec<Value>) -> String {
    binds.push(value);
    format!("{column} {op} ?")
}

/// `LIKE` with `\` as escape character; the pattern must come from
/// `escape_like` plus the operator's own wildcards.
fn like_escaped(column: &str, pattern: String, binds: &mut Vec<Value>) -> String {
    binds.push(Value::Text(pattern));
    format!("{column} LIKE ? ESCAPE '\\'")
}

/// Makes `%`, `_` and `\` match themselves inside a `LIKE` pattern.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn membership(column: &str, op: &str, values: Vec<Value>, binds: &mut Vec<Value>) -> String {
    let placeholders = vec!["?"; values.len()].join(", ");
    binds.extend(values);
    format!("{column} {op} ({placeholders})")
}

fn next_arg<'a>(property: &str, args: &mut std::slice::Iter<'a, Arg>) -> RepoResult<&'a Arg> {
    args.next().ok_or_else(|| {
        RepoError::InvalidArgument(format!("missing argument for property `{property}`"))
    })
}

fn next_scalar(property: &str, args: &mut std::slice::Iter<'_, Arg>) -> RepoResult<Value> {
    match next_arg(property, args)? {
        Arg::Value(value) => Ok(value.clone()),
        Arg::List(_) => Err(RepoError::InvalidArgument(format!(
            "property `{property}` expects a single value, got a list"
        ))),
    }
}

fn next_text(property: &str, args: &mut std::slice::Iter<'_, Arg>) -> RepoResult<String> {
    match next_scalar(property, args)? {
        Value::Text(text) => Ok(text),
        other => Err(RepoError::InvalidArgument(format!(
            "property `{property}` expects text for pattern matching, got {other:?}"
        ))),
    }
}

fn next_list(property: &str, args: &mut std::slice::Iter<'_, Arg>) -> RepoResult<Vec<Value>> {
    match next_arg(property, args)? {
        Arg::List(values) => Ok(values.clone()),
        Arg::Value(value) => Ok(vec![value.clone()]),
    }
}
