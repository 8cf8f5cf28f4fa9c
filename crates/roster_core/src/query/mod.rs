//! Query layer: predicates, derived-query parsing, explicit queries, sorts.
//!
//! # Responsibility
//! - Translate declared queries into SQL plus bind values.
//! - Enforce result cardinality contracts (`QueryResult`).
//!
//! # Invariants
//! - Declared queries are validated on construction, never lazily.
//! - Entity queries always select the full column list of the entity.

pub mod derived;
pub mod explicit;
pub mod predicate;
pub mod sort;

use crate::model::entity::{id_property, writable_properties, Entity};
use crate::repo::{RepoError, RepoResult};

/// Rows returned by one query, with cardinality helpers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    query: String,
    subject: &'static str,
    rows: Vec<T>,
}

impl<T> QueryResult<T> {
    pub(crate) fn new(query: impl Into<String>, subject: &'static str, rows: Vec<T>) -> Self {
        Self {
            query: query.into(),
            subject,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows; empty when nothing matched.
    pub fn list(self) -> Vec<T> {
        self.rows
    }

    /// Zero or one row. More than one is `AmbiguousResult`.
    pub fn optional(self) -> RepoResult<Option<T>> {
        if self.rows.len() > 1 {
            return Err(RepoError::AmbiguousResult {
                query: self.query,
                found: self.rows.len(),
            });
        }
        Ok(self.rows.into_iter().next())
    }

    /// Exactly one row: `NotFound` for zero, `AmbiguousResult` for many.
    pub fn single(self) -> RepoResult<T> {
        let subject = self.subject;
        let query = self.query.clone();
        self.optional()?.ok_or(RepoError::NotFound {
            entity: subject,
            key: query,
        })
    }
}

/// `col, col, ...` for `E`, optionally qualified and aliased with `prefix`.
pub fn select_list<E: Entity>(alias: Option<&str>, prefix: &str) -> String {
    E::properties()
        .iter()
        .map(|property| {
            let column = match alias {
                Some(alias) => format!("{alias}.{}", property.column),
                None => property.column.to_string(),
            };
            if prefix.is_empty() {
                column
            } else {
                format!("{column} AS {prefix}{}", property.column)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn select_by_id_sql<E: Entity>() -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?",
        select_list::<E>(None, ""),
        E::TABLE,
        id_property::<E>().column
    )
}

pub(crate) fn insert_sql<E: Entity>() -> String {
    let columns = writable_properties::<E>()
        .map(|property| property.column)
        .collect::<Vec<_>>();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        E::TABLE,
        columns.join(", "),
        placeholders,
        id_property::<E>().column
    )
}

pub(crate) fn update_sql<E: Entity>() -> String {
    let assignments = writable_properties::<E>()
        .filter(|property| property.kind == crate::model::entity::ColumnKind::Updatable)
        .map(|property| format!("{} = ?", property.column))
        .collect::<Vec<_>>();
    format!(
        "UPDATE {} SET {} WHERE {} = ?",
        E::TABLE,
        assignments.join(", "),
        id_property::<E>().column
    )
}

pub(crate) fn delete_sql<E: Entity>() -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?",
        E::TABLE,
        id_property::<E>().column
    )
}

#[cfg(test)]
mod tests {
    use super::{insert_sql, select_list, update_sql, QueryResult};
    use crate::model::member::Member;
    use crate::model::team::Team;
    use crate::repo::RepoError;

    #[test]
    fn update_skips_insert_only_columns() {
        let sql = update_sql::<Member>();
        assert!(sql.contains("username = ?"));
        assert!(sql.contains("last_modified_by = ?"));
        assert!(!sql.contains("created_date"));
        assert!(!sql.contains("created_by"));
        assert!(sql.ends_with("WHERE member_id = ?"));
    }

    #[test]
    fn insert_returns_generated_identity() {
        assert_eq!(
            insert_sql::<Team>(),
            "INSERT INTO team (name) VALUES (?) RETURNING team_id"
        );
    }

    #[test]
    fn prefixed_select_list_aliases_every_column() {
        assert_eq!(
            select_list::<Team>(Some("t"), "team__"),
            "t.team_id AS team__team_id, t.name AS team__name"
        );
    }

    #[test]
    fn optional_rejects_multiple_rows() {
        let result = QueryResult::new("findByUsername", "Member", vec![1, 2]);
        assert!(matches!(
            result.optional(),
            Err(RepoError::AmbiguousResult { found: 2, .. })
        ));
    }

    #[test]
    fn single_requires_a_row() {
        let result: QueryResult<i32> = QueryResult::new("findByUsername", "Member", Vec::new());
        assert!(matches!(result.single(), Err(RepoError::NotFound { .. })));
    }
}
