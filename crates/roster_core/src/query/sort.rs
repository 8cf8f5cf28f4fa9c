//! Sort orders over entity properties.

use crate::model::entity::{find_property, Entity};
use crate::repo::{RepoError, RepoResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One ordering term, by property name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Desc,
        }
    }
}

/// Ordered list of sort terms. Empty means store-defined order, which is not
/// stable across calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    /// Sorts by every property in `properties` with the same direction.
    pub fn by(direction: Direction, properties: &[&str]) -> Self {
        Self {
            orders: properties
                .iter()
                .map(|property| Order {
                    property: (*property).to_string(),
                    direction,
                })
                .collect(),
        }
    }

    pub fn from_orders(orders: Vec<Order>) -> Self {
        Self { orders }
    }

    /// Appends `other`'s terms after this sort's terms.
    pub fn and(mut self, other: Sort) -> Self {
        self.orders.extend(other.orders);
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }

    /// Renders `col DIR, ...` for `E`, optionally qualified by `alias`.
    pub(crate) fn to_sql<E: Entity>(&self, alias: Option<&str>) -> RepoResult<String> {
        let mut terms = Vec::with_capacity(self.orders.len());
        for order in &self.orders {
            let property = find_property::<E>(&order.property).ok_or_else(|| {
                RepoError::malformed(
                    format!("sort {}", order.property),
                    format!("{} has no property `{}`", E::NAME, order.property),
                )
            })?;
            let column = match alias {
                Some(alias) => format!("{alias}.{}", property.column),
                None => property.column.to_string(),
            };
            terms.push(format!("{column} {}", order.direction.sql()));
        }
        Ok(terms.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::{Direction, Order, Sort};
    use crate::model::member::Member;

    #[test]
    fn renders_columns_for_properties() {
        let sort = Sort::by(Direction::Desc, &["username"]).and(Sort::from_orders(vec![
            Order::asc("createdDate"),
        ]));
        assert_eq!(
            sort.to_sql::<Member>(Some("m")).unwrap(),
            "m.username DESC, m.created_date ASC"
        );
    }

    #[test]
    fn unknown_property_is_malformed() {
        let err = Sort::by(Direction::Asc, &["nickname"])
            .to_sql::<Member>(None)
            .unwrap_err();
        assert!(err.to_string().contains("no property `nickname`"));
    }
}
