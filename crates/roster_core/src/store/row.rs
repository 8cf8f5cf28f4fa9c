//! Detached result rows and value conversion.

use crate::db::{StoreError, StoreResult};
use rusqlite::types::Value;
use std::rc::Rc;

/// One result row, detached from the driver cursor.
///
/// Column names are shared between all rows of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Rc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Rc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the raw cell for `column`, matched case-insensitively.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .and_then(|index| self.values.get(index))
    }

    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Decodes the cell named `column`.
    pub fn get<T: FromValue>(&self, column: &str) -> StoreResult<T> {
        let value = self
            .value(column)
            .ok_or_else(|| StoreError::Decode(format!("missing column `{column}`")))?;
        T::from_value(value)
            .map_err(|reason| StoreError::Decode(format!("column `{column}`: {reason}")))
    }

    /// Decodes the cell named `{prefix}{column}`, used by join projections.
    pub fn get_prefixed<T: FromValue>(&self, prefix: &str, column: &str) -> StoreResult<T> {
        if prefix.is_empty() {
            return self.get(column);
        }
        self.get(&format!("{prefix}{column}"))
    }

    /// Decodes the first cell, used by scalar projections.
    pub fn first<T: FromValue>(&self) -> StoreResult<T> {
        let value = self
            .value_at(0)
            .ok_or_else(|| StoreError::Decode("empty row".to_string()))?;
        T::from_value(value).map_err(StoreError::Decode)
    }
}

/// Conversion from one stored cell.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, String>;
}

/// Conversion from a whole row, used for DTO projections.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> StoreResult<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Integer(number) => Ok(*number),
            other => Err(format!("expected integer, got {}", type_name(other))),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| format!("integer {wide} out of i32 range"))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let wide = i64::from_value(value)?;
        u64::try_from(wide).map_err(|_| format!("integer {wide} is negative"))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, String> {
        match i64::from_value(value)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(format!("invalid boolean value {other}")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Real(number) => Ok(*number),
            Value::Integer(number) => Ok(*number as f64),
            other => Err(format!("expected real, got {}", type_name(other))),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Text(text) => Ok(text.clone()),
            other => Err(format!("expected text, got {}", type_name(other))),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}
