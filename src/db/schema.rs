// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Table schemas, semantic column types and the values stored in them.

use chrono::{DateTime, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::DbError;

pub const CREATED_AT: &str = "created_at";
pub const PRODUCER_PID: &str = "producer_pid";
pub const ROWID: &str = "rowid";

/// Semantic type of a column, enforced on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Int,
    Float,
    Bool,
    IsoDatetime,
    Mjd,
    Path,
}

impl ColumnType {
    fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Int | ColumnType::Bool => "INTEGER",
            ColumnType::Float | ColumnType::Mjd => "REAL",
            ColumnType::String | ColumnType::IsoDatetime | ColumnType::Path => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::IsoDatetime => "iso-datetime",
            ColumnType::Mjd => "mjd",
            ColumnType::Path => "path",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub ctype: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub const fn required(name: &'static str, ctype: ColumnType) -> Self {
        Self {
            name,
            ctype,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, ctype: ColumnType) -> Self {
        Self {
            name,
            ctype,
            nullable: true,
        }
    }
}

/// Declared shape of a table. The audit columns are appended by [`TableSchema::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: Vec<Column>,
    pub primary_key: Vec<&'static str>,
    pub indexes: Vec<Vec<&'static str>>,
}

impl TableSchema {
    pub fn new(name: &'static str, mut columns: Vec<Column>) -> Self {
        columns.push(Column::required(CREATED_AT, ColumnType::IsoDatetime));
        columns.push(Column::required(PRODUCER_PID, ColumnType::Int));
        Self {
            name,
            columns,
            primary_key: vec![],
            indexes: vec![],
        }
    }

    pub fn with_primary_key(mut self, columns: &[&'static str]) -> Self {
        self.primary_key = columns.to_vec();
        self
    }

    pub fn with_index(mut self, columns: &[&'static str]) -> Self {
        self.indexes.push(columns.to_vec());
        self
    }

    pub fn column(&self, name: &str) -> Result<&Column, DbError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| DbError::UnknownColumn {
                table: self.name.to_string(),
                column: name.to_string(),
            })
    }

    /// `rowid` is accepted wherever a column name is.
    pub fn check_column(&self, name: &str) -> Result<(), DbError> {
        if name == ROWID {
            return Ok(());
        }
        self.column(name).map(|_| ())
    }

    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let null = if c.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", c.name, c.ctype.sql_type(), null)
            })
            .collect();
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        }

        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);\n",
            self.name,
            parts.join(",\n    ")
        );
        for columns in &self.indexes {
            sql.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({});\n",
                self.name,
                columns.join("_"),
                self.name,
                columns.join(", ")
            ));
        }
        sql
    }

    /// Type-check `value` for `column`, widening ints stored in float columns.
    pub fn validate(&self, column: &str, value: DbValue) -> Result<DbValue, DbError> {
        let declared = self.column(column)?;
        let violation = |value: &DbValue| DbError::SchemaViolation {
            table: self.name.to_string(),
            column: column.to_string(),
            expected: declared.ctype.to_string(),
            value: value.to_string(),
        };

        match (declared.ctype, value) {
            (_, DbValue::Null) if declared.nullable => Ok(DbValue::Null),
            (ColumnType::Int, v @ DbValue::Int(_)) => Ok(v),
            (ColumnType::Bool, v @ DbValue::Bool(_)) => Ok(v),
            (ColumnType::Float | ColumnType::Mjd, DbValue::Int(v)) => Ok(DbValue::Float(v as f64)),
            (ColumnType::Float, v @ DbValue::Float(_)) => Ok(v),
            (ColumnType::Mjd, DbValue::Float(v)) if v.is_finite() && v >= 0.0 => {
                Ok(DbValue::Float(v))
            }
            (ColumnType::String | ColumnType::Path, v @ DbValue::Text(_)) => Ok(v),
            (ColumnType::IsoDatetime, DbValue::Text(text)) if is_iso_datetime(&text) => {
                Ok(DbValue::Text(text))
            }
            (_, other) => Err(violation(&other)),
        }
    }

    /// Convert a stored SQL value back to its semantic value.
    pub(crate) fn decode(&self, column: &str, raw: ValueRef<'_>) -> Result<DbValue, DbError> {
        let ctype = if column == ROWID {
            ColumnType::Int
        } else {
            self.column(column)?.ctype
        };
        let corrupt = |message: &str| DbError::Corrupt {
            table: self.name.to_string(),
            column: column.to_string(),
            message: message.to_string(),
        };

        Ok(match (ctype, raw) {
            (_, ValueRef::Null) => DbValue::Null,
            (ColumnType::Bool, ValueRef::Integer(v)) => DbValue::Bool(v != 0),
            (_, ValueRef::Integer(v)) => DbValue::Int(v),
            (_, ValueRef::Real(v)) => DbValue::Float(v),
            (_, ValueRef::Text(bytes)) => DbValue::Text(
                std::str::from_utf8(bytes)
                    .map_err(|_| corrupt("text is not UTF-8"))?
                    .to_string(),
            ),
            (_, ValueRef::Blob(_)) => return Err(corrupt("unexpected blob")),
        })
    }
}

fn is_iso_datetime(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

/// A value stored in a typed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DbValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl DbValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DbValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DbValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DbValue::Int(v) => Some(*v as f64),
            DbValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DbValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbValue::Null => f.write_str("NULL"),
            DbValue::Bool(v) => write!(f, "{v}"),
            DbValue::Int(v) => write!(f, "{v}"),
            DbValue::Float(v) => write!(f, "{v}"),
            DbValue::Text(v) => f.write_str(v),
        }
    }
}

impl ToSql for DbValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DbValue::Null => ToSqlOutput::Owned(Value::Null),
            DbValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            DbValue::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            DbValue::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            DbValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Bool(v)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Int(v)
    }
}

impl From<u32> for DbValue {
    fn from(v: u32) -> Self {
        DbValue::Int(i64::from(v))
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Float(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(DbValue::Null, Into::into)
    }
}

/// One row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row(pub BTreeMap<String, DbValue>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<DbValue>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<DbValue>) {
        self.0.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> &DbValue {
        self.0.get(column).unwrap_or(&DbValue::Null)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &DbValue)> {
        self.0.iter()
    }

    pub fn rowid(&self) -> Option<i64> {
        self.get(ROWID).as_i64()
    }

    /// Required text column; `table` names the source in the error.
    pub fn text(&self, table: &str, column: &str) -> Result<String, DbError> {
        self.get(column)
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| missing(table, column))
    }

    pub fn opt_text(&self, column: &str) -> Option<String> {
        self.get(column).as_str().map(str::to_string)
    }

    pub fn float(&self, table: &str, column: &str) -> Result<f64, DbError> {
        self.get(column).as_f64().ok_or_else(|| missing(table, column))
    }

    pub fn int(&self, table: &str, column: &str) -> Result<i64, DbError> {
        self.get(column).as_i64().ok_or_else(|| missing(table, column))
    }

    pub fn boolean(&self, table: &str, column: &str) -> Result<bool, DbError> {
        self.get(column).as_bool().ok_or_else(|| missing(table, column))
    }
}

fn missing(table: &str, column: &str) -> DbError {
    DbError::MissingColumn {
        table: table.to_string(),
        column: column.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(
            "calib",
            vec![
                Column::required("key", ColumnType::String),
                Column::optional("fiber", ColumnType::String),
                Column::required("mid_obs_time", ColumnType::Mjd),
                Column::required("used_flag", ColumnType::Bool),
            ],
        )
        .with_index(&["key", "fiber"])
    }

    #[test]
    fn test_audit_columns_are_appended() {
        let schema = schema();
        assert!(schema.column(CREATED_AT).is_ok());
        assert!(schema.column(PRODUCER_PID).is_ok());
        assert!(schema.check_column(ROWID).is_ok());
    }

    #[test]
    fn test_validate_enforces_semantic_types() {
        let schema = schema();
        assert_eq!(
            schema.validate("mid_obs_time", DbValue::Int(58000)).unwrap(),
            DbValue::Float(58000.0)
        );
        assert!(matches!(
            schema.validate("mid_obs_time", DbValue::Float(-1.0)),
            Err(DbError::SchemaViolation { .. })
        ));
        assert!(matches!(
            schema.validate("used_flag", DbValue::Text("yes".into())),
            Err(DbError::SchemaViolation { .. })
        ));
        assert!(matches!(
            schema.validate("key", DbValue::Null),
            Err(DbError::SchemaViolation { .. })
        ));
        assert_eq!(schema.validate("fiber", DbValue::Null).unwrap(), DbValue::Null);
        assert!(schema
            .validate(CREATED_AT, DbValue::Text("2021-07-01T12:00:00+00:00".into()))
            .is_ok());
        assert!(schema
            .validate(CREATED_AT, DbValue::Text("yesterday".into()))
            .is_err());
        assert!(matches!(
            schema.validate("nope", DbValue::Int(1)),
            Err(DbError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_create_sql_declares_nullability_and_indexes() {
        let sql = schema().create_sql();
        assert!(sql.contains("key TEXT NOT NULL"));
        assert!(sql.contains("fiber TEXT,") || sql.contains("fiber TEXT\n"));
        assert!(sql.contains("used_flag INTEGER NOT NULL"));
        assert!(sql.contains("CREATE INDEX IF NOT EXISTS idx_calib_key_fiber ON calib (key, fiber);"));
    }
}
