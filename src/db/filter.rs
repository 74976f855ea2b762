// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use super::schema::{DbValue, TableSchema};
use crate::errors::DbError;

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Compare {
        column: String,
        op: &'static str,
        value: DbValue,
    },
    In {
        column: String,
        values: Vec<DbValue>,
    },
    IsNull {
        column: String,
        negated: bool,
    },
}

/// Conjunctive row filter with optional ordering and limit.
///
/// ```rust
/// use apero::db::Filter;
///
/// let filter = Filter::new()
///     .eq("key", "WAVE")
///     .le("mid_obs_time", 58006.0)
///     .order_by("rowid", true);
/// assert_eq!(filter.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
    order: Vec<(String, bool)>,
    limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    fn compare(mut self, column: &str, op: &'static str, value: impl Into<DbValue>) -> Self {
        self.conditions.push(Condition::Compare {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    /// Equality; a `Null` value compares with `IS NULL`.
    pub fn eq(self, column: &str, value: impl Into<DbValue>) -> Self {
        match value.into() {
            DbValue::Null => self.is_null(column),
            value => self.compare(column, "=", value),
        }
    }

    pub fn ne(self, column: &str, value: impl Into<DbValue>) -> Self {
        self.compare(column, "!=", value)
    }

    pub fn lt(self, column: &str, value: impl Into<DbValue>) -> Self {
        self.compare(column, "<", value)
    }

    pub fn le(self, column: &str, value: impl Into<DbValue>) -> Self {
        self.compare(column, "<=", value)
    }

    pub fn gt(self, column: &str, value: impl Into<DbValue>) -> Self {
        self.compare(column, ">", value)
    }

    pub fn ge(self, column: &str, value: impl Into<DbValue>) -> Self {
        self.compare(column, ">=", value)
    }

    /// Equality applied only when `value` is present.
    pub fn eq_opt<V: Into<DbValue>>(self, column: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.eq(column, value),
            None => self,
        }
    }

    pub fn any_of<V: Into<DbValue>>(mut self, column: &str, values: Vec<V>) -> Self {
        self.conditions.push(Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::IsNull {
            column: column.to_string(),
            negated: false,
        });
        self
    }

    pub fn not_null(mut self, column: &str) -> Self {
        self.conditions.push(Condition::IsNull {
            column: column.to_string(),
            negated: true,
        });
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// `WHERE` clause with anonymous placeholders and its bound parameters,
    /// columns checked against `schema`.
    pub(crate) fn where_clause(
        &self,
        schema: &TableSchema,
    ) -> Result<(String, Vec<DbValue>), DbError> {
        let mut clauses = Vec::with_capacity(self.conditions.len());
        let mut params = Vec::new();

        for condition in &self.conditions {
            match condition {
                Condition::Compare { column, op, value } => {
                    schema.check_column(column)?;
                    params.push(value.clone());
                    clauses.push(format!("{column} {op} ?"));
                }
                Condition::In { column, values } if values.is_empty() => {
                    schema.check_column(column)?;
                    clauses.push("0".to_string());
                }
                Condition::In { column, values } => {
                    schema.check_column(column)?;
                    params.extend(values.iter().cloned());
                    let slots = vec!["?"; values.len()];
                    clauses.push(format!("{column} IN ({})", slots.join(", ")));
                }
                Condition::IsNull { column, negated } => {
                    schema.check_column(column)?;
                    let not = if *negated { " NOT" } else { "" };
                    clauses.push(format!("{column} IS{not} NULL"));
                }
            }
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        Ok((sql, params))
    }

    /// `ORDER BY` and `LIMIT` suffix.
    pub(crate) fn tail_clause(&self, schema: &TableSchema) -> Result<String, DbError> {
        let mut sql = String::new();
        if !self.order.is_empty() {
            let mut terms = Vec::with_capacity(self.order.len());
            for (column, ascending) in &self.order {
                schema.check_column(column)?;
                terms.push(format!("{column} {}", if *ascending { "ASC" } else { "DESC" }));
            }
            sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        Ok(sql)
    }
}
