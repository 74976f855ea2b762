// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::{SecondsFormat, Utc};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::filter::Filter;
use super::schema::{DbValue, Row, TableSchema, CREATED_AT, PRODUCER_PID, ROWID};
use crate::config::consts::{
    DEFAULT_DB_BUSY_TIMEOUT_MS, DEFAULT_DB_RETRY_ATTEMPTS, DEFAULT_DB_RETRY_INITIAL_MS,
    DEFAULT_DB_RETRY_MAX_MS,
};
use crate::errors::DbError;
use crate::lock::{process, LockGuard, LockManager};
use crate::observability::messages::db::{RowsWritten, StatementRetrying, TableCleared, TableOpened};
use crate::observability::messages::StructuredLog;

/// Bounded exponential backoff for busy or locked databases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// SQLite `busy_timeout` of every connection.
    pub busy_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_DB_RETRY_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_DB_RETRY_INITIAL_MS),
            max_backoff: Duration::from_millis(DEFAULT_DB_RETRY_MAX_MS),
            busy_timeout: Duration::from_millis(DEFAULT_DB_BUSY_TIMEOUT_MS),
        }
    }
}

/// Current UTC time as stored in `iso-datetime` columns.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A typed table in its own SQLite file.
///
/// Every call opens a short-lived connection. Writes hold the cross-process
/// lock `db_<table>`; reads take no lock.
#[derive(Clone)]
pub struct Table {
    schema: Arc<TableSchema>,
    path: PathBuf,
    locks: LockManager,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.schema.name)
            .field("path", &self.path)
            .finish()
    }
}

impl Table {
    pub fn open(
        schema: TableSchema,
        path: impl Into<PathBuf>,
        locks: LockManager,
        retry: RetryPolicy,
    ) -> Result<Self, DbError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| DbError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let table = Self {
            schema: Arc::new(schema),
            path,
            locks,
            retry,
        };

        let _guard = table.write_lock()?;
        let ddl = table.schema.create_sql();
        table.with_retry(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.execute_batch(&ddl)
        })?;

        TableOpened {
            table: table.name(),
            path: &table.path,
            columns: table.schema.columns.len(),
        }
        .log();
        Ok(table)
    }

    pub fn name(&self) -> &'static str {
        self.schema.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_name(&self) -> String {
        format!("db_{}", self.schema.name)
    }

    /// Hold the table's write lock; reentrant for the calling thread.
    pub fn write_lock(&self) -> Result<LockGuard, DbError> {
        Ok(self.locks.lock(&self.lock_name())?)
    }

    pub fn get(&self, filter: &Filter) -> Result<Vec<Row>, DbError> {
        let names: Vec<&str> = std::iter::once(ROWID)
            .chain(self.schema.columns.iter().map(|c| c.name))
            .collect();
        let (where_sql, params) = filter.where_clause(&self.schema)?;
        let sql = format!(
            "SELECT {} FROM {}{}{}",
            names.join(", "),
            self.schema.name,
            where_sql,
            filter.tail_clause(&self.schema)?
        );

        let raw_rows: Vec<Vec<Value>> = self.with_retry(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
                (0..names.len())
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })?;
            rows.collect()
        })?;

        raw_rows
            .into_iter()
            .map(|values| {
                let mut row = Row::new();
                for (name, value) in names.iter().zip(values.iter()) {
                    row.set(name, self.schema.decode(name, ValueRef::from(value))?);
                }
                Ok(row)
            })
            .collect()
    }

    /// First row matching `filter`, if any.
    pub fn get_one(&self, filter: &Filter) -> Result<Option<Row>, DbError> {
        Ok(self.get(&filter.clone().limit(1))?.into_iter().next())
    }

    /// Insert a row and return its rowid.
    pub fn add(&self, row: Row) -> Result<i64, DbError> {
        let row = self.prepare_row(row)?;
        let (columns, values): (Vec<&String>, Vec<&DbValue>) = row.columns().unzip();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.schema.name,
            join(&columns),
            vec!["?"; values.len()].join(", ")
        );

        let _guard = self.write_lock()?;
        let rowid = self.with_retry(|conn| {
            conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(conn.last_insert_rowid())
        })?;
        self.written("add", 1);
        Ok(rowid)
    }

    /// Insert or replace the row with the same primary key.
    pub fn upsert(&self, row: Row) -> Result<(), DbError> {
        let row = self.prepare_row(row)?;
        let (columns, values): (Vec<&String>, Vec<&DbValue>) = row.columns().unzip();
        let key = &self.schema.primary_key;
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !key.iter().any(|k| *k == c.as_str()))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            self.schema.name,
            join(&columns),
            vec!["?"; values.len()].join(", "),
            key.join(", "),
            updates.join(", ")
        );

        let _guard = self.write_lock()?;
        self.with_retry(|conn| conn.execute(&sql, params_from_iter(values.iter())))?;
        self.written("upsert", 1);
        Ok(())
    }

    /// Set `fields` on every row matching `filter`; returns the rows touched.
    pub fn update(&self, filter: &Filter, fields: Row) -> Result<usize, DbError> {
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (column, value) in fields.columns() {
            params.push(self.schema.validate(column, value.clone())?);
            assignments.push(format!("{column} = ?"));
        }
        if assignments.is_empty() {
            return Ok(0);
        }
        let (where_sql, where_params) = filter.where_clause(&self.schema)?;
        params.extend(where_params);
        let sql = format!(
            "UPDATE {} SET {}{}",
            self.schema.name,
            assignments.join(", "),
            where_sql
        );

        let _guard = self.write_lock()?;
        let touched = self.with_retry(|conn| conn.execute(&sql, params_from_iter(params.iter())))?;
        self.written("update", touched);
        Ok(touched)
    }

    pub fn delete(&self, filter: &Filter) -> Result<usize, DbError> {
        let (where_sql, params) = filter.where_clause(&self.schema)?;
        let sql = format!("DELETE FROM {}{}", self.schema.name, where_sql);

        let _guard = self.write_lock()?;
        let removed = self.with_retry(|conn| conn.execute(&sql, params_from_iter(params.iter())))?;
        self.written("delete", removed);
        Ok(removed)
    }

    /// Remove every row.
    pub fn clear(&self) -> Result<usize, DbError> {
        let removed = self.delete(&Filter::new())?;
        TableCleared {
            table: self.name(),
            rows: removed,
        }
        .log();
        Ok(removed)
    }

    /// Distinct values of `column` among rows matching `filter`, sorted.
    pub fn unique_values(&self, column: &str, filter: &Filter) -> Result<Vec<DbValue>, DbError> {
        self.schema.check_column(column)?;
        let (where_sql, params) = filter.where_clause(&self.schema)?;
        let sql = format!(
            "SELECT DISTINCT {column} FROM {}{} ORDER BY {column}",
            self.schema.name, where_sql
        );

        let raw: Vec<Value> = self.with_retry(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, Value>(0))?;
            rows.collect()
        })?;
        raw.iter()
            .map(|value| self.schema.decode(column, ValueRef::from(value)))
            .collect()
    }

    pub fn count(&self, filter: &Filter) -> Result<usize, DbError> {
        let (where_sql, params) = filter.where_clause(&self.schema)?;
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.schema.name, where_sql);
        let count: i64 = self.with_retry(|conn| {
            conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
        })?;
        Ok(count.max(0) as usize)
    }

    /// Validate every column, fill in the audit columns and check required ones.
    fn prepare_row(&self, mut row: Row) -> Result<Row, DbError> {
        if !row.contains(CREATED_AT) {
            row.set(CREATED_AT, now_iso());
        }
        if !row.contains(PRODUCER_PID) {
            row.set(PRODUCER_PID, process::current_pid());
        }

        let mut prepared = Row::new();
        for (column, value) in row.columns() {
            prepared.set(column, self.schema.validate(column, value.clone())?);
        }
        if let Some(missing) = self
            .schema
            .columns
            .iter()
            .find(|c| !c.nullable && !prepared.contains(c.name))
        {
            return Err(DbError::MissingColumn {
                table: self.schema.name.to_string(),
                column: missing.name.to_string(),
            });
        }
        Ok(prepared)
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.retry.busy_timeout)?;
        Ok(conn)
    }

    fn with_retry<T, F>(&self, mut op: F) -> Result<T, DbError>
    where
        F: FnMut(&Connection) -> rusqlite::Result<T>,
    {
        let mut delay = self.retry.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.connect().and_then(|conn| op(&conn)) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !is_transient(&error) {
                return Err(DbError::Sqlite {
                    table: self.schema.name.to_string(),
                    source: error,
                });
            }
            if attempt >= self.retry.attempts {
                return Err(DbError::RetriesExhausted {
                    table: self.schema.name.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            StatementRetrying {
                table: self.name(),
                attempt,
                delay,
                error: &error,
            }
            .log();
            thread::sleep(delay);
            delay = (delay * 2).min(self.retry.max_backoff);
        }
    }

    fn written(&self, operation: &str, rows: usize) {
        RowsWritten {
            table: self.name(),
            operation,
            rows,
        }
        .log();
    }
}

fn is_transient(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn join(columns: &[&String]) -> String {
    columns
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{Column, ColumnType};
    use crate::lock::LockOptions;
    use tempfile::TempDir;

    fn table(dir: &TempDir) -> Table {
        let schema = TableSchema::new(
            "files",
            vec![
                Column::required("night", ColumnType::String),
                Column::required("filename", ColumnType::String),
                Column::required("size", ColumnType::Int),
                Column::optional("mid_obs_time", ColumnType::Mjd),
            ],
        )
        .with_primary_key(&["night", "filename"]);
        let locks = LockManager::new(dir.path().join("locks"), LockOptions::default());
        Table::open(schema, dir.path().join("db/files.sqlite"), locks, RetryPolicy::default())
            .unwrap()
    }

    fn row(night: &str, filename: &str, size: i64) -> Row {
        Row::new()
            .with("night", night)
            .with("filename", filename)
            .with("size", size)
    }

    #[test]
    fn test_add_get_count() {
        let dir = TempDir::new().unwrap();
        let table = table(&dir);

        let first = table.add(row("2021-07-01", "a.fits", 10)).unwrap();
        let second = table.add(row("2021-07-01", "b.fits", 20)).unwrap();
        assert!(second > first);

        let rows = table
            .get(&Filter::new().eq("night", "2021-07-01").order_by("rowid", true))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("files", "filename").unwrap(), "a.fits");
        assert_eq!(rows[0].rowid(), Some(first));
        assert!(rows[0].get(PRODUCER_PID).as_i64().is_some());
        assert!(rows[0].get("mid_obs_time").is_null());

        assert_eq!(table.count(&Filter::new().ge("size", 15i64)).unwrap(), 1);
    }

    #[test]
    fn test_primary_key_conflicts_and_upsert() {
        let dir = TempDir::new().unwrap();
        let table = table(&dir);

        table.add(row("2021-07-01", "a.fits", 10)).unwrap();
        assert!(matches!(
            table.add(row("2021-07-01", "a.fits", 11)),
            Err(DbError::Sqlite { .. })
        ));

        table.upsert(row("2021-07-01", "a.fits", 12)).unwrap();
        table.upsert(row("2021-07-02", "a.fits", 1)).unwrap();
        assert_eq!(table.count(&Filter::new()).unwrap(), 2);
        let updated = table
            .get_one(&Filter::new().eq("night", "2021-07-01"))
            .unwrap()
            .unwrap();
        assert_eq!(updated.int("files", "size").unwrap(), 12);
    }

    #[test]
    fn test_schema_is_enforced_on_write() {
        let dir = TempDir::new().unwrap();
        let table = table(&dir);

        assert!(matches!(
            table.add(row("2021-07-01", "a.fits", 1).with("size", "big")),
            Err(DbError::SchemaViolation { .. })
        ));
        assert!(matches!(
            table.add(Row::new().with("night", "2021-07-01")),
            Err(DbError::MissingColumn { .. })
        ));
        assert!(matches!(
            table.add(row("2021-07-01", "a.fits", 1).with("bogus", 1i64)),
            Err(DbError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_update_delete_unique_values() {
        let dir = TempDir::new().unwrap();
        let table = table(&dir);
        for (night, file) in [("n1", "a"), ("n1", "b"), ("n2", "c")] {
            table.add(row(night, file, 1)).unwrap();
        }

        let touched = table
            .update(
                &Filter::new().eq("night", "n1"),
                Row::new().with("mid_obs_time", 58000.5),
            )
            .unwrap();
        assert_eq!(touched, 2);
        assert_eq!(table.count(&Filter::new().not_null("mid_obs_time")).unwrap(), 2);

        let nights = table.unique_values("night", &Filter::new()).unwrap();
        assert_eq!(nights, vec![DbValue::from("n1"), DbValue::from("n2")]);

        assert_eq!(table.delete(&Filter::new().eq("filename", "c")).unwrap(), 1);
        assert_eq!(table.clear().unwrap(), 2);
        assert_eq!(table.count(&Filter::new()).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_writers_are_serialized() {
        let dir = TempDir::new().unwrap();
        let table = table(&dir);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let table = table.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        table.add(row("n1", &format!("{t}-{i}.fits"), i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.count(&Filter::new()).unwrap(), 40);
    }
}
