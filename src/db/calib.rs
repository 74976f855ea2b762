// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::filter::Filter;
use super::schema::{Column, ColumnType, DbValue, Row, TableSchema};
use super::table::{RetryPolicy, Table};
use crate::errors::DbError;
use crate::files::FileKind;
use crate::lock::LockManager;

/// One calibration (or telluric) product registered for lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibEntry {
    pub key: String,
    pub fiber: Option<String>,
    pub night: String,
    pub filename: String,
    pub file_path: PathBuf,
    pub mid_obs_time: f64,
    /// False for products that failed quality control.
    pub used_flag: bool,
    /// Reference calibrations qualify for any query time.
    pub super_flag: bool,
    /// Object a telluric product belongs to.
    pub objname: Option<String>,
    pub pid: Option<String>,
}

/// A stored entry plus its insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibRow {
    pub rowid: i64,
    pub entry: CalibEntry,
}

/// calibDB or telluDB. Rows are only inserted, except by a commit taking
/// back its own rows.
#[derive(Debug, Clone)]
pub struct CalibDb {
    kind: FileKind,
    table: Table,
}

impl CalibDb {
    pub fn schema(kind: FileKind) -> TableSchema {
        let name = match kind {
            FileKind::Telluric => "tellu",
            _ => "calib",
        };
        let mut columns = vec![
            Column::required("key", ColumnType::String),
            Column::optional("fiber", ColumnType::String),
            Column::required("night", ColumnType::String),
            Column::required("filename", ColumnType::String),
            Column::required("file_path", ColumnType::Path),
            Column::required("mid_obs_time", ColumnType::Mjd),
            Column::required("used_flag", ColumnType::Bool),
            Column::required("super_flag", ColumnType::Bool),
            Column::optional("pid", ColumnType::String),
        ];
        if kind == FileKind::Telluric {
            columns.push(Column::optional("objname", ColumnType::String));
        }
        TableSchema::new(name, columns).with_index(&["key", "fiber"])
    }

    pub fn open(
        kind: FileKind,
        path: impl Into<PathBuf>,
        locks: LockManager,
        retry: RetryPolicy,
    ) -> Result<Self, DbError> {
        let table = Table::open(Self::schema(kind), path, locks, retry)?;
        Ok(Self { kind, table })
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn add(&self, entry: &CalibEntry) -> Result<i64, DbError> {
        let mut row = Row::new()
            .with("key", entry.key.as_str())
            .with("fiber", entry.fiber.as_deref())
            .with("night", entry.night.as_str())
            .with("filename", entry.filename.as_str())
            .with("file_path", entry.file_path.display().to_string())
            .with("mid_obs_time", entry.mid_obs_time)
            .with("used_flag", entry.used_flag)
            .with("super_flag", entry.super_flag)
            .with("pid", entry.pid.as_deref());
        if self.kind == FileKind::Telluric {
            row.set("objname", entry.objname.as_deref());
        }
        self.table.add(row)
    }

    /// Drop one row; undoes an `add` of a commit that failed later.
    pub fn remove(&self, rowid: i64) -> Result<usize, DbError> {
        self.table.delete(&Filter::new().eq("rowid", rowid))
    }

    /// Rows for `(key, fiber)` in insertion order. `None` matches fiber-less rows.
    pub fn rows(
        &self,
        key: &str,
        fiber: Option<&str>,
        objname: Option<&str>,
        include_unused: bool,
    ) -> Result<Vec<CalibRow>, DbError> {
        let mut filter = Filter::new().eq("key", key).eq("fiber", fiber);
        if !include_unused {
            filter = filter.eq("used_flag", true);
        }
        if self.kind == FileKind::Telluric {
            filter = filter.eq_opt("objname", objname);
        }
        self.query(&filter.order_by("rowid", true))
    }

    pub fn query(&self, filter: &Filter) -> Result<Vec<CalibRow>, DbError> {
        self.table
            .get(filter)?
            .iter()
            .map(|row| self.decode(row))
            .collect()
    }

    pub fn count(&self, filter: &Filter) -> Result<usize, DbError> {
        self.table.count(filter)
    }

    pub fn keys(&self) -> Result<Vec<String>, DbError> {
        Ok(self
            .table
            .unique_values("key", &Filter::new())?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    pub fn clear(&self) -> Result<usize, DbError> {
        self.table.clear()
    }

    fn decode(&self, row: &Row) -> Result<CalibRow, DbError> {
        let table = self.table.name();
        Ok(CalibRow {
            rowid: row.int(table, "rowid")?,
            entry: CalibEntry {
                key: row.text(table, "key")?,
                fiber: row.opt_text("fiber"),
                night: row.text(table, "night")?,
                filename: row.text(table, "filename")?,
                file_path: PathBuf::from(row.text(table, "file_path")?),
                mid_obs_time: row.float(table, "mid_obs_time")?,
                used_flag: row.boolean(table, "used_flag")?,
                super_flag: row.boolean(table, "super_flag")?,
                objname: match row.get("objname") {
                    DbValue::Text(name) => Some(name.clone()),
                    _ => None,
                },
                pid: row.opt_text("pid"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockOptions;
    use tempfile::TempDir;

    fn open(dir: &TempDir, kind: FileKind) -> CalibDb {
        let locks = LockManager::new(dir.path().join("locks"), LockOptions::default());
        CalibDb::open(kind, dir.path().join("db/calib.sqlite"), locks, RetryPolicy::default())
            .unwrap()
    }

    fn entry(key: &str, fiber: Option<&str>, time: f64) -> CalibEntry {
        CalibEntry {
            key: key.to_string(),
            fiber: fiber.map(str::to_string),
            night: "2021-07-01".to_string(),
            filename: format!("{key}_{time}.fits"),
            file_path: PathBuf::from(format!("/calib/{key}_{time}.fits")),
            mid_obs_time: time,
            used_flag: true,
            super_flag: false,
            objname: None,
            pid: Some("PID-1".to_string()),
        }
    }

    #[test]
    fn test_rows_filter_by_key_fiber_and_used_flag() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, FileKind::Calibration);

        db.add(&entry("WAVE", Some("AB"), 58000.0)).unwrap();
        db.add(&entry("WAVE", Some("C"), 58001.0)).unwrap();
        let mut rejected = entry("WAVE", Some("AB"), 58002.0);
        rejected.used_flag = false;
        db.add(&rejected).unwrap();
        db.add(&entry("BADPIX", None, 58000.0)).unwrap();

        let rows = db.rows("WAVE", Some("AB"), None, false).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry, entry("WAVE", Some("AB"), 58000.0));

        assert_eq!(db.rows("WAVE", Some("AB"), None, true).unwrap().len(), 2);
        assert_eq!(db.rows("BADPIX", None, None, false).unwrap().len(), 1);
        assert_eq!(db.keys().unwrap(), vec!["BADPIX".to_string(), "WAVE".to_string()]);
    }

    #[test]
    fn test_rows_keep_insertion_order() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, FileKind::Calibration);
        for time in [58010.0, 58000.0, 58005.0] {
            db.add(&entry("DARK", Some("AB"), time)).unwrap();
        }
        let times: Vec<f64> = db
            .rows("DARK", Some("AB"), None, false)
            .unwrap()
            .iter()
            .map(|r| r.entry.mid_obs_time)
            .collect();
        assert_eq!(times, vec![58010.0, 58000.0, 58005.0]);
    }

    #[test]
    fn test_tellu_rows_carry_the_object() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir, FileKind::Telluric);
        let mut trans = entry("TELLU_TRANS", Some("AB"), 58000.0);
        trans.objname = Some("HD1234".into());
        db.add(&trans).unwrap();
        db.add(&entry("TELLU_TRANS", Some("AB"), 58001.0)).unwrap();

        let rows = db.rows("TELLU_TRANS", Some("AB"), Some("HD1234"), false).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.objname.as_deref(), Some("HD1234"));
        assert_eq!(db.rows("TELLU_TRANS", Some("AB"), None, false).unwrap().len(), 2);
    }
}
