// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::filter::Filter;
use super::schema::{Column, ColumnType, Row, TableSchema};
use super::table::{RetryPolicy, Table};
use crate::errors::DbError;
use crate::files::{BoundFile, FileKind};
use crate::lock::LockManager;
use crate::observability::messages::db::OrphansPruned;
use crate::observability::messages::StructuredLog;

const TABLE: &str = "file_index";

/// A raw or produced file known to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub night: String,
    pub filename: String,
    pub path: PathBuf,
    pub dprtype: String,
    pub output_kind: FileKind,
    pub produced_by_pid: Option<String>,
    pub timestamp: String,
    pub size: i64,
    /// File modification time, seconds since the Unix epoch.
    pub mtime: f64,
    pub objname: Option<String>,
    pub mid_obs_time: Option<f64>,
    pub fiber: Option<String>,
    pub header_subset: BTreeMap<String, serde_json::Value>,
}

impl IndexEntry {
    pub fn to_bound(&self) -> BoundFile {
        BoundFile {
            path: self.path.clone(),
            night: self.night.clone(),
            filename: self.filename.clone(),
            kind: self.output_kind,
            dprtype: self.dprtype.clone(),
            fiber: self.fiber.clone(),
            object: self.objname.clone(),
            mid_obs_time: self.mid_obs_time,
        }
    }
}

/// Optional constraints for [`IndexDb::query`].
#[derive(Debug, Clone, Default)]
pub struct IndexQuery {
    pub night: Option<String>,
    pub kind: Option<FileKind>,
    pub dprtypes: Vec<String>,
    pub objname: Option<String>,
    pub produced_by_pid: Option<String>,
}

impl IndexQuery {
    fn filter(&self) -> Filter {
        let mut filter = Filter::new()
            .eq_opt("night", self.night.as_deref())
            .eq_opt("output_kind", self.kind.map(|k| k.as_str()))
            .eq_opt("objname", self.objname.as_deref())
            .eq_opt("produced_by_pid", self.produced_by_pid.as_deref());
        if !self.dprtypes.is_empty() {
            filter = filter.any_of("dprtype", self.dprtypes.clone());
        }
        filter.order_by("night", true).order_by("filename", true)
    }
}

/// The per-night catalog keyed by `(night, filename)`.
#[derive(Debug, Clone)]
pub struct IndexDb {
    table: Table,
}

impl IndexDb {
    pub fn schema() -> TableSchema {
        TableSchema::new(
            TABLE,
            vec![
                Column::required("night", ColumnType::String),
                Column::required("filename", ColumnType::String),
                Column::required("path", ColumnType::Path),
                Column::required("dprtype", ColumnType::String),
                Column::required("output_kind", ColumnType::String),
                Column::optional("produced_by_pid", ColumnType::String),
                Column::required("timestamp", ColumnType::IsoDatetime),
                Column::required("size", ColumnType::Int),
                Column::required("mtime", ColumnType::Float),
                Column::optional("objname", ColumnType::String),
                Column::optional("mid_obs_time", ColumnType::Mjd),
                Column::optional("fiber", ColumnType::String),
                Column::required("header_subset", ColumnType::String),
            ],
        )
        .with_primary_key(&["night", "filename"])
        .with_index(&["output_kind", "dprtype"])
        .with_index(&["produced_by_pid"])
    }

    pub fn open(
        path: impl Into<PathBuf>,
        locks: LockManager,
        retry: RetryPolicy,
    ) -> Result<Self, DbError> {
        Ok(Self {
            table: Table::open(Self::schema(), path, locks, retry)?,
        })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Insert or refresh the row for `(night, filename)`.
    pub fn upsert(&self, entry: &IndexEntry) -> Result<(), DbError> {
        let header_subset =
            serde_json::to_string(&entry.header_subset).map_err(|e| DbError::Corrupt {
                table: TABLE.to_string(),
                column: "header_subset".to_string(),
                message: e.to_string(),
            })?;
        let row = Row::new()
            .with("night", entry.night.as_str())
            .with("filename", entry.filename.as_str())
            .with("path", entry.path.display().to_string())
            .with("dprtype", entry.dprtype.as_str())
            .with("output_kind", entry.output_kind.as_str())
            .with("produced_by_pid", entry.produced_by_pid.as_deref())
            .with("timestamp", entry.timestamp.as_str())
            .with("size", entry.size)
            .with("mtime", entry.mtime)
            .with("objname", entry.objname.as_deref())
            .with("mid_obs_time", entry.mid_obs_time)
            .with("fiber", entry.fiber.as_deref())
            .with("header_subset", header_subset);
        self.table.upsert(row)
    }

    pub fn get(&self, night: &str, filename: &str) -> Result<Option<IndexEntry>, DbError> {
        self.table
            .get_one(&Filter::new().eq("night", night).eq("filename", filename))?
            .map(|row| decode(&row))
            .transpose()
    }

    pub fn query(&self, query: &IndexQuery) -> Result<Vec<IndexEntry>, DbError> {
        self.table.get(&query.filter())?.iter().map(decode).collect()
    }

    /// Nights holding at least one file of `kind`, sorted.
    pub fn nights(&self, kind: Option<FileKind>) -> Result<Vec<String>, DbError> {
        let filter = Filter::new().eq_opt("output_kind", kind.map(|k| k.as_str()));
        Ok(self
            .table
            .unique_values("night", &filter)?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    pub fn remove(&self, night: &str, filename: &str) -> Result<usize, DbError> {
        self.table
            .delete(&Filter::new().eq("night", night).eq("filename", filename))
    }

    /// Drop rows of non-raw files that no longer exist on disk.
    pub fn prune_missing(&self) -> Result<usize, DbError> {
        let _guard = self.table.write_lock()?;
        let produced = self
            .table
            .get(&Filter::new().ne("output_kind", FileKind::Raw.as_str()))?;
        let mut removed = 0;
        for row in produced {
            let entry = decode(&row)?;
            if !entry.path.exists() {
                removed += self.remove(&entry.night, &entry.filename)?;
            }
        }
        if removed > 0 {
            OrphansPruned {
                table: TABLE,
                rows: removed,
            }
            .log();
        }
        Ok(removed)
    }

    /// Remove every produced row, keeping the raw catalog.
    pub fn clear_products(&self) -> Result<usize, DbError> {
        self.table
            .delete(&Filter::new().ne("output_kind", FileKind::Raw.as_str()))
    }

    pub fn clear(&self) -> Result<usize, DbError> {
        self.table.clear()
    }
}

fn decode(row: &Row) -> Result<IndexEntry, DbError> {
    let corrupt = |column: &str, message: String| DbError::Corrupt {
        table: TABLE.to_string(),
        column: column.to_string(),
        message,
    };
    let kind = row.text(TABLE, "output_kind")?;
    let subset = row.text(TABLE, "header_subset")?;

    Ok(IndexEntry {
        night: row.text(TABLE, "night")?,
        filename: row.text(TABLE, "filename")?,
        path: PathBuf::from(row.text(TABLE, "path")?),
        dprtype: row.text(TABLE, "dprtype")?,
        output_kind: FileKind::parse(&kind)
            .ok_or_else(|| corrupt("output_kind", format!("unknown kind '{kind}'")))?,
        produced_by_pid: row.opt_text("produced_by_pid"),
        timestamp: row.text(TABLE, "timestamp")?,
        size: row.int(TABLE, "size")?,
        mtime: row.float(TABLE, "mtime")?,
        objname: row.opt_text("objname"),
        mid_obs_time: row.get("mid_obs_time").as_f64(),
        fiber: row.opt_text("fiber"),
        header_subset: serde_json::from_str(&subset)
            .map_err(|e| corrupt("header_subset", e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::table::now_iso;
    use crate::lock::LockOptions;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> IndexDb {
        let locks = LockManager::new(dir.path().join("locks"), LockOptions::default());
        IndexDb::open(dir.path().join("db/index.sqlite"), locks, RetryPolicy::default()).unwrap()
    }

    fn entry(night: &str, filename: &str, kind: FileKind, dprtype: &str) -> IndexEntry {
        IndexEntry {
            night: night.into(),
            filename: filename.into(),
            path: PathBuf::from(format!("/data/{night}/{filename}")),
            dprtype: dprtype.into(),
            output_kind: kind,
            produced_by_pid: None,
            timestamp: now_iso(),
            size: 2880,
            mtime: 1_625_140_800.0,
            objname: None,
            mid_obs_time: Some(59396.2),
            fiber: None,
            header_subset: BTreeMap::from([(
                "KW_OBSTYPE".to_string(),
                serde_json::Value::String("DARK".into()),
            )]),
        }
    }

    #[test]
    fn test_upsert_keeps_one_row_per_night_and_file() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        let mut first = entry("2021-07-01", "a.fits", FileKind::Raw, "DARK_DARK_INT");
        index.upsert(&first).unwrap();
        first.dprtype = "DARK_DARK_TEL".into();
        index.upsert(&first).unwrap();

        assert_eq!(index.table().count(&Filter::new()).unwrap(), 1);
        let stored = index.get("2021-07-01", "a.fits").unwrap().unwrap();
        assert_eq!(stored, first);
        assert!(index.get("2021-07-01", "b.fits").unwrap().is_none());
    }

    #[test]
    fn test_query_and_nights() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);
        index.upsert(&entry("2021-07-02", "b.fits", FileKind::Raw, "FP_FP")).unwrap();
        index.upsert(&entry("2021-07-01", "a.fits", FileKind::Raw, "DARK_DARK_INT")).unwrap();
        index.upsert(&entry("2021-07-01", "a_pp.fits", FileKind::Preprocessed, "DARK_DARK_INT")).unwrap();

        let raw = index
            .query(&IndexQuery {
                kind: Some(FileKind::Raw),
                ..IndexQuery::default()
            })
            .unwrap();
        let names: Vec<&str> = raw.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["a.fits", "b.fits"]);

        let darks = index
            .query(&IndexQuery {
                dprtypes: vec!["DARK_DARK_INT".into()],
                ..IndexQuery::default()
            })
            .unwrap();
        assert_eq!(darks.len(), 2);

        assert_eq!(
            index.nights(Some(FileKind::Raw)).unwrap(),
            vec!["2021-07-01".to_string(), "2021-07-02".to_string()]
        );
        assert_eq!(index.nights(Some(FileKind::Preprocessed)).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_missing_only_touches_products() {
        let dir = TempDir::new().unwrap();
        let index = open(&dir);

        let existing = dir.path().join("kept.fits");
        std::fs::write(&existing, b"x").unwrap();
        let mut kept = entry("n1", "kept.fits", FileKind::Reduced, "OBJ_FP");
        kept.path = existing;
        index.upsert(&kept).unwrap();
        index.upsert(&entry("n1", "gone.fits", FileKind::Reduced, "OBJ_FP")).unwrap();
        index.upsert(&entry("n1", "raw.fits", FileKind::Raw, "OBJ_FP")).unwrap();

        assert_eq!(index.prune_missing().unwrap(), 1);
        assert!(index.get("n1", "kept.fits").unwrap().is_some());
        assert!(index.get("n1", "raw.fits").unwrap().is_some());
        assert_eq!(index.clear_products().unwrap(), 1);
    }
}
