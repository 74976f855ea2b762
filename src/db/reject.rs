// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::filter::Filter;
use super::schema::{Column, ColumnType, Row, TableSchema};
use super::table::{now_iso, RetryPolicy, Table};
use crate::errors::DbError;
use crate::lock::LockManager;

const TABLE: &str = "reject";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectEntry {
    pub night: String,
    pub filename: String,
    pub reason: String,
    pub timestamp: String,
}

/// Files the planner must never bind.
#[derive(Debug, Clone)]
pub struct RejectDb {
    table: Table,
}

impl RejectDb {
    pub fn schema() -> TableSchema {
        TableSchema::new(
            TABLE,
            vec![
                Column::required("night", ColumnType::String),
                Column::required("filename", ColumnType::String),
                Column::required("reason", ColumnType::String),
                Column::required("timestamp", ColumnType::IsoDatetime),
            ],
        )
        .with_primary_key(&["night", "filename"])
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

    pub fn reject(&self, night: &str, filename: &str, reason: &str) -> Result<(), DbError> {
        self.table.upsert(
            Row::new()
                .with("night", night)
                .with("filename", filename)
                .with("reason", reason)
                .with("timestamp", now_iso()),
        )
    }

    /// Returns true if a row was removed.
    pub fn unreject(&self, night: &str, filename: &str) -> Result<bool, DbError> {
        let removed = self
            .table
            .delete(&Filter::new().eq("night", night).eq("filename", filename))?;
        Ok(removed > 0)
    }

    pub fn list(&self, night: Option<&str>) -> Result<Vec<RejectEntry>, DbError> {
        let filter = Filter::new()
            .eq_opt("night", night)
            .order_by("night", true)
            .order_by("filename", true);
        self.table
            .get(&filter)?
            .iter()
            .map(|row| {
                Ok(RejectEntry {
                    night: row.text(TABLE, "night")?,
                    filename: row.text(TABLE, "filename")?,
                    reason: row.text(TABLE, "reason")?,
                    timestamp: row.text(TABLE, "timestamp")?,
                })
            })
            .collect()
    }

    /// `(night, filename)` pairs, for fast membership checks while planning.
    pub fn keys(&self) -> Result<BTreeSet<(String, String)>, DbError> {
        Ok(self
            .list(None)?
            .into_iter()
            .map(|e| (e.night, e.filename))
            .collect())
    }

    pub fn clear(&self) -> Result<usize, DbError> {
        self.table.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockOptions;
    use tempfile::TempDir;

    #[test]
    fn test_reject_and_unreject() {
        let dir = TempDir::new().unwrap();
        let locks = LockManager::new(dir.path().join("locks"), LockOptions::default());
        let rejects =
            RejectDb::open(dir.path().join("reject.sqlite"), locks, RetryPolicy::default()).unwrap();

        rejects.reject("2021-07-01", "bad.fits", "saturated").unwrap();
        rejects.reject("2021-07-01", "bad.fits", "saturated and trailed").unwrap();
        rejects.reject("2021-07-02", "worse.fits", "shutter").unwrap();

        let listed = rejects.list(Some("2021-07-01")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reason, "saturated and trailed");
        assert!(rejects
            .keys()
            .unwrap()
            .contains(&("2021-07-02".to_string(), "worse.fits".to_string())));

        assert!(rejects.unreject("2021-07-01", "bad.fits").unwrap());
        assert!(!rejects.unreject("2021-07-01", "bad.fits").unwrap());
        assert_eq!(rejects.list(None).unwrap().len(), 1);
    }
}
