// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Typed tabular stores backed by SQLite.
//!
//! Each store is its own SQLite file under the profile's `db` root:
//!
//! | Store   | File             | Key                  |
//! |---------|------------------|----------------------|
//! | calibDB | `calib.sqlite`   | insertion order      |
//! | telluDB | `tellu.sqlite`   | insertion order      |
//! | index   | `index.sqlite`   | `(night, filename)`  |
//! | run-log | `runlog.sqlite`  | `pid`                |
//! | reject  | `reject.sqlite`  | `(night, filename)`  |
//!
//! All writes go through [`Table`], which holds the lock `db_<table>` for the
//! statement and retries busy or locked databases with bounded backoff.

mod calib;
mod filter;
mod index;
mod reject;
mod runlog;
mod schema;
mod table;

use std::path::Path;

pub use calib::{CalibDb, CalibEntry, CalibRow};
pub use filter::Filter;
pub use index::{IndexDb, IndexEntry, IndexQuery};
pub use reject::{RejectDb, RejectEntry};
pub use runlog::{Completion, RunLogDb, RunLogEntry, RunLogQuery, RunStatus};
pub use schema::{Column, ColumnType, DbValue, Row, TableSchema};
pub use table::{now_iso, RetryPolicy, Table};

use crate::errors::DbError;
use crate::files::FileKind;
use crate::lock::LockManager;

pub const CALIB_DB_FILE: &str = "calib.sqlite";
pub const TELLU_DB_FILE: &str = "tellu.sqlite";
pub const INDEX_DB_FILE: &str = "index.sqlite";
pub const RUNLOG_DB_FILE: &str = "runlog.sqlite";
pub const REJECT_DB_FILE: &str = "reject.sqlite";

/// Every store of one working tree, sharing a lock manager.
#[derive(Debug, Clone)]
pub struct Databases {
    pub calib: CalibDb,
    pub tellu: CalibDb,
    pub index: IndexDb,
    pub runlog: RunLogDb,
    pub reject: RejectDb,
}

impl Databases {
    pub fn open(root: &Path, locks: &LockManager, retry: RetryPolicy) -> Result<Self, DbError> {
        Ok(Self {
            calib: CalibDb::open(
                FileKind::Calibration,
                root.join(CALIB_DB_FILE),
                locks.clone(),
                retry,
            )?,
            tellu: CalibDb::open(
                FileKind::Telluric,
                root.join(TELLU_DB_FILE),
                locks.clone(),
                retry,
            )?,
            index: IndexDb::open(root.join(INDEX_DB_FILE), locks.clone(), retry)?,
            runlog: RunLogDb::open(root.join(RUNLOG_DB_FILE), locks.clone(), retry)?,
            reject: RejectDb::open(root.join(REJECT_DB_FILE), locks.clone(), retry)?,
        })
    }

    /// The calibDB or telluDB that stores products of `kind`.
    pub fn calib_for(&self, kind: FileKind) -> &CalibDb {
        match kind {
            FileKind::Telluric => &self.tellu,
            _ => &self.calib,
        }
    }

    /// Every table, in a fixed order.
    pub fn tables(&self) -> [&Table; 5] {
        [
            self.calib.table(),
            self.tellu.table(),
            self.index.table(),
            self.runlog.table(),
            self.reject.table(),
        ]
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables().into_iter().find(|t| t.name() == name)
    }

    /// Lock names of every table, for callers that must write several at once.
    pub fn lock_names(&self) -> Vec<String> {
        self.tables().iter().map(|t| t.lock_name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockOptions;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_one_file_per_store() {
        let dir = TempDir::new().unwrap();
        let locks = LockManager::new(dir.path().join("locks"), LockOptions::default());
        let dbs = Databases::open(&dir.path().join("db"), &locks, RetryPolicy::default()).unwrap();

        for file in [CALIB_DB_FILE, TELLU_DB_FILE, INDEX_DB_FILE, RUNLOG_DB_FILE, REJECT_DB_FILE] {
            assert!(dir.path().join("db").join(file).exists(), "{file}");
        }
        let names: Vec<&str> = dbs.tables().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["calib", "tellu", "file_index", "runlog", "reject"]);
        assert_eq!(dbs.calib_for(FileKind::Telluric).kind(), FileKind::Telluric);
        assert!(dbs.table("runlog").is_some());
        assert!(dbs.lock_names().contains(&"db_file_index".to_string()));
    }
}
