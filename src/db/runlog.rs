// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::filter::Filter;
use super::schema::{Column, ColumnType, Row, TableSchema};
use super::table::{RetryPolicy, Table};
use crate::errors::{DbError, ErrorKind};
use crate::lock::LockManager;

const TABLE: &str = "runlog";

/// Lifecycle state of one invocation's run-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Passed,
    Failed,
    Skipped,
    SkippedUpstream,
    QcFailed,
    Cancelled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 7] = [
        RunStatus::Running,
        RunStatus::Passed,
        RunStatus::Failed,
        RunStatus::Skipped,
        RunStatus::SkippedUpstream,
        RunStatus::QcFailed,
        RunStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
            RunStatus::SkippedUpstream => "skipped_upstream",
            RunStatus::QcFailed => "qc_failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == value)
    }

    /// Dependents may run after this status.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, RunStatus::Passed | RunStatus::Skipped)
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run-log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub pid: String,
    pub rule_id: String,
    pub recipe: String,
    pub night: String,
    pub group_key: String,
    pub args: serde_json::Value,
    pub arg_fingerprint: String,
    pub input_fingerprint: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub status: RunStatus,
    pub error_kind: Option<ErrorKind>,
    pub error_msg: Option<String>,
    /// The run-log row this one was skipped because of, if any.
    pub parent_pid: Option<String>,
    pub log_path: Option<PathBuf>,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub status: RunStatus,
    pub end: String,
    pub error_kind: Option<ErrorKind>,
    pub error_msg: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunLogQuery {
    pub recipe: Option<String>,
    pub night: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RunLogDb {
    table: Table,
}

impl RunLogDb {
    pub fn schema() -> TableSchema {
        TableSchema::new(
            TABLE,
            vec![
                Column::required("pid", ColumnType::String),
                Column::required("rule_id", ColumnType::String),
                Column::required("recipe", ColumnType::String),
                Column::required("night", ColumnType::String),
                Column::required("group_key", ColumnType::String),
                Column::required("args", ColumnType::String),
                Column::required("arg_fingerprint", ColumnType::String),
                Column::required("input_fingerprint", ColumnType::String),
                Column::optional("start_time", ColumnType::IsoDatetime),
                Column::optional("end_time", ColumnType::IsoDatetime),
                Column::required("status", ColumnType::String),
                Column::optional("error_kind", ColumnType::String),
                Column::optional("error_msg", ColumnType::String),
                Column::optional("parent_pid", ColumnType::String),
                Column::optional("log_path", ColumnType::Path),
            ],
        )
        .with_primary_key(&["pid"])
        .with_index(&["recipe", "arg_fingerprint", "input_fingerprint"])
        .with_index(&["night", "status"])
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

    /// Record an invocation as `running`.
    pub fn start(&self, entry: &RunLogEntry) -> Result<(), DbError> {
        let mut running = entry.clone();
        running.status = RunStatus::Running;
        running.end = None;
        self.table.upsert(encode(&running)?)
    }

    /// Transition a running row to its final status.
    pub fn finish(&self, pid: &str, completion: &Completion) -> Result<(), DbError> {
        let fields = Row::new()
            .with("status", completion.status.as_str())
            .with("end_time", completion.end.as_str())
            .with("error_kind", completion.error_kind.map(|k| k.as_str()))
            .with("error_msg", completion.error_msg.as_deref());
        let touched = self.table.update(&Filter::new().eq("pid", pid), fields)?;
        if touched == 0 {
            return Err(DbError::Corrupt {
                table: TABLE.to_string(),
                column: "pid".to_string(),
                message: format!("no running row for {pid}"),
            });
        }
        Ok(())
    }

    /// Write a row that never ran (skipped, skipped upstream, cancelled before dispatch).
    pub fn insert_final(&self, entry: &RunLogEntry) -> Result<(), DbError> {
        self.table.upsert(encode(entry)?)
    }

    pub fn get(&self, pid: &str) -> Result<Option<RunLogEntry>, DbError> {
        self.table
            .get_one(&Filter::new().eq("pid", pid))?
            .map(|row| decode(&row))
            .transpose()
    }

    /// Latest `passed` row with identical recipe, arguments and inputs.
    pub fn find_done(
        &self,
        recipe: &str,
        arg_fingerprint: &str,
        input_fingerprint: &str,
    ) -> Result<Option<RunLogEntry>, DbError> {
        let filter = Filter::new()
            .eq("recipe", recipe)
            .eq("arg_fingerprint", arg_fingerprint)
            .eq("input_fingerprint", input_fingerprint)
            .eq("status", RunStatus::Passed.as_str())
            .order_by("end_time", false);
        self.table
            .get_one(&filter)?
            .map(|row| decode(&row))
            .transpose()
    }

    pub fn query(&self, query: &RunLogQuery) -> Result<Vec<RunLogEntry>, DbError> {
        let mut filter = Filter::new()
            .eq_opt("recipe", query.recipe.as_deref())
            .eq_opt("night", query.night.as_deref())
            .eq_opt("status", query.status.map(|s| s.as_str()))
            .order_by("rowid", true);
        if let Some(limit) = query.limit {
            filter = filter.limit(limit);
        }
        self.table.get(&filter)?.iter().map(decode).collect()
    }

    /// Rows left `running` by a supervisor that died.
    pub fn dangling(&self) -> Result<Vec<RunLogEntry>, DbError> {
        self.query(&RunLogQuery {
            status: Some(RunStatus::Running),
            ..RunLogQuery::default()
        })
    }

    pub fn clear(&self) -> Result<usize, DbError> {
        self.table.clear()
    }
}

fn encode(entry: &RunLogEntry) -> Result<Row, DbError> {
    let args = serde_json::to_string(&entry.args).map_err(|e| DbError::Corrupt {
        table: TABLE.to_string(),
        column: "args".to_string(),
        message: e.to_string(),
    })?;
    Ok(Row::new()
        .with("pid", entry.pid.as_str())
        .with("rule_id", entry.rule_id.as_str())
        .with("recipe", entry.recipe.as_str())
        .with("night", entry.night.as_str())
        .with("group_key", entry.group_key.as_str())
        .with("args", args)
        .with("arg_fingerprint", entry.arg_fingerprint.as_str())
        .with("input_fingerprint", entry.input_fingerprint.as_str())
        .with("start_time", entry.start.as_deref())
        .with("end_time", entry.end.as_deref())
        .with("status", entry.status.as_str())
        .with("error_kind", entry.error_kind.map(|k| k.as_str()))
        .with("error_msg", entry.error_msg.as_deref())
        .with("parent_pid", entry.parent_pid.as_deref())
        .with(
            "log_path",
            entry.log_path.as_ref().map(|p| p.display().to_string()),
        ))
}

fn decode(row: &Row) -> Result<RunLogEntry, DbError> {
    let corrupt = |column: &str, message: String| DbError::Corrupt {
        table: TABLE.to_string(),
        column: column.to_string(),
        message,
    };
    let status = row.text(TABLE, "status")?;
    let args = row.text(TABLE, "args")?;
    let error_kind = match row.opt_text("error_kind") {
        Some(kind) => Some(
            ErrorKind::parse(&kind)
                .ok_or_else(|| corrupt("error_kind", format!("unknown kind '{kind}'")))?,
        ),
        None => None,
    };

    Ok(RunLogEntry {
        pid: row.text(TABLE, "pid")?,
        rule_id: row.text(TABLE, "rule_id")?,
        recipe: row.text(TABLE, "recipe")?,
        night: row.text(TABLE, "night")?,
        group_key: row.text(TABLE, "group_key")?,
        args: serde_json::from_str(&args).map_err(|e| corrupt("args", e.to_string()))?,
        arg_fingerprint: row.text(TABLE, "arg_fingerprint")?,
        input_fingerprint: row.text(TABLE, "input_fingerprint")?,
        start: row.opt_text("start_time"),
        end: row.opt_text("end_time"),
        status: RunStatus::parse(&status)
            .ok_or_else(|| corrupt("status", format!("unknown status '{status}'")))?,
        error_kind,
        error_msg: row.opt_text("error_msg"),
        parent_pid: row.opt_text("parent_pid"),
        log_path: row.opt_text("log_path").map(PathBuf::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::table::now_iso;
    use crate::lock::LockOptions;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> RunLogDb {
        let locks = LockManager::new(dir.path().join("locks"), LockOptions::default());
        RunLogDb::open(dir.path().join("db/runlog.sqlite"), locks, RetryPolicy::default()).unwrap()
    }

    fn entry(pid: &str, recipe: &str) -> RunLogEntry {
        RunLogEntry {
            pid: pid.into(),
            rule_id: "dark".into(),
            recipe: recipe.into(),
            night: "2021-07-01".into(),
            group_key: "2021-07-01".into(),
            args: serde_json::json!({"files": ["d1.fits", "d2.fits"]}),
            arg_fingerprint: "args-1".into(),
            input_fingerprint: "inputs-1".into(),
            start: Some(now_iso()),
            end: None,
            status: RunStatus::Running,
            error_kind: None,
            error_msg: None,
            parent_pid: None,
            log_path: Some(PathBuf::from(format!("/logs/2021-07-01/{pid}.log"))),
        }
    }

    #[test]
    fn test_status_text_round_trip() {
        for status in RunStatus::ALL {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(
            serde_json::to_string(&RunStatus::SkippedUpstream).unwrap(),
            "\"skipped_upstream\""
        );
        assert!(RunStatus::Skipped.satisfies_dependents());
        assert!(!RunStatus::QcFailed.satisfies_dependents());
    }

    #[test]
    fn test_start_finish_and_find_done() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);

        log.start(&entry("PID-1", "apero_dark")).unwrap();
        assert_eq!(log.dangling().unwrap().len(), 1);
        assert!(log.find_done("apero_dark", "args-1", "inputs-1").unwrap().is_none());

        log.finish(
            "PID-1",
            &Completion {
                status: RunStatus::Passed,
                end: now_iso(),
                error_kind: None,
                error_msg: None,
            },
        )
        .unwrap();

        let done = log.find_done("apero_dark", "args-1", "inputs-1").unwrap().unwrap();
        assert_eq!(done.pid, "PID-1");
        assert_eq!(done.args["files"][1], "d2.fits");
        assert!(log.find_done("apero_dark", "args-1", "inputs-2").unwrap().is_none());
        assert!(log.dangling().unwrap().is_empty());
    }

    #[test]
    fn test_finish_unknown_pid_fails() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        let result = log.finish(
            "PID-404",
            &Completion {
                status: RunStatus::Failed,
                end: now_iso(),
                error_kind: Some(ErrorKind::Exception),
                error_msg: Some("boom".into()),
            },
        );
        assert!(matches!(result, Err(DbError::Corrupt { .. })));
    }

    #[test]
    fn test_query_filters_and_keeps_completion_order() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);

        let mut failed = entry("PID-1", "apero_loc");
        failed.status = RunStatus::Failed;
        failed.end = Some(now_iso());
        failed.error_kind = Some(ErrorKind::Exception);
        failed.error_msg = Some("no orders found".into());
        log.insert_final(&failed).unwrap();

        let mut skipped = entry("PID-2", "apero_extract");
        skipped.status = RunStatus::SkippedUpstream;
        skipped.start = None;
        skipped.parent_pid = Some("PID-1".into());
        log.insert_final(&skipped).unwrap();

        let all = log.query(&RunLogQuery::default()).unwrap();
        let pids: Vec<&str> = all.iter().map(|e| e.pid.as_str()).collect();
        assert_eq!(pids, vec!["PID-1", "PID-2"]);

        let upstream = log
            .query(&RunLogQuery {
                status: Some(RunStatus::SkippedUpstream),
                ..RunLogQuery::default()
            })
            .unwrap();
        assert_eq!(upstream.len(), 1);
        assert_eq!(upstream[0].parent_pid.as_deref(), Some("PID-1"));

        let stored = log.get("PID-1").unwrap().unwrap();
        assert_eq!(stored.error_kind, Some(ErrorKind::Exception));
        assert_eq!(stored, failed);
    }
}
