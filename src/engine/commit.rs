// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::protocol::{WorkerResult, WorkerStatus};
use crate::config::Instrument;
use crate::db::{now_iso, CalibEntry, Completion, Databases, IndexEntry};
use crate::errors::ExecutionError;
use crate::files::{self, fits, FileKind};
use crate::lock::LockManager;
use crate::observability::messages::engine::{CommitRolledBack, OutputsCommitted};
use crate::observability::messages::StructuredLog;
use crate::planner::night_mjd;
use crate::recipes::StagedOutput;

/// What one commit wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub files: usize,
    pub calibrations: usize,
}

/// Lock name guarding moves into `dir`.
pub fn outdir_lock(dir: &Path) -> String {
    format!("outdir:{}", dir.display())
}

/// Move a worker's staged products into place, index them, register
/// calibrations and close the run-log row, all under the database and
/// output-directory locks.
///
/// The index and calibration rows are written before the run-log row leaves
/// `running`, so a row marked `passed` always has its products indexed.
/// Products of a QC-failed run are registered with `used_flag = false`.
///
/// The commit is all or nothing. When any step fails, the rows it added are
/// removed, rows it replaced are restored, moved files go back to scratch and
/// files they displaced are put back; the run-log row is left for the caller
/// to close.
pub fn commit(
    databases: &Databases,
    locks: &LockManager,
    instrument: &Instrument,
    result: &WorkerResult,
    completion: &Completion,
) -> Result<CommitSummary, ExecutionError> {
    let pid_card = instrument.keywords.card("KW_PID").map_err(|e| {
        ExecutionError::Protocol(format!("instrument {} has no pid card: {e}", instrument.name))
    })?;
    for staged in &result.outputs {
        let header = fits::read_header(&staged.staged_path)?;
        if header.get_str(pid_card).as_deref().map(str::trim) != Some(result.pid.as_str()) {
            return Err(ExecutionError::ContractViolation {
                filename: staged.filename.clone(),
                expected: result.pid.clone(),
            });
        }
    }

    let mut names = databases.lock_names();
    let dirs: BTreeSet<&Path> = result.outputs.iter().map(|o| o.final_dir.as_path()).collect();
    names.extend(dirs.iter().map(|dir| outdir_lock(dir)));
    let _guards = locks.acquire_all(&names, locks.options().max_wait)?;

    let mut undo = Undo::default();
    match register(databases, result, completion, &mut undo) {
        Ok(summary) => {
            undo.discard_backups();
            OutputsCommitted {
                pid: &result.pid,
                files: summary.files,
                calibrations: summary.calibrations,
            }
            .log();
            Ok(summary)
        }
        Err(err) => {
            CommitRolledBack {
                pid: &result.pid,
                files: undo.placed.len(),
                calibrations: undo.registered.len(),
                error: &err.to_string(),
            }
            .log();
            undo.rollback(databases, &result.pid);
            Err(err)
        }
    }
}

fn register(
    databases: &Databases,
    result: &WorkerResult,
    completion: &Completion,
    undo: &mut Undo,
) -> Result<CommitSummary, ExecutionError> {
    let used_flag = result.status == WorkerStatus::Passed;
    let mut summary = CommitSummary::default();
    for staged in &result.outputs {
        let placed = place(staged, &result.pid)?;
        let final_path = placed.target.clone();
        undo.placed.push(placed);
        let stat = files::stat(&final_path).map_err(|source| ExecutionError::Staging {
            path: final_path.clone(),
            source,
        })?;

        let previous = databases.index.get(&staged.night, &staged.filename)?;
        databases.index.upsert(&IndexEntry {
            night: staged.night.clone(),
            filename: staged.filename.clone(),
            path: final_path.clone(),
            dprtype: staged.dprtype.clone(),
            output_kind: staged.kind,
            produced_by_pid: Some(result.pid.clone()),
            timestamp: now_iso(),
            size: stat.size,
            mtime: stat.mtime,
            objname: staged.objname.clone(),
            mid_obs_time: staged.mid_obs_time,
            fiber: staged.fiber.clone(),
            header_subset: staged.header_subset.clone(),
        })?;
        undo.indexed.push(Indexed {
            night: staged.night.clone(),
            filename: staged.filename.clone(),
            previous,
        });
        summary.files += 1;

        if let Some(key) = &staged.calib_key {
            let rowid = databases.calib_for(staged.kind).add(&CalibEntry {
                key: key.clone(),
                fiber: staged.fiber.clone(),
                night: staged.night.clone(),
                filename: staged.filename.clone(),
                file_path: final_path,
                mid_obs_time: staged
                    .mid_obs_time
                    .or_else(|| night_mjd(&staged.night))
                    .unwrap_or(0.0),
                used_flag,
                super_flag: staged.super_flag,
                objname: staged.objname.clone(),
                pid: Some(result.pid.clone()),
            })?;
            undo.registered.push((staged.kind, rowid));
            summary.calibrations += 1;
        }
    }

    databases.runlog.finish(&result.pid, completion)?;
    Ok(summary)
}

/// A product moved into the tree, and the file it displaced.
#[derive(Debug)]
struct Placed {
    staged: PathBuf,
    target: PathBuf,
    backup: Option<PathBuf>,
}

#[derive(Debug)]
struct Indexed {
    night: String,
    filename: String,
    previous: Option<IndexEntry>,
}

/// What a commit has written so far.
#[derive(Debug, Default)]
struct Undo {
    placed: Vec<Placed>,
    indexed: Vec<Indexed>,
    registered: Vec<(FileKind, i64)>,
}

impl Undo {
    fn discard_backups(&self) {
        for backup in self.placed.iter().filter_map(|p| p.backup.as_ref()) {
            if let Err(err) = fs::remove_file(backup) {
                tracing::warn!(path = %backup.display(), error = %err, "cannot remove replaced product");
            }
        }
    }

    /// Best effort: every step is attempted, failures are logged.
    fn rollback(self, databases: &Databases, pid: &str) {
        for (kind, rowid) in self.registered.iter().rev() {
            if let Err(err) = databases.calib_for(*kind).remove(*rowid) {
                tracing::warn!(pid, rowid, error = %err, "cannot remove calibration row");
            }
        }
        for indexed in self.indexed.iter().rev() {
            let restored = match &indexed.previous {
                Some(previous) => databases.index.upsert(previous),
                None => databases
                    .index
                    .remove(&indexed.night, &indexed.filename)
                    .map(|_| ()),
            };
            if let Err(err) = restored {
                tracing::warn!(pid, filename = %indexed.filename, error = %err, "cannot restore index row");
            }
        }
        for placed in self.placed.iter().rev() {
            if let Err(err) = move_file(&placed.target, &placed.staged) {
                tracing::warn!(pid, path = %placed.target.display(), error = %err, "cannot return product to scratch");
            }
            if let Some(backup) = &placed.backup {
                if let Err(err) = fs::rename(backup, &placed.target) {
                    tracing::warn!(pid, path = %backup.display(), error = %err, "cannot restore replaced product");
                }
            }
        }
    }
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_err() {
        // Scratch and the product tree may sit on different filesystems.
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

fn place(staged: &StagedOutput, pid: &str) -> Result<Placed, ExecutionError> {
    let staging = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ExecutionError::Staging { path, source }
    };
    fs::create_dir_all(&staged.final_dir).map_err(staging(&staged.final_dir))?;
    let target = staged.final_path();
    let backup = if target.exists() {
        let backup = staged.final_dir.join(format!("{}.{pid}.bak", staged.filename));
        fs::rename(&target, &backup).map_err(staging(&target))?;
        Some(backup)
    } else {
        None
    };
    if let Err(source) = move_file(&staged.staged_path, &target) {
        if let Some(backup) = &backup {
            let _ = fs::rename(backup, &target);
        }
        return Err(ExecutionError::Staging {
            path: staged.staged_path.clone(),
            source,
        });
    }
    Ok(Placed {
        staged: staged.staged_path.clone(),
        target,
        backup,
    })
}
