// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use super::workspace::Workspace;
use crate::config::consts::TRIGGER_LOCK;
use crate::engine::commit::outdir_lock;

/// What a reset removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub calibrations: usize,
    pub tellurics: usize,
    pub products_indexed: usize,
    pub runs: usize,
    pub entries_removed: usize,
    pub locks_cleared: usize,
}

/// Remove everything under `dir` but keep the directory.
fn empty_dir(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("cannot read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .with_context(|| format!("cannot remove {}", path.display()))?;
        removed += 1;
    }
    Ok(removed)
}

/// Return the working tree to its unprocessed state.
///
/// Product directories, scratch, the calibration and telluric databases, the
/// run log and the produced rows of the index are cleared under their locks.
/// The raw tree, its index rows and the reject list are kept. Lock
/// directories are wiped last.
pub fn reset(ws: &Workspace) -> Result<ResetReport> {
    let paths = &ws.paths;
    let product_dirs = [&paths.reduced, &paths.tmp, &paths.calib, &paths.tellu];

    let mut names = ws.databases.lock_names();
    names.push(TRIGGER_LOCK.to_string());
    names.extend(product_dirs.iter().map(|dir| outdir_lock(dir)));

    let mut report = ResetReport::default();
    {
        let _guards = ws.locks.acquire_all(&names, ws.locks.options().max_wait)?;
        for dir in product_dirs.iter().copied().chain([&paths.scratch]) {
            report.entries_removed += empty_dir(dir)?;
        }
        report.calibrations = ws.databases.calib.clear()?;
        report.tellurics = ws.databases.tellu.clear()?;
        report.products_indexed = ws.databases.index.clear_products()?;
        report.runs = ws.databases.runlog.clear()?;
    }
    report.locks_cleared = ws.locks.reset_all()?;
    tracing::info!(
        calibrations = report.calibrations,
        tellurics = report.tellurics,
        products = report.products_indexed,
        runs = report.runs,
        entries = report.entries_removed,
        "working tree reset"
    );
    Ok(report)
}
