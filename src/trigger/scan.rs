// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::consts::INDEX_HEADER_GROUP;
use crate::config::Instrument;
use crate::db::{now_iso, IndexDb, IndexEntry};
use crate::errors::TriggerError;
use crate::files::fits::{self, Header};
use crate::files::{self, is_indexable, FileKind, FileStat, FITS_EXTENSION};
use crate::observability::messages::trigger::{FileIgnored, NightScanned};
use crate::observability::messages::StructuredLog;

/// What one pass over a night directory found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub night: String,
    pub indexed: usize,
    pub unchanged: usize,
    pub ignored: usize,
    /// Latest modification time of any FITS file in the night, epoch seconds.
    pub newest_mtime: Option<f64>,
}

/// Indexes raw files laid out as `<raw>/<night>/*.fits`.
///
/// A file is re-read only when its size or modification time differs from
/// its index row. Files that cannot be identified are remembered by the same
/// stamp so they are reported once.
#[derive(Debug)]
pub struct RawScanner {
    instrument: Arc<Instrument>,
    index: IndexDb,
    raw_root: PathBuf,
    ignored: HashMap<PathBuf, FileStat>,
}

impl RawScanner {
    pub fn new(instrument: Arc<Instrument>, index: IndexDb, raw_root: impl Into<PathBuf>) -> Self {
        Self {
            instrument,
            index,
            raw_root: raw_root.into(),
            ignored: HashMap::new(),
        }
    }

    pub fn raw_root(&self) -> &Path {
        &self.raw_root
    }

    /// Night directories under the raw root, sorted. A missing root has none.
    pub fn nights(&self) -> Result<Vec<String>, TriggerError> {
        if !self.raw_root.exists() {
            return Ok(vec![]);
        }
        let entries = fs::read_dir(&self.raw_root).map_err(|source| TriggerError::Scan {
            path: self.raw_root.clone(),
            source,
        })?;
        let mut nights = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            nights.push(name);
        }
        nights.sort();
        Ok(nights)
    }

    pub fn scan_all(&mut self) -> Result<Vec<ScanReport>, TriggerError> {
        let mut reports = Vec::new();
        for night in self.nights()? {
            reports.push(self.scan_night(&night)?);
        }
        Ok(reports)
    }

    pub fn scan_night(&mut self, night: &str) -> Result<ScanReport, TriggerError> {
        let dir = self.raw_root.join(night);
        let entries = fs::read_dir(&dir).map_err(|source| TriggerError::Scan {
            path: dir.clone(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.ends_with(FITS_EXTENSION) && !n.starts_with('.'))
            })
            .collect();
        paths.sort();
        // Unidentified files that left the night are forgotten.
        self.ignored.retain(|ignored, _| {
            ignored.parent() != Some(dir.as_path()) || paths.binary_search(ignored).is_ok()
        });

        let mut report = ScanReport {
            night: night.to_string(),
            ..ScanReport::default()
        };
        for path in paths {
            let stat = match files::stat(&path) {
                Ok(stat) => stat,
                Err(err) => {
                    report.ignored += 1;
                    FileIgnored {
                        path: &path,
                        reason: &err.to_string(),
                    }
                    .log();
                    continue;
                }
            };
            report.newest_mtime = Some(report.newest_mtime.map_or(stat.mtime, |m| m.max(stat.mtime)));

            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(existing) = self.index.get(night, &filename)? {
                if existing.size == stat.size && existing.mtime == stat.mtime {
                    report.unchanged += 1;
                    continue;
                }
            }
            if self.ignored.get(&path) == Some(&stat) {
                report.ignored += 1;
                continue;
            }

            match self.entry_for(night, &filename, &path, stat) {
                Ok(entry) => {
                    self.index.upsert(&entry)?;
                    self.ignored.remove(&path);
                    report.indexed += 1;
                }
                Err(reason) => {
                    FileIgnored {
                        path: &path,
                        reason: &reason,
                    }
                    .log();
                    self.ignored.insert(path, stat);
                    report.ignored += 1;
                }
            }
        }

        NightScanned {
            night,
            indexed: report.indexed,
            unchanged: report.unchanged,
            ignored: report.ignored,
        }
        .log();
        Ok(report)
    }

    /// The index row of one raw file, or why it is left out.
    fn entry_for(
        &self,
        night: &str,
        filename: &str,
        path: &Path,
        stat: FileStat,
    ) -> Result<IndexEntry, String> {
        let header = fits::read_header(path).map_err(|e| e.to_string())?;
        let dprtype = self.instrument.identifier.identify(&header);
        if !is_indexable(&dprtype) {
            return Err("header matches no known DPRTYPE".to_string());
        }

        Ok(IndexEntry {
            night: night.to_string(),
            filename: filename.to_string(),
            path: path.to_path_buf(),
            dprtype,
            output_kind: FileKind::Raw,
            produced_by_pid: None,
            timestamp: now_iso(),
            size: stat.size,
            mtime: stat.mtime,
            objname: self.header_text("KW_OBJNAME", &header),
            mid_obs_time: self.instrument.mid_obs_time(&header).ok(),
            fiber: self.header_text("KW_FIBER", &header),
            header_subset: self
                .instrument
                .keywords
                .header_subset(&header, INDEX_HEADER_GROUP),
        })
    }

    fn header_text(&self, keyword: &str, header: &Header) -> Option<String> {
        self.instrument
            .keywords
            .header_get_opt(keyword, header)
            .ok()
            .flatten()
            .and_then(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
    }
}
