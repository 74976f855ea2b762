// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the raw tree watcher.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;
use tracing::Span;

/// One night directory was scanned.
///
/// # Log Level
/// `info!` when anything changed, otherwise `debug!`
pub struct NightScanned<'a> {
    pub night: &'a str,
    pub indexed: usize,
    pub unchanged: usize,
    pub ignored: usize,
}

impl Display for NightScanned<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Night {}: {} file(s) indexed, {} unchanged, {} ignored",
            self.night, self.indexed, self.unchanged, self.ignored
        )
    }
}

impl StructuredLog for NightScanned<'_> {
    fn log(&self) {
        if self.indexed > 0 {
            tracing::info!(
                night = self.night,
                indexed = self.indexed,
                unchanged = self.unchanged,
                ignored = self.ignored,
                "{}", self
            );
        } else {
            tracing::debug!(
                night = self.night,
                unchanged = self.unchanged,
                ignored = self.ignored,
                "{}", self
            );
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("scan", span_name = name, night = self.night)
    }
}

/// A raw file could not be indexed.
///
/// # Log Level
/// `warn!` - The file is left out of every plan
pub struct FileIgnored<'a> {
    pub path: &'a Path,
    pub reason: &'a str,
}

impl Display for FileIgnored<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Ignoring {}: {}", self.path.display(), self.reason)
    }
}

impl StructuredLog for FileIgnored<'_> {
    fn log(&self) {
        tracing::warn!(path = %self.path.display(), reason = self.reason, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("file_ignored", span_name = name, path = %self.path.display())
    }
}

/// A night still receives files and is not yet submitted.
///
/// # Log Level
/// `debug!` - Repeats every scan until the night settles
pub struct NightNotQuiescent<'a> {
    pub night: &'a str,
    pub remaining: Duration,
}

impl Display for NightNotQuiescent<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Night {} still active, quiescent in {:?}",
            self.night, self.remaining
        )
    }
}

impl StructuredLog for NightNotQuiescent<'_> {
    fn log(&self) {
        tracing::debug!(
            night = self.night,
            remaining_s = self.remaining.as_secs(),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("night_wait", span_name = name, night = self.night)
    }
}

/// A quiescent night was handed to the planner.
///
/// # Log Level
/// `info!` - Important operational event
pub struct NightSubmitted<'a> {
    pub night: &'a str,
    pub run_table: &'a str,
    pub exit_code: i32,
}

impl Display for NightSubmitted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Night {} processed with run table '{}' (exit code {})",
            self.night, self.run_table, self.exit_code
        )
    }
}

impl StructuredLog for NightSubmitted<'_> {
    fn log(&self) {
        tracing::info!(
            night = self.night,
            run_table = self.run_table,
            exit_code = self.exit_code,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "night",
            span_name = name,
            night = self.night,
            run_table = self.run_table
        )
    }
}
