// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the typed table layer.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;
use tracing::Span;

/// A table was opened and its schema ensured.
///
/// # Log Level
/// `debug!`
pub struct TableOpened<'a> {
    pub table: &'a str,
    pub path: &'a Path,
    pub columns: usize,
}

impl Display for TableOpened<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Table '{}' ready at {} ({} columns)",
            self.table,
            self.path.display(),
            self.columns
        )
    }
}

impl StructuredLog for TableOpened<'_> {
    fn log(&self) {
        tracing::debug!(
            table = self.table,
            path = %self.path.display(),
            columns = self.columns,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("table_open", span_name = name, table = self.table)
    }
}

/// A statement hit a busy or locked database and will be retried.
///
/// # Log Level
/// `warn!` - Sustained contention points to a lock missing around a writer
pub struct StatementRetrying<'a> {
    pub table: &'a str,
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a rusqlite::Error,
}

impl Display for StatementRetrying<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Table '{}' busy on attempt {} ({}), retrying in {:?}",
            self.table, self.attempt, self.error, self.delay
        )
    }
}

impl StructuredLog for StatementRetrying<'_> {
    fn log(&self) {
        tracing::warn!(
            table = self.table,
            attempt = self.attempt,
            delay_ms = self.delay.as_millis() as u64,
            error = %self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "table_retry",
            span_name = name,
            table = self.table,
            attempt = self.attempt
        )
    }
}

/// Rows were written to a table.
///
/// # Log Level
/// `trace!` - One per statement
pub struct RowsWritten<'a> {
    pub table: &'a str,
    pub operation: &'a str,
    pub rows: usize,
}

impl Display for RowsWritten<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} on '{}' touched {} row(s)",
            self.operation, self.table, self.rows
        )
    }
}

impl StructuredLog for RowsWritten<'_> {
    fn log(&self) {
        tracing::trace!(
            table = self.table,
            operation = self.operation,
            rows = self.rows,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::trace_span!("table_write", span_name = name, table = self.table)
    }
}

/// A table was emptied by a reset.
///
/// # Log Level
/// `info!`
pub struct TableCleared<'a> {
    pub table: &'a str,
    pub rows: usize,
}

impl Display for TableCleared<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Cleared {} row(s) from '{}'", self.rows, self.table)
    }
}

impl StructuredLog for TableCleared<'_> {
    fn log(&self) {
        tracing::info!(table = self.table, rows = self.rows, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("table_clear", span_name = name, table = self.table)
    }
}

/// Index rows whose files vanished from disk were dropped.
///
/// # Log Level
/// `warn!`
pub struct OrphansPruned<'a> {
    pub table: &'a str,
    pub rows: usize,
}

impl Display for OrphansPruned<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Pruned {} row(s) from '{}' whose files are missing",
            self.rows, self.table
        )
    }
}

impl StructuredLog for OrphansPruned<'_> {
    fn log(&self) {
        tracing::warn!(table = self.table, rows = self.rows, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("table_prune", span_name = name, table = self.table)
    }
}
