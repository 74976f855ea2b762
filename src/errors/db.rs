// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use thiserror::Error;

use super::{ErrorKind, LockError};

/// Errors raised by the typed table layer.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error on table '{table}': {source}")]
    Sqlite {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("table '{table}' stayed busy after {attempts} attempts: {source}")]
    RetriesExhausted {
        table: String,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("column '{column}' of table '{table}' rejects {value}: expected {expected}")]
    SchemaViolation {
        table: String,
        column: String,
        expected: String,
        value: String,
    },

    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("table '{table}' requires column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("stored value in '{table}.{column}' is malformed: {message}")]
    Corrupt {
        table: String,
        column: String,
        message: String,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("database file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Lock(err) => err.kind(),
            DbError::Io { .. } => ErrorKind::Io,
            _ => ErrorKind::Db,
        }
    }
}
