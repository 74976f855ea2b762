// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use thiserror::Error;

use super::{ConfigError, DbError, ErrorKind, ExecutionError, LockError, PlanError};

/// Failures of the raw tree watcher. Per-file problems are logged and the
/// file is skipped; these stop a scan or a submission.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("cannot read raw directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("planning night {night} failed: {source}")]
    Plan {
        night: String,
        #[source]
        source: PlanError,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("trigger task failed: {0}")]
    Join(String),
}

impl TriggerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TriggerError::Scan { .. } => ErrorKind::Io,
            TriggerError::Config(err) => err.kind(),
            TriggerError::Db(err) => err.kind(),
            TriggerError::Lock(err) => err.kind(),
            TriggerError::Plan { source, .. } => source.kind(),
            TriggerError::Execution(err) => err.kind(),
            TriggerError::Join(_) => ErrorKind::Exception,
        }
    }
}
