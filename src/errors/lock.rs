// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::ErrorKind;

/// Errors raised by the named cross-process lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The caller's token never reached the head of the queue in time.
    #[error("timed out after {waited:?} waiting for lock '{name}'")]
    Timeout { name: String, waited: Duration },

    /// The active marker names a process that no longer exists.
    #[error("lock '{name}' is held by dead process {pid}")]
    Stale { name: String, pid: u32 },

    #[error("lock '{name}' was released by a thread that does not hold it")]
    NotHeld { name: String },

    #[error("lock filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::Io { .. } => ErrorKind::Io,
            _ => ErrorKind::Lock,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LockError::Io {
            path: path.into(),
            source,
        }
    }
}
