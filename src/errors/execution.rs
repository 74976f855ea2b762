// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use thiserror::Error;

use super::{DbError, ErrorKind, FitsError, LockError};

/// Supervisor-side failures while dispatching or finalizing invocations.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error("staged output {path} is missing or unreadable: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("staged output {filename} does not carry the header of {expected}")]
    ContractViolation { filename: String, expected: String },

    #[error("invocation '{0}' is not part of the plan")]
    UnknownInvocation(String),

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("supervisor task failed: {0}")]
    Join(String),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Db(err) => err.kind(),
            ExecutionError::Lock(err) => err.kind(),
            ExecutionError::Fits(err) => err.kind(),
            ExecutionError::Staging { .. } => ErrorKind::Io,
            _ => ErrorKind::Exception,
        }
    }
}
