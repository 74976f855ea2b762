// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use thiserror::Error;

use super::ErrorKind;

#[derive(Debug, Error)]
pub enum FitsError {
    #[error("{path} is not a FITS file: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("card '{key}' does not fit in 80 characters")]
    CardTooLong { key: String },

    #[error("FITS i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FitsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FitsError::CardTooLong { .. } => ErrorKind::Exception,
            _ => ErrorKind::Io,
        }
    }
}
