// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

use super::{DbError, ErrorKind};

#[derive(Debug, Error)]
pub enum CalibLookupError {
    /// No row survived the (key, fiber, policy) filter.
    #[error("no {policy} {key} calibration for fiber {fiber} at MJD {time}")]
    NoCalibration {
        key: String,
        fiber: String,
        time: f64,
        policy: String,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}

impl CalibLookupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalibLookupError::NoCalibration { .. } => ErrorKind::CalibLookup,
            CalibLookupError::Db(err) => err.kind(),
        }
    }
}
