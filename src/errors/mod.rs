// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Error types for every subsystem plus the serialisable [`ErrorKind`] taxonomy.
//!
//! Subsystems raise their own typed errors. Anything that crosses the
//! worker/supervisor boundary is reduced to an `ErrorKind` tag and a message,
//! which is what the run-log stores and what the supervisor interprets.

mod calib;
mod config;
mod db;
mod execution;
mod fits;
mod lock;
mod plan;
mod recipe;
mod trigger;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use calib::CalibLookupError;
pub use config::ConfigError;
pub use db::DbError;
pub use execution::ExecutionError;
pub use fits::FitsError;
pub use lock::LockError;
pub use plan::PlanError;
pub use recipe::{RecipeArgError, RecipeError};
pub use trigger::TriggerError;

/// Kind tag carried by worker results and stored in the run-log `error_kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Arg,
    Io,
    Db,
    Lock,
    CalibLookup,
    QcFailed,
    Exception,
    Timeout,
    Killed,
    Cancelled,
    Upstream,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::Config,
        ErrorKind::Arg,
        ErrorKind::Io,
        ErrorKind::Db,
        ErrorKind::Lock,
        ErrorKind::CalibLookup,
        ErrorKind::QcFailed,
        ErrorKind::Exception,
        ErrorKind::Timeout,
        ErrorKind::Killed,
        ErrorKind::Cancelled,
        ErrorKind::Upstream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Arg => "arg",
            ErrorKind::Io => "io",
            ErrorKind::Db => "db",
            ErrorKind::Lock => "lock",
            ErrorKind::CalibLookup => "calib_lookup",
            ErrorKind::QcFailed => "qc_failed",
            ErrorKind::Exception => "exception",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Killed => "killed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Upstream => "upstream",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == value)
    }

    /// Forced interruptions never cascade as genuine failures.
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Killed | ErrorKind::Cancelled
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_round_trips_through_its_column_text() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("nope"), None);
    }

    #[test]
    fn test_error_kind_serde_matches_column_text() {
        let json = serde_json::to_string(&ErrorKind::CalibLookup).unwrap();
        assert_eq!(json, "\"calib_lookup\"");
    }

    #[test]
    fn test_interruptions() {
        assert!(ErrorKind::Timeout.is_interruption());
        assert!(ErrorKind::Killed.is_interruption());
        assert!(!ErrorKind::Exception.is_interruption());
        assert!(!ErrorKind::QcFailed.is_interruption());
    }
}
