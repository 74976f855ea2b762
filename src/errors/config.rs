// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use thiserror::Error;

use super::ErrorKind;

/// Errors raised while loading profiles and resolving parameter sets.
///
/// `MissingKey` and `UnknownKey` are the key errors, `TypeMismatch`,
/// `InvalidOption` and `OutOfRange` the type errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required parameter '{key}' has no value in any layer")]
    MissingKey { key: String },

    #[error("unknown parameter '{key}' (from {source_name})")]
    UnknownKey { key: String, source_name: String },

    #[error("parameter '{key}' expects {expected}, got {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("parameter '{key}' value {value} is not one of [{options}]")]
    InvalidOption {
        key: String,
        value: String,
        options: String,
    },

    #[error("parameter '{key}' value {value} is outside [{min}, {max}]")]
    OutOfRange {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("keyword card '{card}' is declared by both '{first}' and '{second}'")]
    DuplicateCard {
        card: String,
        first: String,
        second: String,
    },

    #[error("constant '{name}' is declared twice")]
    DuplicateConstant { name: String },

    #[error("keyword '{key}' is not declared for instrument {instrument}")]
    UnknownKeyword { key: String, instrument: String },

    #[error("unknown instrument '{0}'")]
    UnknownInstrument(String),

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Io { .. } => ErrorKind::Io,
            _ => ErrorKind::Config,
        }
    }

    pub(crate) fn type_mismatch(key: &str, expected: impl ToString, found: impl ToString) -> Self {
        ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
