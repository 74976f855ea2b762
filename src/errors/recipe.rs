// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

use super::{CalibLookupError, ConfigError, DbError, ErrorKind, FitsError};

/// Argument bundle rejected by a recipe's argument schema.
///
/// Always raised before the recipe touches the filesystem.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecipeArgError {
    #[error("recipe {recipe}: unknown argument '{arg}'")]
    Unknown { recipe: String, arg: String },

    #[error("recipe {recipe}: missing required argument '{arg}'")]
    Missing { recipe: String, arg: String },

    #[error("recipe {recipe}: argument '{arg}' expects {expected}")]
    WrongKind {
        recipe: String,
        arg: String,
        expected: String,
    },

    #[error("recipe {recipe}: argument '{arg}' takes {expected} value(s), got {found}")]
    Multiplicity {
        recipe: String,
        arg: String,
        expected: String,
        found: usize,
    },

    #[error("recipe {recipe}: file {file} ({dprtype}) is not accepted by argument '{arg}'")]
    Filtered {
        recipe: String,
        arg: String,
        file: String,
        dprtype: String,
    },

    #[error("recipe {recipe}: too many positional arguments ({found})")]
    TooManyPositional { recipe: String, found: usize },

    #[error("unknown recipe '{0}'")]
    UnknownRecipe(String),
}

/// Error returned from a recipe body, tagged with the taxonomy kind it maps to.
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error(transparent)]
    Arg(#[from] RecipeArgError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Calib(#[from] CalibLookupError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Exception(String),

    #[error("cancelled")]
    Cancelled,
}

impl RecipeError {
    pub fn exception(message: impl Into<String>) -> Self {
        RecipeError::Exception(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RecipeError::Arg(_) => ErrorKind::Arg,
            RecipeError::Config(err) => err.kind(),
            RecipeError::Calib(err) => err.kind(),
            RecipeError::Db(err) => err.kind(),
            RecipeError::Fits(err) => err.kind(),
            RecipeError::Io(_) => ErrorKind::Io,
            RecipeError::Exception(_) => ErrorKind::Exception,
            RecipeError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_error_kinds() {
        let arg = RecipeError::from(RecipeArgError::Missing {
            recipe: "apero_dark".into(),
            arg: "files".into(),
        });
        assert_eq!(arg.kind(), ErrorKind::Arg);

        let calib = RecipeError::from(CalibLookupError::NoCalibration {
            key: "WAVE".into(),
            fiber: "AB".into(),
            time: 58000.0,
            policy: "older".into(),
        });
        assert_eq!(calib.kind(), ErrorKind::CalibLookup);

        let io = RecipeError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.kind(), ErrorKind::Io);

        assert_eq!(RecipeError::exception("boom").kind(), ErrorKind::Exception);
        assert_eq!(RecipeError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
