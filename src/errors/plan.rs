// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

use super::{ConfigError, DbError, ErrorKind, RecipeArgError};

/// Errors that stop a run table from becoming a plan.
#[derive(Debug)]
pub enum PlanError {
    /// The invocation graph contains a cycle
    Cycle {
        /// Invocation labels along the cycle, first label repeated at the end
        cycle: Vec<String>,
    },
    /// A run rule names a recipe the registry does not know
    UnknownRecipe { rule_id: String, recipe: String },
    /// A run rule requires another rule id that is not in the table
    UnknownRule { rule_id: String, missing: String },
    /// Two run rules share an id
    DuplicateRule { rule_id: String },
    /// The planner produced a binding the recipe rejects
    Binding { rule_id: String, source: RecipeArgError },
    /// A rule's parameter overrides do not resolve
    Config(ConfigError),
    /// Reading the index or reject tables failed
    Db(DbError),
}

impl PlanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::Db(err) => err.kind(),
            PlanError::Config(err) => err.kind(),
            PlanError::Binding { .. } => ErrorKind::Arg,
            _ => ErrorKind::Config,
        }
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::Cycle { cycle } => {
                write!(f, "Dependency cycle in plan: {}", cycle.join(" -> "))
            }
            PlanError::UnknownRecipe { rule_id, recipe } => {
                write!(f, "Run rule '{}' names unknown recipe '{}'", rule_id, recipe)
            }
            PlanError::UnknownRule { rule_id, missing } => {
                write!(f, "Run rule '{}' requires rule '{}' which does not exist", rule_id, missing)
            }
            PlanError::DuplicateRule { rule_id } => {
                write!(f, "Duplicate run rule id: '{}'", rule_id)
            }
            PlanError::Binding { rule_id, source } => {
                write!(f, "Run rule '{}' produced an invalid binding: {}", rule_id, source)
            }
            PlanError::Config(err) => write!(f, "Planner configuration error: {}", err),
            PlanError::Db(err) => write!(f, "Planner database error: {}", err),
        }
    }
}

impl std::error::Error for PlanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlanError::Binding { source, .. } => Some(source),
            PlanError::Config(err) => Some(err),
            PlanError::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for PlanError {
    fn from(err: ConfigError) -> Self {
        PlanError::Config(err)
    }
}

impl From<DbError> for PlanError {
    fn from(err: DbError) -> Self {
        PlanError::Db(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_joins_path() {
        let err = PlanError::Cycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle in plan: a -> b -> a");
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
