// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Recipes: argument schemas, the execution context and the registry.
//!
//! A recipe declares its arguments, the calibrations it looks up and the
//! products it writes. The planner binds arguments from the file index; the
//! engine validates them again in the worker before the body runs.

pub mod args;
pub mod builtin;
mod context;
pub mod qc;
mod recipe;
mod registry;

pub use args::{
    validate, ArgBundle, ArgKind, ArgSpec, ArgValue, Multiplicity, RawArgs, OBS_DIR_ARG,
};
pub use context::{ContextSetup, RecipeContext, RecipeOutcome, StagedOutput};
pub use qc::{QcCheck, QcSet};
pub use recipe::{CalibRequirement, Grouping, Recipe};
pub use registry::RecipeRegistry;
