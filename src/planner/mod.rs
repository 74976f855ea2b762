// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run-table planning.
//!
//! The planner expands each enabled run rule into invocations by querying the
//! file index for raw files the rule's recipe accepts, grouping them by the
//! recipe's grouping rule and binding each group to the recipe's arguments.
//! Inputs of derived types (pre-processed frames, extracted spectra) are bound
//! at the path their producer will write; an invocation whose derived input is
//! neither indexed nor produced elsewhere in the plan is dropped.
//!
//! Invocations are linked by three kinds of edge:
//! * **File**: an input path another invocation is predicted to write
//! * **Calibration**: a required key and fiber another invocation registers
//! * **Rule**: the run rule's `requires` list
//!
//! The result is ordered with Kahn's algorithm; among ready invocations the
//! lowest (priority, night, recipe) goes first. Cycles are reported with the
//! rules or invocations that form them.
//!
//! # Example
//!
//! ```rust,no_run
//! use apero::config::{Instrument, Profile, RunTable};
//! use apero::db::Databases;
//! use apero::lock::LockManager;
//! use apero::planner::Planner;
//! use apero::recipes::RecipeRegistry;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let profile = Profile::discover(None)?;
//! let paths = profile.paths();
//! let instrument = Instrument::builtin(&profile.instrument)?;
//! let registry = RecipeRegistry::builtin(&instrument);
//! let locks = LockManager::new(paths.locks.clone(), profile.lock.options());
//! let databases = Databases::open(&paths.db, &locks, profile.database.retry_policy())?;
//!
//! let table = RunTable::load(Path::new("configs/nightly-calibrations.yaml"))?;
//! let plan = Planner::new(&registry, &databases, &paths).plan(&table)?;
//! println!("{} invocations", plan.len());
//! # Ok(())
//! # }
//! ```

mod builder;
pub mod graph;
mod invocation;
mod plan;
mod precheck;


pub use builder::Planner;
pub use invocation::{night_mjd, Invocation, PredictedOutput};
pub use plan::{DroppedInvocation, Plan, UnboundRule};
pub use precheck::{precheck, MissingCalibration, PrecheckReport};
