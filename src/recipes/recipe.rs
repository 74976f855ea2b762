// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::args::{self, ArgBundle, ArgKind, ArgSpec};
use crate::calib::MatchPolicy;
use crate::errors::RecipeArgError;
use crate::files::{BoundFile, DrsFileSpec, FileKind};
use crate::traits::RecipeMain;

/// How the planner groups matching files into invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// One invocation per night with every matching file.
    #[default]
    PerNight,
    /// One invocation per (night, object).
    PerObject,
    /// One invocation per (night, fiber).
    PerFiberSet,
    /// One invocation per file.
    PerFile,
    /// One invocation over every night.
    All,
}

impl Grouping {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grouping::PerNight => "per_night",
            Grouping::PerObject => "per_object",
            Grouping::PerFiberSet => "per_fiber_set",
            Grouping::PerFile => "per_file",
            Grouping::All => "all",
        }
    }

    /// Group key of `file`. Keys sort in night order.
    pub fn key(&self, file: &BoundFile) -> String {
        match self {
            Grouping::PerNight => file.night.clone(),
            Grouping::PerObject => format!(
                "{}/{}",
                file.night,
                file.object.as_deref().unwrap_or("-")
            ),
            Grouping::PerFiberSet => {
                format!("{}/{}", file.night, file.fiber.as_deref().unwrap_or("-"))
            }
            Grouping::PerFile => format!("{}/{}", file.night, file.filename),
            Grouping::All => "all".to_string(),
        }
    }

    pub fn spans_nights(&self) -> bool {
        matches!(self, Grouping::All)
    }
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A calibration a recipe looks up before it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibRequirement {
    pub key: String,
    pub fiber: Option<String>,
    /// `None` uses the profile's match policy for the database.
    pub policy: Option<MatchPolicy>,
    pub db: FileKind,
    /// A missing optional calibration is simply not stamped.
    pub required: bool,
    /// telluDB rows are restricted to the invocation's object.
    pub per_object: bool,
}

impl CalibRequirement {
    pub fn calib(key: &str, fiber: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            fiber: fiber.map(str::to_string),
            policy: None,
            db: FileKind::Calibration,
            required: true,
            per_object: false,
        }
    }

    pub fn telluric(key: &str, fiber: Option<&str>, per_object: bool) -> Self {
        Self {
            db: FileKind::Telluric,
            per_object,
            ..Self::calib(key, fiber)
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Whether an output of type `spec` satisfies this requirement.
    pub fn satisfied_by(&self, spec: &DrsFileSpec) -> bool {
        spec.kind == self.db
            && spec.calib_key.as_deref() == Some(self.key.as_str())
            && spec.fiber == self.fiber
    }
}

/// A recipe: argument schema, calibration needs, products and its body.
#[derive(Clone)]
pub struct Recipe {
    pub name: String,
    pub instrument: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
    pub calibrations: Vec<CalibRequirement>,
    pub outputs: Vec<Arc<DrsFileSpec>>,
    pub grouping: Grouping,
    /// Lower runs first among ready invocations.
    pub priority: i32,
    pub wall_time: Option<Duration>,
    pub memory_mb: Option<u64>,
    main: Arc<dyn RecipeMain>,
}

impl Recipe {
    pub fn new(name: &str, instrument: &str, main: impl RecipeMain + 'static) -> Self {
        Self {
            name: name.to_string(),
            instrument: instrument.to_string(),
            description: String::new(),
            args: vec![],
            calibrations: vec![],
            outputs: vec![],
            grouping: Grouping::PerNight,
            priority: 0,
            wall_time: None,
            memory_mb: None,
            main: Arc::new(main),
        }
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn calibration(mut self, requirement: CalibRequirement) -> Self {
        self.calibrations.push(requirement);
        self
    }

    pub fn output(mut self, spec: Arc<DrsFileSpec>) -> Self {
        self.outputs.push(spec);
        self
    }

    pub fn grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn wall_time(mut self, wall_time: Duration) -> Self {
        self.wall_time = Some(wall_time);
        self
    }

    pub fn memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn main(&self) -> &dyn RecipeMain {
        self.main.as_ref()
    }

    /// Validate a bundle against the schema; fails before any file is opened.
    pub fn bind(&self, bundle: ArgBundle) -> Result<ArgBundle, RecipeArgError> {
        args::validate(&self.name, &self.args, bundle)
    }

    pub fn file_args(&self) -> impl Iterator<Item = &ArgSpec> {
        self.args.iter().filter(|a| a.kind == ArgKind::Files)
    }

    /// The file argument that drives grouping.
    pub fn primary_file_arg(&self) -> Option<&ArgSpec> {
        self.file_args().next()
    }

    pub fn output_spec(&self, name: &str) -> Option<&Arc<DrsFileSpec>> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn produces(&self, requirement: &CalibRequirement) -> bool {
        self.outputs.iter().any(|o| requirement.satisfied_by(o))
    }

    /// Whether the recipe takes the observation directory argument.
    pub fn takes_directory(&self) -> bool {
        self.args.iter().any(|a| a.kind == ArgKind::Directory)
    }
}

impl fmt::Debug for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe")
            .field("name", &self.name)
            .field("instrument", &self.instrument)
            .field("args", &self.args.iter().map(|a| &a.name).collect::<Vec<_>>())
            .field(
                "calibrations",
                &self.calibrations.iter().map(|c| &c.key).collect::<Vec<_>>(),
            )
            .field("outputs", &self.outputs.iter().map(|o| &o.name).collect::<Vec<_>>())
            .field("grouping", &self.grouping)
            .field("priority", &self.priority)
            .finish()
    }
}
