// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod instrument;
mod keywords;
mod params;
mod profile;
mod registry;
mod run_table;
mod value;

#[cfg(test)]
mod integration_tests;
pub mod consts;

pub use instrument::Instrument;
pub use keywords::{CombineMethod, KeywordDescriptor, KeywordTable};
pub use params::{Layer, Parameter, ParameterResolver, ParameterSet, Provenance};
pub use profile::{
    DatabaseConfig, LockConfig, PathsConfig, Profile, ResolvedPaths, SchedulerConfig,
    TriggerConfig, ENV_PROFILE,
};
pub use registry::{ConstantDescriptor, ConstantRegistry};
pub use run_table::{RunRule, RunTable};
pub use value::{DataType, ParamValue};
