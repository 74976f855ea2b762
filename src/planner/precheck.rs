// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::plan::{DroppedInvocation, Plan, UnboundRule};
use crate::calib::{CalibLookup, USE_UNUSED_PARAM};
use crate::config::{Instrument, Profile};
use crate::db::Databases;
use crate::errors::{CalibLookupError, PlanError};
use crate::observability::messages::planner::PrecheckCompleted;
use crate::observability::messages::StructuredLog;
use crate::recipes::RecipeRegistry;

/// A required calibration nothing in the plan produces and the database lacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingCalibration {
    pub pid: String,
    pub recipe: String,
    pub night: String,
    pub key: String,
    pub fiber: Option<String>,
}

/// Dry-run summary of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct PrecheckReport {
    pub plan_id: String,
    pub invocations: usize,
    pub per_recipe: BTreeMap<String, usize>,
    pub nights: Vec<String>,
    pub required_disk_bytes: u64,
    pub missing_calibrations: Vec<MissingCalibration>,
    pub unbound: Vec<UnboundRule>,
    pub dropped: Vec<DroppedInvocation>,
}

impl PrecheckReport {
    /// Nothing would fail for want of inputs.
    pub fn is_clean(&self) -> bool {
        self.missing_calibrations.is_empty() && self.dropped.is_empty()
    }
}

impl fmt::Display for PrecheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plan {}: {} invocation(s)", self.plan_id, self.invocations)?;
        writeln!(f, "Nights: {}", self.nights.join(", "))?;
        for (recipe, count) in &self.per_recipe {
            writeln!(f, "  {recipe:<20} {count:>5}")?;
        }
        writeln!(
            f,
            "Estimated output: {:.1} MiB",
            self.required_disk_bytes as f64 / (1024.0 * 1024.0)
        )?;
        for missing in &self.missing_calibrations {
            writeln!(
                f,
                "MISSING {} (fiber {}) for {} {} on {}",
                missing.key,
                missing.fiber.as_deref().unwrap_or("-"),
                missing.recipe,
                missing.pid,
                missing.night
            )?;
        }
        for dropped in &self.dropped {
            writeln!(
                f,
                "DROPPED {} ({}) on {}: {} unavailable",
                dropped.recipe, dropped.rule_id, dropped.night, dropped.missing
            )?;
        }
        for rule in &self.unbound {
            writeln!(f, "UNBOUND {} ({}): {}", rule.rule_id, rule.recipe, rule.reason)?;
        }
        Ok(())
    }
}

/// Check a plan against the calibration databases without running anything.
///
/// A required calibration counts as available when an upstream invocation
/// produces it or a lookup at the invocation's match time succeeds.
pub fn precheck(
    plan: &Plan,
    registry: &RecipeRegistry,
    databases: &Databases,
    instrument: &Instrument,
    profile: &Profile,
) -> Result<PrecheckReport, PlanError> {
    let mut per_recipe: BTreeMap<String, usize> = BTreeMap::new();
    let mut missing_calibrations = Vec::new();
    let mut required_disk_bytes = 0;

    for invocation in &plan.invocations {
        *per_recipe.entry(invocation.recipe.clone()).or_default() += 1;
        required_disk_bytes += invocation.estimated_bytes;

        let recipe = registry
            .get(&invocation.recipe)
            .map_err(|_| PlanError::UnknownRecipe {
                rule_id: invocation.rule_id.clone(),
                recipe: invocation.recipe.clone(),
            })?;
        let params = invocation.resolve_params(instrument, profile)?;
        let lookup = CalibLookup::new(databases)
            .include_unused(params.get_bool(USE_UNUSED_PARAM).unwrap_or(false));

        for requirement in recipe.calibrations.iter().filter(|c| c.required) {
            let planned = invocation.upstream.iter().any(|pid| {
                plan.get(pid)
                    .and_then(|up| registry.get(&up.recipe).ok())
                    .map_or(false, |up| up.produces(requirement))
            });
            if planned {
                continue;
            }
            match lookup.find(&invocation.calib_query(requirement, &params)?) {
                Ok(_) => {}
                Err(CalibLookupError::NoCalibration { .. }) => {
                    missing_calibrations.push(MissingCalibration {
                        pid: invocation.pid.clone(),
                        recipe: invocation.recipe.clone(),
                        night: invocation.night.clone(),
                        key: requirement.key.clone(),
                        fiber: requirement.fiber.clone(),
                    });
                }
                Err(CalibLookupError::Db(err)) => return Err(PlanError::Db(err)),
            }
        }
    }

    let report = PrecheckReport {
        plan_id: plan.id.clone(),
        invocations: plan.len(),
        per_recipe,
        nights: plan.nights().into_iter().map(str::to_string).collect(),
        required_disk_bytes,
        missing_calibrations,
        unbound: plan.unbound.clone(),
        dropped: plan.dropped.clone(),
    };
    PrecheckCompleted {
        plan_id: &report.plan_id,
        invocations: report.invocations,
        missing_calibrations: report.missing_calibrations.len(),
        required_disk_bytes: report.required_disk_bytes,
    }
    .log();
    Ok(report)
}
