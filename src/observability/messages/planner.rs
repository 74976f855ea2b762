// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for plan construction and precheck.
//!
//! This module contains message types for logging events related to:
//! * Candidate selection from the file index
//! * Invocations dropped for unproducible inputs
//! * Rule and invocation cycles
//! * Plan and precheck summaries

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A plan was built and topologically ordered.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use apero::observability::messages::planner::PlanBuilt;
///
/// let msg = PlanBuilt {
///     plan_id: "PLAN-20240101120000000",
///     invocations: 12,
///     nights: 2,
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct PlanBuilt<'a> {
    pub plan_id: &'a str,
    pub invocations: usize,
    pub nights: usize,
}

impl Display for PlanBuilt<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Plan {} built: {} invocation(s) over {} night(s)",
            self.plan_id, self.invocations, self.nights
        )
    }
}

impl StructuredLog for PlanBuilt<'_> {
    fn log(&self) {
        tracing::info!(
            plan_id = self.plan_id,
            invocations = self.invocations,
            nights = self.nights,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "plan",
            span_name = name,
            plan_id = self.plan_id,
            invocations = self.invocations,
        )
    }
}

/// A run rule matched no candidate files.
///
/// # Log Level
/// `warn!` - Usually a night or object filter that excludes everything
pub struct RuleUnbound<'a> {
    pub rule_id: &'a str,
    pub recipe: &'a str,
    pub reason: &'a str,
}

impl Display for RuleUnbound<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Rule '{}' ({}) bound no invocations: {}",
            self.rule_id, self.recipe, self.reason
        )
    }
}

impl StructuredLog for RuleUnbound<'_> {
    fn log(&self) {
        tracing::warn!(
            rule_id = self.rule_id,
            recipe = self.recipe,
            reason = self.reason,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "rule_unbound",
            span_name = name,
            rule_id = self.rule_id,
            recipe = self.recipe
        )
    }
}

/// A candidate file was left out of a rule.
///
/// # Log Level
/// `debug!` - One per rejected or filtered file
pub struct CandidateSkipped<'a> {
    pub rule_id: &'a str,
    pub filename: &'a str,
    pub reason: &'a str,
}

impl Display for CandidateSkipped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Rule '{}' skipped {}: {}",
            self.rule_id, self.filename, self.reason
        )
    }
}

impl StructuredLog for CandidateSkipped<'_> {
    fn log(&self) {
        tracing::debug!(
            rule_id = self.rule_id,
            filename = self.filename,
            reason = self.reason,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("candidate", span_name = name, filename = self.filename)
    }
}

/// An invocation needs an input that neither exists nor is produced in the plan.
///
/// # Log Level
/// `warn!` - The product will be missing from this run
pub struct InvocationDropped<'a> {
    pub recipe: &'a str,
    pub night: &'a str,
    pub missing: &'a str,
}

impl Display for InvocationDropped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Dropped {} for night {}: input {} is neither indexed nor planned",
            self.recipe, self.night, self.missing
        )
    }
}

impl StructuredLog for InvocationDropped<'_> {
    fn log(&self) {
        tracing::warn!(
            recipe = self.recipe,
            night = self.night,
            missing = self.missing,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "invocation_dropped",
            span_name = name,
            recipe = self.recipe,
            night = self.night
        )
    }
}

/// The rule graph contains a cycle.
///
/// # Log Level
/// `error!` - The plan is rejected
pub struct CycleDetected<'a> {
    pub cycle: &'a [String],
}

impl Display for CycleDetected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Cyclic dependency detected: {}", self.cycle.join(" -> "))
    }
}

impl StructuredLog for CycleDetected<'_> {
    fn log(&self) {
        tracing::error!(
            cycle = self.cycle.join(" -> "),
            cycle_length = self.cycle.len(),
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "cycle",
            span_name = name,
            cycle = self.cycle.join(" -> "),
        )
    }
}

/// Precheck finished.
///
/// # Log Level
/// `info!` - Summary of a dry run
pub struct PrecheckCompleted<'a> {
    pub plan_id: &'a str,
    pub invocations: usize,
    pub missing_calibrations: usize,
    pub required_disk_bytes: u64,
}

impl Display for PrecheckCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Precheck of {}: {} invocation(s), {} missing calibration(s), ~{} MiB required",
            self.plan_id,
            self.invocations,
            self.missing_calibrations,
            self.required_disk_bytes / (1024 * 1024)
        )
    }
}

impl StructuredLog for PrecheckCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            plan_id = self.plan_id,
            invocations = self.invocations,
            missing_calibrations = self.missing_calibrations,
            required_disk_bytes = self.required_disk_bytes,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("precheck", span_name = name, plan_id = self.plan_id)
    }
}
