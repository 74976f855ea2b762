// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types emitted inside a worker while a recipe body runs.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// A recipe body is about to run.
///
/// # Log Level
/// `info!` - First line of every per-invocation log
pub struct RecipeStarted<'a> {
    pub pid: &'a str,
    pub recipe: &'a str,
    pub night: &'a str,
    pub calibrations: usize,
}

impl Display for RecipeStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} started for night {} with {} calibration(s)",
            self.pid, self.recipe, self.night, self.calibrations
        )
    }
}

impl StructuredLog for RecipeStarted<'_> {
    fn log(&self) {
        tracing::info!(
            pid = self.pid,
            recipe = self.recipe,
            night = self.night,
            calibrations = self.calibrations,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "recipe",
            span_name = name,
            pid = self.pid,
            recipe = self.recipe,
            night = self.night,
        )
    }
}

/// A recipe body returned and its products are staged.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RecipeFinished<'a> {
    pub pid: &'a str,
    pub recipe: &'a str,
    pub outputs: usize,
    pub qc_passed: bool,
    pub duration: Duration,
}

impl Display for RecipeFinished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} finished in {:?}: {} output(s), qc {}",
            self.pid,
            self.recipe,
            self.duration,
            self.outputs,
            if self.qc_passed { "passed" } else { "failed" }
        )
    }
}

impl StructuredLog for RecipeFinished<'_> {
    fn log(&self) {
        tracing::info!(
            pid = self.pid,
            recipe = self.recipe,
            outputs = self.outputs,
            qc_passed = self.qc_passed,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "recipe_finished",
            span_name = name,
            pid = self.pid,
            recipe = self.recipe,
        )
    }
}

/// Quality control rejected an invocation's products.
///
/// # Log Level
/// `warn!` - Products are kept but not used as calibrations
pub struct QcFailed<'a> {
    pub pid: &'a str,
    pub recipe: &'a str,
    pub summary: &'a str,
}

impl Display for QcFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} failed quality control: {}",
            self.pid, self.recipe, self.summary
        )
    }
}

impl StructuredLog for QcFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            pid = self.pid,
            recipe = self.recipe,
            summary = self.summary,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("qc_failed", span_name = name, pid = self.pid)
    }
}

/// A recipe body returned an error or panicked.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct RecipeFailed<'a> {
    pub pid: &'a str,
    pub recipe: &'a str,
    pub kind: &'a str,
    pub message: &'a str,
}

impl Display for RecipeFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} failed ({}): {}",
            self.pid, self.recipe, self.kind, self.message
        )
    }
}

impl StructuredLog for RecipeFailed<'_> {
    fn log(&self) {
        tracing::error!(
            pid = self.pid,
            recipe = self.recipe,
            kind = self.kind,
            message = self.message,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "recipe_failed",
            span_name = name,
            pid = self.pid,
            kind = self.kind
        )
    }
}
