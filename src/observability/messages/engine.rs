// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the supervisor lifecycle and invocation events.
//!
//! This module contains message types for logging events related to:
//! * Supervisor start and run summaries
//! * Dispatch, skip and completion of invocations
//! * Worker termination on timeout or cancellation
//! * Output commits, their rollback and shutdown requests

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// The supervisor started executing a plan.
///
/// # Log Level
/// `info!` - Important operational event
///
/// # Example
/// ```
/// use apero::observability::messages::engine::SupervisorStarted;
///
/// let msg = SupervisorStarted {
///     plan_id: "PLAN-20240101120000000",
///     invocations: 12,
///     pool_size: 4,
///     launcher: "process",
/// };
///
/// tracing::info!("{}", msg);
/// ```
pub struct SupervisorStarted<'a> {
    pub plan_id: &'a str,
    pub invocations: usize,
    pub pool_size: usize,
    pub launcher: &'a str,
}

impl Display for SupervisorStarted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Executing plan {}: {} invocation(s), pool_size={}, launcher={}",
            self.plan_id, self.invocations, self.pool_size, self.launcher
        )
    }
}

impl StructuredLog for SupervisorStarted<'_> {
    fn log(&self) {
        tracing::info!(
            plan_id = self.plan_id,
            invocations = self.invocations,
            pool_size = self.pool_size,
            launcher = self.launcher,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "supervisor",
            span_name = name,
            plan_id = self.plan_id,
            invocations = self.invocations,
            pool_size = self.pool_size,
        )
    }
}

/// An invocation was handed to a worker.
///
/// # Log Level
/// `info!` - One per dispatched invocation
pub struct InvocationDispatched<'a> {
    pub pid: &'a str,
    pub recipe: &'a str,
    pub night: &'a str,
    pub calibrations: usize,
}

impl Display for InvocationDispatched<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Dispatched {} {} for night {} ({} calibration(s))",
            self.pid, self.recipe, self.night, self.calibrations
        )
    }
}

impl StructuredLog for InvocationDispatched<'_> {
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
            "invocation",
            span_name = name,
            pid = self.pid,
            recipe = self.recipe,
            night = self.night,
        )
    }
}

/// An invocation was finalized without running.
///
/// # Log Level
/// `info!` - Skips are expected on reprocessing
pub struct InvocationSkipped<'a> {
    pub pid: &'a str,
    pub recipe: &'a str,
    pub status: &'a str,
    pub reason: &'a str,
}

impl Display for InvocationSkipped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}: {}",
            self.pid, self.recipe, self.status, self.reason
        )
    }
}

impl StructuredLog for InvocationSkipped<'_> {
    fn log(&self) {
        tracing::info!(
            pid = self.pid,
            recipe = self.recipe,
            status = self.status,
            reason = self.reason,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("skip", span_name = name, pid = self.pid, status = self.status)
    }
}

/// An invocation reached a final status after running.
///
/// # Log Level
/// `info!` when passed, otherwise `warn!`
pub struct InvocationCompleted<'a> {
    pub pid: &'a str,
    pub recipe: &'a str,
    pub status: &'a str,
    pub duration: Duration,
}

impl Display for InvocationCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} finished {} in {:?}",
            self.pid, self.recipe, self.status, self.duration
        )
    }
}

impl StructuredLog for InvocationCompleted<'_> {
    fn log(&self) {
        if self.status == "passed" {
            tracing::info!(
                pid = self.pid,
                recipe = self.recipe,
                status = self.status,
                duration_ms = self.duration.as_millis() as u64,
                "{}", self
            );
        } else {
            tracing::warn!(
                pid = self.pid,
                recipe = self.recipe,
                status = self.status,
                duration_ms = self.duration.as_millis() as u64,
                "{}", self
            );
        }
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "invocation_completed",
            span_name = name,
            pid = self.pid,
            status = self.status,
            duration = ?self.duration,
        )
    }
}

/// An invocation failed.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct InvocationFailed<'a> {
    pub pid: &'a str,
    pub recipe: &'a str,
    pub kind: &'a str,
    pub message: &'a str,
}

impl Display for InvocationFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} {} failed ({}): {}",
            self.pid, self.recipe, self.kind, self.message
        )
    }
}

impl StructuredLog for InvocationFailed<'_> {
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
            "invocation_failed",
            span_name = name,
            pid = self.pid,
            kind = self.kind,
        )
    }
}

/// A worker was stopped before it returned.
///
/// # Log Level
/// `warn!` - Timeout or cancellation
pub struct WorkerTerminated<'a> {
    pub pid: &'a str,
    pub reason: &'a str,
    pub forced: bool,
}

impl Display for WorkerTerminated<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Worker for {} {} ({})",
            self.pid,
            if self.forced { "killed" } else { "terminated" },
            self.reason
        )
    }
}

impl StructuredLog for WorkerTerminated<'_> {
    fn log(&self) {
        tracing::warn!(
            pid = self.pid,
            reason = self.reason,
            forced = self.forced,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("worker_terminated", span_name = name, pid = self.pid)
    }
}

/// Staged products were moved into place and indexed.
///
/// # Log Level
/// `debug!` - One per committed invocation
pub struct OutputsCommitted<'a> {
    pub pid: &'a str,
    pub files: usize,
    pub calibrations: usize,
}

impl Display for OutputsCommitted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} committed {} file(s), {} calibration row(s)",
            self.pid, self.files, self.calibrations
        )
    }
}

impl StructuredLog for OutputsCommitted<'_> {
    fn log(&self) {
        tracing::debug!(
            pid = self.pid,
            files = self.files,
            calibrations = self.calibrations,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("commit", span_name = name, pid = self.pid)
    }
}

/// A commit failed part way and what it had written was taken back.
///
/// # Log Level
/// `warn!` - The invocation ends `failed`
pub struct CommitRolledBack<'a> {
    pub pid: &'a str,
    pub files: usize,
    pub calibrations: usize,
    pub error: &'a str,
}

impl Display for CommitRolledBack<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} commit rolled back after {} file(s), {} calibration row(s): {}",
            self.pid, self.files, self.calibrations, self.error
        )
    }
}

impl StructuredLog for CommitRolledBack<'_> {
    fn log(&self) {
        tracing::warn!(
            pid = self.pid,
            files = self.files,
            calibrations = self.calibrations,
            error = self.error,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("commit_rollback", span_name = name, pid = self.pid)
    }
}

/// Shutdown was requested.
///
/// # Log Level
/// `warn!` - In-flight work is drained or cancelled
pub struct ShutdownRequested<'a> {
    pub mode: &'a str,
    pub in_flight: usize,
}

impl Display for ShutdownRequested<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Shutdown requested ({}), {} invocation(s) in flight",
            self.mode, self.in_flight
        )
    }
}

impl StructuredLog for ShutdownRequested<'_> {
    fn log(&self) {
        tracing::warn!(mode = self.mode, in_flight = self.in_flight, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("shutdown", span_name = name, mode = self.mode)
    }
}

/// Run log rows left `running` by an earlier crash were finalized.
///
/// # Log Level
/// `warn!` - A previous supervisor died mid-run
pub struct DanglingRunsFinalized {
    pub count: usize,
}

impl Display for DanglingRunsFinalized {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Finalized {} dangling run log row(s) as cancelled", self.count)
    }
}

impl StructuredLog for DanglingRunsFinalized {
    fn log(&self) {
        tracing::warn!(count = self.count, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("dangling", span_name = name, count = self.count)
    }
}

/// A plan finished executing.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RunCompleted<'a> {
    pub plan_id: &'a str,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub duration: Duration,
}

impl Display for RunCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Plan {} completed in {:?}: {} passed, {} failed, {} skipped, {} cancelled",
            self.plan_id, self.duration, self.passed, self.failed, self.skipped, self.cancelled
        )
    }
}

impl StructuredLog for RunCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            plan_id = self.plan_id,
            passed = self.passed,
            failed = self.failed,
            skipped = self.skipped,
            cancelled = self.cancelled,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "run_completed",
            span_name = name,
            plan_id = self.plan_id,
            duration = ?self.duration,
        )
    }
}
