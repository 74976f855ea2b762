// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for human-readable output and
//! [`StructuredLog`] to emit the same event with structured `tracing` fields
//! at its documented level.
//!
//! # Organization
//!
//! * `db` - table retries and schema setup
//! * `engine` - supervisor lifecycle, dispatch and finalization
//! * `lock` - queue waits, stale holders, timeouts
//! * `planner` - plan construction and precheck
//! * `recipe` - worker-side recipe events
//! * `trigger` - raw tree scans and night submission
//!
//! # Usage Pattern
//!
//! ```rust
//! use apero::observability::messages::StructuredLog;
//! use apero::observability::messages::planner::PlanBuilt;
//!
//! let msg = PlanBuilt {
//!     plan_id: "PLAN-20240101120000000",
//!     invocations: 12,
//!     nights: 2,
//! };
//!
//! msg.log();
//! ```

use tracing::Span;

pub mod db;
pub mod engine;
pub mod lock;
pub mod planner;
pub mod recipe;
pub mod trigger;

/// A log message that knows its own level and structured fields.
pub trait StructuredLog {
    /// Emit the message as a `tracing` event.
    fn log(&self);

    /// Open a span carrying the message's fields.
    fn span(&self, name: &str) -> Span;
}
