// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging.
//!
//! This module provides centralized message types for all diagnostic and operational
//! logging throughout the pipeline, plus subscriber setup for the supervisor and for
//! per-invocation worker logs. Message types follow a struct-based pattern
//! with `Display` trait implementation to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Keep the human-readable line and the structured fields in one place
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::db` - table setup and busy retries
//! * `messages::engine` - supervisor lifecycle and invocation events
//! * `messages::lock` - named lock waits and reclaims
//! * `messages::planner` - plan construction and precheck
//! * `messages::recipe` - worker-side recipe events
//! * `messages::trigger` - raw tree scans
//!
//! # Usage
//!
//! ```rust
//! use apero::observability::messages::StructuredLog;
//! use apero::observability::messages::engine::InvocationFailed;
//!
//! let msg = InvocationFailed {
//!     pid: "PID-20240101120000000-00001",
//!     recipe: "apero_dark",
//!     kind: "exception",
//!     message: "boom",
//! };
//!
//! msg.log();
//! ```

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

pub mod messages;

fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// Uses the `RUST_LOG` env var if set, otherwise `level`. With `file`, lines
/// are appended there without ANSI colours instead of going to stderr. Calling
/// it twice leaves the first subscriber in place.
pub fn init_logging(level: &str, file: Option<&Path>) -> io::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false);

    let installed = match file {
        Some(path) => builder
            .with_writer(Mutex::new(open_log(path)?))
            .with_ansi(false)
            .try_init(),
        None => builder.with_writer(io::stderr).try_init(),
    };
    // Already initialized, typically by a test harness.
    let _ = installed;
    Ok(())
}

/// A dispatcher writing to one invocation's log file.
///
/// Workers run recipe bodies under it so each pid gets its own log, whether
/// the worker is a child process or a thread of the supervisor.
pub fn invocation_dispatch(level: &str, path: &Path) -> io::Result<Dispatch> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .with_writer(Mutex::new(open_log(path)?))
        .with_ansi(false)
        .finish();
    Ok(Dispatch::new(subscriber))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_invocation_log_is_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2021-07-01").join("PID-1.log");
        let dispatch = invocation_dispatch("info", &path).unwrap();

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(pid = "PID-1", "hello from the worker");
        });

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("hello from the worker"));
        assert!(!text.contains('\u{1b}'));
    }
}
