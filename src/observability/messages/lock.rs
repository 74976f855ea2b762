// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for the named cross-process lock.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// A lock was granted after waiting in its queue.
///
/// # Log Level
/// `debug!` - Frequent, only interesting when diagnosing contention
pub struct LockAcquired<'a> {
    pub name: &'a str,
    pub pid: u32,
    pub waited: Duration,
}

impl Display for LockAcquired<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Lock '{}' acquired by pid {} after {:?}",
            self.name, self.pid, self.waited
        )
    }
}

impl StructuredLog for LockAcquired<'_> {
    fn log(&self) {
        tracing::debug!(
            lock = self.name,
            pid = self.pid,
            waited_ms = self.waited.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("lock", span_name = name, lock = self.name, pid = self.pid)
    }
}

/// The active marker named a dead pid and the lock was taken over.
///
/// # Log Level
/// `warn!` - A previous holder crashed without releasing
pub struct LockStaleReclaimed<'a> {
    pub name: &'a str,
    pub dead_pid: u32,
    pub new_pid: u32,
}

impl Display for LockStaleReclaimed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Lock '{}' reclaimed from dead pid {} by pid {}",
            self.name, self.dead_pid, self.new_pid
        )
    }
}

impl StructuredLog for LockStaleReclaimed<'_> {
    fn log(&self) {
        tracing::warn!(
            lock = self.name,
            dead_pid = self.dead_pid,
            new_pid = self.new_pid,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "lock_stale",
            span_name = name,
            lock = self.name,
            dead_pid = self.dead_pid,
        )
    }
}

/// Queue tokens left behind by dead processes were purged.
///
/// # Log Level
/// `info!`
pub struct LockQueuePurged<'a> {
    pub name: &'a str,
    pub removed: usize,
}

impl Display for LockQueuePurged<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Removed {} dead queue token(s) from lock '{}'",
            self.removed, self.name
        )
    }
}

impl StructuredLog for LockQueuePurged<'_> {
    fn log(&self) {
        tracing::info!(lock = self.name, removed = self.removed, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!("lock_purge", span_name = name, lock = self.name)
    }
}

/// Waiting for a lock gave up.
///
/// # Log Level
/// `warn!`
pub struct LockTimedOut<'a> {
    pub name: &'a str,
    pub pid: u32,
    pub waited: Duration,
    pub queue_len: usize,
}

impl Display for LockTimedOut<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Gave up on lock '{}' after {:?} with {} token(s) queued",
            self.name, self.waited, self.queue_len
        )
    }
}

impl StructuredLog for LockTimedOut<'_> {
    fn log(&self) {
        tracing::warn!(
            lock = self.name,
            pid = self.pid,
            waited_ms = self.waited.as_millis() as u64,
            queue_len = self.queue_len,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("lock_timeout", span_name = name, lock = self.name)
    }
}
