// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::clean_name;
use super::process::{current_pid, is_alive};
use crate::config::consts::{
    DEFAULT_LOCK_INITIAL_BACKOFF_MS, DEFAULT_LOCK_MAX_BACKOFF_MS, DEFAULT_LOCK_MAX_WAIT_SECS,
};
use crate::errors::LockError;
use crate::observability::messages::lock::{
    LockAcquired, LockQueuePurged, LockStaleReclaimed, LockTimedOut,
};
use crate::observability::messages::StructuredLog;

const QUEUE_DIR: &str = "queue";
const ACTIVE_MARKER: &str = "active";
const TOKEN_EXT: &str = "tok";

/// What to do when the active marker names a dead process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    #[default]
    Reclaim,
    Fail,
}

#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Timeout used by [`LockManager::lock`].
    pub max_wait: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub stale_policy: StalePolicy,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(DEFAULT_LOCK_MAX_WAIT_SECS),
            initial_backoff: Duration::from_millis(DEFAULT_LOCK_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_LOCK_MAX_BACKOFF_MS),
            stale_policy: StalePolicy::Reclaim,
        }
    }
}

struct Held {
    token: String,
    depth: usize,
}

struct Inner {
    root: PathBuf,
    options: LockOptions,
    held: Mutex<HashMap<(String, ThreadId), Held>>,
    counter: AtomicU64,
}

enum Marker {
    Absent,
    Held { pid: u32, token: String },
    /// Created but not yet written by its owner.
    Unreadable,
}

/// Handle to the lock root. Cheap to clone; clones share reentrancy state.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("root", &self.inner.root)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl LockManager {
    pub fn new(root: impl Into<PathBuf>, options: LockOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                options,
                held: Mutex::new(HashMap::new()),
                counter: AtomicU64::new(0),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn options(&self) -> &LockOptions {
        &self.inner.options
    }

    /// Acquire with the configured `max_wait`.
    pub fn lock(&self, name: &str) -> Result<LockGuard, LockError> {
        self.acquire(name, self.inner.options.max_wait)
    }

    /// Block until `name` is ours or `timeout` elapses.
    ///
    /// The guard must be dropped on the thread that acquired it.
    pub fn acquire(&self, name: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let name = clean_name(name);
        let key = (name.clone(), thread::current().id());

        if let Some(entry) = self.held().get_mut(&key) {
            entry.depth += 1;
            return Ok(LockGuard::new(self.clone(), name));
        }

        let token = self.wait_for_turn(&name, timeout)?;
        self.held().insert(key, Held { token, depth: 1 });
        Ok(LockGuard::new(self.clone(), name))
    }

    /// Acquire several locks in a global (sorted) order.
    pub fn acquire_all<S: AsRef<str>>(
        &self,
        names: &[S],
        timeout: Duration,
    ) -> Result<Vec<LockGuard>, LockError> {
        let mut ordered: Vec<String> = names.iter().map(|n| clean_name(n.as_ref())).collect();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for name in ordered {
            guards.push(self.acquire(&name, timeout)?);
        }
        Ok(guards)
    }

    /// Release one level of `name` held by the current thread.
    pub fn release(&self, name: &str) -> Result<(), LockError> {
        let name = clean_name(name);
        let key = (name.clone(), thread::current().id());

        let token = {
            let mut held = self.held();
            match held.get_mut(&key) {
                None => return Err(LockError::NotHeld { name }),
                Some(entry) if entry.depth > 1 => {
                    entry.depth -= 1;
                    return Ok(());
                }
                Some(_) => {}
            }
            match held.remove(&key) {
                Some(entry) => entry.token,
                None => return Err(LockError::NotHeld { name }),
            }
        };

        let dir = self.lock_dir(&name);
        remove_if_exists(&dir.join(ACTIVE_MARKER))?;
        remove_if_exists(&dir.join(QUEUE_DIR).join(token_file(&token)))?;
        Ok(())
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.lock_dir(&clean_name(name)).join(ACTIVE_MARKER).exists()
    }

    pub fn queue_len(&self, name: &str) -> Result<usize, LockError> {
        let queue = self.lock_dir(&clean_name(name)).join(QUEUE_DIR);
        if !queue.exists() {
            return Ok(0);
        }
        Ok(list_tokens(&queue)?.len())
    }

    /// Remove every lock directory. Only safe when nothing else is running.
    pub fn reset_all(&self) -> Result<usize, LockError> {
        let root = &self.inner.root;
        if !root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let entries = fs::read_dir(root).map_err(|e| LockError::io(root, e))?;
        for entry in entries {
            let path = entry.map_err(|e| LockError::io(root, e))?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(|e| LockError::io(&path, e))?;
                removed += 1;
            }
        }
        self.held().clear();
        Ok(removed)
    }

    fn held(&self) -> MutexGuard<'_, HashMap<(String, ThreadId), Held>> {
        self.inner
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_dir(&self, clean: &str) -> PathBuf {
        self.inner.root.join(clean)
    }

    fn wait_for_turn(&self, name: &str, timeout: Duration) -> Result<String, LockError> {
        let dir = self.lock_dir(name);
        let queue = dir.join(QUEUE_DIR);
        fs::create_dir_all(&queue).map_err(|e| LockError::io(&queue, e))?;

        let token = self.enqueue(&queue)?;
        let own_path = queue.join(token_file(&token));
        let started = Instant::now();
        let mut backoff = self.inner.options.initial_backoff;

        loop {
            match self.try_claim(name, &dir, &queue, &token) {
                Ok(true) => {
                    LockAcquired {
                        name,
                        pid: current_pid(),
                        waited: started.elapsed(),
                    }
                    .log();
                    return Ok(token);
                }
                Ok(false) => {}
                Err(err) => {
                    let _ = fs::remove_file(&own_path);
                    return Err(err);
                }
            }

            let waited = started.elapsed();
            if waited >= timeout {
                let _ = fs::remove_file(&own_path);
                let queue_len = list_tokens(&queue).map(|t| t.len()).unwrap_or(0);
                LockTimedOut {
                    name,
                    pid: current_pid(),
                    waited,
                    queue_len,
                }
                .log();
                return Err(LockError::Timeout {
                    name: name.to_string(),
                    waited,
                });
            }

            thread::sleep(backoff.min(timeout - waited));
            backoff = (backoff * 2).min(self.inner.options.max_backoff);
        }
    }

    fn enqueue(&self, queue: &Path) -> Result<String, LockError> {
        let pid = current_pid();
        loop {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            let seq = self.inner.counter.fetch_add(1, Ordering::Relaxed);
            let token = format!("{nanos:020}-{pid:010}-{seq:08}");
            let path = queue.join(token_file(&token));

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{pid}").map_err(|e| LockError::io(&path, e))?;
                    return Ok(token);
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => continue,
                Err(e) => return Err(LockError::io(&path, e)),
            }
        }
    }

    fn try_claim(
        &self,
        name: &str,
        dir: &Path,
        queue: &Path,
        token: &str,
    ) -> Result<bool, LockError> {
        let marker = dir.join(ACTIVE_MARKER);

        match read_marker(&marker)? {
            Marker::Absent => {}
            Marker::Unreadable => return Ok(false),
            Marker::Held { token: active, .. } if active == token => return Ok(true),
            Marker::Held { pid, token: active } => {
                if is_alive(pid) {
                    return Ok(false);
                }
                match self.inner.options.stale_policy {
                    StalePolicy::Fail => {
                        return Err(LockError::Stale {
                            name: name.to_string(),
                            pid,
                        })
                    }
                    StalePolicy::Reclaim => {
                        remove_if_exists(&marker)?;
                        remove_if_exists(&queue.join(token_file(&active)))?;
                        LockStaleReclaimed {
                            name,
                            dead_pid: pid,
                            new_pid: current_pid(),
                        }
                        .log();
                    }
                }
            }
        }

        let tokens = purge_dead_tokens(name, queue, token)?;
        if tokens.first().map(String::as_str) != Some(token) {
            return Ok(false);
        }

        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(mut file) => {
                write!(file, "{}\n{}\n", current_pid(), token)
                    .map_err(|e| LockError::io(&marker, e))?;
                Ok(true)
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(LockError::io(&marker, e)),
        }
    }
}

/// Releases its lock level when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    manager: LockManager,
    name: String,
    released: bool,
}

impl LockGuard {
    fn new(manager: LockManager, name: String) -> Self {
        Self {
            manager,
            name,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release explicitly and observe the result.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.manager.release(&self.name)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.manager.release(&self.name) {
            tracing::warn!(lock = %self.name, error = %err, "failed to release lock on drop");
        }
    }
}

fn token_file(token: &str) -> String {
    format!("{token}.{TOKEN_EXT}")
}

fn token_pid(token: &str) -> Option<u32> {
    token.split('-').nth(1)?.parse().ok()
}

fn list_tokens(queue: &Path) -> Result<Vec<String>, LockError> {
    let entries = fs::read_dir(queue).map_err(|e| LockError::io(queue, e))?;
    let mut tokens = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| LockError::io(queue, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TOKEN_EXT) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            tokens.push(stem.to_string());
        }
    }
    tokens.sort();
    Ok(tokens)
}

fn purge_dead_tokens(name: &str, queue: &Path, own: &str) -> Result<Vec<String>, LockError> {
    let mut alive = Vec::new();
    let mut removed = 0;
    for token in list_tokens(queue)? {
        let dead = token != own && token_pid(&token).map_or(false, |pid| !is_alive(pid));
        if dead {
            remove_if_exists(&queue.join(token_file(&token)))?;
            removed += 1;
        } else {
            alive.push(token);
        }
    }
    if removed > 0 {
        LockQueuePurged { name, removed }.log();
    }
    Ok(alive)
}

fn read_marker(marker: &Path) -> Result<Marker, LockError> {
    let content = match fs::read_to_string(marker) {
        Ok(content) => content,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Marker::Absent),
        Err(e) => return Err(LockError::io(marker, e)),
    };
    let mut lines = content.lines();
    let pid = lines.next().and_then(|l| l.trim().parse::<u32>().ok());
    let token = lines.next().map(|l| l.trim().to_string());
    Ok(match (pid, token) {
        (Some(pid), Some(token)) if !token.is_empty() => Marker::Held { pid, token },
        _ => Marker::Unreadable,
    })
}

fn remove_if_exists(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(LockError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DEAD_PID: u32 = i32::MAX as u32;

    fn manager(dir: &TempDir, policy: StalePolicy) -> LockManager {
        LockManager::new(
            dir.path(),
            LockOptions {
                max_wait: Duration::from_secs(5),
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(10),
                stale_policy: policy,
            },
        )
    }

    fn plant_stale_holder(dir: &TempDir, name: &str) {
        let lock_dir = dir.path().join(name);
        fs::create_dir_all(lock_dir.join(QUEUE_DIR)).unwrap();
        let token = format!("{:020}-{:010}-{:08}", 1, DEAD_PID, 0);
        fs::write(lock_dir.join(QUEUE_DIR).join(token_file(&token)), "x").unwrap();
        fs::write(lock_dir.join(ACTIVE_MARKER), format!("{DEAD_PID}\n{token}\n")).unwrap();
    }

    #[test]
    fn test_acquire_and_release_clean_up_marker_and_token() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir, StalePolicy::Reclaim);

        let guard = locks.lock("index").unwrap();
        assert!(locks.is_locked("index"));
        assert_eq!(locks.queue_len("index").unwrap(), 1);

        guard.release().unwrap();
        assert!(!locks.is_locked("index"));
        assert_eq!(locks.queue_len("index").unwrap(), 0);
    }

    #[test]
    fn test_lock_is_reentrant_for_the_holding_thread() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir, StalePolicy::Reclaim);

        let outer = locks.lock("runlog").unwrap();
        let inner = locks.lock("runlog").unwrap();
        assert_eq!(locks.queue_len("runlog").unwrap(), 1);

        drop(inner);
        assert!(locks.is_locked("runlog"));
        drop(outer);
        assert!(!locks.is_locked("runlog"));
    }

    #[test]
    fn test_waiter_times_out_and_leaves_no_token() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir, StalePolicy::Reclaim);
        let _held = locks.lock("calib").unwrap();

        let other = locks.clone();
        let result = thread::spawn(move || {
            other
                .acquire("calib", Duration::from_millis(80))
                .map(|_| ())
        })
        .join()
        .unwrap();

        match result {
            Err(LockError::Timeout { name, waited }) => {
                assert_eq!(name, "calib");
                assert!(waited >= Duration::from_millis(80));
            }
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
        assert_eq!(locks.queue_len("calib").unwrap(), 1);
    }

    #[test]
    fn test_stale_holder_is_reclaimed_by_default() {
        let dir = TempDir::new().unwrap();
        plant_stale_holder(&dir, "tellu");
        let locks = manager(&dir, StalePolicy::Reclaim);

        let guard = locks.acquire("tellu", Duration::from_secs(1)).unwrap();
        assert!(locks.is_locked("tellu"));
        assert_eq!(locks.queue_len("tellu").unwrap(), 1);
        drop(guard);
        assert_eq!(locks.queue_len("tellu").unwrap(), 0);
    }

    #[test]
    fn test_stale_holder_fails_under_fail_policy() {
        let dir = TempDir::new().unwrap();
        plant_stale_holder(&dir, "tellu");
        let locks = manager(&dir, StalePolicy::Fail);

        match locks.acquire("tellu", Duration::from_secs(1)) {
            Err(LockError::Stale { pid, .. }) => assert_eq!(pid, DEAD_PID),
            other => panic!("expected stale error, got {:?}", other.map(|_| ())),
        }
        // our own token was withdrawn, the dead one is left for inspection
        assert_eq!(locks.queue_len("tellu").unwrap(), 1);
    }

    #[test]
    fn test_dead_waiters_are_purged_from_the_queue() {
        let dir = TempDir::new().unwrap();
        let queue = dir.path().join("index").join(QUEUE_DIR);
        fs::create_dir_all(&queue).unwrap();
        let dead = format!("{:020}-{:010}-{:08}", 1, DEAD_PID, 0);
        fs::write(queue.join(token_file(&dead)), "x").unwrap();

        let locks = manager(&dir, StalePolicy::Reclaim);
        let _guard = locks.acquire("index", Duration::from_secs(1)).unwrap();
        assert_eq!(locks.queue_len("index").unwrap(), 1);
    }

    #[test]
    fn test_threads_are_serialized() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir, StalePolicy::Reclaim);
        let counter = dir.path().join("counter.txt");
        fs::write(&counter, "0").unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let _guard = locks.lock("counter").unwrap();
                        let value: u32 = fs::read_to_string(&counter).unwrap().parse().unwrap();
                        fs::write(&counter, (value + 1).to_string()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fs::read_to_string(&counter).unwrap(), "100");
    }

    #[test]
    fn test_acquire_all_orders_and_dedups() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir, StalePolicy::Reclaim);
        let guards = locks
            .acquire_all(&["runlog", "index", "runlog"], Duration::from_secs(1))
            .unwrap();
        let names: Vec<&str> = guards.iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["index", "runlog"]);
    }

    #[test]
    fn test_release_without_holding_is_an_error() {
        let dir = TempDir::new().unwrap();
        let locks = manager(&dir, StalePolicy::Reclaim);
        assert!(matches!(
            locks.release("nothing"),
            Err(LockError::NotHeld { .. })
        ));
    }
}
