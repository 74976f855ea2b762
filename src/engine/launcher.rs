// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! [`WorkerLauncher`] implementations.
//!
//! * [`ProcessLauncher`] starts `apero worker --spec <scratch>/spec.json`, one
//!   child process per invocation, and reads `result.json` after it exits.
//! * [`InProcessLauncher`] runs the worker on the blocking thread pool of the
//!   supervisor's runtime. Used by tests and by `--in-process` runs.
//!
//! Both stop a worker that outlives its wall time or whose cancellation token
//! fires. The process launcher sends SIGTERM and kills after `kill_after`; the
//! in-process launcher raises the recipe's cancel flag and abandons the thread
//! if the body does not return within `kill_after`.
//!
//! Child workers run in their own process group, so a terminal Ctrl-C reaches
//! only the supervisor. A cancelled child that drains and writes its own
//! result keeps that result.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{output_tail, WorkerResult, WorkerSpec};
use super::worker::Worker;
use crate::errors::ErrorKind;
use crate::lock::process;
use crate::observability::messages::engine::WorkerTerminated;
use crate::observability::messages::StructuredLog;
use crate::traits::WorkerLauncher;

/// Why a worker was stopped from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    Timeout,
    Cancelled,
}

impl Interruption {
    fn kind(&self) -> ErrorKind {
        match self {
            Interruption::Timeout => ErrorKind::Timeout,
            Interruption::Cancelled => ErrorKind::Cancelled,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Interruption::Timeout => "wall time exceeded",
            Interruption::Cancelled => "cancelled",
        }
    }

    fn message(&self, spec: &WorkerSpec) -> String {
        match self {
            Interruption::Timeout => format!(
                "{} exceeded its wall time of {}s",
                spec.recipe, spec.wall_time_secs
            ),
            Interruption::Cancelled => format!("{} was cancelled", spec.recipe),
        }
    }
}

/// Runs each invocation in a child `apero worker` process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Launch workers from the running executable.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// SIGTERM, then SIGKILL once `kill_after` has passed.
    async fn stop(&self, child: &mut Child, spec: &WorkerSpec, why: Interruption) {
        let signalled = child.id().map_or(false, process::terminate);
        if signalled
            && tokio::time::timeout(spec.kill_after(), child.wait())
                .await
                .is_ok()
        {
            WorkerTerminated {
                pid: &spec.pid,
                reason: why.reason(),
                forced: false,
            }
            .log();
            return;
        }

        // Already gone, or ignored SIGTERM.
        let _ = child.kill().await;
        WorkerTerminated {
            pid: &spec.pid,
            reason: why.reason(),
            forced: true,
        }
        .log();
    }
}

fn collect<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer).await;
        }
        buffer
    })
}

fn exit_failure(spec: &WorkerSpec, status: ExitStatus, cancelled: bool, elapsed: Duration) -> WorkerResult {
    match status.code() {
        Some(code) => WorkerResult::failed(
            &spec.pid,
            ErrorKind::Exception,
            format!("worker exited with status {code} without a result"),
            elapsed,
        ),
        None if cancelled => WorkerResult::failed(
            &spec.pid,
            ErrorKind::Cancelled,
            "worker was stopped by a signal after cancellation",
            elapsed,
        ),
        None => WorkerResult::failed(
            &spec.pid,
            ErrorKind::Killed,
            "worker was killed by a signal",
            elapsed,
        ),
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, spec: WorkerSpec, cancel: CancellationToken) -> WorkerResult {
        let started = Instant::now();
        let spec_path = match spec.write() {
            Ok(path) => path,
            Err(err) => {
                return WorkerResult::failed(&spec.pid, err.kind(), err.to_string(), started.elapsed())
            }
        };
        let _ = std::fs::remove_file(spec.result_path());

        let mut command = Command::new(&self.program);
        command
            .arg("worker")
            .arg("--spec")
            .arg(&spec_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return WorkerResult::failed(
                    &spec.pid,
                    ErrorKind::Exception,
                    format!("cannot start {}: {err}", self.program.display()),
                    started.elapsed(),
                )
            }
        };
        let stdout = collect(child.stdout.take());
        let stderr = collect(child.stderr.take());

        let exited = tokio::select! {
            status = child.wait() => Ok(status),
            _ = tokio::time::sleep(spec.wall_time()) => Err(Interruption::Timeout),
            _ = cancel.cancelled() => Err(Interruption::Cancelled),
        };

        let result = match exited {
            Ok(Ok(status)) => match WorkerResult::read(&spec.result_path()) {
                Ok(result) => result,
                Err(_) if !status.success() => {
                    exit_failure(&spec, status, cancel.is_cancelled(), started.elapsed())
                }
                Err(err) => WorkerResult::failed(
                    &spec.pid,
                    ErrorKind::Exception,
                    err.to_string(),
                    started.elapsed(),
                ),
            },
            Ok(Err(err)) => WorkerResult::failed(
                &spec.pid,
                ErrorKind::Exception,
                format!("lost track of worker: {err}"),
                started.elapsed(),
            ),
            Err(why) => {
                self.stop(&mut child, &spec, why).await;
                match (why, WorkerResult::read(&spec.result_path())) {
                    (Interruption::Cancelled, Ok(drained)) => drained,
                    _ => WorkerResult::failed(&spec.pid, why.kind(), why.message(&spec), started.elapsed()),
                }
            }
        };

        let mut output = stdout.await.unwrap_or_default();
        output.extend(stderr.await.unwrap_or_default());
        result.with_output_tail(output_tail(&output))
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Runs each invocation on a blocking thread of the current runtime.
#[derive(Debug, Clone)]
pub struct InProcessLauncher {
    worker: Arc<Worker>,
}

impl InProcessLauncher {
    pub fn new(worker: Worker) -> Self {
        Self {
            worker: Arc::new(worker),
        }
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, spec: WorkerSpec, cancel: CancellationToken) -> WorkerResult {
        let started = Instant::now();
        let flag = Arc::new(AtomicBool::new(false));
        let worker = Arc::clone(&self.worker);
        let task_spec = spec.clone();
        let task_flag = Arc::clone(&flag);
        let mut handle =
            tokio::task::spawn_blocking(move || worker.run(&task_spec, task_flag));

        let why = tokio::select! {
            joined = &mut handle => {
                return joined.unwrap_or_else(|err| {
                    WorkerResult::failed(&spec.pid, ErrorKind::Exception, err.to_string(), started.elapsed())
                });
            }
            _ = tokio::time::sleep(spec.wall_time()) => Interruption::Timeout,
            _ = cancel.cancelled() => Interruption::Cancelled,
        };

        flag.store(true, Ordering::SeqCst);
        let returned = tokio::time::timeout(spec.kill_after(), &mut handle).await.is_ok();
        WorkerTerminated {
            pid: &spec.pid,
            reason: why.reason(),
            forced: !returned,
        }
        .log();
        WorkerResult::failed(&spec.pid, why.kind(), why.message(&spec), started.elapsed())
    }

    fn name(&self) -> &'static str {
        "in-process"
    }
}
