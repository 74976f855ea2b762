// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use super::workspace::Workspace;
use crate::config::RunTable;
use crate::engine::protocol::WorkerStatus;
use crate::engine::{
    run_spec_file, ShutdownHandle, WorkerResult, EXIT_ARG_ERROR, EXIT_CANCELLED, EXIT_FAILURE,
    EXIT_OK, EXIT_QC_FAILURE,
};
use crate::errors::ErrorKind;
use crate::planner::{precheck, Invocation, Plan, Planner};
use crate::recipes::RawArgs;
use crate::trigger::Trigger;

/// Options shared by every command that executes invocations.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub pool_size: Option<usize>,
    pub in_process: bool,
    pub log_level: String,
}

/// Report a problem with the command line itself.
pub fn arg_error(err: impl std::fmt::Display) -> i32 {
    eprintln!("error: {err}");
    EXIT_ARG_ERROR
}

/// The first Ctrl-C drains the pool, the second cancels running workers.
fn watch_interrupts(handle: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("interrupt received, waiting for running invocations");
        handle.shutdown();
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("second interrupt, cancelling running invocations");
        handle.abort();
    })
}

fn load_plan(ws: &Workspace, run_table: &Path) -> Result<Plan, i32> {
    let table = RunTable::load(run_table).map_err(arg_error)?;
    Planner::new(&ws.registry, &ws.databases, &ws.paths)
        .plan(&table)
        .map_err(arg_error)
}

async fn execute(ws: &Workspace, plan: &Plan, options: &RunOptions) -> Result<i32> {
    let mut supervisor = ws
        .supervisor(ws.launcher(options.in_process)?)
        .log_level(&options.log_level);
    if let Some(pool_size) = options.pool_size {
        supervisor = supervisor.pool_size(pool_size);
    }
    let interrupts = watch_interrupts(supervisor.shutdown_handle());
    let summary = supervisor.run(plan).await;
    interrupts.abort();

    let summary = summary.context("plan execution failed")?;
    println!("{summary}");
    Ok(summary.exit_code())
}

/// `apero process <run-table>`
pub async fn process(ws: &Workspace, run_table: &Path, options: &RunOptions) -> Result<i32> {
    let plan = match load_plan(ws, run_table) {
        Ok(plan) => plan,
        Err(code) => return Ok(code),
    };
    for unbound in &plan.unbound {
        println!("rule {} ({}) bound nothing: {}", unbound.rule_id, unbound.recipe, unbound.reason);
    }
    execute(ws, &plan, options).await
}

/// `apero precheck <run-table>`
pub fn precheck_plan(ws: &Workspace, run_table: &Path, json: bool) -> Result<i32> {
    let plan = match load_plan(ws, run_table) {
        Ok(plan) => plan,
        Err(code) => return Ok(code),
    };
    let report = match precheck(&plan, &ws.registry, &ws.databases, &ws.instrument, &ws.profile) {
        Ok(report) => report,
        Err(err) => return Ok(arg_error(err)),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(if report.is_clean() { EXIT_OK } else { EXIT_FAILURE })
}

/// `apero recipe <name> [obs_dir] [files...] [--flag ...]`
///
/// File tokens are resolved against the index of the night given as the
/// directory argument.
pub async fn recipe(
    ws: &Workspace,
    name: &str,
    tokens: &[String],
    options: &RunOptions,
) -> Result<i32> {
    let recipe = match ws.registry.get(name) {
        Ok(recipe) => recipe,
        Err(err) => return Ok(arg_error(err)),
    };
    let raw = match RawArgs::parse(&recipe.name, &recipe.args, tokens) {
        Ok(raw) => raw,
        Err(err) => return Ok(arg_error(err)),
    };
    let index = &ws.databases.index;
    let bundle = raw.bind(&recipe.name, &recipe.args, |night, token| {
        let filename = Path::new(token).file_name()?.to_str()?;
        index.get(night, filename).ok().flatten().map(|entry| entry.to_bound())
    });
    let bundle = match bundle {
        Ok(bundle) => bundle,
        Err(err) => return Ok(arg_error(err)),
    };

    let plan = Plan::single(Invocation::direct(&recipe, bundle));
    execute(ws, &plan, options).await
}

/// `apero trigger [--run-table <file>] [--once]`
pub async fn trigger(
    ws: &Workspace,
    run_table: Option<&Path>,
    once: bool,
    options: &RunOptions,
) -> Result<i32> {
    let Some(path) = run_table.or(ws.profile.trigger.run_table.as_deref()) else {
        return Ok(arg_error("no run table given and none set in the profile"));
    };
    let table = match RunTable::load(path) {
        Ok(table) => table,
        Err(err) => return Ok(arg_error(err)),
    };

    let mut trigger = Trigger::new(
        ws.profile.clone(),
        ws.instrument.clone(),
        ws.registry.clone(),
        ws.databases.clone(),
        ws.locks.clone(),
        ws.launcher(options.in_process)?,
        table,
    );
    let interrupts = watch_interrupts(trigger.shutdown_handle());
    let result = if once {
        trigger.tick().await.map(|outcomes| {
            for outcome in outcomes {
                println!("night {}:\n{}", outcome.night, outcome.summary);
            }
        })
    } else {
        trigger.run().await
    };
    interrupts.abort();
    result.context("trigger stopped")?;
    Ok(EXIT_OK)
}

/// Exit status of a worker process, matching the per-recipe exit codes.
pub fn worker_exit_code(result: &WorkerResult) -> i32 {
    match result.status {
        WorkerStatus::Passed => EXIT_OK,
        WorkerStatus::QcFailed => EXIT_QC_FAILURE,
        WorkerStatus::Failed => match result.error.as_ref().map(|e| e.kind) {
            Some(ErrorKind::Arg) => EXIT_ARG_ERROR,
            Some(ErrorKind::Cancelled) => EXIT_CANCELLED,
            _ => EXIT_FAILURE,
        },
    }
}

/// SIGTERM from the launcher, or SIGINT, raises the recipe's cancel flag.
#[cfg(unix)]
fn watch_termination(cancel: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("cannot watch SIGTERM")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("cannot watch SIGINT")?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => {}
            _ = interrupt.recv() => {}
        }
        cancel.store(true, Ordering::SeqCst);
    }))
}

#[cfg(not(unix))]
fn watch_termination(cancel: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::SeqCst);
        }
    }))
}

/// `apero worker --spec <file>`, started by the process launcher.
///
/// The recipe runs on a blocking thread so the signal watcher stays live.
pub async fn worker(spec: &Path) -> Result<i32> {
    let cancel = Arc::new(AtomicBool::new(false));
    let watcher = watch_termination(Arc::clone(&cancel))?;
    let path = spec.to_path_buf();
    let result = tokio::task::spawn_blocking(move || run_spec_file(&path, cancel))
        .await
        .context("worker thread failed")?;
    watcher.abort();
    let result = result.with_context(|| format!("cannot run worker spec {}", spec.display()))?;
    Ok(worker_exit_code(&result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::protocol::WorkerError;
    use std::time::Duration;

    #[test]
    fn test_worker_exit_codes_follow_the_result() {
        let passed = WorkerResult::passed("PID-1", vec![], Default::default(), Duration::ZERO);
        assert_eq!(worker_exit_code(&passed), EXIT_OK);

        let mut failed = WorkerResult::failed("PID-1", ErrorKind::Exception, "boom", Duration::ZERO);
        assert_eq!(worker_exit_code(&failed), EXIT_FAILURE);

        failed.error = Some(WorkerError {
            kind: ErrorKind::Arg,
            message: "bad".to_string(),
        });
        assert_eq!(worker_exit_code(&failed), EXIT_ARG_ERROR);

        failed.error = Some(WorkerError {
            kind: ErrorKind::Cancelled,
            message: "stop".to_string(),
        });
        assert_eq!(worker_exit_code(&failed), EXIT_CANCELLED);

        let mut qc = passed.clone();
        qc.status = WorkerStatus::QcFailed;
        assert_eq!(worker_exit_code(&qc), EXIT_QC_FAILURE);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_termination_signal_raises_the_cancel_flag() {
        let cancel = Arc::new(AtomicBool::new(false));
        let watcher = watch_termination(Arc::clone(&cancel)).unwrap();
        // SAFETY: the handler installed above turns SIGTERM into the flag.
        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
        tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();
        assert!(cancel.load(Ordering::SeqCst));
    }
}
