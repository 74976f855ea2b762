// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Plan execution with a bounded worker pool.
//!
//! The supervisor owns every database write. For each ready invocation it
//! resolves calibrations, fingerprints the inputs, checks skip-if-done and
//! records a `running` row; a worker then runs the recipe and stages its
//! products; the supervisor commits them and closes the row.
//!
//! # Scheduling
//!
//! * An invocation becomes ready when every upstream invocation finished
//!   `passed` or `skipped`. Ready invocations are dispatched in plan order.
//! * At most `pool_size` invocations run at once. With a memory budget, an
//!   invocation also waits until its declared memory fits next to the
//!   running ones (a lone invocation always runs).
//! * A `failed` or `qc_failed` invocation finalizes its whole downstream
//!   closure as `skipped_upstream`, with `parent_pid` naming it.
//! * Nothing is retried.
//!
//! # Shutdown
//!
//! [`ShutdownHandle::shutdown`] stops dispatching. Running invocations get the
//! grace period to finish; after it their launchers are cancelled and their
//! rows end `cancelled`. Invocations never dispatched get no row at all.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::commit::commit;
use super::protocol::{WorkerResult, WorkerSpec, WorkerStatus};
use crate::calib::{CalibLookup, UsedCalibrations, USE_UNUSED_PARAM};
use crate::config::{Instrument, Profile, ResolvedPaths};
use crate::db::{now_iso, Completion, Databases, RunStatus};
use crate::errors::{CalibLookupError, DbError, ErrorKind, ExecutionError};
use crate::files::fingerprint;
use crate::lock::LockManager;
use crate::observability::messages::engine::{
    DanglingRunsFinalized, InvocationCompleted, InvocationDispatched, InvocationFailed,
    InvocationSkipped, RunCompleted, ShutdownRequested, SupervisorStarted,
};
use crate::observability::messages::StructuredLog;
use crate::planner::{Invocation, Plan};
use crate::recipes::RecipeRegistry;
use crate::traits::WorkerLauncher;

pub const EXIT_OK: i32 = 0;
pub const EXIT_ARG_ERROR: i32 = 1;
pub const EXIT_FAILURE: i32 = 2;
pub const EXIT_QC_FAILURE: i32 = 3;
pub const EXIT_CANCELLED: i32 = 4;

/// Asks a running supervisor to stop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    drain: CancellationToken,
    abort: CancellationToken,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop dispatching; running invocations get the grace period.
    pub fn shutdown(&self) {
        self.drain.cancel();
    }

    /// Stop dispatching and cancel running invocations now.
    pub fn abort(&self) {
        self.drain.cancel();
        self.abort.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.drain.is_cancelled()
    }

    /// Resolves once shutdown was requested.
    pub async fn drained(&self) {
        self.drain.cancelled().await
    }
}

/// Final statuses of one plan execution.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub plan_id: String,
    /// Pid to final status. Invocations never dispatched are absent.
    pub statuses: BTreeMap<String, RunStatus>,
    /// Error kind of every `failed` invocation.
    pub errors: BTreeMap<String, ErrorKind>,
    pub not_started: usize,
    pub interrupted: bool,
    pub duration: Duration,
}

impl RunSummary {
    pub fn count(&self, status: RunStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }

    pub fn status(&self, pid: &str) -> Option<RunStatus> {
        self.statuses.get(pid).copied()
    }

    /// `0` all passed or skipped, `1` a lone invocation rejected its
    /// arguments, `2` a failure, `3` only QC failures, `4` cancelled.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted || self.count(RunStatus::Cancelled) > 0 {
            EXIT_CANCELLED
        } else if self.statuses.len() == 1
            && self.errors.values().next() == Some(&ErrorKind::Arg)
        {
            EXIT_ARG_ERROR
        } else if self.count(RunStatus::Failed) > 0 {
            EXIT_FAILURE
        } else if self.count(RunStatus::QcFailed) > 0 {
            EXIT_QC_FAILURE
        } else {
            EXIT_OK
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plan {} finished in {:.1?}", self.plan_id, self.duration)?;
        for status in RunStatus::ALL {
            let count = self.count(status);
            if count > 0 {
                writeln!(f, "  {:<17} {count:>5}", status.as_str())?;
            }
        }
        if self.not_started > 0 {
            writeln!(f, "  {:<17} {:>5}", "not_started", self.not_started)?;
        }
        Ok(())
    }
}

/// What the dispatch tasks share.
struct Shared {
    registry: Arc<RecipeRegistry>,
    instrument: Arc<Instrument>,
    profile: Profile,
    paths: ResolvedPaths,
    databases: Databases,
    locks: LockManager,
    launcher: Arc<dyn WorkerLauncher>,
    plan_id: String,
    log_level: String,
}

/// Final status of one invocation and, when it failed, why.
type Outcome = (RunStatus, Option<ErrorKind>);

enum Prepared {
    Finished(Outcome),
    Launch(Box<WorkerSpec>),
}

/// Executes plans.
pub struct Supervisor {
    registry: Arc<RecipeRegistry>,
    instrument: Arc<Instrument>,
    profile: Profile,
    databases: Databases,
    locks: LockManager,
    launcher: Arc<dyn WorkerLauncher>,
    pool_size: usize,
    grace_period: Duration,
    memory_budget_mb: Option<u64>,
    log_level: String,
    shutdown: ShutdownHandle,
}

impl Supervisor {
    /// Pool size, grace period and memory budget come from the profile's
    /// scheduler section.
    pub fn new(
        registry: Arc<RecipeRegistry>,
        instrument: Arc<Instrument>,
        profile: Profile,
        databases: Databases,
        locks: LockManager,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        let scheduler = &profile.scheduler;
        Self {
            pool_size: scheduler.pool_size(),
            grace_period: scheduler.grace_period(),
            memory_budget_mb: scheduler.memory_budget_mb,
            registry,
            instrument,
            databases,
            locks,
            launcher,
            log_level: "info".to_string(),
            shutdown: ShutdownHandle::new(),
            profile,
        }
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.log_level = level.to_string();
        self
    }

    /// Share a shutdown handle with other supervisors, as the trigger does.
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Execute `plan` to completion or until shutdown.
    pub async fn run(&self, plan: &Plan) -> Result<RunSummary, ExecutionError> {
        let started = Instant::now();
        let shared = Arc::new(Shared {
            registry: Arc::clone(&self.registry),
            instrument: Arc::clone(&self.instrument),
            paths: self.profile.paths(),
            profile: self.profile.clone(),
            databases: self.databases.clone(),
            locks: self.locks.clone(),
            launcher: Arc::clone(&self.launcher),
            plan_id: plan.id.clone(),
            log_level: self.log_level.clone(),
        });
        SupervisorStarted {
            plan_id: &plan.id,
            invocations: plan.len(),
            pool_size: self.pool_size,
            launcher: self.launcher.name(),
        }
        .log();

        let databases = self.databases.clone();
        let dangling = blocking(move || finalize_dangling(&databases).map_err(Into::into)).await?;
        if dangling > 0 {
            DanglingRunsFinalized { count: dangling }.log();
        }

        let n = plan.len();
        let downstream = plan.downstream();
        let mut waiting = vec![0usize; n];
        for deps in &downstream {
            for &d in deps {
                waiting[d] += 1;
            }
        }
        let memory: Vec<u64> = plan
            .invocations
            .iter()
            .map(|inv| {
                self.registry
                    .get(&inv.recipe)
                    .ok()
                    .and_then(|r| self.profile.scheduler.memory_for(&r.name, r.memory_mb))
                    .unwrap_or(0)
            })
            .collect();

        let mut statuses: Vec<Option<RunStatus>> = vec![None; n];
        let mut errors: BTreeMap<String, ErrorKind> = BTreeMap::new();
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| waiting[i] == 0).collect();
        let mut running: JoinSet<(usize, Result<Outcome, ExecutionError>)> = JoinSet::new();
        let mut memory_in_use = 0u64;
        let mut draining = false;
        let mut abort_timer: Option<JoinHandle<()>> = None;
        let drain = self.shutdown.drain.clone();
        let abort = self.shutdown.abort.clone();

        loop {
            if !draining && drain.is_cancelled() {
                draining = true;
                ShutdownRequested {
                    mode: "drain",
                    in_flight: running.len(),
                }
                .log();
                let abort = abort.clone();
                let grace = self.grace_period;
                abort_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    abort.cancel();
                }));
            }

            while !draining && running.len() < self.pool_size {
                let Some(&pos) = ready.first() else {
                    break;
                };
                if let Some(budget) = self.memory_budget_mb {
                    if memory_in_use > 0 && memory_in_use + memory[pos] > budget {
                        break;
                    }
                }
                ready.remove(&pos);
                memory_in_use += memory[pos];

                let shared = Arc::clone(&shared);
                let invocation = plan.invocations[pos].clone();
                let cancel = abort.child_token();
                running.spawn(async move { (pos, execute(shared, invocation, cancel).await) });
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => {
                    let Some(joined) = joined else { continue };
                    let (pos, outcome) = joined.map_err(|e| ExecutionError::Join(e.to_string()))?;
                    memory_in_use = memory_in_use.saturating_sub(memory[pos]);
                    let (status, kind) = match outcome {
                        Ok(outcome) => outcome,
                        Err(err) => abandon(&shared, &plan.invocations[pos], err).await,
                    };
                    statuses[pos] = Some(status);
                    if let (RunStatus::Failed, Some(kind)) = (status, kind) {
                        errors.insert(plan.invocations[pos].pid.clone(), kind);
                    }

                    if status.satisfies_dependents() {
                        for &d in &downstream[pos] {
                            waiting[d] -= 1;
                            if waiting[d] == 0 && statuses[d].is_none() {
                                ready.insert(d);
                            }
                        }
                    } else if matches!(status, RunStatus::Failed | RunStatus::QcFailed) {
                        match skip_downstream(&shared, plan, &downstream, pos, status, &statuses).await {
                            Ok(skipped) => {
                                for d in skipped {
                                    statuses[d] = Some(RunStatus::SkippedUpstream);
                                    ready.remove(&d);
                                }
                            }
                            // Its dependents never become ready and end up not started.
                            Err(err) => tracing::error!(
                                pid = %plan.invocations[pos].pid,
                                error = %err,
                                "cannot record skipped downstream invocations"
                            ),
                        }
                    }
                }
                _ = drain.cancelled(), if !draining => {}
            }
        }

        if let Some(timer) = abort_timer {
            timer.abort();
        }

        let summary = RunSummary {
            plan_id: plan.id.clone(),
            statuses: plan
                .invocations
                .iter()
                .zip(&statuses)
                .filter_map(|(inv, status)| status.map(|s| (inv.pid.clone(), s)))
                .collect(),
            errors,
            not_started: statuses.iter().filter(|s| s.is_none()).count(),
            interrupted: draining || abort.is_cancelled(),
            duration: started.elapsed(),
        };
        RunCompleted {
            plan_id: &summary.plan_id,
            passed: summary.count(RunStatus::Passed),
            failed: summary.count(RunStatus::Failed) + summary.count(RunStatus::QcFailed),
            skipped: summary.count(RunStatus::Skipped) + summary.count(RunStatus::SkippedUpstream),
            cancelled: summary.count(RunStatus::Cancelled),
            duration: summary.duration,
        }
        .log();
        Ok(summary)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ExecutionError>
where
    F: FnOnce() -> Result<T, ExecutionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExecutionError::Join(e.to_string()))?
}

/// Close the row of an invocation whose dispatch hit an internal error, such
/// as a lock timeout or a database failure, so the rest of the plan goes on.
/// The invocation counts as `failed` and its downstream is skipped.
async fn abandon(shared: &Arc<Shared>, invocation: &Invocation, err: ExecutionError) -> Outcome {
    let kind = err.kind();
    let message = format!("internal error: {err}");
    InvocationFailed {
        pid: &invocation.pid,
        recipe: &invocation.recipe,
        kind: kind.as_str(),
        message: &message,
    }
    .log();

    let databases = shared.databases.clone();
    let invocation = invocation.clone();
    let pid = invocation.pid.clone();
    let closed = blocking(move || {
        let runlog = &databases.runlog;
        let now = now_iso();
        match runlog.get(&invocation.pid)? {
            Some(row) if row.status.is_final() => Ok((row.status, row.error_kind)),
            Some(_) => {
                runlog.finish(
                    &invocation.pid,
                    &Completion {
                        status: RunStatus::Failed,
                        end: now,
                        error_kind: Some(kind),
                        error_msg: Some(message),
                    },
                )?;
                Ok((RunStatus::Failed, Some(kind)))
            }
            None => {
                let mut entry = invocation.runlog_entry(RunStatus::Failed, "");
                entry.start = Some(now.clone());
                entry.end = Some(now);
                entry.error_kind = Some(kind);
                entry.error_msg = Some(message);
                runlog.insert_final(&entry)?;
                Ok((RunStatus::Failed, Some(kind)))
            }
        }
    })
    .await;
    closed.unwrap_or_else(|err| {
        tracing::error!(pid = %pid, error = %err, "cannot record the failed invocation");
        (RunStatus::Failed, Some(kind))
    })
}

/// Close rows a dead supervisor left `running`.
fn finalize_dangling(databases: &Databases) -> Result<usize, DbError> {
    let rows = databases.runlog.dangling()?;
    for row in &rows {
        databases.runlog.finish(
            &row.pid,
            &Completion {
                status: RunStatus::Cancelled,
                end: now_iso(),
                error_kind: Some(ErrorKind::Cancelled),
                error_msg: Some("supervisor exited before the invocation finished".to_string()),
            },
        )?;
    }
    Ok(rows.len())
}

/// One invocation from dispatch to its final row.
async fn execute(
    shared: Arc<Shared>,
    invocation: Invocation,
    cancel: CancellationToken,
) -> Result<Outcome, ExecutionError> {
    let prepared = {
        let shared = Arc::clone(&shared);
        let invocation = invocation.clone();
        blocking(move || prepare(&shared, &invocation)).await?
    };
    let spec = match prepared {
        Prepared::Finished(outcome) => return Ok(outcome),
        Prepared::Launch(spec) => *spec,
    };

    InvocationDispatched {
        pid: &spec.pid,
        recipe: &spec.recipe,
        night: &spec.night,
        calibrations: spec.calibrations.len(),
    }
    .log();
    let result = shared.launcher.launch(spec.clone(), cancel).await;

    blocking(move || settle(&shared, &spec, &result)).await
}

fn prepare(shared: &Shared, invocation: &Invocation) -> Result<Prepared, ExecutionError> {
    let runlog = &shared.databases.runlog;
    let now = now_iso();
    let log_path = shared
        .paths
        .logs
        .join(&invocation.night)
        .join(format!("{}.log", invocation.pid));

    let fail = |kind: ErrorKind, message: String| -> Result<Prepared, ExecutionError> {
        let mut entry = invocation.runlog_entry(RunStatus::Failed, "");
        entry.start = Some(now.clone());
        entry.end = Some(now.clone());
        entry.error_kind = Some(kind);
        entry.error_msg = Some(message.clone());
        entry.log_path = Some(log_path.clone());
        runlog.insert_final(&entry)?;
        InvocationFailed {
            pid: &invocation.pid,
            recipe: &invocation.recipe,
            kind: kind.as_str(),
            message: &message,
        }
        .log();
        Ok(Prepared::Finished((RunStatus::Failed, Some(kind))))
    };

    let recipe = match shared.registry.get(&invocation.recipe) {
        Ok(recipe) => recipe,
        Err(err) => return fail(ErrorKind::Arg, err.to_string()),
    };
    let params = match invocation.resolve_params(&shared.instrument, &shared.profile) {
        Ok(params) => params,
        Err(err) => return fail(err.kind(), err.to_string()),
    };

    let lookup = CalibLookup::new(&shared.databases)
        .include_unused(params.get_bool(USE_UNUSED_PARAM).unwrap_or(false));
    let mut calibrations = UsedCalibrations::new();
    for requirement in &recipe.calibrations {
        let query = match invocation.calib_query(requirement, &params) {
            Ok(query) => query,
            Err(err) => return fail(err.kind(), err.to_string()),
        };
        match lookup.find(&query) {
            Ok(found) => calibrations.record(found),
            Err(CalibLookupError::NoCalibration { .. }) if !requirement.required => {}
            Err(err @ CalibLookupError::NoCalibration { .. }) => {
                return fail(ErrorKind::CalibLookup, err.to_string())
            }
            Err(CalibLookupError::Db(err)) => return Err(err.into()),
        }
    }

    let input_fingerprint = match input_fingerprint(invocation, &calibrations) {
        Ok(fp) => fp,
        Err(err) => return fail(ErrorKind::Io, format!("cannot read inputs: {err}")),
    };
    let mut entry = invocation.runlog_entry(RunStatus::Running, &input_fingerprint);
    entry.log_path = Some(log_path.clone());
    entry.start = Some(now.clone());

    if invocation.skip_done {
        let done = runlog.find_done(&invocation.recipe, &entry.arg_fingerprint, &input_fingerprint)?;
        if let Some(done) = done {
            let reason = format!("identical run {} already passed", done.pid);
            entry.status = RunStatus::Skipped;
            entry.end = Some(now);
            entry.error_msg = Some(reason.clone());
            runlog.insert_final(&entry)?;
            InvocationSkipped {
                pid: &invocation.pid,
                recipe: &invocation.recipe,
                status: RunStatus::Skipped.as_str(),
                reason: &reason,
            }
            .log();
            return Ok(Prepared::Finished((RunStatus::Skipped, None)));
        }
    }

    runlog.start(&entry)?;
    let scheduler = &shared.profile.scheduler;
    Ok(Prepared::Launch(Box::new(WorkerSpec {
        pid: invocation.pid.clone(),
        plan_id: shared.plan_id.clone(),
        recipe: invocation.recipe.clone(),
        night: invocation.night.clone(),
        profile: shared.profile.clone(),
        params,
        args: invocation.args.clone(),
        calibrations,
        scratch: shared.paths.scratch.join(&invocation.pid),
        log_file: log_path,
        log_level: shared.log_level.clone(),
        wall_time_secs: scheduler.wall_time_for(&recipe.name, recipe.wall_time).as_secs(),
        kill_after_secs: scheduler.kill_after().as_secs(),
    })))
}

/// Contents of every bound input plus the names of the resolved calibrations.
fn input_fingerprint(invocation: &Invocation, calibrations: &UsedCalibrations) -> io::Result<String> {
    let inputs = invocation.input_files();
    let contents =
        fingerprint::contents(inputs.iter().map(|f| (f.filename.as_str(), f.path.as_path())))?;
    Ok(fingerprint::names(
        std::iter::once(contents.as_str()).chain(calibrations.iter().map(|c| c.filename.as_str())),
    ))
}

/// Map a worker result to the status recorded in the run log.
fn interpret(result: &WorkerResult) -> Completion {
    let (status, error_kind) = match result.status {
        WorkerStatus::Passed => (RunStatus::Passed, None),
        WorkerStatus::QcFailed => (RunStatus::QcFailed, Some(ErrorKind::QcFailed)),
        WorkerStatus::Failed => match result.error_kind().unwrap_or(ErrorKind::Exception) {
            ErrorKind::Cancelled => (RunStatus::Cancelled, Some(ErrorKind::Cancelled)),
            kind => (RunStatus::Failed, Some(kind)),
        },
    };
    Completion {
        status,
        end: now_iso(),
        error_kind,
        error_msg: result.error.as_ref().map(|e| e.message.clone()),
    }
}

/// Commit or close the row, append the result to the invocation log and
/// reclaim scratch.
fn settle(shared: &Shared, spec: &WorkerSpec, result: &WorkerResult) -> Result<Outcome, ExecutionError> {
    let mut completion = interpret(result);
    let runlog = &shared.databases.runlog;

    if matches!(completion.status, RunStatus::Passed | RunStatus::QcFailed) {
        if let Err(err) = commit(
            &shared.databases,
            &shared.locks,
            &shared.instrument,
            result,
            &completion,
        ) {
            completion = Completion {
                status: RunStatus::Failed,
                end: now_iso(),
                error_kind: Some(err.kind()),
                error_msg: Some(format!("commit failed: {err}")),
            };
            runlog.finish(&spec.pid, &completion)?;
        }
    } else {
        runlog.finish(&spec.pid, &completion)?;
    }

    if let Err(err) = append_result(&spec.log_file, result, &completion) {
        tracing::warn!(pid = %spec.pid, error = %err, "cannot append worker result to log");
    }
    match fs::remove_dir_all(&spec.scratch) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(pid = %spec.pid, error = %err, "cannot remove scratch directory");
        }
    }

    InvocationCompleted {
        pid: &spec.pid,
        recipe: &spec.recipe,
        status: completion.status.as_str(),
        duration: result.duration(),
    }
    .log();
    if completion.status == RunStatus::Failed {
        InvocationFailed {
            pid: &spec.pid,
            recipe: &spec.recipe,
            kind: completion.error_kind.unwrap_or(ErrorKind::Exception).as_str(),
            message: completion.error_msg.as_deref().unwrap_or(""),
        }
        .log();
    }
    Ok((completion.status, completion.error_kind))
}

fn append_result(path: &Path, result: &WorkerResult, completion: &Completion) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "==== worker result ====")?;
    writeln!(
        file,
        "status={} kind={} duration_ms={} outputs={}",
        completion.status,
        completion.error_kind.map_or("-", |k| k.as_str()),
        result.duration_ms,
        result.outputs.len()
    )?;
    if let Some(message) = &completion.error_msg {
        writeln!(file, "error: {message}")?;
    }
    if !result.output_tail.is_empty() {
        writeln!(file, "---- output tail ----")?;
        writeln!(file, "{}", result.output_tail.trim_end())?;
    }
    Ok(())
}

/// Finalize every not-yet-final invocation downstream of `failed` as
/// `skipped_upstream`. Returns their positions.
async fn skip_downstream(
    shared: &Arc<Shared>,
    plan: &Plan,
    downstream: &[Vec<usize>],
    failed: usize,
    status: RunStatus,
    statuses: &[Option<RunStatus>],
) -> Result<Vec<usize>, ExecutionError> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<usize> = downstream[failed].iter().copied().collect();
    while let Some(pos) = queue.pop_front() {
        if statuses[pos].is_none() && seen.insert(pos) {
            queue.extend(downstream[pos].iter().copied());
        }
    }
    if seen.is_empty() {
        return Ok(vec![]);
    }

    let parent = plan.invocations[failed].pid.clone();
    let reason = format!("upstream {parent} {status}");
    let entries: Vec<_> = seen
        .iter()
        .map(|&pos| {
            let now = now_iso();
            let mut entry = plan.invocations[pos].runlog_entry(RunStatus::SkippedUpstream, "");
            entry.start = Some(now.clone());
            entry.end = Some(now);
            entry.error_kind = Some(ErrorKind::Upstream);
            entry.error_msg = Some(reason.clone());
            entry.parent_pid = Some(parent.clone());
            entry
        })
        .collect();

    let databases = shared.databases.clone();
    let entries = blocking(move || {
        for entry in &entries {
            databases.runlog.insert_final(entry)?;
        }
        Ok(entries)
    })
    .await?;
    for entry in &entries {
        InvocationSkipped {
            pid: &entry.pid,
            recipe: &entry.recipe,
            status: RunStatus::SkippedUpstream.as_str(),
            reason: &reason,
        }
        .log();
    }
    Ok(seen.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(statuses: &[RunStatus], interrupted: bool) -> RunSummary {
        RunSummary {
            plan_id: "PLAN-1".into(),
            statuses: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| (format!("PID-{i}"), *s))
                .collect(),
            errors: BTreeMap::new(),
            not_started: 0,
            interrupted,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(summary(&[], false).exit_code(), EXIT_OK);
        assert_eq!(
            summary(&[RunStatus::Passed, RunStatus::Skipped], false).exit_code(),
            EXIT_OK
        );
        assert_eq!(
            summary(&[RunStatus::QcFailed, RunStatus::SkippedUpstream], false).exit_code(),
            EXIT_QC_FAILURE
        );
        assert_eq!(
            summary(&[RunStatus::QcFailed, RunStatus::Failed], false).exit_code(),
            EXIT_FAILURE
        );
        assert_eq!(summary(&[RunStatus::Passed], true).exit_code(), EXIT_CANCELLED);
        assert_eq!(
            summary(&[RunStatus::Failed, RunStatus::Cancelled], false).exit_code(),
            EXIT_CANCELLED
        );
    }

    #[test]
    fn test_lone_argument_failure_exits_with_arg_error() {
        let mut lone = summary(&[RunStatus::Failed], false);
        lone.errors.insert("PID-0".into(), ErrorKind::Arg);
        assert_eq!(lone.exit_code(), EXIT_ARG_ERROR);

        lone.errors.insert("PID-0".into(), ErrorKind::Exception);
        assert_eq!(lone.exit_code(), EXIT_FAILURE);

        let mut several = summary(&[RunStatus::Failed, RunStatus::Passed], false);
        several.errors.insert("PID-0".into(), ErrorKind::Arg);
        assert_eq!(several.exit_code(), EXIT_FAILURE);

        let mut cancelled = summary(&[RunStatus::Failed], true);
        cancelled.errors.insert("PID-0".into(), ErrorKind::Arg);
        assert_eq!(cancelled.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_cancelled_workers_are_not_failures() {
        let cancelled = WorkerResult::failed("PID-1", ErrorKind::Cancelled, "stop", Duration::ZERO);
        assert_eq!(interpret(&cancelled).status, RunStatus::Cancelled);

        let timeout = WorkerResult::failed("PID-1", ErrorKind::Timeout, "slow", Duration::ZERO);
        let completion = interpret(&timeout);
        assert_eq!(completion.status, RunStatus::Failed);
        assert_eq!(completion.error_kind, Some(ErrorKind::Timeout));
    }

    #[test]
    fn test_summary_display_lists_nonzero_counts() {
        let text = summary(&[RunStatus::Passed, RunStatus::Passed, RunStatus::Failed], false).to_string();
        assert!(text.contains("passed"));
        assert!(text.contains("failed"));
        assert!(!text.contains("cancelled"));
    }
}
