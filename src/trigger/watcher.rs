// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

use super::scan::{RawScanner, ScanReport};
use crate::config::consts::TRIGGER_LOCK;
use crate::config::{Instrument, Profile, RunTable};
use crate::db::{Databases, IndexQuery, RunLogQuery};
use crate::engine::{RunSummary, ShutdownHandle, Supervisor};
use crate::errors::{DbError, TriggerError};
use crate::files::FileKind;
use crate::lock::LockManager;
use crate::observability::messages::trigger::{NightNotQuiescent, NightSubmitted};
use crate::observability::messages::StructuredLog;
use crate::planner::Planner;
use crate::recipes::RecipeRegistry;
use crate::traits::WorkerLauncher;

/// A night the trigger planned and ran.
#[derive(Debug, Clone)]
pub struct NightOutcome {
    pub night: String,
    pub summary: RunSummary,
}

/// Watches the raw tree and processes nights once they stop changing.
///
/// A night is pending when one of its raw files was indexed after the
/// latest run-log row of that night (and after the trigger last submitted
/// it). A pending night is submitted once its newest raw file is older than
/// the quiescence interval: the run table is planned for that night alone and
/// handed to a [`Supervisor`].
pub struct Trigger {
    profile: Profile,
    instrument: Arc<Instrument>,
    registry: Arc<RecipeRegistry>,
    databases: Databases,
    locks: LockManager,
    launcher: Arc<dyn WorkerLauncher>,
    run_table: RunTable,
    scanner: Arc<Mutex<RawScanner>>,
    submitted: BTreeMap<String, String>,
    shutdown: ShutdownHandle,
}

impl Trigger {
    pub fn new(
        profile: Profile,
        instrument: Arc<Instrument>,
        registry: Arc<RecipeRegistry>,
        databases: Databases,
        locks: LockManager,
        launcher: Arc<dyn WorkerLauncher>,
        run_table: RunTable,
    ) -> Self {
        let scanner = RawScanner::new(
            Arc::clone(&instrument),
            databases.index.clone(),
            profile.paths().raw,
        );
        Self {
            profile,
            instrument,
            registry,
            databases,
            locks,
            launcher,
            run_table,
            scanner: Arc::new(Mutex::new(scanner)),
            submitted: BTreeMap::new(),
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Scan, then process quiescent nights, every scan interval until shutdown.
    pub async fn run(&mut self) -> Result<(), TriggerError> {
        let interval = self.profile.trigger.scan_interval();
        let stop = self.shutdown.clone();
        while !stop.is_shutdown() {
            self.tick().await?;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.drained() => {}
            }
        }
        Ok(())
    }

    /// One scan and submission pass, under the trigger lock.
    pub async fn tick(&mut self) -> Result<Vec<NightOutcome>, TriggerError> {
        let _held = hold_lock(&self.locks, TRIGGER_LOCK).await?;

        let scanner = Arc::clone(&self.scanner);
        let reports = blocking(move || {
            let mut scanner = scanner
                .lock()
                .map_err(|_| TriggerError::Join("raw scanner poisoned".to_string()))?;
            scanner.scan_all()
        })
        .await?;

        let mut outcomes = Vec::new();
        for report in reports {
            if self.shutdown.is_shutdown() {
                break;
            }
            let Some(indexed_at) = self.pending_since(&report).await? else {
                continue;
            };
            let remaining = self.quiet_remaining(&report);
            if !remaining.is_zero() {
                NightNotQuiescent {
                    night: &report.night,
                    remaining,
                }
                .log();
                continue;
            }
            let summary = self.submit(&report.night).await?;
            self.submitted.insert(report.night.clone(), indexed_at);
            outcomes.push(NightOutcome {
                night: report.night,
                summary,
            });
        }
        Ok(outcomes)
    }

    /// Time of the newest raw index row when the night has work newer than
    /// its last run, otherwise `None`.
    async fn pending_since(&self, report: &ScanReport) -> Result<Option<String>, TriggerError> {
        let databases = self.databases.clone();
        let night = report.night.clone();
        let (indexed_at, last_run) = blocking(move || {
            let indexed_at = databases
                .index
                .query(&IndexQuery {
                    night: Some(night.clone()),
                    kind: Some(FileKind::Raw),
                    ..IndexQuery::default()
                })?
                .into_iter()
                .map(|e| e.timestamp)
                .max();
            let last_run = databases
                .runlog
                .query(&RunLogQuery {
                    night: Some(night),
                    ..RunLogQuery::default()
                })?
                .into_iter()
                .filter_map(|e| e.start)
                .max();
            Ok::<_, DbError>((indexed_at, last_run))
        })
        .await?;

        let Some(indexed_at) = indexed_at else {
            return Ok(None);
        };
        let newer_than_run = last_run.map_or(true, |run| indexed_at > run);
        let newer_than_submit = self
            .submitted
            .get(&report.night)
            .map_or(true, |mark| &indexed_at > mark);
        Ok((newer_than_run && newer_than_submit).then_some(indexed_at))
    }

    fn quiet_remaining(&self, report: &ScanReport) -> Duration {
        let quiescence = self.profile.trigger.quiescence();
        let Some(newest) = report.newest_mtime else {
            return Duration::ZERO;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let quiet_for = Duration::from_secs_f64((now - newest).max(0.0));
        quiescence.saturating_sub(quiet_for)
    }

    async fn submit(&self, night: &str) -> Result<RunSummary, TriggerError> {
        let mut table = self.run_table.clone();
        table.include_nights = vec![night.to_string()];

        let registry = Arc::clone(&self.registry);
        let databases = self.databases.clone();
        let paths = self.profile.paths();
        let planned_night = night.to_string();
        let plan = blocking(move || {
            Planner::new(&registry, &databases, &paths)
                .plan(&table)
                .map_err(|source| TriggerError::Plan {
                    night: planned_night,
                    source,
                })
        })
        .await?;

        let supervisor = Supervisor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.instrument),
            self.profile.clone(),
            self.databases.clone(),
            self.locks.clone(),
            Arc::clone(&self.launcher),
        )
        .with_shutdown(self.shutdown.clone());
        let summary = supervisor.run(&plan).await?;

        let table_name = self
            .run_table
            .name
            .clone()
            .unwrap_or_else(|| self.run_table.source.clone());
        NightSubmitted {
            night,
            run_table: &table_name,
            exit_code: summary.exit_code(),
        }
        .log();
        Ok(summary)
    }
}

async fn blocking<T, E, F>(f: F) -> Result<T, TriggerError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<TriggerError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TriggerError::Join(e.to_string()))?
        .map_err(Into::into)
}

/// A named lock held by a parked thread, so it can span awaits.
///
/// Lock guards must be released on the thread that acquired them; dropping
/// this value wakes the holder thread, which drops the guard.
struct HeldLock {
    _release: mpsc::Sender<()>,
}

async fn hold_lock(locks: &LockManager, name: &str) -> Result<HeldLock, TriggerError> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let locks = locks.clone();
    let lock_name = name.to_string();

    std::thread::Builder::new()
        .name(format!("lock-{name}"))
        .spawn(move || match locks.lock(&lock_name) {
            Ok(guard) => {
                if ready_tx.send(Ok(())).is_ok() {
                    let _ = release_rx.recv();
                }
                drop(guard);
            }
            Err(err) => {
                let _ = ready_tx.send(Err(err));
            }
        })
        .map_err(|e| TriggerError::Join(e.to_string()))?;

    ready_rx
        .await
        .map_err(|e| TriggerError::Join(e.to_string()))??;
    Ok(HeldLock {
        _release: release_tx,
    })
}
