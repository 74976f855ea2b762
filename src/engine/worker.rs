// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Worker side of an invocation: validate, run the recipe body, stage products.
//!
//! The worker never touches a database. Everything it produces goes to the
//! spec's scratch directory and is described in the returned
//! [`WorkerResult`]; the supervisor commits it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::protocol::{WorkerResult, WorkerSpec};
use crate::config::Instrument;
use crate::errors::{ConfigError, ErrorKind, ExecutionError};
use crate::observability::invocation_dispatch;
use crate::observability::messages::recipe::{QcFailed, RecipeFailed, RecipeFinished, RecipeStarted};
use crate::observability::messages::StructuredLog;
use crate::recipes::{ContextSetup, RecipeContext, RecipeRegistry};

/// Runs recipe bodies from one registry.
#[derive(Debug, Clone)]
pub struct Worker {
    instrument: Arc<Instrument>,
    registry: Arc<RecipeRegistry>,
}

impl Worker {
    pub fn new(instrument: Arc<Instrument>, registry: Arc<RecipeRegistry>) -> Self {
        Self {
            instrument,
            registry,
        }
    }

    /// A worker over the built-in recipes of `instrument`.
    pub fn builtin(instrument: &str) -> Result<Self, ConfigError> {
        let instrument = Instrument::builtin(instrument)?;
        let registry = RecipeRegistry::builtin(&instrument);
        Ok(Self::new(Arc::new(instrument), Arc::new(registry)))
    }

    /// Run one invocation, logging into its per-pid log file.
    ///
    /// Never fails: every error ends up in the result with its kind.
    pub fn run(&self, spec: &WorkerSpec, cancel: Arc<AtomicBool>) -> WorkerResult {
        let started = Instant::now();
        match invocation_dispatch(&spec.log_level, &spec.log_file) {
            Ok(dispatch) => {
                tracing::dispatcher::with_default(&dispatch, || self.run_recipe(spec, cancel))
            }
            Err(err) => WorkerResult::failed(
                &spec.pid,
                ErrorKind::Io,
                format!("cannot open log {}: {err}", spec.log_file.display()),
                started.elapsed(),
            ),
        }
    }

    fn run_recipe(&self, spec: &WorkerSpec, cancel: Arc<AtomicBool>) -> WorkerResult {
        let started = Instant::now();
        RecipeStarted {
            pid: &spec.pid,
            recipe: &spec.recipe,
            night: &spec.night,
            calibrations: spec.calibrations.len(),
        }
        .log();

        let fail = |kind: ErrorKind, message: String| {
            RecipeFailed {
                pid: &spec.pid,
                recipe: &spec.recipe,
                kind: kind.as_str(),
                message: &message,
            }
            .log();
            WorkerResult::failed(&spec.pid, kind, message, started.elapsed())
        };

        let recipe = match self.registry.get(&spec.recipe) {
            Ok(recipe) => recipe,
            Err(err) => return fail(ErrorKind::Arg, err.to_string()),
        };
        if cancel.load(Ordering::SeqCst) {
            return fail(ErrorKind::Cancelled, format!("{} cancelled before it started", spec.recipe));
        }
        let args = match recipe.bind(spec.args.clone()) {
            Ok(args) => args,
            Err(err) => return fail(ErrorKind::Arg, err.to_string()),
        };

        let setup = ContextSetup {
            pid: spec.pid.clone(),
            night: spec.night.clone(),
            params: spec.params.clone(),
            args,
            calibrations: spec.calibrations.clone(),
            paths: spec.profile.paths(),
            scratch: spec.scratch.clone(),
        };
        let mut ctx = RecipeContext::new(Arc::clone(&recipe), Arc::clone(&self.instrument), setup)
            .with_cancel_flag(cancel);

        let body = panic::catch_unwind(AssertUnwindSafe(|| recipe.main().run(&mut ctx)));
        match body {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return fail(err.kind(), err.to_string()),
            Err(payload) => {
                return fail(
                    ErrorKind::Exception,
                    format!("recipe panicked: {}", panic_message(payload.as_ref())),
                )
            }
        }

        let outcome = match ctx.finalize() {
            Ok(outcome) => outcome,
            Err(err) => return fail(err.kind(), err.to_string()),
        };
        let qc_passed = outcome.qc.passed();
        RecipeFinished {
            pid: &spec.pid,
            recipe: &spec.recipe,
            outputs: outcome.outputs.len(),
            qc_passed,
            duration: started.elapsed(),
        }
        .log();

        if qc_passed {
            WorkerResult::passed(&spec.pid, outcome.outputs, outcome.qc, started.elapsed())
        } else {
            QcFailed {
                pid: &spec.pid,
                recipe: &spec.recipe,
                summary: &outcome.qc.summary(),
            }
            .log();
            WorkerResult::qc_failed(&spec.pid, outcome.outputs, outcome.qc, started.elapsed())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Entry point of `apero worker --spec <file>`: run the spec and leave the
/// result next to it.
///
/// `cancel` is raised by the worker's SIGTERM/SIGINT handler; a body that
/// reaches a cancellation point after that ends `cancelled` and the result
/// is still written.
pub fn run_spec_file(path: &Path, cancel: Arc<AtomicBool>) -> Result<WorkerResult, ExecutionError> {
    let spec = WorkerSpec::read(path)?;
    let result = match Worker::builtin(&spec.profile.instrument) {
        Ok(worker) => worker.run(&spec, cancel),
        Err(err) => WorkerResult::failed(&spec.pid, err.kind(), err.to_string(), Default::default()),
    };
    result.write(&spec.result_path())?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::UsedCalibrations;
    use crate::config::{ParameterResolver, Profile};
    use crate::engine::protocol::WorkerStatus;
    use crate::errors::RecipeError;
    use crate::files::fits::Header;
    use crate::files::{DrsFileSpec, FileKind};
    use crate::recipes::{ArgBundle, ArgSpec, ArgValue, Recipe, OBS_DIR_ARG};
    use std::fs;
    use tempfile::TempDir;

    fn worker() -> Worker {
        let instrument = Instrument::builtin("SPIROU").unwrap();
        let mut registry = RecipeRegistry::new("SPIROU");
        let product = Arc::new(DrsFileSpec::output("NOTE", FileKind::Reduced, "_note"));
        registry.register(
            Recipe::new("t_write", "SPIROU", |ctx: &mut RecipeContext| -> Result<(), RecipeError> {
                ctx.write_output("NOTE", &[], Header::new(), b"note".to_vec())?;
                Ok(())
            })
            .arg(ArgSpec::directory())
            .output(Arc::clone(&product)),
        );
        registry.register(
            Recipe::new("t_qc", "SPIROU", |ctx: &mut RecipeContext| -> Result<(), RecipeError> {
                ctx.qc().check("NOISE", 9.0, "NOISE < 1", false);
                ctx.write_output("NOTE", &[], Header::new(), vec![])?;
                Ok(())
            })
            .arg(ArgSpec::directory())
            .output(product),
        );
        registry.register(
            Recipe::new("t_panic", "SPIROU", |_: &mut RecipeContext| -> Result<(), RecipeError> {
                panic!("lost the detector")
            })
            .arg(ArgSpec::directory()),
        );
        Worker::new(Arc::new(instrument), Arc::new(registry))
    }

    fn spec(dir: &TempDir, recipe: &str) -> WorkerSpec {
        let instrument = Instrument::builtin("SPIROU").unwrap();
        let params = ParameterResolver::new(&instrument)
            .resolve(&Default::default(), "test", &Default::default(), "test")
            .unwrap();
        WorkerSpec {
            pid: "PID-7".into(),
            plan_id: "PLAN-1".into(),
            recipe: recipe.into(),
            night: "2021-07-01".into(),
            profile: Profile::new("SPIROU", dir.path()),
            params,
            args: ArgBundle::new().with(OBS_DIR_ARG, ArgValue::Directory("2021-07-01".into())),
            calibrations: UsedCalibrations::new(),
            scratch: dir.path().join("scratch/PID-7"),
            log_file: dir.path().join("log/2021-07-01/PID-7.log"),
            log_level: "info".into(),
            wall_time_secs: 60,
            kill_after_secs: 1,
        }
    }

    #[test]
    fn test_products_are_staged_not_committed() {
        let dir = TempDir::new().unwrap();
        let spec = spec(&dir, "t_write");
        let result = worker().run(&spec, Arc::new(AtomicBool::new(false)));

        assert_eq!(result.status, WorkerStatus::Passed);
        assert_eq!(result.outputs.len(), 1);
        let staged = &result.outputs[0];
        assert_eq!(staged.filename, "2021-07-01_note.fits");
        assert!(staged.staged_path.starts_with(&spec.scratch));
        assert!(!staged.final_path().exists());

        let log = fs::read_to_string(&spec.log_file).unwrap();
        assert!(log.contains("PID-7 t_write started"));
    }

    #[test]
    fn test_qc_failure_keeps_products() {
        let dir = TempDir::new().unwrap();
        let result = worker().run(&spec(&dir, "t_qc"), Arc::new(AtomicBool::new(false)));
        assert_eq!(result.status, WorkerStatus::QcFailed);
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.error_kind(), Some(ErrorKind::QcFailed));
    }

    #[test]
    fn test_panics_become_exceptions() {
        let dir = TempDir::new().unwrap();
        let result = worker().run(&spec(&dir, "t_panic"), Arc::new(AtomicBool::new(false)));
        assert_eq!(result.status, WorkerStatus::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::Exception));
        assert!(result.error.unwrap().message.contains("lost the detector"));
    }

    #[test]
    fn test_bad_arguments_fail_before_the_body() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec(&dir, "t_write");
        spec.args = ArgBundle::new();
        let result = worker().run(&spec, Arc::new(AtomicBool::new(false)));
        assert_eq!(result.error_kind(), Some(ErrorKind::Arg));
        assert!(!spec.scratch.exists());

        spec.recipe = "apero_nothing".into();
        let result = worker().run(&spec, Arc::new(AtomicBool::new(false)));
        assert_eq!(result.error_kind(), Some(ErrorKind::Arg));
    }

    #[test]
    fn test_spec_file_round_trip_through_the_builtin_worker() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec(&dir, "apero_nothing");
        spec.write().unwrap();
        let result = run_spec_file(&spec.spec_path(), Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::Arg));
        assert_eq!(WorkerResult::read(&spec.result_path()).unwrap(), result);

        spec.profile.instrument = "HARPS".into();
        spec.write().unwrap();
        let result = run_spec_file(&spec.spec_path(), Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::Config));
    }

    #[test]
    fn test_raised_cancel_flag_ends_cancelled_with_a_result() {
        let dir = TempDir::new().unwrap();
        let spec = spec(&dir, "t_write");
        let result = worker().run(&spec, Arc::new(AtomicBool::new(true)));
        assert_eq!(result.status, WorkerStatus::Failed);
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        assert!(result.outputs.is_empty());

        let mut spec = spec;
        spec.recipe = "apero_dark".into();
        spec.write().unwrap();
        let result = run_spec_file(&spec.spec_path(), Arc::new(AtomicBool::new(true))).unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(WorkerResult::read(&spec.result_path()).unwrap(), result);
    }
}
