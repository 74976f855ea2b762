// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Messages exchanged between the supervisor and a worker.
//!
//! A process worker receives its [`WorkerSpec`] as `spec.json` in its scratch
//! directory and leaves a [`WorkerResult`] as `result.json` next to it. The
//! in-process launcher passes the same values directly.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calib::UsedCalibrations;
use crate::config::consts::OUTPUT_TAIL_BYTES;
use crate::config::{ParameterSet, Profile};
use crate::errors::{ErrorKind, ExecutionError};
use crate::recipes::{ArgBundle, QcSet, StagedOutput};

pub const SPEC_FILE: &str = "spec.json";
pub const RESULT_FILE: &str = "result.json";

/// Everything a worker needs to run one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub pid: String,
    pub plan_id: String,
    pub recipe: String,
    pub night: String,
    pub profile: Profile,
    pub params: ParameterSet,
    pub args: ArgBundle,
    pub calibrations: UsedCalibrations,
    /// Per-pid directory products are staged in.
    pub scratch: PathBuf,
    pub log_file: PathBuf,
    pub log_level: String,
    pub wall_time_secs: u64,
    pub kill_after_secs: u64,
}

impl WorkerSpec {
    pub fn wall_time(&self) -> Duration {
        Duration::from_secs(self.wall_time_secs)
    }

    pub fn kill_after(&self) -> Duration {
        Duration::from_secs(self.kill_after_secs)
    }

    pub fn spec_path(&self) -> PathBuf {
        self.scratch.join(SPEC_FILE)
    }

    pub fn result_path(&self) -> PathBuf {
        self.scratch.join(RESULT_FILE)
    }

    /// Write `spec.json` into the scratch directory.
    pub fn write(&self) -> Result<PathBuf, ExecutionError> {
        fs::create_dir_all(&self.scratch).map_err(|source| ExecutionError::Staging {
            path: self.scratch.clone(),
            source,
        })?;
        let path = self.spec_path();
        write_json(&path, self)?;
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self, ExecutionError> {
        read_json(path)
    }
}

/// How a worker ended, before the supervisor maps it to a run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Passed,
    QcFailed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerError {
    pub kind: ErrorKind,
    pub message: String,
}

/// What came back from a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub pid: String,
    pub status: WorkerStatus,
    #[serde(default)]
    pub outputs: Vec<StagedOutput>,
    #[serde(default)]
    pub qc: QcSet,
    pub error: Option<WorkerError>,
    pub duration_ms: u64,
    /// Last bytes of the worker's stdout and stderr.
    #[serde(default)]
    pub output_tail: String,
}

impl WorkerResult {
    pub fn passed(pid: &str, outputs: Vec<StagedOutput>, qc: QcSet, duration: Duration) -> Self {
        Self {
            pid: pid.to_string(),
            status: WorkerStatus::Passed,
            outputs,
            qc,
            error: None,
            duration_ms: duration.as_millis() as u64,
            output_tail: String::new(),
        }
    }

    /// Products are kept; the calibration rows they create are marked unused.
    pub fn qc_failed(pid: &str, outputs: Vec<StagedOutput>, qc: QcSet, duration: Duration) -> Self {
        let message = qc.summary();
        Self {
            status: WorkerStatus::QcFailed,
            error: Some(WorkerError {
                kind: ErrorKind::QcFailed,
                message,
            }),
            ..Self::passed(pid, outputs, qc, duration)
        }
    }

    pub fn failed(pid: &str, kind: ErrorKind, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            pid: pid.to_string(),
            status: WorkerStatus::Failed,
            outputs: vec![],
            qc: QcSet::new(),
            error: Some(WorkerError {
                kind,
                message: message.into(),
            }),
            duration_ms: duration.as_millis() as u64,
            output_tail: String::new(),
        }
    }

    pub fn with_output_tail(mut self, tail: String) -> Self {
        self.output_tail = tail;
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn write(&self, path: &Path) -> Result<(), ExecutionError> {
        write_json(path, self)
    }

    pub fn read(path: &Path) -> Result<Self, ExecutionError> {
        read_json(path)
    }
}

/// The last `OUTPUT_TAIL_BYTES` of `bytes`, lossily decoded.
pub fn output_tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(OUTPUT_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ExecutionError> {
    let text = serde_json::to_vec_pretty(value)
        .map_err(|e| ExecutionError::Protocol(format!("{}: {e}", path.display())))?;
    fs::write(path, text).map_err(|source| ExecutionError::Staging {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ExecutionError> {
    let text = fs::read(path).map_err(|source| ExecutionError::Staging {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&text)
        .map_err(|e| ExecutionError::Protocol(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Instrument, ParameterResolver};
    use crate::recipes::{ArgValue, OBS_DIR_ARG};
    use tempfile::TempDir;

    fn spec(dir: &TempDir) -> WorkerSpec {
        let instrument = Instrument::builtin("SPIROU").unwrap();
        let params = ParameterResolver::new(&instrument)
            .resolve(&Default::default(), "test", &Default::default(), "test")
            .unwrap();
        WorkerSpec {
            pid: "PID-1".into(),
            plan_id: "PLAN-1".into(),
            recipe: "apero_dark".into(),
            night: "2021-07-01".into(),
            profile: Profile::new("SPIROU", dir.path()),
            params,
            args: ArgBundle::new().with(OBS_DIR_ARG, ArgValue::Directory("2021-07-01".into())),
            calibrations: UsedCalibrations::new(),
            scratch: dir.path().join("scratch/PID-1"),
            log_file: dir.path().join("log/2021-07-01/PID-1.log"),
            log_level: "info".into(),
            wall_time_secs: 60,
            kill_after_secs: 2,
        }
    }

    #[test]
    fn test_spec_file_survives_the_process_boundary() {
        let dir = TempDir::new().unwrap();
        let spec = spec(&dir);
        let path = spec.write().unwrap();
        assert_eq!(path, dir.path().join("scratch/PID-1/spec.json"));

        let read = WorkerSpec::read(&path).unwrap();
        assert_eq!(read.pid, "PID-1");
        assert_eq!(read.args.directory(), Some("2021-07-01"));
        assert_eq!(read.params.get_i64("DARK_QMIN").ok(), spec.params.get_i64("DARK_QMIN").ok());
        assert_eq!(read.profile.paths().calib, dir.path().join("calib"));
        assert_eq!(read.wall_time(), Duration::from_secs(60));
    }

    #[test]
    fn test_qc_failed_result_carries_summary() {
        let mut qc = QcSet::new();
        qc.check("DARK_MED", 2.0, "DARK_MED < 0.5", false);
        let result = WorkerResult::qc_failed("PID-1", vec![], qc, Duration::from_millis(5));
        assert_eq!(result.status, WorkerStatus::QcFailed);
        assert_eq!(result.error_kind(), Some(ErrorKind::QcFailed));
        assert!(result.error.unwrap().message.contains("DARK_MED"));
    }

    #[test]
    fn test_unreadable_result_is_a_protocol_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(RESULT_FILE);
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(WorkerResult::read(&path), Err(ExecutionError::Protocol(_))));
        assert!(matches!(
            WorkerResult::read(&dir.path().join("absent.json")),
            Err(ExecutionError::Staging { .. })
        ));
    }

    #[test]
    fn test_output_tail_keeps_the_end() {
        let long = vec![b'x'; OUTPUT_TAIL_BYTES + 10];
        assert_eq!(output_tail(&long).len(), OUTPUT_TAIL_BYTES);
        assert_eq!(output_tail(b"short"), "short");
    }
}
