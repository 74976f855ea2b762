// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::consts::{
    DEFAULT_DB_BUSY_TIMEOUT_MS, DEFAULT_DB_RETRY_ATTEMPTS, DEFAULT_DB_RETRY_INITIAL_MS,
    DEFAULT_DB_RETRY_MAX_MS, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_KILL_AFTER_SECS,
    DEFAULT_LOCK_INITIAL_BACKOFF_MS, DEFAULT_LOCK_MAX_BACKOFF_MS, DEFAULT_LOCK_MAX_WAIT_SECS,
    DEFAULT_QUIESCENCE_SECS, DEFAULT_SCAN_INTERVAL_SECS, DEFAULT_WALL_TIME_SECS,
};
use super::value::ParamValue;
use crate::db::RetryPolicy;
use crate::errors::ConfigError;
use crate::files::FileKind;
use crate::lock::{LockOptions, StalePolicy};

/// Environment variable naming the profile file.
pub const ENV_PROFILE: &str = "APERO_PROFILE";

/// A user profile: instrument selection, data roots and runtime options.
///
/// The `constants` section is the user layer of parameter resolution.
/// Profiles are YAML unless the file ends in `.toml`.
///
/// # Example
/// ```yaml
/// instrument: SPIROU
/// paths:
///   working: /data/apero
///   raw: /data/raw
/// scheduler:
///   pool_size: 8
///   wall_time_secs:
///     apero_extract: 1800
/// lock:
///   max_wait_secs: 120
///   stale_policy: reclaim
/// constants:
///   DARK_QMIN: 7
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub instrument: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub constants: BTreeMap<String, ParamValue>,
    /// Where the profile was read from.
    #[serde(skip)]
    pub source: String,
}

/// Data roots as written in the profile. Unset roots default under `working`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    pub working: Option<PathBuf>,
    pub raw: Option<PathBuf>,
    pub reduced: Option<PathBuf>,
    pub tmp: Option<PathBuf>,
    pub calib: Option<PathBuf>,
    pub tellu: Option<PathBuf>,
    pub logs: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub locks: Option<PathBuf>,
}

/// Every root resolved to a concrete directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPaths {
    pub working: PathBuf,
    pub raw: PathBuf,
    pub reduced: PathBuf,
    pub tmp: PathBuf,
    pub calib: PathBuf,
    pub tellu: PathBuf,
    pub logs: PathBuf,
    pub db: PathBuf,
    pub locks: PathBuf,
    pub scratch: PathBuf,
}

impl ResolvedPaths {
    /// Directory a file kind lives under.
    pub fn root_for(&self, kind: FileKind) -> &Path {
        match kind {
            FileKind::Raw => &self.raw,
            FileKind::Preprocessed => &self.tmp,
            FileKind::Reduced => &self.reduced,
            FileKind::Calibration => &self.calib,
            FileKind::Telluric => &self.tellu,
        }
    }

    /// Directories the orchestrator writes into.
    pub fn writable(&self) -> [&Path; 8] {
        [
            &self.reduced,
            &self.tmp,
            &self.calib,
            &self.tellu,
            &self.logs,
            &self.db,
            &self.locks,
            &self.scratch,
        ]
    }

    pub fn create_all(&self) -> Result<(), ConfigError> {
        for dir in self.writable() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker processes; defaults to the available parallelism.
    pub pool_size: Option<usize>,
    pub default_wall_time_secs: Option<u64>,
    pub grace_period_secs: Option<u64>,
    pub kill_after_secs: Option<u64>,
    /// Per-recipe wall-time budget.
    #[serde(default)]
    pub wall_time_secs: BTreeMap<String, u64>,
    /// Per-recipe memory budget.
    #[serde(default)]
    pub memory_mb: BTreeMap<String, u64>,
    /// Total memory the pool may commit at once.
    pub memory_budget_mb: Option<u64>,
}

impl SchedulerConfig {
    pub fn pool_size(&self) -> usize {
        self.pool_size
            .filter(|n| *n > 0)
            .unwrap_or_else(default_concurrency)
    }

    /// Profile budget, then the recipe's own declaration, then the global default.
    pub fn wall_time_for(&self, recipe: &str, declared: Option<Duration>) -> Duration {
        self.wall_time_secs
            .get(recipe)
            .map(|secs| Duration::from_secs(*secs))
            .or(declared)
            .unwrap_or_else(|| {
                Duration::from_secs(self.default_wall_time_secs.unwrap_or(DEFAULT_WALL_TIME_SECS))
            })
    }

    pub fn memory_for(&self, recipe: &str, declared: Option<u64>) -> Option<u64> {
        self.memory_mb.get(recipe).copied().or(declared)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs.unwrap_or(DEFAULT_GRACE_PERIOD_SECS))
    }

    pub fn kill_after(&self) -> Duration {
        Duration::from_secs(self.kill_after_secs.unwrap_or(DEFAULT_KILL_AFTER_SECS))
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockConfig {
    pub max_wait_secs: Option<u64>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    #[serde(default)]
    pub stale_policy: StalePolicy,
}

impl LockConfig {
    pub fn options(&self) -> LockOptions {
        LockOptions {
            max_wait: Duration::from_secs(self.max_wait_secs.unwrap_or(DEFAULT_LOCK_MAX_WAIT_SECS)),
            initial_backoff: Duration::from_millis(
                self.initial_backoff_ms
                    .unwrap_or(DEFAULT_LOCK_INITIAL_BACKOFF_MS),
            ),
            max_backoff: Duration::from_millis(
                self.max_backoff_ms.unwrap_or(DEFAULT_LOCK_MAX_BACKOFF_MS),
            ),
            stale_policy: self.stale_policy,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub retry_attempts: Option<u32>,
    pub retry_initial_ms: Option<u64>,
    pub retry_max_ms: Option<u64>,
    pub busy_timeout_ms: Option<u64>,
}

impl DatabaseConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.unwrap_or(DEFAULT_DB_RETRY_ATTEMPTS).max(1),
            initial_backoff: Duration::from_millis(
                self.retry_initial_ms.unwrap_or(DEFAULT_DB_RETRY_INITIAL_MS),
            ),
            max_backoff: Duration::from_millis(self.retry_max_ms.unwrap_or(DEFAULT_DB_RETRY_MAX_MS)),
            busy_timeout: Duration::from_millis(
                self.busy_timeout_ms.unwrap_or(DEFAULT_DB_BUSY_TIMEOUT_MS),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub scan_interval_secs: Option<u64>,
    pub quiescence_secs: Option<u64>,
    /// Run table planned for every stabilized night.
    pub run_table: Option<PathBuf>,
}

impl TriggerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.unwrap_or(DEFAULT_SCAN_INTERVAL_SECS))
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_secs(self.quiescence_secs.unwrap_or(DEFAULT_QUIESCENCE_SECS))
    }
}

impl Profile {
    /// A profile with every root under `working` and default options.
    pub fn new(instrument: &str, working: impl Into<PathBuf>) -> Self {
        Self {
            instrument: instrument.to_string(),
            paths: PathsConfig {
                working: Some(working.into()),
                ..PathsConfig::default()
            },
            scheduler: SchedulerConfig::default(),
            lock: LockConfig::default(),
            database: DatabaseConfig::default(),
            trigger: TriggerConfig::default(),
            constants: BTreeMap::new(),
            source: "defaults".to_string(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut profile: Profile = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text).map_err(|e| parse_error(e.to_string()))?,
            _ => serde_yaml::from_str(&text).map_err(|e| parse_error(e.to_string()))?,
        };
        profile.source = path.display().to_string();
        Ok(profile)
    }

    /// Load the profile named by `explicit`, or by `APERO_PROFILE`, then apply
    /// the path environment overrides.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => std::env::var_os(ENV_PROFILE)
                .map(PathBuf::from)
                .ok_or_else(|| ConfigError::MissingKey {
                    key: ENV_PROFILE.to_string(),
                })?,
        };
        let mut profile = Self::load(&path)?;
        profile.apply_env_with(|key| std::env::var(key).ok());
        Ok(profile)
    }

    /// Override path roots from `APERO_*` variables as returned by `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let paths = &mut self.paths;
        let slots: [(&str, &mut Option<PathBuf>); 7] = [
            ("APERO_WORKING", &mut paths.working),
            ("APERO_RAW", &mut paths.raw),
            ("APERO_REDUCED", &mut paths.reduced),
            ("APERO_TMP", &mut paths.tmp),
            ("APERO_CALIB", &mut paths.calib),
            ("APERO_TELLU", &mut paths.tellu),
            ("APERO_LOGS", &mut paths.logs),
        ];
        for (key, slot) in slots {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = Some(PathBuf::from(value));
            }
        }
    }

    pub fn paths(&self) -> ResolvedPaths {
        let working = self
            .paths
            .working
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let under = |slot: &Option<PathBuf>, name: &str| {
            slot.clone().unwrap_or_else(|| working.join(name))
        };
        ResolvedPaths {
            raw: under(&self.paths.raw, "raw"),
            reduced: under(&self.paths.reduced, "red"),
            tmp: under(&self.paths.tmp, "tmp"),
            calib: under(&self.paths.calib, "calib"),
            tellu: under(&self.paths.tellu, "tellu"),
            logs: under(&self.paths.logs, "log"),
            db: under(&self.paths.db, "db"),
            locks: under(&self.paths.locks, "locks"),
            scratch: working.join("scratch"),
            working,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_and_toml_profiles_load() {
        let dir = TempDir::new().unwrap();

        let yaml = dir.path().join("profile.yaml");
        fs::write(
            &yaml,
            "instrument: SPIROU\npaths:\n  working: /data/apero\nscheduler:\n  pool_size: 3\nconstants:\n  DARK_QMIN: 7\n",
        )
        .unwrap();
        let profile = Profile::load(&yaml).unwrap();
        assert_eq!(profile.instrument, "SPIROU");
        assert_eq!(profile.scheduler.pool_size(), 3);
        assert_eq!(profile.constants["DARK_QMIN"], ParamValue::Int(7));
        assert!(profile.source.ends_with("profile.yaml"));

        let toml_path = dir.path().join("profile.toml");
        fs::write(
            &toml_path,
            "instrument = \"NIRPS_HA\"\n[paths]\nworking = \"/data/nirps\"\n[lock]\nmax_wait_secs = 5\nstale_policy = \"fail\"\n",
        )
        .unwrap();
        let profile = Profile::load(&toml_path).unwrap();
        assert_eq!(profile.instrument, "NIRPS_HA");
        assert_eq!(profile.lock.options().max_wait, Duration::from_secs(5));
        assert_eq!(profile.lock.options().stale_policy, StalePolicy::Fail);
    }

    #[test]
    fn test_unset_roots_default_under_working() {
        let paths = Profile::new("SPIROU", "/w").paths();
        assert_eq!(paths.raw, PathBuf::from("/w/raw"));
        assert_eq!(paths.reduced, PathBuf::from("/w/red"));
        assert_eq!(paths.root_for(FileKind::Calibration), Path::new("/w/calib"));
        assert_eq!(paths.root_for(FileKind::Preprocessed), Path::new("/w/tmp"));
    }

    #[test]
    fn test_environment_overrides_paths() {
        let mut profile = Profile::new("SPIROU", "/w");
        let env: HashMap<&str, &str> =
            HashMap::from([("APERO_RAW", "/mnt/raw"), ("APERO_LOGS", "  ")]);
        profile.apply_env_with(|key| env.get(key).map(|v| v.to_string()));

        let paths = profile.paths();
        assert_eq!(paths.raw, PathBuf::from("/mnt/raw"));
        assert_eq!(paths.logs, PathBuf::from("/w/log"));
    }

    #[test]
    fn test_wall_time_precedence() {
        let mut scheduler = SchedulerConfig::default();
        scheduler.wall_time_secs.insert("apero_wave".into(), 10);

        assert_eq!(
            scheduler.wall_time_for("apero_wave", Some(Duration::from_secs(99))),
            Duration::from_secs(10)
        );
        assert_eq!(
            scheduler.wall_time_for("apero_dark", Some(Duration::from_secs(99))),
            Duration::from_secs(99)
        );
        assert_eq!(
            scheduler.wall_time_for("apero_dark", None),
            Duration::from_secs(DEFAULT_WALL_TIME_SECS)
        );
    }

    #[test]
    fn test_unparseable_profile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "instrument: [unclosed").unwrap();
        assert!(matches!(Profile::load(&path), Err(ConfigError::Parse { .. })));
    }
}
