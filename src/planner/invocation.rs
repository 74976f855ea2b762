// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::calib::{CalibQuery, MatchPolicy};
use crate::config::{Instrument, ParamValue, ParameterResolver, ParameterSet, Profile};
use crate::db::{RunLogEntry, RunStatus};
use crate::errors::ConfigError;
use crate::files::{fingerprint, BoundFile, FileKind};
use crate::recipes::{ArgBundle, CalibRequirement, Recipe};

/// A product the planner expects an invocation to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedOutput {
    pub output: String,
    pub kind: FileKind,
    pub night: String,
    pub filename: String,
    pub path: PathBuf,
    pub calib_key: Option<String>,
    pub fiber: Option<String>,
}

/// One concrete recipe call in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub pid: String,
    pub rule_id: String,
    pub recipe: String,
    pub night: String,
    pub group_key: String,
    pub args: ArgBundle,
    /// Constant overrides from the run rule.
    pub params: BTreeMap<String, ParamValue>,
    pub priority: i32,
    pub skip_done: bool,
    /// Mean mid-exposure MJD of the primary inputs.
    pub query_time: Option<f64>,
    pub objname: Option<String>,
    pub outputs: Vec<PredictedOutput>,
    /// Pids that must finish first.
    pub upstream: Vec<String>,
    pub estimated_bytes: u64,
}

impl Invocation {
    /// A recipe called by hand with already bound arguments. Skip-if-done
    /// does not apply.
    pub fn direct(recipe: &Recipe, args: ArgBundle) -> Self {
        let files = args.all_files();
        let night = args
            .directory()
            .map(str::to_string)
            .or_else(|| files.first().map(|f| f.night.clone()))
            .unwrap_or_default();
        let times: Vec<f64> = files.iter().filter_map(|f| f.mid_obs_time).collect();
        let query_time = if times.is_empty() {
            None
        } else {
            Some(times.iter().sum::<f64>() / times.len() as f64)
        };
        let objname = files.iter().find_map(|f| f.object.clone());

        Self {
            pid: format!("PID-{}", Utc::now().format("%Y%m%d%H%M%S%3f")),
            rule_id: "cli".to_string(),
            recipe: recipe.name.clone(),
            group_key: night.clone(),
            night,
            args,
            params: BTreeMap::new(),
            priority: recipe.priority,
            skip_done: false,
            query_time,
            objname,
            outputs: vec![],
            upstream: vec![],
            estimated_bytes: 0,
        }
    }

    /// Short human label, also used in cycle reports.
    pub fn label(&self) -> String {
        format!("{}@{}", self.recipe, self.group_key)
    }

    pub fn input_files(&self) -> Vec<&BoundFile> {
        self.args.all_files()
    }

    /// Fingerprint of the bound arguments and the rule's overrides.
    pub fn arg_fingerprint(&self) -> String {
        fingerprint::json(&json!({
            "args": self.args.to_json(),
            "params": self.params,
        }))
    }

    /// Constants for this invocation: instrument defaults, then the profile,
    /// then the rule's overrides.
    pub fn resolve_params(
        &self,
        instrument: &Instrument,
        profile: &Profile,
    ) -> Result<ParameterSet, ConfigError> {
        ParameterResolver::new(instrument).resolve(
            &profile.constants,
            &profile.source,
            &self.params,
            &format!("rule:{}", self.rule_id),
        )
    }

    /// Time calibrations are matched against. Falls back to the start of the
    /// night when no input carries a mid-exposure time.
    pub fn match_time(&self) -> f64 {
        self.query_time
            .or_else(|| night_mjd(&self.night))
            .unwrap_or(0.0)
    }

    pub fn calib_query(
        &self,
        requirement: &CalibRequirement,
        params: &ParameterSet,
    ) -> Result<CalibQuery, ConfigError> {
        let policy = match requirement.policy {
            Some(policy) => policy,
            None => MatchPolicy::from_params(params, requirement.db)?,
        };
        let query = CalibQuery::new(
            &requirement.key,
            requirement.fiber.as_deref(),
            self.match_time(),
            policy,
        );
        Ok(match requirement.db {
            FileKind::Telluric => {
                let objname = if requirement.per_object {
                    self.objname.as_deref()
                } else {
                    None
                };
                query.telluric(objname)
            }
            _ => query,
        })
    }

    /// A run log row for this invocation with the given status.
    pub fn runlog_entry(&self, status: RunStatus, input_fingerprint: &str) -> RunLogEntry {
        RunLogEntry {
            pid: self.pid.clone(),
            rule_id: self.rule_id.clone(),
            recipe: self.recipe.clone(),
            night: self.night.clone(),
            group_key: self.group_key.clone(),
            args: self.args.to_json(),
            arg_fingerprint: self.arg_fingerprint(),
            input_fingerprint: input_fingerprint.to_string(),
            start: None,
            end: None,
            status,
            error_kind: None,
            error_msg: None,
            parent_pid: None,
            log_path: None,
        }
    }
}

/// MJD at 00:00 UTC of a `YYYY-MM-DD` night.
pub fn night_mjd(night: &str) -> Option<f64> {
    let date = NaiveDate::parse_from_str(night, "%Y-%m-%d").ok()?;
    let epoch = NaiveDate::from_ymd_opt(1858, 11, 17)?;
    Some((date - epoch).num_days() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipes::{ArgValue, OBS_DIR_ARG};

    fn invocation() -> Invocation {
        Invocation {
            pid: "PID-1".to_string(),
            rule_id: "tellu".to_string(),
            recipe: "apero_fit_tellu".to_string(),
            night: "2021-07-01".to_string(),
            group_key: "2021-07-01/a.fits".to_string(),
            args: ArgBundle::new().with(OBS_DIR_ARG, ArgValue::Directory("2021-07-01".into())),
            params: BTreeMap::new(),
            priority: 9,
            skip_done: true,
            query_time: None,
            objname: Some("GL699".to_string()),
            outputs: vec![],
            upstream: vec![],
            estimated_bytes: 0,
        }
    }

    #[test]
    fn test_night_mjd() {
        assert_eq!(night_mjd("1858-11-17"), Some(0.0));
        assert_eq!(night_mjd("2021-07-01"), Some(59396.0));
        assert_eq!(night_mjd("not-a-night"), None);
    }

    #[test]
    fn test_match_time_prefers_inputs() {
        let mut inv = invocation();
        assert_eq!(inv.match_time(), 59396.0);
        inv.query_time = Some(59396.25);
        assert_eq!(inv.match_time(), 59396.25);
    }

    #[test]
    fn test_fingerprint_tracks_overrides() {
        let mut inv = invocation();
        let before = inv.arg_fingerprint();
        inv.params.insert("DARK_QMIN".to_string(), ParamValue::Int(3));
        assert_ne!(before, inv.arg_fingerprint());
    }

    #[test]
    fn test_per_object_telluric_query_carries_object() {
        let instrument = Instrument::builtin("SPIROU").unwrap();
        let profile = Profile::new("SPIROU", "/tmp/apero");
        let inv = invocation();
        let params = inv.resolve_params(&instrument, &profile).unwrap();

        let shared = CalibRequirement::telluric("TELLU_TRANS", Some("AB"), false);
        let query = inv.calib_query(&shared, &params).unwrap();
        assert_eq!(query.db, FileKind::Telluric);
        assert_eq!(query.objname, None);

        let per_object = CalibRequirement::telluric("TELLU_TRANS", Some("AB"), true)
            .with_policy(MatchPolicy::Older);
        let query = inv.calib_query(&per_object, &params).unwrap();
        assert_eq!(query.objname.as_deref(), Some("GL699"));
        assert_eq!(query.policy, MatchPolicy::Older);
    }

    #[test]
    fn test_direct_invocation_takes_night_and_time_from_inputs() {
        let recipe = Recipe::new(
            "apero_note",
            "SPIROU",
            |_: &mut crate::recipes::RecipeContext| -> Result<(), crate::errors::RecipeError> { Ok(()) },
        );
        let file = BoundFile {
            path: PathBuf::from("/raw/2021-07-02/a.fits"),
            night: "2021-07-02".to_string(),
            filename: "a.fits".to_string(),
            kind: FileKind::Raw,
            dprtype: "OBJ_FP".to_string(),
            fiber: None,
            object: Some("GL699".to_string()),
            mid_obs_time: Some(59397.2),
        };
        let args = ArgBundle::new().with("files", ArgValue::Files(vec![file]));
        let inv = Invocation::direct(&recipe, args);

        assert!(inv.pid.starts_with("PID-"));
        assert_eq!(inv.night, "2021-07-02");
        assert_eq!(inv.query_time, Some(59397.2));
        assert_eq!(inv.objname.as_deref(), Some("GL699"));
        assert!(!inv.skip_done);
    }
}
