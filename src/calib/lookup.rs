// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::ParameterSet;
use crate::db::{CalibDb, CalibRow, Databases};
use crate::errors::{CalibLookupError, ConfigError};
use crate::files::FileKind;

pub const CALIB_MATCH_PARAM: &str = "CALIB_DB_MATCH";
pub const TELLU_MATCH_PARAM: &str = "TELLU_DB_MATCH";
pub const USE_UNUSED_PARAM: &str = "CALIB_USE_UNUSED";

/// How a row's `mid_obs_time` is compared with the query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Smallest absolute time difference.
    #[default]
    Closest,
    /// Latest row at or before the query time.
    Older,
    /// Earliest row at or after the query time.
    Newer,
}

impl MatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPolicy::Closest => "closest",
            MatchPolicy::Older => "older",
            MatchPolicy::Newer => "newer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "closest" => Some(MatchPolicy::Closest),
            "older" => Some(MatchPolicy::Older),
            "newer" => Some(MatchPolicy::Newer),
            _ => None,
        }
    }

    /// The instrument or profile default for a database.
    pub fn from_params(params: &ParameterSet, kind: FileKind) -> Result<Self, ConfigError> {
        let key = match kind {
            FileKind::Telluric => TELLU_MATCH_PARAM,
            _ => CALIB_MATCH_PARAM,
        };
        let value = params.get_str(key)?;
        MatchPolicy::parse(value).ok_or_else(|| ConfigError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
            options: "closest, older, newer".to_string(),
        })
    }

    /// Distance of `row_time` from `query_time`, or `None` if the row is excluded.
    fn score(&self, row_time: f64, query_time: f64) -> Option<f64> {
        match self {
            MatchPolicy::Closest => Some((row_time - query_time).abs()),
            MatchPolicy::Older if row_time <= query_time => Some(query_time - row_time),
            MatchPolicy::Newer if row_time >= query_time => Some(row_time - query_time),
            _ => None,
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the best row for `query_time`.
///
/// `rows` must be in insertion order; on equal scores the earlier row wins.
/// Reference rows (`super_flag`) are exempt from the time constraint and are
/// chosen, closest first, only when no ordinary row qualifies.
///
/// ```rust
/// use apero::calib::{select, MatchPolicy};
///
/// assert!(select(&[], 58000.0, MatchPolicy::Closest).is_none());
/// ```
pub fn select(rows: &[CalibRow], query_time: f64, policy: MatchPolicy) -> Option<&CalibRow> {
    let ordinary = rows.iter().filter(|r| !r.entry.super_flag).filter_map(|r| {
        policy
            .score(r.entry.mid_obs_time, query_time)
            .map(|score| (r, score))
    });
    best_of(ordinary).or_else(|| {
        best_of(
            rows.iter()
                .filter(|r| r.entry.super_flag)
                .map(|r| (r, (r.entry.mid_obs_time - query_time).abs())),
        )
    })
}

fn best_of<'a>(candidates: impl Iterator<Item = (&'a CalibRow, f64)>) -> Option<&'a CalibRow> {
    let mut best: Option<(&CalibRow, f64)> = None;
    for (row, score) in candidates {
        if best.map_or(true, |(_, current)| score < current) {
            best = Some((row, score));
        }
    }
    best.map(|(row, _)| row)
}

/// One calibration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibQuery {
    /// `Calibration` for calibDB, `Telluric` for telluDB.
    pub db: FileKind,
    pub key: String,
    pub fiber: Option<String>,
    pub time: f64,
    pub policy: MatchPolicy,
    /// Restricts telluDB rows to one object.
    pub objname: Option<String>,
}

impl CalibQuery {
    pub fn new(key: &str, fiber: Option<&str>, time: f64, policy: MatchPolicy) -> Self {
        Self {
            db: FileKind::Calibration,
            key: key.to_string(),
            fiber: fiber.map(str::to_string),
            time,
            policy,
            objname: None,
        }
    }

    pub fn telluric(mut self, objname: Option<&str>) -> Self {
        self.db = FileKind::Telluric;
        self.objname = objname.map(str::to_string);
        self
    }
}

/// The row a lookup returned, with the query that selected it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibMatch {
    pub db: FileKind,
    pub key: String,
    pub fiber: Option<String>,
    pub filename: String,
    pub path: PathBuf,
    pub mid_obs_time: f64,
    pub query_time: f64,
    pub policy: MatchPolicy,
    pub super_flag: bool,
    pub rowid: i64,
}

/// Read-only lookup over calibDB and telluDB.
#[derive(Debug, Clone)]
pub struct CalibLookup {
    calib: CalibDb,
    tellu: CalibDb,
    include_unused: bool,
}

impl CalibLookup {
    pub fn new(databases: &Databases) -> Self {
        Self {
            calib: databases.calib.clone(),
            tellu: databases.tellu.clone(),
            include_unused: false,
        }
    }

    /// Also consider rows of products that failed quality control.
    pub fn include_unused(mut self, include: bool) -> Self {
        self.include_unused = include;
        self
    }

    pub fn find(&self, query: &CalibQuery) -> Result<CalibMatch, CalibLookupError> {
        let db = match query.db {
            FileKind::Telluric => &self.tellu,
            _ => &self.calib,
        };
        let rows = db.rows(
            &query.key,
            query.fiber.as_deref(),
            query.objname.as_deref(),
            self.include_unused,
        )?;

        let row = select(&rows, query.time, query.policy).ok_or_else(|| {
            CalibLookupError::NoCalibration {
                key: query.key.clone(),
                fiber: query.fiber.clone().unwrap_or_else(|| "-".to_string()),
                time: query.time,
                policy: query.policy.to_string(),
            }
        })?;

        Ok(CalibMatch {
            db: db.kind(),
            key: row.entry.key.clone(),
            fiber: row.entry.fiber.clone(),
            filename: row.entry.filename.clone(),
            path: row.entry.file_path.clone(),
            mid_obs_time: row.entry.mid_obs_time,
            query_time: query.time,
            policy: query.policy,
            super_flag: row.entry.super_flag,
            rowid: row.rowid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CalibEntry, RetryPolicy};
    use crate::lock::{LockManager, LockOptions};
    use tempfile::TempDir;

    fn row(rowid: i64, time: f64, super_flag: bool) -> CalibRow {
        CalibRow {
            rowid,
            entry: CalibEntry {
                key: "WAVE".into(),
                fiber: Some("AB".into()),
                night: "2021-07-01".into(),
                filename: format!("wave_{rowid}.fits"),
                file_path: PathBuf::from(format!("/calib/wave_{rowid}.fits")),
                mid_obs_time: time,
                used_flag: true,
                super_flag,
                objname: None,
                pid: None,
            },
        }
    }

    fn picked(rows: &[CalibRow], time: f64, policy: MatchPolicy) -> Option<f64> {
        select(rows, time, policy).map(|r| r.entry.mid_obs_time)
    }

    #[test]
    fn test_select_table() {
        let rows = vec![
            row(1, 58000.0, false),
            row(2, 58005.0, false),
            row(3, 58010.0, false),
        ];
        let cases = [
            (58006.0, MatchPolicy::Closest, Some(58005.0)),
            (58006.0, MatchPolicy::Older, Some(58005.0)),
            (58000.0, MatchPolicy::Older, Some(58000.0)),
            (57999.0, MatchPolicy::Older, None),
            (58006.0, MatchPolicy::Newer, Some(58010.0)),
            (58010.5, MatchPolicy::Newer, None),
            (60000.0, MatchPolicy::Closest, Some(58010.0)),
        ];
        for (time, policy, expected) in cases {
            assert_eq!(picked(&rows, time, policy), expected, "{policy} at {time}");
        }
    }

    #[test]
    fn test_ties_prefer_the_earlier_row() {
        let rows = vec![row(1, 58004.0, false), row(2, 58006.0, false), row(3, 58004.0, false)];
        assert_eq!(select(&rows, 58005.0, MatchPolicy::Closest).unwrap().rowid, 1);
        assert_eq!(select(&rows, 58005.0, MatchPolicy::Older).unwrap().rowid, 1);
    }

    #[test]
    fn test_reference_rows_ignore_the_time_constraint() {
        let rows = vec![row(1, 59000.0, true)];
        assert_eq!(picked(&rows, 58000.0, MatchPolicy::Older), Some(59000.0));

        let mixed = vec![row(1, 59000.0, true), row(2, 57000.0, false)];
        assert_eq!(select(&mixed, 58000.0, MatchPolicy::Older).unwrap().rowid, 2);
    }

    #[test]
    fn test_policy_parse_and_params() {
        assert_eq!(MatchPolicy::parse(" Older "), Some(MatchPolicy::Older));
        assert_eq!(MatchPolicy::parse("nearest"), None);

        let instrument = crate::config::Instrument::builtin("SPIROU").unwrap();
        let params = crate::config::ParameterResolver::new(&instrument)
            .resolve(&Default::default(), "test", &Default::default(), "test")
            .unwrap();
        assert!(MatchPolicy::from_params(&params, FileKind::Calibration).is_ok());
        assert!(MatchPolicy::from_params(&params, FileKind::Telluric).is_ok());
    }

    #[test]
    fn test_lookup_is_stable_and_skips_unused_rows() {
        let dir = TempDir::new().unwrap();
        let locks = LockManager::new(dir.path().join("locks"), LockOptions::default());
        let dbs = Databases::open(&dir.path().join("db"), &locks, RetryPolicy::default()).unwrap();

        for (time, used) in [(58000.0, true), (58005.0, true), (58006.0, false), (58010.0, true)] {
            let mut entry = row(0, time, false).entry;
            entry.filename = format!("wave_{time}.fits");
            entry.used_flag = used;
            dbs.calib.add(&entry).unwrap();
        }

        let lookup = CalibLookup::new(&dbs);
        let query = CalibQuery::new("WAVE", Some("AB"), 58006.0, MatchPolicy::Closest);
        let first = lookup.find(&query).unwrap();
        assert_eq!(first.filename, "wave_58005.fits");
        assert_eq!(lookup.find(&query).unwrap(), first);

        let with_unused = lookup.clone().include_unused(true).find(&query).unwrap();
        assert_eq!(with_unused.filename, "wave_58006.fits");

        let missing = CalibQuery::new("WAVE", Some("AB"), 57999.0, MatchPolicy::Older);
        assert!(matches!(
            lookup.find(&missing),
            Err(CalibLookupError::NoCalibration { .. })
        ));
        let other_fiber = CalibQuery::new("WAVE", Some("C"), 58006.0, MatchPolicy::Closest);
        assert!(lookup.find(&other_fiber).is_err());
    }
}
