// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::value::ParamValue;
use crate::errors::ConfigError;

/// An ordered list of run rules plus global night and object filters.
///
/// # Example
/// ```yaml
/// name: nightly calibrations
/// exclude_nights: ["2021-06-30"]
/// rules:
///   - id: dark
///     recipe: apero_dark
///   - id: loc
///     recipe: apero_loc
///     priority: 20
///     params:
///       LOC_ORDERP_BOX_SIZE: 7
///   - id: extract
///     recipe: apero_extract
///     skip_done: false
///     objects: [GL699]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunTable {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub include_nights: Vec<String>,
    #[serde(default)]
    pub exclude_nights: Vec<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    pub rules: Vec<RunRule>,
    #[serde(skip)]
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRule {
    pub id: String,
    pub recipe: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub skip_done: bool,
    /// Lower runs first; defaults to the recipe's own priority.
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub nights: Vec<String>,
    #[serde(default)]
    pub objects: Vec<String>,
    /// Narrows the recipe's file filter to these DPRTYPEs.
    #[serde(default)]
    pub dprtypes: Vec<String>,
    /// Non-file recipe arguments.
    #[serde(default)]
    pub args: BTreeMap<String, ParamValue>,
    /// Constant overrides applied at the recipe-argument layer.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    /// Rule ids whose invocations must pass first.
    #[serde(default)]
    pub requires: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl RunRule {
    pub fn new(id: &str, recipe: &str) -> Self {
        Self {
            id: id.to_string(),
            recipe: recipe.to_string(),
            enabled: true,
            skip_done: true,
            priority: None,
            nights: vec![],
            objects: vec![],
            dprtypes: vec![],
            args: BTreeMap::new(),
            params: BTreeMap::new(),
            requires: vec![],
        }
    }

    pub fn accepts_dprtype(&self, dprtype: &str) -> bool {
        self.dprtypes.is_empty() || self.dprtypes.iter().any(|d| d == dprtype)
    }
}

impl RunTable {
    pub fn new(rules: Vec<RunRule>) -> Self {
        Self {
            rules,
            source: "inline".to_string(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut table: RunTable = serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        table.source = path.display().to_string();
        Ok(table)
    }

    pub fn enabled_rules(&self) -> impl Iterator<Item = &RunRule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    /// Global and per-rule night filters combined.
    pub fn night_selected(&self, rule: &RunRule, night: &str) -> bool {
        if self.exclude_nights.iter().any(|n| n == night) {
            return false;
        }
        let included = |list: &[String]| list.is_empty() || list.iter().any(|n| n == night);
        included(&self.include_nights) && included(&rule.nights)
    }

    /// Global and per-rule object filters combined; files without an object pass
    /// only when no filter applies.
    pub fn object_selected(&self, rule: &RunRule, object: Option<&str>) -> bool {
        let included = |list: &[String]| {
            list.is_empty()
                || object.map_or(false, |o| list.iter().any(|x| x.eq_ignore_ascii_case(o)))
        };
        included(&self.objects) && included(&rule.objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TABLE: &str = r#"
name: test
include_nights: ["2021-07-01", "2021-07-02"]
exclude_nights: ["2021-07-02"]
rules:
  - id: dark
    recipe: apero_dark
  - id: loc
    recipe: apero_loc
    enabled: false
  - id: extract
    recipe: apero_extract
    skip_done: false
    priority: 5
    objects: [gl699]
    params:
      EXTRACT_S1D_WAVEEND: 2400.0
"#;

    fn table() -> RunTable {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(&path, TABLE).unwrap();
        RunTable::load(&path).unwrap()
    }

    #[test]
    fn test_rules_load_with_defaults() {
        let table = table();
        assert_eq!(table.rules.len(), 3);
        assert!(table.rules[0].enabled && table.rules[0].skip_done);
        assert_eq!(table.rules[0].priority, None);
        assert!(!table.rules[2].skip_done);
        assert_eq!(table.rules[2].priority, Some(5));
        assert_eq!(
            table.rules[2].params["EXTRACT_S1D_WAVEEND"],
            ParamValue::Float(2400.0)
        );

        let enabled: Vec<&str> = table.enabled_rules().map(|r| r.id.as_str()).collect();
        assert_eq!(enabled, vec!["dark", "extract"]);
    }

    #[test]
    fn test_night_filters() {
        let table = table();
        let rule = &table.rules[0];
        assert!(table.night_selected(rule, "2021-07-01"));
        assert!(!table.night_selected(rule, "2021-07-02"));
        assert!(!table.night_selected(rule, "2021-07-03"));
    }

    #[test]
    fn test_object_filters() {
        let table = table();
        assert!(table.object_selected(&table.rules[0], None));
        assert!(table.object_selected(&table.rules[2], Some("GL699")));
        assert!(!table.object_selected(&table.rules[2], Some("TOI-1452")));
        assert!(!table.object_selected(&table.rules[2], None));
    }

    #[test]
    fn test_dprtype_narrowing() {
        let mut rule = RunRule::new("dark", "apero_dark");
        assert!(rule.accepts_dprtype("DARK_DARK_TEL"));
        rule.dprtypes = vec!["DARK_DARK_INT".into()];
        assert!(!rule.accepts_dprtype("DARK_DARK_TEL"));
    }
}
