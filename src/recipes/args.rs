// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ParamValue;
use crate::errors::RecipeArgError;
use crate::files::{BoundFile, DrsFileSpec};

/// Name of the observation-directory argument every night-based recipe takes.
pub const OBS_DIR_ARG: &str = "obs_dir";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    Directory,
    Files,
    Flag,
    String,
    Int,
    Float,
}

impl ArgKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgKind::Directory => "directory",
            ArgKind::Files => "files",
            ArgKind::Flag => "flag",
            ArgKind::String => "string",
            ArgKind::Int => "int",
            ArgKind::Float => "float",
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many values an argument takes. Only `files` arguments take more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    One,
    Optional,
    AtLeastOne,
    Any,
}

impl Multiplicity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Multiplicity::One => count == 1,
            Multiplicity::Optional => count <= 1,
            Multiplicity::AtLeastOne => count >= 1,
            Multiplicity::Any => true,
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Multiplicity::One | Multiplicity::AtLeastOne)
    }

    fn describe(&self) -> &'static str {
        match self {
            Multiplicity::One => "exactly 1",
            Multiplicity::Optional => "at most 1",
            Multiplicity::AtLeastOne => "1 or more",
            Multiplicity::Any => "any number of",
        }
    }
}

/// One entry of a recipe's argument schema.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
    pub positional: bool,
    pub multiplicity: Multiplicity,
    /// File types a `files` argument accepts; every bound file must match one.
    pub files: Vec<Arc<DrsFileSpec>>,
    pub default: Option<ArgValue>,
    pub help: String,
}

impl ArgSpec {
    /// The positional observation directory (night).
    pub fn directory() -> Self {
        Self {
            name: OBS_DIR_ARG.to_string(),
            kind: ArgKind::Directory,
            positional: true,
            multiplicity: Multiplicity::One,
            files: vec![],
            default: None,
            help: "Night directory under the data root".to_string(),
        }
    }

    /// A positional list of one or more files of the given types.
    pub fn files(name: &str, accepts: Vec<Arc<DrsFileSpec>>) -> Self {
        Self {
            name: name.to_string(),
            kind: ArgKind::Files,
            positional: true,
            multiplicity: Multiplicity::AtLeastOne,
            files: accepts,
            default: None,
            help: String::new(),
        }
    }

    /// A named option; absent options take `default`.
    pub fn option(name: &str, kind: ArgKind, default: Option<ArgValue>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            positional: false,
            multiplicity: Multiplicity::Optional,
            files: vec![],
            default,
            help: String::new(),
        }
    }

    pub fn flag(name: &str) -> Self {
        Self::option(name, ArgKind::Flag, Some(ArgValue::Flag(false)))
    }

    /// Make a `files` argument a named option that may bind nothing.
    pub fn optional(mut self) -> Self {
        self.positional = false;
        self.multiplicity = match self.kind {
            ArgKind::Files => Multiplicity::Any,
            _ => Multiplicity::Optional,
        };
        self
    }

    pub fn help(mut self, text: &str) -> Self {
        self.help = text.to_string();
        self
    }

    /// Whether `file` passes this argument's file filter.
    pub fn accepts(&self, file: &BoundFile) -> bool {
        self.files.is_empty() || self.files.iter().any(|spec| spec.matches(file))
    }
}

/// A bound argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Directory(String),
    Files(Vec<BoundFile>),
    Flag(bool),
    String(String),
    Int(i64),
    Float(f64),
}

impl ArgValue {
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgValue::Directory(_) => ArgKind::Directory,
            ArgValue::Files(_) => ArgKind::Files,
            ArgValue::Flag(_) => ArgKind::Flag,
            ArgValue::String(_) => ArgKind::String,
            ArgValue::Int(_) => ArgKind::Int,
            ArgValue::Float(_) => ArgKind::Float,
        }
    }

    fn count(&self) -> usize {
        match self {
            ArgValue::Files(files) => files.len(),
            _ => 1,
        }
    }

    /// Convert a run-table value to the kind an argument expects.
    pub fn from_param(kind: ArgKind, value: &ParamValue) -> Option<ArgValue> {
        match (kind, value) {
            (ArgKind::Flag, ParamValue::Bool(v)) => Some(ArgValue::Flag(*v)),
            (ArgKind::Int, ParamValue::Int(v)) => Some(ArgValue::Int(*v)),
            (ArgKind::Float, v) => v.as_f64().map(ArgValue::Float),
            (ArgKind::String, ParamValue::Str(v)) => Some(ArgValue::String(v.clone())),
            (ArgKind::Directory, ParamValue::Str(v)) => Some(ArgValue::Directory(v.clone())),
            _ => None,
        }
    }

    /// Parse one command-line token.
    pub fn parse(kind: ArgKind, raw: &str) -> Option<ArgValue> {
        match kind {
            ArgKind::Directory => Some(ArgValue::Directory(raw.trim_end_matches('/').to_string())),
            ArgKind::String => Some(ArgValue::String(raw.to_string())),
            ArgKind::Int => raw.parse().ok().map(ArgValue::Int),
            ArgKind::Float => raw.parse().ok().map(ArgValue::Float),
            ArgKind::Flag => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(ArgValue::Flag(true)),
                "false" | "0" | "no" => Some(ArgValue::Flag(false)),
                _ => None,
            },
            ArgKind::Files => None,
        }
    }
}

/// Argument values keyed by name, as handed to a recipe body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgBundle {
    values: BTreeMap<String, ArgValue>,
}

impl ArgBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: ArgValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: ArgValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    /// Files bound to `name`; empty when the argument is absent or not a file list.
    pub fn files(&self, name: &str) -> &[BoundFile] {
        match self.values.get(name) {
            Some(ArgValue::Files(files)) => files,
            _ => &[],
        }
    }

    /// Every bound file, in argument-name order.
    pub fn all_files(&self) -> Vec<&BoundFile> {
        self.values
            .values()
            .filter_map(|v| match v {
                ArgValue::Files(files) => Some(files.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn directory(&self) -> Option<&str> {
        match self.values.get(OBS_DIR_ARG) {
            Some(ArgValue::Directory(night)) => Some(night),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ArgValue::Flag(true)))
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::String(v)) => Some(v),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ArgValue::Float(v)) => Some(*v),
            Some(ArgValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Check `bundle` against `schema` and fill defaults.
///
/// Touches nothing on disk: file arguments are checked against their
/// descriptors only.
pub fn validate(
    recipe: &str,
    schema: &[ArgSpec],
    mut bundle: ArgBundle,
) -> Result<ArgBundle, RecipeArgError> {
    if let Some(unknown) = bundle
        .values
        .keys()
        .find(|name| !schema.iter().any(|spec| &spec.name == *name))
    {
        return Err(RecipeArgError::Unknown {
            recipe: recipe.to_string(),
            arg: unknown.clone(),
        });
    }

    for spec in schema {
        let Some(value) = bundle.values.get(&spec.name) else {
            if let Some(default) = &spec.default {
                bundle.insert(&spec.name, default.clone());
            } else if spec.multiplicity.is_required() {
                return Err(RecipeArgError::Missing {
                    recipe: recipe.to_string(),
                    arg: spec.name.clone(),
                });
            }
            continue;
        };

        if value.kind() != spec.kind {
            return Err(RecipeArgError::WrongKind {
                recipe: recipe.to_string(),
                arg: spec.name.clone(),
                expected: spec.kind.to_string(),
            });
        }

        let count = value.count();
        let allowed = match spec.kind {
            ArgKind::Files => spec.multiplicity.accepts(count),
            _ => count == 1,
        };
        if !allowed {
            return Err(RecipeArgError::Multiplicity {
                recipe: recipe.to_string(),
                arg: spec.name.clone(),
                expected: spec.multiplicity.describe().to_string(),
                found: count,
            });
        }

        if let ArgValue::Files(files) = value {
            if let Some(rejected) = files.iter().find(|file| !spec.accepts(file)) {
                return Err(RecipeArgError::Filtered {
                    recipe: recipe.to_string(),
                    arg: spec.name.clone(),
                    file: rejected.filename.clone(),
                    dprtype: rejected.dprtype.clone(),
                });
            }
        }
    }

    Ok(bundle)
}

/// Command-line tokens split into positionals and `--name [value]` options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawArgs {
    pub positional: Vec<String>,
    pub options: BTreeMap<String, Vec<String>>,
}

impl RawArgs {
    /// Split `tokens` using `schema` to tell flags from valued options.
    pub fn parse(recipe: &str, schema: &[ArgSpec], tokens: &[String]) -> Result<Self, RecipeArgError> {
        let mut raw = RawArgs::default();
        let mut iter = tokens.iter().peekable();
        while let Some(token) = iter.next() {
            let Some(name) = token.strip_prefix("--") else {
                raw.positional.push(token.clone());
                continue;
            };
            let (name, inline) = match name.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (name, None),
            };
            let spec = schema
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| RecipeArgError::Unknown {
                    recipe: recipe.to_string(),
                    arg: name.to_string(),
                })?;
            let values = raw.options.entry(name.to_string()).or_default();
            match (spec.kind, inline) {
                (_, Some(value)) => values.push(value),
                (ArgKind::Flag, None) => values.push("true".to_string()),
                (ArgKind::Files, None) => {
                    while let Some(next) = iter.next_if(|t| !t.starts_with("--")) {
                        values.push(next.clone());
                    }
                }
                (_, None) => match iter.next() {
                    Some(value) => values.push(value.clone()),
                    None => {
                        return Err(RecipeArgError::Multiplicity {
                            recipe: recipe.to_string(),
                            arg: name.to_string(),
                            expected: "exactly 1".to_string(),
                            found: 0,
                        })
                    }
                },
            }
        }
        Ok(raw)
    }

    /// Convert to a bundle. `resolve(night, token)` turns a file token into a
    /// known file, or `None` when the file is not indexed.
    pub fn bind<F>(self, recipe: &str, schema: &[ArgSpec], mut resolve: F) -> Result<ArgBundle, RecipeArgError>
    where
        F: FnMut(&str, &str) -> Option<BoundFile>,
    {
        let mut assigned: Vec<(&ArgSpec, Vec<String>)> = Vec::new();
        let mut positional = self.positional.into_iter();
        for spec in schema.iter().filter(|s| s.positional) {
            let take: Vec<String> = match spec.kind {
                ArgKind::Files => positional.by_ref().collect(),
                _ => positional.next().into_iter().collect(),
            };
            if !take.is_empty() {
                assigned.push((spec, take));
            }
        }
        let leftover = positional.count();
        if leftover > 0 {
            return Err(RecipeArgError::TooManyPositional {
                recipe: recipe.to_string(),
                found: leftover,
            });
        }
        for (name, values) in self.options {
            let spec = schema
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| RecipeArgError::Unknown {
                    recipe: recipe.to_string(),
                    arg: name.clone(),
                })?;
            assigned.push((spec, values));
        }

        let night = assigned
            .iter()
            .find(|(spec, _)| spec.kind == ArgKind::Directory)
            .and_then(|(_, values)| values.first().cloned())
            .unwrap_or_default();

        let mut bundle = ArgBundle::new();
        for (spec, values) in assigned {
            let wrong_kind = || RecipeArgError::WrongKind {
                recipe: recipe.to_string(),
                arg: spec.name.clone(),
                expected: spec.kind.to_string(),
            };
            let value = match spec.kind {
                ArgKind::Files => {
                    let mut files = Vec::with_capacity(values.len());
                    for token in &values {
                        let file = resolve(&night, token).ok_or_else(|| RecipeArgError::Filtered {
                            recipe: recipe.to_string(),
                            arg: spec.name.clone(),
                            file: token.clone(),
                            dprtype: "not indexed".to_string(),
                        })?;
                        files.push(file);
                    }
                    ArgValue::Files(files)
                }
                kind => {
                    if values.len() != 1 {
                        return Err(RecipeArgError::Multiplicity {
                            recipe: recipe.to_string(),
                            arg: spec.name.clone(),
                            expected: "exactly 1".to_string(),
                            found: values.len(),
                        });
                    }
                    ArgValue::parse(kind, &values[0]).ok_or_else(wrong_kind)?
                }
            };
            bundle.insert(&spec.name, value);
        }

        validate(recipe, schema, bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileKind;
    use std::path::PathBuf;

    fn dark_pp() -> Arc<DrsFileSpec> {
        let raw = Arc::new(DrsFileSpec::raw("DARK_DARK", &["DARK_DARK_INT", "DARK_DARK_TEL"]));
        Arc::new(DrsFileSpec::preprocessed(&raw))
    }

    fn schema() -> Vec<ArgSpec> {
        vec![
            ArgSpec::directory(),
            ArgSpec::files("files", vec![dark_pp()]),
            ArgSpec::flag("plot"),
            ArgSpec::option("niter", ArgKind::Int, Some(ArgValue::Int(3))),
        ]
    }

    fn pp(filename: &str, dprtype: &str) -> BoundFile {
        BoundFile {
            path: PathBuf::from("/tmp/2021-07-01").join(filename),
            night: "2021-07-01".into(),
            filename: filename.into(),
            kind: FileKind::Preprocessed,
            dprtype: dprtype.into(),
            fiber: None,
            object: None,
            mid_obs_time: Some(59396.1),
        }
    }

    #[test]
    fn test_validate_fills_defaults() {
        let bundle = ArgBundle::new()
            .with(OBS_DIR_ARG, ArgValue::Directory("2021-07-01".into()))
            .with("files", ArgValue::Files(vec![pp("d1_pp.fits", "DARK_DARK_INT")]));
        let bound = validate("apero_dark", &schema(), bundle).unwrap();
        assert_eq!(bound.int("niter"), Some(3));
        assert!(!bound.flag("plot"));
        assert_eq!(bound.directory(), Some("2021-07-01"));
        assert_eq!(bound.files("files").len(), 1);
    }

    fn rejected(bundle: ArgBundle) -> RecipeArgError {
        validate("apero_dark", &schema(), bundle).unwrap_err()
    }

    #[test]
    fn test_validate_rejections() {
        let night = || ArgValue::Directory("2021-07-01".into());

        let err = rejected(ArgBundle::new().with(OBS_DIR_ARG, night()));
        assert!(matches!(err, RecipeArgError::Missing { ref arg, .. } if arg == "files"));

        let err = rejected(
            ArgBundle::new()
                .with(OBS_DIR_ARG, night())
                .with("files", ArgValue::Files(vec![])),
        );
        assert!(matches!(err, RecipeArgError::Multiplicity { found: 0, .. }));

        let err = rejected(
            ArgBundle::new()
                .with(OBS_DIR_ARG, night())
                .with("files", ArgValue::Files(vec![pp("f_pp.fits", "FLAT_FLAT")])),
        );
        assert!(matches!(err, RecipeArgError::Filtered { ref dprtype, .. } if dprtype == "FLAT_FLAT"));

        let err = rejected(
            ArgBundle::new()
                .with(OBS_DIR_ARG, night())
                .with("files", ArgValue::Files(vec![pp("d_pp.fits", "DARK_DARK_TEL")]))
                .with("niter", ArgValue::String("three".into())),
        );
        assert!(matches!(err, RecipeArgError::WrongKind { ref arg, .. } if arg == "niter"));

        let err = rejected(ArgBundle::new().with("bogus", ArgValue::Flag(true)));
        assert!(matches!(err, RecipeArgError::Unknown { ref arg, .. } if arg == "bogus"));
    }

    #[test]
    fn test_command_line_binding() {
        let tokens: Vec<String> = ["2021-07-01", "d1_pp.fits", "d2_pp.fits", "--plot", "--niter", "5"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        let raw = RawArgs::parse("apero_dark", &schema(), &tokens).unwrap();
        assert_eq!(raw.positional.len(), 3);

        let bundle = raw
            .bind("apero_dark", &schema(), |night, name| {
                assert_eq!(night, "2021-07-01");
                Some(pp(name, "DARK_DARK_INT"))
            })
            .unwrap();
        assert_eq!(bundle.files("files").len(), 2);
        assert!(bundle.flag("plot"));
        assert_eq!(bundle.int("niter"), Some(5));
    }

    #[test]
    fn test_command_line_errors() {
        let tokens = vec!["2021-07-01".to_string(), "--unknown".to_string()];
        assert!(matches!(
            RawArgs::parse("apero_dark", &schema(), &tokens),
            Err(RecipeArgError::Unknown { .. })
        ));

        let tokens = vec!["2021-07-01".to_string(), "missing.fits".to_string()];
        let raw = RawArgs::parse("apero_dark", &schema(), &tokens).unwrap();
        assert!(matches!(
            raw.bind("apero_dark", &schema(), |_, _| None),
            Err(RecipeArgError::Filtered { .. })
        ));

        let only_dir = vec![ArgSpec::directory()];
        let tokens = vec!["2021-07-01".to_string(), "extra".to_string()];
        let raw = RawArgs::parse("apero_x", &only_dir, &tokens).unwrap();
        assert!(matches!(
            raw.bind("apero_x", &only_dir, |_, _| None),
            Err(RecipeArgError::TooManyPositional { found: 1, .. })
        ));
    }
}
