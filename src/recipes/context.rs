// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::args::ArgBundle;
use super::qc::QcSet;
use super::recipe::Recipe;
use crate::calib::{CalibMatch, UsedCalibrations};
use crate::config::consts::{DRS_VERSION, INDEX_HEADER_GROUP, PP_VERSION};
use crate::config::{Instrument, ParameterSet, ResolvedPaths};
use crate::db::now_iso;
use crate::errors::{CalibLookupError, RecipeError};
use crate::files::fits::{self, Header};
use crate::files::{fingerprint, stem, BoundFile, DrsFile, DrsFileSpec, FileKind};

/// Header prefixes owned by the product contract; never inherited from an input.
const CONTRACT_PREFIXES: [&str; 3] = ["QCC", "CDB", "CDT"];

/// A product written to the worker's scratch directory, waiting to be
/// committed by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedOutput {
    /// Output type name, also stamped as `KW_OUTPUT`.
    pub output: String,
    pub kind: FileKind,
    pub filename: String,
    pub staged_path: PathBuf,
    pub final_dir: PathBuf,
    pub night: String,
    pub dprtype: String,
    pub fiber: Option<String>,
    pub objname: Option<String>,
    pub mid_obs_time: Option<f64>,
    pub calib_key: Option<String>,
    pub super_flag: bool,
    pub header_subset: BTreeMap<String, serde_json::Value>,
}

impl StagedOutput {
    pub fn final_path(&self) -> PathBuf {
        self.final_dir.join(&self.filename)
    }
}

/// What a finished recipe body leaves behind.
#[derive(Debug, Clone, Default)]
pub struct RecipeOutcome {
    pub outputs: Vec<StagedOutput>,
    pub qc: QcSet,
}

/// Everything a context needs besides the recipe and the instrument.
#[derive(Debug, Clone)]
pub struct ContextSetup {
    pub pid: String,
    pub night: String,
    pub params: ParameterSet,
    pub args: ArgBundle,
    pub calibrations: UsedCalibrations,
    pub paths: ResolvedPaths,
    pub scratch: PathBuf,
}

struct PendingOutput {
    spec: Arc<DrsFileSpec>,
    filename: String,
    header: Header,
    data: Vec<u8>,
    dprtype: String,
    objname: Option<String>,
    mid_obs_time: Option<f64>,
}

/// The view a recipe body gets of its invocation.
///
/// Arguments are already validated and calibrations already resolved.
/// Products are collected with [`write_output`](Self::write_output) and only
/// written to scratch, with the full header contract, by
/// [`finalize`](Self::finalize).
pub struct RecipeContext {
    recipe: Arc<Recipe>,
    instrument: Arc<Instrument>,
    setup: ContextSetup,
    qc: QcSet,
    pending: Vec<PendingOutput>,
    cancel: Arc<AtomicBool>,
}

impl RecipeContext {
    pub fn new(recipe: Arc<Recipe>, instrument: Arc<Instrument>, setup: ContextSetup) -> Self {
        Self {
            recipe,
            instrument,
            setup,
            qc: QcSet::new(),
            pending: vec![],
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag the worker sets when it is asked to stop.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn pid(&self) -> &str {
        &self.setup.pid
    }

    pub fn night(&self) -> &str {
        &self.setup.night
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn params(&self) -> &ParameterSet {
        &self.setup.params
    }

    pub fn args(&self) -> &ArgBundle {
        &self.setup.args
    }

    pub fn scratch(&self) -> &Path {
        &self.setup.scratch
    }

    pub fn qc(&mut self) -> &mut QcSet {
        &mut self.qc
    }

    pub fn files(&self, arg: &str) -> &[BoundFile] {
        self.setup.args.files(arg)
    }

    /// Read every file bound to `arg`.
    pub fn load(&self, arg: &str) -> Result<Vec<DrsFile>, RecipeError> {
        self.files(arg)
            .iter()
            .map(|bound| DrsFile::load(bound).map_err(RecipeError::from))
            .collect()
    }

    pub fn calibration(&self, key: &str, fiber: Option<&str>) -> Result<&CalibMatch, RecipeError> {
        self.setup.calibrations.get(key, fiber).ok_or_else(|| {
            RecipeError::Calib(CalibLookupError::NoCalibration {
                key: key.to_string(),
                fiber: fiber.unwrap_or("-").to_string(),
                time: 0.0,
                policy: "resolved".to_string(),
            })
        })
    }

    pub fn has_calibration(&self, key: &str, fiber: Option<&str>) -> bool {
        self.setup.calibrations.get(key, fiber).is_some()
    }

    pub fn load_calibration(&self, key: &str, fiber: Option<&str>) -> Result<DrsFile, RecipeError> {
        let found = self.calibration(key, fiber)?;
        let bound = BoundFile {
            path: found.path.clone(),
            night: String::new(),
            filename: found.filename.clone(),
            kind: found.db,
            dprtype: found.key.clone(),
            fiber: found.fiber.clone(),
            object: None,
            mid_obs_time: Some(found.mid_obs_time),
        };
        Ok(DrsFile::load(&bound)?)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Cooperative cancellation point for long recipe bodies.
    pub fn check_cancelled(&self) -> Result<(), RecipeError> {
        if self.is_cancelled() {
            return Err(RecipeError::Cancelled);
        }
        Ok(())
    }

    /// Copy of `source`'s header without post-excluded or contract cards.
    pub fn product_header(&self, source: &DrsFile) -> Header {
        let mut header = source.header.clone();
        let excluded = self.instrument.keywords.post_excluded_cards();
        let drop: Vec<String> = header
            .iter()
            .map(|c| c.key.clone())
            .filter(|key| {
                excluded.contains(&key.as_str())
                    || CONTRACT_PREFIXES.iter().any(|p| key.starts_with(p))
            })
            .collect();
        for key in drop {
            header.remove(&key);
        }
        header
    }

    /// Queue a product of the declared output type `output`. The name derives
    /// from the first input (or from the inputs' fingerprint for hashed names);
    /// calibration and telluric names lead with the night.
    pub fn write_output(
        &mut self,
        output: &str,
        inputs: &[&BoundFile],
        header: Header,
        data: Vec<u8>,
    ) -> Result<String, RecipeError> {
        let spec = self.recipe.output_spec(output).cloned().ok_or_else(|| {
            RecipeError::exception(format!(
                "recipe {} declares no output '{}'",
                self.recipe.name, output
            ))
        })?;

        let input_stem = inputs
            .first()
            .map(|f| stem(&f.filename).to_string())
            .unwrap_or_else(|| self.setup.night.clone());
        let names = fingerprint::names(inputs.iter().map(|f| f.filename.as_str()));
        let filename = spec.output_filename(&self.setup.night, &input_stem, &names);

        let dprtype = spec
            .dprtypes
            .first()
            .cloned()
            .or_else(|| inputs.first().map(|f| f.dprtype.clone()))
            .unwrap_or_else(|| spec.name.clone());
        let times: Vec<f64> = inputs.iter().filter_map(|f| f.mid_obs_time).collect();
        let mid_obs_time = if times.is_empty() {
            None
        } else {
            Some(times.iter().sum::<f64>() / times.len() as f64)
        };
        let objname = inputs.iter().find_map(|f| f.object.clone());

        self.pending.retain(|p| p.filename != filename);
        self.pending.push(PendingOutput {
            spec,
            filename: filename.clone(),
            header,
            data,
            dprtype,
            objname,
            mid_obs_time,
        });
        Ok(filename)
    }

    /// Stamp the header contract on every queued product and write it to scratch.
    pub fn finalize(self) -> Result<RecipeOutcome, RecipeError> {
        std::fs::create_dir_all(&self.setup.scratch)?;
        let keywords = &self.instrument.keywords;
        let date = now_iso();

        let mut outputs = Vec::with_capacity(self.pending.len());
        for pending in self.pending {
            let mut header = pending.header;
            let spec = &pending.spec;
            header.set(keywords.card("KW_VERSION")?, DRS_VERSION, Some("DRS version"));
            header.set(keywords.card("KW_PPVERSION")?, PP_VERSION, Some("DRS pre-processing version"));
            header.set(keywords.card("KW_PID")?, self.setup.pid.as_str(), Some("DRS process id"));
            header.set(keywords.card("KW_DRS_DATE_NOW")?, date.as_str(), Some("DRS processing date"));
            header.set(keywords.card("KW_DPRTYPE")?, pending.dprtype.as_str(), Some("DRS file class"));
            header.set(keywords.card("KW_OUTPUT")?, spec.name.as_str(), Some("DRS output identifier"));
            if let Some(fiber) = &spec.fiber {
                header.set(keywords.card("KW_FIBER")?, fiber.as_str(), Some("fiber"));
            }
            if let Some(mid) = pending.mid_obs_time {
                header.set(keywords.card("KW_MID_OBS_TIME")?, mid, Some("mid exposure MJD"));
            }
            self.setup.calibrations.stamp(&mut header, &self.instrument);
            self.qc.stamp(&mut header);

            let staged_path = self.setup.scratch.join(&pending.filename);
            fits::write_fits(&staged_path, &header, &pending.data)?;

            outputs.push(StagedOutput {
                output: spec.name.clone(),
                kind: spec.kind,
                filename: pending.filename,
                staged_path,
                final_dir: spec.directory(&self.setup.paths, &self.setup.night),
                night: self.setup.night.clone(),
                dprtype: pending.dprtype,
                fiber: spec.fiber.clone(),
                objname: pending.objname,
                mid_obs_time: pending.mid_obs_time,
                calib_key: spec.calib_key.clone(),
                super_flag: spec.super_flag,
                header_subset: keywords.header_subset(&header, INDEX_HEADER_GROUP),
            });
        }

        Ok(RecipeOutcome {
            outputs,
            qc: self.qc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::MatchPolicy;
    use crate::config::{ParameterResolver, Profile};
    use crate::recipes::{ArgSpec, ArgValue};
    use tempfile::TempDir;

    fn dark_recipe() -> Recipe {
        let out = DrsFileSpec::output("DARK", FileKind::Calibration, "_dark")
            .with_calib_key("DARK")
            .with_fiber("AB");
        Recipe::new("apero_dark", "SPIROU", |_: &mut RecipeContext| -> Result<(), RecipeError> {
            Ok(())
        })
            .arg(ArgSpec::directory())
            .arg(ArgSpec::files("files", vec![]))
            .output(Arc::new(out))
    }

    fn context(dir: &TempDir) -> RecipeContext {
        let instrument = Arc::new(Instrument::builtin("SPIROU").unwrap());
        let params = ParameterResolver::new(&instrument)
            .resolve(&Default::default(), "test", &Default::default(), "test")
            .unwrap();
        let mut calibrations = UsedCalibrations::new();
        calibrations.record(CalibMatch {
            db: FileKind::Calibration,
            key: "DARK_REF".into(),
            fiber: None,
            filename: "ref_dark.fits".into(),
            path: dir.path().join("ref_dark.fits"),
            mid_obs_time: 59000.0,
            query_time: 59396.0,
            policy: MatchPolicy::Closest,
            super_flag: true,
            rowid: 1,
        });
        let setup = ContextSetup {
            pid: "PID-1".into(),
            night: "2021-07-01".into(),
            params,
            args: ArgBundle::new().with("obs_dir", ArgValue::Directory("2021-07-01".into())),
            calibrations,
            paths: Profile::new("SPIROU", dir.path()).paths(),
            scratch: dir.path().join("scratch/PID-1"),
        };
        RecipeContext::new(Arc::new(dark_recipe()), instrument, setup)
    }

    fn input(name: &str, mid: f64) -> BoundFile {
        BoundFile {
            path: PathBuf::from(name),
            night: "2021-07-01".into(),
            filename: name.into(),
            kind: FileKind::Preprocessed,
            dprtype: "DARK_DARK_INT".into(),
            fiber: None,
            object: None,
            mid_obs_time: Some(mid),
        }
    }

    #[test]
    fn test_finalize_stamps_the_header_contract() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let (a, b) = (input("d1_pp.fits", 59396.0), input("d2_pp.fits", 59396.2));
        ctx.qc().check("DARK_MED", 0.1, "DARK_MED < 0.5", true);
        let name = ctx
            .write_output("DARK", &[&a, &b], Header::new(), vec![1, 2, 3])
            .unwrap();
        assert_eq!(name, "2021-07-01_d1_pp_dark_AB.fits");

        let outcome = ctx.finalize().unwrap();
        assert!(outcome.qc.passed());
        let staged = &outcome.outputs[0];
        assert_eq!(staged.calib_key.as_deref(), Some("DARK"));
        assert_eq!(staged.final_dir, dir.path().join("calib"));
        assert!((staged.mid_obs_time.unwrap() - 59396.1).abs() < 1e-9);

        let (header, data) = fits::read_fits(&staged.staged_path).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(header.get_str("DRSPID").as_deref(), Some("PID-1"));
        assert_eq!(header.get_str("DRSOUTID").as_deref(), Some("DARK"));
        assert_eq!(header.get_str("DPRTYPE").as_deref(), Some("DARK_DARK_INT"));
        assert_eq!(header.get_str("CDBDREF").as_deref(), Some("ref_dark.fits"));
        assert_eq!(header.get_f64("CDTDREF"), Some(59000.0));
        assert_eq!(header.get("QCC_ALL"), Some(&true.into()));
        assert!(header.contains("VERSION"));
        assert!(header.contains("DRSPDATE"));
    }

    #[test]
    fn test_undeclared_output_is_an_exception() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let err = ctx
            .write_output("FLAT", &[], Header::new(), vec![])
            .unwrap_err();
        assert!(matches!(err, RecipeError::Exception(_)));
    }

    #[test]
    fn test_calibration_access_and_cancellation() {
        let dir = TempDir::new().unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = context(&dir).with_cancel_flag(Arc::clone(&flag));

        assert!(ctx.has_calibration("DARK_REF", None));
        assert!(matches!(ctx.calibration("WAVE", Some("AB")), Err(RecipeError::Calib(_))));
        assert!(ctx.check_cancelled().is_ok());
        flag.store(true, Ordering::SeqCst);
        assert!(matches!(ctx.check_cancelled(), Err(RecipeError::Cancelled)));
    }
}
