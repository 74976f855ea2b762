// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::fits::{self, Header};
use crate::config::{KeywordTable, ResolvedPaths};
use crate::errors::FitsError;

pub const FITS_EXTENSION: &str = ".fits";
const PREPROCESSED_SUFFIX: &str = "_pp";

/// Output directory category of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Raw,
    Preprocessed,
    Reduced,
    Calibration,
    Telluric,
}

impl FileKind {
    pub const ALL: [FileKind; 5] = [
        FileKind::Raw,
        FileKind::Preprocessed,
        FileKind::Reduced,
        FileKind::Calibration,
        FileKind::Telluric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Raw => "raw",
            FileKind::Preprocessed => "preprocessed",
            FileKind::Reduced => "reduced",
            FileKind::Calibration => "calibration",
            FileKind::Telluric => "telluric",
        }
    }

    pub fn parse(value: &str) -> Option<FileKind> {
        FileKind::ALL.into_iter().find(|k| k.as_str() == value)
    }

    /// Calibration and telluric products share one flat directory per database.
    pub fn is_per_night(&self) -> bool {
        !matches!(self, FileKind::Calibration | FileKind::Telluric)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of a file type a recipe consumes or produces.
#[derive(Debug, Clone, PartialEq)]
pub struct DrsFileSpec {
    pub name: String,
    pub kind: FileKind,
    /// Appended to the input stem when the file name is derived.
    pub suffix: String,
    /// DPRTYPEs accepted (inputs) or stamped (outputs). Empty accepts any.
    pub dprtypes: Vec<String>,
    /// Canonical keyword to expected header value.
    pub required_keys: BTreeMap<String, String>,
    pub fiber: Option<String>,
    /// Constants whose values change this file's content.
    pub depends_on_params: Vec<String>,
    /// Key under which the product is registered in calibDB or telluDB.
    pub calib_key: Option<String>,
    /// Registered as a reference calibration, exempt from time matching.
    pub super_flag: bool,
    /// Named from the input fingerprint instead of the first input's stem.
    pub hashed_name: bool,
    /// The file type this one is derived from.
    pub intype: Option<Arc<DrsFileSpec>>,
}

impl DrsFileSpec {
    pub fn raw(name: &str, dprtypes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: FileKind::Raw,
            suffix: String::new(),
            dprtypes: dprtypes.iter().map(|d| d.to_string()).collect(),
            required_keys: BTreeMap::new(),
            fiber: None,
            depends_on_params: vec![],
            calib_key: None,
            super_flag: false,
            hashed_name: false,
            intype: None,
        }
    }

    /// The pre-processed counterpart of a raw file type.
    pub fn preprocessed(raw: &Arc<DrsFileSpec>) -> Self {
        Self {
            name: format!("{}_PP", raw.name),
            kind: FileKind::Preprocessed,
            suffix: PREPROCESSED_SUFFIX.to_string(),
            dprtypes: raw.dprtypes.clone(),
            required_keys: raw.required_keys.clone(),
            fiber: None,
            depends_on_params: vec![],
            calib_key: None,
            super_flag: false,
            hashed_name: false,
            intype: Some(Arc::clone(raw)),
        }
    }

    pub fn output(name: &str, kind: FileKind, suffix: &str) -> Self {
        Self {
            kind,
            suffix: suffix.to_string(),
            ..Self::raw(name, &[])
        }
    }

    pub fn with_dprtype(mut self, dprtype: &str) -> Self {
        self.dprtypes = vec![dprtype.to_string()];
        self
    }

    pub fn with_fiber(mut self, fiber: &str) -> Self {
        self.fiber = Some(fiber.to_string());
        self
    }

    pub fn with_calib_key(mut self, key: &str) -> Self {
        self.calib_key = Some(key.to_string());
        self
    }

    pub fn with_required_key(mut self, keyword: &str, value: &str) -> Self {
        self.required_keys.insert(keyword.to_string(), value.to_string());
        self
    }

    pub fn depends_on(mut self, params: &[&str]) -> Self {
        self.depends_on_params = params.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Mark this type as produced from files of type `parent`.
    pub fn derived_from(mut self, parent: &Arc<DrsFileSpec>) -> Self {
        self.intype = Some(Arc::clone(parent));
        self
    }

    /// Name of the file this type derives from a raw file with stem `raw_stem`,
    /// following the derivation chain (`<raw>_pp.fits`, `<raw>_pp_e2ds_AB.fits`).
    pub fn derived_filename(&self, raw_stem: &str) -> String {
        match self.intype.as_deref() {
            Some(parent) if parent.kind != FileKind::Raw => {
                self.filename(stem(&parent.derived_filename(raw_stem)), "")
            }
            _ => self.filename(raw_stem, ""),
        }
    }

    /// A reference calibration named from its inputs' fingerprint.
    pub fn reference(mut self) -> Self {
        self.super_flag = true;
        self.hashed_name = true;
        self
    }

    /// The raw file type at the root of the derivation chain.
    pub fn root(&self) -> &DrsFileSpec {
        let mut spec = self;
        while let Some(parent) = spec.intype.as_deref() {
            spec = parent;
        }
        spec
    }

    pub fn accepts_dprtype(&self, dprtype: &str) -> bool {
        self.dprtypes.is_empty() || self.dprtypes.iter().any(|d| d == dprtype)
    }

    /// Whether `file` can bind to this spec.
    pub fn matches(&self, file: &BoundFile) -> bool {
        file.kind == self.kind
            && self.accepts_dprtype(&file.dprtype)
            && self
                .fiber
                .as_deref()
                .map_or(true, |fiber| file.fiber.as_deref() == Some(fiber))
    }

    /// Check the required header keys; missing cards never match.
    pub fn identifies(&self, header: &Header, keywords: &KeywordTable) -> bool {
        self.required_keys.iter().all(|(keyword, expected)| {
            keywords
                .card(keyword)
                .ok()
                .and_then(|card| header.get_str(card))
                .map_or(false, |value| value.trim() == expected)
        })
    }

    /// Derived file name: `<stem><suffix>[_<fiber>].fits`, or
    /// `<fingerprint><suffix>[_<fiber>].fits` for hashed names.
    pub fn filename(&self, input_stem: &str, fingerprint: &str) -> String {
        let stem = if self.hashed_name {
            &fingerprint[..fingerprint.len().min(10)]
        } else {
            input_stem
        };
        match &self.fiber {
            Some(fiber) => format!("{stem}{}_{fiber}{FITS_EXTENSION}", self.suffix),
            None => format!("{stem}{}{FITS_EXTENSION}", self.suffix),
        }
    }

    /// Name of a product written for `night`.
    ///
    /// Calibration and telluric products of every night share one flat
    /// directory, so their names lead with the night
    /// (`<night>_<stem><suffix>[_<fiber>].fits`). Hashed names are already
    /// unique and names derived from the night itself are left alone.
    pub fn output_filename(&self, night: &str, input_stem: &str, fingerprint: &str) -> String {
        let filename = self.filename(input_stem, fingerprint);
        if self.kind.is_per_night() || self.hashed_name || input_stem == night {
            filename
        } else {
            format!("{night}_{filename}")
        }
    }

    /// Directory a file of this kind produced for `night` lands in.
    pub fn directory(&self, paths: &ResolvedPaths, night: &str) -> PathBuf {
        output_directory(paths, self.kind, night)
    }
}

pub fn output_directory(paths: &ResolvedPaths, kind: FileKind, night: &str) -> PathBuf {
    let root = paths.root_for(kind);
    if kind.is_per_night() {
        root.join(night)
    } else {
        root.to_path_buf()
    }
}

/// File name without the FITS extension.
pub fn stem(filename: &str) -> &str {
    filename.strip_suffix(FITS_EXTENSION).unwrap_or(filename)
}

/// A concrete file bound to a recipe argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundFile {
    pub path: PathBuf,
    pub night: String,
    pub filename: String,
    pub kind: FileKind,
    pub dprtype: String,
    #[serde(default)]
    pub fiber: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub mid_obs_time: Option<f64>,
}

impl BoundFile {
    pub fn stem(&self) -> &str {
        stem(&self.filename)
    }
}

/// A file instance loaded for a recipe: its header and data payload.
#[derive(Debug, Clone)]
pub struct DrsFile {
    pub bound: BoundFile,
    pub header: Header,
    pub data: Vec<u8>,
}

impl DrsFile {
    pub fn load(bound: &BoundFile) -> Result<Self, FitsError> {
        let (header, data) = fits::read_fits(&bound.path)?;
        Ok(Self {
            bound: bound.clone(),
            header,
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.bound.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    fn bound(kind: FileKind, dprtype: &str, fiber: Option<&str>) -> BoundFile {
        BoundFile {
            path: PathBuf::from("/raw/2021-07-01/2510288a.fits"),
            night: "2021-07-01".into(),
            filename: "2510288a.fits".into(),
            kind,
            dprtype: dprtype.into(),
            fiber: fiber.map(str::to_string),
            object: None,
            mid_obs_time: Some(59396.1),
        }
    }

    #[test]
    fn test_preprocessed_chain_resolves_to_raw() {
        let raw = Arc::new(DrsFileSpec::raw("DARK_INT", &["DARK_DARK_INT"]));
        let pp = DrsFileSpec::preprocessed(&raw);
        assert_eq!(pp.kind, FileKind::Preprocessed);
        assert_eq!(pp.root().name, "DARK_INT");
        assert_eq!(pp.filename("2510288a", ""), "2510288a_pp.fits");
    }

    #[test]
    fn test_derived_names_follow_the_chain() {
        let raw = Arc::new(DrsFileSpec::raw("OBJ", &["OBJ_FP"]));
        let pp = Arc::new(DrsFileSpec::preprocessed(&raw));
        let e2ds = DrsFileSpec::output("E2DS_AB", FileKind::Reduced, "_e2ds")
            .with_fiber("AB")
            .derived_from(&pp);
        assert_eq!(pp.derived_filename("2510288o"), "2510288o_pp.fits");
        assert_eq!(e2ds.derived_filename("2510288o"), "2510288o_pp_e2ds_AB.fits");
        assert_eq!(e2ds.root().name, "OBJ");
    }

    #[test]
    fn test_matches_checks_kind_dprtype_and_fiber() {
        let spec = DrsFileSpec::output("LOC", FileKind::Calibration, "_loco")
            .with_dprtype("LOC")
            .with_fiber("AB");
        assert!(spec.matches(&bound(FileKind::Calibration, "LOC", Some("AB"))));
        assert!(!spec.matches(&bound(FileKind::Calibration, "LOC", Some("C"))));
        assert!(!spec.matches(&bound(FileKind::Reduced, "LOC", Some("AB"))));
        assert!(!spec.matches(&bound(FileKind::Calibration, "FLAT", Some("AB"))));
    }

    #[test]
    fn test_output_names() {
        let dark = DrsFileSpec::output("DARK", FileKind::Calibration, "_dark").with_fiber("AB");
        assert_eq!(dark.filename("2510288a_pp", "abcdef0123456789"), "2510288a_pp_dark_AB.fits");

        let reference = DrsFileSpec::output("DARK_REF", FileKind::Calibration, "_dark_ref").reference();
        assert_eq!(
            reference.filename("2510288a_pp", "abcdef0123456789"),
            "abcdef0123_dark_ref.fits"
        );
        assert!(reference.super_flag);
    }

    #[test]
    fn test_flat_directory_products_carry_the_night() {
        let dark = DrsFileSpec::output("DARK", FileKind::Calibration, "_dark").with_fiber("AB");
        let first = dark.output_filename("2021-07-01", "d1_pp", "");
        let second = dark.output_filename("2021-07-02", "d1_pp", "");
        assert_eq!(first, "2021-07-01_d1_pp_dark_AB.fits");
        assert_eq!(second, "2021-07-02_d1_pp_dark_AB.fits");

        let trans = DrsFileSpec::output("TELLU_TRANS", FileKind::Telluric, "_trans");
        assert_eq!(
            trans.output_filename("2021-07-01", "o1_pp_e2ds_AB", ""),
            "2021-07-01_o1_pp_e2ds_AB_trans.fits"
        );
        assert_eq!(
            dark.output_filename("2021-07-01", "2021-07-01", ""),
            "2021-07-01_dark_AB.fits"
        );

        let reference = DrsFileSpec::output("DARK_REF", FileKind::Calibration, "_dark_ref").reference();
        assert_eq!(
            reference.output_filename("2021-07-01", "d1_pp", "abcdef0123456789"),
            "abcdef0123_dark_ref.fits"
        );

        let e2ds = DrsFileSpec::output("E2DS_AB", FileKind::Reduced, "_e2ds").with_fiber("AB");
        assert_eq!(
            e2ds.output_filename("2021-07-01", "o1_pp", ""),
            "o1_pp_e2ds_AB.fits"
        );
    }

    #[test]
    fn test_output_directories() {
        let paths = Profile::new("SPIROU", "/w").paths();
        assert_eq!(
            output_directory(&paths, FileKind::Reduced, "2021-07-01"),
            PathBuf::from("/w/red/2021-07-01")
        );
        assert_eq!(
            output_directory(&paths, FileKind::Calibration, "2021-07-01"),
            PathBuf::from("/w/calib")
        );
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in FileKind::ALL {
            assert_eq!(FileKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FileKind::parse("bogus"), None);
    }
}
