// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Instrument definitions: defaults, keyword table and DPRTYPE cascade.
//!
//! Instruments are declarative YAML documents. The built-in ones are compiled
//! into the binary; [`Instrument::load`] reads an alternative from disk.
//!
//! # Example
//! ```yaml
//! name: SPIROU
//! fibers: [AB, A, B, C]
//! calib_cards:
//!   WAVE: WAVE
//! constants:
//!   - {name: DARK_QMIN, dtype: int, value: 5}
//! keywords:
//!   - {name: KW_OBSTYPE, card: OBSTYPE, dtype: str, group: index}
//! dprtype_rules:
//!   - dprtype: DARK_DARK_INT
//!     match: {KW_OBSTYPE: DARK}
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::consts::SECONDS_PER_DAY;
use super::keywords::{KeywordDescriptor, KeywordTable};
use super::registry::{ConstantDescriptor, ConstantRegistry};
use crate::errors::ConfigError;
use crate::files::fits::Header;
use crate::files::identify::{DprtypeIdentifier, DprtypeRule};

const BUILTIN: [(&str, &str, &str); 2] = [
    (
        "SPIROU",
        "spirou.yaml",
        include_str!("../../instruments/spirou.yaml"),
    ),
    (
        "NIRPS_HA",
        "nirps_ha.yaml",
        include_str!("../../instruments/nirps_ha.yaml"),
    ),
];

#[derive(Debug, Deserialize)]
struct InstrumentDocument {
    name: String,
    fibers: Vec<String>,
    #[serde(default)]
    calib_cards: BTreeMap<String, String>,
    #[serde(default)]
    constants: Vec<ConstantDescriptor>,
    #[serde(default)]
    keywords: Vec<KeywordDescriptor>,
    #[serde(default)]
    dprtype_rules: Vec<DprtypeRule>,
}

/// A fully validated instrument definition.
#[derive(Debug, Clone)]
pub struct Instrument {
    pub name: String,
    pub fibers: Vec<String>,
    pub constants: ConstantRegistry,
    pub keywords: KeywordTable,
    pub dprtype_rules: Vec<DprtypeRule>,
    pub identifier: DprtypeIdentifier,
    /// Calibration key to the short code used in `CDB`/`CDT` cards.
    pub calib_cards: BTreeMap<String, String>,
    /// File the definition was read from.
    pub source: String,
}

impl Instrument {
    /// Names of the instruments compiled into the binary.
    pub fn names() -> Vec<&'static str> {
        BUILTIN.iter().map(|(name, _, _)| *name).collect()
    }

    pub fn builtin(name: &str) -> Result<Self, ConfigError> {
        let wanted = name.trim().to_ascii_uppercase();
        let (_, file, text) = BUILTIN
            .iter()
            .find(|(builtin, _, _)| *builtin == wanted)
            .ok_or_else(|| ConfigError::UnknownInstrument(name.to_string()))?;
        Self::from_yaml(text, file)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, &path.display().to_string())
    }

    pub fn from_yaml(text: &str, source: &str) -> Result<Self, ConfigError> {
        let document: InstrumentDocument =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
                path: source.into(),
                message: e.to_string(),
            })?;

        let constants = ConstantRegistry::new(document.constants)?;
        let keywords = KeywordTable::new(&document.name, document.keywords)?;
        let identifier = DprtypeIdentifier::new(&document.dprtype_rules, &keywords)?;

        Ok(Self {
            name: document.name,
            fibers: document.fibers,
            constants,
            keywords,
            dprtype_rules: document.dprtype_rules,
            identifier,
            calib_cards: document.calib_cards,
            source: source.to_string(),
        })
    }

    /// Short card code for a calibration key; unknown keys use the key itself.
    pub fn calib_card_code<'a>(&'a self, key: &'a str) -> &'a str {
        self.calib_cards.get(key).map_or(key, String::as_str)
    }

    pub fn has_fiber(&self, fiber: &str) -> bool {
        self.fibers.iter().any(|f| f == fiber)
    }

    /// Mid-exposure MJD: `KW_MID_OBS_TIME`, or acquisition start plus half the exposure.
    pub fn mid_obs_time(&self, header: &Header) -> Result<f64, ConfigError> {
        if let Some(mid) = self.keywords.header_get_opt("KW_MID_OBS_TIME", header)? {
            if let Some(mid) = mid.as_f64() {
                return Ok(mid);
            }
        }
        let start = self.keywords.header_get("KW_ACQTIME", header)?;
        let start = start
            .as_f64()
            .ok_or_else(|| ConfigError::type_mismatch("KW_ACQTIME", "float", start.type_name()))?;
        let exptime = self
            .keywords
            .header_get_opt("KW_EXPTIME", header)?
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        Ok(start + exptime / 2.0 / SECONDS_PER_DAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_instruments_load() {
        for name in Instrument::names() {
            let instrument = Instrument::builtin(name).unwrap();
            assert_eq!(instrument.name, name);
            assert!(!instrument.fibers.is_empty());
            assert!(!instrument.identifier.is_empty());
            assert!(instrument.constants.contains("CALIB_DB_MATCH"));
            assert!(instrument.keywords.card("KW_DPRTYPE").is_ok());
        }
    }

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        assert_eq!(Instrument::builtin("spirou").unwrap().name, "SPIROU");
        assert!(matches!(
            Instrument::builtin("HARPS"),
            Err(ConfigError::UnknownInstrument(_))
        ));
    }

    #[test]
    fn test_wave_cards_are_distinct() {
        let instrument = Instrument::builtin("SPIROU").unwrap();
        let keywords = &instrument.keywords;
        assert_ne!(
            keywords.card("KW_WAVE_HCG_EW_MIN").unwrap(),
            keywords.card("KW_WAVE_HCG_EW_MAX").unwrap()
        );
        assert_ne!(
            keywords.card("KW_WNT_NITER1").unwrap(),
            keywords.card("KW_WNT_NITER2").unwrap()
        );
        assert_eq!(
            keywords.get("KW_TELLUP_CLEAN_OHLINES").unwrap().dtype,
            crate::config::DataType::Bool
        );
    }

    #[test]
    fn test_nirps_dprtype_alias_shares_the_card() {
        let instrument = Instrument::builtin("NIRPS_HA").unwrap();
        assert_eq!(
            instrument.keywords.card("KW_RAW_DPRTYPE").unwrap(),
            instrument.keywords.card("KW_OBSTYPE").unwrap()
        );
    }

    #[test]
    fn test_mid_obs_time_falls_back_to_exposure_midpoint() {
        let instrument = Instrument::builtin("SPIROU").unwrap();

        let mut header = Header::new();
        header.set("MJDATE", 59000.0, None);
        header.set("EXPTIME", 8640.0, None);
        let mid = instrument.mid_obs_time(&header).unwrap();
        assert!((mid - 59000.05).abs() < 1e-9);

        header.set("MJDMID", 59000.5, None);
        assert_eq!(instrument.mid_obs_time(&header).unwrap(), 59000.5);

        assert!(matches!(
            instrument.mid_obs_time(&Header::new()),
            Err(ConfigError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_malformed_document_names_its_source() {
        match Instrument::from_yaml("name: [", "broken.yaml") {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path.to_str(), Some("broken.yaml")),
            other => panic!("unexpected {:?}", other.map(|i| i.name)),
        }
    }

    #[test]
    fn test_calib_card_code() {
        let instrument = Instrument::builtin("SPIROU").unwrap();
        assert_eq!(instrument.calib_card_code("BADPIX"), "BADP");
        assert_eq!(instrument.calib_card_code("CUSTOM"), "CUSTOM");
    }
}
