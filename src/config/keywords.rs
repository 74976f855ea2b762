// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The keywords table: canonical header-key names mapped to FITS cards.
//!
//! Recipes and the file-type identifier never hard-code card names. They ask
//! for `KW_OBSTYPE` and the instrument's table says which card holds it and
//! how to convert it.
//!
//! Card names are unique within a table. Two canonical names may share a card
//! only when one is explicitly declared as an `alias_of` the other; any other
//! collision is rejected when the table is built.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::value::{DataType, ParamValue};
use crate::errors::ConfigError;
use crate::files::fits::{CardValue, Header};

/// How a keyword is combined when several inputs feed one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMethod {
    Mean,
    /// Recomputed arithmetically from the inputs (exposure times add up).
    Math,
    Sum,
    /// Taken from the first input.
    #[serde(rename = "1")]
    One,
    Minimum,
}

impl CombineMethod {
    pub fn combine(&self, values: &[f64]) -> Option<f64> {
        let first = *values.first()?;
        Some(match self {
            CombineMethod::Mean => values.iter().sum::<f64>() / values.len() as f64,
            CombineMethod::Math | CombineMethod::Sum => values.iter().sum(),
            CombineMethod::One => first,
            CombineMethod::Minimum => values.iter().copied().fold(first, f64::min),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordDescriptor {
    pub name: String,
    pub card: String,
    pub dtype: DataType,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub combine: Option<CombineMethod>,
    /// Dropped when a raw header is copied into a product.
    #[serde(default)]
    pub post_exclude: bool,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub alias_of: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct KeywordTable {
    instrument: String,
    by_name: BTreeMap<String, KeywordDescriptor>,
    by_card: HashMap<String, String>,
}

impl KeywordTable {
    pub fn new(instrument: &str, descriptors: Vec<KeywordDescriptor>) -> Result<Self, ConfigError> {
        let mut by_name: BTreeMap<String, KeywordDescriptor> = BTreeMap::new();
        let mut by_card: HashMap<String, String> = HashMap::new();

        for descriptor in descriptors {
            if by_name.contains_key(&descriptor.name) {
                return Err(ConfigError::DuplicateConstant {
                    name: descriptor.name,
                });
            }
            match by_card.get(&descriptor.card) {
                Some(owner) if descriptor.alias_of.as_deref() == Some(owner.as_str()) => {}
                Some(owner) => {
                    return Err(ConfigError::DuplicateCard {
                        card: descriptor.card.clone(),
                        first: owner.clone(),
                        second: descriptor.name.clone(),
                    })
                }
                None => {
                    by_card.insert(descriptor.card.clone(), descriptor.name.clone());
                }
            }
            by_name.insert(descriptor.name.clone(), descriptor);
        }

        Ok(Self {
            instrument: instrument.to_string(),
            by_name,
            by_card,
        })
    }

    pub fn get(&self, name: &str) -> Result<&KeywordDescriptor, ConfigError> {
        self.by_name
            .get(name)
            .ok_or_else(|| ConfigError::UnknownKeyword {
                key: name.to_string(),
                instrument: self.instrument.clone(),
            })
    }

    pub fn card(&self, name: &str) -> Result<&str, ConfigError> {
        self.get(name).map(|d| d.card.as_str())
    }

    /// Canonical owner of a card, ignoring aliases.
    pub fn name_for_card(&self, card: &str) -> Option<&str> {
        self.by_card.get(card).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeywordDescriptor> {
        self.by_name.values()
    }

    /// Fetch `name` from `header` converted to its declared type.
    pub fn header_get(&self, name: &str, header: &Header) -> Result<ParamValue, ConfigError> {
        self.header_get_opt(name, header)?
            .ok_or_else(|| ConfigError::MissingKey {
                key: format!("{} ({})", name, self.card(name).unwrap_or("?")),
            })
    }

    /// Like [`header_get`](Self::header_get) but absence is not an error.
    pub fn header_get_opt(
        &self,
        name: &str,
        header: &Header,
    ) -> Result<Option<ParamValue>, ConfigError> {
        let descriptor = self.get(name)?;
        let Some(value) = header.get(&descriptor.card) else {
            return Ok(None);
        };
        convert(name, descriptor.dtype, value).map(Some)
    }

    /// JSON record of every keyword in `group` present in `header`, keyed by canonical name.
    pub fn header_subset(
        &self,
        header: &Header,
        group: &str,
    ) -> BTreeMap<String, serde_json::Value> {
        self.by_name
            .values()
            .filter(|d| d.group.as_deref() == Some(group))
            .filter_map(|d| header.get(&d.card).map(|v| (d.name.clone(), v.to_json())))
            .collect()
    }

    /// Cards that must not be carried from a raw header into a product.
    pub fn post_excluded_cards(&self) -> Vec<&str> {
        self.by_name
            .values()
            .filter(|d| d.post_exclude)
            .map(|d| d.card.as_str())
            .collect()
    }
}

fn convert(name: &str, dtype: DataType, value: &CardValue) -> Result<ParamValue, ConfigError> {
    match (dtype, value) {
        (DataType::Bool, CardValue::Bool(v)) => Ok(ParamValue::Bool(*v)),
        (DataType::Int, CardValue::Int(v)) => Ok(ParamValue::Int(*v)),
        (DataType::Float, CardValue::Int(v)) => Ok(ParamValue::Float(*v as f64)),
        (DataType::Float, CardValue::Float(v)) => Ok(ParamValue::Float(*v)),
        (DataType::Str | DataType::Path, v) => Ok(ParamValue::Str(v.to_string())),
        (dtype, CardValue::Str(raw)) => ParamValue::parse_as(name, dtype, raw),
        (dtype, other) => Err(ConfigError::type_mismatch(name, dtype, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword(name: &str, card: &str, dtype: DataType) -> KeywordDescriptor {
        KeywordDescriptor {
            name: name.to_string(),
            card: card.to_string(),
            dtype,
            unit: None,
            comment: None,
            combine: None,
            post_exclude: false,
            group: Some("raw".to_string()),
            alias_of: None,
        }
    }

    fn table() -> KeywordTable {
        KeywordTable::new(
            "SPIROU",
            vec![
                keyword("KW_OBSTYPE", "OBSTYPE", DataType::Str),
                keyword("KW_ACQTIME", "MJDATE", DataType::Float),
                keyword("KW_NEXP", "NEXP", DataType::Int),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_header_get_converts_to_declared_type() {
        let mut header = Header::new();
        header.set("OBSTYPE", "DARK", None);
        header.set("MJDATE", 59400i64, None);
        header.set("NEXP", "4", None);

        let keywords = table();
        assert_eq!(keywords.header_get("KW_OBSTYPE", &header).unwrap(), ParamValue::Str("DARK".into()));
        assert_eq!(keywords.header_get("KW_ACQTIME", &header).unwrap(), ParamValue::Float(59400.0));
        assert_eq!(keywords.header_get("KW_NEXP", &header).unwrap(), ParamValue::Int(4));
    }

    #[test]
    fn test_header_get_errors() {
        let mut header = Header::new();
        header.set("NEXP", "four", None);
        let keywords = table();

        assert!(matches!(
            keywords.header_get("KW_OBSTYPE", &header),
            Err(ConfigError::MissingKey { .. })
        ));
        assert!(matches!(
            keywords.header_get("KW_NEXP", &header),
            Err(ConfigError::TypeMismatch { .. })
        ));
        assert!(matches!(
            keywords.header_get("KW_NOPE", &header),
            Err(ConfigError::UnknownKeyword { .. })
        ));
        assert_eq!(keywords.header_get_opt("KW_OBSTYPE", &header).unwrap(), None);
    }

    #[test]
    fn test_card_collisions_need_an_explicit_alias() {
        let collision = KeywordTable::new(
            "SPIROU",
            vec![
                keyword("KW_WAVE_HCG_EW_MIN", "WAVHGEW0", DataType::Float),
                keyword("KW_WAVE_HCG_EW_MAX", "WAVHGEW0", DataType::Float),
            ],
        );
        assert!(matches!(collision, Err(ConfigError::DuplicateCard { .. })));

        let mut alias = keyword("KW_RAW_DPRTYPE", "ESO DPR TYPE", DataType::Str);
        alias.alias_of = Some("KW_OBSTYPE".to_string());
        let table = KeywordTable::new(
            "NIRPS_HA",
            vec![keyword("KW_OBSTYPE", "ESO DPR TYPE", DataType::Str), alias],
        )
        .unwrap();
        assert_eq!(table.name_for_card("ESO DPR TYPE"), Some("KW_OBSTYPE"));
        assert_eq!(table.card("KW_RAW_DPRTYPE").unwrap(), "ESO DPR TYPE");
    }

    #[test]
    fn test_combine_methods() {
        let values = [3.0, 1.0, 2.0];
        assert_eq!(CombineMethod::Mean.combine(&values), Some(2.0));
        assert_eq!(CombineMethod::Sum.combine(&values), Some(6.0));
        assert_eq!(CombineMethod::Math.combine(&values), Some(6.0));
        assert_eq!(CombineMethod::One.combine(&values), Some(3.0));
        assert_eq!(CombineMethod::Minimum.combine(&values), Some(1.0));
        assert_eq!(CombineMethod::Mean.combine(&[]), None);
    }

    #[test]
    fn test_combine_method_yaml_names() {
        let methods: Vec<CombineMethod> =
            serde_yaml::from_str("[mean, math, sum, '1', minimum]").unwrap();
        assert_eq!(methods[3], CombineMethod::One);
    }
}
