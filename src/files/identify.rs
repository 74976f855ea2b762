// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! DPRTYPE identification as an ordered, data-driven rule cascade.
//!
//! Each instrument declares a list of `(conditions, dprtype)` rules over
//! canonical keyword names. The first rule whose every condition equals the
//! header value wins; no match yields [`UNKNOWN_DPRTYPE`]. Identification is
//! pure: same header, same answer.
//!
//! ```yaml
//! dprtype_rules:
//!   - dprtype: DARK_DARK_INT
//!     match: {KW_OBSTYPE: DARK, KW_CCAS: pos_pk, KW_CREF: pos_pk, KW_CALIBWH: P4}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::fits::Header;
use crate::config::consts::UNKNOWN_DPRTYPE;
use crate::config::KeywordTable;
use crate::errors::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DprtypeRule {
    pub dprtype: String,
    /// Canonical keyword name to expected header value.
    #[serde(rename = "match")]
    pub conditions: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    dprtype: String,
    /// (card, expected value)
    checks: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct DprtypeIdentifier {
    rules: Vec<CompiledRule>,
    keywords: BTreeSet<String>,
}

impl DprtypeIdentifier {
    /// Resolve every rule's keywords to cards up front so unknown names fail at load.
    pub fn new(rules: &[DprtypeRule], keywords: &KeywordTable) -> Result<Self, ConfigError> {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut used = BTreeSet::new();

        for rule in rules {
            let mut checks = Vec::with_capacity(rule.conditions.len());
            for (name, expected) in &rule.conditions {
                checks.push((keywords.card(name)?.to_string(), expected.trim().to_string()));
                used.insert(name.clone());
            }
            compiled.push(CompiledRule {
                dprtype: rule.dprtype.clone(),
                checks,
            });
        }

        Ok(Self {
            rules: compiled,
            keywords: used,
        })
    }

    /// First matching DPRTYPE, or `UNKNOWN`.
    pub fn identify(&self, header: &Header) -> String {
        self.rules
            .iter()
            .find(|rule| {
                rule.checks.iter().all(|(card, expected)| {
                    header
                        .get_str(card)
                        .map_or(false, |value| value.trim() == expected)
                })
            })
            .map(|rule| rule.dprtype.clone())
            .unwrap_or_else(|| UNKNOWN_DPRTYPE.to_string())
    }

    /// Canonical keywords any rule looks at.
    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.keywords
    }

    pub fn dprtypes(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.dprtype.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub fn is_indexable(dprtype: &str) -> bool {
    dprtype != UNKNOWN_DPRTYPE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Instrument;

    fn header(cards: &[(&str, &str)]) -> Header {
        let mut header = Header::new();
        for (card, value) in cards {
            header.set(card, *value, None);
        }
        header
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let instrument = Instrument::builtin("SPIROU").unwrap();
        let identifier = &instrument.identifier;

        let internal_dark = header(&[
            ("OBSTYPE", "DARK"),
            ("SBCCAS_P", "pos_pk"),
            ("SBCREF_P", "pos_pk"),
            ("SBCALI_P", "P4"),
        ]);
        assert_eq!(identifier.identify(&internal_dark), "DARK_DARK_INT");

        let obj_fp = header(&[
            ("OBSTYPE", "OBJECT"),
            ("SBCCAS_P", "pos_pk"),
            ("SBCREF_P", "pos_fp"),
            ("TRG_TYPE", "TARGET"),
            ("DRS_MODE", "SPECTROSCOPY"),
        ]);
        assert_eq!(identifier.identify(&obj_fp), "OBJ_FP");

        let polar_fp = header(&[
            ("OBSTYPE", "OBJECT"),
            ("SBCCAS_P", "pos_pk"),
            ("SBCREF_P", "pos_fp"),
            ("TRG_TYPE", "TARGET"),
            ("DRS_MODE", "POLAR"),
        ]);
        assert_eq!(identifier.identify(&polar_fp), "POLAR_FP");
    }

    #[test]
    fn test_unmatched_header_is_unknown() {
        let instrument = Instrument::builtin("SPIROU").unwrap();
        let odd = header(&[("OBSTYPE", "TEST"), ("SBCCAS_P", "pos_pk")]);
        let dprtype = instrument.identifier.identify(&odd);
        assert_eq!(dprtype, UNKNOWN_DPRTYPE);
        assert!(!is_indexable(&dprtype));
    }

    #[test]
    fn test_every_rule_is_reachable_from_a_conforming_header() {
        for name in ["SPIROU", "NIRPS_HA"] {
            let instrument = Instrument::builtin(name).unwrap();
            for rule in &instrument.dprtype_rules {
                let mut conforming = Header::new();
                for (keyword, value) in &rule.conditions {
                    let card = instrument.keywords.card(keyword).unwrap();
                    conforming.set(card, value.as_str(), None);
                }
                let dprtype = instrument.identifier.identify(&conforming);
                assert!(is_indexable(&dprtype), "{name}: {} fell through", rule.dprtype);
            }
        }
    }

    #[test]
    fn test_rules_with_unknown_keywords_fail_to_compile() {
        let keywords = KeywordTable::new("TEST", vec![]).unwrap();
        let rules = vec![DprtypeRule {
            dprtype: "DARK_DARK".into(),
            conditions: BTreeMap::from([("KW_OBSTYPE".to_string(), "DARK".to_string())]),
        }];
        assert!(matches!(
            DprtypeIdentifier::new(&rules, &keywords),
            Err(ConfigError::UnknownKeyword { .. })
        ));
    }
}
