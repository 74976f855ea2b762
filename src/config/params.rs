// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Layered parameter resolution with provenance.
//!
//! A [`ParameterSet`] is built once per invocation by merging, low to high
//! precedence:
//!
//! 1. instrument defaults (the constants registry),
//! 2. the user profile's `constants` section,
//! 3. recipe arguments and run-rule overrides.
//!
//! Every value is validated against its descriptor on every layer and keeps
//! the [`Provenance`] of the layer that won. The set has no mutating methods:
//! [`ParameterSet::with_overrides`] returns a new set.
//!
//! # Examples
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use apero::config::{Instrument, Layer, ParamValue, ParameterResolver};
//!
//! let instrument = Instrument::builtin("SPIROU").unwrap();
//! let mut user = BTreeMap::new();
//! user.insert("DARK_QMIN".to_string(), ParamValue::Int(7));
//!
//! let params = ParameterResolver::new(&instrument)
//!     .resolve(&user, "profile.yaml", &BTreeMap::new(), "cli")
//!     .unwrap();
//!
//! assert_eq!(params.get_i64("DARK_QMIN").unwrap(), 7);
//! assert_eq!(params.provenance("DARK_QMIN").unwrap().layer, Layer::UserConfig);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::instrument::Instrument;
use super::registry::ConstantDescriptor;
use super::value::{DataType, ParamValue};
use crate::errors::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    InstrumentDefault,
    UserConfig,
    RecipeArgument,
}

/// Where a value came from and what its descriptor says about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub layer: Layer,
    pub source: String,
    pub instrument: String,
    pub dtype: DataType,
    pub author: Option<String>,
    pub comment: Option<String>,
    pub unit: Option<String>,
    pub options: Vec<ParamValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub value: ParamValue,
    pub provenance: Provenance,
}

/// Immutable, fully validated parameters of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    instrument: String,
    values: BTreeMap<String, Parameter>,
}

impl ParameterSet {
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn get(&self, key: &str) -> Result<&ParamValue, ConfigError> {
        self.values
            .get(key)
            .map(|p| &p.value)
            .ok_or_else(|| ConfigError::MissingKey {
                key: key.to_string(),
            })
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ConfigError> {
        let value = self.get(key)?;
        value
            .as_f64()
            .ok_or_else(|| ConfigError::type_mismatch(key, DataType::Float, value.type_name()))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, ConfigError> {
        let value = self.get(key)?;
        value
            .as_i64()
            .ok_or_else(|| ConfigError::type_mismatch(key, DataType::Int, value.type_name()))
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ConfigError> {
        let value = self.get(key)?;
        value
            .as_str()
            .ok_or_else(|| ConfigError::type_mismatch(key, DataType::Str, value.type_name()))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        let value = self.get(key)?;
        value
            .as_bool()
            .ok_or_else(|| ConfigError::type_mismatch(key, DataType::Bool, value.type_name()))
    }

    pub fn provenance(&self, key: &str) -> Option<&Provenance> {
        self.values.get(key).map(|p| &p.provenance)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Derive a new set with recipe-argument overrides applied on top.
    pub fn with_overrides(
        &self,
        instrument: &Instrument,
        overrides: &BTreeMap<String, ParamValue>,
        source: &str,
    ) -> Result<ParameterSet, ConfigError> {
        let mut values = self.values.clone();
        apply_layer(
            &mut values,
            instrument,
            overrides,
            Layer::RecipeArgument,
            source,
        )?;
        Ok(ParameterSet {
            instrument: self.instrument.clone(),
            values,
        })
    }
}

pub struct ParameterResolver<'a> {
    instrument: &'a Instrument,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(instrument: &'a Instrument) -> Self {
        Self { instrument }
    }

    pub fn resolve(
        &self,
        user: &BTreeMap<String, ParamValue>,
        user_source: &str,
        args: &BTreeMap<String, ParamValue>,
        args_source: &str,
    ) -> Result<ParameterSet, ConfigError> {
        let instrument = self.instrument;
        let default_source = format!("builtin:{}", instrument.source);
        let mut values = BTreeMap::new();

        for descriptor in instrument.constants.iter() {
            if let Some(default) = &descriptor.value {
                let value = descriptor.check(default.clone())?;
                values.insert(
                    descriptor.name.clone(),
                    parameter(
                        instrument,
                        descriptor,
                        value,
                        Layer::InstrumentDefault,
                        &default_source,
                    ),
                );
            }
        }

        apply_layer(&mut values, instrument, user, Layer::UserConfig, user_source)?;
        apply_layer(&mut values, instrument, args, Layer::RecipeArgument, args_source)?;

        if let Some(missing) = instrument
            .constants
            .iter()
            .find(|d| d.required && !values.contains_key(&d.name))
        {
            return Err(ConfigError::MissingKey {
                key: missing.name.clone(),
            });
        }

        Ok(ParameterSet {
            instrument: instrument.name.clone(),
            values,
        })
    }
}

fn apply_layer(
    values: &mut BTreeMap<String, Parameter>,
    instrument: &Instrument,
    layer_values: &BTreeMap<String, ParamValue>,
    layer: Layer,
    source: &str,
) -> Result<(), ConfigError> {
    for (key, raw) in layer_values {
        let descriptor = instrument.constants.get(key, source)?;
        let value = descriptor.check(raw.clone())?;
        values.insert(
            key.clone(),
            parameter(instrument, descriptor, value, layer, source),
        );
    }
    Ok(())
}

fn parameter(
    instrument: &Instrument,
    descriptor: &ConstantDescriptor,
    value: ParamValue,
    layer: Layer,
    source: &str,
) -> Parameter {
    Parameter {
        value,
        provenance: Provenance {
            layer,
            source: source.to_string(),
            instrument: instrument.name.clone(),
            dtype: descriptor.dtype,
            author: descriptor.author.clone(),
            comment: descriptor.comment.clone(),
            unit: descriptor.unit.clone(),
            options: descriptor.options.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirou() -> Instrument {
        Instrument::builtin("SPIROU").unwrap()
    }

    fn map(entries: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_layers_apply_in_precedence_order() {
        let instrument = spirou();
        let user = map(&[
            ("DARK_QMIN", ParamValue::Int(7)),
            ("DARK_QMAX", ParamValue::Int(90)),
        ]);
        let args = map(&[("DARK_QMIN", ParamValue::Int(9))]);

        let params = ParameterResolver::new(&instrument)
            .resolve(&user, "user.yaml", &args, "apero_dark")
            .unwrap();

        assert_eq!(params.get_i64("DARK_QMIN").unwrap(), 9);
        assert_eq!(params.provenance("DARK_QMIN").unwrap().layer, Layer::RecipeArgument);
        assert_eq!(params.provenance("DARK_QMIN").unwrap().source, "apero_dark");

        assert_eq!(params.get_i64("DARK_QMAX").unwrap(), 90);
        assert_eq!(params.provenance("DARK_QMAX").unwrap().layer, Layer::UserConfig);

        let untouched = params.provenance("QC_DARK_TIME").unwrap();
        assert_eq!(untouched.layer, Layer::InstrumentDefault);
        assert_eq!(untouched.instrument, "SPIROU");
    }

    #[test]
    fn test_unknown_and_mistyped_keys_are_rejected() {
        let instrument = spirou();
        let resolver = ParameterResolver::new(&instrument);
        let empty = BTreeMap::new();

        let unknown = map(&[("NOT_A_CONSTANT", ParamValue::Int(1))]);
        assert!(matches!(
            resolver.resolve(&unknown, "user.yaml", &empty, "cli"),
            Err(ConfigError::UnknownKey { .. })
        ));

        let mistyped = map(&[("DARK_QMIN", ParamValue::Str("low".into()))]);
        assert!(matches!(
            resolver.resolve(&empty, "user.yaml", &mistyped, "cli"),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_with_overrides_leaves_the_original_untouched() {
        let instrument = spirou();
        let base = ParameterResolver::new(&instrument)
            .resolve(&BTreeMap::new(), "user.yaml", &BTreeMap::new(), "cli")
            .unwrap();
        let derived = base
            .with_overrides(&instrument, &map(&[("DARK_QMIN", ParamValue::Int(2))]), "rule:dark")
            .unwrap();

        assert_ne!(base.get_i64("DARK_QMIN").unwrap(), 2);
        assert_eq!(derived.get_i64("DARK_QMIN").unwrap(), 2);
        assert_eq!(base.len(), derived.len());
    }

    #[test]
    fn test_typed_getters_report_mismatches() {
        let instrument = spirou();
        let params = ParameterResolver::new(&instrument)
            .resolve(&BTreeMap::new(), "user.yaml", &BTreeMap::new(), "cli")
            .unwrap();
        assert!(matches!(
            params.get_str("DARK_QMIN"),
            Err(ConfigError::TypeMismatch { .. })
        ));
        assert!(matches!(
            params.get("NOPE"),
            Err(ConfigError::MissingKey { .. })
        ));
    }
}
