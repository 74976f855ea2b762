// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The constants schema: one typed descriptor per canonical name.
//!
//! Every key a profile or a recipe argument may set must be declared here.
//! Values are validated against the descriptor on every layer, so a resolved
//! parameter set never holds a value of the wrong type or outside its options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::value::{DataType, ParamValue};
use crate::errors::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantDescriptor {
    pub name: String,
    pub dtype: DataType,
    /// Instrument default. `None` means the key must come from a higher layer.
    #[serde(default)]
    pub value: Option<ParamValue>,
    #[serde(default)]
    pub options: Vec<ParamValue>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl ConstantDescriptor {
    /// Type-check `value` and enforce options and bounds.
    pub fn check(&self, value: ParamValue) -> Result<ParamValue, ConfigError> {
        let value = value.coerce(&self.name, self.dtype)?;

        if !self.options.is_empty() && !self.options.contains(&value) {
            let options: Vec<String> = self.options.iter().map(|o| o.to_string()).collect();
            return Err(ConfigError::InvalidOption {
                key: self.name.clone(),
                value: value.to_string(),
                options: options.join(", "),
            });
        }

        if let Some(number) = value.as_f64() {
            let min = self.minimum.unwrap_or(f64::NEG_INFINITY);
            let max = self.maximum.unwrap_or(f64::INFINITY);
            if number < min || number > max {
                return Err(ConfigError::OutOfRange {
                    key: self.name.clone(),
                    value: number,
                    min,
                    max,
                });
            }
        }

        Ok(value)
    }
}

/// Registry of every constant an instrument declares.
#[derive(Debug, Clone, Default)]
pub struct ConstantRegistry {
    descriptors: BTreeMap<String, ConstantDescriptor>,
}

impl ConstantRegistry {
    pub fn new(descriptors: Vec<ConstantDescriptor>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for descriptor in descriptors {
            if map.contains_key(&descriptor.name) {
                return Err(ConfigError::DuplicateConstant {
                    name: descriptor.name,
                });
            }
            if let Some(default) = &descriptor.value {
                descriptor.check(default.clone())?;
            }
            map.insert(descriptor.name.clone(), descriptor);
        }
        Ok(Self { descriptors: map })
    }

    pub fn get(&self, name: &str, source_name: &str) -> Result<&ConstantDescriptor, ConfigError> {
        self.descriptors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownKey {
                key: name.to_string(),
                source_name: source_name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstantDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
