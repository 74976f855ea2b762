// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Typed parameter values and the data types descriptors declare.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::ConfigError;

/// Declared type of a constant or header keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Str,
    Int,
    Float,
    Bool,
    Path,
    List,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Str => "str",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::Path => "path",
            DataType::List => "list",
        };
        f.write_str(name)
    }
}

/// A parameter value. Serialized untagged so YAML and TOML stay natural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "str",
            ParamValue::List(_) => "list",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Check `self` against `dtype`, widening ints to floats.
    pub fn coerce(self, key: &str, dtype: DataType) -> Result<ParamValue, ConfigError> {
        match (dtype, self) {
            (DataType::Float, ParamValue::Int(v)) => Ok(ParamValue::Float(v as f64)),
            (DataType::Float, v @ ParamValue::Float(_)) => Ok(v),
            (DataType::Int, v @ ParamValue::Int(_)) => Ok(v),
            (DataType::Bool, v @ ParamValue::Bool(_)) => Ok(v),
            (DataType::Str | DataType::Path, v @ ParamValue::Str(_)) => Ok(v),
            (DataType::List, v @ ParamValue::List(_)) => Ok(v),
            (expected, found) => Err(ConfigError::type_mismatch(key, expected, found.type_name())),
        }
    }

    /// Parse a command-line or header string as `dtype`.
    pub fn parse_as(key: &str, dtype: DataType, raw: &str) -> Result<ParamValue, ConfigError> {
        let raw = raw.trim();
        let mismatch = || ConfigError::type_mismatch(key, dtype, format!("'{raw}'"));
        match dtype {
            DataType::Str | DataType::Path => Ok(ParamValue::Str(raw.to_string())),
            DataType::Int => raw.parse().map(ParamValue::Int).map_err(|_| mismatch()),
            DataType::Float => raw.parse().map(ParamValue::Float).map_err(|_| mismatch()),
            DataType::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(ParamValue::Bool(true)),
                "false" | "f" | "0" | "no" => Ok(ParamValue::Bool(false)),
                _ => Err(mismatch()),
            },
            DataType::List => Ok(ParamValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| ParamValue::Str(item.to_string()))
                    .collect(),
            )),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => f.write_str(v),
            ParamValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_widens_int_to_float_only() {
        assert_eq!(
            ParamValue::Int(3).coerce("K", DataType::Float).unwrap(),
            ParamValue::Float(3.0)
        );
        assert!(matches!(
            ParamValue::Float(3.5).coerce("K", DataType::Int),
            Err(ConfigError::TypeMismatch { .. })
        ));
        assert!(matches!(
            ParamValue::Str("x".into()).coerce("K", DataType::Bool),
            Err(ConfigError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_as() {
        struct TestCase {
            dtype: DataType,
            raw: &'static str,
            expected: Option<ParamValue>,
        }
        let cases = vec![
            TestCase { dtype: DataType::Int, raw: " 42 ", expected: Some(ParamValue::Int(42)) },
            TestCase { dtype: DataType::Int, raw: "4.2", expected: None },
            TestCase { dtype: DataType::Float, raw: "1e-3", expected: Some(ParamValue::Float(1e-3)) },
            TestCase { dtype: DataType::Bool, raw: "Yes", expected: Some(ParamValue::Bool(true)) },
            TestCase { dtype: DataType::Bool, raw: "F", expected: Some(ParamValue::Bool(false)) },
            TestCase { dtype: DataType::Bool, raw: "maybe", expected: None },
            TestCase { dtype: DataType::Str, raw: "AB", expected: Some(ParamValue::Str("AB".into())) },
            TestCase {
                dtype: DataType::List,
                raw: "AB, C,",
                expected: Some(ParamValue::List(vec!["AB".into(), "C".into()])),
            },
        ];

        for case in cases {
            let parsed = ParamValue::parse_as("KEY", case.dtype, case.raw).ok();
            assert_eq!(parsed, case.expected, "parsing {:?} as {}", case.raw, case.dtype);
        }
    }

    #[test]
    fn test_untagged_yaml() {
        let values: Vec<ParamValue> = serde_yaml::from_str("[true, 3, 2.5, text, [a, b]]").unwrap();
        assert_eq!(
            values,
            vec![
                ParamValue::Bool(true),
                ParamValue::Int(3),
                ParamValue::Float(2.5),
                ParamValue::Str("text".into()),
                ParamValue::List(vec!["a".into(), "b".into()]),
            ]
        );
    }
}
