use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::ConversionError;

/// Semantic type tag used to convert raw store strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ValueType {
    #[default]
    String,
    Bool,
    Integer,
    Unsigned,
    Float,
    /// Milliseconds
    Duration,
    /// Comma separated items
    List,
}

impl fmt::Display for ValueType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            ValueType::String => "String",
            ValueType::Bool => "Bool",
            ValueType::Integer => "Integer",
            ValueType::Unsigned => "Unsigned",
            ValueType::Float => "Float",
            ValueType::Duration => "Duration",
            ValueType::List => "List",
        };
        f.write_str(name)
    }
}

/// Converted property value handed to listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Duration(Duration),
    List(Vec<String>),
}

impl ValueType {
    pub fn convert(
        &self,
        raw: &str,
    ) -> Result<PropertyValue, ConversionError> {
        let trimmed = raw.trim();
        let fail = |reason: String| ConversionError {
            value: raw.to_string(),
            expected: *self,
            reason,
        };

        match self {
            ValueType::String => Ok(PropertyValue::String(raw.to_string())),
            ValueType::Bool => parse_bool(trimmed)
                .map(PropertyValue::Bool)
                .ok_or_else(|| fail("expected one of true/false/yes/no/on/off/1/0".into())),
            ValueType::Integer => trimmed
                .parse::<i64>()
                .map(PropertyValue::Integer)
                .map_err(|e| fail(e.to_string())),
            ValueType::Unsigned => trimmed
                .parse::<u64>()
                .map(PropertyValue::Unsigned)
                .map_err(|e| fail(e.to_string())),
            ValueType::Float => trimmed
                .parse::<f64>()
                .map(PropertyValue::Float)
                .map_err(|e| fail(e.to_string())),
            ValueType::Duration => trimmed
                .parse::<u64>()
                .map(|ms| PropertyValue::Duration(Duration::from_millis(ms)))
                .map_err(|e| fail(e.to_string())),
            ValueType::List => Ok(PropertyValue::List(
                trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            PropertyValue::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PropertyValue::Unsigned(v) => Some(*v),
            PropertyValue::Integer(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Integer(v) => Some(*v as f64),
            PropertyValue::Unsigned(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            PropertyValue::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Integer(v) => write!(f, "{v}"),
            PropertyValue::Unsigned(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Duration(d) => write!(f, "{}", d.as_millis()),
            PropertyValue::List(items) => f.write_str(&items.join(",")),
        }
    }
}
