//! The dynamic option bag block configs are built from, and the schema type
//! that validates and coerces it. Per the design notes: coercion is explicit
//! and validated, never implicit at the use site.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A single option value. `StringArray` additionally accepts a single string
/// on the wire, and `Duration` additionally accepts a numeric nanosecond
/// value or a duration string; both are normalized by `validate_options`
/// before the type check, since the raw deserialized shape is always
/// `String` or `Int` and never this variant directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Stored as nanoseconds; accepted on the wire as a duration string or a number.
    Duration(i64),
    StringArray(Vec<String>),
    Map(HashMap<String, OptionValue>),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(nanos) if *nanos >= 0 => Some(Duration::from_nanos(*nanos as u64)),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            Self::StringArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, OptionValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Parse a string-or-number into a `Duration` value, per the block config
    /// schema's "duration accepts a parseable duration string or a numeric
    /// nanosecond value" rule.
    pub fn parse_duration(raw: &str) -> Result<Self> {
        if let Ok(nanos) = raw.parse::<i64>() {
            return Ok(Self::Duration(nanos));
        }
        let duration = duration_str::parse(raw).map_err(|err| anyhow!("{err}"))?;
        Ok(Self::Duration(duration.as_nanos() as i64))
    }
}

/// An ordered, named, free-form option bag -- what a block config's `options`
/// field deserializes into before schema validation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionBag(pub HashMap<String, OptionValue>);

impl OptionBag {
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: OptionValue) {
        self.0.insert(key.into(), value);
    }
}

/// The element type an option schema entry declares. Used purely to drive
/// validation messages; `OptionValue`'s own variants carry the coerced data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionType {
    String,
    Int,
    Float,
    Bool,
    Duration,
    Map,
    StringArray,
}

impl OptionType {
    fn matches(&self, value: &OptionValue) -> bool {
        match (self, value) {
            (Self::String, OptionValue::String(_)) => true,
            (Self::Int, OptionValue::Int(_)) => true,
            (Self::Float, OptionValue::Float(_) | OptionValue::Int(_)) => true,
            (Self::Bool, OptionValue::Bool(_)) => true,
            (Self::Duration, OptionValue::Duration(_)) => true,
            (Self::Map, OptionValue::Map(_)) => true,
            (Self::StringArray, OptionValue::StringArray(_)) => true,
            // A bare string coerces to a one-element string array: the
            // schema's "accepts either a single string or a sequence" rule.
            (Self::StringArray, OptionValue::String(_)) => true,
            _ => false,
        }
    }
}

type Validator = fn(&OptionValue) -> Result<()>;

/// One entry in a block type's option schema.
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionType,
    pub required: bool,
    pub default: Option<OptionValue>,
    pub validate: Option<Validator>,
}

impl OptionSpec {
    pub const fn required(name: &'static str, kind: OptionType) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            validate: None,
        }
    }

    pub const fn optional(name: &'static str, kind: OptionType, default: OptionValue) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: Some(default),
            validate: None,
        }
    }

    pub const fn with_validator(mut self, validate: Validator) -> Self {
        self.validate = Some(validate);
        self
    }
}

/// Coerces a raw deserialized value into the shape a schema entry's kind
/// expects, before the type check runs. This is where `Duration` and
/// `StringArray` options actually become reachable: `serde`'s untagged
/// deserializer always lands a YAML/JSON duration on `String` (a duration
/// string like `"1h"`) or `Int` (a raw nanosecond count), never directly on
/// the `Duration` variant, so the schema's kind is the only thing that knows
/// a given `Int`/`String` value is meant to be a duration.
fn normalize_for_kind(kind: OptionType, value: &OptionValue) -> Result<OptionValue> {
    match (kind, value) {
        (OptionType::StringArray, OptionValue::String(s)) => Ok(OptionValue::StringArray(vec![s.clone()])),
        (OptionType::Duration, OptionValue::String(s)) => OptionValue::parse_duration(s),
        (OptionType::Duration, OptionValue::Int(n)) => Ok(OptionValue::Duration(*n)),
        _ => Ok(value.clone()),
    }
}

/// Validates and normalizes a raw `OptionBag` against a block type's schema,
/// filling in defaults and coercing bare strings into single-element arrays
/// or numeric/string durations into `Duration` values, per the schema's
/// declared kind.
pub fn validate_options(schema: &[OptionSpec], bag: &OptionBag) -> Result<OptionBag> {
    let mut out = HashMap::new();

    for spec in schema {
        match bag.get(spec.name) {
            Some(value) => {
                let normalized = normalize_for_kind(spec.kind, value)
                    .map_err(|err| anyhow!("option '{}' is not a valid {:?}: {err}", spec.name, spec.kind))?;
                if !spec.kind.matches(&normalized) {
                    return Err(anyhow!(
                        "option '{}' has the wrong type (expected {:?})",
                        spec.name,
                        spec.kind
                    ));
                }
                if let Some(validate) = spec.validate {
                    validate(&normalized)?;
                }
                out.insert(spec.name.to_string(), normalized);
            }
            None if spec.required => {
                return Err(anyhow!("missing required option '{}'", spec.name));
            }
            None => {
                if let Some(default) = spec.default.clone() {
                    out.insert(spec.name.to_string(), default);
                }
            }
        }
    }

    Ok(OptionBag(out))
}
