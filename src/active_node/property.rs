//! Property declarations and typecasting.
//!
//! A property is a named, typed attribute on a node class. Every value
//! written to a property goes through [`PropertyType::typecast`] first, so
//! an instance never holds a value of the wrong type: a value that cannot
//! be coerced becomes `Null`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::index::IndexType;
use crate::model::Value;

/// Strings the boolean typecaster reads as `false`.
const FALSE_VALUES: &[&str] = &["0", "f", "F", "false", "FALSE", "off", "OFF", "no", "NO", "n", "N"];

/// Property names that always hold timestamps.
pub const TIMESTAMP_PROPERTIES: &[&str] = &["created_at", "updated_at"];

/// Declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PropertyType {
    /// No coercion.
    #[default]
    Any,
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    /// Accepted in declarations, normalized to `DateTime` by `property()`.
    Time,
}

impl PropertyType {
    /// Coerce `value` into this type. `Null` in, `Null` out.
    pub fn typecast(self, value: Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }
        match self {
            PropertyType::Any => value,
            PropertyType::String => cast_string(value),
            PropertyType::Integer => cast_integer(value),
            PropertyType::Float => cast_float(value),
            PropertyType::Boolean => cast_boolean(value),
            PropertyType::Date => cast_date(value),
            PropertyType::DateTime | PropertyType::Time => cast_datetime(value),
        }
    }
}

fn cast_string(value: Value) -> Value {
    match value {
        Value::String(_) => value,
        Value::DateTime(dt) => Value::String(dt.to_rfc3339()),
        other => Value::String(other.to_string()),
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

fn cast_integer(value: Value) -> Value {
    match value {
        Value::Int(_) => value,
        Value::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => parse_number(&s).map_or(Value::Null, |f| Value::Int(f.trunc() as i64)),
        },
        _ => Value::Null,
    }
}

fn cast_float(value: Value) -> Value {
    match value {
        Value::Float(_) => value,
        Value::Int(i) => Value::Float(i as f64),
        Value::String(s) => parse_number(&s).map_or(Value::Null, Value::Float),
        _ => Value::Null,
    }
}

fn cast_boolean(value: Value) -> Value {
    match value {
        Value::Bool(_) => value,
        Value::String(s) if s.is_empty() => Value::Null,
        Value::String(s) => Value::Bool(!FALSE_VALUES.contains(&s.as_str())),
        Value::Int(i) => Value::Bool(i != 0),
        Value::Float(f) => Value::Bool(f != 0.0),
        other => Value::Bool(!other.is_blank()),
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok().map(|n| n.and_utc()))
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok().map(|n| n.and_utc()))
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|n| n.and_utc()))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn cast_datetime(value: Value) -> Value {
    match value {
        Value::DateTime(_) => value,
        Value::Date(d) => d
            .and_hms_opt(0, 0, 0)
            .map_or(Value::Null, |n| Value::DateTime(n.and_utc())),
        Value::Int(secs) => DateTime::from_timestamp(secs, 0).map_or(Value::Null, Value::DateTime),
        Value::String(s) => parse_datetime(&s).map_or(Value::Null, Value::DateTime),
        _ => Value::Null,
    }
}

fn cast_date(value: Value) -> Value {
    match value {
        Value::Date(_) => value,
        Value::DateTime(dt) => Value::Date(dt.date_naive()),
        Value::String(s) => parse_date(&s)
            .or_else(|| parse_datetime(&s).map(|dt| dt.date_naive()))
            .map_or(Value::Null, Value::Date),
        _ => Value::Null,
    }
}

// ============================================================================
// Defaults
// ============================================================================

/// Default value for a property: a constant or a generator called per instance.
#[derive(Clone)]
pub enum PropertyDefault {
    Value(Value),
    Generator(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl PropertyDefault {
    pub fn evaluate(&self) -> Value {
        match self {
            PropertyDefault::Value(v) => v.clone(),
            PropertyDefault::Generator(f) => f(),
        }
    }
}

impl fmt::Debug for PropertyDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyDefault::Value(v) => f.debug_tuple("Value").field(v).finish(),
            PropertyDefault::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

// ============================================================================
// Options & definitions
// ============================================================================

/// Options accepted by `property()` / `attribute()`.
#[derive(Debug, Clone, Default)]
pub struct PropertyOptions {
    pub property_type: PropertyType,
    pub default: Option<PropertyDefault>,
    pub index: Option<IndexType>,
    pub protected: bool,
}

impl PropertyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed(property_type: PropertyType) -> Self {
        Self { property_type, ..Self::default() }
    }

    pub fn of_type(mut self, property_type: PropertyType) -> Self {
        self.property_type = property_type;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(PropertyDefault::Value(value.into()));
        self
    }

    pub fn default_with(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(PropertyDefault::Generator(Arc::new(f)));
        self
    }

    pub fn index(mut self) -> Self {
        self.index = Some(IndexType::BTree);
        self
    }

    pub fn unique(mut self) -> Self {
        self.index = Some(IndexType::Unique);
        self
    }

    /// Exclude from mass assignment unless assigned without protection.
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    /// Timestamp names are forced to `DateTime`; `Time` is normalized to `DateTime`.
    pub(crate) fn with_magic(mut self, name: &str) -> Self {
        if TIMESTAMP_PROPERTIES.contains(&name) || self.property_type == PropertyType::Time {
            self.property_type = PropertyType::DateTime;
        }
        self
    }
}

/// A declared property on a node class.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub property_type: PropertyType,
    pub default: Option<PropertyDefault>,
    pub index: Option<IndexType>,
    pub protected: bool,
}

impl PropertyDef {
    pub(crate) fn new(name: impl Into<String>, options: PropertyOptions) -> Self {
        Self {
            name: name.into(),
            property_type: options.property_type,
            default: options.default,
            index: options.index,
            protected: options.protected,
        }
    }

    pub fn typecast(&self, value: Value) -> Value {
        self.property_type.typecast(value)
    }

    /// The typecast default, or `Null` when none is declared.
    pub fn default_value(&self) -> Value {
        self.default
            .as_ref()
            .map_or(Value::Null, |d| self.typecast(d.evaluate()))
    }
}
