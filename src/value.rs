//! Typed scalar values
//!
//! `Value` is the unit of meta documents, table cells and index keys.
//!
//! ## Ordering
//! - Nulls sort before everything else
//! - Numbers compare with a relative tolerance of [`RELATIVE_TOLERANCE`]:
//!   two numbers closer than that are the same key
//! - Strings and times use their natural order
//! - Values of different types are ordered by type rank
//!   (null < boolean < number < time < string)

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfError};

/// Relative difference below which two numbers are considered equal
pub const RELATIVE_TOLERANCE: f64 = 1e-5;

/// A typed scalar value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    Time(DateTime<Utc>),
    String(String),
}

/// Declared type of a value (used by table column formats)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Boolean,
    Number,
    Time,
    String,
}

impl ValueType {
    /// Parse a type name as it appears in a column format
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "number" => Ok(ValueType::Number),
            "time" => Ok(ValueType::Time),
            "string" => Ok(ValueType::String),
            other => Err(ShelfError::Config(format!("Unknown value type '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::Time => "time",
            ValueType::String => "string",
        }
    }
}

impl Value {
    /// Parse a textual cell into a value of the given type
    ///
    /// The literal `null` parses to `Value::Null` for every type.
    pub fn parse_as(text: &str, value_type: ValueType) -> Result<Self> {
        if text == "null" {
            return Ok(Value::Null);
        }
        match value_type {
            ValueType::Boolean => match text {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(ShelfError::Schema(format!("'{}' is not a boolean", text))),
            },
            ValueType::Number => text
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| ShelfError::Schema(format!("'{}' is not a number", text))),
            ValueType::Time => DateTime::parse_from_rfc3339(text)
                .map(|t| Value::Time(t.with_timezone(&Utc)))
                .map_err(|e| ShelfError::Schema(format!("'{}' is not a time: {}", text, e))),
            ValueType::String => Ok(Value::String(text.to_string())),
        }
    }

    /// Declared type of this value, `None` for nulls
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Number(_) => Some(ValueType::Number),
            Value::Time(_) => Some(ValueType::Time),
            Value::String(_) => Some(ValueType::String),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view: numbers as-is, times as epoch milliseconds, booleans as 0/1
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Time(t) => Some(t.timestamp_millis() as f64),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null | Value::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Build a value of the same numeric kind as `self` from a number
    ///
    /// Time-typed values map the number back from epoch milliseconds.
    pub fn with_numeric(&self, x: f64) -> Value {
        match self {
            Value::Time(_) => Utc
                .timestamp_millis_opt(x.round() as i64)
                .single()
                .map(Value::Time)
                .unwrap_or(Value::Null),
            _ => Value::Number(x),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Number(_) => 2,
            Value::Time(_) => 3,
            Value::String(_) => 4,
        }
    }
}

/// Tolerance-aware comparison of two numbers
pub fn compare_numbers(a: f64, b: f64) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    if !a.is_finite() || !b.is_finite() {
        return a.total_cmp(&b);
    }
    let scale = a.abs().max(b.abs());
    if (a - b).abs() <= RELATIVE_TOLERANCE * scale {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => compare_numbers(*a, *b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}
