//! Core types shared by the request and subscription engines.

use crate::error::{EngineError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format used when a date/time value is rendered back to text.
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Kind of logical stream a correlation identifier belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ControlKind {
    /// A request cycle (one logical request/response call).
    Request,
    /// One subscribed entity of a subscription registry.
    Subscription,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKind::Request => write!(f, "Request"),
            ControlKind::Subscription => write!(f, "Subscription"),
        }
    }
}

/// Opaque token attached to outgoing calls and echoed on related events.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId {
    pub kind: ControlKind,
    pub sequence: u64,
}

impl CorrelationId {
    pub const fn new(kind: ControlKind, sequence: u64) -> Self {
        Self { kind, sequence }
    }

    pub const fn request(sequence: u64) -> Self {
        Self::new(ControlKind::Request, sequence)
    }

    pub const fn subscription(sequence: u64) -> Self {
        Self::new(ControlKind::Subscription, sequence)
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({}{})", self.kind, self.sequence)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.sequence)
    }
}

/// Declared type of a requested or subscribed field.
///
/// The set is closed: every field resolves to one of these variants when it
/// is declared, and decoding dispatches on the variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    Char,
    DateTime,
    Float32,
    Float64,
    Int32,
    Int64,
    #[default]
    String,
}

impl FieldType {
    /// Every supported type, in declaration order.
    pub const ALL: [FieldType; 8] = [
        FieldType::Bool,
        FieldType::Char,
        FieldType::DateTime,
        FieldType::Float32,
        FieldType::Float64,
        FieldType::Int32,
        FieldType::Int64,
        FieldType::String,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Char => "char",
            FieldType::DateTime => "datetime",
            FieldType::Float32 => "f32",
            FieldType::Float64 => "f64",
            FieldType::Int32 => "i32",
            FieldType::Int64 => "i64",
            FieldType::String => "string",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded, typed field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Char(char),
    DateTime(NaiveDateTime),
    Float32(f32),
    Float64(f64),
    Int32(i32),
    Int64(i64),
    String(String),
}

impl Value {
    /// The declared type this value satisfies.
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Bool(_) => FieldType::Bool,
            Value::Char(_) => FieldType::Char,
            Value::DateTime(_) => FieldType::DateTime,
            Value::Float32(_) => FieldType::Float32,
            Value::Float64(_) => FieldType::Float64,
            Value::Int32(_) => FieldType::Int32,
            Value::Int64(_) => FieldType::Int64,
            Value::String(_) => FieldType::String,
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
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Widening accessor for any floating-point variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Widening accessor for any integer variant.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v.format(DATETIME_FORMAT)),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
        }
    }
}

/// A parameter attached to a request or a subscription.
///
/// Covers the supported field types plus an opaque pass-through string that
/// is handed to the transport untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Bool(bool),
    Char(char),
    DateTime(NaiveDateTime),
    Float32(f32),
    Float64(f64),
    Int32(i32),
    Int64(i64),
    String(String),
    PassThrough(String),
}

impl ParamValue {
    pub fn pass_through(raw: impl Into<String>) -> Self {
        ParamValue::PassThrough(raw.into())
    }

    /// Convert a JSON scalar into a parameter.
    ///
    /// Null, arrays and objects have no parameter representation and are
    /// rejected here, before anything is attached to a request.
    pub fn from_json(name: &str, value: &serde_json::Value) -> Result<Self> {
        let unsupported = |reason: &str| EngineError::UnsupportedParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        match value {
            serde_json::Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            serde_json::Value::String(s) => Ok(ParamValue::String(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ParamValue::Int64(i))
                } else if n.is_u64() {
                    Err(unsupported("integer out of i64 range"))
                } else {
                    n.as_f64()
                        .map(ParamValue::Float64)
                        .ok_or_else(|| unsupported("unrepresentable number"))
                }
            }
            serde_json::Value::Null => Err(unsupported("null")),
            serde_json::Value::Array(_) => Err(unsupported("array")),
            serde_json::Value::Object(_) => Err(unsupported("object")),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Char(v) => write!(f, "{}", v),
            ParamValue::DateTime(v) => write!(f, "{}", v.format(DATETIME_FORMAT)),
            ParamValue::Float32(v) => write!(f, "{}", v),
            ParamValue::Float64(v) => write!(f, "{}", v),
            ParamValue::Int32(v) => write!(f, "{}", v),
            ParamValue::Int64(v) => write!(f, "{}", v),
            ParamValue::String(v) | ParamValue::PassThrough(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<char> for ParamValue {
    fn from(v: char) -> Self {
        ParamValue::Char(v)
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(v: NaiveDateTime) -> Self {
        ParamValue::DateTime(v)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float32(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float64(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int32(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int64(v)
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<Value> for ParamValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Bool(v) => ParamValue::Bool(v),
            Value::Char(v) => ParamValue::Char(v),
            Value::DateTime(v) => ParamValue::DateTime(v),
            Value::Float32(v) => ParamValue::Float32(v),
            Value::Float64(v) => ParamValue::Float64(v),
            Value::Int32(v) => ParamValue::Int32(v),
            Value::Int64(v) => ParamValue::Int64(v),
            Value::String(v) => ParamValue::String(v),
        }
    }
}

/// Trim, collapse inner whitespace runs into `separator`, upper-case.
fn collapse_whitespace(input: &str, separator: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(separator)
        .to_uppercase()
}

/// Canonical form of an entity identifier (`"ibm  us equity"` -> `"IBM US EQUITY"`).
pub fn normalize_security(input: &str) -> String {
    collapse_whitespace(input, " ")
}

/// Canonical form of a field, event type or override name (`"px last"` -> `"PX_LAST"`).
pub fn normalize_name(input: &str) -> String {
    collapse_whitespace(input, "_")
}
