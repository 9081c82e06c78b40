//! Raw scalar to typed value conversion.
//!
//! Transports hand every scalar over as text. Decoding turns that text into
//! the declared type of the field it belongs to. A failure is a per-value
//! [`ConversionError`]; callers attach it to the column or notification the
//! value belonged to and carry on.

use crate::types::{FieldType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Local date-time layouts accepted before falling back to RFC 3339.
const DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Date-only layouts, decoded as midnight.
const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// A raw value could not be parsed as its declared type.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("cannot convert '{raw}' to {target}: {reason}")]
pub struct ConversionError {
    pub raw: String,
    pub target: FieldType,
    pub reason: String,
}

impl ConversionError {
    fn new(raw: &str, target: FieldType, reason: impl Display) -> Self {
        Self {
            raw: raw.to_string(),
            target,
            reason: reason.to_string(),
        }
    }
}

/// Types that can be decoded from a raw scalar.
pub trait FromRaw: Sized {
    const FIELD_TYPE: FieldType;

    fn from_raw(raw: &str) -> Result<Self, ConversionError>;
}

/// Decode `raw` as `T`.
pub fn decode<T: FromRaw>(raw: &str) -> Result<T, ConversionError> {
    T::from_raw(raw)
}

fn parse_trimmed<T>(raw: &str, target: FieldType) -> Result<T, ConversionError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConversionError::new(raw, target, e))
}

impl FromRaw for bool {
    const FIELD_TYPE: FieldType = FieldType::Bool;

    fn from_raw(raw: &str) -> Result<Self, ConversionError> {
        let text = raw.trim();
        if text.eq_ignore_ascii_case("true") {
            Ok(true)
        } else if text.eq_ignore_ascii_case("false") {
            Ok(false)
        } else {
            Err(ConversionError::new(raw, Self::FIELD_TYPE, "expected true or false"))
        }
    }
}

impl FromRaw for char {
    const FIELD_TYPE: FieldType = FieldType::Char;

    fn from_raw(raw: &str) -> Result<Self, ConversionError> {
        let mut chars = raw.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(ConversionError::new(
                raw,
                Self::FIELD_TYPE,
                "expected exactly one character",
            )),
        }
    }
}

impl FromRaw for NaiveDateTime {
    const FIELD_TYPE: FieldType = FieldType::DateTime;

    fn from_raw(raw: &str) -> Result<Self, ConversionError> {
        let text = raw.trim();

        for layout in DATETIME_LAYOUTS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, layout) {
                return Ok(dt);
            }
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(dt.naive_utc());
        }

        for layout in DATE_LAYOUTS {
            if let Some(dt) = NaiveDate::parse_from_str(text, layout)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
            {
                return Ok(dt);
            }
        }

        Err(ConversionError::new(
            raw,
            Self::FIELD_TYPE,
            "unrecognized date/time format",
        ))
    }
}

impl FromRaw for f32 {
    const FIELD_TYPE: FieldType = FieldType::Float32;

    fn from_raw(raw: &str) -> Result<Self, ConversionError> {
        parse_trimmed(raw, Self::FIELD_TYPE)
    }
}

impl FromRaw for f64 {
    const FIELD_TYPE: FieldType = FieldType::Float64;

    fn from_raw(raw: &str) -> Result<Self, ConversionError> {
        parse_trimmed(raw, Self::FIELD_TYPE)
    }
}

impl FromRaw for i32 {
    const FIELD_TYPE: FieldType = FieldType::Int32;

    fn from_raw(raw: &str) -> Result<Self, ConversionError> {
        parse_trimmed(raw, Self::FIELD_TYPE)
    }
}

impl FromRaw for i64 {
    const FIELD_TYPE: FieldType = FieldType::Int64;

    fn from_raw(raw: &str) -> Result<Self, ConversionError> {
        parse_trimmed(raw, Self::FIELD_TYPE)
    }
}

impl FromRaw for String {
    const FIELD_TYPE: FieldType = FieldType::String;

    fn from_raw(raw: &str) -> Result<Self, ConversionError> {
        Ok(raw.to_string())
    }
}

impl FieldType {
    /// Decode `raw` into the variant matching this declared type.
    pub fn decode(self, raw: &str) -> Result<Value, ConversionError> {
        match self {
            FieldType::Bool => decode::<bool>(raw).map(Value::Bool),
            FieldType::Char => decode::<char>(raw).map(Value::Char),
            FieldType::DateTime => decode::<NaiveDateTime>(raw).map(Value::DateTime),
            FieldType::Float32 => decode::<f32>(raw).map(Value::Float32),
            FieldType::Float64 => decode::<f64>(raw).map(Value::Float64),
            FieldType::Int32 => decode::<i32>(raw).map(Value::Int32),
            FieldType::Int64 => decode::<i64>(raw).map(Value::Int64),
            FieldType::String => decode::<String>(raw).map(Value::String),
        }
    }

    /// Decode `raw`, keeping the raw text when it does not convert.
    pub fn decode_lenient(self, raw: &str) -> Value {
        self.decode(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datetime(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode::<bool>(" True ").unwrap(), true);
        assert_eq!(decode::<bool>("false").unwrap(), false);
        assert_eq!(decode::<char>("Y").unwrap(), 'Y');
        assert_eq!(decode::<char>(" ").unwrap(), ' ');
        assert_eq!(decode::<i32>(" 42").unwrap(), 42);
        assert_eq!(decode::<i64>("-9000000000").unwrap(), -9_000_000_000);
        assert_eq!(decode::<f64>("101.25").unwrap(), 101.25);
        assert_eq!(decode::<f32>("1e2").unwrap(), 100.0);
        assert_eq!(decode::<String>("  keep  ").unwrap(), "  keep  ");
    }

    #[test]
    fn test_decode_datetimes() {
        assert_eq!(
            decode::<NaiveDateTime>("2024-03-01T09:30:00").unwrap(),
            datetime(2024, 3, 1, 9, 30, 0)
        );
        assert_eq!(
            decode::<NaiveDateTime>("2024-03-01 09:30:15.250").unwrap(),
            datetime(2024, 3, 1, 9, 30, 15)
                + chrono::Duration::milliseconds(250)
        );
        assert_eq!(
            decode::<NaiveDateTime>("2024-03-01").unwrap(),
            datetime(2024, 3, 1, 0, 0, 0)
        );
        assert_eq!(
            decode::<NaiveDateTime>("2024-03-01T10:00:00+01:00").unwrap(),
            datetime(2024, 3, 1, 9, 0, 0)
        );
    }

    #[test]
    fn test_decode_failures() {
        let err = decode::<i32>("12.5").unwrap_err();
        assert_eq!(err.target, FieldType::Int32);
        assert_eq!(err.raw, "12.5");

        assert!(decode::<bool>("yes").is_err());
        assert!(decode::<char>("AB").is_err());
        assert!(decode::<char>("").is_err());
        assert!(decode::<f64>("N.A.").is_err());
        assert!(decode::<NaiveDateTime>("yesterday").is_err());
        assert!(decode::<i32>("3000000000").is_err());
    }

    #[test]
    fn test_field_type_dispatch() {
        assert_eq!(FieldType::Int64.decode("7").unwrap(), Value::Int64(7));
        assert_eq!(FieldType::Float32.decode("0.5").unwrap(), Value::Float32(0.5));
        assert_eq!(
            FieldType::String.decode("abc").unwrap(),
            Value::String("abc".into())
        );
        assert!(FieldType::Float64.decode("abc").is_err());

        // Every declared type accepts at least one representative value.
        for ty in FieldType::ALL {
            let sample = match ty {
                FieldType::Bool => "true",
                FieldType::Char => "x",
                FieldType::DateTime => "2020-01-01",
                FieldType::Float32 | FieldType::Float64 => "1.5",
                FieldType::Int32 | FieldType::Int64 => "15",
                FieldType::String => "anything",
            };
            assert_eq!(ty.decode(sample).unwrap().field_type(), ty);
        }
    }

    #[test]
    fn test_decode_lenient_falls_back_to_raw() {
        assert_eq!(FieldType::Float64.decode_lenient("2.5"), Value::Float64(2.5));
        assert_eq!(
            FieldType::Float64.decode_lenient("N.A."),
            Value::String("N.A.".into())
        );
    }
}
