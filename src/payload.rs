//! Structured message payloads.
//!
//! The transport delivers each message body as a tree of named elements.
//! [`Element`] is a borrowed, name-queryable view over that tree, backed by
//! `serde_json::Value`. Arrays are repeated elements; scalars (strings,
//! numbers, booleans) are leaf values whose raw text feeds the decoder.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Element names used by the decoders.
pub mod names {
    pub const RESPONSE_ERROR: &str = "responseError";
    pub const SECURITY_DATA: &str = "securityData";
    pub const SEQUENCE_NUMBER: &str = "sequenceNumber";
    pub const SECURITY: &str = "security";
    pub const SECURITY_ERROR: &str = "securityError";
    pub const FIELD_EXCEPTIONS: &str = "fieldExceptions";
    pub const FIELD_ID: &str = "fieldId";
    pub const ERROR_INFO: &str = "errorInfo";
    pub const FIELD_DATA: &str = "fieldData";
    pub const BAR_DATA: &str = "barData";
    pub const BAR_TICK_DATA: &str = "barTickData";
    pub const TICK_DATA: &str = "tickData";
    pub const EXCEPTIONS: &str = "exceptions";
    pub const REASON: &str = "reason";
    pub const TIME: &str = "time";

    pub const SOURCE: &str = "source";
    pub const CODE: &str = "code";
    pub const ERROR_CODE: &str = "errorCode";
    pub const CATEGORY: &str = "category";
    pub const MESSAGE: &str = "message";
    pub const DESCRIPTION: &str = "description";
    pub const SUBCATEGORY: &str = "subcategory";
}

/// A payload did not have the structure a decoder required.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("missing element '{0}'")]
    Missing(String),

    #[error("element '{name}' is not {expected}")]
    WrongShape { name: String, expected: &'static str },

    #[error("element '{name}' has out-of-range index {value}")]
    BadIndex { name: String, value: String },
}

/// Borrowed view over one payload element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Element<'a>(&'a serde_json::Value);

impl<'a> Element<'a> {
    pub fn new(value: &'a serde_json::Value) -> Self {
        Element(value)
    }

    pub fn raw(&self) -> &'a serde_json::Value {
        self.0
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Named child, when this element is a structure that carries it.
    pub fn get(&self, name: &str) -> Option<Element<'a>> {
        self.0.as_object()?.get(name).map(Element)
    }

    pub fn require(&self, name: &str) -> Result<Element<'a>, PayloadError> {
        self.get(name)
            .ok_or_else(|| PayloadError::Missing(name.to_string()))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Repeated values of an array element. Non-arrays have none.
    pub fn values(&self) -> impl Iterator<Item = Element<'a>> + 'a {
        self.0
            .as_array()
            .map(|items| items.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(Element)
    }

    pub fn num_values(&self) -> usize {
        self.0.as_array().map_or(0, Vec::len)
    }

    /// Named children of a structure element, in payload order.
    pub fn fields(&self) -> impl Iterator<Item = (&'a str, Element<'a>)> + 'a {
        self.0
            .as_object()
            .into_iter()
            .flat_map(|map| map.iter())
            .map(|(name, value)| (name.as_str(), Element(value)))
    }

    /// Raw text of a scalar element.
    ///
    /// Strings are returned as-is; numbers and booleans use their JSON
    /// rendering. Null, arrays and structures have no raw text.
    pub fn raw_string(&self) -> Option<String> {
        match self.0 {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|e| e.raw_string())
    }

    /// Non-negative integer child, accepting numeric text.
    pub fn get_index(&self, name: &str) -> Result<usize, PayloadError> {
        let element = self.require(name)?;
        let raw = element.raw_string().ok_or(PayloadError::WrongShape {
            name: name.to_string(),
            expected: "a scalar",
        })?;
        raw.trim().parse::<usize>().map_err(|_| PayloadError::BadIndex {
            name: name.to_string(),
            value: raw,
        })
    }
}

/// Scope an [`ErrorInfo`] was reported at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorScope {
    Response,
    Security,
    Field,
    Subscription,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorScope::Response => write!(f, "response error"),
            ErrorScope::Security => write!(f, "security error"),
            ErrorScope::Field => write!(f, "field error"),
            ErrorScope::Subscription => write!(f, "subscription error"),
        }
    }
}

const NOT_AVAILABLE: &str = "NA";

/// Decoded error block.
///
/// Missing parts default to `"NA"`. `code` reads `code` or `errorCode`;
/// `message` reads `message` or `description`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub scope: ErrorScope,
    pub source: String,
    pub code: String,
    pub category: String,
    pub message: String,
    pub subcategory: String,
}

impl ErrorInfo {
    pub fn from_element(scope: ErrorScope, element: Element<'_>) -> Self {
        let read = |primary: &str, fallback: Option<&str>| {
            element
                .get_string(primary)
                .or_else(|| fallback.and_then(|name| element.get_string(name)))
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };

        Self {
            scope,
            source: read(names::SOURCE, None),
            code: read(names::CODE, Some(names::ERROR_CODE)),
            category: read(names::CATEGORY, None),
            message: read(names::MESSAGE, Some(names::DESCRIPTION)),
            subcategory: read(names::SUBCATEGORY, None),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: source={} code={} category={} message={} subcategory={}",
            self.scope, self.source, self.code, self.category, self.message, self.subcategory
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_element_navigation() {
        let body = json!({
            "securityData": [
                {"security": "A", "sequenceNumber": 0},
                {"security": "B", "sequenceNumber": "1"}
            ],
            "flag": true,
            "price": 101.5
        });
        let root = Element::new(&body);

        assert!(root.has("securityData"));
        assert!(!root.has("missing"));
        assert_eq!(root.require("securityData").unwrap().num_values(), 2);

        let items: Vec<_> = root.get("securityData").unwrap().values().collect();
        assert_eq!(items[0].get_string("security").as_deref(), Some("A"));
        assert_eq!(items[1].get_index("sequenceNumber").unwrap(), 1);

        assert_eq!(root.get_string("flag").as_deref(), Some("true"));
        assert_eq!(root.get_string("price").as_deref(), Some("101.5"));
        assert_eq!(root.fields().count(), 3);
        assert_eq!(root.get("flag").unwrap().values().count(), 0);
    }

    #[test]
    fn test_element_errors() {
        let body = json!({"sequenceNumber": -1, "nested": {"a": 1}});
        let root = Element::new(&body);

        assert_eq!(
            root.require("nope").unwrap_err(),
            PayloadError::Missing("nope".into())
        );
        assert!(matches!(
            root.get_index("sequenceNumber"),
            Err(PayloadError::BadIndex { .. })
        ));
        assert!(root.get("nested").unwrap().raw_string().is_none());
    }

    #[test]
    fn test_error_info_defaults_and_aliases() {
        let body = json!({"errorCode": 15, "description": "Unknown security", "source": "srv"});
        let info = ErrorInfo::from_element(ErrorScope::Response, Element::new(&body));

        assert_eq!(info.code, "15");
        assert_eq!(info.message, "Unknown security");
        assert_eq!(info.source, "srv");
        assert_eq!(info.category, "NA");
        assert_eq!(info.subcategory, "NA");
        assert!(info.to_string().starts_with("response error: source=srv code=15"));
    }
}
