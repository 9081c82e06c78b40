//! Subscription definitions, cached field state and change notifications.

use crate::decode::ConversionError;
use crate::types::{normalize_name, normalize_security, FieldType, ParamValue, Value};
use serde::{Deserialize, Serialize};

/// What to subscribe to for one entity.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionSpec {
    pub(crate) security: String,
    pub(crate) fields: Vec<(String, FieldType)>,
    pub(crate) parameters: Vec<(String, ParamValue)>,
}

impl SubscriptionSpec {
    pub fn new(security: &str) -> Self {
        Self {
            security: normalize_security(security),
            fields: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Add a string-typed field.
    pub fn with_field(self, field: &str) -> Self {
        self.with_typed_field(field, FieldType::String)
    }

    /// Add a field with a declared type, replacing an earlier declaration.
    pub fn with_typed_field(mut self, field: &str, field_type: FieldType) -> Self {
        let field = normalize_name(field);
        if field.is_empty() {
            return self;
        }
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(existing) => existing.1 = field_type,
            None => self.fields.push((field, field_type)),
        }
        self
    }

    pub fn with_fields<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        fields
            .into_iter()
            .fold(self, |spec, field| spec.with_field(field.as_ref()))
    }

    pub fn with_parameter(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        let name = name.trim().to_string();
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.parameters.push((name, value)),
        }
        self
    }

    pub fn clear_fields(mut self) -> Self {
        self.fields.clear();
        self
    }

    pub fn clear_parameters(mut self) -> Self {
        self.parameters.clear();
        self
    }

    pub fn security(&self) -> &str {
        &self.security
    }

    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }

    pub fn parameters(&self) -> &[(String, ParamValue)] {
        &self.parameters
    }
}

/// Cached state of one subscribed field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribedField {
    pub name: String,
    pub field_type: FieldType,
    pub last_value: Option<String>,
    pub last_error: Option<String>,
}

impl SubscribedField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            last_value: None,
            last_error: None,
        }
    }

    /// Store a raw value. Returns a change only when the raw text differs.
    pub fn assign(&mut self, ticker: &str, raw: String) -> Option<FieldChange> {
        if self.last_value.as_deref() == Some(raw.as_str()) {
            return None;
        }

        let old = self.last_value.replace(raw.clone());
        self.last_error = None;
        Some(FieldChange {
            ticker: ticker.to_string(),
            field: self.name.clone(),
            field_type: self.field_type,
            old_raw: old,
            new_raw: Some(raw),
            error: None,
        })
    }

    /// Store a field-level error. Always produces a notification.
    pub fn assign_error(&mut self, ticker: &str, error: String) -> FieldChange {
        self.last_error = Some(error.clone());
        FieldChange {
            ticker: ticker.to_string(),
            field: self.name.clone(),
            field_type: self.field_type,
            old_raw: self.last_value.clone(),
            new_raw: self.last_value.clone(),
            error: Some(error),
        }
    }
}

/// Notification that a subscribed field changed or reported an error.
///
/// Raw text is carried as received; typed values are produced when read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub ticker: String,
    pub field: String,
    pub field_type: FieldType,
    pub old_raw: Option<String>,
    pub new_raw: Option<String>,
    pub error: Option<String>,
}

impl FieldChange {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Previous value in the declared type, or the raw text if it does not convert.
    pub fn old_value(&self) -> Option<Value> {
        self.old_raw
            .as_deref()
            .map(|raw| self.field_type.decode_lenient(raw))
    }

    /// New value in the declared type, or the raw text if it does not convert.
    pub fn new_value(&self) -> Option<Value> {
        self.new_raw
            .as_deref()
            .map(|raw| self.field_type.decode_lenient(raw))
    }

    /// Strict decode of the new value.
    pub fn try_new_value(&self) -> Option<Result<Value, ConversionError>> {
        self.new_raw.as_deref().map(|raw| self.field_type.decode(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_notifies_only_on_change() {
        let mut field = SubscribedField::new("F1", FieldType::Int32);

        let first = field.assign("T1", "5".into()).unwrap();
        assert_eq!(first.old_raw, None);
        assert_eq!(first.new_raw.as_deref(), Some("5"));

        assert!(field.assign("T1", "5".into()).is_none());

        let second = field.assign("T1", "6".into()).unwrap();
        assert_eq!(second.old_value(), Some(Value::Int32(5)));
        assert_eq!(second.new_value(), Some(Value::Int32(6)));
    }

    #[test]
    fn test_errors_always_notify() {
        let mut field = SubscribedField::new("F1", FieldType::Float64);
        field.assign("T1", "1.5".into());

        let a = field.assign_error("T1", "bad field".into());
        let b = field.assign_error("T1", "bad field".into());
        assert!(a.is_error() && b.is_error());
        assert_eq!(a, b);
        assert_eq!(field.last_error.as_deref(), Some("bad field"));

        field.assign("T1", "2.5".into()).unwrap();
        assert!(field.last_error.is_none());
    }

    #[test]
    fn test_lenient_values() {
        let change = FieldChange {
            ticker: "T".into(),
            field: "F".into(),
            field_type: FieldType::Float64,
            old_raw: None,
            new_raw: Some("N.A.".into()),
            error: None,
        };
        assert_eq!(change.new_value(), Some(Value::String("N.A.".into())));
        assert!(change.try_new_value().unwrap().is_err());
        assert_eq!(change.old_value(), None);
    }

    #[test]
    fn test_spec_builder() {
        let spec = SubscriptionSpec::new(" t1  us equity ")
            .with_fields(["last price", "bid"])
            .with_typed_field("LAST_PRICE", FieldType::Float64)
            .with_parameter("interval", 1.5);

        assert_eq!(spec.security(), "T1 US EQUITY");
        assert_eq!(
            spec.fields(),
            [
                ("LAST_PRICE".to_string(), FieldType::Float64),
                ("BID".to_string(), FieldType::String)
            ]
        );
        assert_eq!(spec.parameters().len(), 1);
        assert!(spec.clear_fields().fields().is_empty());
    }
}
