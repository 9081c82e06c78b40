//! Requesters: build inputs for one request shape and drive calls.

use super::cycle::{CycleInbox, CycleSignal, CycleSpec};
use super::shape::{self, RequestShape, LEADING_COLUMNS};
use super::table::{Column, TabularResult};
use crate::dispatch::Owner;
use crate::error::{EngineError, Result, TransportError};
use crate::session::SessionShared;
use crate::transport::OutboundRequest;
use crate::types::{normalize_name, normalize_security, ControlKind, FieldType, ParamValue};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Inputs of one logical call.
///
/// Names are normalized as they are added: securities collapse inner
/// whitespace and upper-case, field and event type names join words with
/// `_` and upper-case. Duplicates are ignored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestInputs {
    securities: Vec<String>,
    fields: Vec<(String, FieldType)>,
    event_types: Vec<String>,
    overrides: Vec<(String, String)>,
    parameters: Vec<(String, ParamValue)>,
}

impl RequestInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_security(&mut self, security: &str) -> &mut Self {
        let security = normalize_security(security);
        if !security.is_empty() && !self.securities.contains(&security) {
            self.securities.push(security);
        }
        self
    }

    pub fn add_securities<I, S>(&mut self, securities: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for security in securities {
            self.add_security(security.as_ref());
        }
        self
    }

    /// Declare a string-typed field.
    pub fn add_field(&mut self, field: &str) -> Result<&mut Self> {
        self.add_typed_field(field, FieldType::String)
    }

    /// Declare a field with an explicit type, replacing any earlier declaration.
    pub fn add_typed_field(&mut self, field: &str, field_type: FieldType) -> Result<&mut Self> {
        let field = normalize_name(field);
        if field.is_empty() {
            return Err(EngineError::InvalidInput("field name is empty".into()));
        }
        if shape::is_reserved(&field) {
            return Err(EngineError::InvalidInput(format!(
                "field name '{}' is reserved",
                field
            )));
        }

        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(existing) => existing.1 = field_type,
            None => self.fields.push((field, field_type)),
        }
        Ok(self)
    }

    pub fn add_fields<I, S>(&mut self, fields: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            self.add_field(field.as_ref())?;
        }
        Ok(self)
    }

    pub fn add_event_type(&mut self, event_type: &str) -> &mut Self {
        let event_type = normalize_name(event_type);
        if !event_type.is_empty() && !self.event_types.contains(&event_type) {
            self.event_types.push(event_type);
        }
        self
    }

    /// Override `field` with `value`. Blank values are ignored.
    pub fn add_override(&mut self, field: &str, value: &str) -> &mut Self {
        let field = normalize_name(field);
        let value = value.trim();
        if field.is_empty() || value.is_empty() {
            return self;
        }

        match self.overrides.iter_mut().find(|(name, _)| *name == field) {
            Some(existing) => existing.1 = value.to_string(),
            None => self.overrides.push((field, value.to_string())),
        }
        self
    }

    pub fn add_parameter(&mut self, name: &str, value: impl Into<ParamValue>) -> &mut Self {
        let name = name.trim().to_string();
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.parameters.push((name, value)),
        }
        self
    }

    /// Attach a parameter given as JSON; non-scalar values are rejected.
    pub fn add_json_parameter(&mut self, name: &str, value: &serde_json::Value) -> Result<&mut Self> {
        let value = ParamValue::from_json(name, value)?;
        Ok(self.add_parameter(name, value))
    }

    pub fn clear_securities(&mut self) -> &mut Self {
        self.securities.clear();
        self
    }

    pub fn clear_fields(&mut self) -> &mut Self {
        self.fields.clear();
        self
    }

    pub fn clear_event_types(&mut self) -> &mut Self {
        self.event_types.clear();
        self
    }

    pub fn clear_overrides(&mut self) -> &mut Self {
        self.overrides.clear();
        self
    }

    pub fn clear_parameters(&mut self) -> &mut Self {
        self.parameters.clear();
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        *self = Self::default();
        self
    }

    pub fn securities(&self) -> &[String] {
        &self.securities
    }

    pub fn fields(&self) -> &[(String, FieldType)] {
        &self.fields
    }

    pub fn event_types(&self) -> &[String] {
        &self.event_types
    }

    pub fn overrides(&self) -> &[(String, String)] {
        &self.overrides
    }

    pub fn parameters(&self) -> &[(String, ParamValue)] {
        &self.parameters
    }

    /// Check shape-specific minimums.
    pub fn validate(&self, shape: RequestShape) -> Result<()> {
        if self.securities.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "{} needs at least one security",
                shape
            )));
        }

        match shape {
            RequestShape::ReferenceData | RequestShape::HistoricalData => {
                if self.fields.is_empty() {
                    return Err(EngineError::InvalidInput(format!(
                        "{} needs at least one field",
                        shape
                    )));
                }
            }
            RequestShape::IntradayBar => {
                if self.event_types.len() != 1 {
                    return Err(EngineError::InvalidInput(format!(
                        "{} needs exactly one event type, got {}",
                        shape,
                        self.event_types.len()
                    )));
                }
            }
            RequestShape::IntradayTick => {
                if self.event_types.is_empty() {
                    return Err(EngineError::InvalidInput(format!(
                        "{} needs at least one event type",
                        shape
                    )));
                }
            }
        }
        Ok(())
    }

    /// Drop inputs `shape` does not use, logging what was dropped.
    fn retain_applicable(&mut self, shape: RequestShape) {
        if !shape.accepts_fields() {
            if !self.fields.is_empty() {
                warn!(shape = %shape, count = self.fields.len(), "ignoring fields");
                self.fields.clear();
            }
            if !self.overrides.is_empty() {
                warn!(shape = %shape, count = self.overrides.len(), "ignoring overrides");
                self.overrides.clear();
            }
        }
        if !shape.accepts_event_types() && !self.event_types.is_empty() {
            warn!(shape = %shape, count = self.event_types.len(), "ignoring event types");
            self.event_types.clear();
        }
    }

    fn columns(&self, shape: RequestShape) -> Vec<Column> {
        let declared = self
            .fields
            .iter()
            .map(|(name, ty)| Column::new(name.clone(), *ty));
        let fixed = shape
            .fixed_fields()
            .iter()
            .map(|(name, ty)| Column::new(*name, *ty));

        LEADING_COLUMNS
            .iter()
            .map(|(name, ty)| Column::new(*name, *ty))
            .chain(fixed)
            .chain(declared)
            .collect()
    }

    /// The `index`th physical sub-request of a call.
    fn sub_request(&self, shape: RequestShape, service: &str, index: usize) -> OutboundRequest {
        let securities = if shape.is_per_entity() {
            self.securities.get(index).cloned().into_iter().collect()
        } else {
            self.securities.clone()
        };

        OutboundRequest {
            service: service.to_string(),
            operation: shape.operation().to_string(),
            securities,
            fields: self.fields.iter().map(|(name, _)| name.clone()).collect(),
            event_types: self.event_types.clone(),
            overrides: self.overrides.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// A call's result together with its response-level failures.
///
/// `result` holds every row decoded, including rows for sub-requests that
/// did not fail. `error` is set when at least one sub-request failed as a
/// whole; messages appear in issuance order, joined with `" + "`.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleOutcome {
    pub result: TabularResult,
    pub error: Option<String>,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The result, or the joined failure messages.
    pub fn into_result(self) -> Result<TabularResult> {
        match self.error {
            None => Ok(self.result),
            Some(message) => Err(EngineError::Response(message)),
        }
    }
}

/// Reusable driver for one request shape.
pub struct Requester {
    session: Arc<SessionShared>,
    shape: RequestShape,
    inputs: RequestInputs,
    timeout: Option<Duration>,
}

impl Requester {
    pub(crate) fn new(session: Arc<SessionShared>, shape: RequestShape) -> Self {
        let timeout = session.config().request_timeout;
        Self {
            session,
            shape,
            inputs: RequestInputs::default(),
            timeout,
        }
    }

    pub(crate) fn with_inputs(session: Arc<SessionShared>, shape: RequestShape, mut inputs: RequestInputs) -> Self {
        inputs.retain_applicable(shape);
        let mut requester = Self::new(session, shape);
        requester.inputs = inputs;
        requester
    }

    pub fn shape(&self) -> RequestShape {
        self.shape
    }

    pub fn inputs(&self) -> &RequestInputs {
        &self.inputs
    }

    /// Bound each sub-request wait. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn add_security(&mut self, security: &str) -> &mut Self {
        self.inputs.add_security(security);
        self
    }

    pub fn add_securities<I, S>(&mut self, securities: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inputs.add_securities(securities);
        self
    }

    pub fn add_field(&mut self, field: &str) -> Result<&mut Self> {
        self.add_typed_field(field, FieldType::String)
    }

    pub fn add_typed_field(&mut self, field: &str, field_type: FieldType) -> Result<&mut Self> {
        if self.shape.accepts_fields() {
            self.inputs.add_typed_field(field, field_type)?;
        } else {
            warn!(shape = %self.shape, field, "fields are fixed for this shape, ignoring");
        }
        Ok(self)
    }

    pub fn add_fields<I, S>(&mut self, fields: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            self.add_field(field.as_ref())?;
        }
        Ok(self)
    }

    pub fn add_event_type(&mut self, event_type: &str) -> &mut Self {
        if self.shape.accepts_event_types() {
            self.inputs.add_event_type(event_type);
        } else {
            warn!(shape = %self.shape, event_type, "event types do not apply, ignoring");
        }
        self
    }

    pub fn add_override(&mut self, field: &str, value: &str) -> &mut Self {
        if self.shape.accepts_fields() {
            self.inputs.add_override(field, value);
        } else {
            warn!(shape = %self.shape, field, "overrides do not apply, ignoring");
        }
        self
    }

    pub fn add_parameter(&mut self, name: &str, value: impl Into<ParamValue>) -> &mut Self {
        self.inputs.add_parameter(name, value);
        self
    }

    pub fn add_json_parameter(&mut self, name: &str, value: &serde_json::Value) -> Result<&mut Self> {
        self.inputs.add_json_parameter(name, value)?;
        Ok(self)
    }

    pub fn clear_securities(&mut self) -> &mut Self {
        self.inputs.clear_securities();
        self
    }

    pub fn clear_fields(&mut self) -> &mut Self {
        self.inputs.clear_fields();
        self
    }

    pub fn clear_event_types(&mut self) -> &mut Self {
        self.inputs.clear_event_types();
        self
    }

    pub fn clear_overrides(&mut self) -> &mut Self {
        self.inputs.clear_overrides();
        self
    }

    pub fn clear_parameters(&mut self) -> &mut Self {
        self.inputs.clear_parameters();
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.inputs.clear();
        self
    }

    /// Run the call and return the table set, or the joined response errors.
    pub fn send(&self) -> Result<TabularResult> {
        self.execute()?.into_result()
    }

    /// Run the call, keeping rows decoded alongside any response errors.
    ///
    /// Sub-requests are issued one at a time; each is sent only after the
    /// terminal chunk of the previous one arrived. A sub-request that fails
    /// as a whole does not stop the rest.
    pub fn execute(&self) -> Result<CycleOutcome> {
        self.inputs.validate(self.shape)?;
        self.session.ensure_open()?;

        let service = self.session.config().reference_service.clone();
        self.session.ensure_service(&service)?;

        let spec = Arc::new(CycleSpec::new(
            self.shape,
            self.inputs.securities().to_vec(),
            self.inputs.columns(self.shape),
        ));
        let mut result = TabularResult::new(&spec.entities, &spec.columns);
        let (inbox, signals) = CycleInbox::new(Arc::clone(&spec));

        // Released on every exit path; chunks arriving afterwards have no owner.
        let guard = self
            .session
            .correlations
            .acquire(ControlKind::Request, Owner::Request(Arc::clone(&inbox)));
        let id = guard.id();

        let count = self.shape.sub_request_count(spec.entities.len());
        let mut errors = Vec::new();
        debug!(session = self.session.id, correlation = %id, shape = %self.shape, sub_requests = count, "starting request cycle");

        for index in 0..count {
            let request = self.inputs.sub_request(self.shape, &service, index);
            inbox.begin(index);
            self.session.transport().send_request(&request, id)?;

            if let Some(message) = self.await_sub_request(&signals, &mut result)? {
                warn!(correlation = %id, sub_request = index, error = %message, "sub-request failed");
                errors.push(message);
            }
        }

        info!(
            correlation = %id,
            shape = %self.shape,
            chunks = inbox.received(),
            failed = errors.len(),
            "request cycle finished"
        );

        Ok(CycleOutcome {
            result,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join(" + "))
            },
        })
    }

    /// Drain signals until the current sub-request completes.
    ///
    /// Returns the sub-request's joined failure message, if any. Rows
    /// arriving after a failure belong to an aborted sub-request and are
    /// dropped.
    fn await_sub_request(
        &self,
        signals: &Receiver<CycleSignal>,
        result: &mut TabularResult,
    ) -> Result<Option<String>> {
        // A timeout too large to represent waits indefinitely.
        let deadline = self.timeout.and_then(|t| Instant::now().checked_add(t));
        let mut failures: Vec<String> = Vec::new();

        loop {
            let signal = match deadline {
                Some(deadline) => signals.recv_deadline(deadline).map_err(|e| match e {
                    RecvTimeoutError::Timeout => {
                        EngineError::Timeout(self.timeout.unwrap_or_default())
                    }
                    RecvTimeoutError::Disconnected => EngineError::SessionClosed,
                })?,
                None => signals.recv().map_err(|_| EngineError::SessionClosed)?,
            };

            match signal {
                CycleSignal::Rows { table, rows } if !failures.is_empty() => {
                    debug!(table, rows = rows.len(), "rows after sub-request failure dropped");
                }
                CycleSignal::Rows { table, rows } => match result.table_mut(table) {
                    Some(table) => table.extend(rows),
                    None => warn!(table, "rows for unknown table dropped"),
                },
                CycleSignal::Failed(message) => failures.push(message),
                CycleSignal::Complete => break,
                CycleSignal::Aborted(reason) => {
                    return Err(EngineError::Transport(TransportError::new(reason)));
                }
            }
        }

        Ok(if failures.is_empty() {
            None
        } else {
            Some(failures.join(" + "))
        })
    }
}

impl std::fmt::Debug for Requester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requester")
            .field("session", &self.session.id)
            .field("shape", &self.shape)
            .field("inputs", &self.inputs)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_normalize_and_dedupe() {
        let mut inputs = RequestInputs::new();
        inputs
            .add_securities(["ibm us  equity", "IBM US EQUITY", " msft us equity"])
            .add_event_type("best bid")
            .add_override("eqy fund crncy", "USD")
            .add_override("blank", "  ");
        inputs.add_fields(["px last", "PX_LAST"]).unwrap();
        inputs.add_typed_field("px_last", FieldType::Float64).unwrap();

        assert_eq!(inputs.securities(), ["IBM US EQUITY", "MSFT US EQUITY"]);
        assert_eq!(inputs.fields(), [("PX_LAST".to_string(), FieldType::Float64)]);
        assert_eq!(inputs.event_types(), ["BEST_BID"]);
        assert_eq!(inputs.overrides(), [("EQY_FUND_CRNCY".to_string(), "USD".to_string())]);
    }

    #[test]
    fn test_reserved_field_names_rejected() {
        let mut inputs = RequestInputs::new();
        for name in ["id", "relative date", "DATE"] {
            assert!(matches!(
                inputs.add_field(name),
                Err(EngineError::InvalidInput(_))
            ));
        }
        assert!(inputs.fields().is_empty());
    }

    #[test]
    fn test_validation_per_shape() {
        let mut inputs = RequestInputs::new();
        assert!(inputs.validate(RequestShape::ReferenceData).is_err());

        inputs.add_security("A");
        assert!(inputs.validate(RequestShape::HistoricalData).is_err());
        assert!(inputs.validate(RequestShape::IntradayTick).is_err());

        inputs.add_field("X").unwrap();
        assert!(inputs.validate(RequestShape::ReferenceData).is_ok());

        inputs.add_event_type("TRADE").add_event_type("BID");
        assert!(inputs.validate(RequestShape::IntradayTick).is_ok());
        assert!(inputs.validate(RequestShape::IntradayBar).is_err());

        inputs.clear_event_types().add_event_type("TRADE");
        assert!(inputs.validate(RequestShape::IntradayBar).is_ok());
    }

    #[test]
    fn test_columns_and_sub_requests() {
        let mut inputs = RequestInputs::new();
        inputs.add_securities(["A", "B"]).add_event_type("TRADE");

        let names: Vec<_> = inputs
            .columns(RequestShape::IntradayBar)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(&names[..4], ["ID", "RELATIVE_DATE", "DATE", "OPEN"]);
        assert_eq!(names.len(), 10);

        let second = inputs.sub_request(RequestShape::IntradayBar, "//svc", 1);
        assert_eq!(second.securities, ["B"]);
        assert_eq!(second.operation, "IntradayBarRequest");

        let lookup = inputs.sub_request(RequestShape::ReferenceData, "//svc", 0);
        assert_eq!(lookup.securities, ["A", "B"]);
    }

    #[test]
    fn test_retain_applicable_drops_foreign_inputs() {
        let mut inputs = RequestInputs::new();
        inputs.add_security("A").add_event_type("TRADE").add_override("F", "1");
        inputs.add_field("X").unwrap();

        let mut bar = inputs.clone();
        bar.retain_applicable(RequestShape::IntradayBar);
        assert!(bar.fields().is_empty());
        assert!(bar.overrides().is_empty());
        assert_eq!(bar.event_types(), ["TRADE"]);

        inputs.retain_applicable(RequestShape::ReferenceData);
        assert!(inputs.event_types().is_empty());
        assert_eq!(inputs.fields().len(), 1);
    }
}
