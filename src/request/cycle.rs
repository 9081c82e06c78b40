//! Chunk decoding and the hand-off between the dispatch thread and the
//! thread that issued a call.
//!
//! The issuing thread owns the result tables. The dispatch thread never
//! touches them: it decodes each chunk into rows and posts them, as
//! [`CycleSignal`]s, to the cycle's channel. The issuing thread drains that
//! channel and appends.

use super::shape::{self, RequestShape, ENTITY_NOT_FOUND_CODE, ID_COLUMN};
use super::table::{Column, Row};
use crate::payload::{names, Element, ErrorInfo, ErrorScope, PayloadError};
use crate::transport::Message;
use crate::types::{CorrelationId, Value};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fixed layout of one call: entities, columns and how to find them.
#[derive(Debug)]
pub(crate) struct CycleSpec {
    pub(crate) shape: RequestShape,
    pub(crate) entities: Vec<String>,
    pub(crate) columns: Arc<[Column]>,
    column_index: HashMap<String, usize>,
}

impl CycleSpec {
    pub(crate) fn new(shape: RequestShape, entities: Vec<String>, columns: Vec<Column>) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            shape,
            entities,
            columns: columns.into(),
            column_index,
        }
    }

    fn column(&self, response_name: &str) -> Option<usize> {
        self.column_index
            .get(shape::column_name(response_name))
            .copied()
    }

    /// Row holding only the identity value of table `table`.
    fn model_row(&self, table: usize) -> Row {
        let mut row = Row::empty(self.columns.len());
        if let (Some(id), Some(entity)) = (self.column_index.get(ID_COLUMN), self.entities.get(table)) {
            row.values[*id] = Some(Value::String(entity.clone()));
        }
        row
    }

    fn table_for(&self, item: Element<'_>) -> Result<usize, PayloadError> {
        let index = item.get_index(names::SEQUENCE_NUMBER)?;
        if index < self.entities.len() {
            Ok(index)
        } else {
            Err(PayloadError::BadIndex {
                name: names::SEQUENCE_NUMBER.to_string(),
                value: index.to_string(),
            })
        }
    }
}

/// What the dispatch thread tells the issuing thread.
#[derive(Debug)]
pub(crate) enum CycleSignal {
    /// Decoded rows for one table.
    Rows { table: usize, rows: Vec<Row> },
    /// The current sub-request failed as a whole.
    Failed(String),
    /// The terminal chunk of the current sub-request arrived.
    Complete,
    /// The cycle cannot finish.
    Aborted(String),
}

/// Dispatch-side end of a cycle, registered as the owner of its correlation id.
#[derive(Debug)]
pub(crate) struct CycleInbox {
    spec: Arc<CycleSpec>,
    current: AtomicUsize,
    received: AtomicUsize,
    signals: Sender<CycleSignal>,
}

impl CycleInbox {
    pub(crate) fn new(spec: Arc<CycleSpec>) -> (Arc<Self>, Receiver<CycleSignal>) {
        let (signals, receiver) = unbounded();
        let inbox = Arc::new(Self {
            spec,
            current: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            signals,
        });
        (inbox, receiver)
    }

    /// Mark sub-request `index` as the one chunks now belong to.
    pub(crate) fn begin(&self, index: usize) {
        self.current.store(index, Ordering::SeqCst);
    }

    pub(crate) fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    /// Decode one chunk message and post the result.
    pub(crate) fn deliver(&self, id: CorrelationId, message: &Message) {
        let sub_request = self.current.load(Ordering::SeqCst);
        let chunk = self.received.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(correlation = %id, sub_request, chunk, "decoding chunk");

        for signal in decode_chunk(&self.spec, sub_request, message.payload()) {
            if self.signals.send(signal).is_err() {
                debug!(correlation = %id, "cycle no longer waiting");
                return;
            }
        }
    }

    pub(crate) fn complete(&self) {
        let _ = self.signals.send(CycleSignal::Complete);
    }

    pub(crate) fn abort(&self, reason: &str) {
        let _ = self.signals.send(CycleSignal::Aborted(reason.to_string()));
    }
}

/// Decode one chunk of sub-request `sub_request`.
pub(crate) fn decode_chunk(
    spec: &CycleSpec,
    sub_request: usize,
    payload: Element<'_>,
) -> Vec<CycleSignal> {
    if let Some(error) = payload.get(names::RESPONSE_ERROR) {
        let info = ErrorInfo::from_element(ErrorScope::Response, error);
        if spec.shape.is_per_entity() && info.code == ENTITY_NOT_FOUND_CODE {
            let mut row = spec.model_row(sub_request);
            row.error = Some(info.to_string());
            return vec![CycleSignal::Rows {
                table: sub_request,
                rows: vec![row],
            }];
        }
        return vec![CycleSignal::Failed(info.to_string())];
    }

    let decoded = match spec.shape {
        RequestShape::ReferenceData => decode_reference(spec, payload),
        RequestShape::HistoricalData => decode_historical(spec, payload),
        RequestShape::IntradayBar => decode_series(spec, sub_request, payload, names::BAR_DATA, names::BAR_TICK_DATA),
        RequestShape::IntradayTick => decode_series(spec, sub_request, payload, names::TICK_DATA, names::TICK_DATA),
    };

    decoded.unwrap_or_else(|e| {
        warn!(shape = %spec.shape, error = %e, "malformed response chunk");
        vec![CycleSignal::Failed(format!("malformed response: {}", e))]
    })
}

fn decode_reference(spec: &CycleSpec, payload: Element<'_>) -> Result<Vec<CycleSignal>, PayloadError> {
    let mut signals = Vec::new();
    for item in payload.require(names::SECURITY_DATA)?.values() {
        let table = spec.table_for(item)?;
        let points = item.get(names::FIELD_DATA).into_iter();
        signals.push(decode_entity(spec, table, item, points));
    }
    Ok(signals)
}

fn decode_historical(spec: &CycleSpec, payload: Element<'_>) -> Result<Vec<CycleSignal>, PayloadError> {
    let item = payload.require(names::SECURITY_DATA)?;
    let table = spec.table_for(item)?;
    let points = item
        .get(names::FIELD_DATA)
        .into_iter()
        .flat_map(|data| data.values());
    Ok(vec![decode_entity(spec, table, item, points)])
}

fn decode_series(
    spec: &CycleSpec,
    table: usize,
    payload: Element<'_>,
    outer: &str,
    inner: &str,
) -> Result<Vec<CycleSignal>, PayloadError> {
    let points = payload.require(outer)?.require(inner)?;
    Ok(vec![decode_entity(spec, table, payload, points.values())])
}

fn decode_entity<'a>(
    spec: &CycleSpec,
    table: usize,
    item: Element<'a>,
    points: impl Iterator<Item = Element<'a>>,
) -> CycleSignal {
    let mut model = spec.model_row(table);

    if let Some(error) = item.get(names::SECURITY_ERROR) {
        model.error = Some(ErrorInfo::from_element(ErrorScope::Security, error).to_string());
        return CycleSignal::Rows {
            table,
            rows: vec![model],
        };
    }

    if let Some(exceptions) = item.get(names::FIELD_EXCEPTIONS) {
        for exception in exceptions.values() {
            apply_field_exception(spec, &mut model, exception);
        }
    }

    // A lookup entity always yields at least its identity row.
    let mut rows: Vec<Row> = points.map(|point| decode_point(spec, &model, point)).collect();
    if rows.is_empty() && (spec.shape == RequestShape::ReferenceData || model.has_errors()) {
        rows.push(model);
    }

    CycleSignal::Rows { table, rows }
}

fn apply_field_exception(spec: &CycleSpec, row: &mut Row, exception: Element<'_>) {
    let Some(field) = exception.get_string(names::FIELD_ID) else {
        return;
    };
    let Some(column) = spec.column(&field) else {
        debug!(field = %field, "exception for unknown field");
        return;
    };
    let message = match exception.get(names::ERROR_INFO) {
        Some(info) => ErrorInfo::from_element(ErrorScope::Field, info).to_string(),
        None => format!("{}: {}", ErrorScope::Field, field),
    };
    row.column_errors[column] = Some(message);
}

/// Clone `model` and decode every field of one data point into it.
fn decode_point(spec: &CycleSpec, model: &Row, point: Element<'_>) -> Row {
    let mut row = model.clone();

    for (name, value) in point.fields() {
        let Some(column) = spec.column(name) else {
            continue;
        };
        if row.column_errors[column].is_some() || row.values[column].is_some() {
            continue;
        }

        let field_type = spec.columns[column].field_type;
        match value.raw_string() {
            Some(raw) => match field_type.decode(&raw) {
                Ok(decoded) => row.values[column] = Some(decoded),
                Err(e) => row.column_errors[column] = Some(e.to_string()),
            },
            None if value.is_null() => {}
            None => {
                row.column_errors[column] = Some(format!("'{}' is not a scalar value", name));
            }
        }
    }

    row
}
