//! The seam between the engine and the external transport.
//!
//! A [`Transport`] connects, opens services, sends requests and manages live
//! subscriptions. Everything it observes comes back as [`Event`] batches
//! pushed into the [`EventSender`] handed to it at start. The engine never
//! calls back into the transport from the dispatch thread.

use crate::error::TransportError;
use crate::payload::Element;
use crate::session::SessionConfig;
use crate::types::{CorrelationId, ParamValue};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// Message type names the engine reacts to.
pub mod message_types {
    pub const SESSION_STARTED: &str = "SessionStarted";
    pub const SESSION_STARTUP_FAILURE: &str = "SessionStartupFailure";
    pub const SESSION_TERMINATED: &str = "SessionTerminated";
    pub const SERVICE_OPENED: &str = "ServiceOpened";
    pub const SERVICE_OPEN_FAILURE: &str = "ServiceOpenFailure";
    pub const SUBSCRIPTION_STARTED: &str = "SubscriptionStarted";
    pub const SUBSCRIPTION_FAILURE: &str = "SubscriptionFailure";
    pub const SUBSCRIPTION_TERMINATED: &str = "SubscriptionTerminated";
}

/// Kind of an event batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    SessionStatus,
    ServiceStatus,
    PartialResponse,
    Response,
    SubscriptionStatus,
    SubscriptionData,
    Other,
}

/// One message inside an event batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_type: String,
    pub correlation_ids: Vec<CorrelationId>,
    pub service: Option<String>,
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_ids: Vec::new(),
            service: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_ids.push(id);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn payload(&self) -> Element<'_> {
        Element::new(&self.payload)
    }

    /// First correlation identifier, if any.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_ids.first().copied()
    }
}

/// A batch of messages of one kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub messages: Vec<Message>,
}

impl Event {
    pub fn new(kind: EventKind, messages: Vec<Message>) -> Self {
        Self { kind, messages }
    }

    pub fn single(kind: EventKind, message: Message) -> Self {
        Self::new(kind, vec![message])
    }
}

/// What travels on the dispatch queue.
#[derive(Debug)]
pub(crate) enum Envelope {
    Event(Event),
    Shutdown,
}

/// Handle the transport uses to deliver events to the dispatch loop.
#[derive(Clone, Debug)]
pub struct EventSender {
    inner: Sender<Envelope>,
}

impl EventSender {
    pub(crate) fn new(inner: Sender<Envelope>) -> Self {
        Self { inner }
    }

    /// Queue an event. Fails once the owning session has shut down.
    pub fn send(&self, event: Event) -> Result<(), TransportError> {
        self.inner
            .send(Envelope::Event(event))
            .map_err(|_| TransportError::new("dispatch loop has shut down"))
    }
}

/// One physical sub-request handed to the transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundRequest {
    pub service: String,
    pub operation: String,
    pub securities: Vec<String>,
    pub fields: Vec<String>,
    pub event_types: Vec<String>,
    pub overrides: Vec<(String, String)>,
    pub parameters: Vec<(String, ParamValue)>,
}

/// One live subscription handed to the transport.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveSubscription {
    pub security: String,
    pub fields: Vec<String>,
    /// Parameters rendered as `name=value`.
    pub options: Vec<String>,
    pub correlation_id: CorrelationId,
}

/// External collaborator that owns the actual connection.
///
/// Calls are made from caller threads, never from the dispatch thread.
/// Completion of `start` and `open_service` is reported asynchronously by
/// `SessionStatus` and `ServiceStatus` events.
pub trait Transport: Send + Sync {
    fn start(&self, config: &SessionConfig, events: EventSender) -> Result<(), TransportError>;

    fn open_service(&self, name: &str) -> Result<(), TransportError>;

    fn send_request(
        &self,
        request: &OutboundRequest,
        correlation_id: CorrelationId,
    ) -> Result<(), TransportError>;

    fn subscribe(&self, subscriptions: &[LiveSubscription]) -> Result<(), TransportError>;

    fn resubscribe(&self, subscriptions: &[LiveSubscription]) -> Result<(), TransportError>;

    fn cancel(&self, correlation_id: CorrelationId) -> Result<(), TransportError>;

    fn stop(&self) {}
}
