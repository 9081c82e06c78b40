//! Scripted in-process transport shared by the integration tests.

#![allow(dead_code)]

use feedlink::{
    message_types, CorrelationId, Event, EventKind, EventSender, LiveSubscription, Message,
    OutboundRequest, Session, SessionConfig, Transport, TransportError,
};
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the engine asked the transport to do.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Start,
    OpenService(String),
    Request(OutboundRequest, CorrelationId),
    Subscribe(Vec<LiveSubscription>),
    Resubscribe(Vec<LiveSubscription>),
    Cancel(CorrelationId),
    Stop,
}

/// Builds the events answering one request. Gets the request, its
/// correlation id and how many requests were sent before it.
pub type Responder = Box<dyn Fn(&OutboundRequest, CorrelationId, usize) -> Vec<Event> + Send + Sync>;

pub struct ScriptedTransport {
    events: Mutex<Option<EventSender>>,
    calls: Mutex<Vec<Call>>,
    responder: Mutex<Option<Responder>>,
    sent: AtomicUsize,
    auto_start: AtomicBool,
    fail_requests: AtomicBool,
    fail_services: AtomicBool,
    reject_subscribe: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            sent: AtomicUsize::new(0),
            auto_start: AtomicBool::new(true),
            fail_requests: AtomicBool::new(false),
            fail_services: AtomicBool::new(false),
            reject_subscribe: Mutex::new(Vec::new()),
        })
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&OutboundRequest, CorrelationId, usize) -> Vec<Event> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        *self.responder.lock() = None;
    }

    /// Whether `start` immediately reports the session started.
    pub fn set_auto_start(&self, on: bool) {
        self.auto_start.store(on, Ordering::SeqCst);
    }

    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    pub fn fail_services(&self, fail: bool) {
        self.fail_services.store(fail, Ordering::SeqCst);
    }

    pub fn reject_subscribe(&self, security: &str) {
        self.reject_subscribe.lock().push(security.to_string());
    }

    /// Push an event to the session. Dropped once the session is closed.
    pub fn emit(&self, event: Event) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn requests(&self) -> Vec<(OutboundRequest, CorrelationId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Request(request, id) => Some((request, id)),
                _ => None,
            })
            .collect()
    }

    pub fn subscribes(&self) -> Vec<LiveSubscription> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Subscribe(subs) => Some(subs),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn resubscribes(&self) -> Vec<LiveSubscription> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Resubscribe(subs) => Some(subs),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn cancels(&self) -> Vec<CorrelationId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Cancel(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl Transport for ScriptedTransport {
    fn start(&self, _config: &SessionConfig, events: EventSender) -> Result<(), TransportError> {
        self.record(Call::Start);
        *self.events.lock() = Some(events);
        if self.auto_start.load(Ordering::SeqCst) {
            self.emit(session_status(message_types::SESSION_STARTED));
        }
        Ok(())
    }

    fn open_service(&self, name: &str) -> Result<(), TransportError> {
        self.record(Call::OpenService(name.to_string()));
        let message_type = if self.fail_services.load(Ordering::SeqCst) {
            message_types::SERVICE_OPEN_FAILURE
        } else {
            message_types::SERVICE_OPENED
        };
        self.emit(Event::single(
            EventKind::ServiceStatus,
            Message::new(message_type).with_service(name),
        ));
        Ok(())
    }

    fn send_request(
        &self,
        request: &OutboundRequest,
        correlation_id: CorrelationId,
    ) -> Result<(), TransportError> {
        self.record(Call::Request(request.clone(), correlation_id));
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::new("connection reset"));
        }

        let n = self.sent.fetch_add(1, Ordering::SeqCst);
        let events = match self.responder.lock().as_ref() {
            Some(responder) => responder(request, correlation_id, n),
            None => Vec::new(),
        };
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    fn subscribe(&self, subscriptions: &[LiveSubscription]) -> Result<(), TransportError> {
        self.record(Call::Subscribe(subscriptions.to_vec()));
        let rejected = self.reject_subscribe.lock();
        match subscriptions.iter().find(|s| rejected.contains(&s.security)) {
            Some(s) => Err(TransportError::new(format!("cannot subscribe {}", s.security))),
            None => Ok(()),
        }
    }

    fn resubscribe(&self, subscriptions: &[LiveSubscription]) -> Result<(), TransportError> {
        self.record(Call::Resubscribe(subscriptions.to_vec()));
        Ok(())
    }

    fn cancel(&self, correlation_id: CorrelationId) -> Result<(), TransportError> {
        self.record(Call::Cancel(correlation_id));
        Ok(())
    }

    fn stop(&self) {
        self.record(Call::Stop);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        start_timeout: Duration::from_secs(2),
        service_timeout: Duration::from_secs(2),
        request_timeout: Some(Duration::from_secs(5)),
        notification_buffer: 64,
        ..Default::default()
    }
}

pub fn open_session(transport: &Arc<ScriptedTransport>) -> Session {
    init_tracing();
    let session = Session::open(test_config(), Arc::clone(transport) as Arc<dyn Transport>).unwrap();
    session.wait_started().unwrap();
    session
}

pub fn session_status(message_type: &str) -> Event {
    Event::single(EventKind::SessionStatus, Message::new(message_type))
}

pub fn response(id: CorrelationId, payload: Json) -> Event {
    Event::single(
        EventKind::Response,
        Message::new("Response").with_correlation(id).with_payload(payload),
    )
}

pub fn partial(id: CorrelationId, payload: Json) -> Event {
    Event::single(
        EventKind::PartialResponse,
        Message::new("PartialResponse").with_correlation(id).with_payload(payload),
    )
}

pub fn data(id: CorrelationId, payload: Json) -> Event {
    Event::single(
        EventKind::SubscriptionData,
        Message::new("MarketDataEvents").with_correlation(id).with_payload(payload),
    )
}

pub fn subscription_status(message_type: &str, id: CorrelationId, payload: Json) -> Event {
    Event::single(
        EventKind::SubscriptionStatus,
        Message::new(message_type).with_correlation(id).with_payload(payload),
    )
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
