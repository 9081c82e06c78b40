//! The dispatch loop: the single consumer of transport events.
//!
//! Events are processed one batch at a time, in arrival order, on a
//! dedicated thread. Chunks for a request cycle are decoded here and posted
//! to the issuing thread; subscription data is diffed against the owning
//! registry's cache under that registry's lock.

use crate::payload::{names, ErrorInfo, ErrorScope};
use crate::request::cycle::CycleInbox;
use crate::session::{ServiceState, SessionShared, SessionStatus};
use crate::subscription::RegistryShared;
use crate::transport::{message_types, Envelope, Event, EventKind, Message};
use crate::types::{ControlKind, CorrelationId};
use crossbeam_channel::Receiver;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Who a correlation identifier routes to.
#[derive(Clone)]
pub(crate) enum Owner {
    Request(Arc<CycleInbox>),
    Subscription(Weak<RegistryShared>),
}

pub(crate) struct Dispatcher {
    session: Arc<SessionShared>,
    events: Receiver<Envelope>,
}

impl Dispatcher {
    pub(crate) fn new(session: Arc<SessionShared>, events: Receiver<Envelope>) -> Self {
        Self { session, events }
    }

    /// Process events until shutdown or until every sender is gone.
    pub(crate) fn run(self) {
        info!(session = self.session.id, "dispatch loop started");

        while let Ok(envelope) = self.events.recv() {
            let event = match envelope {
                Envelope::Event(event) => event,
                Envelope::Shutdown => break,
            };

            let kind = event.kind;
            if panic::catch_unwind(AssertUnwindSafe(|| self.handle(event))).is_err() {
                error!(session = self.session.id, ?kind, "event handler panicked, event dropped");
            }
        }

        self.abort_requests("session closed");
        info!(session = self.session.id, "dispatch loop stopped");
    }

    fn handle(&self, event: Event) {
        match event.kind {
            EventKind::SessionStatus => {
                for message in &event.messages {
                    self.on_session_status(message);
                }
            }
            EventKind::ServiceStatus => {
                for message in &event.messages {
                    self.on_service_status(message);
                }
            }
            EventKind::PartialResponse => self.on_response(&event.messages, false),
            EventKind::Response => self.on_response(&event.messages, true),
            EventKind::SubscriptionStatus => {
                for message in &event.messages {
                    for (id, registry) in self.subscription_owners(message) {
                        registry.on_status(id, message);
                    }
                }
            }
            EventKind::SubscriptionData => {
                for message in &event.messages {
                    for (id, registry) in self.subscription_owners(message) {
                        registry.on_update(id, message);
                    }
                }
            }
            EventKind::Other => {
                for message in &event.messages {
                    debug!(session = self.session.id, message_type = %message.message_type, "unhandled event");
                }
            }
        }
    }

    fn on_session_status(&self, message: &Message) {
        let id = self.session.id;
        match message.message_type.as_str() {
            message_types::SESSION_STARTED => {
                info!(session = id, "session started");
                self.session.set_status(SessionStatus::Started);
            }
            message_types::SESSION_STARTUP_FAILURE => {
                let reason = describe(message);
                error!(session = id, reason = %reason, "session startup failed");
                self.session.set_status(SessionStatus::StartupFailed(reason));
                self.abort_requests("session startup failed");
            }
            message_types::SESSION_TERMINATED => {
                warn!(session = id, "session terminated");
                self.session.set_status(SessionStatus::Terminated);
                self.abort_requests("session terminated");
            }
            other => debug!(session = id, message_type = other, "session status"),
        }
    }

    fn on_service_status(&self, message: &Message) {
        let Some(service) = message
            .service
            .clone()
            .or_else(|| message.payload().get_string("serviceName"))
        else {
            warn!(session = self.session.id, message_type = %message.message_type, "service status without a service name");
            return;
        };

        match message.message_type.as_str() {
            message_types::SERVICE_OPENED => {
                info!(session = self.session.id, service = %service, "service opened");
                self.session.set_service(&service, ServiceState::Opened);
            }
            message_types::SERVICE_OPEN_FAILURE => {
                let reason = describe(message);
                error!(session = self.session.id, service = %service, reason = %reason, "service failed to open");
                self.session.set_service(&service, ServiceState::Failed(reason));
            }
            other => debug!(session = self.session.id, service = %service, message_type = other, "service status"),
        }
    }

    /// Deliver chunks, then complete every cycle named in a terminal batch.
    fn on_response(&self, messages: &[Message], terminal: bool) {
        let mut completed: Vec<(CorrelationId, Arc<CycleInbox>)> = Vec::new();

        for message in messages {
            for id in distinct(&message.correlation_ids) {
                match self.session.correlations.lookup(id) {
                    Some(Owner::Request(inbox)) => {
                        inbox.deliver(id, message);
                        if terminal && !completed.iter().any(|(seen, _)| *seen == id) {
                            completed.push((id, inbox));
                        }
                    }
                    Some(Owner::Subscription(_)) => {
                        warn!(session = self.session.id, correlation = %id, "response routed to a subscription, ignoring");
                    }
                    None => {
                        debug!(session = self.session.id, correlation = %id, "chunk for released correlation discarded");
                    }
                }
            }
        }

        for (id, inbox) in completed {
            debug!(session = self.session.id, correlation = %id, "sub-request complete");
            inbox.complete();
        }
    }

    fn subscription_owners(&self, message: &Message) -> Vec<(CorrelationId, Arc<RegistryShared>)> {
        distinct(&message.correlation_ids)
            .into_iter()
            .filter_map(|id| match self.session.correlations.lookup(id) {
                Some(Owner::Subscription(registry)) => match registry.upgrade() {
                    Some(registry) => Some((id, registry)),
                    None => {
                        debug!(correlation = %id, "registry already dropped");
                        None
                    }
                },
                Some(Owner::Request(_)) => {
                    warn!(correlation = %id, "subscription event routed to a request, ignoring");
                    None
                }
                None => {
                    debug!(correlation = %id, message_type = %message.message_type, "subscription event for released correlation");
                    None
                }
            })
            .collect()
    }

    /// Fail every in-flight request cycle.
    fn abort_requests(&self, reason: &str) {
        for (id, owner) in self.session.correlations.owners(ControlKind::Request) {
            if let Owner::Request(inbox) = owner {
                warn!(session = self.session.id, correlation = %id, reason, "aborting request cycle");
                inbox.abort(reason);
            }
        }
    }
}

fn distinct(ids: &[CorrelationId]) -> Vec<CorrelationId> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}

/// Human-readable reason carried by a status message.
fn describe(message: &Message) -> String {
    let payload = message.payload();
    payload
        .get(names::REASON)
        .map(|reason| ErrorInfo::from_element(ErrorScope::Response, reason).message)
        .or_else(|| payload.get_string(names::DESCRIPTION))
        .unwrap_or_else(|| message.message_type.clone())
}
