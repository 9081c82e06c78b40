//! Live subscription set with change-only notifications.

use super::types::{FieldChange, SubscribedField, SubscriptionSpec};
use crate::dispatch::Owner;
use crate::error::{EngineError, Result, TransportError};
use crate::payload::{names, Element, ErrorInfo, ErrorScope};
use crate::registry::CorrelationGuard;
use crate::session::SessionShared;
use crate::transport::{message_types, LiveSubscription, Message};
use crate::types::{normalize_security, ControlKind, CorrelationId, FieldType, ParamValue};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Failure reason code for a security the service does not know.
pub const UNKNOWN_SECURITY_CODE: &str = "2";

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

struct SubscribedEntity {
    ticker: String,
    guard: CorrelationGuard<Owner>,
    fields: Vec<SubscribedField>,
    parameters: Vec<(String, ParamValue)>,
}

impl SubscribedEntity {
    fn id(&self) -> CorrelationId {
        self.guard.id()
    }

    fn live(&self) -> LiveSubscription {
        LiveSubscription {
            security: self.ticker.clone(),
            fields: self.fields.iter().map(|f| f.name.clone()).collect(),
            options: self
                .parameters
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect(),
            correlation_id: self.id(),
        }
    }

    /// Make the field set exactly `declared`, keeping cached state of survivors.
    fn replace_fields(&mut self, declared: &[(String, FieldType)]) {
        let mut previous: HashMap<String, SubscribedField> = self
            .fields
            .drain(..)
            .map(|f| (f.name.clone(), f))
            .collect();

        self.fields = declared
            .iter()
            .map(|(name, ty)| match previous.remove(name) {
                Some(mut field) => {
                    field.field_type = *ty;
                    field
                }
                None => SubscribedField::new(name.clone(), *ty),
            })
            .collect();
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut SubscribedField> {
        self.fields.iter_mut().find(|f| f.name == name)
    }
}

struct RegistryState {
    entities: BTreeMap<String, SubscribedEntity>,
    by_id: HashMap<CorrelationId, String>,
    delivering: bool,
    closed: bool,
}

impl RegistryState {
    fn take(&mut self, ticker: &str) -> Option<SubscribedEntity> {
        let entity = self.entities.remove(ticker)?;
        self.by_id.remove(&entity.id());
        Some(entity)
    }

    fn entity_for(&mut self, id: CorrelationId) -> Option<&mut SubscribedEntity> {
        let ticker = self.by_id.get(&id)?;
        self.entities.get_mut(ticker)
    }
}

/// State shared between a registry handle and the dispatch loop.
pub(crate) struct RegistryShared {
    id: u64,
    me: Weak<RegistryShared>,
    session: Arc<SessionShared>,
    state: Mutex<RegistryState>,
    listeners: Mutex<Vec<Sender<FieldChange>>>,
}

impl RegistryShared {
    fn cancel(&self, entity: &SubscribedEntity) {
        if let Err(e) = self.session.transport().cancel(entity.id()) {
            warn!(
                registry = self.id,
                ticker = %entity.ticker,
                correlation = %entity.id(),
                error = %e,
                "live cancel failed"
            );
        }
    }

    fn subscribe(&self, entity: &SubscribedEntity, resubscribe: bool) -> std::result::Result<(), TransportError> {
        let live = [entity.live()];
        let outcome = if resubscribe {
            self.session.transport().resubscribe(&live)
        } else {
            self.session.transport().subscribe(&live)
        };
        if let Err(ref e) = outcome {
            warn!(
                registry = self.id,
                ticker = %entity.ticker,
                correlation = %entity.id(),
                error = %e,
                "live subscribe failed"
            );
        }
        outcome
    }

    /// Push changes to every listener, dropping listeners that are gone or full.
    fn broadcast(&self, changes: Vec<FieldChange>) {
        if changes.is_empty() {
            return;
        }

        let mut listeners = self.listeners.lock();
        for change in changes {
            listeners.retain(|tx| match tx.try_send(change.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(registry = self.id, "listener buffer full, dropping listener");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
        }
    }

    /// Subscription data for one entity.
    pub(crate) fn on_update(&self, id: CorrelationId, message: &Message) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let Some(entity) = state.entity_for(id) else {
            debug!(registry = self.id, correlation = %id, "update for unknown entity");
            return;
        };

        let payload = message.payload();
        let ticker = entity.ticker.clone();
        let mut changes = Vec::new();

        for field in entity.fields.iter_mut() {
            let Some(element) = payload.get(&field.name) else {
                continue;
            };
            match element.raw_string() {
                Some(raw) => changes.extend(field.assign(&ticker, raw)),
                None if element.is_null() => {}
                None => debug!(ticker = %ticker, field = %field.name, "non-scalar update ignored"),
            }
        }
        changes.extend(field_exceptions(entity, payload));

        drop(state);
        self.broadcast(changes);
    }

    /// Subscription lifecycle message for one entity.
    pub(crate) fn on_status(&self, id: CorrelationId, message: &Message) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let Some(entity) = state.entity_for(id) else {
            debug!(registry = self.id, correlation = %id, message_type = %message.message_type, "status for unknown entity");
            return;
        };
        let ticker = entity.ticker.clone();
        let payload = message.payload();
        let reason = payload
            .get(names::REASON)
            .map(|r| ErrorInfo::from_element(ErrorScope::Subscription, r));

        let mut changes = Vec::new();
        match message.message_type.as_str() {
            message_types::SUBSCRIPTION_STARTED => {
                info!(registry = self.id, ticker = %ticker, correlation = %id, "subscription started");
                changes.extend(field_exceptions(entity, payload));
            }
            message_types::SUBSCRIPTION_FAILURE => {
                let reason = reason.map(|r| r.to_string()).unwrap_or_default();
                warn!(registry = self.id, ticker = %ticker, correlation = %id, reason = %reason, "subscription failed");
                let unknown = payload
                    .get(names::REASON)
                    .and_then(|r| r.get_string(names::CODE))
                    .is_some_and(|code| code == UNKNOWN_SECURITY_CODE);
                if unknown {
                    warn!(registry = self.id, ticker = %ticker, "unknown security, dropping subscription");
                    state.take(&ticker);
                }
            }
            message_types::SUBSCRIPTION_TERMINATED => {
                let reason = reason.map(|r| r.to_string()).unwrap_or_default();
                info!(registry = self.id, ticker = %ticker, correlation = %id, reason = %reason, "subscription terminated");
            }
            other => {
                debug!(registry = self.id, ticker = %ticker, message_type = other, "subscription status");
            }
        }

        drop(state);
        self.broadcast(changes);
    }
}

/// Field-level errors carried by `exceptions[]`.
fn field_exceptions(entity: &mut SubscribedEntity, payload: Element<'_>) -> Vec<FieldChange> {
    let Some(exceptions) = payload.get(names::EXCEPTIONS) else {
        return Vec::new();
    };

    let ticker = entity.ticker.clone();
    let mut changes = Vec::new();
    for exception in exceptions.values() {
        let Some(name) = exception.get_string(names::FIELD_ID) else {
            continue;
        };
        let Some(field) = entity.field_mut(&name) else {
            continue;
        };
        let message = match exception.get(names::REASON) {
            Some(reason) => ErrorInfo::from_element(ErrorScope::Field, reason).to_string(),
            None => format!("{}: {}", ErrorScope::Field, name),
        };
        warn!(ticker = %ticker, field = %name, error = %message, "field error");
        changes.push(field.assign_error(&ticker, message));
    }
    changes
}

/// A set of live subscriptions sharing one session.
///
/// Starts out delivering. Every mutation holds the registry lock for its
/// whole duration, including the calls it makes to the transport.
/// Dropping the handle closes the registry.
pub struct SubscriptionRegistry {
    shared: Arc<RegistryShared>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(session: Arc<SessionShared>) -> Self {
        let id = NEXT_REGISTRY_ID.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new_cyclic(|me| RegistryShared {
            id,
            me: me.clone(),
            session,
            state: Mutex::new(RegistryState {
                entities: BTreeMap::new(),
                by_id: HashMap::new(),
                delivering: true,
                closed: false,
            }),
            listeners: Mutex::new(Vec::new()),
        });
        debug!(registry = id, session = shared.session.id, "subscription registry created");
        Self { shared }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Open a notification stream.
    ///
    /// The stream is bounded; a listener that falls behind by more than the
    /// configured buffer is dropped and its receiver disconnects.
    pub fn updates(&self) -> Receiver<FieldChange> {
        let (tx, rx) = bounded(self.shared.session.config().notification_buffer);
        self.shared.listeners.lock().push(tx);
        rx
    }

    fn ready_for_live(&self) -> Result<()> {
        self.shared.session.ensure_open()?;
        let service = self.shared.session.config().market_data_service.clone();
        self.shared.session.ensure_service(&service)
    }

    /// Track entities, or update the field sets of tracked ones.
    ///
    /// Specs without fields are skipped. When delivering, new entities are
    /// subscribed and updated ones re-subscribed; a new entity whose
    /// subscribe fails is not kept. Returns the first transport failure.
    pub fn add<I>(&self, specs: I) -> Result<()>
    where
        I: IntoIterator<Item = SubscriptionSpec>,
    {
        if self.is_delivering() {
            self.ready_for_live()?;
        }

        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.closed {
            return Err(EngineError::RegistryClosed);
        }
        let delivering = state.delivering;
        let mut first_error: Option<TransportError> = None;

        for spec in specs {
            if spec.fields.is_empty() {
                warn!(registry = shared.id, ticker = %spec.security, "no fields to subscribe, ignoring");
                continue;
            }

            if let Some(entity) = state.entities.get_mut(&spec.security) {
                entity.replace_fields(&spec.fields);
                debug!(registry = shared.id, ticker = %entity.ticker, fields = entity.fields.len(), "subscription fields replaced");
                if delivering {
                    if let Err(e) = shared.subscribe(entity, true) {
                        first_error.get_or_insert(e);
                    }
                }
                continue;
            }

            let guard = shared
                .session
                .correlations
                .acquire(ControlKind::Subscription, Owner::Subscription(shared.me.clone()));
            let entity = SubscribedEntity {
                ticker: spec.security,
                guard,
                fields: spec
                    .fields
                    .into_iter()
                    .map(|(name, ty)| SubscribedField::new(name, ty))
                    .collect(),
                parameters: spec.parameters,
            };

            if delivering {
                if let Err(e) = shared.subscribe(&entity, false) {
                    first_error.get_or_insert(e);
                    continue;
                }
            }

            debug!(registry = shared.id, ticker = %entity.ticker, correlation = %entity.id(), "subscription added");
            state.by_id.insert(entity.id(), entity.ticker.clone());
            state.entities.insert(entity.ticker.clone(), entity);
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Stop tracking the given tickers. Returns how many were tracked.
    pub fn remove<I, S>(&self, tickers: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.shared.state.lock();
        let delivering = state.delivering;
        let mut removed = 0;

        for ticker in tickers {
            let ticker = normalize_security(ticker.as_ref());
            if let Some(entity) = state.take(&ticker) {
                if delivering {
                    self.shared.cancel(&entity);
                }
                debug!(registry = self.shared.id, ticker = %ticker, "subscription removed");
                removed += 1;
            }
        }
        removed
    }

    /// Stop tracking everything.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        let delivering = state.delivering;
        state.by_id.clear();
        for (_, entity) in std::mem::take(&mut state.entities) {
            if delivering {
                self.shared.cancel(&entity);
            }
        }
    }

    /// Cancel live delivery, keeping every definition.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if !state.delivering || state.closed {
            return;
        }
        for entity in state.entities.values() {
            self.shared.cancel(entity);
        }
        state.delivering = false;
        info!(registry = self.shared.id, entities = state.entities.len(), "subscriptions paused");
    }

    /// Re-subscribe every tracked entity. Returns the first transport failure.
    pub fn resume(&self) -> Result<()> {
        if self.is_delivering() {
            return Ok(());
        }
        self.ready_for_live()?;

        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(EngineError::RegistryClosed);
        }
        if state.delivering {
            return Ok(());
        }

        let mut first_error: Option<TransportError> = None;
        for entity in state.entities.values() {
            if let Err(e) = self.shared.subscribe(entity, false) {
                first_error.get_or_insert(e);
            }
        }
        state.delivering = true;
        info!(registry = self.shared.id, entities = state.entities.len(), "subscriptions resumed");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn is_delivering(&self) -> bool {
        self.shared.state.lock().delivering
    }

    /// Tracked tickers, sorted.
    pub fn tickers(&self) -> Vec<String> {
        self.shared.state.lock().entities.keys().cloned().collect()
    }

    /// Cached field state of one ticker.
    pub fn fields(&self, ticker: &str) -> Option<Vec<SubscribedField>> {
        let state = self.shared.state.lock();
        state
            .entities
            .get(&normalize_security(ticker))
            .map(|e| e.fields.clone())
    }

    pub fn correlation_id(&self, ticker: &str) -> Option<CorrelationId> {
        let state = self.shared.state.lock();
        state.entities.get(&normalize_security(ticker)).map(|e| e.id())
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel live delivery, release every identifier and disconnect listeners.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let delivering = state.delivering;
        state.by_id.clear();
        for (_, entity) in std::mem::take(&mut state.entities) {
            if delivering {
                self.shared.cancel(&entity);
            }
        }
        drop(state);

        self.shared.listeners.lock().clear();
        debug!(registry = self.shared.id, "subscription registry closed");
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("id", &self.shared.id)
            .field("entities", &state.entities.len())
            .field("delivering", &state.delivering)
            .field("closed", &state.closed)
            .finish()
    }
}
