//! Sessions: one transport connection and everything routed over it.

use crate::dispatch::{Dispatcher, Owner};
use crate::error::{EngineError, Result};
use crate::registry::CorrelationRegistry;
use crate::request::{RequestInputs, RequestShape, Requester, TabularResult};
use crate::subscription::SubscriptionRegistry;
use crate::transport::{Envelope, EventSender, Transport};
use crate::types::ControlKind;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Host the transport connects to.
    /// Default: "localhost"
    pub host: String,

    /// Default: 8194
    pub port: u16,

    /// Service used by every request shape.
    /// Default: "//blp/refdata"
    pub reference_service: String,

    /// Service used by subscriptions.
    /// Default: "//blp/mktdata"
    pub market_data_service: String,

    /// How long to wait for the session to report started.
    /// Default: 30s
    pub start_timeout: Duration,

    /// How long to wait for a service to report opened.
    /// Default: 30s
    pub service_timeout: Duration,

    /// Bound on each sub-request wait (None = wait indefinitely).
    /// Default: 60s
    pub request_timeout: Option<Duration>,

    /// Max buffered notifications per listener before it is dropped.
    /// Default: 10000
    pub notification_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8194,
            reference_service: "//blp/refdata".to_string(),
            market_data_service: "//blp/mktdata".to_string(),
            start_timeout: Duration::from_secs(30),
            service_timeout: Duration::from_secs(30),
            request_timeout: Some(Duration::from_secs(60)),
            notification_buffer: 10_000,
        }
    }
}

/// Lifecycle state of a session as reported by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Starting,
    Started,
    StartupFailed(String),
    Terminated,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ServiceState {
    Opening,
    Opened,
    Failed(String),
}

/// Per-connection state shared by the session handle, requesters,
/// subscription registries and the dispatch loop.
pub(crate) struct SessionShared {
    pub(crate) id: u64,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    pub(crate) correlations: Arc<CorrelationRegistry<Owner>>,
    status: Mutex<SessionStatus>,
    status_changed: Condvar,
    services: Mutex<HashMap<String, ServiceState>>,
    services_changed: Condvar,
    /// Serializes service opening.
    open_lock: Mutex<()>,
    closed: AtomicBool,
}

impl SessionShared {
    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status.lock().clone()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        let mut current = self.status.lock();
        if *current == SessionStatus::Closed {
            return;
        }
        if matches!(status, SessionStatus::Terminated | SessionStatus::Closed) {
            self.services.lock().clear();
            self.services_changed.notify_all();
        }
        *current = status;
        self.status_changed.notify_all();
    }

    pub(crate) fn set_service(&self, name: &str, state: ServiceState) {
        self.services.lock().insert(name.to_string(), state);
        self.services_changed.notify_all();
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Block until the transport reports the session started.
    pub(crate) fn wait_started(&self, timeout: Duration) -> Result<()> {
        let deadline = deadline_after(timeout);
        let mut status = self.status.lock();
        loop {
            let current = status.clone();
            match current {
                SessionStatus::Started => return Ok(()),
                SessionStatus::Starting => {
                    if wait_on(&self.status_changed, &mut status, deadline)
                        && *status == SessionStatus::Starting
                    {
                        return Err(EngineError::SessionNotStarted(format!(
                            "no start notification within {:?}",
                            timeout
                        )));
                    }
                }
                SessionStatus::StartupFailed(reason) => {
                    return Err(EngineError::SessionNotStarted(reason));
                }
                SessionStatus::Terminated => {
                    return Err(EngineError::SessionNotStarted("session terminated".into()));
                }
                SessionStatus::Closed => return Err(EngineError::SessionClosed),
            }
        }
    }

    /// Open `name` unless it is already open.
    pub(crate) fn ensure_service(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        if self.services.lock().get(name) == Some(&ServiceState::Opened) {
            return Ok(());
        }

        let _serial = self.open_lock.lock();
        self.wait_started(self.config.start_timeout)?;

        {
            let mut services = self.services.lock();
            if services.get(name) == Some(&ServiceState::Opened) {
                return Ok(());
            }
            services.insert(name.to_string(), ServiceState::Opening);
        }

        debug!(session = self.id, service = name, "opening service");
        if let Err(e) = self.transport.open_service(name) {
            self.services.lock().remove(name);
            return Err(EngineError::ServiceUnavailable(format!("{}: {}", name, e)));
        }

        let deadline = deadline_after(self.config.service_timeout);
        let mut services = self.services.lock();
        loop {
            match services.get(name).cloned() {
                Some(ServiceState::Opened) => return Ok(()),
                Some(ServiceState::Failed(reason)) => {
                    let message = format!("{}: {}", name, reason);
                    services.remove(name);
                    return Err(EngineError::ServiceUnavailable(message));
                }
                Some(ServiceState::Opening) => {
                    if wait_on(&self.services_changed, &mut services, deadline)
                        && services.get(name) == Some(&ServiceState::Opening)
                    {
                        services.remove(name);
                        return Err(EngineError::ServiceUnavailable(format!(
                            "{}: no response within {:?}",
                            name, self.config.service_timeout
                        )));
                    }
                }
                None => {
                    return Err(EngineError::ServiceUnavailable(format!(
                        "{}: session went down while opening",
                        name
                    )));
                }
            }
        }
    }
}

/// `None` when `timeout` is too large to represent, meaning no deadline.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Wait for a notification. Returns true if the deadline passed.
fn wait_on<T>(condvar: &Condvar, guard: &mut MutexGuard<'_, T>, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => condvar.wait_until(guard, deadline).timed_out(),
        None => {
            condvar.wait(guard);
            false
        }
    }
}

/// An open connection to the transport.
///
/// Owns the correlation registry, the service table and the dispatch
/// thread. `close` (also run on drop) stops the transport, aborts any
/// in-flight request and joins the dispatch thread.
pub struct Session {
    shared: Arc<SessionShared>,
    queue: Sender<Envelope>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Start the dispatch thread and the transport.
    ///
    /// Returns once the transport accepted the start call; use
    /// [`Session::wait_started`] to block until it reports started.
    pub fn open(config: SessionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst);
        let (queue, events) = unbounded();

        let shared = Arc::new(SessionShared {
            id,
            config,
            transport,
            correlations: Arc::new(CorrelationRegistry::new()),
            status: Mutex::new(SessionStatus::Starting),
            status_changed: Condvar::new(),
            services: Mutex::new(HashMap::new()),
            services_changed: Condvar::new(),
            open_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        let dispatcher = Dispatcher::new(Arc::clone(&shared), events);
        let handle = thread::Builder::new()
            .name(format!("feedlink-dispatch-{}", id))
            .spawn(move || dispatcher.run())?;

        let session = Self {
            shared,
            queue,
            dispatch: Mutex::new(Some(handle)),
        };

        info!(
            session = id,
            host = %session.shared.config.host,
            port = session.shared.config.port,
            "opening session"
        );
        let events = EventSender::new(session.queue.clone());
        if let Err(e) = session.shared.transport.start(&session.shared.config, events) {
            warn!(session = id, error = %e, "transport failed to start");
            session.close();
            return Err(e.into());
        }

        Ok(session)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status()
    }

    /// Block until the session reports started, up to the configured start timeout.
    pub fn wait_started(&self) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.wait_started(self.shared.config.start_timeout)
    }

    /// Open a logical service, blocking until it is ready or failed.
    pub fn open_service(&self, name: &str) -> bool {
        match self.shared.ensure_service(name) {
            Ok(()) => true,
            Err(e) => {
                warn!(session = self.shared.id, service = name, error = %e, "service unavailable");
                false
            }
        }
    }

    pub fn requester(&self, shape: RequestShape) -> Requester {
        Requester::new(Arc::clone(&self.shared), shape)
    }

    pub fn reference_data(&self) -> Requester {
        self.requester(RequestShape::ReferenceData)
    }

    pub fn historical_data(&self) -> Requester {
        self.requester(RequestShape::HistoricalData)
    }

    pub fn intraday_bar(&self) -> Requester {
        self.requester(RequestShape::IntradayBar)
    }

    pub fn intraday_tick(&self) -> Requester {
        self.requester(RequestShape::IntradayTick)
    }

    /// One-shot call with prepared inputs.
    pub fn issue_request(&self, shape: RequestShape, inputs: RequestInputs) -> Result<TabularResult> {
        Requester::with_inputs(Arc::clone(&self.shared), shape, inputs).send()
    }

    /// Create an empty subscription registry bound to this session.
    pub fn subscriptions(&self) -> SubscriptionRegistry {
        SubscriptionRegistry::new(Arc::clone(&self.shared))
    }

    /// Number of live correlation identifiers of `kind`.
    pub fn active_correlations(&self, kind: ControlKind) -> usize {
        self.shared.correlations.len(kind)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Stop the transport and the dispatch loop. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session = self.shared.id, "closing session");

        self.shared.transport.stop();
        self.shared.set_status(SessionStatus::Closed);
        let _ = self.queue.send(Envelope::Shutdown);

        if let Some(handle) = self.dispatch.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(session = self.shared.id, "dispatch thread panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("status", &self.shared.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8194);
        assert_eq!(config.reference_service, "//blp/refdata");
        assert_eq!(config.market_data_service, "//blp/mktdata");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.notification_buffer, 10_000);
    }

    #[test]
    fn test_unrepresentable_timeout_has_no_deadline() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(deadline_after(Duration::from_secs(1)).is_some());
    }
}
