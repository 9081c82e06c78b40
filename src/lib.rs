//! # Feedlink
//!
//! Turns one asynchronous, event-multiplexed transport connection into
//! blocking request/response calls and change-only live subscriptions.
//!
//! ## Core Concepts
//!
//! - **Correlation identifiers**: every outgoing call is tagged; every event
//!   echoes the tag and is routed back to its owner
//! - **Request cycles**: one logical call, fanned out into sub-requests,
//!   assembled into per-entity tables with row and column scoped errors
//! - **Subscription registries**: live entity/field sets that notify only
//!   when a field's raw value changes, with pause and resume
//! - **Dispatch loop**: one thread per session consuming transport events
//!
//! ## Example
//!
//! ```ignore
//! use feedlink::{FieldType, Session, SessionConfig, SubscriptionSpec};
//!
//! let session = Session::open(SessionConfig::default(), transport)?;
//! session.wait_started()?;
//!
//! // Request/response
//! let mut requester = session.reference_data();
//! requester.add_security("IBM US Equity");
//! requester.add_typed_field("PX_LAST", FieldType::Float64)?;
//! let result = requester.send()?;
//!
//! // Live updates
//! let registry = session.subscriptions();
//! let updates = registry.updates();
//! registry.add([SubscriptionSpec::new("IBM US Equity").with_field("LAST_PRICE")])?;
//! ```

pub mod decode;
mod dispatch;
pub mod error;
pub mod payload;
pub mod registry;
pub mod request;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod types;

// Re-exports
pub use decode::{decode, ConversionError, FromRaw};
pub use error::{EngineError, Result, TransportError};
pub use payload::{Element, ErrorInfo, ErrorScope, PayloadError};
pub use registry::{CorrelationGuard, CorrelationRegistry};
pub use request::{
    Column, CycleOutcome, RequestInputs, RequestShape, Requester, Row, TabularResult, Table,
};
pub use session::{Session, SessionConfig, SessionStatus};
pub use subscription::{FieldChange, SubscribedField, SubscriptionRegistry, SubscriptionSpec};
pub use transport::{
    message_types, Event, EventKind, EventSender, LiveSubscription, Message, OutboundRequest,
    Transport,
};
pub use types::*;
