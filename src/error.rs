//! Error types for the dispatch engine.

use crate::decode::ConversionError;
use crate::payload::PayloadError;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the external transport.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError(message.into())
    }
}

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid inputs: {0}")]
    InvalidInput(String),

    /// Not raised by the engine, which records conversion failures as
    /// column errors. Lets callers apply `?` to [`crate::decode::decode`].
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Not raised by the engine, which reports malformed chunks as response
    /// errors. Lets callers apply `?` to [`crate::Element`] navigation.
    #[error("Malformed payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("Response error: {0}")]
    Response(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No terminal response within {0:?}")]
    Timeout(Duration),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Session not started: {0}")]
    SessionNotStarted(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Subscription registry closed")]
    RegistryClosed,

    #[error("Unsupported parameter value for '{name}': {reason}")]
    UnsupportedParameter { name: String, reason: String },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
