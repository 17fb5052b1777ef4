//! Error types for the core crate.
//!
//! Nothing here aborts a simulation: handler errors are swallowed and logged by
//! the bus, and bus/config errors only surface at wiring time.

use crate::event::EventKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while wiring subscriptions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("handler {handler} is already subscribed to {kind}")]
    DuplicateSubscription { kind: EventKind, handler: String },
}

/// A handler-local failure. The bus logs it and moves on to the next handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unexpected {kind} event")]
    UnexpectedEvent { kind: EventKind },

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
