//! Error types for the measurement protocol.
//!
//! None of these ever reach the caller of `measure`: the protocol reports
//! every failure as `bytes: None`. They travel between the meter, the actors
//! and the probes, and end up in diagnostic records.

use thiserror::Error;

use crate::types::ContextId;

/// Errors raised while setting up or running a measurement.
#[derive(Debug, Clone, Error)]
pub enum MeasureError {
    /// Failed to spawn one of the protocol actors.
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    /// The actor is not available (stopped or not started).
    #[error("Actor not available")]
    ActorUnavailable,

    /// The coordinator stopped without delivering an answer.
    #[error("Coordinator dropped its reply channel")]
    ReplyDropped,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration document could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    /// Heap introspection failed.
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),
}

impl MeasureError {
    /// Create a spawn failure error.
    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a configuration parse error.
    pub fn config_parse(msg: impl Into<String>) -> Self {
        Self::ConfigParse(msg.into())
    }
}

/// Errors reported by a [`HeapProbe`](crate::probe::HeapProbe).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// Every context slot is in use by another measurement.
    #[error("No free measurement context (capacity {capacity})")]
    Exhausted {
        /// Number of contexts the probe can track at once.
        capacity: usize,
    },

    /// The context was never attached or has already been detached.
    #[error("Unknown context: {0}")]
    UnknownContext(ContextId),

    /// The context already has an event subscriber.
    #[error("Context {0} already has a subscriber")]
    AlreadySubscribed(ContextId),
}
