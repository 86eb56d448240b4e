//! Error types for the telemetry agent.

use crate::common::NodeId;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the agent's `TelemetryError`.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Main error type for scheduler, pipeline and application operations.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A task was registered with a zero interval.
    #[error("invalid interval {0:?}: intervals must be strictly positive")]
    InvalidInterval(Duration),

    /// A handle referred to a node that is not in the arena.
    #[error("unknown pipeline node {0:?}")]
    UnknownNode(NodeId),

    /// Connecting the two nodes would let a value flow back upstream.
    #[error("connecting {from:?} to {to:?} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },

    /// The operation is not allowed in the application's current state.
    #[error("operation not allowed while {state}")]
    InvalidState { state: &'static str },

    /// A startup precondition failed.
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A delta could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from a transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fatal condition detected while the application is initializing.
///
/// Any of these moves the application into the halted state: no task is
/// ever scheduled and no value is ever delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// A required sensor did not answer on its bus.
    #[error("sensor {sensor} not detected. Please check wiring")]
    SensorNotDetected { sensor: String },
}

impl StartupError {
    /// Convenience constructor for the most common startup failure.
    pub fn not_detected(sensor: impl Into<String>) -> Self {
        Self::SensorNotDetected {
            sensor: sensor.into(),
        }
    }
}
