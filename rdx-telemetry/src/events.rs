//! Defines the system events broadcast by the `TelemetryApp`.
//!
//! Events describe the application's lifecycle, not its data. Values leave
//! through the pipeline's `Transport`; these are for whoever supervises the
//! device.

use crate::common::TaskId;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Events related to the lifecycle and state of the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    /// Fired for each polling task scheduled during startup.
    TaskScheduled { id: TaskId, interval: Duration },
    /// Fired once when initialization succeeds and ticking begins.
    Running {
        tasks: usize,
        nodes: usize,
        timestamp: DateTime<Utc>,
    },
    /// Fired once when a startup precondition fails. Nothing runs afterwards.
    Halted {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}
