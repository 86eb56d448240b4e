//! # Telemetry
//!
//! A cooperative sampling-and-publishing pipeline for engine room telemetry.
//!
//! Sensors are polled on independent fixed-rate timers, their readings are
//! calibrated by a chain of transforms, and the results are delivered as
//! Signal K deltas, each path annotated once with its units and names.
//!
//! ## Core Concepts
//!
//! - **Scheduler**: a single-threaded, non-blocking task runner. The host
//!   calls `tick` from its main loop; due tasks fire in registration order.
//! - **Pipeline**: an arena of nodes built once at startup. A
//!   `PollingSource` feeds zero or more `Transform`s, ending at an output
//!   sink. Handles are typed, so wiring mismatched nodes does not compile.
//! - **Transport**: where sinks hand their deltas. Delivery never blocks.
//! - **TelemetryApp**: the context that owns all of the above and the
//!   `Initializing → Running | Halted` state machine.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use telemetry::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let transport = JsonLinesTransport::new(std::io::stdout(), "engineroom");
//!     let mut app = TelemetryApp::new(TelemetryConfig::default(), SystemClock::new(), transport);
//!
//!     app.initialize(|setup| {
//!         let co2 = setup.repeat_sensor(Duration::from_secs(1), || 400u16)?;
//!         setup.connect_to(
//!             co2,
//!             SkOutput::new(
//!                 "environment.inside.engineroom.CO2_level",
//!                 Metadata::new("ppm", "Engine Room CO2 PPM"),
//!             ),
//!         )?;
//!         Ok(())
//!     })?;
//!
//!     loop {
//!         app.tick();
//!     }
//! }
//! ```

pub const AGENT_NAME: &str = "Engine Room Telemetry";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod app;
pub mod common;
pub mod config;
pub mod engine_room;
pub mod error;
pub mod events;
pub mod output;
pub mod pipeline;
pub mod scheduler;
pub mod sensors;
pub mod time;

/// A prelude module for easy importing of the most common telemetry types.
pub mod prelude {
    pub use crate::app::{AppState, Setup, TelemetryApp};
    pub use crate::common::{NodeId, TaskId};
    pub use crate::config::{ClockResolution, ConsoleFormat, NodeConfig, TelemetryConfig};
    pub use crate::error::{StartupError, TelemetryError};
    pub use crate::events::SystemEvent;
    pub use crate::output::{
        BroadcastTransport, Delta, Delivery, JsonLinesTransport, MemoryTransport, Metadata,
        OutputSink, SkOutput, Transport,
    };
    pub use crate::pipeline::{
        LambdaTransform, Linear, MovingAverage, NodeHandle, Pipeline, PollingSource, Sample,
        SinkRef, SourceRef, Transform, TransformRef, Value,
    };
    pub use crate::scheduler::Scheduler;
    pub use crate::time::{Clock, ManualClock, SystemClock};
}
