//! The application context: one scheduler, one pipeline, one state machine.
//!
//! The host calls `initialize` once and then `tick` forever. Initialization
//! either succeeds, and the app is `Running`, or fails a startup
//! precondition, and the app is `Halted` for good: its tasks are dropped, so
//! every later `tick` is a no-op and nothing is ever delivered.

use crate::config::TelemetryConfig;
use crate::error::{Result, StartupError, TelemetryError};
use crate::events::SystemEvent;
use crate::output::{SkOutput, Transport};
use crate::pipeline::{
    Attach, Emitter, NodeHandle, Pipeline, PollingSource, Sample, SinkRef, SourceRef, Transform,
    TransformRef, Wiring,
};
use crate::scheduler::Scheduler;
use crate::time::Clock;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Lifecycle of the application. There is no way back to `Initializing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    Initializing,
    Running,
    Halted { reason: String },
}

impl AppState {
    pub fn label(&self) -> &'static str {
        match self {
            AppState::Initializing => "initializing",
            AppState::Running => "running",
            AppState::Halted { .. } => "halted",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, AppState::Running)
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, AppState::Halted { .. })
    }
}

/// The telemetry agent.
///
/// Owns the scheduler, the node arena and the event channel. There is one
/// per process, held by whatever drives the main loop.
pub struct TelemetryApp {
    config: TelemetryConfig,
    state: AppState,
    scheduler: Scheduler<Pipeline>,
    pipeline: Pipeline,
    system_event_sender: broadcast::Sender<SystemEvent>,
}

impl TelemetryApp {
    /// Creates an app in the `Initializing` state.
    pub fn new(
        config: TelemetryConfig,
        clock: impl Clock + 'static,
        transport: impl Transport + 'static,
    ) -> Self {
        let (system_event_sender, _) = broadcast::channel(64);
        let pipeline = Pipeline::new(transport).with_overrides(config.nodes.clone());
        Self {
            config,
            state: AppState::Initializing,
            scheduler: Scheduler::new(clock),
            pipeline,
            system_event_sender,
        }
    }

    /// Builds the pipeline graph and leaves the `Initializing` state.
    ///
    /// `setup` wires every measurement and checks every startup
    /// precondition. If it returns an error the app halts.
    ///
    /// # Errors
    /// `InvalidState` if the app has already been initialized.
    pub fn initialize<F>(&mut self, setup: F) -> Result<&AppState>
    where
        F: FnOnce(&mut Setup<'_>) -> Result<()>,
    {
        if self.state != AppState::Initializing {
            return Err(TelemetryError::InvalidState {
                state: self.state.label(),
            });
        }
        info!(hostname = %self.config.hostname, "Initializing telemetry pipeline...");

        let outcome = setup(&mut Setup {
            config: &self.config,
            pipeline: &mut self.pipeline,
            scheduler: &mut self.scheduler,
            system_event_sender: &self.system_event_sender,
        });

        match outcome {
            Ok(()) => {
                self.state = AppState::Running;
                info!(
                    tasks = self.scheduler.len(),
                    nodes = self.pipeline.len(),
                    "Pipeline running."
                );
                self.system_event_sender
                    .send(SystemEvent::Running {
                        tasks: self.scheduler.len(),
                        nodes: self.pipeline.len(),
                        timestamp: Utc::now(),
                    })
                    .ok();
            }
            Err(e) => self.halt(e.to_string()),
        }
        Ok(&self.state)
    }

    fn halt(&mut self, reason: String) {
        error!(%reason, "Startup failed. Freezing...");
        self.scheduler.clear();
        self.pipeline.clear();
        self.system_event_sender
            .send(SystemEvent::Halted {
                reason: reason.clone(),
                timestamp: Utc::now(),
            })
            .ok();
        self.state = AppState::Halted { reason };
    }

    /// One pass of the main loop. Runs every due task; never blocks.
    ///
    /// Returns the number of tasks fired, which is always zero unless the
    /// app is running.
    pub fn tick(&mut self) -> usize {
        if !self.state.is_running() {
            return 0;
        }
        self.scheduler.tick(&mut self.pipeline)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn scheduler(&self) -> &Scheduler<Pipeline> {
        &self.scheduler
    }

    /// When the next task is due, so a host can sleep until then.
    pub fn next_deadline(&self) -> Option<Duration> {
        if self.state.is_running() {
            self.scheduler.next_deadline()
        } else {
            None
        }
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_sender.subscribe()
    }
}

/// The graph builder handed to the setup closure of `TelemetryApp::initialize`.
///
/// Adding a source here also schedules it.
pub struct Setup<'a> {
    config: &'a TelemetryConfig,
    pipeline: &'a mut Pipeline,
    scheduler: &'a mut Scheduler<Pipeline>,
    system_event_sender: &'a broadcast::Sender<SystemEvent>,
}

impl Setup<'_> {
    pub fn config(&self) -> &TelemetryConfig {
        self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &*self.pipeline
    }

    /// Fails startup unless `present` holds.
    pub fn require(&self, sensor: &str, present: bool) -> std::result::Result<(), StartupError> {
        if present {
            Ok(())
        } else {
            Err(StartupError::not_detected(sensor))
        }
    }

    /// Adds a polling source to the graph and schedules it.
    pub fn source<T: Sample>(&mut self, source: PollingSource<T>) -> Result<SourceRef<T>> {
        let handle = self.pipeline.add_source(source);
        let node = handle.id();
        let interval = self
            .pipeline
            .source_interval(node)
            .ok_or(TelemetryError::UnknownNode(node))?;
        let id = self
            .scheduler
            .register_with(interval, move |pipeline: &mut Pipeline| {
                pipeline.fire_source(node);
            })?;
        self.system_event_sender
            .send(SystemEvent::TaskScheduled { id, interval })
            .ok();
        Ok(handle)
    }

    /// A source whose read function always yields a value.
    pub fn repeat_sensor<T: Sample>(
        &mut self,
        interval: Duration,
        read: impl FnMut() -> T + 'static,
    ) -> Result<SourceRef<T>> {
        self.source(PollingSource::repeat(interval, read))
    }

    /// A source whose read function may skip a sample by returning `None`.
    pub fn polling_source<T: Sample>(
        &mut self,
        interval: Duration,
        read: impl FnMut() -> Option<T> + 'static,
    ) -> Result<SourceRef<T>> {
        self.source(PollingSource::new(interval, read))
    }

    pub fn transform<T, X>(&mut self, transform: X) -> TransformRef<T, X::Output>
    where
        T: Sample,
        X: Transform<T> + 'static,
    {
        self.pipeline.add_transform(transform)
    }

    pub fn output<T: Sample>(&mut self, output: SkOutput<T>) -> SinkRef<T> {
        self.pipeline.add_output(output)
    }

    pub fn connect_to<E, N>(&mut self, from: E, to: N) -> Result<N::Handle>
    where
        E: Emitter,
        N: Attach<E::Output>,
    {
        self.pipeline.connect_to(from, to)
    }

    pub fn wire<E: Emitter>(&mut self, from: E) -> Wiring<'_, E> {
        self.pipeline.wire(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{MemoryTransport, Metadata};
    use crate::time::ManualClock;

    fn app() -> (TelemetryApp, ManualClock, MemoryTransport) {
        let clock = ManualClock::new();
        let transport = MemoryTransport::new();
        let app = TelemetryApp::new(TelemetryConfig::default(), clock.clone(), transport.clone());
        (app, clock, transport)
    }

    #[test]
    fn tick_before_initialize_does_nothing() {
        let (mut app, clock, _) = app();
        clock.advance(Duration::from_secs(10));
        assert_eq!(app.tick(), 0);
        assert_eq!(app.state(), &AppState::Initializing);
    }

    #[test]
    fn initialize_only_once() {
        let (mut app, _, _) = app();
        app.initialize(|_| Ok(())).unwrap();
        let err = app.initialize(|_| Ok(())).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidState { state: "running" }));
    }

    #[test]
    fn failed_precondition_halts_and_clears() {
        let (mut app, clock, transport) = app();
        let mut events = app.subscribe_system_events();
        let state = app
            .initialize(|setup| {
                let co2 = setup.repeat_sensor(Duration::from_secs(1), || 400u16)?;
                setup.connect_to(co2, SkOutput::new("co2", Metadata::new("ppm", "CO2")))?;
                setup.require("SCD4x", false)?;
                Ok(())
            })
            .unwrap()
            .clone();

        assert!(state.is_halted());
        assert!(app.scheduler().is_empty());
        assert!(app.pipeline().is_empty());
        assert_eq!(app.next_deadline(), None);

        clock.advance(Duration::from_secs(60));
        assert_eq!(app.tick(), 0);
        assert!(transport.is_empty());

        let mut saw_halt = false;
        while let Ok(event) = events.try_recv() {
            if let SystemEvent::Halted { reason, .. } = event {
                assert!(reason.contains("SCD4x"));
                saw_halt = true;
            }
        }
        assert!(saw_halt);
    }

    #[test]
    fn zero_interval_source_halts() {
        let (mut app, _, _) = app();
        let state = app
            .initialize(|setup| {
                setup.repeat_sensor(Duration::ZERO, || 1u8)?;
                Ok(())
            })
            .unwrap();
        assert!(state.is_halted());
    }

    #[test]
    fn running_app_announces_its_tasks() {
        let (mut app, _, _) = app();
        let mut events = app.subscribe_system_events();
        app.initialize(|setup| {
            let source = setup.repeat_sensor(Duration::from_millis(500), || 1.0)?;
            setup.connect_to(source, SkOutput::new("x", Metadata::default()))?;
            Ok(())
        })
        .unwrap();

        assert!(matches!(
            events.try_recv().unwrap(),
            SystemEvent::TaskScheduled { interval, .. } if interval == Duration::from_millis(500)
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            SystemEvent::Running { tasks: 1, nodes: 2, .. }
        ));
        assert_eq!(app.next_deadline(), Some(Duration::from_millis(500)));
    }
}
