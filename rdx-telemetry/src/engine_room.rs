//! The engine-room measurement graph.
//!
//! Eight measurements, each a polling source feeding an optional calibration
//! step and a Signal K output:
//!
//! | measurement          | driver    | transform        | units |
//! |----------------------|-----------|------------------|-------|
//! | CO2                  | SCD4x     | -                | ppm   |
//! | exhaust temperature  | one-wire  | Linear(1, 0)     | K     |
//! | alternator temp.     | one-wire  | Linear(1, 0)     | K     |
//! | ambient temperature  | SCD4x     | Linear(1, 273.15)| K     |
//! | humidity             | SCD4x     | Linear(0.01, 0)  | ratio |
//! | NO2 / CO / NH3       | MICS6814  | -                | Ohms  |
//!
//! The SCD4x must answer at startup; without it the device halts.

use crate::app::Setup;
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::output::{Metadata, SkOutput};
use crate::pipeline::{Linear, PollingSource, SinkRef};
use crate::sensors::sim::{SimulatedMics6814, SimulatedOneWire, SimulatedScd4x};
use crate::sensors::{shared, GasSensor, OneWireBus, Scd4x, Shared};
use tracing::{info, warn};

pub mod paths {
    pub const CO2: &str = "environment.inside.engineroom.CO2_level";
    pub const EXHAUST_TEMPERATURE: &str = "environment.inside.engineroom.temperature.exhaust";
    pub const ALTERNATOR_TEMPERATURE: &str =
        "environment.inside.engineroom.temperature.alternator";
    pub const AMBIENT_TEMPERATURE: &str = "environment.inside.engineRoom.temperature";
    pub const HUMIDITY: &str = "environment.inside.engineroom.humidity";
    pub const NO2: &str = "environment.inside.engineroom.NO2_level";
    pub const CO: &str = "environment.inside.engineroom.CO_level";
    pub const NH3: &str = "environment.inside.engineroom.NH3_level";
}

/// The drivers the graph reads from.
pub struct Drivers<S, B, G> {
    pub scd4x: Shared<S>,
    pub one_wire: Shared<B>,
    pub gas: Shared<G>,
}

impl<S, B, G> Clone for Drivers<S, B, G> {
    fn clone(&self) -> Self {
        Self {
            scd4x: self.scd4x.clone(),
            one_wire: self.one_wire.clone(),
            gas: self.gas.clone(),
        }
    }
}

impl Drivers<SimulatedScd4x, SimulatedOneWire, SimulatedMics6814> {
    pub fn simulated(config: &SimulationConfig) -> Self {
        Self {
            scd4x: shared(SimulatedScd4x::new(config.scd4x_present)),
            one_wire: shared(SimulatedOneWire::new(config.one_wire_devices)),
            gas: shared(SimulatedMics6814::new()),
        }
    }
}

/// Handles to every output, for inspection after startup.
#[derive(Debug, Clone, Copy)]
pub struct Outputs {
    pub co2: SinkRef<u16>,
    pub exhaust_temperature: SinkRef<f64>,
    pub alternator_temperature: SinkRef<f64>,
    pub ambient_temperature: SinkRef<f64>,
    pub humidity: SinkRef<f64>,
    pub no2: SinkRef<f64>,
    pub co: SinkRef<f64>,
    pub nh3: SinkRef<f64>,
}

/// A temperature probe on the one-wire bus and where its value goes.
struct Probe {
    index: usize,
    config_prefix: &'static str,
    path: &'static str,
    metadata: fn() -> Metadata,
}

const PROBES: [Probe; 2] = [
    Probe {
        index: 0,
        config_prefix: "/exhaustTemperature",
        path: paths::EXHAUST_TEMPERATURE,
        metadata: exhaust_metadata,
    },
    Probe {
        index: 1,
        config_prefix: "/alternatorTemperature",
        path: paths::ALTERNATOR_TEMPERATURE,
        metadata: alternator_metadata,
    },
];

fn exhaust_metadata() -> Metadata {
    Metadata::new("K", "Exhaust Temperature")
        .with_description("Engine Exhaust Temperature")
        .with_short_name("Exhaust Temp")
}

fn alternator_metadata() -> Metadata {
    Metadata::new("K", "Alternator Temperature")
        .with_description("Engine Alternator Temperature")
        .with_short_name("Alternator Temp")
}

/// Brings up the drivers and wires every measurement.
///
/// # Errors
/// `StartupError::SensorNotDetected` if the SCD4x does not answer, or any
/// error from adding a node or scheduling a source.
pub fn build<S, B, G>(setup: &mut Setup<'_>, drivers: &Drivers<S, B, G>) -> Result<Outputs>
where
    S: Scd4x + 'static,
    B: OneWireBus + 'static,
    G: GasSensor + 'static,
{
    let interval = setup.config().sampling.interval();

    {
        let mut gas = drivers.gas.borrow_mut();
        if !gas.init() {
            warn!("MICS6814 did not acknowledge init; gas readings may be missing.");
        }
        gas.set_heater(true);
        gas.set_led(0, 8, 0);
    }

    let present = drivers.scd4x.borrow_mut().begin();
    setup.require("SCD4x", present)?;

    let scd = drivers.scd4x.clone();
    let co2 = setup.polling_source(interval, move || {
        scd.borrow_mut().measurement().map(|m| m.co2_ppm)
    })?;
    let co2 = setup.connect_to(
        co2,
        SkOutput::new(
            paths::CO2,
            Metadata::new("ppm", "Engine Room CO2 PPM").with_description("Engine C02"),
        )
        .with_config_path("/sensors/SCD4x/CO2"),
    )?;

    let devices = drivers.one_wire.borrow().device_count();
    if devices < PROBES.len() {
        warn!(
            found = devices,
            expected = PROBES.len(),
            "Missing one-wire temperature probes."
        );
    }
    let mut probes = Vec::with_capacity(PROBES.len());
    for probe in &PROBES {
        let bus = drivers.one_wire.clone();
        let index = probe.index;
        let source = setup.source(
            PollingSource::new(interval, move || {
                bus.borrow_mut().temperature_kelvin(index).map(f64::from)
            })
            .with_config_path(format!("{}/oneWire", probe.config_prefix)),
        )?;
        let sink = setup
            .wire(source)
            .connect_to(
                Linear::new(1.0, 0.0).with_config_path(format!("{}/linear", probe.config_prefix)),
            )?
            .connect_to(
                SkOutput::new(probe.path, (probe.metadata)())
                    .with_config_path(format!("{}/skPath", probe.config_prefix)),
            )?
            .handle();
        probes.push(sink);
    }

    let scd = drivers.scd4x.clone();
    let ambient = setup.polling_source(interval, move || {
        scd.borrow_mut()
            .measurement()
            .map(|m| f64::from(m.temperature_celsius))
    })?;
    let ambient = setup
        .wire(ambient)
        .connect_to(Linear::new(1.0, 273.15))?
        .connect_to(
            SkOutput::new(
                paths::AMBIENT_TEMPERATURE,
                Metadata::new("K", "Engine Room Ambient Temperature")
                    .with_description("EngineRoom Temp"),
            )
            .with_config_path("/sensors/SCD4x/Temperature"),
        )?
        .handle();

    let scd = drivers.scd4x.clone();
    let humidity = setup.polling_source(interval, move || {
        scd.borrow_mut()
            .measurement()
            .map(|m| f64::from(m.relative_humidity))
    })?;
    let humidity = setup
        .wire(humidity)
        .connect_to(Linear::new(0.01, 0.0))?
        .connect_to(
            SkOutput::new(
                paths::HUMIDITY,
                Metadata::new("%", "Engine Room Humidity (%RH)")
                    .with_description("EngineRoom Humidity"),
            )
            .with_config_path("/sensors/SCD4x/Humidity"),
        )?
        .handle();

    let no2 = gas_channel(
        setup,
        drivers,
        G::read_oxidising,
        paths::NO2,
        "/sensors/mics_6814/NO2",
        Metadata::new("Ohms", "Engine Room NO2").with_description("Engine NO2"),
    )?;
    let co = gas_channel(
        setup,
        drivers,
        G::read_reducing,
        paths::CO,
        "/sensors/mics_6814/CO",
        Metadata::new("Ohms", "Engine Room CO").with_description("Engine CO"),
    )?;
    let nh3 = gas_channel(
        setup,
        drivers,
        G::read_nh3,
        paths::NH3,
        "/sensors/mics_6814/NH3",
        Metadata::new("Ohms", "Engine Room NH3").with_description("Engine NH3"),
    )?;

    info!(
        nodes = setup.pipeline().len(),
        interval_ms = interval.as_millis() as u64,
        "Engine room pipeline wired."
    );

    Ok(Outputs {
        co2,
        exhaust_temperature: probes[0],
        alternator_temperature: probes[1],
        ambient_temperature: ambient,
        humidity,
        no2,
        co,
        nh3,
    })
}

fn gas_channel<S, B, G>(
    setup: &mut Setup<'_>,
    drivers: &Drivers<S, B, G>,
    read: fn(&mut G) -> Option<f32>,
    path: &str,
    config_path: &str,
    metadata: Metadata,
) -> Result<SinkRef<f64>>
where
    G: GasSensor + 'static,
{
    let interval = setup.config().sampling.interval();
    let gas = drivers.gas.clone();
    let source = setup.polling_source(interval, move || {
        read(&mut *gas.borrow_mut()).map(f64::from)
    })?;
    setup.connect_to(
        source,
        SkOutput::new(path, metadata).with_config_path(config_path),
    )
}
