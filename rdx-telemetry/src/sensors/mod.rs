//! Interfaces to the sensor drivers the agent samples.
//!
//! The drivers themselves (register protocols, bus timing) live outside
//! this crate. All the pipeline needs is "read a value", so each trait is
//! the smallest surface the engine-room wiring consumes. Readings that
//! cannot be taken come back as `None` rather than as sentinel numbers.

pub mod sim;

use std::cell::RefCell;
use std::rc::Rc;

/// A driver shared between the read functions of several sources.
///
/// The scheduler is single-threaded, so a bus is never accessed by two
/// sources at once and a `RefCell` is all the serialization it needs.
pub type Shared<D> = Rc<RefCell<D>>;

pub fn shared<D>(driver: D) -> Shared<D> {
    Rc::new(RefCell::new(driver))
}

/// One reading of an SCD4x CO2/temperature/humidity sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scd4xMeasurement {
    pub co2_ppm: u16,
    pub temperature_celsius: f32,
    pub relative_humidity: f32,
}

/// An I2C CO2 sensor in the SCD4x family.
pub trait Scd4x {
    /// Probes the sensor and starts periodic measurement.
    /// Returns `false` if nothing answers on the bus.
    fn begin(&mut self) -> bool;

    /// The latest measurement, refreshing it first if the sensor has new
    /// data ready. `None` until the first measurement completes.
    fn measurement(&mut self) -> Option<Scd4xMeasurement>;
}

/// A one-wire bus of temperature probes.
pub trait OneWireBus {
    fn device_count(&self) -> usize;

    /// Temperature of the probe at `index`, in Kelvin.
    fn temperature_kelvin(&mut self, index: usize) -> Option<f32>;
}

/// A MICS6814-style three-channel gas sensor breakout.
///
/// Channel readings are sensing-element resistances in Ohms.
pub trait GasSensor {
    fn init(&mut self) -> bool;
    fn set_heater(&mut self, on: bool);
    fn set_led(&mut self, red: u8, green: u8, blue: u8);
    fn read_oxidising(&mut self) -> Option<f32>;
    fn read_reducing(&mut self) -> Option<f32>;
    fn read_nh3(&mut self) -> Option<f32>;
}
