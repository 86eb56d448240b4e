//! Deterministic stand-ins for the sensor drivers.
//!
//! Used to run the agent off-device and to exercise the wiring in tests.
//! Every reading follows a fixed saw-tooth so runs are reproducible.

use crate::sensors::{GasSensor, OneWireBus, Scd4x, Scd4xMeasurement};

#[derive(Debug, Clone)]
pub struct SimulatedScd4x {
    present: bool,
    started: bool,
    step: u16,
}

impl SimulatedScd4x {
    pub fn new(present: bool) -> Self {
        Self {
            present,
            started: false,
            step: 0,
        }
    }
}

impl Scd4x for SimulatedScd4x {
    fn begin(&mut self) -> bool {
        self.started = self.present;
        self.started
    }

    fn measurement(&mut self) -> Option<Scd4xMeasurement> {
        if !self.started {
            return None;
        }
        let phase = self.step % 20;
        self.step = self.step.wrapping_add(1);
        Some(Scd4xMeasurement {
            co2_ppm: 400 + phase * 5,
            temperature_celsius: 24.0 + f32::from(phase) * 0.1,
            relative_humidity: 45.0 + f32::from(phase) * 0.5,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedOneWire {
    base_kelvin: Vec<f32>,
    step: u32,
}

impl SimulatedOneWire {
    /// `devices` probes, the first one hottest (an exhaust manifold).
    pub fn new(devices: usize) -> Self {
        let base_kelvin = (0..devices)
            .map(|index| 420.0 - 60.0 * index as f32)
            .collect();
        Self {
            base_kelvin,
            step: 0,
        }
    }
}

impl OneWireBus for SimulatedOneWire {
    fn device_count(&self) -> usize {
        self.base_kelvin.len()
    }

    fn temperature_kelvin(&mut self, index: usize) -> Option<f32> {
        let base = *self.base_kelvin.get(index)?;
        self.step = self.step.wrapping_add(1);
        Some(base + (self.step % 10) as f32 * 0.25)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedMics6814 {
    initialized: bool,
    heater: bool,
    led: (u8, u8, u8),
    step: u32,
}

impl SimulatedMics6814 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn led(&self) -> (u8, u8, u8) {
        self.led
    }

    pub fn heater_on(&self) -> bool {
        self.heater
    }

    /// Readings are only meaningful once the sensing elements are heated.
    fn read(&mut self, base_ohms: f32) -> Option<f32> {
        if !(self.initialized && self.heater) {
            return None;
        }
        self.step = self.step.wrapping_add(1);
        Some(base_ohms + (self.step % 8) as f32 * 100.0)
    }
}

impl GasSensor for SimulatedMics6814 {
    fn init(&mut self) -> bool {
        self.initialized = true;
        true
    }

    fn set_heater(&mut self, on: bool) {
        self.heater = on;
    }

    fn set_led(&mut self, red: u8, green: u8, blue: u8) {
        self.led = (red, green, blue);
    }

    fn read_oxidising(&mut self) -> Option<f32> {
        self.read(20_000.0)
    }

    fn read_reducing(&mut self) -> Option<f32> {
        self.read(350_000.0)
    }

    fn read_nh3(&mut self) -> Option<f32> {
        self.read(600_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_scd4x_never_measures() {
        let mut scd = SimulatedScd4x::new(false);
        assert!(!scd.begin());
        assert_eq!(scd.measurement(), None);
    }

    #[test]
    fn scd4x_measures_after_begin() {
        let mut scd = SimulatedScd4x::new(true);
        assert_eq!(scd.measurement(), None);
        assert!(scd.begin());
        let first = scd.measurement().unwrap();
        assert_eq!(first.co2_ppm, 400);
        assert_eq!(scd.measurement().unwrap().co2_ppm, 405);
    }

    #[test]
    fn one_wire_reports_missing_probes() {
        let mut bus = SimulatedOneWire::new(1);
        assert_eq!(bus.device_count(), 1);
        assert!(bus.temperature_kelvin(0).is_some());
        assert_eq!(bus.temperature_kelvin(1), None);
    }

    #[test]
    fn gas_sensor_needs_heater() {
        let mut gas = SimulatedMics6814::new();
        gas.init();
        assert_eq!(gas.read_nh3(), None);
        gas.set_heater(true);
        assert!(gas.read_nh3().is_some());
    }
}
