//! Defines all configuration structures for the telemetry agent.
//!
//! These structs are deserialized with `serde` from a TOML file and
//! `TELEMETRY_`-prefixed environment variables. Network and provisioning
//! settings are carried as given; the pipeline's own behaviour is shaped by
//! the sampling defaults and the per-node overrides.

use crate::error::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// The top-level configuration for the `TelemetryApp`.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// The name the device announces itself with.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// How often the host main loop calls `tick`.
    #[serde(default = "default_resolution")]
    pub resolution: ClockResolution,

    /// The aggregation server, when not discovered automatically.
    #[serde(default)]
    pub server: Option<ServerConfig>,

    /// Wireless credentials, when hard-coded rather than provisioned.
    #[serde(default)]
    pub wifi: Option<WifiConfig>,

    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Overrides keyed by node config path, e.g. `"/exhaustTemperature/linear"`.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeConfig>,

    /// Switches for the simulated drivers used off-device.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// How the host binary prints deltas.
    #[serde(default)]
    pub console: ConsoleFormat,
}

/// Console rendering of delivered deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// One coloured `path = value units` line per delta.
    #[default]
    Pretty,
    /// One Signal K delta document per line.
    Json,
    /// Nothing; deltas are only logged at trace level.
    Quiet,
}

/// Defines the pace of the host's main loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockResolution {
    /// ~100 ticks per second.
    High,
    /// ~20 ticks per second.
    Medium,
    /// ~1 tick per second. Only suitable for coarse intervals.
    Low,
    /// A user-defined speed in ticks per second.
    Custom { ticks_per_second: u64 },
}

impl ClockResolution {
    /// Time between two main-loop iterations.
    pub fn tick_period(&self) -> Duration {
        let ticks_per_second = match self {
            ClockResolution::High => 100,
            ClockResolution::Medium => 20,
            ClockResolution::Low => 1,
            ClockResolution::Custom { ticks_per_second } => (*ticks_per_second).max(1),
        };
        Duration::from_nanos(1_000_000_000 / ticks_per_second)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

/// Sampling defaults for the engine-room measurements.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Per-node overrides. Each node reads only the fields that apply to it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeConfig {
    /// Output path, for sinks.
    pub sk_path: Option<String>,
    /// Linear calibration multiplier.
    pub multiplier: Option<f64>,
    /// Linear calibration offset.
    pub offset: Option<f64>,
    /// Polling interval, for sources.
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// When false, the simulated SCD4x does not answer its presence check.
    #[serde(default = "default_true")]
    pub scd4x_present: bool,
    /// Number of simulated one-wire temperature probes.
    #[serde(default = "default_one_wire_devices")]
    pub one_wire_devices: usize,
}

impl TelemetryConfig {
    /// Loads the configuration from an optional TOML file, then applies
    /// `TELEMETRY_` environment variables (`__` separates nested keys).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("TELEMETRY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Overrides for one node config path.
    pub fn node(&self, config_path: &str) -> Option<&NodeConfig> {
        find_node(&self.nodes, config_path)
    }

    /// Parses a TOML document directly.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(source, config::FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Looks up a node override, falling back to a case-insensitive match since
/// some configuration sources fold key case.
pub(crate) fn find_node<'a>(
    nodes: &'a BTreeMap<String, NodeConfig>,
    config_path: &str,
) -> Option<&'a NodeConfig> {
    nodes.get(config_path).or_else(|| {
        nodes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(config_path))
            .map(|(_, node)| node)
    })
}

// --- Default value functions for serde ---

fn default_hostname() -> String {
    "engine-room-monitor".to_string()
}

fn default_resolution() -> ClockResolution {
    ClockResolution::High
}

fn default_server_port() -> u16 {
    3000
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_one_wire_devices() -> usize {
    2
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            resolution: default_resolution(),
            server: None,
            wifi: None,
            sampling: SamplingConfig::default(),
            nodes: BTreeMap::new(),
            simulation: SimulationConfig::default(),
            console: ConsoleFormat::default(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            scd4x_present: default_true(),
            one_wire_devices: default_one_wire_devices(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;

    #[test]
    fn empty_document_uses_defaults() {
        let config = TelemetryConfig::from_toml("").unwrap();
        assert_eq!(config.hostname, "engine-room-monitor");
        assert_eq!(config.resolution, ClockResolution::High);
        assert_eq!(config.sampling.interval(), Duration::from_secs(1));
        assert!(config.simulation.scd4x_present);
        assert!(config.nodes.is_empty());
        assert_eq!(config.console, ConsoleFormat::Pretty);
    }

    #[test]
    fn file_values_are_overridden_by_environment() {
        let path = std::env::temp_dir().join(format!("engineroom-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            hostname = "Engine Room"

            [sampling]
            interval_ms = 2000

            [nodes."/exhaustTemperature/linear"]
            multiplier = 1.5
            "#,
        )
        .unwrap();
        std::env::set_var("TELEMETRY_SAMPLING__INTERVAL_MS", "250");
        std::env::set_var("TELEMETRY_CONSOLE", "json");

        let loaded = TelemetryConfig::load(Some(&path));
        std::env::remove_var("TELEMETRY_SAMPLING__INTERVAL_MS");
        std::env::remove_var("TELEMETRY_CONSOLE");
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap();
        assert_eq!(config.hostname, "Engine Room");
        assert_eq!(config.sampling.interval(), Duration::from_millis(250));
        assert_eq!(config.console, ConsoleFormat::Json);
        let linear = config.node("/exhaustTemperature/linear").unwrap();
        assert_eq!(linear.multiplier, Some(1.5));
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("engineroom-does-not-exist.toml");
        assert!(matches!(
            TelemetryConfig::load(Some(&path)),
            Err(TelemetryError::Config(_))
        ));
    }

    #[test]
    fn parses_node_overrides() {
        let config = TelemetryConfig::from_toml(
            r#"
            hostname = "SensESP Engine Room Monitor"

            [server]
            host = "10.10.1.1"

            [nodes."/exhaustTemperature/linear"]
            multiplier = 1.02
            offset = -0.5

            [nodes."/sensors/SCD4x/CO2"]
            sk_path = "environment.inside.engineroom.co2"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.as_ref().unwrap().port, 3000);
        let linear = config.node("/exhaustTemperature/linear").unwrap();
        assert_eq!(linear.multiplier, Some(1.02));
        assert_eq!(linear.offset, Some(-0.5));
        assert_eq!(
            config.node("/sensors/SCD4x/CO2").unwrap().sk_path.as_deref(),
            Some("environment.inside.engineroom.co2")
        );
    }

    #[test]
    fn parses_custom_resolution() {
        let config = TelemetryConfig::from_toml(
            r#"
            [resolution.custom]
            ticks_per_second = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.resolution.tick_period(), Duration::from_millis(20));
    }

    #[test]
    fn tick_periods() {
        assert_eq!(ClockResolution::High.tick_period(), Duration::from_millis(10));
        assert_eq!(ClockResolution::Low.tick_period(), Duration::from_secs(1));
        assert_eq!(
            ClockResolution::Custom { ticks_per_second: 0 }.tick_period(),
            Duration::from_secs(1)
        );
    }
}
