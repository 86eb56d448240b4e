//! Output sinks, their metadata, and the transports they deliver to.
//!
//! A sink is the terminal node of a chain. On every value it builds a
//! `Delta` (path, value and, the first time only, its metadata) and hands it
//! to the pipeline's `Transport`. Delivery is fire-and-forget: transports
//! never block the tick and never report failure back to the pipeline.

use crate::error::Result;
use crate::pipeline::value::{Sample, Value};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cell::RefCell;
use std::io::Write;
use std::marker::PhantomData;
use std::rc::Rc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Static description of one output path, in Signal K `meta` form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub units: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub short_name: String,
}

impl Metadata {
    pub fn new(units: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            units: units.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = short_name.into();
        self
    }
}

/// One value on its way out, as handed to a `Transport`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delta {
    pub path: String,
    pub value: Value,
    /// Present on the first delivery for a path only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Metadata>,
}

impl Delta {
    /// Renders the delta as a Signal K delta document.
    pub fn to_signalk(&self, source: &str, timestamp: DateTime<Utc>) -> serde_json::Value {
        let mut update = json!({
            "$source": source,
            "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "values": [{ "path": self.path, "value": self.value }],
        });
        if let Some(meta) = &self.meta {
            update["meta"] = json!([{ "path": self.path, "value": meta }]);
        }
        json!({ "updates": [update] })
    }
}

/// The builder for a Signal K output, typed by the value it accepts.
///
/// Added to a pipeline with `Pipeline::add_output` or as the last step of a
/// `connect_to` chain.
#[derive(Debug, Clone)]
pub struct SkOutput<T> {
    path: String,
    metadata: Metadata,
    config_path: Option<String>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Sample> SkOutput<T> {
    pub fn new(path: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            path: path.into(),
            metadata,
            config_path: None,
            _marker: PhantomData,
        }
    }

    pub fn with_config_path(mut self, config_path: impl Into<String>) -> Self {
        self.config_path = Some(config_path.into());
        self
    }

    pub(crate) fn into_sink(self) -> OutputSink {
        OutputSink {
            path: self.path,
            metadata: self.metadata,
            config_path: self.config_path,
            meta_sent: false,
            delivered: 0,
        }
    }
}

/// A sink as it lives in the pipeline arena.
///
/// The metadata is fixed at construction; value flow never touches it.
#[derive(Debug, Clone)]
pub struct OutputSink {
    path: String,
    metadata: Metadata,
    config_path: Option<String>,
    meta_sent: bool,
    delivered: u64,
}

impl OutputSink {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    /// How many values this sink has handed to the transport.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    /// Hands `value` to the transport. Returns `false` if it was dropped.
    pub(crate) fn accept(&mut self, value: Value, transport: &mut dyn Transport) -> bool {
        if !value.is_finite() {
            warn!(path = %self.path, %value, "Non-finite value dropped before delivery.");
            return false;
        }
        let meta = if self.meta_sent {
            None
        } else {
            self.meta_sent = true;
            Some(self.metadata.clone())
        };
        self.delivered += 1;
        trace!(path = %self.path, %value, "Delivering.");
        transport.deliver(Delta {
            path: self.path.clone(),
            value,
            meta,
        });
        true
    }
}

/// The external delivery subsystem, seen from the pipeline.
pub trait Transport {
    /// Hands one delta over. Must not block.
    fn deliver(&mut self, delta: Delta);
}

/// Keeps every delta in memory. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    record: Rc<RefCell<Vec<Delta>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delta> {
        self.record.borrow().clone()
    }

    /// Values delivered for one path, oldest first.
    pub fn values_for(&self, path: &str) -> Vec<Value> {
        self.record
            .borrow()
            .iter()
            .filter(|delta| delta.path == path)
            .map(|delta| delta.value)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.record.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.borrow().is_empty()
    }
}

impl Transport for MemoryTransport {
    fn deliver(&mut self, delta: Delta) {
        self.record.borrow_mut().push(delta);
    }
}

/// A delta stamped with the time it left the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delta: Delta,
    pub timestamp: DateTime<Utc>,
}

/// Publishes deltas on a tokio broadcast channel.
///
/// Slow subscribers lag and lose old deltas; the pipeline never waits.
#[derive(Debug, Clone)]
pub struct BroadcastTransport {
    sender: broadcast::Sender<Delivery>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.sender.subscribe()
    }
}

impl Transport for BroadcastTransport {
    fn deliver(&mut self, delta: Delta) {
        let delivery = Delivery {
            delta,
            timestamp: Utc::now(),
        };
        if self.sender.send(delivery).is_err() {
            trace!("No delta subscribers; delivery discarded.");
        }
    }
}

/// Writes one Signal K delta document per line.
pub struct JsonLinesTransport<W: Write> {
    writer: W,
    source: String,
}

impl<W: Write> JsonLinesTransport<W> {
    pub fn new(writer: W, source: impl Into<String>) -> Self {
        Self {
            writer,
            source: source.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, delta: &Delta) -> Result<()> {
        let document = delta.to_signalk(&self.source, Utc::now());
        serde_json::to_writer(&mut self.writer, &document)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write> Transport for JsonLinesTransport<W> {
    fn deliver(&mut self, delta: Delta) {
        if let Err(e) = self.write_line(&delta) {
            warn!(path = %delta.path, error = %e, "Failed to write delta.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn co2_sink() -> OutputSink {
        SkOutput::<u16>::new(
            "environment.inside.engineroom.CO2_level",
            Metadata::new("ppm", "Engine Room CO2 PPM").with_description("Engine C02"),
        )
        .with_config_path("/sensors/SCD4x/CO2")
        .into_sink()
    }

    #[test]
    fn metadata_goes_out_once_per_sink() {
        let mut sink = co2_sink();
        let mut transport = MemoryTransport::new();
        for ppm in [400u16, 410, 420] {
            sink.accept(ppm.into_value(), &mut transport);
        }

        let deliveries = transport.deliveries();
        assert_eq!(deliveries.len(), 3);
        assert_eq!(deliveries[0].meta.as_ref(), Some(sink.metadata()));
        assert!(deliveries[1..].iter().all(|d| d.meta.is_none()));
        assert_eq!(sink.delivered(), 3);
    }

    #[test]
    fn metadata_is_not_touched_by_values() {
        let mut sink = co2_sink();
        let before = sink.metadata().clone();
        sink.accept(Value::Unsigned(1), &mut MemoryTransport::new());
        assert_eq!(sink.metadata(), &before);
        assert_eq!(sink.config_path(), Some("/sensors/SCD4x/CO2"));
    }

    #[test]
    fn non_finite_floats_never_reach_the_transport() {
        let mut sink = SkOutput::<f64>::new("propulsion.engine.NO2", Metadata::new("Ohm", "NO2"))
            .into_sink();
        let mut transport = MemoryTransport::new();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(!sink.accept(bad.into_value(), &mut transport));
        }
        assert!(transport.is_empty());
        assert_eq!(sink.delivered(), 0);

        // Metadata is still owed to the first real value.
        assert!(sink.accept(12.5f64.into_value(), &mut transport));
        let deliveries = transport.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].meta.is_some());
    }

    #[test]
    fn signalk_delta_shape() {
        let delta = Delta {
            path: "environment.inside.engineroom.humidity".into(),
            value: Value::Float(0.45),
            meta: Some(Metadata::new("%", "Engine Room Humidity (%RH)").with_short_name("Humidity")),
        };
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let doc = delta.to_signalk("engineroom", at);

        let update = &doc["updates"][0];
        assert_eq!(update["$source"], "engineroom");
        assert_eq!(update["timestamp"], "2024-06-01T12:00:00.000Z");
        assert_eq!(update["values"][0]["value"], 0.45);
        assert_eq!(update["meta"][0]["value"]["displayName"], "Engine Room Humidity (%RH)");
        assert_eq!(update["meta"][0]["value"]["shortName"], "Humidity");
        assert!(update["meta"][0]["value"].get("description").is_none());
    }

    #[test]
    fn json_lines_writes_one_document_per_delta() {
        let mut transport = JsonLinesTransport::new(Vec::new(), "test");
        transport.deliver(Delta {
            path: "a".into(),
            value: Value::Unsigned(1),
            meta: None,
        });
        transport.deliver(Delta {
            path: "b".into(),
            value: Value::Unsigned(2),
            meta: None,
        });
        let out = String::from_utf8(transport.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["updates"][0]["values"][0]["path"], "b");
    }

    #[test]
    fn broadcast_delivers_to_subscribers() {
        let mut transport = BroadcastTransport::new(8);
        let mut rx = transport.subscribe();
        transport.deliver(Delta {
            path: "a".into(),
            value: Value::Bool(true),
            meta: None,
        });
        let delivery = rx.try_recv().unwrap();
        assert_eq!(delivery.delta.value, Value::Bool(true));
    }

    #[test]
    fn broadcast_without_subscribers_does_not_fail() {
        let mut transport = BroadcastTransport::new(1);
        transport.deliver(Delta {
            path: "a".into(),
            value: Value::Unsigned(0),
            meta: None,
        });
    }
}
