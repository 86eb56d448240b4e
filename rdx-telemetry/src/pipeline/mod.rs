//! The sampling pipeline: a graph of sources, transforms and sinks.
//!
//! Values flow strictly downstream:
//!
//! ```text
//! [PollingSource] ──► [Transform]* ──► [OutputSink] ──► Transport
//! ```
//!
//! All nodes live in one arena owned by the `Pipeline`. Handles returned when
//! nodes are added are typed by the values they carry, and `connect_to`
//! only accepts producer/consumer pairs that agree. The graph is built once
//! during startup and never changes afterwards.

pub mod node;
pub mod transform;
pub mod value;

pub use node::{
    Acceptor, Attach, Emitter, NodeHandle, PollingSource, SinkRef, SourceRef, TransformRef,
};
pub use transform::{LambdaTransform, Linear, MovingAverage, Transform};
pub use value::{Sample, Value};

use crate::common::NodeId;
use crate::config::{find_node, NodeConfig};
use crate::error::{Result, TelemetryError};
use crate::output::{OutputSink, SkOutput, Transport};
use node::{erase_read, erase_transform, Node, NodeKind, SourceNode, TransformNode};
use slotmap::SlotMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, trace};

/// The node arena plus the transport every sink delivers to.
pub struct Pipeline {
    nodes: SlotMap<NodeId, Node>,
    transport: Box<dyn Transport>,
    overrides: BTreeMap<String, NodeConfig>,
}

impl Pipeline {
    /// Creates an empty pipeline delivering to `transport`.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            transport: Box::new(transport),
            overrides: BTreeMap::new(),
        }
    }

    /// Sets the per-node overrides applied to nodes added from now on.
    pub fn with_overrides(mut self, overrides: BTreeMap<String, NodeConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    fn override_for(&self, config_path: Option<&str>) -> Option<&NodeConfig> {
        config_path.and_then(|path| find_node(&self.overrides, path))
    }

    /// Adds a polling source. The caller is responsible for scheduling it;
    /// see `Setup::source`.
    ///
    /// An `interval_ms` override for the source's config path replaces its
    /// interval.
    pub fn add_source<T: Sample>(&mut self, source: PollingSource<T>) -> SourceRef<T> {
        let PollingSource {
            mut interval,
            read,
            config_path,
        } = source;
        if let Some(ms) = self
            .override_for(config_path.as_deref())
            .and_then(|config| config.interval_ms)
        {
            interval = Duration::from_millis(ms);
        }
        let id = self.nodes.insert(Node {
            name: "polling_source",
            config_path,
            kind: NodeKind::Source(SourceNode {
                interval,
                read: erase_read(read),
            }),
            subscribers: Vec::new(),
        });
        trace!(?id, "Source added.");
        SourceRef::new(id)
    }

    /// Adds a transform node, applying any config overrides first.
    pub fn add_transform<T, X>(&mut self, mut transform: X) -> TransformRef<T, X::Output>
    where
        T: Sample,
        X: Transform<T> + 'static,
    {
        if let Some(config) = self.override_for(transform.config_path()) {
            transform.configure(config);
        }
        let name = transform.name();
        let config_path = transform.config_path().map(str::to_owned);
        let id = self.nodes.insert(Node {
            name,
            config_path,
            kind: NodeKind::Transform(TransformNode {
                apply: erase_transform(transform),
            }),
            subscribers: Vec::new(),
        });
        trace!(?id, name, "Transform added.");
        TransformRef::new(id)
    }

    /// Adds an output sink, applying any `sk_path` override first.
    pub fn add_output<T: Sample>(&mut self, output: SkOutput<T>) -> SinkRef<T> {
        let mut sink = output.into_sink();
        if let Some(path) = self
            .override_for(sink.config_path())
            .and_then(|config| config.sk_path.clone())
        {
            sink.set_path(path);
        }
        let config_path = sink.config_path().map(str::to_owned);
        let id = self.nodes.insert(Node {
            name: "sk_output",
            config_path,
            kind: NodeKind::Sink(sink),
            subscribers: Vec::new(),
        });
        trace!(?id, "Output added.");
        SinkRef::new(id)
    }

    /// Wires `from` to `to`, adding `to` to the arena if it is a builder.
    ///
    /// Returns the downstream handle.
    ///
    /// # Errors
    /// `UnknownNode` if either handle is stale, `Cycle` if the edge would
    /// make a value flow back upstream.
    pub fn connect_to<E, N>(&mut self, from: E, to: N) -> Result<N::Handle>
    where
        E: Emitter,
        N: Attach<E::Output>,
    {
        self.ensure(from.id())?;
        let handle = to.attach(self)?;
        self.link(from.id(), handle.id())?;
        Ok(handle)
    }

    /// Starts a fluent chain at `from`:
    ///
    /// ```rust,ignore
    /// pipeline
    ///     .wire(source)
    ///     .connect_to(Linear::new(1.0, 273.15))?
    ///     .connect_to(SkOutput::new("environment.inside.temperature", metadata))?;
    /// ```
    pub fn wire<E: Emitter>(&mut self, from: E) -> Wiring<'_, E> {
        Wiring {
            pipeline: self,
            head: from,
        }
    }

    pub(crate) fn ensure(&self, id: NodeId) -> Result<()> {
        if self.nodes.contains_key(id) {
            Ok(())
        } else {
            Err(TelemetryError::UnknownNode(id))
        }
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if from == to || self.reaches(to, from) {
            return Err(TelemetryError::Cycle { from, to });
        }
        let producer = self
            .nodes
            .get_mut(from)
            .ok_or(TelemetryError::UnknownNode(from))?;
        if !producer.subscribers.contains(&to) {
            producer.subscribers.push(to);
        }
        debug!(?from, ?to, "Nodes connected.");
        Ok(())
    }

    /// Whether `target` is downstream of `start`.
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.subscribers.iter().copied());
            }
        }
        false
    }

    /// Runs one firing of a source: reads it and pushes the value downstream.
    ///
    /// Returns the number of sink deliveries the firing produced.
    pub fn fire_source(&mut self, id: NodeId) -> usize {
        let reading = match self.nodes.get_mut(id).map(|node| &mut node.kind) {
            Some(NodeKind::Source(source)) => (source.read)(),
            Some(other) => {
                error!(?id, kind = other.label(), "Only sources can be fired.");
                return 0;
            }
            None => {
                error!(?id, "Fired a source that is not in the arena.");
                return 0;
            }
        };
        match reading {
            Some(value) => {
                trace!(?id, %value, "Source read.");
                self.emit(id, value)
            }
            None => {
                trace!(?id, "Source produced no sample.");
                0
            }
        }
    }

    /// Forwards `value` to every subscriber of `from`, depth first.
    fn emit(&mut self, from: NodeId, value: Value) -> usize {
        let mut delivered = 0;
        let mut index = 0;
        while let Some(to) = self
            .nodes
            .get(from)
            .and_then(|node| node.subscribers.get(index))
            .copied()
        {
            delivered += self.accept(to, value);
            index += 1;
        }
        delivered
    }

    fn accept(&mut self, id: NodeId, value: Value) -> usize {
        let Some(node) = self.nodes.get_mut(id) else {
            return 0;
        };
        let forwarded = match &mut node.kind {
            NodeKind::Transform(transform) => (transform.apply)(value),
            NodeKind::Sink(sink) => {
                return usize::from(sink.accept(value, self.transport.as_mut()));
            }
            NodeKind::Source(_) => {
                error!(?id, "A source was wired as a consumer; value dropped.");
                return 0;
            }
        };
        match forwarded {
            Some(output) => self.emit(id, output),
            None => {
                trace!(?id, name = node_name(&self.nodes, id), "Transform dropped sample.");
                0
            }
        }
    }

    /// The polling interval of a source node.
    pub fn source_interval(&self, id: NodeId) -> Option<Duration> {
        match self.nodes.get(id).map(|node| &node.kind) {
            Some(NodeKind::Source(source)) => Some(source.interval),
            _ => None,
        }
    }

    /// The sink behind a handle, for inspecting its path, metadata and counters.
    pub fn output<T>(&self, handle: SinkRef<T>) -> Option<&OutputSink> {
        match self.nodes.get(handle.id()).map(|node| &node.kind) {
            Some(NodeKind::Sink(sink)) => Some(sink),
            _ => None,
        }
    }

    /// Every sink in the arena.
    pub fn outputs(&self) -> impl Iterator<Item = &OutputSink> {
        self.nodes.values().filter_map(|node| match &node.kind {
            NodeKind::Sink(sink) => Some(sink),
            _ => None,
        })
    }

    /// Downstream subscribers of a node.
    pub fn subscribers(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|node| node.subscribers.as_slice())
            .unwrap_or_default()
    }

    /// The config path a node was created with, if any.
    pub fn config_path(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id).and_then(|node| node.config_path.as_deref())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drops every node. Only used when the application halts during startup.
    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
    }
}

fn node_name(nodes: &SlotMap<NodeId, Node>, id: NodeId) -> &'static str {
    nodes.get(id).map_or("unknown", |node| node.name)
}

/// A chain under construction, returned by `Pipeline::wire`.
pub struct Wiring<'p, H> {
    pipeline: &'p mut Pipeline,
    head: H,
}

impl<'p, H: Emitter> Wiring<'p, H> {
    /// Connects the head of the chain to `next` and makes `next` the new head.
    pub fn connect_to<N>(self, next: N) -> Result<Wiring<'p, N::Handle>>
    where
        N: Attach<H::Output>,
    {
        let head = self.pipeline.connect_to(self.head, next)?;
        Ok(Wiring {
            pipeline: self.pipeline,
            head,
        })
    }
}

impl<'p, H> Wiring<'p, H> {
    /// The handle at the end of the chain.
    pub fn handle(&self) -> H
    where
        H: Copy,
    {
        self.head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Metadata, MemoryTransport};

    fn pipeline() -> (Pipeline, MemoryTransport) {
        let transport = MemoryTransport::new();
        (Pipeline::new(transport.clone()), transport)
    }

    fn metadata() -> Metadata {
        Metadata::new("K", "Exhaust Temperature")
    }

    #[test]
    fn value_flows_through_chain() {
        let (mut pipeline, transport) = pipeline();
        let source = pipeline.add_source(PollingSource::repeat(Duration::from_secs(1), || 21.5));
        pipeline
            .wire(source)
            .connect_to(Linear::new(1.0, 273.15))
            .unwrap()
            .connect_to(SkOutput::new("environment.temperature", metadata()))
            .unwrap();

        assert_eq!(pipeline.fire_source(source.id()), 1);
        let deliveries = transport.deliveries();
        assert_eq!(deliveries.len(), 1);
        match deliveries[0].value {
            Value::Float(kelvin) => assert!((kelvin - 294.65).abs() < 1e-9),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn absent_reading_stops_propagation() {
        let (mut pipeline, transport) = pipeline();
        let source = pipeline.add_source(PollingSource::<u16>::new(Duration::from_secs(1), || None));
        pipeline
            .connect_to(source, SkOutput::new("environment.co2", Metadata::new("ppm", "CO2")))
            .unwrap();

        assert_eq!(pipeline.fire_source(source.id()), 0);
        assert!(transport.is_empty());
    }

    #[test]
    fn fan_out_reaches_every_subscriber() {
        let (mut pipeline, transport) = pipeline();
        let source = pipeline.add_source(PollingSource::repeat(Duration::from_secs(1), || 7u32));
        pipeline
            .connect_to(source, SkOutput::new("a", Metadata::default()))
            .unwrap();
        pipeline
            .connect_to(source, SkOutput::new("b", Metadata::default()))
            .unwrap();

        assert_eq!(pipeline.subscribers(source.id()).len(), 2);
        assert_eq!(pipeline.fire_source(source.id()), 2);
        let paths: Vec<_> = transport.deliveries().into_iter().map(|d| d.path).collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn cycles_are_refused() {
        let (mut pipeline, _) = pipeline();
        let first = pipeline.add_transform(Linear::new(1.0, 0.0));
        let second = pipeline.connect_to(first, Linear::new(1.0, 0.0)).unwrap();
        let err = pipeline.connect_to(second, first).unwrap_err();
        assert!(matches!(err, TelemetryError::Cycle { .. }));
    }

    #[test]
    fn overrides_apply_by_config_path() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "/probe/linear".to_string(),
            NodeConfig {
                offset: Some(273.15),
                ..Default::default()
            },
        );
        overrides.insert(
            "/probe/sk".to_string(),
            NodeConfig {
                sk_path: Some("environment.renamed".to_string()),
                ..Default::default()
            },
        );
        overrides.insert(
            "/probe/source".to_string(),
            NodeConfig {
                interval_ms: Some(250),
                ..Default::default()
            },
        );
        let transport = MemoryTransport::new();
        let mut pipeline = Pipeline::new(transport.clone()).with_overrides(overrides);

        let source = pipeline.add_source(
            PollingSource::repeat(Duration::from_secs(1), || 0.0).with_config_path("/probe/source"),
        );
        let sink = pipeline
            .wire(source)
            .connect_to(Linear::new(1.0, 0.0).with_config_path("/probe/linear"))
            .unwrap()
            .connect_to(
                SkOutput::new("environment.original", metadata()).with_config_path("/probe/sk"),
            )
            .unwrap()
            .handle();

        assert_eq!(
            pipeline.source_interval(source.id()),
            Some(Duration::from_millis(250))
        );
        assert_eq!(pipeline.output(sink).unwrap().path(), "environment.renamed");
        pipeline.fire_source(source.id());
        assert_eq!(transport.deliveries()[0].value, Value::Float(273.15));
    }

    #[test]
    fn firing_a_non_source_is_a_no_op() {
        let (mut pipeline, transport) = pipeline();
        let sink = pipeline.add_output(SkOutput::<f64>::new("x", Metadata::default()));
        assert_eq!(pipeline.fire_source(sink.id()), 0);
        assert!(transport.is_empty());
    }
}
