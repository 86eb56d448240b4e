//! Node storage and the typed handles used to wire the graph.
//!
//! Two layers:
//! - **Arena storage** (`Node`, `NodeKind`): type-erased, holds `Value`s, one
//!   tagged variant per node kind.
//! - **Typed handles** (`SourceRef`, `TransformRef`, `SinkRef`): carry the
//!   value type as a phantom, so `connect_to` only compiles when producer and
//!   consumer agree on it.

use crate::common::NodeId;
use crate::error::Result;
use crate::output::{OutputSink, SkOutput};
use crate::pipeline::transform::{LambdaTransform, Linear, MovingAverage, Transform};
use crate::pipeline::value::{Sample, Value};
use crate::pipeline::Pipeline;
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// A read function, as stored in the arena.
pub(crate) type ReadFn = Box<dyn FnMut() -> Option<Value>>;

/// A transform, as stored in the arena.
pub(crate) type ApplyFn = Box<dyn FnMut(Value) -> Option<Value>>;

pub(crate) struct SourceNode {
    pub interval: Duration,
    pub read: ReadFn,
}

pub(crate) struct TransformNode {
    pub apply: ApplyFn,
}

pub(crate) enum NodeKind {
    Source(SourceNode),
    Transform(TransformNode),
    Sink(OutputSink),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "source",
            NodeKind::Transform(_) => "transform",
            NodeKind::Sink(_) => "sink",
        }
    }
}

/// One element of the graph. Owns its subscriber list, never its producer.
pub(crate) struct Node {
    pub name: &'static str,
    pub config_path: Option<String>,
    pub kind: NodeKind,
    pub subscribers: Vec<NodeId>,
}

/// A polling sensor: a read function run on a fixed interval.
///
/// Returning `None` from the read function means "no sample this time"; the
/// firing is skipped and nothing downstream runs.
pub struct PollingSource<T> {
    pub(crate) interval: Duration,
    pub(crate) read: Box<dyn FnMut() -> Option<T>>,
    pub(crate) config_path: Option<String>,
}

impl<T: Sample> PollingSource<T> {
    pub fn new(interval: Duration, read: impl FnMut() -> Option<T> + 'static) -> Self {
        Self {
            interval,
            read: Box::new(read),
            config_path: None,
        }
    }

    /// A source whose read function always produces a value.
    pub fn repeat(interval: Duration, mut read: impl FnMut() -> T + 'static) -> Self {
        Self::new(interval, move || Some(read()))
    }

    pub fn with_config_path(mut self, config_path: impl Into<String>) -> Self {
        self.config_path = Some(config_path.into());
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl<T> fmt::Debug for PollingSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingSource")
            .field("interval", &self.interval)
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

/// Anything that names a node in the arena.
pub trait NodeHandle: Copy {
    fn id(&self) -> NodeId;
}

/// A node that forwards values of type `Output` to its subscribers.
pub trait Emitter: NodeHandle {
    type Output: Sample;
}

/// A node that accepts values of type `T`.
pub trait Acceptor<T: Sample>: NodeHandle {}

/// Something that can be placed downstream of an emitter of `T`.
///
/// Implemented for node builders (which are added to the arena when
/// attached) and for handles of nodes already in the arena.
pub trait Attach<T: Sample> {
    type Handle: Acceptor<T>;

    fn attach(self, pipeline: &mut Pipeline) -> Result<Self::Handle>;
}

macro_rules! typed_handle {
    ($(#[$doc:meta])* $name:ident<$($param:ident),+>) => {
        $(#[$doc])*
        pub struct $name<$($param),+> {
            id: NodeId,
            _marker: PhantomData<fn($($param),+)>,
        }

        impl<$($param),+> $name<$($param),+> {
            pub(crate) fn new(id: NodeId) -> Self {
                Self { id, _marker: PhantomData }
            }
        }

        impl<$($param),+> Clone for $name<$($param),+> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<$($param),+> Copy for $name<$($param),+> {}

        impl<$($param),+> PartialEq for $name<$($param),+> {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl<$($param),+> Eq for $name<$($param),+> {}

        impl<$($param),+> fmt::Debug for $name<$($param),+> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.id)
            }
        }

        impl<$($param),+> NodeHandle for $name<$($param),+> {
            fn id(&self) -> NodeId {
                self.id
            }
        }
    };
}

typed_handle! {
    /// Handle to a polling source emitting `T`.
    SourceRef<T>
}

typed_handle! {
    /// Handle to a transform accepting `T` and emitting `U`.
    TransformRef<T, U>
}

typed_handle! {
    /// Handle to an output sink accepting `T`.
    SinkRef<T>
}

impl<T: Sample> Emitter for SourceRef<T> {
    type Output = T;
}

impl<T: Sample, U: Sample> Emitter for TransformRef<T, U> {
    type Output = U;
}

impl<T: Sample, U: Sample> Acceptor<T> for TransformRef<T, U> {}

impl<T: Sample> Acceptor<T> for SinkRef<T> {}

impl<T: Sample, U: Sample> Attach<T> for TransformRef<T, U> {
    type Handle = Self;

    fn attach(self, pipeline: &mut Pipeline) -> Result<Self> {
        pipeline.ensure(self.id)?;
        Ok(self)
    }
}

impl<T: Sample> Attach<T> for SinkRef<T> {
    type Handle = Self;

    fn attach(self, pipeline: &mut Pipeline) -> Result<Self> {
        pipeline.ensure(self.id)?;
        Ok(self)
    }
}

impl Attach<f64> for Linear {
    type Handle = TransformRef<f64, f64>;

    fn attach(self, pipeline: &mut Pipeline) -> Result<Self::Handle> {
        Ok(pipeline.add_transform(self))
    }
}

impl Attach<f64> for MovingAverage {
    type Handle = TransformRef<f64, f64>;

    fn attach(self, pipeline: &mut Pipeline) -> Result<Self::Handle> {
        Ok(pipeline.add_transform(self))
    }
}

impl<F, T, U> Attach<T> for LambdaTransform<F, T, U>
where
    F: FnMut(T) -> Option<U> + 'static,
    T: Sample,
    U: Sample,
{
    type Handle = TransformRef<T, U>;

    fn attach(self, pipeline: &mut Pipeline) -> Result<Self::Handle> {
        Ok(pipeline.add_transform(self))
    }
}

impl<T: Sample> Attach<T> for SkOutput<T> {
    type Handle = SinkRef<T>;

    fn attach(self, pipeline: &mut Pipeline) -> Result<Self::Handle> {
        Ok(pipeline.add_output(self))
    }
}

/// Erases a typed transform into the arena's `ApplyFn`.
pub(crate) fn erase_transform<T, X>(mut transform: X) -> ApplyFn
where
    T: Sample,
    X: Transform<T> + 'static,
{
    Box::new(move |value: Value| {
        let input = T::from_value(value)?;
        transform.apply(input).map(Sample::into_value)
    })
}

/// Erases a typed read function into the arena's `ReadFn`.
pub(crate) fn erase_read<T: Sample>(mut read: Box<dyn FnMut() -> Option<T>>) -> ReadFn {
    Box::new(move || read().map(Sample::into_value))
}
