//! Scalar values carried through the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single immutable reading, type-erased so the arena can store any node.
///
/// Serialized untagged, so a delta carries a bare JSON scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Unsigned(u64),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    /// `false` only for NaN or infinite floats.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unsigned(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// A Rust scalar that can travel through the pipeline.
///
/// Typed node handles are parameterised by a `Sample`, which is what makes
/// wiring type-checked even though the arena itself stores `Value`s.
pub trait Sample: Copy + 'static {
    fn into_value(self) -> Value;

    /// Recovers the typed scalar. `None` if the variant or range does not fit.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! unsigned_sample {
    ($($ty:ty),*) => {$(
        impl Sample for $ty {
            fn into_value(self) -> Value {
                Value::Unsigned(u64::from(self))
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::Unsigned(v) => <$ty>::try_from(v).ok(),
                    _ => None,
                }
            }
        }
    )*};
}

macro_rules! signed_sample {
    ($($ty:ty),*) => {$(
        impl Sample for $ty {
            fn into_value(self) -> Value {
                Value::Integer(i64::from(self))
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::Integer(v) => <$ty>::try_from(v).ok(),
                    _ => None,
                }
            }
        }
    )*};
}

unsigned_sample!(u8, u16, u32, u64);
signed_sample!(i32, i64);

impl Sample for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }
}

impl Sample for f32 {
    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(v as f32),
            _ => None,
        }
    }
}

impl Sample for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }
}
