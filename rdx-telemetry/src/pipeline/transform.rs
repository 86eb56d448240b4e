//! Transforms: nodes that turn one value into another.
//!
//! Transforms run inline inside a scheduler tick, so `apply` must be cheap
//! and bounded. Returning `None` drops the sample; nothing further
//! downstream sees it.

use crate::config::NodeConfig;
use crate::pipeline::value::Sample;
use std::collections::VecDeque;
use std::marker::PhantomData;
use tracing::warn;

/// A pipeline stage accepting `T` and producing `Self::Output`.
pub trait Transform<T: Sample> {
    type Output: Sample;

    /// Short human-readable name, used in logs.
    fn name(&self) -> &'static str;

    fn apply(&mut self, input: T) -> Option<Self::Output>;

    /// Key under which this node's overrides live in the config file.
    fn config_path(&self) -> Option<&str> {
        None
    }

    /// Applies overrides from the config file. Called once, when the node is
    /// added to the graph.
    fn configure(&mut self, _config: &NodeConfig) {}
}

/// Linear calibration: `output = input * multiplier + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    multiplier: f64,
    offset: f64,
    config_path: Option<String>,
}

impl Linear {
    pub fn new(multiplier: f64, offset: f64) -> Self {
        Self {
            multiplier,
            offset,
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, config_path: impl Into<String>) -> Self {
        self.config_path = Some(config_path.into());
        self
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }
}

impl Transform<f64> for Linear {
    type Output = f64;

    fn name(&self) -> &'static str {
        "linear"
    }

    fn apply(&mut self, input: f64) -> Option<f64> {
        let output = input * self.multiplier + self.offset;
        if output.is_finite() {
            Some(output)
        } else {
            warn!(
                input,
                multiplier = self.multiplier,
                offset = self.offset,
                "Linear transform overflowed; sample dropped."
            );
            None
        }
    }

    fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    fn configure(&mut self, config: &NodeConfig) {
        if let Some(multiplier) = config.multiplier {
            self.multiplier = multiplier;
        }
        if let Some(offset) = config.offset {
            self.offset = offset;
        }
    }
}

/// Wraps an arbitrary closure as a transform.
pub struct LambdaTransform<F, T, U> {
    function: F,
    _marker: PhantomData<fn(T) -> U>,
}

impl<F, T, U> LambdaTransform<F, T, U>
where
    F: FnMut(T) -> Option<U>,
{
    pub fn new(function: F) -> Self {
        Self {
            function,
            _marker: PhantomData,
        }
    }
}

impl<F, T, U> Transform<T> for LambdaTransform<F, T, U>
where
    F: FnMut(T) -> Option<U>,
    T: Sample,
    U: Sample,
{
    type Output = U;

    fn name(&self) -> &'static str {
        "lambda"
    }

    fn apply(&mut self, input: T) -> Option<U> {
        (self.function)(input)
    }
}

/// Averages the last `sample_size` inputs.
///
/// Emits on every input, averaging over however many samples it has seen so
/// far until the window fills.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    sample_size: usize,
    window: VecDeque<f64>,
}

impl MovingAverage {
    /// A `sample_size` of zero is treated as one.
    pub fn new(sample_size: usize) -> Self {
        let sample_size = sample_size.max(1);
        Self {
            sample_size,
            window: VecDeque::with_capacity(sample_size),
        }
    }
}

impl Transform<f64> for MovingAverage {
    type Output = f64;

    fn name(&self) -> &'static str {
        "moving_average"
    }

    fn apply(&mut self, input: f64) -> Option<f64> {
        if !input.is_finite() {
            return None;
        }
        if self.window.len() == self.sample_size {
            self.window.pop_front();
        }
        self.window.push_back(input);
        Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_scales_and_offsets() {
        let mut kelvin = Linear::new(1.0, 273.15);
        let out = kelvin.apply(21.5).unwrap();
        assert!((out - 294.65).abs() < 1e-9);

        let mut ratio = Linear::new(0.01, 0.0);
        assert!((ratio.apply(45.0).unwrap() - 0.45).abs() < 1e-12);
    }

    #[test]
    fn linear_handles_zero_and_negative_input() {
        let mut linear = Linear::new(2.0, -1.0);
        assert_eq!(linear.apply(0.0), Some(-1.0));
        assert_eq!(linear.apply(-3.0), Some(-7.0));
    }

    #[test]
    fn linear_drops_overflowing_results() {
        let mut linear = Linear::new(2.0, 0.0);
        assert_eq!(linear.apply(f64::MAX), None);
        assert_eq!(linear.apply(-f64::MAX), None);
        assert_eq!(Linear::new(1.0, 0.0).apply(f64::MAX), Some(f64::MAX));
    }

    #[test]
    fn linear_takes_overrides() {
        let mut linear = Linear::new(1.0, 0.0).with_config_path("/exhaust/linear");
        linear.configure(&NodeConfig {
            offset: Some(-2.5),
            ..Default::default()
        });
        assert_eq!(linear.config_path(), Some("/exhaust/linear"));
        assert_eq!(linear.multiplier(), 1.0);
        assert_eq!(linear.offset(), -2.5);
    }

    #[test]
    fn lambda_can_drop_samples() {
        let mut positive = LambdaTransform::new(|v: i64| (v > 0).then_some(v as f64));
        assert_eq!(positive.apply(3), Some(3.0));
        assert_eq!(positive.apply(-3), None);
    }

    #[test]
    fn moving_average_slides() {
        let mut avg = MovingAverage::new(2);
        assert_eq!(avg.apply(2.0), Some(2.0));
        assert_eq!(avg.apply(4.0), Some(3.0));
        assert_eq!(avg.apply(8.0), Some(6.0));
        assert_eq!(avg.apply(f64::NAN), None);
    }
}
