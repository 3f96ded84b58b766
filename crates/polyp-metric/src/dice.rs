//! Accumulating Dice coefficient metric.
//!
//! Each update computes the Dice coefficient of the whole flattened batch
//! and adds it to a running total:
//! ```text
//! p     = sigmoid(logits) > threshold
//! dice  = 2 * sum(mask * p) / (sum(mask) + sum(p) + smooth)
//! total = total + dice
//! ```
//! The total keeps growing until [`reset`](Accumulator::reset) is called.

use core::marker::PhantomData;

use burn::{
    config::Config,
    tensor::{activation::sigmoid, backend::Backend, cast::ToElement, Tensor},
};
use polyp_loss::{check_same_shape, LossError, LossResult, SegmentationCriterion};

use crate::Accumulator;

/// Configuration for creating a [Dice coefficient metric](DiceCoefMetric).
#[derive(Config, Debug)]
pub struct DiceCoefMetricConfig {
    /// Probability above which a pixel counts as foreground. Default: 0.5
    #[config(default = 0.5)]
    pub threshold: f64,

    /// Smoothing added to the denominator. Default: 1e-15
    #[config(default = 1e-15)]
    pub smooth: f64,
}

impl DiceCoefMetricConfig {
    /// Initialize a [Dice coefficient metric](DiceCoefMetric).
    pub fn init<B: Backend>(&self) -> DiceCoefMetric<B> {
        self.try_init().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Initialize a [Dice coefficient metric](DiceCoefMetric), or report an invalid value.
    pub fn try_init<B: Backend>(&self) -> LossResult<DiceCoefMetric<B>> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(LossError::InvalidConfig {
                reason: format!(
                    "Threshold for DiceCoefMetric must be in (0, 1), got {}",
                    self.threshold
                ),
            });
        }
        if self.smooth < 0.0 {
            return Err(LossError::InvalidConfig {
                reason: format!(
                    "Smoothing for DiceCoefMetric must be non-negative, got {}",
                    self.smooth
                ),
            });
        }

        tracing::debug!(config = ?self, "Dice coefficient metric initialized");

        Ok(DiceCoefMetric {
            total: 0.0,
            updates: 0,
            threshold: self.threshold,
            smooth: self.smooth,
            _b: PhantomData,
        })
    }
}

/// Dice coefficient accumulated over updates.
#[derive(Debug, Clone)]
pub struct DiceCoefMetric<B: Backend> {
    total: f64,
    updates: usize,
    threshold: f64,
    smooth: f64,
    _b: PhantomData<B>,
}

impl<B: Backend> Default for DiceCoefMetric<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> DiceCoefMetric<B> {
    /// Create a new metric with default configuration.
    pub fn new() -> Self {
        DiceCoefMetricConfig::new().init()
    }

    /// The configuration this metric was built from.
    pub fn config(&self) -> DiceCoefMetricConfig {
        DiceCoefMetricConfig::new()
            .with_threshold(self.threshold)
            .with_smooth(self.smooth)
    }

    /// Number of updates since construction or the last reset.
    pub const fn updates(&self) -> usize {
        self.updates
    }

    /// Dice coefficient of the whole flattened batch, without accumulating.
    ///
    /// # Shapes
    ///
    /// - masks: `[batch_size, channels, height, width]`
    /// - logits: `[batch_size, channels, height, width]`
    /// - output: `[1]`
    pub fn batch_dice(&self, masks: Tensor<B, 4>, logits: Tensor<B, 4>) -> Tensor<B, 1> {
        if let Err(err) = check_same_shape(logits.dims(), masks.dims()) {
            panic!("{err}");
        }

        let masks = masks.flatten::<1>(0, 3);
        let binary = sigmoid(logits.flatten::<1>(0, 3))
            .greater_elem(self.threshold)
            .float();

        let intersection = (masks.clone() * binary.clone()).sum();
        let denominator = masks.sum() + binary.sum();

        intersection.mul_scalar(2.0) / denominator.add_scalar(self.smooth)
    }
}

impl<B: Backend> Accumulator<B> for DiceCoefMetric<B> {
    fn update(&mut self, masks: Tensor<B, 4>, logits: Tensor<B, 4>) -> f64 {
        let dice = self.batch_dice(masks, logits).into_scalar().to_f64();
        self.total += dice;
        self.updates += 1;

        tracing::trace!(
            dice,
            total = self.total,
            updates = self.updates,
            "Dice updated"
        );
        dice
    }

    fn result(&self) -> f64 {
        self.total
    }

    fn reset(&mut self) {
        tracing::debug!(total = self.total, updates = self.updates, "Dice reset");
        self.total = 0.0;
        self.updates = 0;
    }
}

impl<B: Backend> SegmentationCriterion<B> for DiceCoefMetric<B> {
    fn score(&self, masks: Tensor<B, 4>, logits: Tensor<B, 4>) -> Tensor<B, 1> {
        self.batch_dice(masks, logits)
    }
}
