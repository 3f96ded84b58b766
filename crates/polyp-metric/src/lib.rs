//! Dice coefficient metrics for binary segmentation.
//!
//! Two flavours are provided:
//!
//! - **[`DiceCoefMetric`]**: stateful. Every update adds the Dice coefficient of
//!   the whole flattened batch to a running total, until reset.
//! - **[`dice_coef`]**: stateless. Per-example Dice averaged over the batch.
//!
//! The two intentionally differ: the stateful metric weights every pixel of
//! the batch equally while [`dice_coef`] weights every example equally.
//!
//! With the `train` feature, [`DiceCoefMetric`] also implements Burn's
//! `Metric` and `Numeric` traits and consumes a `DiceCoefInput`.
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::{backend::NdArray, tensor::Tensor};
//! use polyp_metric::{Accumulator, DiceCoefMetric};
//!
//! let device = Default::default();
//! let mut metric = DiceCoefMetric::<NdArray>::new();
//!
//! let masks = Tensor::<NdArray, 4>::ones([1, 1, 4, 4], &device);
//! let logits = Tensor::<NdArray, 4>::full([1, 1, 4, 4], 5.0, &device);
//! metric.update(masks, logits);
//!
//! assert!((metric.result() - 1.0).abs() < 1e-6);
//! metric.reset();
//! assert_eq!(metric.result(), 0.0);
//! ```

mod coefficient;
mod dice;
#[cfg(feature = "train")]
mod train;

use burn::tensor::{backend::Backend, Tensor};

pub use coefficient::{dice_coef, dice_coef_per_example};
pub use dice::{DiceCoefMetric, DiceCoefMetricConfig};
#[cfg(feature = "train")]
pub use train::DiceCoefInput;

/// A metric that accumulates over batches until reset.
pub trait Accumulator<B: Backend> {
    /// Fold one batch into the running state and return its contribution.
    fn update(&mut self, masks: Tensor<B, 4>, logits: Tensor<B, 4>) -> f64;

    /// Current accumulated value.
    fn result(&self) -> f64;

    /// Return to the initial state.
    fn reset(&mut self);
}
