//! Boundary-weighted losses for binary segmentation.
//!
//! This crate provides the losses used to train binary mask predictors
//! (e.g. polyp segmentation) with the Burn deep learning framework. All
//! losses are backend-agnostic and differentiable wherever the formula is.
//!
//! ## Losses
//!
//! - **[`WeightedBceDiceLoss`]**: boundary-weighted BCE plus a Dice term on
//!   thresholded predictions
//! - **[`WeightedBceIoULoss`]**: boundary-weighted BCE plus a smoothed soft IoU term
//! - **[`MsSsimLoss`]**: `1 - MS-SSIM` between mask and prediction
//!
//! The boundary weighting ([`BoundaryWeight`]) upweights pixels whose
//! neighbourhood disagrees with them, i.e. pixels close to a mask edge.
//!
//! ## Conventions
//!
//! Tensors are `[batch_size, channels, height, width]`. Channel-last masks
//! can be converted with [`channels_last_to_first`]. Each loss offers
//! `forward` (reduced, `[1]`), `forward_no_reduction` (`[batch_size]`) and
//! `try_forward_no_reduction`, which returns a [`LossError`] instead of
//! panicking on bad input.
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::{backend::NdArray, nn::loss::Reduction, tensor::Tensor};
//! use polyp_loss::{WeightedBceIoULoss, WeightedBceIoULossConfig};
//!
//! let device = Default::default();
//! let loss: WeightedBceIoULoss = WeightedBceIoULossConfig::new().init();
//!
//! let masks = Tensor::<NdArray, 4>::zeros([2, 1, 32, 32], &device);
//! let logits = Tensor::<NdArray, 4>::zeros([2, 1, 32, 32], &device);
//! let value = loss.forward(logits, masks, Reduction::Mean);
//! assert_eq!(value.dims(), [1]);
//! ```

mod bce_dice;
mod bce_iou;
mod boundary;
mod error;
mod functional;
mod ms_ssim;
mod shape;

use burn::tensor::{backend::Backend, Tensor};

pub use bce_dice::{DiceSmoothing, WeightedBceDiceLoss, WeightedBceDiceLossConfig};
pub use bce_iou::{WeightedBceIoULoss, WeightedBceIoULossConfig};
pub use boundary::{BoundaryWeight, BoundaryWeightConfig};
pub use error::{LossError, LossResult};
pub use functional::bce_with_logits;
pub use ms_ssim::{MsSsimLoss, MsSsimLossConfig};
pub use shape::{channels_last_to_first, check_same_shape};

/// Something that scores a batch of predictions against ground-truth masks.
///
/// This is the `(truth, prediction) -> scalar` contract a training loop
/// expects from a loss. Implementors return a tensor of shape `[1]`.
pub trait SegmentationCriterion<B: Backend> {
    /// Score `logits` against `masks`, both `[batch_size, channels, height, width]`.
    fn score(&self, masks: Tensor<B, 4>, logits: Tensor<B, 4>) -> Tensor<B, 1>;
}
