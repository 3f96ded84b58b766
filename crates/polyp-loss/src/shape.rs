//! Shape checks and layout conversion shared by the losses and metrics.

use burn::tensor::{backend::Backend, Tensor};

use crate::error::{LossError, LossResult};

/// Checks that predictions and targets have identical shapes.
pub fn check_same_shape<const D: usize>(
    predictions: [usize; D],
    targets: [usize; D],
) -> LossResult<()> {
    if predictions == targets {
        Ok(())
    } else {
        Err(LossError::ShapeMismatch {
            predictions: predictions.to_vec(),
            targets: targets.to_vec(),
        })
    }
}

/// Converts a `[batch, height, width, channels]` tensor into Burn's
/// `[batch, channels, height, width]` layout.
pub fn channels_last_to_first<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 4> {
    tensor.permute([0, 3, 1, 2])
}
