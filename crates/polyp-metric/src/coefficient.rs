//! Stateless per-example Dice coefficient.

use burn::tensor::{activation::sigmoid, backend::Backend, cast::ToElement, Tensor};
use polyp_loss::check_same_shape;

const THRESHOLD: f64 = 0.5;
const SMOOTH: f64 = 1e-15;

/// Mean Dice coefficient of a batch, using a 0.5 threshold on `sigmoid(logits)`.
///
/// The coefficient is computed per example over channels, height and width,
/// then averaged over the batch.
///
/// # Panics
///
/// Panics if `masks` and `logits` have different shapes.
pub fn dice_coef<B: Backend>(masks: Tensor<B, 4>, logits: Tensor<B, 4>) -> f64 {
    dice_coef_per_example(masks, logits, THRESHOLD, SMOOTH)
        .mean()
        .into_scalar()
        .to_f64()
}

/// Dice coefficient of each example in the batch.
///
/// # Shapes
///
/// - masks: `[batch_size, channels, height, width]`
/// - logits: `[batch_size, channels, height, width]`
/// - output: `[batch_size]`
pub fn dice_coef_per_example<B: Backend>(
    masks: Tensor<B, 4>,
    logits: Tensor<B, 4>,
    threshold: f64,
    smooth: f64,
) -> Tensor<B, 1> {
    if let Err(err) = check_same_shape(logits.dims(), masks.dims()) {
        panic!("{err}");
    }

    let binary = sigmoid(logits).greater_elem(threshold).float();

    let masks = masks.flatten::<2>(1, 3);
    let binary = binary.flatten::<2>(1, 3);

    let intersection = (masks.clone() * binary.clone()).sum_dim(1);
    let denominator = masks.sum_dim(1) + binary.sum_dim(1);

    (intersection.mul_scalar(2.0) / denominator.add_scalar(smooth)).squeeze(1)
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance};

    use super::*;
    use crate::tests::{mask_logits, square_mask, TestBackend};

    #[test]
    fn dice_coef_perfect_prediction_is_one() {
        let masks = square_mask::<TestBackend>(8, 1, 1, 5);

        let dice = dice_coef(masks.clone(), mask_logits(masks, 10.0));

        assert!((dice - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dice_coef_shifted_block() {
        let masks = square_mask::<TestBackend>(8, 2, 2, 4);
        let logits = mask_logits(square_mask(8, 2, 3, 4), 10.0);

        let dice = dice_coef(masks, logits);

        assert!((dice - 0.75).abs() < 1e-6);
    }

    #[test]
    fn dice_coef_averages_examples_rather_than_pixels() {
        let device = Default::default();

        // Sample 1: perfect match. Sample 2: one-pixel mask, nothing predicted.
        let masks = Tensor::cat(
            vec![
                square_mask::<TestBackend>(8, 2, 2, 4),
                square_mask(8, 0, 0, 1),
            ],
            0,
        );
        let logits = Tensor::cat(
            vec![
                mask_logits(square_mask(8, 2, 2, 4), 10.0),
                Tensor::full([1, 1, 8, 8], -10.0, &device),
            ],
            0,
        );

        let per_example = dice_coef_per_example(masks.clone(), logits.clone(), 0.5, 1e-15);
        let expected = TensorData::from([1.0_f32, 0.0]);
        per_example
            .into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());

        let dice = dice_coef(masks, logits);
        assert!((dice - 0.5).abs() < 1e-6);
    }

    #[test]
    fn dice_coef_is_invariant_to_spatial_flips() {
        let masks = square_mask::<TestBackend>(8, 1, 2, 4);
        let logits = mask_logits(square_mask(8, 2, 1, 4), 10.0);

        let dice = dice_coef(masks.clone(), logits.clone());
        let flipped = dice_coef(masks.flip([2, 3]), logits.flip([2, 3]));

        assert!((dice - flipped).abs() < 1e-9);
    }

    #[test]
    fn dice_coef_empty_mask_and_prediction_is_zero() {
        let device = Default::default();
        let masks = Tensor::<TestBackend, 4>::zeros([2, 1, 4, 4], &device);
        let logits = Tensor::full([2, 1, 4, 4], -5.0, &device);

        let dice = dice_coef(masks, logits);

        assert!(!dice.is_nan());
        assert_eq!(dice, 0.0);
    }

    #[test]
    fn dice_coef_counts_every_channel() {
        let device = Default::default();
        let masks = Tensor::cat(
            vec![
                square_mask::<TestBackend>(4, 0, 0, 2),
                Tensor::zeros([1, 1, 4, 4], &device),
            ],
            1,
        );
        let logits = Tensor::cat(
            vec![
                mask_logits(square_mask(4, 0, 0, 2), 10.0),
                Tensor::full([1, 1, 4, 4], 10.0, &device),
            ],
            1,
        );

        // 4 overlapping pixels, 4 mask pixels, 4 + 16 predicted pixels.
        let dice = dice_coef(masks, logits);

        assert!((dice - 8.0 / 24.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic = "Shape of predictions"]
    fn dice_coef_mismatched_shapes_panics() {
        let device = Default::default();
        let masks = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);
        let logits = Tensor::zeros([2, 1, 4, 4], &device);

        dice_coef(masks, logits);
    }
}
