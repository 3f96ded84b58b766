//! Boundary-weighted BCE + Dice loss.
//!
//! The loss is computed as:
//! ```text
//! w     = 1 + 5 * |avg_pool_31(mask) - mask|
//! wbce  = sum(w * bce_with_logits(pred, mask)) / sum(w)
//! p     = sigmoid(pred) > 0.5
//! inter = sum(p * mask * w)
//! union = sum((p + mask) * w)
//! wdice = 1 - 2 * inter / (union + eps)
//! Loss  = mean(wbce + wdice)
//! ```
//! Sums run over `(H, W)` of each example.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::Reduction,
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use crate::{
    boundary::{BoundaryWeight, BoundaryWeightConfig},
    error::{LossError, LossResult},
    functional::{channel_mean, spatial_sum, weighted_bce_with_logits},
    shape::check_same_shape,
    SegmentationCriterion,
};

/// Where the Dice smoothing constant is added.
#[derive(Config, Debug, PartialEq)]
pub enum DiceSmoothing {
    /// `2 * inter / (union + eps)`.
    Denominator,
    /// `2 * inter / union + eps`. An empty union yields NaN.
    AfterDivision,
}

/// Configuration for creating a [weighted BCE + Dice loss](WeightedBceDiceLoss).
#[derive(Config, Debug)]
pub struct WeightedBceDiceLossConfig {
    /// Weight factor applied to the reduced loss. Default: 1.0
    #[config(default = 1.0)]
    pub weight: f64,

    /// Boundary emphasis factor of the weight map. Default: 5.0
    #[config(default = 5.0)]
    pub edge_factor: f64,

    /// Pooling window of the weight map. Default: 31
    #[config(default = 31)]
    pub kernel_size: usize,

    /// Probability above which a pixel counts as foreground. Default: 0.5
    #[config(default = 0.5)]
    pub threshold: f64,

    /// Dice smoothing constant. Default: 1e-15
    #[config(default = 1e-15)]
    pub eps: f64,

    /// Placement of `eps` in the Dice ratio. Default: denominator
    #[config(default = "DiceSmoothing::Denominator")]
    pub smoothing: DiceSmoothing,
}

impl WeightedBceDiceLossConfig {
    /// Initialize [weighted BCE + Dice loss](WeightedBceDiceLoss).
    pub fn init(&self) -> WeightedBceDiceLoss {
        self.try_init().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Initialize [weighted BCE + Dice loss](WeightedBceDiceLoss), or report an invalid value.
    pub fn try_init(&self) -> LossResult<WeightedBceDiceLoss> {
        if self.weight <= 0.0 {
            return Err(LossError::invalid_config(format!(
                "Weight for WeightedBceDiceLoss must be positive, got {}",
                self.weight
            )));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(LossError::invalid_config(format!(
                "Threshold for WeightedBceDiceLoss must be in (0, 1), got {}",
                self.threshold
            )));
        }
        if self.eps < 0.0 {
            return Err(LossError::invalid_config(format!(
                "Epsilon for WeightedBceDiceLoss must be non-negative, got {}",
                self.eps
            )));
        }

        let boundary = BoundaryWeightConfig::new()
            .with_kernel_size(self.kernel_size)
            .with_edge_factor(self.edge_factor)
            .try_init()?;

        tracing::debug!(config = ?self, "weighted BCE + Dice loss initialized");

        Ok(WeightedBceDiceLoss {
            weight: self.weight,
            threshold: self.threshold,
            eps: self.eps,
            smooth_after_division: self.smoothing == DiceSmoothing::AfterDivision,
            boundary,
        })
    }
}

/// Boundary-weighted binary cross-entropy plus thresholded Dice loss.
///
/// Predictions are logits. The BCE term is differentiable; the Dice term
/// works on the hard 0.5-thresholded prediction and only reports overlap.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct WeightedBceDiceLoss {
    /// Weight factor applied to the reduced loss.
    pub weight: f64,
    /// Foreground probability threshold.
    pub threshold: f64,
    /// Dice smoothing constant.
    pub eps: f64,
    /// Add `eps` after the division instead of to the denominator.
    pub smooth_after_division: bool,
    /// Boundary weight map.
    pub boundary: BoundaryWeight,
}

impl Default for WeightedBceDiceLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for WeightedBceDiceLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("weight", &self.weight)
            .add("threshold", &self.threshold)
            .add("eps", &self.eps)
            .add("smooth_after_division", &self.smooth_after_division)
            .add("boundary", &self.boundary)
            .optional()
    }
}

impl WeightedBceDiceLoss {
    /// Create a new weighted BCE + Dice loss with default configuration.
    pub fn new() -> Self {
        WeightedBceDiceLossConfig::new().init()
    }

    /// The configuration this loss was built from.
    pub fn config(&self) -> WeightedBceDiceLossConfig {
        let boundary = self.boundary.config();
        let smoothing = if self.smooth_after_division {
            DiceSmoothing::AfterDivision
        } else {
            DiceSmoothing::Denominator
        };

        WeightedBceDiceLossConfig::new()
            .with_weight(self.weight)
            .with_edge_factor(boundary.edge_factor)
            .with_kernel_size(boundary.kernel_size)
            .with_threshold(self.threshold)
            .with_eps(self.eps)
            .with_smoothing(smoothing)
    }

    /// Compute the criterion on the input tensor with reduction.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, channels, height, width]` (logits)
    /// - targets: `[batch_size, channels, height, width]` (binary values)
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let loss = self.forward_no_reduction(predictions, targets);
        let reduced = match reduction {
            Reduction::Mean | Reduction::Auto => loss.mean(),
            Reduction::Sum => loss.sum(),
        };

        reduced.mul_scalar(self.weight)
    }

    /// Compute the criterion on the input tensor without reduction.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, channels, height, width]` (logits)
    /// - targets: `[batch_size, channels, height, width]` (binary values)
    /// - output: `[batch_size]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        self.try_forward_no_reduction(predictions, targets)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Same as [`forward_no_reduction`](Self::forward_no_reduction), returning
    /// an error on mismatched shapes instead of panicking.
    pub fn try_forward_no_reduction<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
    ) -> LossResult<Tensor<B, 1>> {
        check_same_shape(predictions.dims(), targets.dims())?;

        let weights = self.boundary.forward(targets.clone());
        let wbce = weighted_bce_with_logits(predictions.clone(), targets.clone(), weights.clone());
        let wdice = self.weighted_dice_loss(predictions, targets, weights);

        Ok(wbce + wdice)
    }

    /// Weighted Dice loss on thresholded predictions, one value per example.
    pub(crate) fn weighted_dice_loss<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        targets: Tensor<B, 4>,
        weights: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let binary = sigmoid(logits).greater_elem(self.threshold).float();

        let inter = spatial_sum(binary.clone() * targets.clone() * weights.clone());
        let union = spatial_sum((binary + targets) * weights);

        let dice = if self.smooth_after_division {
            (inter.mul_scalar(2.0) / union).add_scalar(self.eps)
        } else {
            inter.mul_scalar(2.0) / union.add_scalar(self.eps)
        };

        channel_mean(dice.neg().add_scalar(1.0))
    }
}

impl<B: Backend> SegmentationCriterion<B> for WeightedBceDiceLoss {
    fn score(&self, masks: Tensor<B, 4>, logits: Tensor<B, 4>) -> Tensor<B, 1> {
        self.forward(logits, masks, Reduction::Auto)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{cast::ToElement, TensorData};

    use super::*;
    use crate::tests::{dice_term, mask_logits, square_mask, TestBackend};

    #[test]
    fn bce_dice_loss_empty_mask_and_prediction_gives_dice_of_one() {
        let device = Default::default();
        let loss = WeightedBceDiceLoss::new();

        let targets = Tensor::<TestBackend, 4>::zeros([1, 1, 8, 8], &device);
        let predictions = Tensor::<TestBackend, 4>::full([1, 1, 8, 8], -10.0, &device);

        let dice = dice_term(&loss, predictions.clone(), targets.clone());
        assert!(
            (dice - 1.0).abs() < 1e-6,
            "Dice term should be 1, got {dice}"
        );

        let total = loss
            .forward(predictions, targets, Reduction::Mean)
            .into_scalar()
            .to_f64();
        assert!(total.is_finite());
        assert!((total - 1.0).abs() < 1e-3, "Loss should be ~1, got {total}");
    }

    #[test]
    fn bce_dice_loss_perfect_prediction_is_near_zero() {
        let loss = WeightedBceDiceLoss::new();
        let targets = square_mask::<TestBackend>(8, 2, 2, 4);
        let predictions = mask_logits(targets.clone(), 10.0);

        let dice = dice_term(&loss, predictions.clone(), targets.clone());
        assert!(dice.abs() < 1e-6, "Dice term should be 0, got {dice}");

        let total = loss
            .forward(predictions, targets, Reduction::Mean)
            .into_scalar()
            .to_f64();
        assert!(
            (0.0..1e-3).contains(&total),
            "Loss should be ~0, got {total}"
        );
    }

    #[test]
    fn bce_dice_loss_shifted_block_has_partial_dice() {
        let loss = WeightedBceDiceLoss::new();
        let targets = square_mask::<TestBackend>(8, 2, 2, 4);
        let predictions = mask_logits(square_mask::<TestBackend>(8, 2, 3, 4), 10.0);

        // The 31x31 window spans the whole image, so the pooled mask is 0.25 everywhere:
        // w = 4.75 on the block, 2.25 off it. 12 of the 16 predicted pixels overlap.
        // inter = 12 * 4.75 = 57, union = 16 * 4.75 + 57 + 4 * 2.25 = 142
        let dice = dice_term(&loss, predictions, targets);
        let expected = 1.0 - 2.0 * 57.0 / 142.0;

        assert!(dice > 0.0 && dice < 1.0);
        assert!(
            (dice - expected).abs() < 1e-5,
            "Dice term should be {expected}, got {dice}"
        );
    }

    #[test]
    fn bce_dice_loss_literal_smoothing_only_differs_on_empty_union() {
        let literal = WeightedBceDiceLossConfig::new()
            .with_smoothing(DiceSmoothing::AfterDivision)
            .init();
        let default = WeightedBceDiceLoss::new();

        let targets = square_mask::<TestBackend>(8, 2, 2, 4);
        let predictions = mask_logits(square_mask::<TestBackend>(8, 2, 3, 4), 10.0);
        let a = dice_term(&literal, predictions.clone(), targets.clone());
        let b = dice_term(&default, predictions, targets);
        assert!((a - b).abs() < 1e-6);

        let device = Default::default();
        let empty = Tensor::<TestBackend, 4>::zeros([1, 1, 8, 8], &device);
        let negative = Tensor::<TestBackend, 4>::full([1, 1, 8, 8], -10.0, &device);
        assert!(dice_term(&literal, negative, empty).is_nan());
    }

    #[test]
    fn bce_dice_loss_processes_batches_correctly() {
        let device = Default::default();
        let loss = WeightedBceDiceLoss::new();

        let targets = Tensor::cat(
            vec![
                square_mask::<TestBackend>(8, 2, 2, 4),
                Tensor::zeros([1, 1, 8, 8], &device),
            ],
            0,
        );
        let predictions = mask_logits(targets.clone(), 10.0);

        let result_mean = loss.forward(predictions.clone(), targets.clone(), Reduction::Mean);
        let result_sum = loss.forward(predictions.clone(), targets.clone(), Reduction::Sum);
        let result_no_reduction = loss.forward_no_reduction(predictions, targets);

        assert_eq!(result_mean.dims(), [1]);
        assert_eq!(result_no_reduction.dims(), [2]);

        // First sample matches perfectly, second has an empty union.
        let per_example = result_no_reduction.into_data().to_vec::<f32>().unwrap();
        assert!(per_example[0] < 1e-3);
        assert!((per_example[1] - 1.0).abs() < 1e-3);

        let mean = result_mean.into_scalar().to_f64();
        let sum = result_sum.into_scalar().to_f64();
        assert!((sum - 2.0 * mean).abs() < 1e-5);
    }

    #[test]
    fn bce_dice_loss_weight_scales_reduced_loss() {
        let targets = square_mask::<TestBackend>(8, 2, 2, 4);
        let predictions = mask_logits(square_mask::<TestBackend>(8, 3, 3, 4), 2.0);

        let base = WeightedBceDiceLoss::new()
            .forward(predictions.clone(), targets.clone(), Reduction::Mean)
            .into_scalar()
            .to_f64();
        let doubled = WeightedBceDiceLossConfig::new()
            .with_weight(2.0)
            .init()
            .forward(predictions, targets, Reduction::Mean)
            .into_scalar()
            .to_f64();

        assert!((doubled - 2.0 * base).abs() < 1e-5);
    }

    #[test]
    fn bce_dice_loss_score_matches_mean_forward() {
        let loss = WeightedBceDiceLoss::new();
        let targets = square_mask::<TestBackend>(8, 2, 2, 4);
        let predictions = mask_logits(square_mask::<TestBackend>(8, 1, 2, 4), 3.0);

        let scored = loss.score(targets.clone(), predictions.clone());
        let forward = loss.forward(predictions, targets, Reduction::Mean);

        scored.into_data().assert_eq(&forward.into_data(), true);
    }

    #[test]
    fn bce_dice_loss_config_round_trips_through_json() {
        let config = WeightedBceDiceLossConfig::new()
            .with_kernel_size(15)
            .with_smoothing(DiceSmoothing::AfterDivision);

        let json = config.to_string();
        let restored = WeightedBceDiceLossConfig::load_binary(json.as_bytes())
            .expect("Config should deserialize");
        let rebuilt = restored.init().config();

        assert_eq!(rebuilt.kernel_size, 15);
        assert_eq!(rebuilt.edge_factor, 5.0);
        assert_eq!(rebuilt.eps, 1e-15);
        assert_eq!(rebuilt.smoothing, DiceSmoothing::AfterDivision);
    }

    #[test]
    #[should_panic = "Threshold for WeightedBceDiceLoss must be in (0, 1)"]
    fn bce_dice_loss_config_threshold_out_of_range_panics() {
        let _loss = WeightedBceDiceLossConfig::new().with_threshold(1.5).init();
    }

    #[test]
    #[should_panic = "Kernel size for BoundaryWeight must be positive and odd"]
    fn bce_dice_loss_config_even_kernel_size_panics() {
        let _loss = WeightedBceDiceLossConfig::new().with_kernel_size(4).init();
    }

    #[test]
    #[should_panic = "Shape of predictions"]
    fn bce_dice_loss_forward_mismatched_shapes_panics() {
        let device = Default::default();
        let loss = WeightedBceDiceLoss::new();

        let predictions =
            Tensor::<TestBackend, 4>::from_data(TensorData::from([[[[1.0, 2.0]]]]), &device);
        let targets = Tensor::<TestBackend, 4>::from_data(
            TensorData::from([[[[1.0, 0.0], [0.0, 1.0]]]]),
            &device,
        );

        let _result = loss.forward_no_reduction(predictions, targets);
    }

    #[test]
    fn bce_dice_loss_try_forward_reports_shape_mismatch() {
        let device = Default::default();
        let loss = WeightedBceDiceLoss::new();

        let predictions = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);
        let targets = Tensor::<TestBackend, 4>::zeros([2, 1, 4, 4], &device);

        let result = loss.try_forward_no_reduction(predictions, targets);
        assert!(matches!(result, Err(LossError::ShapeMismatch { .. })));
    }
}
