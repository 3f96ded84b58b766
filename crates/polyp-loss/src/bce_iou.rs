//! Boundary-weighted BCE + IoU loss.
//!
//! The loss is computed as:
//! ```text
//! w     = 1 + 7 * |avg_pool_27(mask) - mask|
//! wbce  = sum(w * bce_with_logits(pred, mask)) / sum(w)
//! p     = sigmoid(pred)
//! inter = sum(p * mask * w)
//! union = sum((p + mask) * w)
//! wiou  = 1 - (inter + 1) / (union - inter + 1)
//! Loss  = mean(wbce + wiou)
//! ```

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

/// Configuration for creating a [weighted BCE + IoU loss](WeightedBceIoULoss).
#[derive(Config, Debug)]
pub struct WeightedBceIoULossConfig {
    /// Weight factor applied to the reduced loss. Default: 1.0
    #[config(default = 1.0)]
    pub weight: f64,

    /// Boundary emphasis factor of the weight map. Default: 7.0
    #[config(default = 7.0)]
    pub edge_factor: f64,

    /// Pooling window of the weight map. Default: 27
    #[config(default = 27)]
    pub kernel_size: usize,

    /// Additive smoothing of the IoU ratio. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
}

impl WeightedBceIoULossConfig {
    /// Initialize [weighted BCE + IoU loss](WeightedBceIoULoss).
    pub fn init(&self) -> WeightedBceIoULoss {
        self.try_init().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Initialize [weighted BCE + IoU loss](WeightedBceIoULoss), or report an invalid value.
    pub fn try_init(&self) -> LossResult<WeightedBceIoULoss> {
        if self.weight <= 0.0 {
            return Err(LossError::invalid_config(format!(
                "Weight for WeightedBceIoULoss must be positive, got {}",
                self.weight
            )));
        }
        if self.smooth <= 0.0 {
            return Err(LossError::invalid_config(format!(
                "Smoothing for WeightedBceIoULoss must be positive, got {}",
                self.smooth
            )));
        }

        let boundary = BoundaryWeightConfig::new()
            .with_kernel_size(self.kernel_size)
            .with_edge_factor(self.edge_factor)
            .try_init()?;

        tracing::debug!(config = ?self, "weighted BCE + IoU loss initialized");

        Ok(WeightedBceIoULoss {
            weight: self.weight,
            smooth: self.smooth,
            boundary,
        })
    }
}

/// Boundary-weighted binary cross-entropy plus soft IoU loss.
///
/// Both terms are differentiable with respect to the logits.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct WeightedBceIoULoss {
    /// Weight factor applied to the reduced loss.
    pub weight: f64,
    /// Additive smoothing of the IoU ratio.
    pub smooth: f64,
    /// Boundary weight map.
    pub boundary: BoundaryWeight,
}

impl Default for WeightedBceIoULoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for WeightedBceIoULoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("weight", &self.weight)
            .add("smooth", &self.smooth)
            .add("boundary", &self.boundary)
            .optional()
    }
}

impl WeightedBceIoULoss {
    /// Create a new weighted BCE + IoU loss with default configuration.
    pub fn new() -> Self {
        WeightedBceIoULossConfig::new().init()
    }

    /// The configuration this loss was built from.
    pub fn config(&self) -> WeightedBceIoULossConfig {
        let boundary = self.boundary.config();

        WeightedBceIoULossConfig::new()
            .with_weight(self.weight)
            .with_edge_factor(boundary.edge_factor)
            .with_kernel_size(boundary.kernel_size)
            .with_smooth(self.smooth)
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
        let wiou = self.weighted_iou_loss(sigmoid(predictions), targets, weights);

        Ok(wbce + wiou)
    }

    /// Weighted soft IoU loss, one value per example.
    fn weighted_iou_loss<B: Backend>(
        &self,
        probabilities: Tensor<B, 4>,
        targets: Tensor<B, 4>,
        weights: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let inter = spatial_sum(probabilities.clone() * targets.clone() * weights.clone());
        let union = spatial_sum((probabilities + targets) * weights);

        let iou = inter.clone().add_scalar(self.smooth) / (union - inter).add_scalar(self.smooth);

        channel_mean(iou.neg().add_scalar(1.0))
    }
}

impl<B: Backend> SegmentationCriterion<B> for WeightedBceIoULoss {
    fn score(&self, masks: Tensor<B, 4>, logits: Tensor<B, 4>) -> Tensor<B, 1> {
        self.forward(logits, masks, Reduction::Auto)
    }
}
