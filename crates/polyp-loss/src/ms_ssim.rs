//! Multiscale SSIM loss.
//!
//! ```text
//! luminance_s = (2*μx*μy + C1) / (μx² + μy² + C1)
//! cs_s        = (2*σxy + C2) / (σx² + σy² + C2)
//! MS-SSIM     = Π_{s<S} relu(mean(cs_s))^β_s * relu(mean(luminance_S * cs_S))^β_S
//! Loss        = 1 - MS-SSIM
//! ```
//!
//! Local statistics use an unpadded Gaussian window. Between scales the
//! images are padded to even size by repeating their last row/column and
//! halved with a 2x2 average pool.

use core::fmt;

use burn::{
    config::Config,
    nn::{
        loss::Reduction,
        pool::{AvgPool2d, AvgPool2dConfig},
    },
    tensor::{
        activation::sigmoid, backend::Backend, module::conv2d, ops::ConvOptions, s, Tensor,
    },
};

use crate::{
    error::{LossError, LossResult},
    functional::{channel_mean, spatial_mean},
    shape::check_same_shape,
    SegmentationCriterion,
};

/// Configuration for creating a [multiscale SSIM loss](MsSsimLoss).
#[derive(Config, Debug)]
pub struct MsSsimLossConfig {
    /// Dynamic range of the inputs. Default: 1.0
    #[config(default = 1.0)]
    pub max_value: f64,

    /// Size of the Gaussian window. Default: 11
    #[config(default = 11)]
    pub filter_size: usize,

    /// Sigma of the Gaussian window. Default: 1.5
    #[config(default = 1.5)]
    pub filter_sigma: f64,

    /// Luminance stability factor, `C1 = (k1 * max_value)²`. Default: 0.01
    #[config(default = 0.01)]
    pub k1: f64,

    /// Contrast stability factor, `C2 = (k2 * max_value)²`. Default: 0.03
    #[config(default = 0.03)]
    pub k2: f64,

    /// Exponent of each scale, finest first. The number of scales is the number of factors.
    #[config(default = "vec![0.0448, 0.2856, 0.3001, 0.2363, 0.1333]")]
    pub power_factors: Vec<f64>,

    /// Compare masks against `sigmoid(predictions)` instead of the raw values. Default: false
    #[config(default = false)]
    pub apply_sigmoid: bool,
}

impl MsSsimLossConfig {
    /// Initialize [multiscale SSIM loss](MsSsimLoss).
    pub fn init(&self) -> MsSsimLoss {
        self.try_init().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Initialize [multiscale SSIM loss](MsSsimLoss), or report an invalid value.
    pub fn try_init(&self) -> LossResult<MsSsimLoss> {
        if self.max_value <= 0.0 {
            return Err(LossError::invalid_config(format!(
                "Max value for MsSsimLoss must be positive, got {}",
                self.max_value
            )));
        }
        if self.filter_size == 0 || self.filter_size % 2 == 0 {
            return Err(LossError::invalid_config(format!(
                "Filter size for MsSsimLoss must be positive and odd, got {}",
                self.filter_size
            )));
        }
        if self.filter_sigma <= 0.0 {
            return Err(LossError::invalid_config(format!(
                "Filter sigma for MsSsimLoss must be positive, got {}",
                self.filter_sigma
            )));
        }
        if self.k1 <= 0.0 || self.k2 <= 0.0 {
            return Err(LossError::invalid_config(format!(
                "K1 and K2 for MsSsimLoss must be positive, got {} and {}",
                self.k1, self.k2
            )));
        }
        if self.power_factors.is_empty() || self.power_factors.iter().any(|&p| p < 0.0) {
            return Err(LossError::invalid_config(format!(
                "Power factors for MsSsimLoss must be non-empty and non-negative, got {:?}",
                self.power_factors
            )));
        }

        tracing::debug!(config = ?self, "multiscale SSIM loss initialized");

        Ok(MsSsimLoss {
            max_value: self.max_value,
            filter_size: self.filter_size,
            filter_sigma: self.filter_sigma,
            k1: self.k1,
            k2: self.k2,
            power_factors: self.power_factors.clone(),
            apply_sigmoid: self.apply_sigmoid,
            downsample: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        })
    }
}

/// Multiscale structural similarity loss (`1 - MS-SSIM`).
#[derive(Clone, Debug)]
pub struct MsSsimLoss {
    max_value: f64,
    filter_size: usize,
    filter_sigma: f64,
    k1: f64,
    k2: f64,
    power_factors: Vec<f64>,
    apply_sigmoid: bool,
    downsample: AvgPool2d,
}

impl Default for MsSsimLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MsSsimLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MsSsimLoss {{max_value: {}, filter_size: {}, filter_sigma: {}, k1: {}, k2: {}, \
             power_factors: {:?}, apply_sigmoid: {}}}",
            self.max_value,
            self.filter_size,
            self.filter_sigma,
            self.k1,
            self.k2,
            self.power_factors,
            self.apply_sigmoid
        )
    }
}

impl MsSsimLoss {
    /// Create a new multiscale SSIM loss with default configuration.
    pub fn new() -> Self {
        MsSsimLossConfig::new().init()
    }

    /// The configuration this loss was built from.
    pub fn config(&self) -> MsSsimLossConfig {
        MsSsimLossConfig::new()
            .with_max_value(self.max_value)
            .with_filter_size(self.filter_size)
            .with_filter_sigma(self.filter_sigma)
            .with_k1(self.k1)
            .with_k2(self.k2)
            .with_power_factors(self.power_factors.clone())
            .with_apply_sigmoid(self.apply_sigmoid)
    }

    /// Compute the criterion on the input tensor with reduction.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, channels, height, width]`
    /// - targets: `[batch_size, channels, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let loss = self.forward_no_reduction(predictions, targets);
        match reduction {
            Reduction::Mean | Reduction::Auto => loss.mean(),
            Reduction::Sum => loss.sum(),
        }
    }

    /// Compute the criterion on the input tensor without reduction.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, channels, height, width]`
    /// - targets: `[batch_size, channels, height, width]`
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
    /// an error on mismatched shapes or images too small for the pyramid.
    pub fn try_forward_no_reduction<B: Backend>(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4>,
    ) -> LossResult<Tensor<B, 1>> {
        check_same_shape(predictions.dims(), targets.dims())?;

        let predictions = if self.apply_sigmoid {
            sigmoid(predictions)
        } else {
            predictions
        };

        Ok(self.ms_ssim(targets, predictions)?.neg().add_scalar(1.0))
    }

    /// Multiscale SSIM per example, averaged over channels.
    ///
    /// Returns [`LossError::ImageTooSmall`] when the coarsest scale is smaller
    /// than the Gaussian window.
    ///
    /// # Shapes
    ///
    /// - x, y: `[batch_size, channels, height, width]`
    /// - output: `[batch_size]`
    pub fn ms_ssim<B: Backend>(
        &self,
        x: Tensor<B, 4>,
        y: Tensor<B, 4>,
    ) -> LossResult<Tensor<B, 1>> {
        check_same_shape(x.dims(), y.dims())?;
        let [batch_size, channels, height, width] = x.dims();
        self.check_size(height, width)?;

        let device = x.device();
        let window = self.gaussian_window::<B>(channels, &device);
        let last = self.power_factors.len() - 1;

        let mut x = x;
        let mut y = y;
        let mut product = Tensor::<B, 2>::ones([batch_size, channels], &device);

        for (scale, &power) in self.power_factors.iter().enumerate() {
            if scale > 0 {
                x = self.downsample.forward(pad_to_even(x));
                y = self.downsample.forward(pad_to_even(y));
            }

            let (luminance, cs) = self.similarity_maps(x.clone(), y.clone(), window.clone());
            let term = if scale == last {
                spatial_mean(luminance * cs)
            } else {
                spatial_mean(cs)
            };

            product = product * term.clamp_min(0.0).powf_scalar(power);
        }

        Ok(channel_mean(product))
    }

    /// Luminance and contrast-structure maps at one scale.
    fn similarity_maps<B: Backend>(
        &self,
        x: Tensor<B, 4>,
        y: Tensor<B, 4>,
        window: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let [_, channels, _, _] = x.dims();
        let c1 = (self.k1 * self.max_value).powi(2);
        let c2 = (self.k2 * self.max_value).powi(2);

        let filter = |input: Tensor<B, 4>| {
            conv2d(
                input,
                window.clone(),
                None,
                ConvOptions::new([1, 1], [0, 0], [1, 1], channels),
            )
        };

        let mean_x = filter(x.clone());
        let mean_y = filter(y.clone());

        let num0 = mean_x.clone() * mean_y.clone() * 2.0;
        let den0 = mean_x.powf_scalar(2.0) + mean_y.powf_scalar(2.0);
        let luminance = (num0.clone() + c1) / (den0.clone() + c1);

        let num1 = filter(x.clone() * y.clone()) * 2.0;
        let den1 = filter(x.powf_scalar(2.0) + y.powf_scalar(2.0));
        let cs = (num1 - num0 + c2) / (den1 - den0 + c2);

        (luminance, cs)
    }

    /// Normalized Gaussian window, `[channels, 1, filter_size, filter_size]`.
    fn gaussian_window<B: Backend>(&self, channels: usize, device: &B::Device) -> Tensor<B, 4> {
        let size = self.filter_size;
        let center = (size - 1) as f64 / 2.0;
        let two_sigma_sq = 2.0 * self.filter_sigma * self.filter_sigma;

        let gauss_1d: Vec<f64> = (0..size)
            .map(|i| {
                let d = i as f64 - center;
                (-d * d / two_sigma_sq).exp()
            })
            .collect();
        let sum: f64 = gauss_1d.iter().sum();

        let mut kernel = Vec::with_capacity(size * size);
        for row in &gauss_1d {
            for col in &gauss_1d {
                kernel.push((row * col / (sum * sum)) as f32);
            }
        }

        Tensor::<B, 1>::from_floats(kernel.as_slice(), device)
            .reshape([1, 1, size, size])
            .repeat(&[channels, 1, 1, 1])
    }

    fn check_size(&self, height: usize, width: usize) -> LossResult<()> {
        let scales = self.power_factors.len();
        let (mut h, mut w) = (height, width);
        for _ in 1..scales {
            h = h.div_ceil(2);
            w = w.div_ceil(2);
        }

        if h < self.filter_size || w < self.filter_size {
            return Err(LossError::ImageTooSmall {
                height,
                width,
                scales,
                filter_size: self.filter_size,
            });
        }
        Ok(())
    }
}

/// Repeats the last row/column so both spatial dims are even.
fn pad_to_even<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();

    let x = if height % 2 == 1 {
        let last = x.clone().slice(s![.., .., height - 1..height, ..]);
        Tensor::cat(vec![x, last], 2)
    } else {
        x
    };

    if width % 2 == 1 {
        let last = x.clone().slice(s![.., .., .., width - 1..width]);
        Tensor::cat(vec![x, last], 3)
    } else {
        x
    }
}

impl<B: Backend> SegmentationCriterion<B> for MsSsimLoss {
    fn score(&self, masks: Tensor<B, 4>, logits: Tensor<B, 4>) -> Tensor<B, 1> {
        self.forward(logits, masks, Reduction::Auto)
    }
}
