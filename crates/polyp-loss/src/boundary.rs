//! Boundary emphasis weight map.
//!
//! ```text
//! weight = 1 + edge_factor * |avg_pool(mask) - mask|
//! ```
//!
//! The average pool uses stride 1 and "same" padding with padded cells left
//! out of the average, so a window that only sees one class yields exactly 1
//! even at the image border.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::{
        pool::{AvgPool2d, AvgPool2dConfig},
        PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::error::{LossError, LossResult};

/// Configuration for creating a [boundary weight map](BoundaryWeight).
#[derive(Config, Debug)]
pub struct BoundaryWeightConfig {
    /// Side of the square pooling window. Must be odd. Default: 31
    #[config(default = 31)]
    pub kernel_size: usize,

    /// Extra weight given to a pixel whose neighbourhood fully disagrees with it. Default: 5.0
    #[config(default = 5.0)]
    pub edge_factor: f64,
}

impl BoundaryWeightConfig {
    /// Initialize a [boundary weight map](BoundaryWeight).
    pub fn init(&self) -> BoundaryWeight {
        self.try_init().unwrap_or_else(|err| panic!("{err}"))
    }

    /// Initialize a [boundary weight map](BoundaryWeight), or report an invalid value.
    pub fn try_init(&self) -> LossResult<BoundaryWeight> {
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(LossError::invalid_config(format!(
                "Kernel size for BoundaryWeight must be positive and odd, got {}",
                self.kernel_size
            )));
        }
        if self.edge_factor < 0.0 {
            return Err(LossError::invalid_config(format!(
                "Edge factor for BoundaryWeight must be non-negative, got {}",
                self.edge_factor
            )));
        }

        let padding = self.kernel_size / 2;
        let avg_pool = AvgPool2dConfig::new([self.kernel_size, self.kernel_size])
            .with_strides([1, 1])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_count_include_pad(false)
            .init();

        Ok(BoundaryWeight {
            kernel_size: self.kernel_size,
            edge_factor: self.edge_factor,
            avg_pool,
        })
    }
}

/// Per-pixel weights that grow near mask boundaries.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct BoundaryWeight {
    kernel_size: usize,
    edge_factor: f64,
    avg_pool: AvgPool2d,
}

impl Default for BoundaryWeight {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for BoundaryWeight {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("kernel_size", &self.kernel_size)
            .add("edge_factor", &self.edge_factor)
            .optional()
    }
}

impl BoundaryWeight {
    /// Create a boundary weight map with the default window (31) and factor (5).
    pub fn new() -> Self {
        BoundaryWeightConfig::new().init()
    }

    /// The configuration this weight map was built from.
    pub fn config(&self) -> BoundaryWeightConfig {
        BoundaryWeightConfig::new()
            .with_kernel_size(self.kernel_size)
            .with_edge_factor(self.edge_factor)
    }

    /// Side of the square pooling window.
    pub const fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Extra weight given at full disagreement.
    pub const fn edge_factor(&self) -> f64 {
        self.edge_factor
    }

    /// Compute the weight map of a mask.
    ///
    /// # Shapes
    ///
    /// - masks: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, channels, height, width]`
    pub fn forward<B: Backend>(&self, masks: Tensor<B, 4>) -> Tensor<B, 4> {
        let pooled = self.avg_pool.forward(masks.clone());

        (pooled - masks)
            .abs()
            .mul_scalar(self.edge_factor)
            .add_scalar(1.0)
    }
}
