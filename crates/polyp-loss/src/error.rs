use thiserror::Error;

/// The error type for loss construction and evaluation.
///
/// The panicking entry points (`init`, `forward`, `forward_no_reduction`)
/// panic with the `Display` text of these variants; the `try_*` variants
/// return them instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LossError {
    /// Predictions and targets do not have the same shape.
    #[error("Shape of predictions ({predictions:?}) must match targets ({targets:?})")]
    ShapeMismatch {
        /// Shape of the prediction tensor.
        predictions: Vec<usize>,
        /// Shape of the target tensor.
        targets: Vec<usize>,
    },

    /// A configuration value is out of its valid range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Which value is invalid and why.
        reason: String,
    },

    /// The input images cannot be downsampled enough times for multiscale SSIM.
    #[error(
        "Images of {height}x{width} are too small for {scales} SSIM scales \
         with a {filter_size}x{filter_size} filter"
    )]
    ImageTooSmall {
        /// Input height.
        height: usize,
        /// Input width.
        width: usize,
        /// Number of pyramid scales requested.
        scales: usize,
        /// Gaussian filter size.
        filter_size: usize,
    },
}

impl LossError {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for loss operations.
pub type LossResult<T> = Result<T, LossError>;
