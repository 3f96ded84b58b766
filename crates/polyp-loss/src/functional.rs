//! Reductions and the weighted BCE kernel shared by the composite losses.

use burn::tensor::{backend::Backend, Tensor};

/// Sum over the spatial dimensions: `[B, C, H, W] -> [B, C]`.
pub(crate) fn spatial_sum<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch_size, channels, _, _] = tensor.dims();
    let reduced = tensor.sum_dim(3).sum_dim(2);
    reduced.reshape([batch_size, channels])
}

/// Mean over the spatial dimensions: `[B, C, H, W] -> [B, C]`.
pub(crate) fn spatial_mean<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch_size, channels, _, _] = tensor.dims();
    let reduced = tensor.mean_dim(3).mean_dim(2);
    reduced.reshape([batch_size, channels])
}

/// Mean over channels: `[B, C] -> [B]`.
pub(crate) fn channel_mean<B: Backend>(tensor: Tensor<B, 2>) -> Tensor<B, 1> {
    tensor.mean_dim(1).squeeze(1)
}

/// Elementwise binary cross-entropy computed from logits.
///
/// Uses `max(x, 0) - x*y + ln(1 + exp(-|x|))`, which never overflows.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 4> {
    let term1 = logits.clone().clamp_min(0.0) - logits.clone() * targets;
    let term2 = (-logits.abs()).exp().add_scalar(1.0).log();
    term1 + term2
}

/// Weighted mean of the BCE over `(H, W)`, averaged over channels.
///
/// # Shapes
///
/// - logits, targets, weights: `[batch_size, channels, height, width]`
/// - output: `[batch_size]`
pub(crate) fn weighted_bce_with_logits<B: Backend>(
    logits: Tensor<B, 4>,
    targets: Tensor<B, 4>,
    weights: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let bce = bce_with_logits(logits, targets) * weights.clone();

    // Weights are >= 1 everywhere, so the denominator is never zero.
    channel_mean(spatial_sum(bce) / spatial_sum(weights))
}
