//! Burn training-loop integration for the Dice coefficient metric.

use burn::{
    tensor::{backend::Backend, Tensor},
    train::metric::{Metric, MetricEntry, MetricMetadata, Numeric},
};
use derive_new::new;

use crate::{Accumulator, DiceCoefMetric};

/// Dice coefficient metric input.
#[derive(new, Debug, Clone)]
pub struct DiceCoefInput<B: Backend> {
    /// Ground truth with shape `[batch_size, channels, height, width]`.
    pub masks: Tensor<B, 4>,
    /// Raw logits with shape `[batch_size, channels, height, width]`.
    pub logits: Tensor<B, 4>,
}

impl<B: Backend> Metric for DiceCoefMetric<B> {
    type Input = DiceCoefInput<B>;

    fn name(&self) -> String {
        "Dice".to_string()
    }

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        Accumulator::update(self, item.masks.clone(), item.logits.clone());
        let value = self.result();
        MetricEntry::new(self.name(), format!("{value:.5}"), format!("{value:.5}"))
    }

    fn clear(&mut self) {
        self.reset();
    }
}

impl<B: Backend> Numeric for DiceCoefMetric<B> {
    fn value(&self) -> f64 {
        self.result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{mask_logits, square_mask, TestBackend};

    #[test]
    fn dice_metric_numeric_value_tracks_running_total() {
        let mut metric = DiceCoefMetric::<TestBackend>::new();
        let masks = square_mask(8, 2, 2, 4);
        let input = DiceCoefInput::new(masks.clone(), mask_logits(masks, 10.0));

        Accumulator::update(&mut metric, input.masks.clone(), input.logits.clone());
        Accumulator::update(&mut metric, input.masks, input.logits);

        assert_eq!(metric.name(), "Dice");
        assert!((Numeric::value(&metric) - 2.0).abs() < 1e-6);

        Metric::clear(&mut metric);
        assert_eq!(Numeric::value(&metric), 0.0);
    }
}
