use burn::{
    backend::NdArray,
    prelude::*,
    train::metric::{Adaptor, ItemLazy, LossInput},
};
use derive_new::new;

use super::metrics::SegmentationMetricInput;

/// Result of one forward pass over a [SegmentationBatch](crate::dataset::SegmentationBatch).
#[derive(new, Debug)]
pub struct SegmentationOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    /// Per-pixel class logits.
    pub output: Tensor<B, 4>,
    pub targets: Tensor<B, 4, Int>,
}

impl<B: Backend> SegmentationOutput<B> {
    pub fn loss_value(&self) -> f64 {
        self.loss.clone().into_scalar().elem::<f64>()
    }
}

impl<B: Backend> ItemLazy for SegmentationOutput<B> {
    type ItemSync = SegmentationOutput<NdArray>;

    fn sync(self) -> Self::ItemSync {
        let device = &Default::default();

        SegmentationOutput {
            loss: Tensor::from_data(self.loss.into_data(), device),
            output: Tensor::from_data(self.output.into_data(), device),
            targets: Tensor::from_data(self.targets.into_data(), device),
        }
    }
}

impl<B: Backend> Adaptor<LossInput<B>> for SegmentationOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}

impl<B: Backend> Adaptor<SegmentationMetricInput<B>> for SegmentationOutput<B> {
    fn adapt(&self) -> SegmentationMetricInput<B> {
        SegmentationMetricInput::new(self.output.clone(), self.targets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn adapts_to_loss_and_metric_inputs() {
        let device = Default::default();
        let output = SegmentationOutput::<TestBackend>::new(
            Tensor::from_floats([0.25], &device),
            Tensor::zeros([1, 2, 1, 4], &device),
            Tensor::zeros([1, 1, 1, 4], &device),
        );

        let _: LossInput<TestBackend> = output.adapt();
        let _: SegmentationMetricInput<TestBackend> = output.adapt();
        let synced = output.sync();

        assert_eq!(synced.output.dims(), [1, 2, 1, 4]);
        assert_eq!(synced.loss_value(), 0.25);
    }
}
