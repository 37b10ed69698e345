//! Segmentation Cross Entropy Loss
//!
//! Per-pixel softmax cross entropy, built on the same ideas as burn's `CrossEntropyLoss`
//! with an extra validity mask and handling of the spatial dimensions.

use burn::{
    module::{Content, DisplaySettings, ModuleDisplay},
    prelude::*,
    tensor::activation::log_softmax,
};

/// Configuration to create a [Segmentation Cross-entropy loss](SegmentationCrossEntropyLoss) using the [init function](SegmentationCrossEntropyLossConfig::init).
#[derive(Config, Debug)]
pub struct SegmentationCrossEntropyLossConfig {
    /// Create weighted cross-entropy.
    ///
    /// The loss of a pixel is multiplied by the weight of its label, and the mean is taken over
    /// the summed weights of the valid pixels.
    ///
    /// # Pre-conditions
    ///   - The order of the weight vector should correspond to the label integer assignment.
    pub weights: Option<Vec<f32>>,

    /// Inputs are logits; set to false to pass probabilities.
    #[config(default = true)]
    pub logits: bool,

    /// Label excluded from the loss, e.g. a "don't care" region.
    pub ignore_index: Option<usize>,
}

impl SegmentationCrossEntropyLossConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SegmentationCrossEntropyLoss<B> {
        self.assertions();
        SegmentationCrossEntropyLoss {
            weights: self
                .weights
                .as_ref()
                .map(|e| Tensor::<B, 1>::from_floats(e.as_slice(), device)),
            logits: self.logits,
            ignore_index: self.ignore_index,
        }
    }

    fn assertions(&self) {
        if let Some(weights) = self.weights.as_ref() {
            assert!(
                weights.iter().all(|e| e > &0.),
                "Weights of cross-entropy have to be positive."
            );
        }
    }
}

/// Mean per-pixel cross entropy between class scores and integer labels.
///
/// Should be created using [SegmentationCrossEntropyLossConfig]
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct SegmentationCrossEntropyLoss<B: Backend> {
    /// Weights for cross-entropy.
    pub weights: Option<Tensor<B, 1>>,
    /// Use logits as input.
    pub logits: bool,
    /// Ignore specific index during loss calculation.
    pub ignore_index: Option<usize>,
}

impl<B: Backend> ModuleDisplay for SegmentationCrossEntropyLoss<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("weights", &self.weights)
            .add("logits", &self.logits)
            .add("ignore_index", &self.ignore_index)
            .optional()
    }
}

impl<B: Backend> SegmentationCrossEntropyLoss<B> {
    /// Compute the criterion on the input tensor.
    ///
    /// Returns 0 when no pixel is valid.
    ///
    /// # Shapes
    ///
    /// - predictions: `[batch_size, num_classes, height, width]`
    /// - targets: `[batch_size, 1, height, width]` (integer class indices)
    /// - mask: `[batch_size, 1, height, width]` (true marks pixels that count)
    pub fn forward(
        &self,
        predictions: Tensor<B, 4>,
        targets: Tensor<B, 4, Int>,
        mask: Tensor<B, 4, Bool>,
    ) -> Tensor<B, 1> {
        Self::assertions(&predictions, &targets, &mask);

        let [batch_size, num_classes, height, width] = predictions.dims();
        let pixels = batch_size * height * width;

        let predictions_2d = predictions
            .reshape([batch_size, num_classes, height * width])
            .permute([0, 2, 1])
            .reshape([pixels, num_classes]);
        let targets_1d: Tensor<B, 1, Int> = targets.reshape([pixels]);
        let mask_1d: Tensor<B, 1, Bool> = mask.reshape([pixels]);

        // Ignored labels may be out of range, so point them at class 0 before gathering.
        let (targets_1d, valid) = match self.ignore_index {
            Some(ignore_idx) => {
                let ignored = targets_1d.clone().equal_elem(ignore_idx as i32);
                let kept = targets_1d.clone().not_equal_elem(ignore_idx as i32);
                (
                    targets_1d.mask_fill(ignored, 0),
                    (mask_1d.int() * kept.int()).float(),
                )
            }
            None => (targets_1d, mask_1d.int().float()),
        };

        let log_probs = if self.logits {
            log_softmax(predictions_2d, 1)
        } else {
            predictions_2d.log()
        };

        let neg_log_likelihood = log_probs
            .gather(1, targets_1d.clone().reshape([pixels, 1]))
            .reshape([pixels])
            .neg();

        let pixel_weights = match &self.weights {
            Some(weights) => weights.clone().gather(0, targets_1d) * valid,
            None => valid,
        };

        let total = (neg_log_likelihood * pixel_weights.clone()).sum();
        let denominator = pixel_weights.sum().clamp_min(f32::EPSILON);

        total / denominator
    }

    fn assertions(
        predictions: &Tensor<B, 4>,
        targets: &Tensor<B, 4, Int>,
        mask: &Tensor<B, 4, Bool>,
    ) {
        let [pred_batch, _pred_classes, pred_height, pred_width] = predictions.dims();
        let [target_batch, target_channels, target_height, target_width] = targets.dims();
        let [mask_batch, mask_channels, mask_height, mask_width] = mask.dims();

        assert_eq!(
            pred_batch, target_batch,
            "Batch size mismatch: predictions ({}) vs targets ({})",
            pred_batch, target_batch
        );

        assert_eq!(
            pred_batch, mask_batch,
            "Batch size mismatch: predictions ({}) vs mask ({})",
            pred_batch, mask_batch
        );

        assert_eq!(
            target_channels, 1,
            "Target should have exactly 1 channel, got {}",
            target_channels
        );

        assert_eq!(
            mask_channels, 1,
            "Mask should have exactly 1 channel, got {}",
            mask_channels
        );

        assert!(
            pred_height == target_height && pred_width == target_width,
            "Spatial dimensions mismatch: predictions ({},{}) vs targets ({},{})",
            pred_height,
            pred_width,
            target_height,
            target_width
        );

        assert!(
            pred_height == mask_height && pred_width == mask_width,
            "Spatial dimensions mismatch: predictions ({},{}) vs mask ({},{})",
            pred_height,
            pred_width,
            mask_height,
            mask_width
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn scalar(tensor: Tensor<TestBackend, 1>) -> f32 {
        tensor.into_scalar().elem::<f32>()
    }

    /// Two pixels, two classes. Pixel 0 favours class 0, pixel 1 favours class 1.
    fn predictions(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        Tensor::<TestBackend, 1>::from_floats([2.0, -1.0, 0.0, 3.0], device).reshape([1, 2, 1, 2])
    }

    fn expected_nll(logits: [f32; 2], target: usize) -> f32 {
        let log_sum = logits.iter().map(|l| l.exp()).sum::<f32>().ln();
        log_sum - logits[target]
    }

    #[test]
    fn uniform_logits_give_log_num_classes() {
        let device = Default::default();
        let loss = SegmentationCrossEntropyLossConfig::new().init::<TestBackend>(&device);

        let predictions = Tensor::<TestBackend, 4>::zeros([2, 3, 4, 4], &device);
        let targets = Tensor::<TestBackend, 4, Int>::ones([2, 1, 4, 4], &device);
        let mask = targets.ones_like().bool();

        let value = scalar(loss.forward(predictions, targets, mask));

        assert!((value - 3f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn matches_softmax_cross_entropy_per_pixel() {
        let device = Default::default();
        let loss = SegmentationCrossEntropyLossConfig::new().init::<TestBackend>(&device);

        // Pixel 0 logits (2, 0) with label 1, pixel 1 logits (-1, 3) with label 1.
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 1], &device).reshape([1, 1, 1, 2]);
        let mask = targets.ones_like().bool();

        let value = scalar(loss.forward(predictions(&device), targets, mask));
        let expected = (expected_nll([2.0, 0.0], 1) + expected_nll([-1.0, 3.0], 1)) / 2.0;

        assert!((value - expected).abs() < 1e-5);
    }

    #[test]
    fn masked_pixels_do_not_count() {
        let device = Default::default();
        let loss = SegmentationCrossEntropyLossConfig::new().init::<TestBackend>(&device);

        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 1], &device).reshape([1, 1, 1, 2]);
        let mask = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device)
            .reshape([1, 1, 1, 2])
            .bool();

        let value = scalar(loss.forward(predictions(&device), targets, mask));

        assert!((value - expected_nll([-1.0, 3.0], 1)).abs() < 1e-5);
    }

    #[test]
    fn ignore_index_excludes_out_of_range_labels() {
        let device = Default::default();
        let loss = SegmentationCrossEntropyLossConfig::new()
            .with_ignore_index(Some(255))
            .init::<TestBackend>(&device);

        let targets =
            Tensor::<TestBackend, 1, Int>::from_ints([255, 1], &device).reshape([1, 1, 1, 2]);
        let mask = targets.ones_like().bool();

        let value = scalar(loss.forward(predictions(&device), targets, mask));

        assert!((value - expected_nll([-1.0, 3.0], 1)).abs() < 1e-5);
    }

    #[test]
    fn no_valid_pixels_gives_zero() {
        let device = Default::default();
        let loss = SegmentationCrossEntropyLossConfig::new().init::<TestBackend>(&device);

        let targets = Tensor::<TestBackend, 4, Int>::zeros([1, 1, 1, 2], &device);
        let mask = targets.clone().bool();

        let value = scalar(loss.forward(predictions(&device), targets, mask));

        assert_eq!(value, 0.0);
    }

    #[test]
    fn weights_rescale_per_class() {
        let device = Default::default();
        let loss = SegmentationCrossEntropyLossConfig::new()
            .with_weights(Some(vec![1.0, 3.0]))
            .init::<TestBackend>(&device);

        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device).reshape([1, 1, 1, 2]);
        let mask = targets.ones_like().bool();

        let value = scalar(loss.forward(predictions(&device), targets, mask));
        let expected =
            (expected_nll([2.0, 0.0], 0) + 3.0 * expected_nll([-1.0, 3.0], 1)) / (1.0 + 3.0);

        assert!((value - expected).abs() < 1e-5);
    }

    #[test]
    fn probabilities_match_logits_after_softmax() {
        let device = Default::default();
        let from_logits = SegmentationCrossEntropyLossConfig::new().init::<TestBackend>(&device);
        let from_probabilities = SegmentationCrossEntropyLossConfig::new()
            .with_logits(false)
            .init::<TestBackend>(&device);

        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1], &device).reshape([1, 1, 1, 2]);
        let mask = targets.ones_like().bool();
        let probabilities = burn::tensor::activation::softmax(predictions(&device), 1);

        let expected = scalar(from_logits.forward(predictions(&device), targets.clone(), mask.clone()));
        let value = scalar(from_probabilities.forward(probabilities, targets, mask));

        assert!((value - expected).abs() < 1e-5);
    }

    #[test]
    #[should_panic(expected = "Target should have exactly 1 channel")]
    fn rejects_one_hot_targets() {
        let device = Default::default();
        let loss = SegmentationCrossEntropyLossConfig::new().init::<TestBackend>(&device);

        let targets = Tensor::<TestBackend, 4, Int>::zeros([1, 2, 1, 2], &device);
        let mask = Tensor::<TestBackend, 4, Int>::ones([1, 1, 1, 2], &device).bool();

        loss.forward(predictions(&device), targets, mask);
    }
}
