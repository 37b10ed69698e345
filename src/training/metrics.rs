use std::marker::PhantomData;

use burn::prelude::*;
use burn::train::metric::state::{FormatOptions, NumericMetricState};
use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use derive_new::new;

/// Confusion counts accumulated over batches of argmax predictions.
#[derive(Debug, Clone)]
pub struct SegmentationMetrics {
    intersections: Vec<f64>,
    unions: Vec<f64>,
    correct: f64,
    total: f64,
}

impl SegmentationMetrics {
    pub fn new(num_classes: usize) -> Self {
        Self {
            intersections: vec![0.0; num_classes],
            unions: vec![0.0; num_classes],
            correct: 0.0,
            total: 0.0,
        }
    }

    /// Add a batch of logits `[batch, num_classes, height, width]` and labels `[batch, 1, height, width]`.
    pub fn update<B: Backend>(&mut self, logits: Tensor<B, 4>, targets: Tensor<B, 4, Int>) {
        let predictions = logits.argmax(1);

        self.correct += predictions
            .clone()
            .equal(targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<f64>();
        self.total += targets.dims().iter().product::<usize>() as f64;

        for class_idx in 0..self.intersections.len() {
            let target_mask = targets.clone().equal_elem(class_idx as i64).int();
            let pred_mask = predictions.clone().equal_elem(class_idx as i64).int();

            let intersection = (target_mask.clone() * pred_mask.clone())
                .sum()
                .into_scalar()
                .elem::<f64>();
            let union = target_mask.sum().into_scalar().elem::<f64>()
                + pred_mask.sum().into_scalar().elem::<f64>()
                - intersection;

            self.intersections[class_idx] += intersection;
            self.unions[class_idx] += union;
        }
    }

    /// IoU per class, `None` for classes absent from both predictions and labels.
    pub fn class_iou(&self) -> Vec<Option<f64>> {
        self.intersections
            .iter()
            .zip(&self.unions)
            .map(|(&intersection, &union)| (union > 0.0).then(|| intersection / union))
            .collect()
    }

    pub fn mean_iou(&self) -> f64 {
        let ious: Vec<f64> = self.class_iou().into_iter().flatten().collect();
        if ious.is_empty() {
            0.0
        } else {
            ious.iter().sum::<f64>() / ious.len() as f64
        }
    }

    pub fn pixel_accuracy(&self) -> f64 {
        if self.total > 0.0 {
            self.correct / self.total
        } else {
            0.0
        }
    }
}

/// Logits and labels of one batch, as read by [MeanIoUMetric] and [PixelAccuracyMetric].
#[derive(new)]
pub struct SegmentationMetricInput<B: Backend> {
    output: Tensor<B, 4>,
    targets: Tensor<B, 4, Int>,
}

impl<B: Backend> SegmentationMetricInput<B> {
    fn batch_metrics(&self) -> (usize, SegmentationMetrics) {
        let [batch_size, num_classes, _, _] = self.output.dims();
        let mut metrics = SegmentationMetrics::new(num_classes);
        metrics.update(self.output.clone(), self.targets.clone());

        (batch_size, metrics)
    }
}

/// Mean IoU for the burn-train learner, in percent.
#[derive(Default)]
pub struct MeanIoUMetric<B: Backend> {
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> MeanIoUMetric<B> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Metric for MeanIoUMetric<B> {
    type Input = SegmentationMetricInput<B>;
    const NAME: &'static str = "Mean IoU";

    fn update(
        &mut self,
        input: &SegmentationMetricInput<B>,
        _metadata: &MetricMetadata,
    ) -> MetricEntry {
        let (batch_size, metrics) = input.batch_metrics();

        self.state.update(
            100.0 * metrics.mean_iou(),
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset()
    }
}

impl<B: Backend> Numeric for MeanIoUMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

/// Fraction of correctly classified pixels for the burn-train learner, in percent.
#[derive(Default)]
pub struct PixelAccuracyMetric<B: Backend> {
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> PixelAccuracyMetric<B> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Metric for PixelAccuracyMetric<B> {
    type Input = SegmentationMetricInput<B>;
    const NAME: &'static str = "Pixel Accuracy";

    fn update(
        &mut self,
        input: &SegmentationMetricInput<B>,
        _metadata: &MetricMetadata,
    ) -> MetricEntry {
        let (batch_size, metrics) = input.batch_metrics();

        self.state.update(
            100.0 * metrics.pixel_accuracy(),
            batch_size,
            FormatOptions::new(Self::NAME).unit("%").precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset()
    }
}

impl<B: Backend> Numeric for PixelAccuracyMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}
