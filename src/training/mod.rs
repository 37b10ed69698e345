pub mod learner;
pub mod loss;
pub mod metrics;
pub mod trainer;

pub use learner::SegmentationOutput;
pub use loss::{SegmentationCrossEntropyLoss, SegmentationCrossEntropyLossConfig};
pub use metrics::{
    MeanIoUMetric, PixelAccuracyMetric, SegmentationMetricInput, SegmentationMetrics,
};
pub use trainer::{EpochReport, TrainingConfig, ValidationReport, evaluate, load_trained, train};
