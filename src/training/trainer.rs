use std::path::Path;
use std::sync::Arc;

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::{
            Dataset,
            transform::{PartialDataset, ShuffledDataset},
        },
    },
    optim::{AdamConfig, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{TrainStep, ValidStep},
};

use super::metrics::SegmentationMetrics;
use crate::{
    dataset::{SegmentationBatch, SegmentationBatcher, SegmentationItem},
    error::{FcnError, FcnResult},
    model::{FcnVgg, FcnVggConfig},
};

const CONFIG_FILE: &str = "config.json";
const MODEL_FILE: &str = "model";

#[derive(Config)]
pub struct TrainingConfig {
    pub model: FcnVggConfig,
    pub optimizer: AdamConfig,
    #[config(default = 40)]
    pub num_epochs: usize,
    #[config(default = 8)]
    pub batch_size: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Fraction of the training items held out for per-epoch validation.
    #[config(default = 0.0)]
    pub valid_ratio: f64,
}

impl TrainingConfig {
    /// Seed the backend, then build the model with a randomly initialized backbone.
    pub fn init_model<B: Backend>(&self, device: &B::Device) -> FcnVgg<B> {
        B::seed(self.seed);
        self.model.init(device)
    }

    /// Seed the backend, then build the model on top of pretrained VGG16 weights.
    pub fn init_model_with_backbone<B: Backend, P: AsRef<Path>>(
        &self,
        weights: P,
        device: &B::Device,
    ) -> FcnResult<FcnVgg<B>> {
        B::seed(self.seed);
        self.model.init_with_backbone(weights, device)
    }

    fn validate(&self) -> FcnResult<()> {
        if self.batch_size == 0 {
            return Err(FcnError::Config("batch size must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.valid_ratio) {
            return Err(FcnError::Config(format!(
                "validation ratio must be in [0, 1), got {}",
                self.valid_ratio
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub loss: f64,
    pub mean_iou: f64,
    pub pixel_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    /// Sum of the mean batch losses over the epoch.
    pub total_loss: f64,
    pub batches: usize,
    pub valid: Option<ValidationReport>,
}

/// Fine-tune `model` on `dataset`, then write the checkpoint and config into `artifact_dir`.
pub fn train<B, D>(
    artifact_dir: &Path,
    config: &TrainingConfig,
    dataset: D,
    model: FcnVgg<B>,
    device: &B::Device,
) -> FcnResult<(FcnVgg<B>, Vec<EpochReport>)>
where
    B: AutodiffBackend,
    D: Dataset<SegmentationItem> + 'static,
{
    config.validate()?;
    std::fs::create_dir_all(artifact_dir).map_err(|e| FcnError::io(artifact_dir, e))?;
    let config_path = artifact_dir.join(CONFIG_FILE);
    config
        .save(&config_path)
        .map_err(|e| FcnError::io(config_path, e))?;

    B::seed(config.seed);

    let dataset = Arc::new(ShuffledDataset::<D, SegmentationItem>::with_seed(
        dataset,
        config.seed,
    ));
    let total = dataset.len();
    let num_valid = (total as f64 * config.valid_ratio).round() as usize;
    let num_train = total - num_valid;
    if num_train == 0 {
        return Err(FcnError::Dataset("no training items left".to_string()));
    }
    tracing::info!("Training on {} items, validating on {}", num_train, num_valid);

    let image_shape = config.model.image_shape;
    let train_split = PartialDataset::new(dataset.clone(), 0, num_train);

    let mut builder = DataLoaderBuilder::new(SegmentationBatcher::<B>::new(
        device.clone(),
        image_shape,
    ))
    .batch_size(config.batch_size)
    .shuffle(config.seed);
    if config.num_workers > 0 {
        builder = builder.num_workers(config.num_workers);
    }
    let dataloader_train = builder.build(train_split);

    let dataloader_valid = (num_valid > 0).then(|| {
        let valid_split = PartialDataset::new(dataset.clone(), num_train, total);
        DataLoaderBuilder::new(SegmentationBatcher::<B::InnerBackend>::new(
            device.clone(),
            image_shape,
        ))
        .batch_size(config.batch_size)
        .build(valid_split)
    });

    let mut optimizer = config.optimizer.init::<B, FcnVgg<B>>();
    let mut model = model;
    let mut reports = Vec::with_capacity(config.num_epochs);

    for epoch in 1..=config.num_epochs {
        let mut total_loss = 0.0;
        let mut batches = 0;

        for batch in dataloader_train.iter() {
            let output = TrainStep::step(&model, batch);
            total_loss += output.item.loss_value();
            batches += 1;

            model = optimizer.step(config.learning_rate, model, output.grads);
        }

        tracing::info!("EPOCH {} - Loss = {:.3}", epoch, total_loss);

        let valid = dataloader_valid.as_ref().map(|dataloader| {
            let report = evaluate(&model.for_inference(), dataloader.as_ref());
            tracing::info!(
                "EPOCH {} - Valid loss = {:.3}, mean IoU = {:.2}%, pixel accuracy = {:.2}%",
                epoch,
                report.loss,
                100.0 * report.mean_iou,
                100.0 * report.pixel_accuracy
            );
            report
        });

        reports.push(EpochReport {
            epoch,
            total_loss,
            batches,
            valid,
        });
    }

    model
        .clone()
        .save_file(artifact_dir.join(MODEL_FILE), &CompactRecorder::new())?;
    tracing::info!("Saved checkpoint to {}", artifact_dir.display());

    Ok((model, reports))
}

/// Mean loss, mean IoU and pixel accuracy of `model` over every batch of `dataloader`.
pub fn evaluate<B: Backend>(
    model: &FcnVgg<B>,
    dataloader: &dyn DataLoader<SegmentationBatch<B>>,
) -> ValidationReport {
    let mut metrics = SegmentationMetrics::new(model.num_classes());
    let mut total_loss = 0.0;
    let mut batches = 0;

    for batch in dataloader.iter() {
        let output = ValidStep::step(model, batch);
        total_loss += output.loss_value();
        batches += 1;
        metrics.update(output.output, output.targets);
    }

    ValidationReport {
        loss: if batches > 0 {
            total_loss / batches as f64
        } else {
            0.0
        },
        mean_iou: metrics.mean_iou(),
        pixel_accuracy: metrics.pixel_accuracy(),
    }
}

/// Restore the config and weights written by [train].
pub fn load_trained<B: Backend>(
    artifact_dir: &Path,
    device: &B::Device,
) -> FcnResult<(FcnVgg<B>, TrainingConfig)> {
    let config_path = artifact_dir.join(CONFIG_FILE);
    let config = TrainingConfig::load(&config_path).map_err(|e| {
        FcnError::Config(format!("unable to load {}: {:?}", config_path.display(), e))
    })?;

    let model = config.model.init::<B>(device).load_file(
        artifact_dir.join(MODEL_FILE),
        &CompactRecorder::new(),
        device,
    )?;

    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vgg16Config;
    use burn::{
        backend::{Autodiff, NdArray},
        data::dataset::InMemDataset,
        module::{ModuleVisitor, ParamId},
    };

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    fn tiny_config() -> TrainingConfig {
        TrainingConfig::new(
            FcnVggConfig::new()
                .with_image_shape([32, 32])
                .with_backbone(Vgg16Config::new().with_base_channels(2).with_fc_channels(4)),
            AdamConfig::new(),
        )
        .with_num_epochs(2)
        .with_batch_size(2)
        .with_num_workers(0)
    }

    fn items(count: usize) -> InMemDataset<SegmentationItem> {
        InMemDataset::new(
            (0..count)
                .map(|i| SegmentationItem {
                    name: format!("{i}.png"),
                    image: (0..32 * 32 * 3).map(|p| ((p + i) % 256) as u8).collect(),
                    mask: (0..32 * 32).map(|p| (p % 32 >= 16) as u8).collect(),
                })
                .collect(),
        )
    }

    /// Road on the bottom three quarters, brighter than the background.
    fn learnable_items(count: usize) -> InMemDataset<SegmentationItem> {
        InMemDataset::new(
            (0..count)
                .map(|i| SegmentationItem {
                    name: format!("{i}.png"),
                    image: (0..32 * 32 * 3)
                        .map(|p| if p / (32 * 3) >= 8 { 3 } else { 1 })
                        .collect(),
                    mask: (0..32 * 32).map(|p| (p / 32 >= 8) as u8).collect(),
                })
                .collect(),
        )
    }

    fn learnable_config() -> TrainingConfig {
        TrainingConfig::new(
            FcnVggConfig::new().with_image_shape([32, 32]).with_backbone(
                Vgg16Config::new()
                    .with_base_channels(2)
                    .with_fc_channels(4)
                    .with_keep_prob(1.0),
            ),
            AdamConfig::new(),
        )
        .with_num_epochs(6)
        .with_batch_size(2)
        .with_learning_rate(1e-2)
        .with_num_workers(0)
    }

    struct FloatParams(Vec<f32>);

    impl<B: Backend> ModuleVisitor<B> for FloatParams {
        fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
            self.0
                .extend(tensor.to_data().convert::<f32>().to_vec::<f32>().unwrap());
        }
    }

    fn float_params<B: Backend, M: Module<B>>(module: &M) -> Vec<f32> {
        let mut params = FloatParams(Vec::new());
        module.visit(&mut params);
        params.0
    }

    fn max_abs_diff(lhs: &[f32], rhs: &[f32]) -> f32 {
        assert_eq!(lhs.len(), rhs.len());
        lhs.iter()
            .zip(rhs)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn loss_decreases_on_learnable_data() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let config = learnable_config();
        let model = config.init_model::<TestAutodiffBackend>(&device);

        let (_, reports) = train(dir.path(), &config, learnable_items(4), model, &device).unwrap();

        let first = reports.first().unwrap().total_loss;
        let last = reports.last().unwrap().total_loss;
        assert!(
            last < first,
            "loss should decrease, first epoch {first}, last epoch {last}"
        );
    }

    #[test]
    fn checkpoint_holds_the_trained_weights() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let config = learnable_config().with_num_epochs(2);
        let model = config.init_model::<TestAutodiffBackend>(&device);
        let initial = float_params(&model.for_inference());

        let (trained, _) = train(dir.path(), &config, learnable_items(4), model, &device).unwrap();
        let trained = float_params(&trained.for_inference());
        let (restored, _) = load_trained::<TestBackend>(dir.path(), &device).unwrap();
        let restored = float_params(&restored);

        assert!(max_abs_diff(&initial, &trained) > 1e-3);
        // Checkpoints are stored at half precision.
        for (t, r) in trained.iter().zip(&restored) {
            assert!((t - r).abs() <= 1e-2 * (1.0 + t.abs()), "{t} vs {r}");
        }
    }

    #[test]
    fn frozen_backbone_is_left_untouched() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let mut config = learnable_config().with_num_epochs(2);
        config.model = config.model.clone().with_freeze_backbone(true);
        let model = config.init_model::<TestAutodiffBackend>(&device);
        let backbone_before = float_params(model.backbone());
        let head_before = float_params(model.head());

        let (trained, _) = train(dir.path(), &config, learnable_items(4), model, &device).unwrap();

        assert_eq!(float_params(trained.backbone()), backbone_before);
        assert!(max_abs_diff(&float_params(trained.head()), &head_before) > 1e-3);
    }

    #[test]
    fn reports_every_epoch_and_writes_artifacts() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config();
        let model = config.model.init::<TestAutodiffBackend>(&device);

        let (_, reports) = train(dir.path(), &config, items(3), model, &device).unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].epoch, 1);
        assert_eq!(reports[1].epoch, 2);
        for report in &reports {
            assert_eq!(report.batches, 2);
            assert!(report.total_loss.is_finite());
            assert!(report.valid.is_none());
        }
        assert!(dir.path().join("config.json").exists());

        let (restored, restored_config) = load_trained::<TestBackend>(dir.path(), &device).unwrap();
        assert_eq!(restored_config.num_epochs, 2);
        assert_eq!(restored.num_classes(), 2);
    }

    #[test]
    fn holds_out_a_validation_split() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config().with_num_epochs(1).with_valid_ratio(0.25);
        let model = config.model.init::<TestAutodiffBackend>(&device);

        let (_, reports) = train(dir.path(), &config, items(4), model, &device).unwrap();

        assert_eq!(reports[0].batches, 2);
        let valid = reports[0].valid.as_ref().unwrap();
        assert!(valid.loss.is_finite());
        assert!((0.0..=1.0).contains(&valid.mean_iou));
        assert!((0.0..=1.0).contains(&valid.pixel_accuracy));
    }

    #[test]
    fn rejects_invalid_ratio() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config().with_valid_ratio(1.0);
        let model = config.model.init::<TestAutodiffBackend>(&device);

        let result = train(dir.path(), &config, items(2), model, &device);

        assert!(matches!(result, Err(FcnError::Config(_))));
    }
}
