use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{
    backend::wgpu::WgpuDevice,
    optim::{AdamConfig, decay::WeightDecayConfig},
    tensor::backend::AutodiffBackend,
};
use burn_fcn::{
    FcnVggConfig, KittiRoadDataset, TrainingConfig, Vgg16Config, check_kitti_dataset,
    save_inference_samples, training::train,
};
use clap::Args;

use super::{
    BackendKind, CpuAutodiffBackend, GpuAutodiffBackend, import_vgg::maybe_download_pretrained_vgg,
};

#[derive(Args)]
pub struct TrainArgs {
    /// Folder holding `data_road/` and `vgg/`.
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(short, long, default_value = "./runs")]
    pub runs_dir: PathBuf,

    #[arg(short, long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,

    /// Pretrained VGG16 record, without the `.mpk` extension. Defaults to `<data-dir>/vgg/vgg16`,
    /// downloaded and converted on first use.
    #[arg(long)]
    pub vgg_weights: Option<PathBuf>,

    /// Start from a randomly initialized backbone instead of pretrained weights.
    #[arg(long, default_value_t = false)]
    pub random_init: bool,

    #[arg(short, long, default_value_t = 40)]
    pub epochs: usize,

    #[arg(short, long, default_value_t = 8)]
    pub batch_size: usize,

    #[arg(short, long, default_value_t = 0.001)]
    pub lr: f64,

    #[arg(long, default_value_t = 0.75)]
    pub keep_prob: f64,

    /// L2 penalty applied through Adam weight decay.
    #[arg(long)]
    pub weight_decay: Option<f32>,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 2)]
    pub num_classes: usize,

    #[arg(long, default_value_t = 160)]
    pub image_height: usize,

    #[arg(long, default_value_t = 576)]
    pub image_width: usize,

    #[arg(long, default_value_t = false)]
    pub freeze_backbone: bool,

    #[arg(long, default_value_t = 0.0)]
    pub valid_ratio: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu)]
    pub backend: BackendKind,
}

impl TrainArgs {
    fn training_config(&self) -> TrainingConfig {
        let model = FcnVggConfig::new()
            .with_image_shape([self.image_height, self.image_width])
            .with_num_classes(self.num_classes)
            .with_backbone(Vgg16Config::new().with_keep_prob(self.keep_prob))
            .with_freeze_backbone(self.freeze_backbone);
        let optimizer =
            AdamConfig::new().with_weight_decay(self.weight_decay.map(WeightDecayConfig::new));

        TrainingConfig::new(model, optimizer)
            .with_num_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_learning_rate(self.lr)
            .with_num_workers(self.num_workers)
            .with_seed(self.seed)
            .with_valid_ratio(self.valid_ratio)
    }

    fn vgg_weights(&self) -> Result<PathBuf> {
        match &self.vgg_weights {
            Some(path) => Ok(path.clone()),
            None => maybe_download_pretrained_vgg(&self.data_dir),
        }
    }
}

pub fn run(args: &TrainArgs) -> Result<()> {
    args.backend.announce();

    match args.backend {
        BackendKind::Wgpu => run_with::<GpuAutodiffBackend>(args, WgpuDevice::default()),
        BackendKind::NdArray => run_with::<CpuAutodiffBackend>(args, Default::default()),
    }
}

fn run_with<B: AutodiffBackend>(args: &TrainArgs, device: B::Device) -> Result<()> {
    check_kitti_dataset(&args.data_dir)?;

    let config = args.training_config();

    let model = if args.random_init {
        tracing::warn!("Training from a randomly initialized backbone");
        config.init_model::<B>(&device)
    } else {
        config
            .init_model_with_backbone::<B, _>(args.vgg_weights()?, &device)
            .context("Pretrained VGG16 weights are required, or pass --random-init")?
    };
    model.model_summary();

    let training_dir = args.data_dir.join("data_road").join("training");
    let dataset = KittiRoadDataset::training(&training_dir, config.model.image_shape)?;

    let (model, reports) = train(&args.artifact_dir, &config, dataset, model, &device)?;
    if let Some(last) = reports.last() {
        tracing::info!(
            "Finished {} epochs, final loss {:.3}",
            last.epoch,
            last.total_loss
        );
    }

    tracing::info!("Training Finished.");
    let output_dir = save_inference_samples(
        &args.runs_dir,
        &args.data_dir,
        &model.for_inference(),
        config.model.image_shape,
        &device,
    )?;
    println!("Inference samples written to {}", output_dir.display());

    Ok(())
}
