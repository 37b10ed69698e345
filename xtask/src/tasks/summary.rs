use anyhow::Result;
use burn::backend::ndarray::NdArrayDevice;
use burn_fcn::{FcnVggConfig, Vgg16Config};
use clap::Args;

use super::CpuBackend;

#[derive(Args)]
pub struct SummaryArgs {
    #[arg(long, default_value_t = 2)]
    pub num_classes: usize,

    #[arg(long, default_value_t = 160)]
    pub image_height: usize,

    #[arg(long, default_value_t = 576)]
    pub image_width: usize,

    #[arg(long, default_value_t = 64)]
    pub base_channels: usize,

    #[arg(long, default_value_t = 4096)]
    pub fc_channels: usize,
}

pub fn run(args: &SummaryArgs) -> Result<()> {
    let model = FcnVggConfig::new()
        .with_image_shape([args.image_height, args.image_width])
        .with_num_classes(args.num_classes)
        .with_backbone(
            Vgg16Config::new()
                .with_base_channels(args.base_channels)
                .with_fc_channels(args.fc_channels),
        )
        .init::<CpuBackend>(&NdArrayDevice::Cpu);

    println!("{model}");
    let summary = model.model_summary();
    println!(
        "backbone: {}  decoder: {}  total: {}",
        summary.backbone, summary.head, summary.total
    );

    Ok(())
}
