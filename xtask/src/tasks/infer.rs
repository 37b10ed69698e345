use std::path::PathBuf;

use anyhow::Result;
use burn::{backend::wgpu::WgpuDevice, prelude::Backend};
use burn_fcn::{save_inference_samples, training::load_trained};
use clap::Args;

use super::{BackendKind, CpuBackend, GpuBackend};

#[derive(Args)]
pub struct InferArgs {
    #[arg(short, long, default_value = "artifacts")]
    pub artifact_dir: PathBuf,

    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(short, long, default_value = "./runs")]
    pub runs_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu)]
    pub backend: BackendKind,
}

pub fn run(args: &InferArgs) -> Result<()> {
    args.backend.announce();

    match args.backend {
        BackendKind::Wgpu => run_with::<GpuBackend>(args, WgpuDevice::default()),
        BackendKind::NdArray => run_with::<CpuBackend>(args, Default::default()),
    }
}

fn run_with<B: Backend>(args: &InferArgs, device: B::Device) -> Result<()> {
    let (model, config) = load_trained::<B>(&args.artifact_dir, &device)?;

    let output_dir = save_inference_samples(
        &args.runs_dir,
        &args.data_dir,
        &model,
        config.model.image_shape,
        &device,
    )?;
    println!("Inference samples written to {}", output_dir.display());

    Ok(())
}
