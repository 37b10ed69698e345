pub mod import_vgg;
pub mod infer;
pub mod summary;
pub mod train;

use burn::backend::{Autodiff, NdArray, Wgpu};
use clap::ValueEnum;

pub type GpuBackend = Wgpu<f32, i32>;
pub type CpuBackend = NdArray<f32>;
pub type GpuAutodiffBackend = Autodiff<GpuBackend>;
pub type CpuAutodiffBackend = Autodiff<CpuBackend>;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Wgpu,
    NdArray,
}

impl BackendKind {
    pub fn announce(self) {
        match self {
            BackendKind::Wgpu => tracing::info!("Using the wgpu backend"),
            BackendKind::NdArray => tracing::warn!(
                "No GPU backend selected. Please use a GPU to train your neural network."
            ),
        }
    }
}
