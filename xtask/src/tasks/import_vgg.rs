use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{backend::ndarray::NdArrayDevice, module::Module};
use burn_fcn::{
    Vgg16Config,
    model::{BackboneRecorder, import_torchvision_vgg16},
};
use clap::Args;
use reqwest::blocking::Client;

use super::CpuBackend;

/// ImageNet VGG16 (torchvision weights, timm export).
pub const VGG16_URL: &str =
    "https://huggingface.co/timm/vgg16.tv_in1k/resolve/main/model.safetensors";

#[derive(Args)]
pub struct ImportVggArgs {
    /// Folder receiving `vgg/vgg16.mpk`.
    #[arg(short, long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Local `.safetensors` export to convert instead of downloading one.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    #[arg(long, default_value = VGG16_URL)]
    pub url: String,
}

pub fn run(args: &ImportVggArgs) -> Result<()> {
    let record = import_vgg(&args.data_dir, args.input.as_deref(), &args.url)?;
    println!("VGG16 weights written to {}.mpk", record.display());

    Ok(())
}

/// Path of the backbone record under `data_dir`, without the recorder extension.
pub fn vgg_record_path(data_dir: &Path) -> PathBuf {
    data_dir.join("vgg").join("vgg16")
}

/// Download and convert the ImageNet weights unless `<data_dir>/vgg/vgg16.mpk` already exists.
pub fn maybe_download_pretrained_vgg(data_dir: &Path) -> Result<PathBuf> {
    let record = vgg_record_path(data_dir);
    if record.with_extension("mpk").exists() {
        return Ok(record);
    }

    tracing::info!("Downloading pre-trained vgg model...");
    import_vgg(data_dir, None, VGG16_URL)
}

fn import_vgg(data_dir: &Path, input: Option<&Path>, url: &str) -> Result<PathBuf> {
    let source = match input {
        Some(path) => path.to_path_buf(),
        None => {
            let path = data_dir.join("vgg").join("vgg16.safetensors");
            http_get_to_file_noclobber(url, &path)?;
            path
        }
    };

    let vgg = import_torchvision_vgg16::<CpuBackend, _>(
        &Vgg16Config::new(),
        &source,
        &NdArrayDevice::Cpu,
    )?;

    let record = vgg_record_path(data_dir);
    vgg.save_file(record.clone(), &BackboneRecorder::new())
        .map_err(|e| anyhow::anyhow!("Unable to save {}: {:?}", record.display(), e))?;

    Ok(record)
}

fn http_get_to_file_noclobber(url: &str, out_path: &Path) -> Result<()> {
    if out_path.exists() {
        return Ok(());
    }
    if let Some(dir) = out_path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;
    }

    let mut res = Client::new()
        .get(url)
        .send()
        .with_context(|| format!("GET {url}"))?;
    let status = res.status();
    anyhow::ensure!(status.is_success(), "HTTP {status} for {url}");

    let partial = out_path.with_extension("part");
    let mut file =
        File::create(&partial).with_context(|| format!("open {}", partial.display()))?;
    std::io::copy(&mut res, &mut file).with_context(|| format!("read body: {url}"))?;
    fs::rename(&partial, out_path)
        .with_context(|| format!("rename to {}", out_path.display()))?;

    Ok(())
}
