use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod tasks;

#[derive(Parser)]
#[command(
    name = "burn-fcn",
    about = "FCN-VGG road segmentation toolkit",
    author,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fine-tune on KITTI road, save the checkpoint and write test overlays.
    Train(tasks::train::TrainArgs),
    /// Convert ImageNet VGG16 weights into the backbone record used by `train`.
    ImportVgg(tasks::import_vgg::ImportVggArgs),
    /// Write test overlays from a saved checkpoint.
    Infer(tasks::infer::InferArgs),
    /// Print the network and its parameter counts.
    Summary(tasks::summary::SummaryArgs),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Train(args) => tasks::train::run(args),
        Commands::ImportVgg(args) => tasks::import_vgg::run(args),
        Commands::Infer(args) => tasks::infer::run(args),
        Commands::Summary(args) => tasks::summary::run(args),
    }
}
