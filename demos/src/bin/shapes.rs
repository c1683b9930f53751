//! Shape tracing demo
//!
//! Builds a segmentation network from command-line flags or a saved
//! `ModelConfig` and runs a random batch through it.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin shapes -- forward --architecture pspnet --n-classes 19 --size 256
//! cargo run --bin shapes -- forward --all --size 128 --feature-scale 8
//! cargo run --bin shapes -- forward --architecture segnet --size 96 --backward
//! cargo run --bin shapes -- forward --architecture unet --save-config unet.json
//! RUST_LOG=semseg_burn=trace cargo run --bin shapes -- forward --config unet.json
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use burn::config::Config;
use clap::{Parser, Subcommand};
use semseg_burn::{Architecture, ModelConfig, SemSegResult};
use semseg_demos::{
    create_device, run_backward, run_forward, SelectedAutodiffBackend, SelectedBackend,
    ShapeReport, BACKEND_NAME,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shapes")]
#[command(about = "Build semantic segmentation networks and trace tensor shapes through them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a forward pass on a random batch
    Forward {
        /// Network to build (unet, segnet, pspnet, linknet)
        #[arg(short, long, default_value = "unet")]
        architecture: Architecture,

        /// Run every supported architecture in turn
        #[arg(long, conflicts_with_all = ["architecture", "config"])]
        all: bool,

        /// Number of output classes
        #[arg(short, long, default_value_t = 21)]
        n_classes: usize,

        /// Input channels
        #[arg(long, default_value_t = 3)]
        in_channels: usize,

        /// Divisor for the reference filter widths
        #[arg(short, long)]
        feature_scale: Option<usize>,

        /// Square input size
        #[arg(short, long, default_value_t = 256)]
        size: usize,

        /// Batch size
        #[arg(short, long, default_value_t = 1)]
        batch: usize,

        /// Number of timed passes
        #[arg(short, long, default_value_t = 1)]
        runs: usize,

        /// Load the model configuration from this file instead of the flags
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the resolved model configuration to this file
        #[arg(long)]
        save_config: Option<PathBuf>,

        /// Track gradients and backpropagate the mean logit after each pass
        #[arg(long)]
        backward: bool,
    },

    /// Show supported architectures and backend information
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let device = create_device();
    tracing::info!(backend = BACKEND_NAME, "using backend");

    match cli.command {
        Commands::Forward {
            architecture,
            all,
            n_classes,
            in_channels,
            feature_scale,
            size,
            batch,
            runs,
            config,
            save_config,
            backward,
        } => {
            let base = match &config {
                Some(path) => ModelConfig::load(path)
                    .map_err(|err| anyhow!("{err}"))
                    .with_context(|| format!("Failed to load config: {}", path.display()))?,
                None => ModelConfig::new()
                    .with_architecture(architecture)
                    .with_n_classes(n_classes)
                    .with_in_channels(in_channels)
                    .with_feature_scale(feature_scale),
            };

            let configs: Vec<ModelConfig> = if all {
                Architecture::ALL
                    .into_iter()
                    .map(|arch| base.clone().with_architecture(arch))
                    .collect()
            } else {
                vec![base]
            };

            if let (Some(path), [config]) = (&save_config, configs.as_slice()) {
                config
                    .save(path)
                    .with_context(|| format!("Failed to save config: {}", path.display()))?;
                tracing::info!(path = %path.display(), "model configuration saved");
            }

            let input = [batch, configs[0].in_channels, size, size];
            for model_config in &configs {
                tracing::info!(
                    architecture = model_config.architecture.name(),
                    feature_scale = model_config.effective_feature_scale(),
                    backward,
                    "initializing model"
                );

                if backward {
                    let model = model_config.init::<SelectedAutodiffBackend>(&device)?;
                    timed_runs(|| run_backward(&model, input, &device), runs);
                } else {
                    let model = model_config.init::<SelectedBackend>(&device)?;
                    timed_runs(|| run_forward(&model, input, &device), runs);
                }
            }
            Ok(())
        }

        Commands::Info => {
            println!("Backend: {BACKEND_NAME} (autodiff available)");
            println!("Device: {device:?}");
            println!("Architectures:");
            for arch in Architecture::ALL {
                println!(
                    "  - {} (default feature scale {})",
                    arch.name(),
                    arch.default_feature_scale()
                );
            }
            Ok(())
        }
    }
}

fn timed_runs(mut pass: impl FnMut() -> SemSegResult<ShapeReport>, runs: usize) {
    for run in 0..runs.max(1) {
        match pass() {
            Ok(report) => println!("{report}"),
            Err(err) => {
                tracing::warn!(%err, run, "pass rejected");
                break;
            }
        }
    }
}
