use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use dino_cli::commands::{self, EmbedInput, ModelArgs, Settings};
use dino_cli::config::CliConfig;
use dino_cli::logging;

#[derive(Parser)]
#[command(name = "dino", about = "Vision Transformer backbones with DINO heads")]
struct Cli {
    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Config file (defaults to ~/.config/dino-vit/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the backbone config, parameter count and training token count
    Summary {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Report the position table shape for an input resolution
    Interpolate {
        #[command(flatten)]
        model: ModelArgs,

        /// Input image height in pixels
        #[arg(long)]
        height: usize,

        /// Input image width in pixels
        #[arg(long)]
        width: usize,
    },

    /// Run the backbone and print class-token feature shape and norms
    Embed {
        #[command(flatten)]
        model: ModelArgs,

        /// Safetensors file holding a `pixel_values` tensor (random when absent)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Random input height in pixels
        #[arg(long, default_value_t = 224)]
        height: usize,

        /// Random input width in pixels
        #[arg(long, default_value_t = 224)]
        width: usize,

        /// Random input batch size
        #[arg(long, default_value_t = 1)]
        batch: usize,
    },

    /// Write a randomly initialized backbone to a safetensors file
    Init {
        #[command(flatten)]
        model: ModelArgs,

        /// Output safetensors file
        #[arg(long)]
        output: PathBuf,
    },
}

fn print_json<T: Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => CliConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CliConfig::load(),
    };

    let level = cli
        .log_level
        .clone()
        .or_else(|| file_config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    logging::init_with_level(&level)?;

    if cli.config.is_none() {
        if let Some(path) = CliConfig::default_path() {
            if path.exists() {
                tracing::info!(path = %path.display(), "loaded config");
            }
        }
    }

    match cli.command {
        Command::Summary { model } => {
            let settings = Settings::resolve(&file_config, &model)?;
            print_json(&commands::summary(&settings)?)
        }
        Command::Interpolate {
            model,
            height,
            width,
        } => {
            let settings = Settings::resolve(&file_config, &model)?;
            print_json(&commands::interpolate(&settings, height, width)?)
        }
        Command::Embed {
            model,
            input,
            height,
            width,
            batch,
        } => {
            let settings = Settings::resolve(&file_config, &model)?;
            let input = EmbedInput {
                input,
                height,
                width,
                batch,
            };
            print_json(&commands::embed(&settings, &input)?)
        }
        Command::Init { model, output } => {
            let settings = Settings::resolve(&file_config, &model)?;
            print_json(&commands::init(&settings, &output)?)
        }
    }
}
