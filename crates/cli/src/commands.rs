//! Subcommand implementations. Each returns a serializable report that the
//! binary prints as JSON.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use clap::Args;
use dino_core::{
    init::init_weights, interpolate_pos_encoding, loader, models::from_variant, VisionTransformer,
    VitConfig, VitVariant,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::config::CliConfig;

const DEFAULT_VARIANT: VitVariant = VitVariant::Small;
const DEFAULT_PATCH_SIZE: usize = 16;

/// Model selection flags shared by every subcommand. Unset flags fall back
/// to the config file, then to built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Backbone size (tiny, small, base)
    #[arg(long)]
    pub variant: Option<String>,

    /// Patch size in pixels
    #[arg(long)]
    pub patch_size: Option<usize>,

    /// Safetensors file with backbone weights (random init when absent)
    #[arg(long)]
    pub weights: Option<PathBuf>,

    /// Data type (f32, f16, bf16)
    #[arg(long)]
    pub dtype: Option<String>,

    /// Device (cpu, cuda, cuda:N, metal)
    #[arg(long)]
    pub device: Option<String>,

    /// Seed for random weights and inputs
    #[arg(long)]
    pub seed: Option<u64>,
}

impl ModelArgs {
    fn as_config(&self) -> CliConfig {
        CliConfig {
            variant: self.variant.clone(),
            patch_size: self.patch_size,
            weights: self.weights.clone(),
            dtype: self.dtype.clone(),
            device: self.device.clone(),
            log_level: None,
            seed: self.seed,
        }
    }
}

/// Fully resolved model settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub variant: VitVariant,
    pub patch_size: usize,
    pub weights: Option<PathBuf>,
    pub dtype: DType,
    pub device: Device,
    pub seed: u64,
}

impl Settings {
    /// Combine file configuration with command-line flags, flags winning.
    pub fn resolve(file: &CliConfig, args: &ModelArgs) -> anyhow::Result<Self> {
        let mut merged = file.clone();
        merged.merge(&args.as_config());

        let variant = match merged.variant.as_deref() {
            Some(name) => name.parse()?,
            None => DEFAULT_VARIANT,
        };
        Ok(Self {
            variant,
            patch_size: merged.patch_size.unwrap_or(DEFAULT_PATCH_SIZE),
            weights: merged.weights,
            dtype: parse_dtype(merged.dtype.as_deref().unwrap_or("f32"))?,
            device: parse_device(merged.device.as_deref().unwrap_or("cpu"))?,
            seed: merged.seed.unwrap_or(0),
        })
    }

    pub fn vit_config(&self) -> VitConfig {
        self.variant.config(self.patch_size)
    }
}

pub fn parse_dtype(name: &str) -> anyhow::Result<DType> {
    Ok(match name.to_lowercase().as_str() {
        "f32" | "fp32" | "float32" | "float" => DType::F32,
        "f16" | "fp16" | "float16" | "half" => DType::F16,
        "bf16" | "bfloat16" => DType::BF16,
        other => bail!("unsupported dtype '{other}'"),
    })
}

pub fn parse_device(name: &str) -> anyhow::Result<Device> {
    let name = name.to_lowercase();
    Ok(match name.as_str() {
        "cpu" => Device::Cpu,
        "cuda" => Device::new_cuda(0)?,
        "metal" => Device::new_metal(0)?,
        other => match other.strip_prefix("cuda:") {
            Some(ordinal) => {
                let ordinal: usize = ordinal
                    .parse()
                    .with_context(|| format!("invalid cuda ordinal in '{other}'"))?;
                Device::new_cuda(ordinal)?
            }
            None => bail!("unsupported device '{other}'"),
        },
    })
}

/// Backbone from the configured weights, or randomly initialized from the
/// seed when no weights are configured.
pub fn build_backbone(settings: &Settings) -> anyhow::Result<VisionTransformer> {
    let cfg = settings.vit_config();
    match &settings.weights {
        Some(path) => Ok(loader::load_backbone(
            &[path],
            &cfg,
            settings.dtype,
            &settings.device,
        )?),
        None => {
            let (_varmap, model) = random_backbone(settings)?;
            Ok(model)
        }
    }
}

fn random_backbone(settings: &Settings) -> anyhow::Result<(VarMap, VisionTransformer)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, settings.dtype, &settings.device);
    let model = from_variant(settings.variant, settings.patch_size, vb)?;
    init_weights(&varmap, &mut StdRng::seed_from_u64(settings.seed))?;
    info!(
        variant = %settings.variant,
        patch_size = settings.patch_size,
        seed = settings.seed,
        "initialized random backbone"
    );
    Ok((varmap, model))
}

// ─── summary ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SummaryReport {
    pub variant: VitVariant,
    pub config: VitConfig,
    pub parameters: usize,
    pub tokens: usize,
}

pub fn summary(settings: &Settings) -> anyhow::Result<SummaryReport> {
    let config = settings.vit_config();
    config.validate()?;
    Ok(SummaryReport {
        variant: settings.variant,
        parameters: config.num_parameters(),
        tokens: config.seq_len(),
        config,
    })
}

// ─── interpolate ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct InterpolateReport {
    pub grid: [usize; 2],
    pub training_grid: [usize; 2],
    pub shape: Vec<usize>,
    pub fast_path: bool,
}

pub fn interpolate(
    settings: &Settings,
    height: usize,
    width: usize,
) -> anyhow::Result<InterpolateReport> {
    let model = build_backbone(settings)?;
    let grid = model.grid_for(height, width)?;
    let side = model.config().grid_side();

    let table = interpolate_pos_encoding(model.pos_embed(), grid)?;
    Ok(InterpolateReport {
        grid: [grid.height, grid.width],
        training_grid: [side, side],
        shape: table.dims().to_vec(),
        fast_path: grid.is_square() && grid.num_patches() == model.num_patches(),
    })
}

// ─── embed ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EmbedInput {
    pub input: Option<PathBuf>,
    pub height: usize,
    pub width: usize,
    pub batch: usize,
}

#[derive(Debug, Serialize)]
pub struct EmbedReport {
    pub input_shape: Vec<usize>,
    pub feature_shape: Vec<usize>,
    pub norms: Vec<f32>,
}

pub fn embed(settings: &Settings, input: &EmbedInput) -> anyhow::Result<EmbedReport> {
    let model = build_backbone(settings)?;
    let pixels = match &input.input {
        Some(path) => loader::load_pixel_values(path, &settings.device)?,
        None => random_pixels(settings, input)?,
    }
    .to_dtype(settings.dtype)?;

    let features = model.forward(&pixels)?;
    let norms = features
        .to_dtype(DType::F32)?
        .sqr()?
        .sum(D::Minus1)?
        .sqrt()?
        .to_vec1()?;
    Ok(EmbedReport {
        input_shape: pixels.dims().to_vec(),
        feature_shape: features.dims().to_vec(),
        norms,
    })
}

fn random_pixels(settings: &Settings, input: &EmbedInput) -> anyhow::Result<Tensor> {
    if input.batch == 0 {
        bail!("batch must be > 0");
    }
    let mut rng = StdRng::seed_from_u64(settings.seed.wrapping_add(1));
    let shape = (input.batch, 3, input.height, input.width);
    let len = input.batch * 3 * input.height * input.width;
    let values: Vec<f32> = (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Ok(Tensor::from_vec(values, shape, &settings.device)?)
}

// ─── init ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct InitReport {
    pub output: PathBuf,
    pub parameters: usize,
}

/// Write a randomly initialized backbone to a safetensors file.
pub fn init(settings: &Settings, output: &Path) -> anyhow::Result<InitReport> {
    let (varmap, _model) = random_backbone(settings)?;
    varmap
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    let parameters = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
    info!(output = %output.display(), parameters, "saved weights");
    Ok(InitReport {
        output: output.to_path_buf(),
        parameters,
    })
}
