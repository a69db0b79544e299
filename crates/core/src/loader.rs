use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::{debug, info};

use crate::config::{DinoHeadConfig, VitConfig};
use crate::error::{DinoError, Result};
use crate::models::{DinoHead, VisionTransformer};

/// Tensor name holding the image batch in input files.
pub const PIXEL_VALUES: &str = "pixel_values";

/// Creates a VarBuilder from safetensor weight files.
pub fn load_weights<P: AsRef<Path>>(
    paths: &[P],
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    let paths: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    for path in &paths {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("weight file {} does not exist", path.display()),
            )
            .into());
        }
    }
    debug!(files = paths.len(), ?dtype, "memory-mapping safetensors");
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&paths, dtype, device)? };
    Ok(vb)
}

/// Builds a backbone from safetensor weights in DINO naming.
pub fn load_backbone<P: AsRef<Path>>(
    paths: &[P],
    cfg: &VitConfig,
    dtype: DType,
    device: &Device,
) -> Result<VisionTransformer> {
    let vb = load_weights(paths, dtype, device)?;
    let model = VisionTransformer::new(cfg, vb)?;
    info!(
        embed_dim = cfg.embed_dim,
        depth = cfg.depth,
        patch_size = cfg.patch_size,
        "loaded backbone weights"
    );
    Ok(model)
}

/// Builds a DINO head from safetensor weights, optionally under a prefix
/// such as `head` when backbone and head share one file.
pub fn load_head<P: AsRef<Path>>(
    paths: &[P],
    cfg: &DinoHeadConfig,
    prefix: Option<&str>,
    dtype: DType,
    device: &Device,
) -> Result<DinoHead> {
    let vb = load_weights(paths, dtype, device)?;
    let vb = match prefix {
        Some(prefix) => vb.pp(prefix),
        None => vb,
    };
    DinoHead::new(cfg, vb)
}

/// Reads the `pixel_values` tensor `[batch, channels, height, width]` from a
/// safetensors file.
pub fn load_pixel_values(path: impl AsRef<Path>, device: &Device) -> Result<Tensor> {
    let path = path.as_ref();
    let mut tensors = candle_core::safetensors::load(path, device)?;
    let pixels = tensors
        .remove(PIXEL_VALUES)
        .ok_or_else(|| DinoError::MissingTensor {
            name: PIXEL_VALUES.to_string(),
            path: path.to_path_buf(),
        })?;
    if pixels.rank() != 4 {
        return Err(DinoError::ShapeMismatch {
            what: "pixel_values",
            expected: "[batch, channels, height, width]".into(),
            actual: format!("{:?}", pixels.dims()),
        });
    }
    Ok(pixels)
}

/// Reads a JSON backbone config; missing fields take their defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<VitConfig> {
    let content = std::fs::read_to_string(path)?;
    let cfg: VitConfig = serde_json::from_str(&content)?;
    cfg.validate()?;
    Ok(cfg)
}
