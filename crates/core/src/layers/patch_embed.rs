use candle_core::{Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder};

use crate::config::VitConfig;
use crate::error::{DinoError, Result};

/// Patch grid dimensions, in patches, ordered `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchGrid {
    pub height: usize,
    pub width: usize,
}

impl PatchGrid {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    pub fn square(side: usize) -> Self {
        Self::new(side, side)
    }

    /// Grid for an image of `height x width` pixels.
    ///
    /// Both dimensions must be non-zero multiples of `patch_size`.
    pub fn from_image(height: usize, width: usize, patch_size: usize) -> Result<Self> {
        if patch_size == 0 {
            return Err(DinoError::InvalidConfig("patch_size must be > 0".into()));
        }
        if height % patch_size != 0 || width % patch_size != 0 {
            return Err(DinoError::IndivisibleImage {
                height,
                width,
                patch_size,
            });
        }
        let grid = Self::new(height / patch_size, width / patch_size);
        if grid.is_empty() {
            return Err(DinoError::EmptyPatchGrid {
                height: grid.height,
                width: grid.width,
            });
        }
        Ok(grid)
    }

    pub fn num_patches(&self) -> usize {
        self.height * self.width
    }

    pub fn is_square(&self) -> bool {
        self.height == self.width
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }
}

/// Image to patch embedding.
///
/// A convolution with `kernel = stride = patch_size` projects every
/// non-overlapping patch to `embed_dim`; the spatial axes are then flattened
/// into a token axis in raster order.
#[derive(Debug, Clone)]
pub struct PatchEmbedding {
    proj: Conv2d,
    patch_size: usize,
    in_channels: usize,
    embed_dim: usize,
    num_patches: usize,
}

impl PatchEmbedding {
    pub fn new(cfg: &VitConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let proj = candle_nn::conv2d(
            cfg.in_channels,
            cfg.embed_dim,
            cfg.patch_size,
            Conv2dConfig {
                stride: cfg.patch_size,
                ..Default::default()
            },
            vb.pp("proj"),
        )?;

        Ok(Self {
            proj,
            patch_size: cfg.patch_size,
            in_channels: cfg.in_channels,
            embed_dim: cfg.embed_dim,
            num_patches: cfg.num_patches(),
        })
    }

    /// Patches at the training resolution.
    pub fn num_patches(&self) -> usize {
        self.num_patches
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// Patch grid for an image of the given pixel size.
    pub fn grid_for(&self, height: usize, width: usize) -> Result<PatchGrid> {
        PatchGrid::from_image(height, width, self.patch_size)
    }

    /// `[batch, channels, height, width]` -> `[batch, patches, embed_dim]`.
    pub fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let (_batch, channels, height, width) = pixel_values.dims4()?;
        if channels != self.in_channels {
            return Err(DinoError::ShapeMismatch {
                what: "pixel channels",
                expected: self.in_channels.to_string(),
                actual: channels.to_string(),
            });
        }
        self.grid_for(height, width)?;

        // [batch, embed_dim, grid_h, grid_w]
        let embeddings = self.proj.forward(pixel_values)?;
        // [batch, embed_dim, grid_h * grid_w] -> [batch, patches, embed_dim]
        Ok(embeddings.flatten(2, 3)?.transpose(1, 2)?)
    }
}
