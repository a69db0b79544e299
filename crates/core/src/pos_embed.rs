//! Positional-embedding interpolation.
//!
//! A backbone trained at one resolution owns a table of `1 + s0*s0`
//! position embeddings: the class-token slot followed by an `s0 x s0` patch
//! grid in raster order. Evaluating at a different resolution resamples the
//! patch grid bicubically to the new `(height, width)` grid and keeps the
//! class-token row untouched.

use candle_core::{DType, Tensor};
use tracing::debug;

use crate::error::{DinoError, Result};
use crate::layers::PatchGrid;
use crate::resample::resize_bicubic;

/// Side length of a square patch grid holding `num_patches` patches.
pub fn square_side(num_patches: usize) -> Option<usize> {
    let side = (num_patches as f64).sqrt().round() as usize;
    (side * side == num_patches).then_some(side)
}

/// Adapt a `[1, 1 + N0, dim]` position table to `grid`.
///
/// Returns the input table itself when `grid` is square with `N0` patches.
/// Otherwise returns `[1, 1 + grid.height * grid.width, dim]` with the
/// class-token row copied verbatim, in the table's dtype and device.
pub fn interpolate_pos_encoding(pos_embed: &Tensor, grid: PatchGrid) -> Result<Tensor> {
    let (lead, rows, dim) = pos_embed.dims3()?;
    if lead != 1 || rows < 2 {
        return Err(DinoError::ShapeMismatch {
            what: "position table",
            expected: "[1, 1 + patches, dim] with at least one patch".into(),
            actual: format!("{:?}", pos_embed.dims()),
        });
    }
    let num_patches = rows - 1;
    let side = square_side(num_patches).ok_or(DinoError::NonSquarePositionGrid { num_patches })?;
    if grid.is_empty() {
        return Err(DinoError::EmptyPatchGrid {
            height: grid.height,
            width: grid.width,
        });
    }

    if grid.num_patches() == num_patches && grid.is_square() {
        return Ok(pos_embed.clone());
    }

    debug!(
        from_side = side,
        to_height = grid.height,
        to_width = grid.width,
        dim,
        "interpolating position embeddings"
    );

    let class_row = pos_embed.narrow(1, 0, 1)?;
    let patch_rows: Vec<f32> = pos_embed
        .narrow(1, 1, num_patches)?
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1()?;

    let resized = resize_bicubic(&patch_rows, (side, side), dim, (grid.height, grid.width));
    let patch_rows = Tensor::from_vec(resized, (1, grid.num_patches(), dim), pos_embed.device())?
        .to_dtype(pos_embed.dtype())?;

    Ok(Tensor::cat(&[&class_row, &patch_rows], 1)?)
}
