//! Stochastic depth.

use candle_core::{ModuleT, Result, Tensor};

/// Randomly zeroes whole samples of a residual branch during training.
///
/// Each sample in the batch is kept with probability `1 - drop_prob` and
/// survivors are scaled by `1 / (1 - drop_prob)`, so the expected activation
/// is unchanged. A no-op when `drop_prob == 0` or outside training.
pub fn drop_path(xs: &Tensor, drop_prob: f64, train: bool) -> Result<Tensor> {
    if drop_prob <= 0.0 || !train {
        return Ok(xs.clone());
    }
    if drop_prob >= 1.0 {
        candle_core::bail!("drop_path probability must be < 1, got {drop_prob}");
    }
    let keep_prob = 1.0 - drop_prob;

    // One draw per sample, broadcast over the remaining axes.
    let mut mask_shape = vec![1usize; xs.rank()];
    mask_shape[0] = xs.dim(0)?;
    let mask = (Tensor::rand(0f32, 1f32, mask_shape, xs.device())?.to_dtype(xs.dtype())?
        + keep_prob)?
        .floor()?;

    (xs / keep_prob)?.broadcast_mul(&mask)
}

/// Module wrapper around [`drop_path`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropPath {
    drop_prob: f64,
}

impl DropPath {
    pub fn new(drop_prob: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&drop_prob) {
            candle_core::bail!("drop_path probability must be in [0, 1), got {drop_prob}");
        }
        Ok(Self { drop_prob })
    }

    pub fn identity() -> Self {
        Self { drop_prob: 0.0 }
    }

    pub fn drop_prob(&self) -> f64 {
        self.drop_prob
    }
}

impl ModuleT for DropPath {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        drop_path(xs, self.drop_prob, train)
    }
}
