//! Parameter initialization for freshly built models.
//!
//! Models are built over a [`VarMap`] (`VarBuilder::from_varmap`) and then
//! re-initialized here by parameter role, which is derived from the
//! parameter's dotted name. Every role draws from the caller's `rng`, so a
//! seed fully determines the map.

use std::collections::HashMap;
use std::f64::consts::SQRT_2;

use candle_core::{Device, Shape, Tensor, Var};
use candle_nn::VarMap;
use rand::Rng;
use rand_distr::Uniform;
use statrs::function::erf::{erf, erf_inv};
use tracing::{debug, warn};

use crate::error::Result;

/// Standard deviation for linear weights and the learned tokens.
pub const DEFAULT_INIT_STD: f64 = 0.02;

fn norm_cdf(x: f64) -> f64 {
    (1.0 + erf(x / SQRT_2)) / 2.0
}

/// Draw `n` samples from `N(mean, std^2)` restricted to `[a, b]`.
///
/// Uses the inverse CDF: uniform draws on the image of `[a, b]` under
/// `2 * Phi - 1` are mapped back through `erf_inv`. The final clamp only
/// absorbs rounding at the bounds.
pub fn sample_truncated_normal<R: Rng + ?Sized>(
    rng: &mut R,
    n: usize,
    mean: f64,
    std: f64,
    a: f64,
    b: f64,
) -> Vec<f32> {
    if mean < a - 2.0 * std || mean > b + 2.0 * std {
        warn!(
            mean,
            std,
            a,
            b,
            "mean is more than 2 std from [a, b] in truncated normal init, \
             the distribution of values may be incorrect"
        );
    }

    let lower = 2.0 * norm_cdf((a - mean) / std) - 1.0;
    let upper = 2.0 * norm_cdf((b - mean) / std) - 1.0;

    (0..n)
        .map(|_| {
            let u = lower + (upper - lower) * rng.gen::<f64>();
            let value = mean + std * SQRT_2 * erf_inv(u);
            value.clamp(a, b) as f32
        })
        .collect()
}

/// Truncated-normal tensor of `shape` on `device`, in F32.
pub fn truncated_normal<R: Rng + ?Sized, S: Into<Shape>>(
    shape: S,
    mean: f64,
    std: f64,
    a: f64,
    b: f64,
    device: &Device,
    rng: &mut R,
) -> candle_core::Result<Tensor> {
    let shape = shape.into();
    let values = sample_truncated_normal(rng, shape.elem_count(), mean, std, a, b);
    Tensor::from_vec(values, shape, device)
}

/// Zero-mean truncated normal bounded at `+-2 std`.
pub fn trunc_normal_std<R: Rng + ?Sized, S: Into<Shape>>(
    shape: S,
    std: f64,
    device: &Device,
    rng: &mut R,
) -> candle_core::Result<Tensor> {
    truncated_normal(shape, 0.0, std, -2.0 * std, 2.0 * std, device, rng)
}

/// `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`, the default for convolution and
/// linear layers (kaiming uniform with `a = sqrt(5)`).
pub fn kaiming_uniform<R: Rng + ?Sized, S: Into<Shape>>(
    shape: S,
    fan_in: usize,
    device: &Device,
    rng: &mut R,
) -> candle_core::Result<Tensor> {
    let shape = shape.into();
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    let values: Vec<f32> = (0..shape.elem_count()).map(|_| rng.sample(dist)).collect();
    Tensor::from_vec(values, shape, device)
}

/// How a parameter is (re)initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    TruncNormal,
    Zeros,
    Ones,
    /// Framework-default draw, see [`kaiming_uniform`].
    KaimingUniform,
}

/// Role of a parameter given its dotted name, e.g. `blocks.3.attn.qkv.weight`.
pub fn param_role(name: &str) -> ParamRole {
    let segments: Vec<&str> = name.split('.').collect();
    let leaf = segments.last().copied().unwrap_or_default();

    if segments.contains(&"patch_embed") || leaf == "weight_v" {
        return ParamRole::KaimingUniform;
    }
    if leaf == "cls_token" || leaf == "pos_embed" {
        return ParamRole::TruncNormal;
    }

    let is_norm = segments.len() >= 2 && segments[segments.len() - 2].starts_with("norm");
    match (is_norm, leaf) {
        (true, "weight") => ParamRole::Ones,
        (true, "bias") => ParamRole::Zeros,
        (false, "weight") => ParamRole::TruncNormal,
        (false, "bias") => ParamRole::Zeros,
        _ => ParamRole::KaimingUniform,
    }
}

/// Input fan of a weight, or of the weight next to a bias.
fn fan_in(name: &str, dims: &[usize], vars: &HashMap<String, Var>) -> usize {
    let weight_dims = name
        .strip_suffix("bias")
        .and_then(|prefix| vars.get(&format!("{prefix}weight")))
        .map(|w| w.dims())
        .unwrap_or(dims);
    weight_dims.iter().skip(1).product::<usize>().max(1)
}

/// Re-initialize every variable of `varmap` according to [`param_role`].
///
/// Variables are visited in name order so a seeded `rng` gives the same
/// weights on every run.
pub fn init_weights<R: Rng + ?Sized>(varmap: &VarMap, rng: &mut R) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(format!("varmap lock poisoned: {e}")))?;

    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    for name in names {
        let var = &data[name];
        let value = match param_role(name) {
            ParamRole::TruncNormal => {
                trunc_normal_std(var.dims(), DEFAULT_INIT_STD, var.device(), rng)?
            }
            ParamRole::Zeros => var.zeros_like()?,
            ParamRole::Ones => var.ones_like()?,
            ParamRole::KaimingUniform => {
                let fan_in = fan_in(name, var.dims(), &data);
                kaiming_uniform(var.dims(), fan_in, var.device(), rng)?
            }
        };
        var.set(&value.to_dtype(var.dtype())?)?;
    }

    debug!(initialized = data.len(), "initialized parameters");
    Ok(())
}
