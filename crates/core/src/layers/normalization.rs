use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::{Linear, VarBuilder};

/// Smallest norm used as a divisor by [`l2_normalize`].
pub const L2_NORM_EPS: f64 = 1e-12;

/// L2-normalize along the last axis: `x / max(||x||_2, eps)`.
pub fn l2_normalize(xs: &Tensor, eps: f64) -> Result<Tensor> {
    let norm = xs
        .to_dtype(DType::F32)?
        .sqr()?
        .sum_keepdim(D::Minus1)?
        .sqrt()?;
    let norm = clamp_min(&norm, eps)?.to_dtype(xs.dtype())?;
    xs.broadcast_div(&norm)
}

fn clamp_min(xs: &Tensor, min: f64) -> Result<Tensor> {
    let min = Tensor::new(min as f32, xs.device())?.to_dtype(xs.dtype())?;
    xs.broadcast_maximum(&min)
}

/// Linear layer (no bias) whose weight is reparameterized as
/// `W = g * v / ||v||`, with one norm per output row.
///
/// The magnitude `g` is fixed at one and never read from weights, so only
/// the direction `v` matters. Weight path: `weight_v`.
#[derive(Clone, Debug)]
pub struct WeightNormLinear {
    weight_v: Tensor,
    weight_g: Tensor,
}

impl WeightNormLinear {
    pub fn new(weight_v: Tensor) -> Result<Self> {
        let (out_dim, _in_dim) = weight_v.dims2()?;
        let weight_g = Tensor::ones((out_dim, 1), weight_v.dtype(), weight_v.device())?;
        Ok(Self { weight_v, weight_g })
    }

    pub fn weight_v(&self) -> &Tensor {
        &self.weight_v
    }

    pub fn weight_g(&self) -> &Tensor {
        &self.weight_g
    }

    /// The effective weight `g * v / ||v||`, shape `[out, in]`.
    pub fn weight(&self) -> Result<Tensor> {
        let norms = clamp_min(&self.weight_v.sqr()?.sum_keepdim(1)?.sqrt()?, L2_NORM_EPS)?;
        self.weight_v
            .broadcast_div(&norms)?
            .broadcast_mul(&self.weight_g)
    }
}

impl Module for WeightNormLinear {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Linear::new(self.weight()?, None).forward(xs)
    }
}

/// Create a weight-normalized linear layer, loading `weight_v` from a VarBuilder.
pub fn weight_norm_linear(
    in_dim: usize,
    out_dim: usize,
    vb: VarBuilder,
) -> Result<WeightNormLinear> {
    let weight_v = vb.get_with_hints(
        (out_dim, in_dim),
        "weight_v",
        candle_nn::init::DEFAULT_KAIMING_NORMAL,
    )?;
    WeightNormLinear::new(weight_v)
}
