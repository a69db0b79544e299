use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{Dropout, Linear, VarBuilder};

/// Multi-head self-attention with a fused `qkv` projection.
///
/// Weight paths: `qkv.{weight,bias}`, `proj.{weight,bias}`.
#[derive(Debug, Clone)]
pub struct Attention {
    qkv: Linear,
    proj: Linear,
    attn_drop: Dropout,
    proj_drop: Dropout,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    pub fn new(
        dim: usize,
        num_heads: usize,
        qkv_bias: bool,
        qk_scale: Option<f64>,
        attn_drop: f32,
        proj_drop: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_heads == 0 || dim % num_heads != 0 {
            candle_core::bail!("dim {dim} is not divisible by num_heads {num_heads}");
        }
        let head_dim = dim / num_heads;

        let qkv = candle_nn::linear_b(dim, 3 * dim, qkv_bias, vb.pp("qkv"))?;
        let proj = candle_nn::linear(dim, dim, vb.pp("proj"))?;

        Ok(Self {
            qkv,
            proj,
            attn_drop: Dropout::new(attn_drop),
            proj_drop: Dropout::new(proj_drop),
            num_heads,
            head_dim,
            scale: qk_scale.unwrap_or_else(|| (head_dim as f64).powf(-0.5)),
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Returns the transformed tokens `[batch, seq, dim]` together with the
    /// softmax attention weights `[batch, heads, seq, seq]`.
    ///
    /// The returned weights are taken before attention dropout, so every
    /// row sums to one in training and evaluation alike.
    pub fn forward_with_attention(&self, xs: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let (batch_size, seq_len, dim) = xs.dims3()?;

        // [batch, seq, 3, heads, head_dim] -> [3, batch, heads, seq, head_dim]
        let qkv = self
            .qkv
            .forward(xs)?
            .reshape((batch_size, seq_len, 3, self.num_heads, self.head_dim))?
            .permute((2, 0, 3, 1, 4))?;
        let q = qkv.get(0)?.contiguous()?;
        let k = qkv.get(1)?.contiguous()?;
        let v = qkv.get(2)?.contiguous()?;

        let attn_weights = (q.matmul(&k.t()?)? * self.scale)?;
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?;

        let attn_output = self
            .attn_drop
            .forward_t(&attn_weights, train)?
            .matmul(&v)?;

        // [batch, heads, seq, head_dim] -> [batch, seq, dim]
        let attn_output = attn_output.transpose(1, 2)?.reshape((batch_size, seq_len, dim))?;
        let attn_output = self.proj.forward(&attn_output)?;
        let attn_output = self.proj_drop.forward_t(&attn_output, train)?;

        Ok((attn_output, attn_weights))
    }
}

impl ModuleT for Attention {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.forward_with_attention(xs, train).map(|(out, _)| out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, D};
    use candle_nn::VarMap;

    fn random_attention(dim: usize, heads: usize) -> (VarMap, Attention) {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attn = Attention::new(dim, heads, true, None, 0.0, 0.0, vb).unwrap();
        (varmap, attn)
    }

    #[test]
    fn output_and_attention_shapes() {
        let (_varmap, attn) = random_attention(32, 4);
        let xs = Tensor::randn(0f32, 1.0, (2, 7, 32), &Device::Cpu).unwrap();

        let (out, weights) = attn.forward_with_attention(&xs, false).unwrap();
        assert_eq!(out.dims(), &[2, 7, 32]);
        assert_eq!(weights.dims(), &[2, 4, 7, 7]);
        assert_eq!(attn.head_dim(), 8);
    }

    #[test]
    fn attention_rows_sum_to_one() {
        let (_varmap, attn) = random_attention(32, 4);
        let xs = Tensor::randn(0f32, 1.0, (3, 5, 32), &Device::Cpu).unwrap();

        let (_, weights) = attn.forward_with_attention(&xs, false).unwrap();
        let sums: Vec<f32> = weights
            .sum(D::Minus1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(sums.len(), 3 * 4 * 5);
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5, "row sum {s}");
        }
    }

    #[test]
    fn attention_rows_sum_to_one_in_training() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attn = Attention::new(16, 2, false, None, 0.5, 0.0, vb).unwrap();
        let xs = Tensor::randn(0f32, 1.0, (1, 4, 16), &device).unwrap();

        let (_, weights) = attn.forward_with_attention(&xs, true).unwrap();
        let sums: Vec<f32> = weights
            .sum(D::Minus1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn default_and_overridden_scale() {
        let (_varmap, attn) = random_attention(64, 4);
        assert!((attn.scale() - 0.25).abs() < 1e-12);

        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let attn = Attention::new(64, 4, false, Some(0.5), 0.0, 0.0, vb).unwrap();
        assert_eq!(attn.scale(), 0.5);
    }

    #[test]
    fn zero_weights_attend_uniformly() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let attn = Attention::new(8, 2, true, None, 0.0, 0.0, vb).unwrap();
        let xs = Tensor::randn(0f32, 1.0, (1, 4, 8), &device).unwrap();

        let (out, weights) = attn.forward_with_attention(&xs, false).unwrap();
        let weights: Vec<f32> = weights.flatten_all().unwrap().to_vec1().unwrap();
        for w in weights {
            assert!((w - 0.25).abs() < 1e-6);
        }
        let out: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn rejects_indivisible_heads() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(Attention::new(30, 4, false, None, 0.0, 0.0, vb).is_err());
    }

    #[test]
    fn module_t_matches_forward_with_attention() {
        let (_varmap, attn) = random_attention(16, 2);
        let xs = Tensor::randn(0f32, 1.0, (2, 3, 16), &Device::Cpu).unwrap();
        let a = attn.forward_t(&xs, false).unwrap();
        let (b, _) = attn.forward_with_attention(&xs, false).unwrap();
        let diff: f32 = (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(diff, 0.0);
    }
}
