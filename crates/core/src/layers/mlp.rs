use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{Activation, Dropout, Linear, VarBuilder};

/// Two-layer feed-forward block used inside every transformer block:
/// `fc1 -> activation -> dropout -> fc2 -> dropout`.
#[derive(Debug, Clone)]
pub struct Mlp {
    fc1: Linear,
    fc2: Linear,
    act: Activation,
    drop: Dropout,
}

impl Mlp {
    pub fn new(
        in_features: usize,
        hidden_features: usize,
        out_features: usize,
        drop_prob: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let fc1 = candle_nn::linear(in_features, hidden_features, vb.pp("fc1"))?;
        let fc2 = candle_nn::linear(hidden_features, out_features, vb.pp("fc2"))?;
        Ok(Self {
            fc1,
            fc2,
            act: Activation::Gelu,
            drop: Dropout::new(drop_prob),
        })
    }

    /// Replaces the default (erf) GELU activation.
    pub fn with_activation(mut self, act: Activation) -> Self {
        self.act = act;
        self
    }
}

impl ModuleT for Mlp {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.fc1.forward(xs)?.apply(&self.act)?;
        let hidden = self.drop.forward_t(&hidden, train)?;
        let out = self.fc2.forward(&hidden)?;
        self.drop.forward_t(&out, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::collections::HashMap;

    #[test]
    fn mlp_shapes() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let mlp = Mlp::new(16, 64, 8, 0.0, vb).unwrap();

        let xs = Tensor::randn(0f32, 1.0, (2, 5, 16), &device).unwrap();
        let out = mlp.forward_t(&xs, false).unwrap();
        assert_eq!(out.dims(), &[2, 5, 8]);
    }

    #[test]
    fn mlp_applies_erf_gelu() {
        // Identity projections isolate the activation.
        let device = Device::Cpu;
        let mut weights = HashMap::new();
        for name in ["fc1", "fc2"] {
            weights.insert(
                format!("{name}.weight"),
                Tensor::from_vec(vec![1f32, 0.0, 0.0, 1.0], (2, 2), &device).unwrap(),
            );
            weights.insert(
                format!("{name}.bias"),
                Tensor::zeros(2, DType::F32, &device).unwrap(),
            );
        }
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let mlp = Mlp::new(2, 2, 2, 0.0, vb).unwrap();

        let xs = Tensor::new(&[[1f32, -1.0]], &device).unwrap();
        let out: Vec<Vec<f32>> = mlp.forward_t(&xs, false).unwrap().to_vec2().unwrap();
        // GELU(1) = 0.8413, GELU(-1) = -0.1587
        assert!((out[0][0] - 0.8413).abs() < 1e-3);
        assert!((out[0][1] + 0.1587).abs() < 1e-3);
    }

    #[test]
    fn dropout_is_inactive_in_eval() {
        let device = Device::Cpu;
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mlp = Mlp::new(8, 16, 8, 0.5, vb).unwrap();

        let xs = Tensor::randn(0f32, 1.0, (4, 8), &device).unwrap();
        let a: Vec<Vec<f32>> = mlp.forward_t(&xs, false).unwrap().to_vec2().unwrap();
        let b: Vec<Vec<f32>> = mlp.forward_t(&xs, false).unwrap().to_vec2().unwrap();
        assert_eq!(a, b);
    }
}
