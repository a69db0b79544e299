//! DINO projection head.

use candle_core::{Module, Result as CandleResult, Tensor};
use candle_nn::{Activation, Linear, VarBuilder};

use crate::config::DinoHeadConfig;
use crate::error::Result;
use crate::layers::{l2_normalize, weight_norm_linear, WeightNormLinear, L2_NORM_EPS};

/// MLP to a bottleneck, L2 normalization, then a weight-normalized
/// projection to `out_dim`.
///
/// Weight paths follow a sequential MLP: `mlp.{0,2,4,..}` with activations
/// at the odd indices (a single-layer head stores its linear at `mlp`),
/// and `last_layer.weight_v`.
///
/// Construction only reads weights from the VarBuilder. A fresh head built
/// over a `VarMap` needs [`crate::init::init_weights`] afterwards to get
/// truncated-normal (std 0.02) linear weights and zero biases.
#[derive(Debug, Clone)]
pub struct DinoHead {
    mlp: Vec<Linear>,
    act: Activation,
    last_layer: WeightNormLinear,
    config: DinoHeadConfig,
}

impl DinoHead {
    pub fn new(cfg: &DinoHeadConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;

        let vb_mlp = vb.pp("mlp");
        let mlp = if cfg.n_layers == 1 {
            vec![candle_nn::linear(cfg.in_dim, cfg.bottleneck_dim, vb_mlp)?]
        } else {
            let mut dims = Vec::with_capacity(cfg.n_layers + 1);
            dims.push(cfg.in_dim);
            dims.extend(std::iter::repeat(cfg.hidden_dim).take(cfg.n_layers - 1));
            dims.push(cfg.bottleneck_dim);

            dims.windows(2)
                .enumerate()
                .map(|(i, w)| candle_nn::linear(w[0], w[1], vb_mlp.pp(2 * i)))
                .collect::<CandleResult<Vec<_>>>()?
        };

        let last_layer = weight_norm_linear(cfg.bottleneck_dim, cfg.out_dim, vb.pp("last_layer"))?;

        Ok(Self {
            mlp,
            act: Activation::Gelu,
            last_layer,
            config: cfg.clone(),
        })
    }

    /// Unit-norm bottleneck features `[.., bottleneck_dim]`.
    pub fn bottleneck(&self, xs: &Tensor) -> CandleResult<Tensor> {
        let last = self.mlp.len() - 1;
        let mut hidden = xs.clone();
        for (i, layer) in self.mlp.iter().enumerate() {
            hidden = layer.forward(&hidden)?;
            if i < last {
                hidden = hidden.apply(&self.act)?;
            }
        }
        l2_normalize(&hidden, L2_NORM_EPS)
    }

    pub fn last_layer(&self) -> &WeightNormLinear {
        &self.last_layer
    }

    pub fn config(&self) -> &DinoHeadConfig {
        &self.config
    }
}

impl Module for DinoHead {
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        let bottleneck = self.bottleneck(xs)?;
        self.last_layer.forward(&bottleneck)
    }
}
