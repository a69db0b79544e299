//! Model configuration: the backbone config, the named variant registry and
//! the DINO head config.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DinoError, Result};

/// Configuration of a Vision Transformer backbone.
///
/// Every field has a serde default so partial JSON overrides deserialize
/// on top of the ViT-B/16 shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitConfig {
    /// Training image size (square).
    pub img_size: usize,
    /// Patch size (square).
    pub patch_size: usize,
    /// Number of image channels.
    pub in_channels: usize,
    /// Classifier outputs; 0 means the class-token feature is returned as is.
    pub num_classes: usize,
    pub embed_dim: usize,
    pub depth: usize,
    pub num_heads: usize,
    pub mlp_ratio: f64,
    pub qkv_bias: bool,
    /// Overrides the `1/sqrt(head_dim)` attention scale.
    pub qk_scale: Option<f64>,
    /// Dropout after positional embedding and inside MLP / projection.
    pub drop_rate: f64,
    /// Dropout on attention weights.
    pub attn_drop_rate: f64,
    /// Stochastic depth rate of the last block.
    pub drop_path_rate: f64,
    pub layer_norm_eps: f64,
}

impl Default for VitConfig {
    fn default() -> Self {
        Self {
            img_size: 224,
            patch_size: 16,
            in_channels: 3,
            num_classes: 0,
            embed_dim: 768,
            depth: 12,
            num_heads: 12,
            mlp_ratio: 4.0,
            qkv_bias: false,
            qk_scale: None,
            drop_rate: 0.0,
            attn_drop_rate: 0.0,
            drop_path_rate: 0.0,
            layer_norm_eps: 1e-5,
        }
    }
}

impl VitConfig {
    /// ViT-Tiny with the given patch size.
    pub fn tiny(patch_size: usize) -> Self {
        VitVariant::Tiny.config(patch_size)
    }

    /// ViT-Small with the given patch size.
    pub fn small(patch_size: usize) -> Self {
        VitVariant::Small.config(patch_size)
    }

    /// ViT-Base with the given patch size.
    pub fn base(patch_size: usize) -> Self {
        VitVariant::Base.config(patch_size)
    }

    /// Number of patches per side at the training resolution.
    pub fn grid_side(&self) -> usize {
        self.img_size / self.patch_size
    }

    /// Patches at the training resolution (excluding the class token).
    pub fn num_patches(&self) -> usize {
        let n = self.grid_side();
        n * n
    }

    /// Sequence length at the training resolution, class token included.
    pub fn seq_len(&self) -> usize {
        self.num_patches() + 1
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    pub fn mlp_hidden_dim(&self) -> usize {
        (self.embed_dim as f64 * self.mlp_ratio) as usize
    }

    /// Number of learnable scalars in a backbone built from this config.
    pub fn num_parameters(&self) -> usize {
        let d = self.embed_dim;
        let hidden = self.mlp_hidden_dim();
        let layer_norm = 2 * d;

        let patch_embed = self.in_channels * self.patch_size * self.patch_size * d + d;
        let tokens = d + self.seq_len() * d;
        let qkv = d * 3 * d + if self.qkv_bias { 3 * d } else { 0 };
        let block = layer_norm
            + qkv
            + (d * d + d)
            + layer_norm
            + (d * hidden + hidden)
            + (hidden * d + d);
        let head = if self.num_classes > 0 {
            d * self.num_classes + self.num_classes
        } else {
            0
        };

        patch_embed + tokens + self.depth * block + layer_norm + head
    }

    /// Per-block stochastic depth rates, linearly increasing from 0 to
    /// `drop_path_rate`.
    pub fn drop_path_schedule(&self) -> Vec<f64> {
        match self.depth {
            0 => Vec::new(),
            1 => vec![0.0],
            depth => (0..depth)
                .map(|i| self.drop_path_rate * i as f64 / (depth - 1) as f64)
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            return Err(DinoError::InvalidConfig("patch_size must be > 0".into()));
        }
        if self.img_size == 0 || self.img_size % self.patch_size != 0 {
            return Err(DinoError::IndivisibleImage {
                height: self.img_size,
                width: self.img_size,
                patch_size: self.patch_size,
            });
        }
        if self.in_channels == 0 {
            return Err(DinoError::InvalidConfig("in_channels must be > 0".into()));
        }
        if self.num_heads == 0 || self.embed_dim % self.num_heads != 0 {
            return Err(DinoError::InvalidConfig(format!(
                "embed_dim {} is not divisible by num_heads {}",
                self.embed_dim, self.num_heads
            )));
        }
        if self.depth == 0 {
            return Err(DinoError::InvalidConfig("depth must be > 0".into()));
        }
        if self.mlp_hidden_dim() == 0 {
            return Err(DinoError::InvalidConfig(format!(
                "mlp_ratio {} yields an empty MLP",
                self.mlp_ratio
            )));
        }
        if let Some(scale) = self.qk_scale {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(DinoError::InvalidConfig(format!(
                    "qk_scale must be positive, got {scale}"
                )));
            }
        }
        for (name, p) in [
            ("drop_rate", self.drop_rate),
            ("attn_drop_rate", self.attn_drop_rate),
            ("drop_path_rate", self.drop_path_rate),
        ] {
            check_probability(name, p)?;
        }
        Ok(())
    }
}

pub(crate) fn check_probability(name: &str, p: f64) -> Result<()> {
    if !(0.0..1.0).contains(&p) {
        return Err(DinoError::InvalidConfig(format!(
            "{name} must be in [0, 1), got {p}"
        )));
    }
    Ok(())
}

// ─── Variant registry ────────────────────────────────────────────────────────

/// Named backbone sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VitVariant {
    Tiny,
    Small,
    Base,
}

/// Shape parameters that distinguish the variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantSpec {
    pub embed_dim: usize,
    pub depth: usize,
    pub num_heads: usize,
    pub mlp_ratio: f64,
}

const REGISTRY: [(VitVariant, VariantSpec); 3] = [
    (
        VitVariant::Tiny,
        VariantSpec {
            embed_dim: 192,
            depth: 12,
            num_heads: 3,
            mlp_ratio: 4.0,
        },
    ),
    (
        VitVariant::Small,
        VariantSpec {
            embed_dim: 384,
            depth: 12,
            num_heads: 6,
            mlp_ratio: 4.0,
        },
    ),
    (
        VitVariant::Base,
        VariantSpec {
            embed_dim: 768,
            depth: 12,
            num_heads: 12,
            mlp_ratio: 4.0,
        },
    ),
];

impl VitVariant {
    pub const ALL: [VitVariant; 3] = [VitVariant::Tiny, VitVariant::Small, VitVariant::Base];

    pub fn spec(self) -> VariantSpec {
        // Registry rows are ordered by discriminant.
        REGISTRY[self as usize].1
    }

    /// Backbone config for this variant. Registry variants use biased qkv
    /// projections and LayerNorm eps 1e-6; everything else keeps the
    /// `VitConfig` defaults and can be overridden with struct update syntax.
    pub fn config(self, patch_size: usize) -> VitConfig {
        let spec = self.spec();
        VitConfig {
            patch_size,
            embed_dim: spec.embed_dim,
            depth: spec.depth,
            num_heads: spec.num_heads,
            mlp_ratio: spec.mlp_ratio,
            qkv_bias: true,
            layer_norm_eps: 1e-6,
            ..VitConfig::default()
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VitVariant::Tiny => "tiny",
            VitVariant::Small => "small",
            VitVariant::Base => "base",
        }
    }
}

impl fmt::Display for VitVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VitVariant {
    type Err = DinoError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        let name = name.strip_prefix("vit_").unwrap_or(&name);
        match name {
            "tiny" => Ok(VitVariant::Tiny),
            "small" => Ok(VitVariant::Small),
            "base" => Ok(VitVariant::Base),
            _ => Err(DinoError::UnknownVariant(s.to_string())),
        }
    }
}

// ─── DINO head ───────────────────────────────────────────────────────────────

/// Configuration of the DINO projection head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DinoHeadConfig {
    pub in_dim: usize,
    pub out_dim: usize,
    #[serde(default = "default_n_layers")]
    pub n_layers: usize,
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
    #[serde(default = "default_bottleneck_dim")]
    pub bottleneck_dim: usize,
}

fn default_n_layers() -> usize {
    3
}

fn default_hidden_dim() -> usize {
    2048
}

fn default_bottleneck_dim() -> usize {
    256
}

impl DinoHeadConfig {
    pub fn new(in_dim: usize, out_dim: usize) -> Self {
        Self {
            in_dim,
            out_dim,
            n_layers: default_n_layers(),
            hidden_dim: default_hidden_dim(),
            bottleneck_dim: default_bottleneck_dim(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_layers == 0 {
            return Err(DinoError::InvalidConfig(
                "dino head needs at least one layer".into(),
            ));
        }
        for (name, v) in [
            ("in_dim", self.in_dim),
            ("out_dim", self.out_dim),
            ("hidden_dim", self.hidden_dim),
            ("bottleneck_dim", self.bottleneck_dim),
        ] {
            if v == 0 {
                return Err(DinoError::InvalidConfig(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_vit_b16_at_224() {
        let cfg = VitConfig::default();
        assert_eq!(cfg.grid_side(), 14);
        assert_eq!(cfg.num_patches(), 196);
        assert_eq!(cfg.seq_len(), 197);
        assert_eq!(cfg.head_dim(), 64);
        assert_eq!(cfg.mlp_hidden_dim(), 3072);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn registry_values() {
        let tiny = VitConfig::tiny(16);
        assert_eq!((tiny.embed_dim, tiny.depth, tiny.num_heads), (192, 12, 3));
        let small = VitConfig::small(8);
        assert_eq!((small.embed_dim, small.num_heads), (384, 6));
        assert_eq!(small.patch_size, 8);
        assert_eq!(small.num_patches(), 784);
        let base = VitConfig::base(16);
        assert_eq!((base.embed_dim, base.num_heads), (768, 12));

        for v in VitVariant::ALL {
            assert_eq!(REGISTRY[v as usize].0, v);
            let cfg = v.config(16);
            assert!(cfg.qkv_bias);
            assert_eq!(cfg.layer_norm_eps, 1e-6);
            assert_eq!(cfg.head_dim(), 64);
            assert!(cfg.validate().is_ok());
        }
    }

    #[test]
    fn parameter_counts() {
        // DINO ViT-S/16 backbone.
        assert_eq!(VitVariant::Small.config(16).num_parameters(), 21_665_664);
        let with_head = VitConfig {
            num_classes: 1000,
            ..VitVariant::Small.config(16)
        };
        assert_eq!(with_head.num_parameters(), 21_665_664 + 384 * 1000 + 1000);
    }

    #[test]
    fn variant_overrides_with_struct_update() {
        let cfg = VitConfig {
            img_size: 96,
            drop_path_rate: 0.1,
            ..VitVariant::Small.config(16)
        };
        assert_eq!(cfg.embed_dim, 384);
        assert_eq!(cfg.num_patches(), 36);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn variant_parsing() {
        assert_eq!("tiny".parse::<VitVariant>().unwrap(), VitVariant::Tiny);
        assert_eq!("vit_small".parse::<VitVariant>().unwrap(), VitVariant::Small);
        assert_eq!(" Base ".parse::<VitVariant>().unwrap(), VitVariant::Base);
        let err = "huge".parse::<VitVariant>().unwrap_err();
        assert!(matches!(err, DinoError::UnknownVariant(ref s) if s == "huge"));
        assert_eq!(VitVariant::Small.to_string(), "small");
    }

    #[test]
    fn drop_path_schedule_is_linspace() {
        let cfg = VitConfig {
            depth: 5,
            drop_path_rate: 0.2,
            ..VitConfig::default()
        };
        let schedule = cfg.drop_path_schedule();
        assert_eq!(schedule.len(), 5);
        assert_eq!(schedule[0], 0.0);
        assert!((schedule[2] - 0.1).abs() < 1e-12);
        assert!((schedule[4] - 0.2).abs() < 1e-12);

        let single = VitConfig {
            depth: 1,
            drop_path_rate: 0.5,
            ..VitConfig::default()
        };
        assert_eq!(single.drop_path_schedule(), vec![0.0]);
    }

    #[test]
    fn validate_rejects_bad_configs() {
        let indivisible = VitConfig {
            img_size: 225,
            ..VitConfig::default()
        };
        assert!(matches!(
            indivisible.validate(),
            Err(DinoError::IndivisibleImage { .. })
        ));

        let heads = VitConfig {
            num_heads: 7,
            ..VitConfig::default()
        };
        assert!(matches!(heads.validate(), Err(DinoError::InvalidConfig(_))));

        let dropout = VitConfig {
            drop_rate: 1.0,
            ..VitConfig::default()
        };
        assert!(matches!(dropout.validate(), Err(DinoError::InvalidConfig(_))));

        let scale = VitConfig {
            qk_scale: Some(-1.0),
            ..VitConfig::default()
        };
        assert!(scale.validate().is_err());
    }

    #[test]
    fn partial_json_overrides() {
        let cfg: VitConfig =
            serde_json::from_str(r#"{"embed_dim": 384, "num_heads": 6, "qkv_bias": true}"#)
                .expect("failed to parse config");
        assert_eq!(cfg.embed_dim, 384);
        assert_eq!(cfg.num_heads, 6);
        assert!(cfg.qkv_bias);
        assert_eq!(cfg.img_size, 224);
        assert_eq!(cfg.qk_scale, None);

        let json = serde_json::to_string(&cfg).unwrap();
        let back: VitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn dino_head_config_defaults() {
        let cfg: DinoHeadConfig =
            serde_json::from_str(r#"{"in_dim": 384, "out_dim": 65536}"#).unwrap();
        assert_eq!(cfg, DinoHeadConfig::new(384, 65536));
        assert_eq!(cfg.n_layers, 3);
        assert_eq!(cfg.hidden_dim, 2048);
        assert_eq!(cfg.bottleneck_dim, 256);
        assert!(cfg.validate().is_ok());

        let bad = DinoHeadConfig {
            n_layers: 0,
            ..cfg
        };
        assert!(bad.validate().is_err());
    }
}
