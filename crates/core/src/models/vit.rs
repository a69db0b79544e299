//! Vision Transformer backbone.
//!
//! Images are cut into non-overlapping patches, a learned class token is
//! prepended, position embeddings (resampled to the input resolution) are
//! added, and the sequence runs through pre-norm transformer blocks with
//! stochastic depth. The final class-token row is the image feature.

use candle_core::{IndexOp, Module, ModuleT, Tensor};
use candle_nn::{Dropout, Init, LayerNorm, Linear, VarBuilder};
use tracing::debug;

use crate::config::{VitConfig, VitVariant};
use crate::error::{DinoError, Result};
use crate::layers::{Attention, DropPath, Mlp, PatchEmbedding, PatchGrid};
use crate::pos_embed::interpolate_pos_encoding;

// ─── Block ───────────────────────────────────────────────────────────────────

/// Pre-norm transformer block:
/// `x + drop_path(attn(norm1(x)))` then `x + drop_path(mlp(norm2(x)))`.
#[derive(Debug, Clone)]
pub struct Block {
    norm1: LayerNorm,
    attn: Attention,
    drop_path: DropPath,
    norm2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    pub fn new(cfg: &VitConfig, drop_path: f64, vb: VarBuilder) -> candle_core::Result<Self> {
        let dim = cfg.embed_dim;
        let norm1 = candle_nn::layer_norm(dim, cfg.layer_norm_eps, vb.pp("norm1"))?;
        let attn = Attention::new(
            dim,
            cfg.num_heads,
            cfg.qkv_bias,
            cfg.qk_scale,
            cfg.attn_drop_rate as f32,
            cfg.drop_rate as f32,
            vb.pp("attn"),
        )?;
        let norm2 = candle_nn::layer_norm(dim, cfg.layer_norm_eps, vb.pp("norm2"))?;
        let mlp = Mlp::new(
            dim,
            cfg.mlp_hidden_dim(),
            dim,
            cfg.drop_rate as f32,
            vb.pp("mlp"),
        )?;

        Ok(Self {
            norm1,
            attn,
            drop_path: DropPath::new(drop_path)?,
            norm2,
            mlp,
        })
    }

    pub fn drop_path_prob(&self) -> f64 {
        self.drop_path.drop_prob()
    }

    /// Attention weights `[batch, heads, seq, seq]` of this block's
    /// self-attention for the block input `xs`, evaluation mode.
    pub fn attention_map(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let normed = self.norm1.forward(xs)?;
        let (_, weights) = self.attn.forward_with_attention(&normed, false)?;
        Ok(weights)
    }
}

impl ModuleT for Block {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let residual = xs;
        let hidden = self.norm1.forward(xs)?;
        let hidden = self.attn.forward_t(&hidden, train)?;
        let xs = (residual + self.drop_path.forward_t(&hidden, train)?)?;

        let residual = &xs;
        let hidden = self.norm2.forward(&xs)?;
        let hidden = self.mlp.forward_t(&hidden, train)?;
        residual + self.drop_path.forward_t(&hidden, train)?
    }
}

// ─── Vision Transformer ──────────────────────────────────────────────────────

/// ViT backbone returning the class-token feature (or classifier logits when
/// `num_classes > 0`).
#[derive(Debug, Clone)]
pub struct VisionTransformer {
    patch_embed: PatchEmbedding,
    cls_token: Tensor,
    pos_embed: Tensor,
    pos_drop: Dropout,
    blocks: Vec<Block>,
    norm: LayerNorm,
    head: Option<Linear>,
    config: VitConfig,
}

impl VisionTransformer {
    pub fn new(cfg: &VitConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;

        let patch_embed = PatchEmbedding::new(cfg, vb.pp("patch_embed"))?;
        let cls_token = vb.get_with_hints((1, 1, cfg.embed_dim), "cls_token", Init::Const(0.0))?;
        let pos_embed = vb.get_with_hints(
            (1, cfg.seq_len(), cfg.embed_dim),
            "pos_embed",
            Init::Const(0.0),
        )?;

        let vb_blocks = vb.pp("blocks");
        let blocks = cfg
            .drop_path_schedule()
            .into_iter()
            .enumerate()
            .map(|(i, dpr)| Block::new(cfg, dpr, vb_blocks.pp(i)))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let norm = candle_nn::layer_norm(cfg.embed_dim, cfg.layer_norm_eps, vb.pp("norm"))?;
        let head = if cfg.num_classes > 0 {
            Some(candle_nn::linear(
                cfg.embed_dim,
                cfg.num_classes,
                vb.pp("head"),
            )?)
        } else {
            None
        };

        debug!(
            embed_dim = cfg.embed_dim,
            depth = cfg.depth,
            num_heads = cfg.num_heads,
            patch_size = cfg.patch_size,
            num_patches = cfg.num_patches(),
            "built vision transformer"
        );

        Ok(Self {
            patch_embed,
            cls_token,
            pos_embed,
            pos_drop: Dropout::new(cfg.drop_rate as f32),
            blocks,
            norm,
            head,
            config: cfg.clone(),
        })
    }

    /// Patch tokens with the class token prepended and position embeddings
    /// added: `[batch, 1 + patches, embed_dim]`.
    pub fn prepare_tokens(&self, pixel_values: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, _channels, height, width) = pixel_values.dims4()?;
        let grid = self.patch_embed.grid_for(height, width)?;

        let patches = self.patch_embed.forward(pixel_values)?;
        let cls = self
            .cls_token
            .broadcast_as((batch_size, 1, self.config.embed_dim))?;
        let tokens = Tensor::cat(&[&cls, &patches], 1)?;

        let pos_embed = interpolate_pos_encoding(&self.pos_embed, grid)?;
        let tokens = tokens.broadcast_add(&pos_embed)?;
        Ok(self.pos_drop.forward_t(&tokens, train)?)
    }

    /// Every token after the final norm: `[batch, 1 + patches, embed_dim]`.
    pub fn forward_features(&self, pixel_values: &Tensor, train: bool) -> Result<Tensor> {
        let mut hidden = self.prepare_tokens(pixel_values, train)?;
        for block in &self.blocks {
            hidden = block.forward_t(&hidden, train)?;
        }
        Ok(self.norm.forward(&hidden)?)
    }

    /// Class-token feature `[batch, embed_dim]`, or `[batch, num_classes]`
    /// logits when a classifier head is configured.
    pub fn forward_t(&self, pixel_values: &Tensor, train: bool) -> Result<Tensor> {
        let features = self.forward_features(pixel_values, train)?;
        let cls = features.i((.., 0))?.contiguous()?;
        match &self.head {
            Some(head) => Ok(head.forward(&cls)?),
            None => Ok(cls),
        }
    }

    /// Evaluation-mode forward pass.
    pub fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
        self.forward_t(pixel_values, false)
    }

    /// Self-attention weights of the last block,
    /// `[batch, heads, 1 + patches, 1 + patches]`, evaluation mode.
    pub fn last_self_attention(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let (last, rest) = self
            .blocks
            .split_last()
            .ok_or_else(|| DinoError::InvalidConfig("backbone has no blocks".into()))?;

        let mut hidden = self.prepare_tokens(pixel_values, false)?;
        for block in rest {
            hidden = block.forward_t(&hidden, false)?;
        }
        Ok(last.attention_map(&hidden)?)
    }

    /// Patch grid for an image of `height x width` pixels.
    pub fn grid_for(&self, height: usize, width: usize) -> Result<PatchGrid> {
        self.patch_embed.grid_for(height, width)
    }

    pub fn embed_dim(&self) -> usize {
        self.config.embed_dim
    }

    /// Patches at the training resolution.
    pub fn num_patches(&self) -> usize {
        self.patch_embed.num_patches()
    }

    pub fn num_heads(&self) -> usize {
        self.config.num_heads
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn cls_token(&self) -> &Tensor {
        &self.cls_token
    }

    pub fn pos_embed(&self) -> &Tensor {
        &self.pos_embed
    }

    pub fn config(&self) -> &VitConfig {
        &self.config
    }
}

// ─── Factories ───────────────────────────────────────────────────────────────

/// Backbone of a registered size with the given patch size.
pub fn from_variant(
    variant: VitVariant,
    patch_size: usize,
    vb: VarBuilder,
) -> Result<VisionTransformer> {
    VisionTransformer::new(&variant.config(patch_size), vb)
}

/// ViT-Tiny: 192 dims, 12 blocks, 3 heads.
pub fn vit_tiny(patch_size: usize, vb: VarBuilder) -> Result<VisionTransformer> {
    from_variant(VitVariant::Tiny, patch_size, vb)
}

/// ViT-Small: 384 dims, 12 blocks, 6 heads.
pub fn vit_small(patch_size: usize, vb: VarBuilder) -> Result<VisionTransformer> {
    from_variant(VitVariant::Small, patch_size, vb)
}

/// ViT-Base: 768 dims, 12 blocks, 12 heads.
pub fn vit_base(patch_size: usize, vb: VarBuilder) -> Result<VisionTransformer> {
    from_variant(VitVariant::Base, patch_size, vb)
}
