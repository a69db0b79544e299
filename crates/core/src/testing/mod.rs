//! Shared test utilities for dino-core.
//!
//! Tiny model configurations that build in milliseconds on CPU, for unit
//! and integration tests.

use crate::config::{DinoHeadConfig, VitConfig};

/// Tiny backbone: 32x32 images, 8x8 patches (4x4 grid), 32 dims, 2 blocks,
/// 4 heads.
pub fn tiny_vit_config() -> VitConfig {
    VitConfig {
        img_size: 32,
        patch_size: 8,
        in_channels: 3,
        num_classes: 0,
        embed_dim: 32,
        depth: 2,
        num_heads: 4,
        mlp_ratio: 2.0,
        qkv_bias: true,
        layer_norm_eps: 1e-6,
        ..VitConfig::default()
    }
}

/// Tiny head on top of [`tiny_vit_config`].
pub fn tiny_head_config() -> DinoHeadConfig {
    DinoHeadConfig {
        in_dim: 32,
        out_dim: 64,
        n_layers: 3,
        hidden_dim: 48,
        bottleneck_dim: 16,
    }
}
