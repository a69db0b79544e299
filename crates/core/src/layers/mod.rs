pub mod attention;
pub mod drop_path;
pub mod mlp;
pub mod normalization;
pub mod patch_embed;

pub use attention::Attention;
pub use drop_path::{drop_path, DropPath};
pub use mlp::Mlp;
pub use normalization::{l2_normalize, weight_norm_linear, WeightNormLinear, L2_NORM_EPS};
pub use patch_embed::{PatchEmbedding, PatchGrid};
