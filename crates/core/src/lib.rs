//! Vision Transformer backbone and DINO projection head on candle.
//!
//! The backbone accepts images at any resolution divisible by its patch
//! size; position embeddings learned at the training resolution are
//! resampled bicubically to the input's patch grid.

pub mod config;
pub mod error;
pub mod init;
pub mod layers;
pub mod loader;
pub mod models;
pub mod pos_embed;
pub mod resample;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{DinoHeadConfig, VitConfig, VitVariant};
pub use error::{DinoError, Result};
pub use layers::PatchGrid;
pub use models::{DinoHead, VisionTransformer};
pub use pos_embed::interpolate_pos_encoding;
