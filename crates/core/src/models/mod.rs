pub mod dino_head;
pub mod vit;

pub use dino_head::DinoHead;
pub use vit::{from_variant, vit_base, vit_small, vit_tiny, Block, VisionTransformer};
