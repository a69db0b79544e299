use std::path::PathBuf;

use thiserror::Error;

/// Result alias used by every shape-validating entry point in dino-core.
pub type Result<T> = std::result::Result<T, DinoError>;

#[derive(Error, Debug)]
pub enum DinoError {
    #[error("image {height}x{width} is not divisible by patch size {patch_size}")]
    IndivisibleImage {
        height: usize,
        width: usize,
        patch_size: usize,
    },

    #[error("position table holds {num_patches} patch rows, which is not a perfect square")]
    NonSquarePositionGrid { num_patches: usize },

    #[error("patch grid {height}x{width} is empty")]
    EmptyPatchGrid { height: usize, width: usize },

    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unknown model variant: {0}")]
    UnknownVariant(String),

    #[error("tensor '{name}' not found in {}", path.display())]
    MissingTensor { name: String, path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_indivisible_image() {
        let e = DinoError::IndivisibleImage {
            height: 225,
            width: 224,
            patch_size: 16,
        };
        assert_eq!(
            e.to_string(),
            "image 225x224 is not divisible by patch size 16"
        );
    }

    #[test]
    fn error_display_non_square_grid() {
        let e = DinoError::NonSquarePositionGrid { num_patches: 12 };
        assert_eq!(
            e.to_string(),
            "position table holds 12 patch rows, which is not a perfect square"
        );
    }

    #[test]
    fn error_display_shape_mismatch() {
        let e = DinoError::ShapeMismatch {
            what: "pixel channels",
            expected: "3".into(),
            actual: "1".into(),
        };
        assert_eq!(
            e.to_string(),
            "shape mismatch for pixel channels: expected 3, got 1"
        );
    }

    #[test]
    fn candle_errors_convert() {
        let e: DinoError = candle_core::Error::Msg("boom".into()).into();
        assert!(matches!(e, DinoError::Candle(_)));
    }

    #[test]
    fn error_display_missing_tensor() {
        let e = DinoError::MissingTensor {
            name: "pixel_values".into(),
            path: PathBuf::from("/tmp/input.safetensors"),
        };
        assert_eq!(
            e.to_string(),
            "tensor 'pixel_values' not found in /tmp/input.safetensors"
        );
    }
}
