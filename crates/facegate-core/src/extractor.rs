//! Embedding extraction capability and the ArcFace ONNX backend.
//!
//! Extracts fixed-length face embeddings from detector crops. The pipeline
//! treats the extractor as a black box: any failure surfaces as
//! [`ExtractorError`], never a panic.

use crate::types::Embedding;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from SCRFD!) ---
const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // NOT 128.0 — ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Embedding extraction capability consumed by the request pipeline.
pub trait EmbeddingExtractor: Send {
    /// Extract a fixed-length embedding from a cropped face region.
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractorError>;
}

/// ArcFace-based embedding extractor (512-dimensional, w600k_r50 model).
#[derive(Debug)]
pub struct ArcFaceExtractor {
    session: Session,
}

impl ArcFaceExtractor {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ExtractorError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Resize a face crop to the model input size and build a NCHW tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(
            face,
            ARCFACE_INPUT_SIZE,
            ARCFACE_INPUT_SIZE,
            FilterType::Triangle,
        );

        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (c, &channel) in pixel.0.iter().enumerate() {
                tensor[[0, c, y as usize, x as usize]] =
                    (channel as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

impl EmbeddingExtractor for ArcFaceExtractor {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractorError> {
        let input = Self::preprocess(face);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractorError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ExtractorError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so downstream cosine similarity is a plain dot product
        let embedding = Embedding::new(raw.to_vec());
        Ok(embedding.l2_normalized().unwrap_or(embedding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let face = RgbImage::new(80, 60);
        let tensor = ArcFaceExtractor::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization_range() {
        let mut face = RgbImage::new(112, 112);
        for pixel in face.pixels_mut() {
            *pixel = Rgb([0, 128, 255]);
        }
        let tensor = ArcFaceExtractor::preprocess(&face);
        // 0 → -1.0, 255 → +1.0, 128 → ~0.0 under symmetric normalization
        assert!((tensor[[0, 0, 50, 50]] + 1.0).abs() < 1e-5);
        assert!(tensor[[0, 1, 50, 50]].abs() < 0.01);
        assert!((tensor[[0, 2, 50, 50]] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_channels_follow_rgb_order() {
        let mut face = RgbImage::new(10, 10);
        for pixel in face.pixels_mut() {
            *pixel = Rgb([255, 0, 0]);
        }
        let tensor = ArcFaceExtractor::preprocess(&face);
        // Pure red: channel 0 saturated high, channels 1/2 low
        assert!(tensor[[0, 0, 5, 5]] > 0.9);
        assert!(tensor[[0, 1, 5, 5]] < -0.9);
        assert!(tensor[[0, 2, 5, 5]] < -0.9);
    }

    #[test]
    fn test_model_not_found() {
        let err = ArcFaceExtractor::load("/nonexistent/w600k_r50.onnx").unwrap_err();
        assert!(matches!(err, ExtractorError::ModelNotFound(_)));
    }
}
