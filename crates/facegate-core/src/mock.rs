//! Deterministic mock backends for tests and demo deployments.
//!
//! Selected by daemon configuration (`FACEGATE_BACKEND=mock`) — an
//! alternate implementation of the same capability traits, not a parallel
//! code path. Both backends are pure functions of their input, so a
//! register-then-recognize round trip over the same image yields cosine
//! similarity 1.0.

use crate::detector::{DetectorError, FaceDetector};
use crate::extractor::{EmbeddingExtractor, ExtractorError};
use crate::types::{BoundingBox, Embedding, FaceCandidate};
use image::RgbImage;

/// Embedding length produced by [`MockExtractor`].
pub const MOCK_EMBEDDING_DIM: usize = 128;

/// Confidence reported for every mock detection.
const MOCK_CONFIDENCE: f32 = 0.95;

/// Detector that reports a fixed number of centered faces.
///
/// Each face is a box covering `box_fraction` of the frame in each
/// dimension (default 0.5, i.e. 25% of the area — comfortably above the
/// liveness gate's 10% floor).
pub struct MockDetector {
    pub num_faces: usize,
    pub box_fraction: f32,
    pub confidence: f32,
}

impl Default for MockDetector {
    fn default() -> Self {
        Self {
            num_faces: 1,
            box_fraction: 0.5,
            confidence: MOCK_CONFIDENCE,
        }
    }
}

impl MockDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FaceDetector for MockDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceCandidate>, DetectorError> {
        let box_w = ((image.width() as f32 * self.box_fraction) as u32).max(1);
        let box_h = ((image.height() as f32 * self.box_fraction) as u32).max(1);

        let mut candidates = Vec::with_capacity(self.num_faces);
        for i in 0..self.num_faces {
            // First face centered; additional faces offset toward the
            // origin so overlapping boxes stay within bounds.
            let center_x = (image.width() - box_w) / 2;
            let center_y = (image.height() - box_h) / 2;
            let shift = (i as u32 * 7) % (center_x.max(1));
            let x = center_x - shift.min(center_x);
            let y = center_y;

            let bbox = BoundingBox { x, y, width: box_w, height: box_h };
            let crop = image::imageops::crop_imm(image, x, y, box_w, box_h).to_image();
            candidates.push(FaceCandidate {
                bbox,
                confidence: self.confidence,
                crop,
            });
        }

        Ok(candidates)
    }
}

/// Extractor that derives a 128-dim embedding from pixel statistics.
///
/// Channel values (offset by one so the vector never has zero norm) are
/// accumulated into dimension buckets and L2-normalized. Identical crops
/// produce identical embeddings.
pub struct MockExtractor;

impl EmbeddingExtractor for MockExtractor {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractorError> {
        let mut buckets = vec![0.0f32; MOCK_EMBEDDING_DIM];
        for (i, channel) in face.as_raw().iter().enumerate() {
            buckets[i % MOCK_EMBEDDING_DIM] += f32::from(*channel) + 1.0;
        }

        let embedding = Embedding::new(buckets);
        Ok(embedding.l2_normalized().unwrap_or(embedding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_mock_detector_single_centered_face() {
        let image = gradient_image(640, 480);
        let faces = MockDetector::new().detect(&image).unwrap();
        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert_eq!(face.bbox.width, 320);
        assert_eq!(face.bbox.height, 240);
        assert_eq!(face.bbox.x, 160);
        assert_eq!(face.bbox.y, 120);
        assert!((face.confidence - 0.95).abs() < 1e-6);
        // Covers 25% of the frame — passes the 10% liveness floor
        assert!(face.bbox.area() as f32 / (640.0 * 480.0) > 0.1);
    }

    #[test]
    fn test_mock_detector_multiple_faces() {
        let image = gradient_image(320, 240);
        let mut detector = MockDetector { num_faces: 3, ..MockDetector::default() };
        let faces = detector.detect(&image).unwrap();
        assert_eq!(faces.len(), 3);
        for face in &faces {
            assert!(face.bbox.x + face.bbox.width <= image.width());
            assert!(face.bbox.y + face.bbox.height <= image.height());
        }
    }

    #[test]
    fn test_mock_detector_no_faces() {
        let image = gradient_image(64, 64);
        let mut detector = MockDetector { num_faces: 0, ..MockDetector::default() };
        assert!(detector.detect(&image).unwrap().is_empty());
    }

    #[test]
    fn test_mock_detector_deterministic() {
        let image = gradient_image(100, 100);
        let a = MockDetector::new().detect(&image).unwrap();
        let b = MockDetector::new().detect(&image).unwrap();
        assert_eq!(a[0].bbox, b[0].bbox);
        assert_eq!(a[0].crop.as_raw(), b[0].crop.as_raw());
    }

    #[test]
    fn test_mock_extractor_dimension_and_unit_norm() {
        let image = gradient_image(50, 40);
        let embedding = MockExtractor.extract(&image).unwrap();
        assert_eq!(embedding.dim(), MOCK_EMBEDDING_DIM);
        assert!((embedding.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mock_extractor_identical_crops_identical_embeddings() {
        let image = gradient_image(50, 40);
        let a = MockExtractor.extract(&image).unwrap();
        let b = MockExtractor.extract(&image).unwrap();
        assert_eq!(a, b);
        assert!((a.dot(&b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mock_extractor_distinct_images_differ() {
        let a = MockExtractor.extract(&gradient_image(50, 40)).unwrap();
        let solid = RgbImage::from_pixel(50, 40, Rgb([200, 10, 10]));
        let b = MockExtractor.extract(&solid).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_mock_extractor_black_image_nonzero_norm() {
        // All-zero pixels must still yield a usable (non-degenerate) vector
        let black = RgbImage::new(16, 16);
        let embedding = MockExtractor.extract(&black).unwrap();
        assert!(embedding.norm() > 0.0);
    }

    #[test]
    fn test_round_trip_same_image_similarity_one() {
        let image = gradient_image(640, 480);
        let mut detector = MockDetector::new();
        let faces = detector.detect(&image).unwrap();
        let enrolled = MockExtractor.extract(&faces[0].crop).unwrap();

        let faces_again = detector.detect(&image).unwrap();
        let probe = MockExtractor.extract(&faces_again[0].crop).unwrap();

        assert!((probe.dot(&enrolled) - 1.0).abs() < 1e-5);
    }
}
