use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in pixel coordinates of the source image.
///
/// Coordinates are clamped to the image bounds by the detector, so
/// `x + width <= image width` and `y + height <= image height` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Box area in pixels.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A candidate face produced by a detector backend.
///
/// Carries the crop of the face region so the embedding extractor never
/// has to re-derive it from the source image. Request-scoped, never stored.
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    /// RGB crop of the face region.
    pub crop: RgbImage,
}

/// Face embedding vector (512-dimensional for ArcFace, 128 for the mock backend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Return a unit-length copy, or `None` when the vector has zero norm.
    ///
    /// Cosine similarity is undefined for the zero vector, so callers must
    /// decide between failing and skipping rather than dividing by zero.
    pub fn l2_normalized(&self) -> Option<Embedding> {
        let norm = self.norm();
        if norm > 0.0 {
            Some(Embedding::new(self.values.iter().map(|x| x / norm).collect()))
        } else {
            None
        }
    }

    /// Dot product with another embedding of the same dimension.
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// A caller-supplied gallery entry: an identity and its enrolled embedding.
///
/// The daemon never persists these; the caller round-trips them on every
/// recognize request. Uniqueness of identities is the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub identity: String,
    pub embedding: Embedding,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub recognized: bool,
    /// Identity of the best match when recognized.
    pub identity: Option<String>,
    /// Cosine similarity of the best match in [-1, 1], clamped to >= 0
    /// for reporting when no match cleared the threshold.
    pub similarity: f32,
}

impl MatchResult {
    /// The result for an empty or fully-degenerate gallery.
    pub fn no_match() -> Self {
        Self {
            recognized: false,
            identity: None,
            similarity: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_area() {
        let bbox = BoundingBox { x: 10, y: 20, width: 100, height: 50 };
        assert_eq!(bbox.area(), 5000);
    }

    #[test]
    fn test_bbox_area_no_overflow() {
        let bbox = BoundingBox { x: 0, y: 0, width: u32::MAX, height: 2 };
        assert_eq!(bbox.area(), u64::from(u32::MAX) * 2);
    }

    #[test]
    fn test_l2_normalized_unit_length() {
        let e = Embedding::new(vec![3.0, 4.0]);
        let unit = e.l2_normalized().unwrap();
        assert!((unit.norm() - 1.0).abs() < 1e-6);
        assert!((unit.values[0] - 0.6).abs() < 1e-6);
        assert!((unit.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalized_zero_vector() {
        let e = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert!(e.l2_normalized().is_none());
    }

    #[test]
    fn test_dot_product() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        let b = Embedding::new(vec![4.0, 5.0, 6.0]);
        assert!((a.dot(&b) - 32.0).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_serializes_as_bare_array() {
        let e = Embedding::new(vec![0.5, -0.5]);
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, "[0.5,-0.5]");
        let back: Embedding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
