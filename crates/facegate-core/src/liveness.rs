//! Heuristic liveness gate over detector output.
//!
//! Best-effort anti-spoof check only — it rejects frames that are unlikely
//! to be a genuine live capture (no face, crowded frame, distant photo,
//! shaky detection), not a cryptographic liveness proof. Deterministic
//! given identical detector output.

use crate::types::FaceCandidate;
use thiserror::Error;

/// Default minimum fraction of the image the face box must cover.
/// A face below this is treated as a distant or re-photographed capture.
const DEFAULT_MIN_FACE_FRACTION: f32 = 0.1;

/// Default minimum detector confidence for the sole candidate.
const DEFAULT_MIN_CONFIDENCE: f32 = 0.9;

/// Reason a frame was rejected. Rules are evaluated in a fixed order and
/// the first failing rule wins.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LivenessRejection {
    #[error("No face detected")]
    NoFace,
    #[error("Multiple faces detected")]
    MultipleFaces { count: usize },
    #[error("Face too small - possible photo")]
    FaceTooSmall { fraction: f32 },
    #[error("Low face detection confidence")]
    LowConfidence { confidence: f32 },
}

/// Thresholds for the liveness gate.
#[derive(Debug, Clone, Copy)]
pub struct LivenessPolicy {
    pub min_face_fraction: f32,
    pub min_confidence: f32,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            min_face_fraction: DEFAULT_MIN_FACE_FRACTION,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl LivenessPolicy {
    /// Assess a frame's detector output against the gate rules, in order:
    /// exactly one face, covering enough of the frame, detected with high
    /// confidence.
    pub fn assess(
        &self,
        candidates: &[FaceCandidate],
        image_area: u64,
    ) -> Result<(), LivenessRejection> {
        let face = match candidates {
            [] => return Err(LivenessRejection::NoFace),
            [single] => single,
            many => return Err(LivenessRejection::MultipleFaces { count: many.len() }),
        };

        let fraction = if image_area > 0 {
            face.bbox.area() as f32 / image_area as f32
        } else {
            0.0
        };
        if fraction < self.min_face_fraction {
            return Err(LivenessRejection::FaceTooSmall { fraction });
        }

        if face.confidence < self.min_confidence {
            return Err(LivenessRejection::LowConfidence {
                confidence: face.confidence,
            });
        }

        Ok(())
    }
}
