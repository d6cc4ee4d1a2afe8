//! Face detection capability and the SCRFD ONNX backend.
//!
//! The pipeline consumes detection through the [`FaceDetector`] trait and
//! makes no assumption about candidate ordering. [`ScrfdDetector`] runs the
//! SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS
//! post-processing; [`crate::mock::MockDetector`] is the deterministic
//! alternative for tests and demo deployments.

use crate::types::{BoundingBox, FaceCandidate};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detection capability consumed by the request pipeline.
///
/// May return an empty vec (no face). Callers must not assume any ordering
/// of the returned candidates. `&mut self` because ONNX sessions require
/// exclusive access; the daemon serializes calls on a single engine thread.
pub trait FaceDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceCandidate>, DetectorError>;
}

/// A detection in source-image coordinates, before integer clamping.
#[derive(Debug, Clone, Copy)]
struct RawFace {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self { session, stride_indices })
    }

    /// Preprocess an RGB image into a NCHW float tensor with letterbox padding.
    fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let input = SCRFD_INPUT_SIZE as f32;
        let scale = (input / image.width() as f32).min(input / image.height() as f32);

        let new_w = (image.width() as f32 * scale).round().max(1.0) as u32;
        let new_h = (image.height() as f32 * scale).round().max(1.0) as u32;
        let pad_x = (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0;
        let pad_y = (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0;

        let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let size = SCRFD_INPUT_SIZE as usize;
        let pad_x_start = pad_x.floor() as u32;
        let pad_y_start = pad_y.floor() as u32;

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..SCRFD_INPUT_SIZE {
            for x in 0..SCRFD_INPUT_SIZE {
                let inside = x >= pad_x_start
                    && x < pad_x_start + new_w
                    && y >= pad_y_start
                    && y < pad_y_start + new_h;
                let rgb = if inside {
                    resized.get_pixel(x - pad_x_start, y - pad_y_start).0
                } else {
                    // Pad value normalizes to 0.0
                    [SCRFD_MEAN as u8; 3]
                };
                for (c, &channel) in rgb.iter().enumerate() {
                    tensor[[0, c, y as usize, x as usize]] =
                        (channel as f32 - SCRFD_MEAN) / SCRFD_STD;
                }
            }
        }

        (tensor, LetterboxInfo { scale, pad_x, pad_y })
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceCandidate>, DetectorError> {
        let (input, letterbox) = Self::preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all.extend(decode_stride(scores, bboxes, stride, &letterbox));
        }

        let kept = nms(all, SCRFD_NMS_THRESHOLD);

        let mut candidates: Vec<FaceCandidate> = kept
            .into_iter()
            .filter_map(|raw| to_candidate(&raw, image))
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(candidates)
    }
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports may name tensors "score_8", "bbox_16", ... or use generic
/// numeric names. If the named pattern is present, map names to stride
/// slots; otherwise fall back to the standard positional ordering
/// ([0-2] = scores for strides 8/16/32, [3-5] = bboxes).
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = SCRFD_STRIDES
        .iter()
        .all(|&stride| find("score", stride).is_some() && find("bbox", stride).is_some());

    if named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = SCRFD_STRIDES[i];
            // Presence checked above
            (
                find("score", stride).unwrap_or(i),
                find("bbox", stride).unwrap_or(i + 3),
            )
        })
    } else {
        tracing::info!(
            ?names,
            "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
        );
        [(0, 3), (1, 4), (2, 5)]
    }
}

/// Decode detections for a single stride level, de-mapped to source coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
) -> Vec<RawFace> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCRFD_CONFIDENCE_THRESHOLD {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * stride as f32;
        let anchor_cy = (anchor_idx / grid) as f32 * stride as f32;

        // Bbox regression: [left, top, right, bottom] offsets in stride units
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[off] * stride as f32;
        let y1 = anchor_cy - bboxes[off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[off + 3] * stride as f32;

        detections.push(RawFace {
            x1: (x1 - letterbox.pad_x) / letterbox.scale,
            y1: (y1 - letterbox.pad_y) / letterbox.scale,
            x2: (x2 - letterbox.pad_x) / letterbox.scale,
            y2: (y2 - letterbox.pad_y) / letterbox.scale,
            score,
        });
    }

    detections
}

/// Clamp a raw detection to the image bounds and crop the face region.
/// Returns `None` for boxes that collapse to zero area after clamping.
fn to_candidate(raw: &RawFace, image: &RgbImage) -> Option<FaceCandidate> {
    let w = image.width() as f32;
    let h = image.height() as f32;

    let x1 = raw.x1.clamp(0.0, w);
    let y1 = raw.y1.clamp(0.0, h);
    let x2 = raw.x2.clamp(0.0, w);
    let y2 = raw.y2.clamp(0.0, h);

    let bbox = BoundingBox {
        x: x1.floor() as u32,
        y: y1.floor() as u32,
        width: (x2 - x1).round() as u32,
        height: (y2 - y1).round() as u32,
    };
    if bbox.width == 0 || bbox.height == 0 {
        return None;
    }
    // Re-clamp after rounding so the crop never reads past the edge
    let bbox = BoundingBox {
        width: bbox.width.min(image.width() - bbox.x),
        height: bbox.height.min(image.height() - bbox.y),
        ..bbox
    };

    let crop = image::imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height).to_image();

    Some(FaceCandidate {
        bbox,
        confidence: raw.score.clamp(0.0, 1.0),
        crop,
    })
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<RawFace>, iou_threshold: f32) -> Vec<RawFace> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i]);

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two raw detections.
fn iou(a: &RawFace, b: &RawFace) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
