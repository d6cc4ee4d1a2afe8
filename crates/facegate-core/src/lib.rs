//! facegate-core — Face matching pipeline building blocks.
//!
//! Decodes base64 camera captures, gates frames through a heuristic
//! liveness check, and matches face embeddings by cosine similarity.
//! Detection and embedding extraction are pluggable backends: SCRFD and
//! ArcFace via ONNX Runtime for real deployments, deterministic mocks
//! for tests and demos.

pub mod codec;
pub mod detector;
pub mod extractor;
pub mod liveness;
pub mod matcher;
pub mod mock;
pub mod types;

pub use codec::{decode_image, DecodeError};
pub use detector::{DetectorError, FaceDetector, ScrfdDetector};
pub use extractor::{ArcFaceExtractor, EmbeddingExtractor, ExtractorError};
pub use liveness::{LivenessPolicy, LivenessRejection};
pub use matcher::{CosineMatcher, FirstEntryMatcher, MatchError, Matcher};
pub use types::{BoundingBox, Embedding, FaceCandidate, MatchResult, StoredEmbedding};
