use facegate_core::codec::{decode_image, DecodeError};
use facegate_core::detector::{DetectorError, FaceDetector};
use facegate_core::extractor::{EmbeddingExtractor, ExtractorError};
use facegate_core::liveness::{LivenessPolicy, LivenessRejection};
use facegate_core::matcher::{MatchError, Matcher};
use facegate_core::types::{BoundingBox, Embedding, MatchResult, StoredEmbedding};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("liveness: {0}")]
    Liveness(#[from] LivenessRejection),
    #[error("no face detected")]
    NoFace,
    #[error("extractor: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("match: {0}")]
    Match(#[from] MatchError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("pipeline did not complete within the configured timeout")]
    Timeout,
    #[error("engine thread spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One detected face as reported by the detect endpoint.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: String,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
    Register {
        image: String,
        reply: oneshot::Sender<Result<Embedding, EngineError>>,
    },
    Recognize {
        image: String,
        gallery: Vec<StoredEmbedding>,
        reply: oneshot::Sender<Result<MatchResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every call is bounded by the configured request timeout so a stuck
/// backend cannot pin a request forever.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Decode the payload and report all detected faces.
    pub async fn detect(&self, image: String) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(EngineRequest::Detect { image, reply: reply_tx }, reply_rx)
            .await
    }

    /// Run the full register pipeline: decode, detect, liveness gate,
    /// extract an embedding from the sole face.
    pub async fn register(&self, image: String) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(EngineRequest::Register { image, reply: reply_tx }, reply_rx)
            .await
    }

    /// Run the full recognize pipeline and match against the caller's gallery.
    pub async fn recognize(
        &self,
        image: String,
        gallery: Vec<StoredEmbedding>,
    ) -> Result<MatchResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(
            EngineRequest::Recognize { image, gallery, reply: reply_tx },
            reply_rx,
        )
        .await
    }

    async fn submit<T>(
        &self,
        request: EngineRequest,
        reply_rx: oneshot::Receiver<Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        match tokio::time::timeout(self.timeout, reply_rx).await {
            Err(_) => Err(EngineError::Timeout),
            Ok(reply) => reply.map_err(|_| EngineError::ChannelClosed)?,
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread takes ownership of the detector, extractor and matcher and
/// serializes all inference — ONNX sessions are `&mut self` and must not
/// be shared. Requests arrive over an mpsc channel with oneshot replies.
pub fn spawn_engine(
    mut detector: Box<dyn FaceDetector>,
    mut extractor: Box<dyn EmbeddingExtractor>,
    matcher: Box<dyn Matcher>,
    liveness: LivenessPolicy,
    similarity_threshold: f32,
    request_timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let result = run_detect(detector.as_mut(), &image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Register { image, reply } => {
                        let result = run_register(
                            detector.as_mut(),
                            extractor.as_mut(),
                            &liveness,
                            &image,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize { image, gallery, reply } => {
                        let result = run_recognize(
                            detector.as_mut(),
                            extractor.as_mut(),
                            matcher.as_ref(),
                            &liveness,
                            similarity_threshold,
                            &image,
                            gallery,
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, timeout: request_timeout })
}

/// Detect pipeline: decode → detect. No liveness, no embedding.
fn run_detect(
    detector: &mut dyn FaceDetector,
    payload: &str,
) -> Result<Vec<DetectedFace>, EngineError> {
    let image = decode_image(payload)?;
    let candidates = detector.detect(&image)?;
    tracing::debug!(faces = candidates.len(), "detect: pipeline complete");
    Ok(candidates
        .into_iter()
        .map(|c| DetectedFace { bbox: c.bbox, confidence: c.confidence })
        .collect())
}

/// Register pipeline: decode → detect → liveness gate → extract.
///
/// The liveness gate only passes frames with exactly one face, so the
/// single-candidate requirement is enforced for register and recognize
/// alike (the two paths deliberately share one multi-face policy).
fn run_register(
    detector: &mut dyn FaceDetector,
    extractor: &mut dyn EmbeddingExtractor,
    liveness: &LivenessPolicy,
    payload: &str,
) -> Result<Embedding, EngineError> {
    let image = decode_image(payload)?;
    let image_area = u64::from(image.width()) * u64::from(image.height());

    let candidates = detector.detect(&image)?;
    liveness.assess(&candidates, image_area)?;

    let face = candidates.into_iter().next().ok_or(EngineError::NoFace)?;
    tracing::debug!(
        confidence = face.confidence,
        bbox = ?face.bbox,
        "register: face accepted"
    );

    Ok(extractor.extract(&face.crop)?)
}

/// Recognize pipeline: decode → detect → liveness gate → extract → match.
fn run_recognize(
    detector: &mut dyn FaceDetector,
    extractor: &mut dyn EmbeddingExtractor,
    matcher: &dyn Matcher,
    liveness: &LivenessPolicy,
    threshold: f32,
    payload: &str,
    gallery: Vec<StoredEmbedding>,
) -> Result<MatchResult, EngineError> {
    let image = decode_image(payload)?;
    let image_area = u64::from(image.width()) * u64::from(image.height());

    let candidates = detector.detect(&image)?;
    liveness.assess(&candidates, image_area)?;

    let face = candidates.into_iter().next().ok_or(EngineError::NoFace)?;
    let embedding = extractor.extract(&face.crop)?;

    let result = matcher.compare(&embedding, &gallery, threshold)?;
    tracing::debug!(
        recognized = result.recognized,
        similarity = result.similarity,
        gallery_size = gallery.len(),
        "recognize: pipeline complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use facegate_core::mock::{MockDetector, MockExtractor};
    use facegate_core::types::FaceCandidate;
    use facegate_core::CosineMatcher;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    fn test_payload(w: u32, h: u32) -> String {
        let img = RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x % 251) as u8, (y % 241) as u8, ((x * y) % 253) as u8])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        BASE64.encode(buf.into_inner())
    }

    fn handle(detector: MockDetector) -> EngineHandle {
        spawn_engine(
            Box::new(detector),
            Box::new(MockExtractor),
            Box::new(CosineMatcher),
            LivenessPolicy::default(),
            0.7,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_detect_reports_faces() {
        let engine = handle(MockDetector::new());
        let faces = engine.detect(test_payload(640, 480)).await.unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox.width, 320);
        assert!((faces[0].confidence - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_detect_invalid_base64() {
        let engine = handle(MockDetector::new());
        let err = engine.detect("!!not-base64!!".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Decode(DecodeError::InvalidBase64(_))));
    }

    #[tokio::test]
    async fn test_register_returns_embedding() {
        let engine = handle(MockDetector::new());
        let embedding = engine.register(test_payload(640, 480)).await.unwrap();
        assert_eq!(embedding.dim(), facegate_core::mock::MOCK_EMBEDDING_DIM);
        assert!((embedding.norm() - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_register_rejects_multiple_faces() {
        let engine = handle(MockDetector { num_faces: 2, ..MockDetector::default() });
        let err = engine.register(test_payload(640, 480)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liveness(LivenessRejection::MultipleFaces { count: 2 })
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_no_face() {
        let engine = handle(MockDetector { num_faces: 0, ..MockDetector::default() });
        let err = engine.register(test_payload(640, 480)).await.unwrap_err();
        assert!(matches!(err, EngineError::Liveness(LivenessRejection::NoFace)));
    }

    #[tokio::test]
    async fn test_register_rejects_small_face() {
        // 20% linear → 4% area, under the 10% floor
        let engine = handle(MockDetector { box_fraction: 0.2, ..MockDetector::default() });
        let err = engine.register(test_payload(640, 480)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liveness(LivenessRejection::FaceTooSmall { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_low_confidence() {
        let engine = handle(MockDetector { confidence: 0.85, ..MockDetector::default() });
        let err = engine.register(test_payload(640, 480)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Liveness(LivenessRejection::LowConfidence { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_then_recognize_round_trip() {
        let engine = handle(MockDetector::new());
        let payload = test_payload(640, 480);

        let enrolled = engine.register(payload.clone()).await.unwrap();
        let gallery = vec![StoredEmbedding {
            identity: "S1".to_string(),
            embedding: enrolled,
        }];

        let result = engine.recognize(payload, gallery).await.unwrap();
        assert!(result.recognized);
        assert_eq!(result.identity.as_deref(), Some("S1"));
        assert!(result.similarity > 0.999);
    }

    #[tokio::test]
    async fn test_recognize_empty_gallery() {
        let engine = handle(MockDetector::new());
        let result = engine
            .recognize(test_payload(640, 480), Vec::new())
            .await
            .unwrap();
        assert!(!result.recognized);
        assert_eq!(result.similarity, 0.0);
    }

    /// Detector that blocks long enough to trip the handle timeout.
    struct SlowDetector;

    impl FaceDetector for SlowDetector {
        fn detect(
            &mut self,
            _image: &RgbImage,
        ) -> Result<Vec<FaceCandidate>, DetectorError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let engine = spawn_engine(
            Box::new(SlowDetector),
            Box::new(MockExtractor),
            Box::new(CosineMatcher),
            LivenessPolicy::default(),
            0.7,
            Duration::from_millis(20),
        )
        .unwrap();
        let err = engine.detect(test_payload(64, 64)).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout));
    }
}
