use facegate_core::LivenessPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Which detector/extractor/matcher backend the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// SCRFD + ArcFace via ONNX Runtime.
    Onnx,
    /// Deterministic mock backend for demos and tests.
    Mock,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Listen address for the HTTP API.
    pub bind_addr: String,
    /// Inference backend selection.
    pub backend: Backend,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity a best match must strictly exceed.
    pub similarity_threshold: f32,
    /// Liveness gate thresholds.
    pub liveness: LivenessPolicy,
    /// Bound on a single detect/register/recognize pipeline run.
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let backend = match std::env::var("FACEGATE_BACKEND").as_deref() {
            Ok("mock") => Backend::Mock,
            Ok("onnx") | Err(_) => Backend::Onnx,
            Ok(other) => {
                tracing::warn!(value = other, "unknown FACEGATE_BACKEND, defaulting to onnx");
                Backend::Onnx
            }
        };

        let defaults = LivenessPolicy::default();

        Self {
            bind_addr: std::env::var("FACEGATE_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            backend,
            model_dir: std::env::var("FACEGATE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            similarity_threshold: env_f32(
                "FACEGATE_SIMILARITY_THRESHOLD",
                facegate_core::matcher::DEFAULT_SIMILARITY_THRESHOLD,
            ),
            liveness: LivenessPolicy {
                min_face_fraction: env_f32(
                    "FACEGATE_MIN_FACE_FRACTION",
                    defaults.min_face_fraction,
                ),
                min_confidence: env_f32("FACEGATE_MIN_CONFIDENCE", defaults.min_confidence),
            },
            request_timeout: Duration::from_secs(env_u64("FACEGATE_REQUEST_TIMEOUT_SECS", 10)),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
