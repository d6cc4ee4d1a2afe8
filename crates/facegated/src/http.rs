use crate::engine::{EngineError, EngineHandle};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use facegate_core::types::{Embedding, StoredEmbedding};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the API router. The engine handle is the only shared state.
pub fn router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/detect-face", post(detect_face))
        .route("/api/register-face", post(register_face))
        .route("/api/recognize-face", post(recognize_face))
        .layer(TraceLayer::new_for_http())
        // The API fronts a browser webcam client
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DetectRequest {
    image: String,
}

#[derive(Debug, Serialize)]
struct FaceInfo {
    /// `[x, y, width, height]` in pixel coordinates.
    bbox: [u32; 4],
    confidence: f32,
}

#[derive(Debug, Serialize)]
struct DetectResponse {
    faces_detected: usize,
    faces: Vec<FaceInfo>,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    image: String,
    student_id: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    success: bool,
    student_id: String,
    embedding: Embedding,
    face_detected: bool,
    liveness_passed: bool,
}

#[derive(Debug, Deserialize)]
struct GalleryEntry {
    student_id: String,
    embedding: Embedding,
}

#[derive(Debug, Deserialize)]
struct RecognizeRequest {
    image: String,
    embeddings: Vec<GalleryEntry>,
}

#[derive(Debug, Serialize)]
struct RecognizeResponse {
    recognized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    student_id: Option<String>,
    confidence: f32,
    liveness_passed: bool,
}

/// Client-visible failure: `{error, message?}`. Internals are logged
/// server-side and never leak into this payload.
#[derive(Debug, Serialize)]
struct ApiError {
    #[serde(skip_serializing)]
    status: StatusCode,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ApiError {
    fn bad_request(error: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.to_string(),
            message: None,
        }
    }

    fn internal(error: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: error.to_string(),
            message: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Map a pipeline failure to the wire taxonomy.
///
/// Caller mistakes (bad payload, gate rejections) are 400 with a distinct
/// reason; backend failures collapse to the operation's generic 500.
fn map_engine_error(err: EngineError, operation_failed: &str) -> ApiError {
    tracing::error!(error = %err, "pipeline error");
    match err {
        EngineError::Decode(_) => ApiError::bad_request("Invalid image format"),
        EngineError::Liveness(rejection) => ApiError {
            status: StatusCode::BAD_REQUEST,
            error: "Liveness check failed".to_string(),
            message: Some(rejection.to_string()),
        },
        EngineError::NoFace => ApiError::bad_request("No face detected"),
        EngineError::Extractor(_) | EngineError::Match(_) => {
            ApiError::internal("Failed to generate face embedding")
        }
        EngineError::Detector(_)
        | EngineError::ChannelClosed
        | EngineError::Timeout
        | EngineError::Spawn(_) => ApiError::internal(operation_failed),
    }
}

/// Unwrap a JSON body, turning axum's rejection into the endpoint's
/// required-fields error (400, matching the rest of the error taxonomy).
fn require_body<T>(
    body: Result<Json<T>, JsonRejection>,
    required: &str,
) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            tracing::warn!(error = %rejection, "malformed request body");
            Err(ApiError::bad_request(required))
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "Face Recognition API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn detect_face(
    State(engine): State<EngineHandle>,
    body: Result<Json<DetectRequest>, JsonRejection>,
) -> Result<Json<DetectResponse>, ApiError> {
    let request = require_body(body, "No image provided")?;

    let faces = engine
        .detect(request.image)
        .await
        .map_err(|e| map_engine_error(e, "Face detection failed"))?;

    Ok(Json(DetectResponse {
        faces_detected: faces.len(),
        faces: faces
            .into_iter()
            .map(|f| FaceInfo {
                bbox: [f.bbox.x, f.bbox.y, f.bbox.width, f.bbox.height],
                confidence: f.confidence,
            })
            .collect(),
    }))
}

async fn register_face(
    State(engine): State<EngineHandle>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let request = require_body(body, "Image and student_id required")?;

    let embedding = engine
        .register(request.image)
        .await
        .map_err(|e| map_engine_error(e, "Face registration failed"))?;

    tracing::info!(student_id = %request.student_id, dim = embedding.dim(), "face registered");

    Ok(Json(RegisterResponse {
        success: true,
        student_id: request.student_id,
        embedding,
        face_detected: true,
        liveness_passed: true,
    }))
}

async fn recognize_face(
    State(engine): State<EngineHandle>,
    body: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let request = require_body(body, "Image and embeddings required")?;

    let gallery: Vec<StoredEmbedding> = request
        .embeddings
        .into_iter()
        .map(|entry| StoredEmbedding {
            identity: entry.student_id,
            embedding: entry.embedding,
        })
        .collect();

    let result = engine
        .recognize(request.image, gallery)
        .await
        .map_err(|e| map_engine_error(e, "Face recognition failed"))?;

    Ok(Json(RecognizeResponse {
        recognized: result.recognized,
        student_id: result.identity,
        confidence: result.similarity,
        liveness_passed: true,
    }))
}
