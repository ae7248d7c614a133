//! HTTP surface: request flow through cache -> matcher -> decider.
//!
//! Expected negative outcomes of a live camera feed (no face, poor
//! quality, unknown identity) are 200 responses with a discriminating
//! `status` field; error codes are reserved for caller mistakes and
//! actual failures.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use rollcall_core::store::EmbedError;
use rollcall_core::{
    AttendanceDecider, CosineMatcher, EmbeddingCache, EmbeddingProvider, MatchError, MatchOutcome,
    Matcher, RecordStore,
};

use crate::auth::TokenVerifier;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub cache: Arc<EmbeddingCache>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub matcher: Arc<CosineMatcher>,
    pub decider: Arc<AttendanceDecider>,
}

pub enum ApiError {
    Auth,
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Auth => (
                StatusCode::FORBIDDEN,
                "Unauthorized request. Invalid or missing token.".to_string(),
            ),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Log the underlying failure, hand the caller a generic 500.
fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "request failed");
    ApiError::Internal("An internal server error occurred.".to_string())
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/recognize", post(recognize))
        .route("/generate-embedding", post(generate_embedding))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
struct ImageRequest {
    image: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<crate::auth::Claims, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Auth)?;
    state.verifier.verify(token).await.map_err(|e| {
        tracing::debug!(error = %e, "token rejected");
        ApiError::Auth
    })
}

fn decode_image(body: ImageRequest) -> Result<Vec<u8>, ApiError> {
    let image = body
        .image
        .ok_or_else(|| ApiError::BadRequest("Missing image data in request.".to_string()))?;
    base64::engine::general_purpose::STANDARD
        .decode(image.as_bytes())
        .map_err(|_| ApiError::BadRequest("Image data is not valid base64.".to_string()))
}

fn soft(status: &str, message: String) -> Json<serde_json::Value> {
    Json(json!({ "status": status, "message": message }))
}

async fn recognize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ImageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authorize(&state, &headers).await?;

    state.cache.ensure_fresh(state.store.as_ref()).await;

    let image = decode_image(body)?;

    let embedding = match state.embedder.embed(&image).await {
        Ok(e) => e,
        Err(EmbedError::NoFace) => {
            return Ok(soft(
                "no_face_detected",
                "Could not detect a face in the provided image.".to_string(),
            ))
        }
        Err(e) => return Err(internal(e)),
    };

    let snapshot = state.cache.snapshot().await;
    let outcome = state
        .matcher
        .compare(&embedding, &snapshot)
        .map_err(|e| match e {
            MatchError::NoEnrollmentData => ApiError::Internal(
                "No enrolled faces found. Please enroll students first.".to_string(),
            ),
        })?;

    let identity = match outcome {
        MatchOutcome::PoorQuality { mean_distance, .. } => {
            return Ok(soft(
                "poor_quality",
                format!("Image quality too poor to match. Mean sample distance: {mean_distance:.4}"),
            ))
        }
        MatchOutcome::Unknown { closest, .. } => {
            return Ok(soft(
                "unknown",
                format!("No confident match found. Closest distance: {closest:.4}"),
            ))
        }
        MatchOutcome::Matched {
            identity,
            distance,
            compared,
        } => {
            tracing::debug!(identity = %identity, distance, compared, "face matched");
            identity
        }
    };

    let Some(student) = state.store.find_student(&identity).await.map_err(internal)? else {
        return Ok(soft(
            "unknown",
            format!("Matching face found but no student record for authUid {identity}."),
        ));
    };

    let caller = claims.email.as_deref().unwrap_or("unknown_admin");
    let decision = state
        .decider
        .record(&student, &identity, caller)
        .await
        .map_err(internal)?;

    let name = student
        .record
        .full_name
        .unwrap_or_else(|| "Unknown Student".to_string());
    Ok(Json(json!({
        "status": "recognized",
        "message": format!("Welcome, {name}!"),
        "studentName": name,
        "studentUid": student.doc_id,
        "attendanceStatus": decision.status,
    })))
}

async fn generate_embedding(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ImageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Unlike the recognize flow this endpoint serves enrollment tooling,
    // but it still requires the same bearer token.
    authorize(&state, &headers).await?;

    let image = decode_image(body)?;
    match state.embedder.embed(&image).await {
        Ok(embedding) => Ok(Json(json!({ "embedding": embedding.values }))),
        Err(EmbedError::NoFace) => Err(ApiError::Internal(
            "Could not generate embedding.".to_string(),
        )),
        Err(e) => Err(internal(e)),
    }
}
