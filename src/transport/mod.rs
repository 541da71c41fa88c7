//! HTTP transport layer for idlink.
//!
//! Exposes the engine as a small JSON API:
//!
//! | Method | Path        | Body                          | Response                        |
//! |--------|-------------|-------------------------------|---------------------------------|
//! | POST   | `/identify` | `{"email"?, "phoneNumber"?}`  | `{"contact": {...}}`            |
//! | GET    | `/health`   | -                             | `{"status": "ok", ...}`         |
//!
//! Invalid input maps to `400` with the validation message. Every other
//! failure maps to `500` with a fixed message; details go to the log only.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::IdentityEngine;
use crate::error::IdentityError;
use crate::identity::IdentifyResponse;

// ----------------------------------------------------------------------------
// Limits (DoS protection)
// ----------------------------------------------------------------------------

/// Maximum size of a request body.
const MAX_BODY_BYTES: usize = 64 * 1024; // 64 KiB

/// Message returned for every non-validation failure.
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<IdentityEngine>,
}

impl AppState {
    /// Wraps an engine for use by the handlers.
    #[must_use]
    pub fn new(engine: Arc<IdentityEngine>) -> Self {
        Self { engine }
    }
}

/// Builds the HTTP router.
pub fn router(engine: Arc<IdentityEngine>) -> Router {
    Router::new()
        .route("/identify", post(identify))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(engine))
}

/// `POST /identify` request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    /// Email address, if any.
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number, if any. JSON numbers are accepted and kept in decimal form.
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "phoneNumber must be a string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
}

/// Failure of a handler, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    /// The request was malformed or carried no usable contact fact.
    BadRequest(String),
    /// Anything else.
    Internal,
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Validation(v) => Self::BadRequest(v.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    retryable = other.is_retryable(),
                    inconsistent = other.is_inconsistent_state(),
                    "identify failed"
                );
                Self::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR_MESSAGE.to_string(),
            ),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

async fn identify(
    State(state): State<AppState>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let Json(request) = payload?;
    let engine = Arc::clone(&state.engine);

    // Store calls block; keep them off the async workers.
    let identity = tokio::task::spawn_blocking(move || {
        engine.identify(request.email, request.phone_number)
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "identify task failed");
        ApiError::Internal
    })??;

    Ok(Json(IdentifyResponse::from(identity)))
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
