//! API key extractor and cross-origin policy.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, Method, header, request::Parts},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::error::ApiError;
use crate::remote::RemoteDataSource;
use crate::session::Session;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// API key from `X-Api-Key`, falling back to `Authorization: Bearer`.
pub fn api_key(headers: &HeaderMap) -> Option<String> {
    let explicit = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());
    if let Some(key) = explicit {
        return Some(key.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// Authenticated request context.
/// Add this as a handler parameter to require a live session.
pub struct ApiSession<R> {
    pub api_key: String,
    pub session: Arc<Session<R>>,
}

impl<R: RemoteDataSource> FromRequestParts<AppState<R>> for ApiSession<R> {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState<R>) -> Result<Self, Self::Rejection> {
        let api_key = api_key(&parts.headers).ok_or_else(|| ApiError::unauthorized("API key required"))?;
        let session = state
            .manager
            .get_by_api_key(&api_key)
            .ok_or_else(|| ApiError::unauthorized("invalid or expired API key"))?;
        Ok(ApiSession { api_key, session })
    }
}

/// CORS for the configured origins; `*` (or nothing) allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
