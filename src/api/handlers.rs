//! HTTP handlers. Each one is a thin adapter from request to a session
//! or session-manager call.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::middleware::ApiSession;
use super::pagination::{Page, paginate};
use crate::remote::RemoteDataSource;
use crate::state::AppState;
use crate::words::service::{self, WordFilter};
use crate::words::{Deck, StatusChange, StatusCounts, Table, Word, WordRef, WordStatus};

// ============================================================================
// Service status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
}

/// GET /api/status
pub async fn status<R: RemoteDataSource>(State(state): State<AppState<R>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.manager.session_count(),
    })
}

// ============================================================================
// Login / logout
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub api_key: String,
    pub message: &'static str,
}

/// Open (or reuse) the principal's session.
///
/// POST /api/v1/login
pub async fn login<R: RemoteDataSource>(
    State(state): State<AppState<R>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let deadline = state.manager.options().login_timeout;

    // Runs detached so a timed-out login still finishes and registers
    let manager = state.manager.clone();
    let opening = tokio::spawn(async move { manager.open(&request.email, &request.password).await });

    let login = match tokio::time::timeout(deadline, opening).await {
        Ok(joined) => joined.map_err(crate::error::Error::from)??,
        Err(_) => {
            tracing::warn!(timeout_ms = deadline.as_millis() as u64, "Login timed out");
            return Err(ApiError::new(StatusCode::GATEWAY_TIMEOUT, "login timed out"));
        }
    };

    let message = if login.reused { "Already logged in" } else { "Login successful" };
    Ok(Json(LoginResponse {
        api_key: login.api_key,
        message,
    }))
}

/// POST /api/v1/logout
pub async fn logout<R: RemoteDataSource>(
    State(state): State<AppState<R>>,
    auth: ApiSession<R>,
) -> Json<serde_json::Value> {
    state.manager.close(&auth.api_key).await;
    Json(serde_json::json!({ "message": "Logged out" }))
}

// ============================================================================
// Reads
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WordsParams {
    pub lang: Option<String>,
    pub status: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// GET /api/v1/words?lang=&status=all|known|learning&page=&page_size=
pub async fn words<R: RemoteDataSource>(
    auth: ApiSession<R>,
    Query(params): Query<WordsParams>,
) -> ApiResult<Json<Page<Word>>> {
    let filter = WordFilter::parse(params.status.as_deref())
        .ok_or_else(|| ApiError::bad_request("status must be one of all, known, learning"))?;
    let words = service::words(&auth.session, filter, params.lang.as_deref()).await?;
    Ok(Json(paginate(&words, params.page, params.page_size)))
}

/// GET /api/v1/decks
pub async fn decks<R: RemoteDataSource>(auth: ApiSession<R>) -> ApiResult<Json<Vec<Deck>>> {
    let decks = service::decks(&auth.session).await?;
    Ok(Json(decks.as_ref().clone()))
}

#[derive(Debug, Default, Deserialize)]
pub struct CountsParams {
    pub lang: Option<String>,
    #[serde(rename = "deckId")]
    pub deck_id: Option<i64>,
}

/// GET /api/v1/status/counts?lang=&deckId=
pub async fn status_counts<R: RemoteDataSource>(
    auth: ApiSession<R>,
    Query(params): Query<CountsParams>,
) -> ApiResult<Json<StatusCounts>> {
    let counts = service::status_counts(&auth.session, params.lang.as_deref(), params.deck_id).await?;
    Ok(Json(counts.as_ref().clone()))
}

/// GET /api/v1/tables
pub async fn tables<R: RemoteDataSource>(auth: ApiSession<R>) -> ApiResult<Json<Vec<Table>>> {
    let tables = service::tables(&auth.session).await?;
    Ok(Json(tables.as_ref().clone()))
}

// ============================================================================
// Writes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    pub items: Vec<WordRef>,
    pub status: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusChangeResponse {
    pub updated: usize,
    pub status: String,
}

/// POST /api/v1/words/status
pub async fn update_status<R: RemoteDataSource>(
    auth: ApiSession<R>,
    Json(request): Json<StatusChangeRequest>,
) -> ApiResult<Json<StatusChangeResponse>> {
    let status: WordStatus = request.status.parse()?;
    let mut change = StatusChange::new(request.items, status);
    if let Some(language) = request.language.filter(|l| !l.trim().is_empty()) {
        change = change.with_language(language);
    }

    let updated = auth.session.write(change).await?;
    Ok(Json(StatusChangeResponse {
        updated,
        status: status.to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub message: &'static str,
    pub generation: u64,
}

/// Foreground refresh regardless of staleness.
///
/// POST /api/v1/refresh
pub async fn refresh<R: RemoteDataSource>(auth: ApiSession<R>) -> ApiResult<Json<RefreshResponse>> {
    let handle = auth.session.refresh().await?;
    Ok(Json(RefreshResponse {
        message: "Mirror refreshed",
        generation: handle.generation(),
    }))
}
