//! Thin JSON API over the session manager.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pagination;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::remote::RemoteDataSource;
use crate::state::AppState;

pub fn router<R: RemoteDataSource>(state: AppState<R>) -> Router {
    let cors = middleware::cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/api/status", get(handlers::status::<R>))
        .route("/api/v1/login", post(handlers::login::<R>))
        .route("/api/v1/logout", post(handlers::logout::<R>))
        .route("/api/v1/words", get(handlers::words::<R>))
        .route("/api/v1/words/status", post(handlers::update_status::<R>))
        .route("/api/v1/decks", get(handlers::decks::<R>))
        .route("/api/v1/status/counts", get(handlers::status_counts::<R>))
        .route("/api/v1/tables", get(handlers::tables::<R>))
        .route("/api/v1/refresh", post(handlers::refresh::<R>))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use super::*;
    use crate::cache::ResultCache;
    use crate::config::{self, SessionConfig};
    use crate::session::SessionManager;
    use crate::testing::{FakeRemote, VALID_SECRET};

    struct Harness {
        server: TestServer,
        remote: Arc<FakeRemote>,
        manager: Arc<SessionManager<FakeRemote>>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let config = config::resolve(None, config::file_only).unwrap();
        let remote = Arc::new(FakeRemote::new());
        let options = SessionConfig {
            refresh_interval: Duration::from_secs(600),
            background_refresh: false,
            ..SessionConfig::default()
        };
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&remote),
            Arc::new(ResultCache::new(config.cache_ttl)),
            dir.path().to_path_buf(),
            options,
        ));
        let state = AppState::new(Arc::clone(&manager), Arc::new(config));
        Harness {
            server: TestServer::new(router(state)).unwrap(),
            remote,
            manager,
            _dir: dir,
        }
    }

    fn api_key_header() -> HeaderName {
        HeaderName::from_static("x-api-key")
    }

    async fn login(h: &Harness) -> String {
        let response = h
            .server
            .post("/api/v1/login")
            .json(&json!({"email": "ana@example.com", "password": VALID_SECRET}))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        response.json::<Value>()["api_key"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_status_needs_no_key() {
        let h = harness();
        let response = h.server.get("/api/status").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<Value>();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn test_login_then_reuse() {
        let h = harness();
        let key = login(&h).await;
        assert_eq!(key.len(), 40);

        let response = h
            .server
            .post("/api/v1/login")
            .json(&json!({"email": "ana@example.com", "password": VALID_SECRET}))
            .await;
        let body = response.json::<Value>();
        assert_eq!(body["message"], "Already logged in");
        assert_eq!(body["api_key"], key.as_str());
        assert_eq!(h.remote.sign_in_calls(), 1);
    }

    #[tokio::test]
    async fn test_bad_password_is_unauthorized() {
        let h = harness();
        let response = h
            .server
            .post("/api/v1/login")
            .json(&json!({"email": "ana@example.com", "password": "nope"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.json::<Value>()["error"], "invalid credentials");
        assert_eq!(h.manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_reads_require_api_key() {
        let h = harness();
        let response = h.server.get("/api/v1/decks").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = h
            .server
            .get("/api/v1/decks")
            .add_header(api_key_header(), HeaderValue::from_static("unknown"))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_words_paginated_and_filtered() {
        let h = harness();
        let key = login(&h).await;
        let value = HeaderValue::from_str(&key).unwrap();

        let response = h
            .server
            .get("/api/v1/words")
            .add_query_param("page", 3)
            .add_header(api_key_header(), value.clone())
            .await;
        let body = response.json::<Value>();
        assert_eq!(body["pagination"]["total"], 150);
        assert_eq!(body["pagination"]["total_pages"], 3);
        assert_eq!(body["pagination"]["has_next"], false);
        assert_eq!(body["data"].as_array().unwrap().len(), 50);

        let response = h
            .server
            .get("/api/v1/words")
            .add_query_param("status", "known")
            .add_query_param("lang", "zh")
            .add_header(api_key_header(), value.clone())
            .await;
        let body = response.json::<Value>();
        let data = body["data"].as_array().unwrap();
        assert!(!data.is_empty());
        assert!(data.iter().all(|w| w["knownStatus"] == "KNOWN"));

        let response = h
            .server
            .get("/api/v1/words")
            .add_query_param("status", "sleeping")
            .add_header(api_key_header(), value)
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bearer_token_accepted() {
        let h = harness();
        let key = login(&h).await;
        let response = h
            .server
            .get("/api/v1/tables")
            .add_header(
                HeaderName::from_static("authorization"),
                HeaderValue::from_str(&format!("Bearer {}", key)).unwrap(),
            )
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>().as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_status_update_flow() {
        let h = harness();
        let key = login(&h).await;
        let value = HeaderValue::from_str(&key).unwrap();

        let response = h
            .server
            .post("/api/v1/words/status")
            .add_header(api_key_header(), value.clone())
            .json(&json!({"items": [{"wordText": "word-1", "secondary": "s1"}], "status": "Ignored"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["updated"], 1);
        assert_eq!(h.remote.push_calls(), 1);

        let response = h
            .server
            .post("/api/v1/words/status")
            .add_header(api_key_header(), value.clone())
            .json(&json!({"items": [{"wordText": "missing"}], "status": "known"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

        let response = h
            .server
            .post("/api/v1/words/status")
            .add_header(api_key_header(), value)
            .json(&json!({"items": [{"wordText": "word-1"}], "status": "forgotten"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(h.remote.push_calls(), 1);
    }

    #[tokio::test]
    async fn test_counts_and_refresh() {
        let h = harness();
        let key = login(&h).await;
        let value = HeaderValue::from_str(&key).unwrap();

        let response = h
            .server
            .get("/api/v1/status/counts")
            .add_header(api_key_header(), value.clone())
            .await;
        let body = response.json::<Value>();
        assert_eq!(body["known_count"], 38);
        assert_eq!(body["ignored_count"], 37);

        let response = h
            .server
            .post("/api/v1/refresh")
            .add_header(api_key_header(), value)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["generation"], 2);
        assert_eq!(h.remote.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_logout_invalidates_key() {
        let h = harness();
        let key = login(&h).await;
        let value = HeaderValue::from_str(&key).unwrap();

        let response = h
            .server
            .post("/api/v1/logout")
            .add_header(api_key_header(), value.clone())
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let response = h.server.get("/api/v1/decks").add_header(api_key_header(), value).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.manager.session_count(), 0);
    }
}
