//! reqwest-backed implementation of [`RemoteDataSource`].

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::time::Instant;

use super::{RemoteDataSource, RenewedToken, SyncPayload, TokenGrant, parse_expires_in};
use crate::config::RemoteConfig;
use crate::error::TransportError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: String,
}

#[derive(Deserialize)]
struct RenewResponse {
    access_token: String,
    #[serde(default)]
    expires_in: String,
}

/// HTTP client for the identity, snapshot and sync services.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    config: RemoteConfig,
}

impl HttpRemote {
    pub fn new(config: RemoteConfig) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn keyed(&self, url: &str) -> String {
        if self.config.api_key.is_empty() {
            url.to_string()
        } else {
            format!("{}?key={}", url, self.config.api_key)
        }
    }

    async fn send(&self, method: &Method, url: &str, req: RequestBuilder) -> Result<Response, TransportError> {
        let start = Instant::now();
        let resp = req.send().await.inspect_err(|e| {
            tracing::debug!(%method, url, error = %e, "HTTP request failed");
        })?;
        tracing::debug!(
            %method,
            url,
            status = resp.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "HTTP request completed"
        );
        Ok(resp)
    }

    /// Read the body and turn any non-200 status into `TransportError::Status`.
    async fn expect_ok(resp: Response) -> Result<Response, TransportError> {
        if resp.status() == StatusCode::OK {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::Status { status, body })
    }
}

impl RemoteDataSource for HttpRemote {
    async fn sign_in(&self, principal: &str, secret: &str) -> Result<TokenGrant, TransportError> {
        let url = self.keyed(&self.config.sign_in_url);
        let body = serde_json::json!({
            "email": principal,
            "password": secret,
            "returnSecureToken": true,
        });
        let req = self.client.post(&url).json(&body);
        let resp = Self::expect_ok(self.send(&Method::POST, &self.config.sign_in_url, req).await?).await?;

        let parsed: SignInResponse = resp.json().await?;
        Ok(TokenGrant {
            access_token: parsed.id_token,
            renewal_token: parsed.refresh_token,
            expires_in_secs: parse_expires_in(&parsed.expires_in),
        })
    }

    async fn renew(&self, renewal_token: &str) -> Result<RenewedToken, TransportError> {
        let url = self.keyed(&self.config.token_url);
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": renewal_token,
        });
        let req = self.client.post(&url).json(&body);
        let resp = Self::expect_ok(self.send(&Method::POST, &self.config.token_url, req).await?).await?;

        let parsed: RenewResponse = resp.json().await?;
        Ok(RenewedToken {
            access_token: parsed.access_token,
            expires_in_secs: parse_expires_in(&parsed.expires_in),
        })
    }

    async fn fetch_snapshot(&self, access_token: &str) -> Result<Vec<u8>, TransportError> {
        tracing::debug!("Requesting snapshot download URL");
        let req = self
            .client
            .get(&self.config.snapshot_url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token));
        let resp = Self::expect_ok(self.send(&Method::GET, &self.config.snapshot_url, req).await?).await?;

        let download_url = resp.text().await?.trim().to_string();
        if download_url.is_empty() {
            return Err(TransportError::Decode("empty download url".to_string()));
        }

        tracing::debug!("Downloading snapshot");
        // Presigned URL: no bearer token, the signature is in the query string
        let req = self.client.get(&download_url);
        let resp = Self::expect_ok(self.send(&Method::GET, "<presigned>", req).await?).await?;
        let compressed = resp.bytes().await?;
        tracing::debug!(bytes = compressed.len(), "Downloaded compressed snapshot");
        Ok(compressed.to_vec())
    }

    async fn push(&self, access_token: &str, payload: &SyncPayload) -> Result<(), TransportError> {
        let url = format!(
            "{}/sync?clientSessionId={}",
            self.config.sync_url.trim_end_matches('/'),
            chrono::Utc::now().timestamp_millis()
        );
        tracing::debug!(count = payload.words.len(), "Pushing word updates");
        let req = self
            .client
            .put(&url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .json(payload);
        Self::expect_ok(self.send(&Method::PUT, &url, req).await?).await?;
        tracing::debug!("Push completed");
        Ok(())
    }
}
