//! Remote collaborator: authentication exchange, snapshot download and
//! write-back push.
//!
//! The core only talks to the remote through [`RemoteDataSource`], so the
//! session manager can be driven by the HTTP client in production and by a
//! scripted fake in tests.

pub mod http;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;

pub use http::HttpRemote;

/// Lifetime assumed when the remote omits or garbles `expiresIn`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Tokens returned by the initial principal+secret exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub renewal_token: String,
    pub expires_in_secs: u64,
}

/// Tokens returned by a renewal exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewedToken {
    pub access_token: String,
    pub expires_in_secs: u64,
}

/// One mutated record pushed back to the remote (a full word row).
pub type SyncRecord = Map<String, Value>;

/// Body of a write-back push. Only `words` is ever populated; the remote
/// expects every other collection to be present and empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub decks: Vec<Value>,
    pub card_types: Vec<Value>,
    pub cards: Vec<Value>,
    pub card_word_relations: Vec<Value>,
    pub vacations: Vec<Value>,
    pub reviews: Vec<Value>,
    pub words: Vec<SyncRecord>,
    pub config: Option<Value>,
    pub key_value: Vec<Value>,
    pub learning_materials: Vec<Value>,
    pub lessons: Vec<Value>,
    pub review_history: Vec<Value>,
}

impl SyncPayload {
    pub fn words(words: Vec<SyncRecord>) -> Self {
        Self {
            decks: Vec::new(),
            card_types: Vec::new(),
            cards: Vec::new(),
            card_word_relations: Vec::new(),
            vacations: Vec::new(),
            reviews: Vec::new(),
            words,
            config: None,
            key_value: Vec::new(),
            learning_materials: Vec::new(),
            lessons: Vec::new(),
            review_history: Vec::new(),
        }
    }
}

/// Longest token lifetime taken at face value.
pub const MAX_EXPIRES_IN_SECS: u64 = 86_400;

/// Parse an `expiresIn` field the way the identity service sends it
/// (a decimal string), falling back to one hour and capped at one day.
pub fn parse_expires_in(raw: &str) -> u64 {
    match raw.trim().parse::<i64>() {
        Ok(secs) if secs > 0 => (secs as u64).min(MAX_EXPIRES_IN_SECS),
        _ => DEFAULT_EXPIRES_IN_SECS,
    }
}

/// The remote services the session core depends on.
///
/// Implementations are plain request/response adapters: retries, renewal
/// and decompression are the caller's job.
pub trait RemoteDataSource: Send + Sync + 'static {
    /// Exchange a principal's long-term secret for tokens.
    fn sign_in(
        &self,
        principal: &str,
        secret: &str,
    ) -> impl Future<Output = Result<TokenGrant, TransportError>> + Send;

    /// Exchange a renewal token for a new access token.
    fn renew(
        &self,
        renewal_token: &str,
    ) -> impl Future<Output = Result<RenewedToken, TransportError>> + Send;

    /// Download the gzip-compressed snapshot of the remote dataset.
    fn fetch_snapshot(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Push a batch of mutated records. A non-success status means nothing
    /// was applied.
    fn push(
        &self,
        access_token: &str,
        payload: &SyncPayload,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
