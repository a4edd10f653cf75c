//! Registry of open sessions, keyed by scope key.
//!
//! The manager is constructed once at startup and passed explicitly to
//! whoever needs it (the HTTP state, tests). It owns the shared result
//! cache and hands every session a mirror path under the data directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;

use super::scope::{generate_api_key, scope_key};
use super::Session;
use crate::cache::ResultCache;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::mirror::{MirrorStore, Row};
use crate::paths;
use crate::remote::RemoteDataSource;
use crate::words::StatusChange;

struct Entry<R> {
    session: Arc<Session<R>>,
    api_key: String,
    secret_digest: String,
}

/// Result of [`SessionManager::open`].
pub struct Login<R> {
    pub api_key: String,
    pub session: Arc<Session<R>>,
    /// True when an already open session was returned.
    pub reused: bool,
}

pub struct SessionManager<R> {
    remote: Arc<R>,
    cache: Arc<ResultCache>,
    data_dir: PathBuf,
    options: SessionConfig,
    sessions: RwLock<HashMap<String, Entry<R>>>,
    api_keys: RwLock<HashMap<String, String>>,
    /// Per-scope gates so two logins for one principal never race
    open_gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

fn secret_digest(scope: &str, secret: &str) -> String {
    let hash = Sha256::digest(format!("{}:{}", scope, secret).as_bytes());
    hex::encode(hash)
}

impl<R: RemoteDataSource> SessionManager<R> {
    pub fn new(remote: Arc<R>, cache: Arc<ResultCache>, data_dir: PathBuf, options: SessionConfig) -> Self {
        Self {
            remote,
            cache,
            data_dir,
            options,
            sessions: RwLock::new(HashMap::new()),
            api_keys: RwLock::new(HashMap::new()),
            open_gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn options(&self) -> &SessionConfig {
        &self.options
    }

    fn open_gate(&self, scope: &str) -> Arc<AsyncMutex<()>> {
        let mut gates = self.open_gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(scope.to_string()).or_default())
    }

    /// Open a session for `principal`, or return the one already open.
    ///
    /// An open session is reused only when `secret` matches the one it was
    /// opened with; otherwise the old session is closed and the principal
    /// authenticates again.
    pub async fn open(&self, principal: &str, secret: &str) -> Result<Login<R>> {
        self.open_with_interval(principal, secret, self.options.refresh_interval).await
    }

    /// [`SessionManager::open`] with a per-session refresh interval. A
    /// reused session keeps the interval it was opened with.
    pub async fn open_with_interval(
        &self,
        principal: &str,
        secret: &str,
        refresh_interval: Duration,
    ) -> Result<Login<R>> {
        if principal.trim().is_empty() || secret.trim().is_empty() {
            return Err(Error::InvalidInput("principal and secret are required".to_string()));
        }
        let scope = scope_key(principal);
        let digest = secret_digest(&scope, secret);
        let _gate = self.open_gate(&scope).lock_owned().await;

        let existing = self.remove_if_closed(&scope);
        if let Some((session, api_key, known_digest)) = existing {
            if known_digest == digest {
                tracing::info!(scope = %scope, "Reusing open session");
                return Ok(Login { api_key, session, reused: true });
            }
            tracing::info!(scope = %scope, "Secret changed, replacing open session");
            self.detach(&scope);
            session.close().await;
        }

        let mirror = MirrorStore::new(paths::mirror_path(&self.data_dir, &scope));
        let session = Session::open(
            Arc::clone(&self.remote),
            principal,
            secret,
            scope.clone(),
            mirror,
            Arc::clone(&self.cache),
            &SessionConfig {
                refresh_interval,
                ..self.options.clone()
            },
        )
        .await?;

        let api_key = generate_api_key();
        self.api_keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(api_key.clone(), scope.clone());
        self.sessions.write().unwrap_or_else(PoisonError::into_inner).insert(
            scope,
            Entry {
                session: Arc::clone(&session),
                api_key: api_key.clone(),
                secret_digest: digest,
            },
        );
        Ok(Login { api_key, session, reused: false })
    }

    /// Live entry for `scope`; a closed one is dropped from the registry.
    fn remove_if_closed(&self, scope: &str) -> Option<(Arc<Session<R>>, String, String)> {
        let found = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            sessions
                .get(scope)
                .map(|e| (Arc::clone(&e.session), e.api_key.clone(), e.secret_digest.clone()))
        };
        match found {
            Some((session, _, _)) if session.is_closed() => {
                self.detach(scope);
                None
            }
            other => other,
        }
    }

    /// Run a read query in `session`.
    pub async fn run(&self, session: &Arc<Session<R>>, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        session.run(sql, params).await
    }

    /// Push a status change through `session`.
    pub async fn write(&self, session: &Arc<Session<R>>, change: StatusChange) -> Result<usize> {
        session.write(change).await
    }

    /// Remove `scope` and its API key from the registry.
    fn detach(&self, scope: &str) -> Option<Arc<Session<R>>> {
        let entry = self.sessions.write().unwrap_or_else(PoisonError::into_inner).remove(scope)?;
        self.api_keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&entry.api_key);
        Some(entry.session)
    }

    /// Session for an API key, if it is still open.
    pub fn get_by_api_key(&self, api_key: &str) -> Option<Arc<Session<R>>> {
        let scope = self
            .api_keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(api_key)
            .cloned()?;
        self.get(&scope)
    }

    /// Session for a scope key, if it is still open.
    pub fn get(&self, scope: &str) -> Option<Arc<Session<R>>> {
        self.remove_if_closed(scope).map(|(session, _, _)| session)
    }

    /// Close the session behind `api_key`. Returns false if there was none.
    pub async fn close(&self, api_key: &str) -> bool {
        let scope = self
            .api_keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(api_key)
            .cloned();
        let Some(scope) = scope else {
            return false;
        };
        match self.detach(&scope) {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every session and clear the cache.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session<R>>> = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            sessions.drain().map(|(_, entry)| entry.session).collect()
        };
        self.api_keys.write().unwrap_or_else(PoisonError::into_inner).clear();

        let count = sessions.len();
        for session in sessions {
            session.close().await;
        }
        self.cache.invalidate_all();
        tracing::info!(count, "All sessions closed");
    }

    /// Number of registered sessions that are still open.
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| !e.session.is_closed())
            .count()
    }
}
