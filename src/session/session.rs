//! One principal's session: credential, mirror, staleness policy and
//! session-scoped cached reads.
//!
//! Every refresh and every write-back runs with the refresh gate held, so
//! at most one fetch+install is in flight per session and no install can
//! interleave with a write-back. Reads never wait on the gate while a
//! mirror is installed: they are served from the current handle.
//!
//! Refreshes and write-backs run on their own spawned task holding an
//! owned gate guard. A caller that goes away mid-refresh (a dropped HTTP
//! request, a timeout) does not abort work that other callers benefit
//! from.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::refresh;
use crate::auth::CredentialStore;
use crate::cache::ResultCache;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::mirror::{MirrorHandle, MirrorStore, Row, snapshot};
use crate::remote::{RemoteDataSource, SyncPayload};
use crate::words::status::{self, StatusChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Ready,
    Refreshing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Refreshing => "refreshing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub struct Session<R> {
    scope_key: String,
    principal: String,
    remote: Arc<R>,
    credentials: CredentialStore<R>,
    mirror: Arc<MirrorStore>,
    cache: Arc<ResultCache>,
    /// Bumped on every invalidation; results computed across a bump are
    /// returned but not stored.
    cache_epoch: AtomicU64,
    state: RwLock<SessionState>,
    last_refreshed: Mutex<Option<Instant>>,
    refresh_interval: Duration,
    staleness_buffer: Duration,
    refresh_gate: Arc<AsyncMutex<()>>,
    stop: watch::Sender<bool>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RemoteDataSource> Session<R> {
    /// Authenticate, install the first mirror and start the background
    /// refresh loop. Nothing touches the disk before authentication
    /// succeeds.
    pub(crate) async fn open(
        remote: Arc<R>,
        principal: &str,
        secret: &str,
        scope_key: String,
        mirror: MirrorStore,
        cache: Arc<ResultCache>,
        options: &SessionConfig,
    ) -> Result<Arc<Self>> {
        tracing::debug!(
            scope = %scope_key,
            from = %SessionState::Unauthenticated,
            to = %SessionState::Authenticating,
            "Session state changed"
        );
        let credentials =
            CredentialStore::acquire(Arc::clone(&remote), principal, secret, options.credential_buffer).await?;

        let (stop, stop_rx) = watch::channel(false);
        let session = Arc::new(Self {
            scope_key,
            principal: principal.trim().to_string(),
            remote,
            credentials,
            mirror: Arc::new(mirror),
            cache,
            cache_epoch: AtomicU64::new(0),
            state: RwLock::new(SessionState::Authenticating),
            last_refreshed: Mutex::new(None),
            refresh_interval: options.refresh_interval,
            staleness_buffer: options.staleness_buffer,
            refresh_gate: Arc::new(AsyncMutex::new(())),
            stop,
            refresher: Mutex::new(None),
        });

        if let Err(e) = session.refresh().await {
            tracing::warn!(scope = %session.scope_key, error = %e, "Initial mirror install failed");
            session.close().await;
            return Err(e);
        }

        if options.background_refresh && !options.refresh_interval.is_zero() {
            let task = refresh::spawn(&session, options.refresh_interval, stop_rx);
            *session.refresher.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        }
        tracing::info!(scope = %session.scope_key, "Session opened");
        Ok(session)
    }

    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    pub fn mirror_path(&self) -> &Path {
        self.mirror.path()
    }

    pub fn last_refreshed(&self) -> Option<Instant> {
        *self.last_refreshed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Move to `next`. Closed is terminal; returns the state left behind.
    fn transition(&self, next: SessionState) -> SessionState {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let from = *state;
        if from != SessionState::Closed && from != next {
            *state = next;
            tracing::debug!(scope = %self.scope_key, %from, to = %next, "Session state changed");
        }
        from
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// Age past which the mirror is refreshed before serving a read. The
    /// buffer only applies when it is shorter than the interval.
    fn staleness_threshold(&self) -> Duration {
        if self.staleness_buffer < self.refresh_interval {
            self.refresh_interval - self.staleness_buffer
        } else {
            self.refresh_interval
        }
    }

    /// True when the mirror has never been installed, or when it is older
    /// than the refresh interval minus the staleness buffer. A zero
    /// interval never goes stale once installed.
    pub fn is_stale(&self) -> bool {
        match self.last_refreshed() {
            None => true,
            Some(_) if self.refresh_interval.is_zero() => false,
            Some(at) => at.elapsed() >= self.staleness_threshold(),
        }
    }

    /// The handle reads should use, refreshing first if the mirror is stale.
    ///
    /// If another refresh is already running and a mirror is installed,
    /// the current handle is returned without waiting.
    pub async fn handle(self: &Arc<Self>) -> Result<MirrorHandle> {
        self.refresh_if_stale().await
    }

    pub(crate) async fn refresh_if_stale(self: &Arc<Self>) -> Result<MirrorHandle> {
        self.ensure_open()?;
        if !self.is_stale() {
            return self.mirror.current();
        }

        let gate = match Arc::clone(&self.refresh_gate).try_lock_owned() {
            Ok(gate) => gate,
            Err(_) => {
                if let Ok(handle) = self.mirror.current() {
                    tracing::debug!(scope = %self.scope_key, "Refresh in flight, serving current mirror");
                    return Ok(handle);
                }
                Arc::clone(&self.refresh_gate).lock_owned().await
            }
        };

        // Another caller may have refreshed while we waited
        if !self.is_stale() {
            return self.mirror.current();
        }
        self.spawn_refresh(gate).await
    }

    /// Foreground refresh regardless of staleness. Errors are surfaced.
    pub async fn refresh(self: &Arc<Self>) -> Result<MirrorHandle> {
        self.ensure_open()?;
        let gate = Arc::clone(&self.refresh_gate).lock_owned().await;
        self.spawn_refresh(gate).await
    }

    async fn spawn_refresh(self: &Arc<Self>, gate: OwnedMutexGuard<()>) -> Result<MirrorHandle> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let _gate = gate;
            session.refresh_locked().await
        })
        .await?
    }

    /// Fetch, decompress and install a snapshot. Must hold the refresh gate.
    async fn refresh_locked(&self) -> Result<MirrorHandle> {
        self.ensure_open()?;
        let previous = self.transition(SessionState::Refreshing);
        let start = Instant::now();

        match self.fetch_and_install().await {
            Ok(handle) => {
                *self.last_refreshed.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
                self.transition(SessionState::Ready);
                tracing::info!(
                    scope = %self.scope_key,
                    generation = handle.generation(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Mirror refreshed"
                );
                Ok(handle)
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(scope = %self.scope_key, error = %e, "Authentication lost, closing session");
                self.teardown().await;
                Err(e)
            }
            Err(e) => {
                tracing::warn!(scope = %self.scope_key, error = %e, "Mirror refresh failed");
                let restored = if self.mirror.is_ready() { SessionState::Ready } else { previous };
                self.transition(restored);
                Err(e)
            }
        }
    }

    async fn fetch_and_install(&self) -> Result<MirrorHandle> {
        let remote = Arc::clone(&self.remote);
        let compressed = self
            .credentials
            .authorized(move |token| {
                let remote = Arc::clone(&remote);
                async move { remote.fetch_snapshot(&token).await }
            })
            .await?;
        tracing::debug!(scope = %self.scope_key, bytes = compressed.len(), "Snapshot downloaded");

        let mirror = Arc::clone(&self.mirror);
        let handle = tokio::task::spawn_blocking(move || -> Result<MirrorHandle> {
            let data = snapshot::decompress(&compressed)?;
            Ok(mirror.install(&data)?)
        })
        .await??;
        Ok(handle)
    }

    /// Run a read query against a fresh mirror.
    pub async fn run(self: &Arc<Self>, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        let handle = self.refresh_if_stale().await?;
        let sql = sql.to_string();
        let rows = tokio::task::spawn_blocking(move || handle.query(&sql, &params)).await??;
        Ok(rows)
    }

    /// Like [`Session::run`], decoding each row into `T`.
    pub async fn run_as<T>(self: &Arc<Self>, sql: &str, params: Vec<SqlValue>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let handle = self.refresh_if_stale().await?;
        let sql = sql.to_string();
        let rows = tokio::task::spawn_blocking(move || handle.query_as::<T>(&sql, &params)).await??;
        Ok(rows)
    }

    /// Run a write statement against the local mirror only.
    pub async fn execute(self: &Arc<Self>, sql: &str, params: Vec<SqlValue>) -> Result<usize> {
        let handle = self.refresh_if_stale().await?;
        let sql = sql.to_string();
        let affected = tokio::task::spawn_blocking(move || handle.execute(&sql, &params)).await??;
        Ok(affected)
    }

    /// Session-scoped cache key.
    pub fn cache_key(&self, key: &str) -> String {
        format!("{}:{}", self.scope_key, key)
    }

    fn cache_prefix(&self) -> String {
        format!("{}:", self.scope_key)
    }

    /// Return the cached value for `key`, or compute and cache it for the
    /// default TTL.
    pub async fn cached<T, F, Fut>(self: &Arc<Self>, key: &str, compute: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_open()?;
        let full_key = self.cache_key(key);
        if let Some(hit) = self.cache.get::<T>(&full_key) {
            return Ok(hit);
        }

        let epoch = self.cache_epoch.load(Ordering::Acquire);
        let value = compute().await?;
        if self.cache_epoch.load(Ordering::Acquire) != epoch || self.is_closed() {
            tracing::debug!(key = %full_key, "Result computed across an invalidation, not cached");
            return Ok(Arc::new(value));
        }
        Ok(self.cache.set_default(&full_key, value))
    }

    /// [`Session::run`] behind the result cache.
    pub async fn run_cached(self: &Arc<Self>, key: &str, sql: &str, params: Vec<SqlValue>) -> Result<Arc<Vec<Row>>> {
        self.cached(key, || self.run(sql, params)).await
    }

    /// Drop every cached result of this session.
    pub fn invalidate_cached(&self) -> usize {
        self.cache_epoch.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_prefix(&self.cache_prefix())
    }

    /// Apply a status change: push to the remote first, then update the
    /// local mirror and drop cached results. Returns the number of local
    /// rows updated.
    pub async fn write(self: &Arc<Self>, change: StatusChange) -> Result<usize> {
        self.ensure_open()?;
        change.validate()?;

        let gate = Arc::clone(&self.refresh_gate).lock_owned().await;
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let _gate = gate;
            session.write_locked(change).await
        })
        .await?
    }

    async fn write_locked(&self, change: StatusChange) -> Result<usize> {
        self.ensure_open()?;
        let handle = if self.is_stale() {
            self.refresh_locked().await?
        } else {
            self.mirror.current()?
        };

        let lookup = handle.clone();
        let items = change.clone();
        let records = tokio::task::spawn_blocking(move || status::lookup_all(&lookup, &items)).await??;

        let modified_at = chrono::Utc::now().timestamp_millis();
        let payload = Arc::new(SyncPayload::words(
            records
                .iter()
                .map(|record| status::push_record(record, change.status, modified_at))
                .collect(),
        ));

        let remote = Arc::clone(&self.remote);
        self.credentials
            .authorized(move |token| {
                let remote = Arc::clone(&remote);
                let payload = Arc::clone(&payload);
                async move { remote.push(&token, &payload).await }
            })
            .await?;
        tracing::info!(scope = %self.scope_key, count = records.len(), status = %change.status, "Status change pushed");

        let new_status = change.status;
        let updated =
            tokio::task::spawn_blocking(move || status::apply_local(&handle, &records, new_status, modified_at)).await??;
        let dropped = self.invalidate_cached();
        tracing::debug!(scope = %self.scope_key, updated, dropped, "Local mirror updated");
        Ok(updated)
    }

    /// Mark closed, stop the loop, delete the mirror and drop cached
    /// results. Returns false if the session was already closed.
    async fn teardown(&self) -> bool {
        if self.transition(SessionState::Closed) == SessionState::Closed {
            return false;
        }
        let _ = self.stop.send(true);
        if let Some(task) = self.refresher.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            task.abort();
        }

        let mirror = Arc::clone(&self.mirror);
        if let Err(e) = tokio::task::spawn_blocking(move || mirror.close()).await {
            tracing::warn!(scope = %self.scope_key, error = %e, "Mirror close task failed");
        }
        self.invalidate_cached();
        true
    }

    /// Close the session. Idempotent; handles already given out keep
    /// working until dropped.
    pub async fn close(&self) {
        if !self.teardown().await {
            return;
        }
        let task = self.refresher.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!(scope = %self.scope_key, "Session closed");
    }
}

impl<R> Drop for Session<R> {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}
