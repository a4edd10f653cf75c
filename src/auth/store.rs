//! Credential store with single-flight renewal.
//!
//! Readers take the fast path through a read lock while the credential is
//! usable. Once it is not, callers queue on the renewal gate; the first one
//! through performs the network renewal and the rest find either a fresh
//! credential or the failure of that same attempt when they get the gate.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::credential::Credential;
use crate::error::{AuthError, Error, Result, TransportError};
use crate::remote::RemoteDataSource;

/// How the last renewal attempt failed.
#[derive(Debug, Clone)]
enum RenewalFailure {
    /// The identity service refused the renewal token.
    Rejected(String),
    /// The identity service could not be reached, even after a retry.
    Transport(TransportError),
}

impl RenewalFailure {
    fn from_transport(err: TransportError) -> Self {
        if err.is_rejection() {
            RenewalFailure::Rejected(err.to_string())
        } else {
            RenewalFailure::Transport(err)
        }
    }

    /// Only a rejection ends the session; transport failures leave the
    /// credential in place for a later attempt.
    fn to_error(&self) -> Error {
        match self {
            RenewalFailure::Rejected(reason) => AuthError::RenewalFailed(reason.clone()).into(),
            RenewalFailure::Transport(err) => err.clone().into(),
        }
    }
}

pub struct CredentialStore<R> {
    remote: Arc<R>,
    current: RwLock<Credential>,
    /// Outcome of the latest failed attempt, cleared on success.
    renewal: Mutex<Option<RenewalFailure>>,
    /// Completed renewal attempts. Read before queueing on the gate so a
    /// waiter can tell whether an attempt finished while it waited.
    attempts: AtomicU64,
    buffer: Duration,
}

impl<R: RemoteDataSource> CredentialStore<R> {
    /// Exchange `principal` + `secret` for an initial credential.
    ///
    /// A 4xx answer from the identity service is `InvalidCredentials`;
    /// anything else (timeouts, 5xx) is surfaced as a transport error.
    pub async fn acquire(remote: Arc<R>, principal: &str, secret: &str, buffer: Duration) -> Result<Self> {
        if principal.trim().is_empty() || secret.trim().is_empty() {
            return Err(Error::InvalidInput("principal and secret are required".to_string()));
        }

        let grant = match remote.sign_in(principal, secret).await {
            Ok(grant) => grant,
            Err(e) if e.is_rejection() => {
                tracing::warn!(error = %e, "Sign-in rejected");
                return Err(AuthError::InvalidCredentials.into());
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("Credential acquired");

        Ok(Self {
            remote,
            current: RwLock::new(Credential::from_grant(grant, Instant::now())),
            renewal: Mutex::new(None),
            attempts: AtomicU64::new(0),
            buffer,
        })
    }

    /// Copy of the credential as it is right now, usable or not.
    pub fn snapshot(&self) -> Credential {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn usable(&self) -> Option<Credential> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current.is_usable(Instant::now(), self.buffer).then(|| current.clone())
    }

    /// Return a usable credential, renewing it first if needed.
    pub async fn ensure_fresh(&self) -> Result<Credential> {
        if let Some(cred) = self.usable() {
            return Ok(cred);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut gate = self.renewal.lock().await;
        if let Some(cred) = self.usable() {
            tracing::debug!("Credential renewed by a concurrent caller");
            return Ok(cred);
        }
        if let Some(err) = self.failed_while_waiting(&gate, seen) {
            return Err(err);
        }
        self.renew_locked(&mut gate).await
    }

    /// Renew after the remote rejected `rejected_token`, unless another
    /// caller already replaced it.
    pub async fn force_renew(&self, rejected_token: &str) -> Result<Credential> {
        let seen = self.attempts.load(Ordering::Acquire);
        let mut gate = self.renewal.lock().await;
        if let Some(cred) = self.usable() {
            if cred.access_token != rejected_token {
                return Ok(cred);
            }
        }
        if let Some(err) = self.failed_while_waiting(&gate, seen) {
            return Err(err);
        }
        self.renew_locked(&mut gate).await
    }

    /// The failure of an attempt that completed after `seen` was read.
    fn failed_while_waiting(&self, last_failure: &Option<RenewalFailure>, seen: u64) -> Option<Error> {
        if self.attempts.load(Ordering::Acquire) == seen {
            return None;
        }
        let failure = last_failure.as_ref()?;
        tracing::debug!("Renewal by a concurrent caller failed");
        Some(failure.to_error())
    }

    /// `last_failure` is the guarded contents of the renewal gate.
    async fn renew_locked(&self, last_failure: &mut Option<RenewalFailure>) -> Result<Credential> {
        let renewal_token = self.snapshot().renewal_token;
        tracing::debug!("Renewing access token");

        let result = match self.remote.renew(&renewal_token).await {
            Err(e) if !e.is_rejection() => {
                tracing::warn!(error = %e, "Renewal transport failure, retrying once");
                self.remote.renew(&renewal_token).await
            }
            other => other,
        };

        let outcome = match result {
            Ok(renewed) => {
                let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
                current.apply_renewal(renewed, Instant::now());
                tracing::info!("Access token renewed");
                *last_failure = None;
                Ok(current.clone())
            }
            Err(e) => {
                let failure = RenewalFailure::from_transport(e);
                match &failure {
                    RenewalFailure::Rejected(reason) => tracing::error!(%reason, "Access token renewal rejected"),
                    RenewalFailure::Transport(err) => tracing::warn!(error = %err, "Access token renewal unreachable"),
                }
                let err = failure.to_error();
                *last_failure = Some(failure);
                Err(err)
            }
        };
        self.attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    /// Run `op` with a fresh access token. A 401/403 answer triggers one
    /// forced renewal and one retry; a second rejection is surfaced.
    pub async fn authorized<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, TransportError>> + Send,
    {
        let cred = self.ensure_fresh().await?;
        match op(cred.access_token.clone()).await {
            Err(e) if e.is_unauthorized() => {
                tracing::debug!("Access token rejected, forcing renewal");
                let renewed = self.force_renew(&cred.access_token).await?;
                Ok(op(renewed.access_token).await?)
            }
            other => Ok(other?),
        }
    }
}
