//! Test utilities: snapshot fixtures and a scripted remote.
//!
//! Fixtures are real SQLite files built with the same `WordList`/`deck`
//! layout the remote ships, so tests exercise the actual install and
//! query paths rather than mocks of them.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use rusqlite::{Connection, params};
use tempfile::TempDir;

use crate::error::TransportError;
use crate::remote::{RemoteDataSource, RenewedToken, SyncPayload, TokenGrant};

/// Row count of the default fixture.
pub const FIXTURE_WORDS: usize = 150;

/// Secret accepted by [`FakeRemote`].
pub const VALID_SECRET: &str = "secret";

const SCHEMA: &str = r#"
CREATE TABLE WordList (
    dictForm TEXT NOT NULL,
    secondary TEXT,
    partOfSpeech TEXT NOT NULL DEFAULT '',
    language TEXT NOT NULL,
    knownStatus TEXT NOT NULL,
    hasCard INTEGER,
    tracked INTEGER NOT NULL DEFAULT 0,
    created INTEGER,
    mod INTEGER,
    serverMod INTEGER,
    del INTEGER NOT NULL DEFAULT 0,
    isModern INTEGER,
    serverVersion INTEGER,
    isPendingEnqueue INTEGER,
    isPendingApply INTEGER,
    deckId INTEGER
);
CREATE TABLE deck (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    del INTEGER NOT NULL DEFAULT 0
);
INSERT INTO deck (id, name, del) VALUES (1, 'Books', 0), (2, 'Anime', 0), (3, 'Retired', 1);
"#;

const STATUSES: [&str; 4] = ["KNOWN", "LEARNING", "UNKNOWN", "IGNORED"];

/// Fixture word `i`:
/// - `dictForm` is `word-<i>`; `secondary` is empty for even `i`, `s<i>` for odd
/// - status cycles KNOWN, LEARNING, UNKNOWN, IGNORED
/// - language is `zh` when `i % 5 == 0`, otherwise `ja`
/// - deck alternates 1/2; `hasCard` and `serverMod` are NULL when `i % 10 == 9`
pub fn fixture_word(i: usize) -> (String, String, &'static str, &'static str) {
    let secondary = if i % 2 == 0 { String::new() } else { format!("s{}", i) };
    let language = if i % 5 == 0 { "zh" } else { "ja" };
    (format!("word-{}", i), secondary, STATUSES[i % 4], language)
}

/// Raw bytes of a fixture database with `words` rows in `WordList`.
pub fn fixture_db_bytes(words: usize) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fixture.db");
    {
        let mut conn = Connection::open(&path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        let tx = conn.transaction().unwrap();
        for i in 0..words {
            let (dict_form, secondary, status, language) = fixture_word(i);
            let nullable = i % 10 == 9;
            tx.execute(
                "INSERT INTO WordList (dictForm, secondary, partOfSpeech, language, knownStatus, hasCard, tracked,
                 created, mod, serverMod, del, isModern, serverVersion, isPendingEnqueue, isPendingApply, deckId)
                 VALUES (?1, ?2, 'noun', ?3, ?4, ?5, 0, 1690000000000, 1700000000000, ?6, 0, 1, 3, 0, 0, ?7)",
                params![
                    dict_form,
                    secondary,
                    language,
                    status,
                    if nullable { None } else { Some((i % 2) as i64) },
                    if nullable { None } else { Some(1_700_000_000_000i64 + i as i64) },
                    (i % 2 + 1) as i64,
                ],
            )
            .unwrap();
        }
        tx.commit().unwrap();
    }
    std::fs::read(&path).unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Gzip-compressed fixture, as the snapshot service would serve it.
pub fn fixture_snapshot(words: usize) -> Vec<u8> {
    gzip(&fixture_db_bytes(words))
}

#[derive(Debug)]
struct Script {
    expires_in: u64,
    renew_delay: Duration,
    fetch_delay: Duration,
    sign_in_failure: Option<u16>,
    renew_failure: Option<u16>,
    fetch_failure: Option<u16>,
    push_failure: Option<u16>,
    unauthorized_fetches: usize,
    issued: u64,
    snapshot: Vec<u8>,
    pushed: Vec<SyncPayload>,
    fetch_tokens: Vec<String>,
}

/// In-memory [`RemoteDataSource`] with call counters and failure switches.
///
/// Sign-in accepts [`VALID_SECRET`] for any principal and issues
/// `access-0` / `renew-token`; each successful renewal issues
/// `access-<n>`.
pub struct FakeRemote {
    script: Mutex<Script>,
    sign_in_calls: AtomicUsize,
    renew_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    push_calls: AtomicUsize,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::with_snapshot(fixture_snapshot(FIXTURE_WORDS))
    }

    pub fn with_snapshot(snapshot: Vec<u8>) -> Self {
        Self {
            script: Mutex::new(Script {
                expires_in: 3600,
                renew_delay: Duration::ZERO,
                fetch_delay: Duration::ZERO,
                sign_in_failure: None,
                renew_failure: None,
                fetch_failure: None,
                push_failure: None,
                unauthorized_fetches: 0,
                issued: 0,
                snapshot,
                pushed: Vec::new(),
                fetch_tokens: Vec::new(),
            }),
            sign_in_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            push_calls: AtomicUsize::new(0),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn with_expires_in(self, secs: u64) -> Self {
        self.set_expires_in(secs);
        self
    }

    pub fn with_renew_delay(self, delay: Duration) -> Self {
        self.script().renew_delay = delay;
        self
    }

    pub fn set_expires_in(&self, secs: u64) {
        self.script().expires_in = secs;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.script().fetch_delay = delay;
    }

    pub fn set_snapshot(&self, snapshot: Vec<u8>) {
        self.script().snapshot = snapshot;
    }

    pub fn fail_sign_in_with(&self, status: u16) {
        self.script().sign_in_failure = Some(status);
    }

    pub fn fail_renew_with(&self, status: u16) {
        self.script().renew_failure = Some(status);
    }

    pub fn fail_fetch_with(&self, status: u16) {
        self.script().fetch_failure = Some(status);
    }

    pub fn fail_push_with(&self, status: u16) {
        self.script().push_failure = Some(status);
    }

    /// The next `n` fetches answer 401.
    pub fn reject_next_fetches(&self, n: usize) {
        self.script().unauthorized_fetches = n;
    }

    pub fn clear_failures(&self) {
        let mut script = self.script();
        script.sign_in_failure = None;
        script.renew_failure = None;
        script.fetch_failure = None;
        script.push_failure = None;
        script.unauthorized_fetches = 0;
    }

    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Payloads of every successful push, oldest first.
    pub fn pushed(&self) -> Vec<SyncPayload> {
        self.script().pushed.clone()
    }

    /// Access tokens presented to the snapshot service.
    pub fn fetch_tokens(&self) -> Vec<String> {
        self.script().fetch_tokens.clone()
    }
}

fn status(status: u16, body: &str) -> TransportError {
    TransportError::Status { status, body: body.to_string() }
}

impl RemoteDataSource for FakeRemote {
    async fn sign_in(&self, _principal: &str, secret: &str) -> Result<TokenGrant, TransportError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        if let Some(code) = script.sign_in_failure {
            return Err(status(code, "sign-in unavailable"));
        }
        if secret != VALID_SECRET {
            return Err(status(400, "INVALID_PASSWORD"));
        }
        Ok(TokenGrant {
            access_token: "access-0".to_string(),
            renewal_token: "renew-token".to_string(),
            expires_in_secs: script.expires_in,
        })
    }

    async fn renew(&self, renewal_token: &str) -> Result<RenewedToken, TransportError> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.script().renew_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script();
        if let Some(code) = script.renew_failure {
            return Err(status(code, "renewal unavailable"));
        }
        if renewal_token != "renew-token" {
            return Err(status(400, "INVALID_REFRESH_TOKEN"));
        }
        script.issued += 1;
        Ok(RenewedToken {
            access_token: format!("access-{}", script.issued),
            expires_in_secs: script.expires_in,
        })
    }

    async fn fetch_snapshot(&self, access_token: &str) -> Result<Vec<u8>, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.script().fetch_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script();
        script.fetch_tokens.push(access_token.to_string());
        if script.unauthorized_fetches > 0 {
            script.unauthorized_fetches -= 1;
            return Err(status(401, "token expired"));
        }
        if let Some(code) = script.fetch_failure {
            return Err(status(code, "snapshot unavailable"));
        }
        Ok(script.snapshot.clone())
    }

    async fn push(&self, _access_token: &str, payload: &SyncPayload) -> Result<(), TransportError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script();
        if let Some(code) = script.push_failure {
            return Err(status(code, "sync rejected"));
        }
        script.pushed.push(payload.clone());
        Ok(())
    }
}
