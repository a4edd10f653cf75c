//! Local relational mirror of the remote dataset.
//!
//! A [`MirrorStore`] owns one mirror file and the pointer to the handle
//! that is current for it. [`MirrorStore::install`] stages a snapshot next
//! to the live file, validates it, renames it over the live file and only
//! then swaps the pointer. Callers that already hold a [`MirrorHandle`]
//! keep their own connection, so a swap never closes a connection out from
//! under a running query; the old connection is closed when its last
//! handle is dropped.

pub mod coerce;
pub mod snapshot;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, Transaction, params_from_iter};
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::error::{Error, InstallError, QueryError};
use crate::paths;

pub use coerce::{Row, RowShape};

/// How long a statement waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to one installed snapshot. Cloning is cheap; every clone shares
/// the same connection.
#[derive(Clone)]
pub struct MirrorHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    conn: Mutex<Connection>,
    path: PathBuf,
    generation: u64,
    installed_at: Instant,
    shape: RowShape,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        tracing::debug!(generation = self.generation, "Mirror handle released");
    }
}

impl MirrorHandle {
    fn new(conn: Connection, path: PathBuf, generation: u64, shape: RowShape) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                conn: Mutex::new(conn),
                path,
                generation,
                installed_at: Instant::now(),
                shape,
            }),
        }
    }

    /// Monotonic install counter, starting at 1.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn installed_at(&self) -> Instant {
        self.inner.installed_at
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn same_snapshot(&self, other: &MirrorHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.inner.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read query and return coerced rows. Blocks the calling thread.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, QueryError> {
        let conn = self.lock();
        let rows = read_rows(&conn, &self.inner.shape, sql, params)?;
        tracing::debug!(sql, rows = rows.len(), generation = self.inner.generation, "Query executed");
        Ok(rows)
    }

    /// Run a read query and decode each row into `T`.
    pub fn query_as<T: DeserializeOwned>(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<T>, QueryError> {
        self.query(sql, params)?
            .into_iter()
            .map(|row| serde_json::from_value(serde_json::Value::Object(row)).map_err(QueryError::from))
            .collect()
    }

    /// Run a write statement. Returns the number of affected rows.
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize, QueryError> {
        let conn = self.lock();
        let affected = conn.execute(sql, params_from_iter(params.iter()))?;
        tracing::debug!(sql, affected, generation = self.inner.generation, "Statement executed");
        Ok(affected)
    }

    /// Run `f` inside one transaction, committing only if it succeeds.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, QueryError>) -> Result<T, QueryError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Shared row reader for connections and transactions.
pub(crate) fn read_rows(conn: &Connection, shape: &RowShape, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, QueryError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), shape.coerce(name, row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok(out)
}

/// Owner of one mirror file and its current handle.
pub struct MirrorStore {
    path: PathBuf,
    shape: RowShape,
    current: RwLock<Option<MirrorHandle>>,
    /// Serializes install against install and against close
    install_lock: Mutex<()>,
    generation: AtomicU64,
    closed: AtomicBool,
}

impl MirrorStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            shape: RowShape::default(),
            current: RwLock::new(None),
            install_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Install raw (decompressed) database bytes as the new current mirror.
    ///
    /// On any failure the previous handle stays current and the staging
    /// file is removed. Blocks the calling thread.
    pub fn install(&self, bytes: &[u8]) -> Result<MirrorHandle, InstallError> {
        if bytes.is_empty() {
            return Err(InstallError::Empty);
        }
        if !snapshot::looks_like_sqlite(bytes) {
            return Err(InstallError::NotDatabase);
        }

        let _guard = self.install_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(InstallError::Closed);
        }

        let staging = paths::staging_path(&self.path);
        let result = self.stage_and_swap(&staging, bytes);
        if result.is_err() {
            remove_if_exists(&staging);
        }
        result
    }

    fn stage_and_swap(&self, staging: &Path, bytes: &[u8]) -> Result<MirrorHandle, InstallError> {
        let start = Instant::now();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(staging, bytes)?;

        // Validate on a throwaway read-only connection so a corrupt file
        // never reaches the live path.
        {
            let probe = Connection::open_with_flags(staging, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
            let tables: i64 = probe.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get(0))?;
            tracing::debug!(tables, "Snapshot validated");
        }

        fs::rename(staging, &self.path)?;

        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let handle = MirrorHandle::new(conn, self.path.clone(), generation, self.shape.clone());

        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle.clone());

        tracing::info!(
            path = %self.path.display(),
            bytes = bytes.len(),
            generation,
            replaced = previous.map(|p| p.generation()),
            duration_ms = start.elapsed().as_millis() as u64,
            "Mirror installed"
        );
        Ok(handle)
    }

    /// The handle queries should run against right now.
    pub fn current(&self) -> Result<MirrorHandle, Error> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.current.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop the current pointer and delete the mirror file. Outstanding
    /// handles keep working until they are dropped. Idempotent.
    pub fn close(&self) {
        let _guard = self.install_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let previous = self.current.write().unwrap_or_else(PoisonError::into_inner).take();
        remove_if_exists(&self.path);
        remove_if_exists(&paths::staging_path(&self.path));
        tracing::info!(
            path = %self.path.display(),
            generation = previous.map(|p| p.generation()),
            "Mirror closed"
        );
    }
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove mirror file"),
    }
}
