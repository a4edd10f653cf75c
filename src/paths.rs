//! Mirror file paths - single source of truth for on-disk layout.
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/mirror-<scope>.db       installed mirror
//! <data_dir>/mirror-<scope>.db.tmp   snapshot being installed
//! ```
//!
//! `DATA_DIR` overrides the base directory (see config.rs), which allows
//! running multiple isolated instances side by side:
//! ```bash
//! DATA_DIR=/tmp/mirror-a PORT=8081 cargo run
//! DATA_DIR=/tmp/mirror-b PORT=8082 cargo run
//! ```

use std::path::{Path, PathBuf};

/// Default working directory under the system temp dir
pub fn default_data_dir() -> PathBuf {
    std::env::temp_dir().join("vocab-mirror")
}

/// Installed mirror file for a scope
pub fn mirror_path(data_dir: &Path, scope_key: &str) -> PathBuf {
    data_dir.join(format!("mirror-{}.db", scope_key))
}

/// Staging file written before the atomic rename
pub fn staging_path(mirror_path: &Path) -> PathBuf {
    let mut name = mirror_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
