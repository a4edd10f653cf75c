//! Snapshot decompression.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::error::InstallError;

/// SQLite file header magic.
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// Inflate a gzip-compressed snapshot into raw database bytes.
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, InstallError> {
    if compressed.is_empty() {
        return Err(InstallError::Empty);
    }
    let mut data = Vec::with_capacity(compressed.len() * 4);
    GzDecoder::new(compressed)
        .read_to_end(&mut data)
        .map_err(InstallError::Decompress)?;
    if data.is_empty() {
        return Err(InstallError::Empty);
    }
    tracing::debug!(compressed = compressed.len(), bytes = data.len(), "Decompressed snapshot");
    Ok(data)
}

/// Header check run by [`crate::mirror::MirrorStore::install`] before
/// anything touches the disk.
pub fn looks_like_sqlite(data: &[u8]) -> bool {
    data.starts_with(SQLITE_MAGIC)
}
