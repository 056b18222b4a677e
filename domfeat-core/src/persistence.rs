//! Shared persistence utilities: atomic file writes and content hashing.
//!
//! Every file domfeat produces goes through [`atomic_write_with`]: the payload
//! is written to a `.tmp` sibling, synced, then renamed over the destination.
//! An interrupted or failed write never leaves a half-written destination.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sibling path used while a write is in progress (`out.csv` -> `out.csv.tmp`).
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "output".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write a file by streaming into a temporary sibling.
///
/// The closure receives a buffered writer over the temporary file. On success
/// the buffer is flushed, the file synced, and the temporary renamed onto
/// `path`. On any error the temporary is removed and the error returned.
/// Creates parent directories if they don't exist.
pub fn atomic_write_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);

    let outcome = write_and_sync(&tmp, write).and_then(|()| {
        std::fs::rename(&tmp, path)?;
        Ok(())
    });

    if outcome.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    outcome
}

fn write_and_sync<F>(tmp: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut writer = BufWriter::new(File::create(tmp)?);
    write(&mut writer)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Atomically write raw bytes to a file.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    atomic_write_with(path, |w| {
        w.write_all(data)?;
        Ok(())
    })
}

/// Atomically write pretty-printed JSON to a file.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    atomic_write_with(path, |w| {
        serde_json::to_writer_pretty(&mut *w, data)?;
        w.write_all(b"\n")?;
        Ok(())
    })
}

/// Compute SHA-256 hash of file contents.
pub fn hash_file(path: &Path) -> Result<String> {
    let content = std::fs::read(path)?;
    Ok(hash_bytes(&content))
}

/// Compute SHA-256 hash of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
