//! Advisory file locks and atomic file replacement
//!
//! Shared by concurrent engine invocations on one host.

use crate::error::{EngineError, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive lock on a file. Unlocks on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Acquire an exclusive lock on `path`, creating the file if needed, polling
/// until `timeout` elapses.
pub async fn acquire_exclusive(path: &Path, timeout: Duration) -> Result<FileLock> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::io(parent, e))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| EngineError::io(path, e))?;

    let start = Instant::now();
    let mut contended = false;
    loop {
        if matches!(FileExt::try_lock_exclusive(&file), Ok(true)) {
            if contended {
                debug!(path = %path.display(), waited_ms = start.elapsed().as_millis() as u64, "Acquired contended lock");
            }
            return Ok(FileLock { file });
        }

        if start.elapsed() >= timeout {
            return Err(EngineError::LockTimeout {
                path: path.to_path_buf(),
                waited: start.elapsed(),
            });
        }

        contended = true;
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Write via a uniquely named temp file in the target directory and rename,
/// so readers never see a partial file and concurrent writers never share a
/// temp path
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let path = path.to_path_buf();
    let data = data.to_vec();
    tokio::task::spawn_blocking(move || {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| EngineError::io(&parent, e))?;

        let mut temp = NamedTempFile::new_in(&parent).map_err(|e| EngineError::io(&parent, e))?;
        temp.write_all(&data)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| EngineError::io(temp.path(), e))?;
        temp.persist(&path).map_err(|e| EngineError::io(&path, e.error))?;
        Ok(())
    })
    .await?
}
