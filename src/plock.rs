//! Per-directory process lock.
//!
//! One engine owns one directory. The lock is an OS advisory exclusive
//! lock on a well-known file inside the directory; the file body names
//! the holder so a refused start can report who is in the way.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::{Error, Result};

/// Well-known lock file name, part of the on-disk directory layout.
pub const LOCK_FILE: &str = "vxfs.lock";

pub struct ProcessLock {
    path: PathBuf,
    identity: String,
    file: Option<File>,
}

impl ProcessLock {
    /// `tag` describes the owner role, e.g. "store data"; the process id
    /// is appended so collisions across hosts and restarts stay readable.
    pub fn new(dir: &Path, tag: &str) -> ProcessLock {
        ProcessLock {
            path: dir.join(LOCK_FILE),
            identity: format!("{} pid={}", tag, std::process::id()),
            file: None,
        }
    }

    pub fn lock(&mut self) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;

        if file.try_lock_exclusive().is_err() {
            // Report whoever wrote the lock file; fall back to the bare
            // message when the body is unreadable or empty.
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let holder = holder.trim().to_string();
            if holder.is_empty() {
                return Err(Error::Locked("unknown".to_string()));
            }
            return Err(Error::Locked(holder));
        }

        file.set_len(0).map_err(|e| Error::io(&self.path, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io(&self.path, e))?;
        file.write_all(self.identity.as_bytes())
            .map_err(|e| Error::io(&self.path, e))?;
        file.sync_all().map_err(|e| Error::io(&self.path, e))?;

        self.file = Some(file);
        Ok(())
    }

    pub fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_writes_identity() {
        let dir = TempDir::new().unwrap();
        let mut lock = ProcessLock::new(dir.path(), "store data");
        lock.lock().unwrap();

        let body = std::fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert!(body.starts_with("store data pid="));
        assert!(body.contains(&std::process::id().to_string()));
    }

    #[test]
    fn second_lock_names_holder() {
        let dir = TempDir::new().unwrap();
        let mut first = ProcessLock::new(dir.path(), "name data");
        first.lock().unwrap();

        let mut second = ProcessLock::new(dir.path(), "name data");
        match second.lock() {
            Err(Error::Locked(holder)) => {
                assert!(holder.starts_with("name data pid="));
            }
            other => panic!("expected Locked, got {other:?}"),
        }
    }

    #[test]
    fn unlock_releases() {
        let dir = TempDir::new().unwrap();
        let mut first = ProcessLock::new(dir.path(), "store index");
        first.lock().unwrap();
        first.unlock();

        let mut second = ProcessLock::new(dir.path(), "store index");
        second.lock().unwrap();
    }
}
