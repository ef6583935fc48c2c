//! Disk-level probes and positional-I/O helpers shared by the engines.

use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::{Error, Result};

/// Free space of the filesystem holding `path`, in MiB.
pub fn free_space_mb(path: &Path) -> Result<u64> {
    let bytes = fs2::available_space(path).map_err(|e| Error::io(path, e))?;
    Ok(bytes / (1024 * 1024))
}

/// A group refuses to start on a directory it cannot write into.
pub fn ensure_writable_dir(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
    if !meta.is_dir() || meta.permissions().readonly() {
        return Err(Error::io(
            path,
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        ));
    }
    Ok(())
}

/// Positional read that keeps going through short reads. Returns how
/// many bytes landed; fewer than `buf.len()` means EOF was hit.
pub(crate) fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match file.read_at(&mut buf[read..], offset + read as u64) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn free_space_is_sampled() {
        let dir = TempDir::new().unwrap();
        // Any writable temp filesystem should report some headroom.
        assert!(free_space_mb(dir.path()).unwrap() > 0);
    }

    #[test]
    fn writable_dir_accepts_tempdir() {
        let dir = TempDir::new().unwrap();
        ensure_writable_dir(dir.path()).unwrap();
    }

    #[test]
    fn missing_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");
        assert!(ensure_writable_dir(&gone).is_err());
    }
}
