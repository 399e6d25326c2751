//! Storage backends for the checkpoint store.
//!
//! The store only ever talks to the filesystem through [`Storage`], so a run
//! can be pointed at a real directory ([`FsStorage`]) or kept entirely in
//! memory ([`MemoryStorage`]).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::NamedTempFile;

/// Filesystem operations the checkpoint store depends on.
pub trait Storage: Debug + Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write `bytes` so that readers see either the old content or the new
    /// content, never a prefix.
    fn write_file_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Create the directory and its parents. Succeeds if it already exists.
    fn ensure_dir(&self, path: &Path) -> io::Result<()>;

    /// Move `src` to `dst`. Without `overwrite`, fails with `AlreadyExists`
    /// when `dst` is present.
    fn rename(&self, src: &Path, dst: &Path, overwrite: bool) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// Real filesystem storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

impl Storage for FsStorage {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        match fs::create_dir_all(path) {
            Err(e) if e.kind() != ErrorKind::AlreadyExists => Err(e),
            _ => Ok(()),
        }
    }

    fn rename(&self, src: &Path, dst: &Path, overwrite: bool) -> io::Result<()> {
        if !overwrite && dst.exists() {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} already exists", dst.display()),
            ));
        }
        fs::rename(src, dst)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// In-memory storage for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `PermissionDenied`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Paths currently stored.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files().keys().cloned().collect()
    }

    /// Overwrite a file directly, bypassing the atomic protocol.
    pub fn put(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.files().insert(path.into(), bytes.into());
    }

    fn files(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self, path: &Path) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("writes disabled for {}", path.display()),
            ));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, path.display().to_string()))
    }

    fn write_file_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.check_writable(path)?;
        self.files().insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        self.dirs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_path_buf());
        Ok(())
    }

    fn rename(&self, src: &Path, dst: &Path, overwrite: bool) -> io::Result<()> {
        self.check_writable(dst)?;
        let mut files = self.files();
        if !overwrite && files.contains_key(dst) {
            return Err(io::Error::new(ErrorKind::AlreadyExists, dst.display().to_string()));
        }
        let bytes = files
            .remove(src)
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, src.display().to_string()))?;
        files.insert(dst.to_path_buf(), bytes);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.files()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fs_write_atomic_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        FsStorage.write_file_atomic(&path, b"first").unwrap();
        FsStorage.write_file_atomic(&path, b"second").unwrap();

        assert_eq!(FsStorage.read_file(&path).unwrap(), b"second");
        // No temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_fs_ensure_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        FsStorage.ensure_dir(&nested).unwrap();
        FsStorage.ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_fs_rename_respects_overwrite_flag() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, "new").unwrap();
        fs::write(&dst, "old").unwrap();

        let err = FsStorage.rename(&src, &dst, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        FsStorage.rename(&src, &dst, true).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "new");
        assert!(!src.exists());
    }

    #[test]
    fn test_memory_storage_roundtrip_and_failures() {
        let storage = MemoryStorage::new();
        let path = Path::new("/ckpt/file");
        storage.write_file_atomic(path, b"data").unwrap();
        assert_eq!(storage.read_file(path).unwrap(), b"data");

        storage.set_fail_writes(true);
        assert_eq!(
            storage.write_file_atomic(path, b"x").unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(storage.read_file(path).unwrap(), b"data");

        storage.remove_file(path).unwrap();
        assert_eq!(
            storage.read_file(path).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
