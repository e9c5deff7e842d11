//! Mock filesystem stat for hardlink tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::identity::{FileIdentity, FileStat};

/// In-memory [`FileStat`].
///
/// Paths without an entry fail with `NotFound`; paths marked failing fail
/// with `PermissionDenied`.
#[derive(Debug, Default)]
pub struct MockFileStat {
    entries: Mutex<HashMap<PathBuf, Option<FileIdentity>>>,
}

impl MockFileStat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file.
    pub fn set(&self, path: impl Into<PathBuf>, device: u64, inode: u64, nlink: u64) {
        self.lock().insert(
            path.into(),
            Some(FileIdentity {
                device,
                inode,
                nlink,
            }),
        );
    }

    /// Make stat calls for `path` fail.
    pub fn fail(&self, path: impl Into<PathBuf>) {
        self.lock().insert(path.into(), None);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Option<FileIdentity>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileStat for MockFileStat {
    fn lstat(&self, path: &Path) -> io::Result<FileIdentity> {
        match self.lock().get(path) {
            Some(Some(identity)) => Ok(*identity),
            Some(None) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected stat failure for {}", path.display()),
            )),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file {}", path.display()),
            )),
        }
    }
}
