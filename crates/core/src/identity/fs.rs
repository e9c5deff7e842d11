//! Filesystem identity of torrent files.

use std::io;
use std::path::Path;

/// Device, inode and link count of a file, as reported by `lstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
    pub nlink: u64,
}

impl FileIdentity {
    /// Key identifying the underlying file regardless of path.
    pub fn key(&self) -> (u64, u64) {
        (self.device, self.inode)
    }
}

/// Stat access to the filesystem the torrents live on.
///
/// Calls are blocking; callers run them on the blocking pool.
pub trait FileStat: Send + Sync {
    /// Stat `path` without following symlinks.
    fn lstat(&self, path: &Path) -> io::Result<FileIdentity>;
}

/// [`FileStat`] over the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileStat;

impl FileStat for LocalFileStat {
    #[cfg(unix)]
    fn lstat(&self, path: &Path) -> io::Result<FileIdentity> {
        use std::os::unix::fs::MetadataExt;

        let meta = std::fs::symlink_metadata(path)?;
        Ok(FileIdentity {
            device: meta.dev(),
            inode: meta.ino(),
            nlink: meta.nlink(),
        })
    }

    #[cfg(not(unix))]
    fn lstat(&self, _path: &Path) -> io::Result<FileIdentity> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "hardlink detection requires a unix filesystem",
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hardlinked_files_share_identity() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("movie.mkv");
        let link = dir.path().join("library.mkv");
        std::fs::write(&original, b"data").unwrap();
        std::fs::hard_link(&original, &link).unwrap();

        let a = LocalFileStat.lstat(&original).unwrap();
        let b = LocalFileStat.lstat(&link).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.nlink, 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(LocalFileStat.lstat(&dir.path().join("gone")).is_err());
    }
}
