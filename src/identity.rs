// SPDX-License-Identifier: Apache-2.0

//! Platform-independent file identity based on inode (Unix) or file index (Windows).
//!
//! This allows tracking files across renames/rotations, since the inode/file index
//! remains stable even when the file is renamed.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;

/// A platform-independent unique identifier for a physical file.
///
/// On Unix systems, this is the device ID + inode number.
/// On Windows, this is the volume serial number + file index.
///
/// This identifier remains stable across file renames, which is what makes
/// rotation and rename detection possible: two files at the same path with
/// different identities are different files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Device ID (Unix) or volume serial number (Windows)
    dev: u64,
    /// Inode number (Unix) or file index (Windows)
    ino: u64,
}

impl FileIdentity {
    /// Create a FileIdentity from raw device and inode values.
    /// Used for loading persisted state.
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Create a FileIdentity from an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    /// Create a FileIdentity from an open file handle.
    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        let info = handle_info(file)?;

        // Combine high and low parts of file index
        let file_index = ((info.nFileIndexHigh as u64) << 32) | (info.nFileIndexLow as u64);

        Ok(Self {
            dev: info.dwVolumeSerialNumber as u64,
            ino: file_index,
        })
    }

    /// Create a FileIdentity from file metadata.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    /// Resolve the identity currently reachable at a path.
    /// Stats the path rather than opening it, so a scan over many files
    /// does not consume a file descriptor per candidate.
    #[cfg(unix)]
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_metadata(&std::fs::metadata(path)?))
    }

    /// Resolve the identity currently reachable at a path.
    #[cfg(windows)]
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    /// Get the device ID (Unix) or volume serial number (Windows).
    pub fn dev(&self) -> u64 {
        self.dev
    }

    /// Get the inode number (Unix) or file index (Windows).
    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Check whether the file behind an open handle has been unlinked from the
/// filesystem (link count reached zero). The handle stays readable after an
/// unlink; this is how a harvester distinguishes removal from rename.
#[cfg(unix)]
pub fn is_unlinked(file: &File) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    Ok(file.metadata()?.nlink() == 0)
}

/// Check whether the file behind an open handle has been unlinked.
#[cfg(windows)]
pub fn is_unlinked(file: &File) -> io::Result<bool> {
    Ok(handle_info(file)?.nNumberOfLinks == 0)
}

#[cfg(windows)]
fn handle_info(
    file: &File,
) -> io::Result<windows_sys::Win32::Storage::FileSystem::BY_HANDLE_FILE_INFORMATION> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{
        BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
    };

    let handle = file.as_raw_handle() as HANDLE;
    let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

    let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
    if result == 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_identity_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let f = file.reopen().unwrap();
        let id = FileIdentity::from_file(&f).unwrap();

        // IDs should be non-zero
        assert!(id.dev() > 0 || id.ino() > 0);
    }

    #[test]
    fn test_identity_path_and_handle_agree() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let from_path = FileIdentity::from_path(file.path()).unwrap();
        let from_file = FileIdentity::from_file(&file.reopen().unwrap()).unwrap();

        assert_eq!(from_path, from_file);
    }

    #[test]
    fn test_identity_different_files() {
        let mut file1 = NamedTempFile::new().unwrap();
        let mut file2 = NamedTempFile::new().unwrap();

        file1.write_all(b"content 1").unwrap();
        file2.write_all(b"content 2").unwrap();
        file1.flush().unwrap();
        file2.flush().unwrap();

        let id1 = FileIdentity::from_path(file1.path()).unwrap();
        let id2 = FileIdentity::from_path(file2.path()).unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn test_identity_serde() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let id = FileIdentity::from_path(file.path()).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        let id2: FileIdentity = serde_json::from_str(&json).unwrap();

        assert_eq!(id, id2);
    }

    #[test]
    fn test_identity_stable_across_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "content").unwrap();

        let id1 = FileIdentity::from_path(&path).unwrap();

        let renamed = dir.path().join("a.log.1");
        std::fs::rename(&path, &renamed).unwrap();

        let id2 = FileIdentity::from_path(&renamed).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    #[cfg(unix)]
    fn test_is_unlinked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "content").unwrap();

        let file = File::open(&path).unwrap();
        assert!(!is_unlinked(&file).unwrap());

        std::fs::remove_file(&path).unwrap();
        assert!(is_unlinked(&file).unwrap());
    }

    #[test]
    fn test_identity_display() {
        let id = FileIdentity { dev: 123, ino: 456 };
        assert_eq!(format!("{}", id), "123:456");
    }
}
