//! Local-filesystem backend.

use crate::{UfsFileInfo, UnderFileSystem};
use anycache_lib::{AcError, AcResult};
use log::debug;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// UFS over a local directory tree. All operation paths are resolved
/// relative to `root`; absolute operation paths are reinterpreted as
/// root-relative so a mount cannot escape its subtree.
#[derive(Debug)]
pub struct LocalUfs {
    root: PathBuf,
}

impl LocalUfs {
    pub fn new(root: impl Into<PathBuf>) -> AcResult<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)
                .map_err(|e| AcError::IoError(format!("create ufs root {}: {}", root.display(), e)))?;
        }
        debug!("LocalUfs rooted at {}", root.display());
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let rel = path.trim_start_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    fn stat(full: &Path, name: String, path: String) -> AcResult<UfsFileInfo> {
        let meta = fs::metadata(full)
            .map_err(|e| map_io("stat", full, e))?;
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok(UfsFileInfo {
            name,
            path,
            is_directory: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modification_time_ms: mtime_ms,
        })
    }
}

fn map_io(op: &str, path: &Path, err: std::io::Error) -> AcError {
    if err.kind() == std::io::ErrorKind::NotFound {
        AcError::NotFound(format!("{} {}: {}", op, path.display(), err))
    } else {
        AcError::IoError(format!("{} {}: {}", op, path.display(), err))
    }
}

impl UnderFileSystem for LocalUfs {
    fn scheme(&self) -> &'static str {
        "file"
    }

    fn read_range(&self, path: &str, offset: u64, buf: &mut [u8]) -> AcResult<usize> {
        let full = self.resolve(path);
        let file = OpenOptions::new()
            .read(true)
            .open(&full)
            .map_err(|e| map_io("open", &full, e))?;
        let n = file
            .read_at(buf, offset)
            .map_err(|e| map_io("read", &full, e))?;
        Ok(n)
    }

    fn write_at(&self, path: &str, offset: u64, data: &[u8]) -> AcResult<usize> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io("mkdir", parent, e))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&full)
            .map_err(|e| map_io("open", &full, e))?;
        file.write_all_at(data, offset)
            .map_err(|e| map_io("write", &full, e))?;
        Ok(data.len())
    }

    fn create(&self, path: &str, recursive: bool) -> AcResult<()> {
        let full = self.resolve(path);
        if recursive {
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).map_err(|e| map_io("mkdir", parent, e))?;
            }
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)
            .map_err(|e| map_io("create", &full, e))?;
        Ok(())
    }

    fn delete(&self, path: &str, recursive: bool) -> AcResult<()> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full).map_err(|e| map_io("stat", &full, e))?;
        if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&full).map_err(|e| map_io("rmdir", &full, e))?;
            } else {
                fs::remove_dir(&full).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::DirectoryNotEmpty {
                        AcError::InvalidArgument(format!("directory not empty: {}", path))
                    } else {
                        map_io("rmdir", &full, e)
                    }
                })?;
            }
        } else {
            fs::remove_file(&full).map_err(|e| map_io("unlink", &full, e))?;
        }
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> AcResult<()> {
        let from = self.resolve(src);
        let to = self.resolve(dst);
        fs::rename(&from, &to).map_err(|e| map_io("rename", &from, e))?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> AcResult<Vec<UfsFileInfo>> {
        let full = self.resolve(path);
        let mut entries = Vec::new();
        let rd = fs::read_dir(&full).map_err(|e| map_io("readdir", &full, e))?;
        for entry in rd {
            let entry = entry.map_err(|e| map_io("readdir", &full, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_path = if path.is_empty() || path == "/" {
                name.clone()
            } else {
                format!("{}/{}", path.trim_end_matches('/'), name)
            };
            entries.push(Self::stat(&entry.path(), name, child_path)?);
        }
        Ok(entries)
    }

    fn file_info(&self, path: &str) -> AcResult<UfsFileInfo> {
        let full = self.resolve(path);
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::stat(&full, name, path.to_string())
    }

    fn mkdir(&self, path: &str, recursive: bool) -> AcResult<()> {
        let full = self.resolve(path);
        let res = if recursive {
            fs::create_dir_all(&full)
        } else {
            fs::create_dir(&full)
        };
        res.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                AcError::AlreadyExists(format!("directory exists: {}", path))
            } else {
                map_io("mkdir", &full, e)
            }
        })
    }

    fn exists(&self, path: &str) -> AcResult<bool> {
        Ok(self.resolve(path).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_ufs() -> (LocalUfs, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ufs = LocalUfs::new(dir.path()).unwrap();
        (ufs, dir)
    }

    #[test]
    fn test_write_then_read_range() {
        let (ufs, _dir) = create_test_ufs();
        ufs.write_at("a/b/data.bin", 0, b"hello world").unwrap();

        let mut buf = vec![0u8; 5];
        let n = ufs.read_range("a/b/data.bin", 6, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (ufs, _dir) = create_test_ufs();
        let mut buf = [0u8; 4];
        let err = ufs.read_range("nope.bin", 0, &mut buf).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_dir_and_file_info() {
        let (ufs, _dir) = create_test_ufs();
        ufs.mkdir("d", false).unwrap();
        ufs.write_at("d/x", 0, b"12345").unwrap();
        ufs.write_at("d/y", 0, b"1").unwrap();

        let mut entries = ufs.list_dir("d").unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "x");
        assert_eq!(entries[0].size, 5);
        assert!(!entries[0].is_directory);

        let info = ufs.file_info("d").unwrap();
        assert!(info.is_directory);
    }

    #[test]
    fn test_delete_and_exists() {
        let (ufs, _dir) = create_test_ufs();
        ufs.mkdir("tree/sub", true).unwrap();
        ufs.write_at("tree/sub/f", 0, b"x").unwrap();

        assert!(ufs.exists("tree/sub/f").unwrap());
        let err = ufs.delete("tree", false).unwrap_err();
        assert_eq!(err.code(), anycache_lib::StatusCode::InvalidArgument);

        ufs.delete("tree", true).unwrap();
        assert!(!ufs.exists("tree").unwrap());
    }

    #[test]
    fn test_rename() {
        let (ufs, _dir) = create_test_ufs();
        ufs.write_at("old.bin", 0, b"abc").unwrap();
        ufs.rename("old.bin", "new.bin").unwrap();
        assert!(!ufs.exists("old.bin").unwrap());
        let info = ufs.file_info("new.bin").unwrap();
        assert_eq!(info.size, 3);
    }

    #[test]
    fn test_mkdir_existing() {
        let (ufs, _dir) = create_test_ufs();
        ufs.mkdir("d", false).unwrap();
        let err = ufs.mkdir("d", false).unwrap_err();
        assert!(err.is_already_exists());
        // recursive mkdir is idempotent
        ufs.mkdir("d", true).unwrap();
    }
}
