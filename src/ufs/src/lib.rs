//! Under file system (UFS) backends.
//!
//! The cache sits above an external store: local disk or an S3-compatible
//! object store. `UnderFileSystem` is the path-based surface the data mover
//! and mount table consume. Backends are selected by URI scheme.

mod local;
mod s3;

pub use local::LocalUfs;
pub use s3::S3Ufs;

use anycache_lib::config::S3Config;
use anycache_lib::{AcError, AcResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// File status returned by a UFS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UfsFileInfo {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size: u64,
    pub modification_time_ms: i64,
}

/// The external store under the cache. Paths are relative to the backend
/// root (the mount URI); implementations are thread-safe and blocking.
pub trait UnderFileSystem: Send + Sync + std::fmt::Debug {
    /// URI scheme this backend handles ("file", "s3").
    fn scheme(&self) -> &'static str;

    /// Read up to `buf.len()` bytes at `offset`; returns the bytes read.
    fn read_range(&self, path: &str, offset: u64, buf: &mut [u8]) -> AcResult<usize>;

    /// Write `data` at `offset`, creating the file (and parents) if needed;
    /// returns the bytes written.
    fn write_at(&self, path: &str, offset: u64, data: &[u8]) -> AcResult<usize>;

    /// Create an empty file; with `recursive` missing parents are created.
    fn create(&self, path: &str, recursive: bool) -> AcResult<()>;

    fn delete(&self, path: &str, recursive: bool) -> AcResult<()>;

    fn rename(&self, src: &str, dst: &str) -> AcResult<()>;

    fn list_dir(&self, path: &str) -> AcResult<Vec<UfsFileInfo>>;

    fn file_info(&self, path: &str) -> AcResult<UfsFileInfo>;

    fn mkdir(&self, path: &str, recursive: bool) -> AcResult<()>;

    fn exists(&self, path: &str) -> AcResult<bool>;
}

/// Create a UFS for `uri`.
///
/// Accepted forms: `file:///abs/dir`, a bare absolute path, or
/// `s3://bucket/prefix`. The returned backend treats operation paths as
/// relative to the URI.
pub fn create_ufs(uri: &str, s3_config: &S3Config) -> AcResult<Arc<dyn UnderFileSystem>> {
    if let Some(rest) = uri.strip_prefix("file://") {
        let root = if rest.is_empty() { "/" } else { rest };
        return Ok(Arc::new(LocalUfs::new(root)?));
    }
    if uri.starts_with('/') {
        return Ok(Arc::new(LocalUfs::new(uri)?));
    }

    let parsed = url::Url::parse(uri)
        .map_err(|e| AcError::InvalidArgument(format!("bad ufs uri {}: {}", uri, e)))?;
    match parsed.scheme() {
        "s3" => {
            let bucket = parsed
                .host_str()
                .ok_or_else(|| AcError::InvalidArgument(format!("s3 uri missing bucket: {}", uri)))?;
            let prefix = parsed.path().trim_start_matches('/');
            Ok(Arc::new(S3Ufs::new(s3_config.clone(), bucket, prefix)))
        }
        other => Err(AcError::InvalidArgument(format!(
            "unsupported ufs scheme {}: {}",
            other, uri
        ))),
    }
}

/// Split a full UFS path into the base URI of its containing directory and
/// the file name, so a per-request backend can be created for it.
pub fn split_ufs_path(ufs_path: &str) -> (String, String) {
    match ufs_path.find("://") {
        None => {
            let (dir, name) = split_dir_name(ufs_path);
            (format!("file://{}", dir), name)
        }
        Some(pos) => {
            let scheme = &ufs_path[..pos + 3];
            let (dir, name) = split_dir_name(&ufs_path[pos + 3..]);
            (format!("{}{}", scheme, dir), name)
        }
    }
}

fn split_dir_name(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(slash) => (path[..slash].to_string(), path[slash + 1..].to_string()),
        None => (path.to_string(), String::new()),
    }
}
