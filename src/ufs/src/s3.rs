//! S3-compatible backend surface.
//!
//! The object-store data path is not linked into this build; every
//! operation reports `Unsupported` so callers fall back or surface
//! NotImplemented to the client. The type still carries its configuration
//! so mount entries referencing s3:// URIs stay resolvable and listable.

use crate::{UfsFileInfo, UnderFileSystem};
use anycache_lib::config::S3Config;
use anycache_lib::{AcError, AcResult};

#[derive(Debug)]
pub struct S3Ufs {
    config: S3Config,
    bucket: String,
    prefix: String,
}

impl S3Ufs {
    pub fn new(config: S3Config, bucket: &str, prefix: &str) -> Self {
        Self {
            config,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn object_key(&self, path: &str) -> String {
        let rel = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            rel.to_string()
        } else if rel.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, rel)
        }
    }

    fn unsupported(&self, op: &str, path: &str) -> AcError {
        AcError::Unsupported(format!(
            "s3 backend not built: {} s3://{}/{}",
            op,
            self.bucket,
            self.object_key(path)
        ))
    }
}

impl UnderFileSystem for S3Ufs {
    fn scheme(&self) -> &'static str {
        "s3"
    }

    fn read_range(&self, path: &str, _offset: u64, _buf: &mut [u8]) -> AcResult<usize> {
        Err(self.unsupported("read", path))
    }

    fn write_at(&self, path: &str, _offset: u64, _data: &[u8]) -> AcResult<usize> {
        Err(self.unsupported("write", path))
    }

    fn create(&self, path: &str, _recursive: bool) -> AcResult<()> {
        Err(self.unsupported("create", path))
    }

    fn delete(&self, path: &str, _recursive: bool) -> AcResult<()> {
        Err(self.unsupported("delete", path))
    }

    fn rename(&self, src: &str, _dst: &str) -> AcResult<()> {
        Err(self.unsupported("rename", src))
    }

    fn list_dir(&self, path: &str) -> AcResult<Vec<UfsFileInfo>> {
        Err(self.unsupported("list", path))
    }

    fn file_info(&self, path: &str) -> AcResult<UfsFileInfo> {
        Err(self.unsupported("stat", path))
    }

    fn mkdir(&self, path: &str, _recursive: bool) -> AcResult<()> {
        Err(self.unsupported("mkdir", path))
    }

    fn exists(&self, path: &str) -> AcResult<bool> {
        Err(self.unsupported("stat", path))
    }
}
