//! Mount table: namespace paths to external stores.
//!
//! Provides the unified namespace: `mount("/data/s3", "s3://bucket/warm")`
//! makes `/data/s3/foo` resolve to that store with relative path `foo`.
//! Resolution is longest-prefix over an ordered map. Mount points persist
//! in a small database of their own so they survive a master restart;
//! without `init` the table is memory-only.

use anycache_lib::config::S3Config;
use anycache_lib::{AcError, AcResult};
use log::{info, warn};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use ufs::{create_ufs, UnderFileSystem};

const DB_FILE_NAME: &str = "mounts.db";

struct MountEntry {
    ufs_uri: String,
    ufs: Arc<dyn UnderFileSystem>,
}

struct MountState {
    mounts: BTreeMap<String, MountEntry>,
    db: Option<Connection>,
}

pub struct MountTable {
    s3_config: S3Config,
    state: Mutex<MountState>,
}

fn db_err(context: &str, err: rusqlite::Error) -> AcError {
    AcError::IoError(format!("mount table {}: {}", context, err))
}

impl MountTable {
    pub fn new(s3_config: S3Config) -> Self {
        Self {
            s3_config,
            state: Mutex::new(MountState {
                mounts: BTreeMap::new(),
                db: None,
            }),
        }
    }

    /// Enable persistence under `db_dir` and reload saved mount points.
    pub fn init(&self, db_dir: &Path) -> AcResult<()> {
        std::fs::create_dir_all(db_dir)
            .map_err(|e| AcError::IoError(format!("create {}: {}", db_dir.display(), e)))?;
        let conn = Connection::open(db_dir.join(DB_FILE_NAME)).map_err(|e| db_err("open", e))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS mounts (
                 path TEXT PRIMARY KEY,
                 uri TEXT NOT NULL
             )",
            [],
        )
        .map_err(|e| db_err("create table", e))?;

        let mut st = self.state.lock().unwrap();
        {
            let mut stmt = conn
                .prepare("SELECT path, uri FROM mounts ORDER BY path")
                .map_err(|e| db_err("prepare load", e))?;
            let mut rows = stmt.query([]).map_err(|e| db_err("load", e))?;
            while let Some(row) = rows.next().map_err(|e| db_err("load", e))? {
                let path: String = row.get(0).map_err(|e| db_err("load path", e))?;
                let uri: String = row.get(1).map_err(|e| db_err("load uri", e))?;
                match create_ufs(&uri, &self.s3_config) {
                    Ok(ufs) => {
                        st.mounts.insert(path, MountEntry { ufs_uri: uri, ufs });
                    }
                    Err(err) => {
                        warn!("skipping invalid mount {} -> {}: {}", path, uri, err);
                    }
                }
            }
        }
        info!("mount table loaded {} mount(s)", st.mounts.len());
        st.db = Some(conn);
        Ok(())
    }

    pub fn mount(&self, ns_path: &str, ufs_uri: &str) -> AcResult<()> {
        let ns_path = normalize(ns_path)?;
        let mut st = self.state.lock().unwrap();
        if st.mounts.contains_key(&ns_path) {
            return Err(AcError::AlreadyExists(format!(
                "mount point already exists: {}",
                ns_path
            )));
        }
        let ufs = create_ufs(ufs_uri, &self.s3_config)?;

        if let Some(db) = &st.db {
            db.execute(
                "INSERT INTO mounts (path, uri) VALUES (?1, ?2)",
                params![ns_path, ufs_uri],
            )
            .map_err(|e| db_err("put", e))?;
        }
        st.mounts.insert(
            ns_path.clone(),
            MountEntry {
                ufs_uri: ufs_uri.to_string(),
                ufs,
            },
        );
        info!("mounted {} -> {}", ns_path, ufs_uri);
        Ok(())
    }

    pub fn unmount(&self, ns_path: &str) -> AcResult<()> {
        let ns_path = normalize(ns_path)?;
        let mut st = self.state.lock().unwrap();
        if !st.mounts.contains_key(&ns_path) {
            return Err(AcError::NotFound(format!("mount point not found: {}", ns_path)));
        }
        if let Some(db) = &st.db {
            db.execute("DELETE FROM mounts WHERE path = ?1", params![ns_path])
                .map_err(|e| db_err("delete", e))?;
        }
        st.mounts.remove(&ns_path);
        info!("unmounted {}", ns_path);
        Ok(())
    }

    /// Longest-prefix resolution of a namespace path to its backing store
    /// and the path relative to the mount point.
    pub fn resolve(&self, ns_path: &str) -> AcResult<(Arc<dyn UnderFileSystem>, String)> {
        let st = self.state.lock().unwrap();
        for (mount_path, entry) in st.mounts.iter().rev() {
            if !is_prefix(mount_path, ns_path) {
                continue;
            }
            let rel = ns_path[mount_path.len()..].trim_start_matches('/');
            return Ok((Arc::clone(&entry.ufs), rel.to_string()));
        }
        Err(AcError::NotFound(format!("no mount point for: {}", ns_path)))
    }

    pub fn is_mount_point(&self, ns_path: &str) -> bool {
        match normalize(ns_path) {
            Ok(p) => self.state.lock().unwrap().mounts.contains_key(&p),
            Err(_) => false,
        }
    }

    pub fn mount_points(&self) -> Vec<(String, String)> {
        let st = self.state.lock().unwrap();
        st.mounts
            .iter()
            .map(|(p, e)| (p.clone(), e.ufs_uri.clone()))
            .collect()
    }
}

fn normalize(ns_path: &str) -> AcResult<String> {
    if !ns_path.starts_with('/') {
        return Err(AcError::InvalidArgument(format!(
            "mount path must be absolute: {}",
            ns_path
        )));
    }
    let trimmed = ns_path.trim_end_matches('/');
    Ok(if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() })
}

/// `mount_path` covers `ns_path` when equal or when the next byte after
/// the prefix is a path separator.
fn is_prefix(mount_path: &str, ns_path: &str) -> bool {
    if ns_path == mount_path {
        return true;
    }
    if mount_path == "/" {
        return ns_path.starts_with('/');
    }
    ns_path.len() > mount_path.len()
        && ns_path.starts_with(mount_path)
        && ns_path.as_bytes()[mount_path.len()] == b'/'
}
