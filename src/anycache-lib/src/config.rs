//! Node configuration.
//!
//! All sections are serde structs with defaults, so a config file only
//! needs the keys it overrides. `Config::load_from_file` reads JSON.

use crate::types::{TierKind, DEFAULT_BLOCK_SIZE, DEFAULT_PAGE_SIZE};
use crate::{AcError, AcResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One storage tier of a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSpec {
    pub kind: TierKind,
    /// Tier root directory; unused by the memory tier.
    #[serde(default)]
    pub path: PathBuf,
    pub capacity_bytes: u64,
}

/// Which eviction policy the worker cache runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicyKind {
    Lru,
    Lfu,
}

impl Default for CachePolicyKind {
    fn default() -> Self {
        CachePolicyKind::Lru
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub host: String,
    pub port: u16,
    /// Directory of the inode metadata database.
    pub meta_db_dir: PathBuf,
    /// Directory of the mount table database; empty disables persistence.
    pub mount_db_dir: PathBuf,
    pub worker_heartbeat_timeout_ms: u64,
    /// How often the heartbeat checker sweeps the worker registry.
    pub heartbeat_check_interval_ms: u64,
    /// Prometheus /metrics HTTP port; 0 = disabled.
    pub metrics_port: u16,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 19999,
            meta_db_dir: PathBuf::from("/tmp/anycache/master/meta"),
            mount_db_dir: PathBuf::from("/tmp/anycache/master/mounts"),
            worker_heartbeat_timeout_ms: 30_000,
            heartbeat_check_interval_ms: 2_000,
            metrics_port: 9201,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub host: String,
    pub port: u16,
    pub master_address: String,
    pub tiers: Vec<TierSpec>,
    /// Directory of the block metadata database; empty keeps metadata
    /// in memory only (no warm restart).
    pub meta_db_dir: PathBuf,
    pub block_size: u64,
    pub page_size: u64,
    pub cache_policy: CachePolicyKind,
    /// Promote a block one tier up after this many accesses; 0 disables.
    pub auto_promote_access_threshold: u32,
    /// Usage ratio that triggers proactive eviction.
    pub auto_evict_high_watermark: f64,
    /// Eviction stops once usage falls to this ratio.
    pub auto_evict_low_watermark: f64,
    pub data_mover_threads: usize,
    /// Prometheus /metrics HTTP port; 0 = disabled.
    pub metrics_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 29999,
            master_address: "localhost:19999".to_string(),
            tiers: Vec::new(),
            meta_db_dir: PathBuf::from("/tmp/anycache/worker/meta"),
            block_size: DEFAULT_BLOCK_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            cache_policy: CachePolicyKind::Lru,
            auto_promote_access_threshold: 3,
            auto_evict_high_watermark: 0.95,
            auto_evict_low_watermark: 0.80,
            data_mover_threads: 2,
            metrics_port: 9202,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            bucket: String::new(),
            region: "us-east-1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            use_path_style: false,
        }
    }
}

/// Deadlines for the three RPC paths, in milliseconds. Zero disables the
/// deadline on that path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcTimeouts {
    /// Client to master: metadata operations, lightweight.
    pub master_rpc_timeout_ms: u64,
    /// Client to worker: block read/write, heavier.
    pub worker_rpc_timeout_ms: u64,
    /// Worker to master: register, heartbeat, report.
    pub internal_rpc_timeout_ms: u64,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self {
            master_rpc_timeout_ms: 10_000,
            worker_rpc_timeout_ms: 30_000,
            internal_rpc_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub master: MasterConfig,
    pub worker: WorkerConfig,
    pub s3: S3Config,
    pub rpc: RpcTimeouts,
}

impl Config {
    pub fn load_from_file(path: &Path) -> AcResult<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AcError::IoError(format!("read config {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&text).map_err(|e| {
            AcError::InvalidArgument(format!("parse config {}: {}", path.display(), e))
        })?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }
}
