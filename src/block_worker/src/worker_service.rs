//! Worker service facade and its wire contract.
//!
//! `BlockWorker` bridges the RPC surface to the block store and the data
//! mover. Cache and persist requests name a full external-store path
//! (`file:///mnt/data/x` or `s3://bucket/x`); the backend for it is built
//! per request, so one worker serves blocks for any mounted store.

use crate::block_store::{BlockStore, BlockStoreOptions, TierStats};
use crate::data_mover::DataMover;
use anycache_lib::config::{S3Config, WorkerConfig};
use anycache_lib::metrics::{BlockStoreMetrics, DataMoverMetrics};
use anycache_lib::{AcError, AcResult, BlockId, RpcStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ufs::{create_ufs, split_ufs_path, UnderFileSystem};

// ─── Wire contract ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadBlockRequest {
    pub block_id: BlockId,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadBlockResponse {
    pub status: RpcStatus,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBlockRequest {
    pub block_id: BlockId,
    pub offset: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBlockResponse {
    pub status: RpcStatus,
    pub block_id: BlockId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheBlockRequest {
    pub block_id: BlockId,
    pub ufs_path: String,
    pub offset_in_ufs: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistBlockRequest {
    pub block_id: BlockId,
    pub ufs_path: String,
    pub offset_in_ufs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveBlockRequest {
    pub block_id: BlockId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadPageRequest {
    pub file_id: u64,
    pub page_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadPageResponse {
    pub status: RpcStatus,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusResponse {
    pub status: RpcStatus,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub block_count: u64,
    pub tiers: Vec<TierStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusReport {
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub block_count: u64,
    pub tiers: Vec<TierStats>,
}

// ─── Facade ─────────────────────────────────────────────────────

pub struct BlockWorker {
    store: Arc<BlockStore>,
    mover: DataMover,
    s3_config: S3Config,
}

impl BlockWorker {
    /// Build the tiers, recover the cache index, start the mover pool.
    pub fn new(
        config: &WorkerConfig,
        s3_config: S3Config,
        store_metrics: Arc<BlockStoreMetrics>,
        mover_metrics: Arc<DataMoverMetrics>,
    ) -> AcResult<Self> {
        let store = Arc::new(BlockStore::new(
            BlockStoreOptions::from_worker_config(config),
            store_metrics,
        )?);
        store.recover()?;
        let mover = DataMover::new(
            Arc::clone(&store),
            None,
            config.data_mover_threads,
            mover_metrics,
        );
        Ok(Self {
            store,
            mover,
            s3_config,
        })
    }

    pub fn block_store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    pub fn data_mover(&self) -> &DataMover {
        &self.mover
    }

    /// Stop background work: the mover pool first, in-flight tasks finish,
    /// pending ones are dropped.
    pub fn shutdown(&self) {
        self.mover.stop();
    }

    fn ufs_for(&self, ufs_path: &str) -> AcResult<(Arc<dyn UnderFileSystem>, String)> {
        if ufs_path.is_empty() {
            return Err(AcError::InvalidArgument("ufs_path is required".to_string()));
        }
        let (base_uri, rel) = split_ufs_path(ufs_path);
        let ufs = create_ufs(&base_uri, &self.s3_config)?;
        Ok((ufs, rel))
    }

    // ─── Operations ─────────────────────────────────────────────

    pub fn read_block(&self, block_id: BlockId, offset: u64, length: u64) -> AcResult<Vec<u8>> {
        let mut buf = vec![0u8; length as usize];
        let n = self.store.read_block(block_id, offset, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn write_block(&self, block_id: BlockId, offset: u64, data: &[u8]) -> AcResult<()> {
        self.store.ensure_block(block_id, offset + data.len() as u64)?;
        self.store.write_block(block_id, offset, data)
    }

    /// Synchronous cache fill from the external store.
    pub fn cache_block(
        &self,
        block_id: BlockId,
        ufs_path: &str,
        offset_in_ufs: u64,
        length: u64,
    ) -> AcResult<()> {
        let (ufs, rel) = self.ufs_for(ufs_path)?;
        let mut buf = vec![0u8; length as usize];
        let n = ufs.read_range(&rel, offset_in_ufs, &mut buf)?;
        buf.truncate(n);
        self.store.ensure_block(block_id, n as u64)?;
        self.store.write_block(block_id, 0, &buf)
    }

    /// Enqueue a cache fill on the mover; returns once accepted.
    pub fn async_cache_block(
        &self,
        block_id: BlockId,
        ufs_path: &str,
        offset_in_ufs: u64,
        length: u64,
    ) -> AcResult<()> {
        let (ufs, rel) = self.ufs_for(ufs_path)?;
        self.mover
            .submit_preload(block_id, &rel, offset_in_ufs, length, Some(ufs))
    }

    /// Enqueue a persist of the whole block to the external store.
    pub fn persist_block(
        &self,
        block_id: BlockId,
        ufs_path: &str,
        offset_in_ufs: u64,
    ) -> AcResult<()> {
        let (ufs, rel) = self.ufs_for(ufs_path)?;
        self.mover.submit_persist(block_id, &rel, offset_in_ufs, Some(ufs))
    }

    pub fn remove_block(&self, block_id: BlockId) -> AcResult<()> {
        self.store.remove_block(block_id)
    }

    /// Page-granular reads belong to the page accelerator, which is not
    /// part of this build.
    pub fn read_page(&self, _file_id: u64, _page_index: u64) -> AcResult<Vec<u8>> {
        Err(AcError::Unsupported("page store not built".to_string()))
    }

    pub fn worker_status(&self) -> WorkerStatusReport {
        let tiers = self.store.tier_stats();
        let capacity_bytes = tiers.iter().map(|t| t.capacity_bytes).sum();
        let used_bytes = tiers.iter().map(|t| t.used_bytes).sum();
        WorkerStatusReport {
            capacity_bytes,
            used_bytes,
            block_count: self.store.cached_block_count() as u64,
            tiers,
        }
    }

    // ─── RPC surface ────────────────────────────────────────────

    pub fn handle_read_block(&self, req: ReadBlockRequest) -> ReadBlockResponse {
        match self.read_block(req.block_id, req.offset, req.length) {
            Ok(data) => ReadBlockResponse {
                status: RpcStatus::ok(),
                data,
            },
            Err(err) => ReadBlockResponse {
                status: RpcStatus::from(&err),
                data: Vec::new(),
            },
        }
    }

    pub fn handle_write_block(&self, req: WriteBlockRequest) -> WriteBlockResponse {
        let res = self.write_block(req.block_id, req.offset, &req.data);
        WriteBlockResponse {
            status: RpcStatus::from(&res),
            block_id: req.block_id,
        }
    }

    pub fn handle_cache_block(&self, req: CacheBlockRequest) -> RpcStatus {
        RpcStatus::from(&self.cache_block(
            req.block_id,
            &req.ufs_path,
            req.offset_in_ufs,
            req.length,
        ))
    }

    pub fn handle_async_cache_block(&self, req: CacheBlockRequest) -> RpcStatus {
        RpcStatus::from(&self.async_cache_block(
            req.block_id,
            &req.ufs_path,
            req.offset_in_ufs,
            req.length,
        ))
    }

    pub fn handle_persist_block(&self, req: PersistBlockRequest) -> RpcStatus {
        RpcStatus::from(&self.persist_block(req.block_id, &req.ufs_path, req.offset_in_ufs))
    }

    pub fn handle_remove_block(&self, req: RemoveBlockRequest) -> RpcStatus {
        RpcStatus::from(&self.remove_block(req.block_id))
    }

    pub fn handle_read_page(&self, req: ReadPageRequest) -> ReadPageResponse {
        match self.read_page(req.file_id, req.page_index) {
            Ok(data) => ReadPageResponse {
                status: RpcStatus::ok(),
                data,
            },
            Err(err) => ReadPageResponse {
                status: RpcStatus::from(&err),
                data: Vec::new(),
            },
        }
    }

    pub fn handle_worker_status(&self) -> WorkerStatusResponse {
        let report = self.worker_status();
        WorkerStatusResponse {
            status: RpcStatus::ok(),
            capacity_bytes: report.capacity_bytes,
            used_bytes: report.used_bytes,
            block_count: report.block_count,
            tiers: report.tiers,
        }
    }
}
