//! The master coordinator.
//!
//! Composes the inode tree, the block-location map, the worker registry
//! and the mount table behind one facade, and owns the heartbeat checker
//! thread. The `handle_*` methods are the RPC surface: they translate
//! `AcResult` into status-led responses; a transport maps those onto its
//! own frames.

use crate::block_master::BlockMaster;
use crate::inode::Inode;
use crate::inode_store::InodeStore;
use crate::inode_tree::InodeTree;
use crate::mount_table::MountTable;
use crate::proto::*;
use crate::worker_manager::WorkerManager;
use anycache_lib::block_id::{block_count, make_block_id};
use anycache_lib::config::{MasterConfig, S3Config};
use anycache_lib::metrics::MasterMetrics;
use anycache_lib::{
    AcError, AcResult, BlockId, InodeId, TierKind, WorkerId, INVALID_WORKER_ID,
};
use log::info;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub struct CreateFileResult {
    pub file_id: InodeId,
    pub worker_id: WorkerId,
    pub worker_address: String,
}

pub struct FileSystemMaster {
    config: MasterConfig,
    tree: InodeTree,
    blocks: BlockMaster,
    workers: WorkerManager,
    mounts: MountTable,
    metrics: Arc<MasterMetrics>,
    stop: Mutex<bool>,
    stop_cv: Condvar,
    checker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl FileSystemMaster {
    /// Open the metadata store, recover the namespace and load the mount
    /// table. The returned master is ready to serve; call
    /// `start_heartbeat_checker` to begin expiring silent workers.
    pub fn open(
        config: MasterConfig,
        s3_config: S3Config,
        metrics: Arc<MasterMetrics>,
    ) -> AcResult<Arc<Self>> {
        let store = Arc::new(InodeStore::open(&config.meta_db_dir)?);
        let tree = InodeTree::with_store(store);
        tree.recover()?;
        info!("master namespace recovered, dir_count={}", tree.dir_count());

        let mounts = MountTable::new(s3_config);
        if !config.mount_db_dir.as_os_str().is_empty() {
            mounts.init(&config.mount_db_dir)?;
        }

        Ok(Arc::new(Self {
            workers: WorkerManager::new(config.worker_heartbeat_timeout_ms),
            config,
            tree,
            blocks: BlockMaster::new(),
            mounts,
            metrics,
            stop: Mutex::new(false),
            stop_cv: Condvar::new(),
            checker: Mutex::new(None),
        }))
    }

    /// A memory-only master for embedding and tests: no persistence, no
    /// mount database.
    pub fn new_in_memory(config: MasterConfig, s3_config: S3Config) -> Arc<Self> {
        Arc::new(Self {
            workers: WorkerManager::new(config.worker_heartbeat_timeout_ms),
            config,
            tree: InodeTree::new_in_memory(),
            blocks: BlockMaster::new(),
            mounts: MountTable::new(s3_config),
            metrics: Arc::new(MasterMetrics::new()),
            stop: Mutex::new(false),
            stop_cv: Condvar::new(),
            checker: Mutex::new(None),
        })
    }

    pub fn tree(&self) -> &InodeTree {
        &self.tree
    }

    pub fn block_master(&self) -> &BlockMaster {
        &self.blocks
    }

    pub fn worker_manager(&self) -> &WorkerManager {
        &self.workers
    }

    pub fn mount_table(&self) -> &MountTable {
        &self.mounts
    }

    // ─── Heartbeat checking ─────────────────────────────────────

    pub fn start_heartbeat_checker(self: &Arc<Self>) {
        let master = Arc::clone(self);
        let interval = Duration::from_millis(self.config.heartbeat_check_interval_ms.max(1));
        let handle = std::thread::spawn(move || loop {
            let stopped = master.stop.lock().unwrap();
            let (stopped, _) = master.stop_cv.wait_timeout(stopped, interval).unwrap();
            if *stopped {
                return;
            }
            drop(stopped);
            master.run_heartbeat_sweep();
        });
        *self.checker.lock().unwrap() = Some(handle);
    }

    /// One sweep of the registry: workers past the heartbeat timeout lose
    /// their alive flag and all of their block locations.
    pub fn run_heartbeat_sweep(&self) {
        for worker_id in self.workers.check_heartbeats() {
            self.blocks.remove_worker_blocks(worker_id);
            self.metrics.record_worker_lost();
        }
    }

    /// Stop the heartbeat checker and join it.
    pub fn shutdown(&self) {
        *self.stop.lock().unwrap() = true;
        self.stop_cv.notify_all();
        if let Some(handle) = self.checker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    // ─── File operations ────────────────────────────────────────

    pub fn get_file_info(&self, path: &str) -> AcResult<Inode> {
        self.metrics.record_get_file_info();
        self.tree.get_by_path(path)
    }

    /// Create a file and pick the worker the client should write to: the
    /// alive worker with the most available bytes. With no worker alive
    /// the create still succeeds and the placement is the invalid id; the
    /// client retries placement later.
    pub fn create_file(&self, path: &str, mode: u32) -> AcResult<CreateFileResult> {
        self.metrics.record_create_file();
        let file_id = self.tree.create_file(path, mode)?;
        match self.workers.select_worker_for_write() {
            Ok(w) => Ok(CreateFileResult {
                file_id,
                worker_id: w.id,
                worker_address: w.address,
            }),
            Err(_) => Ok(CreateFileResult {
                file_id,
                worker_id: INVALID_WORKER_ID,
                worker_address: String::new(),
            }),
        }
    }

    pub fn complete_file(&self, file_id: InodeId, size: u64) -> AcResult<()> {
        self.metrics.record_complete_file();
        self.tree.complete_file(file_id, size)
    }

    /// Delete a path. For a file every composite block id derived from its
    /// size is purged from the location map; workers reclaim the bytes
    /// lazily through eviction.
    pub fn delete_file(&self, path: &str, recursive: bool) -> AcResult<()> {
        self.metrics.record_delete_file();
        let target = self.tree.get_by_path(path).ok();
        self.tree.delete(path, recursive)?;
        if let Some(inode) = target {
            if !inode.is_directory {
                self.purge_block_range(inode.id, 0, block_count(inode.size, inode.block_size));
            }
        }
        Ok(())
    }

    pub fn rename_file(&self, src: &str, dst: &str) -> AcResult<()> {
        self.metrics.record_rename_file();
        self.tree.rename(src, dst)
    }

    pub fn list_status(&self, path: &str) -> AcResult<Vec<Inode>> {
        self.metrics.record_list_status();
        self.tree.list(path)
    }

    /// mkdir is idempotent: creating an existing directory reports OK.
    pub fn mkdir(&self, path: &str, mode: u32, recursive: bool) -> AcResult<()> {
        self.metrics.record_mkdir();
        match self.tree.create_directory(path, mode, recursive) {
            Ok(_) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn truncate_file(&self, path: &str, new_size: u64) -> AcResult<()> {
        self.metrics.record_truncate_file();
        let inode = self.tree.get_by_path(path)?;
        if inode.is_directory {
            return Err(AcError::InvalidArgument("cannot truncate a directory".to_string()));
        }
        self.tree.update_size(inode.id, new_size)?;
        if new_size < inode.size {
            let new_blocks = block_count(new_size, inode.block_size);
            let old_blocks = block_count(inode.size, inode.block_size);
            self.purge_block_range(inode.id, new_blocks, old_blocks);
        }
        Ok(())
    }

    fn purge_block_range(&self, inode_id: InodeId, from: u32, to: u32) {
        for index in from..to {
            self.blocks.remove_block(make_block_id(inode_id, index));
        }
    }

    // ─── Block operations ───────────────────────────────────────

    pub fn get_block_locations(&self, block_ids: &[BlockId]) -> Vec<anycache_lib::BlockLocation> {
        self.blocks.get_block_locations(block_ids)
    }

    pub fn report_block_location(
        &self,
        worker_id: WorkerId,
        block_id: BlockId,
        address: &str,
        tier: TierKind,
    ) {
        self.blocks.add_block_location(block_id, worker_id, address, tier);
    }

    // ─── Worker management ──────────────────────────────────────

    pub fn register_worker(&self, address: &str, capacity: u64, used: u64) -> WorkerId {
        self.workers.register(address, capacity, used)
    }

    pub fn worker_heartbeat(&self, id: WorkerId, capacity: u64, used: u64) -> AcResult<()> {
        self.workers.heartbeat(id, capacity, used)
    }

    // ─── Mount operations ───────────────────────────────────────

    pub fn mount(&self, ns_path: &str, ufs_uri: &str) -> AcResult<()> {
        self.mounts.mount(ns_path, ufs_uri)
    }

    pub fn unmount(&self, ns_path: &str) -> AcResult<()> {
        self.mounts.unmount(ns_path)
    }

    // ─── RPC surface ────────────────────────────────────────────

    pub fn handle_get_file_info(&self, req: GetFileInfoRequest) -> GetFileInfoResponse {
        let res = self.get_file_info(&req.path);
        GetFileInfoResponse {
            status: RpcStatus::from(&res),
            file_info: res.ok().map(|inode| FileInfo::from(&inode)),
        }
    }

    pub fn handle_create_file(&self, req: CreateFileRequest) -> CreateFileResponse {
        match self.create_file(&req.path, req.mode) {
            Ok(created) => CreateFileResponse {
                status: RpcStatus::ok(),
                file_id: created.file_id,
                worker_id: created.worker_id,
                worker_address: created.worker_address,
            },
            Err(err) => CreateFileResponse {
                status: RpcStatus::from(&err),
                file_id: 0,
                worker_id: INVALID_WORKER_ID,
                worker_address: String::new(),
            },
        }
    }

    pub fn handle_complete_file(&self, req: CompleteFileRequest) -> StatusResponse {
        StatusResponse {
            status: RpcStatus::from(&self.complete_file(req.file_id, req.file_size)),
        }
    }

    pub fn handle_delete_file(&self, req: DeleteFileRequest) -> StatusResponse {
        StatusResponse {
            status: RpcStatus::from(&self.delete_file(&req.path, req.recursive)),
        }
    }

    pub fn handle_rename_file(&self, req: RenameFileRequest) -> StatusResponse {
        StatusResponse {
            status: RpcStatus::from(&self.rename_file(&req.src, &req.dst)),
        }
    }

    pub fn handle_list_status(&self, req: ListStatusRequest) -> ListStatusResponse {
        let res = self.list_status(&req.path);
        match res {
            Ok(entries) => ListStatusResponse {
                status: RpcStatus::ok(),
                entries: entries.iter().map(FileInfo::from).collect(),
            },
            Err(err) => ListStatusResponse {
                status: RpcStatus::from(&err),
                entries: Vec::new(),
            },
        }
    }

    pub fn handle_mkdir(&self, req: MkdirRequest) -> StatusResponse {
        StatusResponse {
            status: RpcStatus::from(&self.mkdir(&req.path, req.mode, req.recursive)),
        }
    }

    pub fn handle_truncate_file(&self, req: TruncateFileRequest) -> StatusResponse {
        StatusResponse {
            status: RpcStatus::from(&self.truncate_file(&req.path, req.new_size)),
        }
    }

    pub fn handle_get_block_locations(
        &self,
        req: GetBlockLocationsRequest,
    ) -> GetBlockLocationsResponse {
        let locations = self
            .get_block_locations(&req.block_ids)
            .into_iter()
            .map(|l| BlockLocationInfo {
                block_id: l.block_id,
                worker_id: l.worker_id,
                worker_address: l.worker_address,
                tier: l.tier,
            })
            .collect();
        GetBlockLocationsResponse {
            status: RpcStatus::ok(),
            locations,
        }
    }

    pub fn handle_report_block_location(&self, req: ReportBlockLocationRequest) -> StatusResponse {
        for loc in &req.locations {
            self.report_block_location(req.worker_id, loc.block_id, &loc.worker_address, loc.tier);
        }
        StatusResponse {
            status: RpcStatus::ok(),
        }
    }

    pub fn handle_register_worker(&self, req: RegisterWorkerRequest) -> RegisterWorkerResponse {
        RegisterWorkerResponse {
            status: RpcStatus::ok(),
            worker_id: self.register_worker(&req.address, req.capacity_bytes, req.used_bytes),
        }
    }

    pub fn handle_worker_heartbeat(&self, req: WorkerHeartbeatRequest) -> StatusResponse {
        StatusResponse {
            status: RpcStatus::from(&self.worker_heartbeat(
                req.worker_id,
                req.capacity_bytes,
                req.used_bytes,
            )),
        }
    }

    pub fn handle_mount(&self, req: MountRequest) -> StatusResponse {
        StatusResponse {
            status: RpcStatus::from(&self.mount(&req.ns_path, &req.ufs_uri)),
        }
    }

    pub fn handle_unmount(&self, req: UnmountRequest) -> StatusResponse {
        StatusResponse {
            status: RpcStatus::from(&self.unmount(&req.ns_path)),
        }
    }

    pub fn handle_get_mount_table(&self) -> GetMountTableResponse {
        GetMountTableResponse {
            status: RpcStatus::ok(),
            mounts: self
                .mounts
                .mount_points()
                .into_iter()
                .map(|(ns_path, ufs_uri)| MountPoint { ns_path, ufs_uri })
                .collect(),
        }
    }
}

impl Drop for FileSystemMaster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anycache_lib::block_id::index_of;
    use tempfile::TempDir;

    fn memory_master(heartbeat_timeout_ms: u64) -> Arc<FileSystemMaster> {
        let config = MasterConfig {
            worker_heartbeat_timeout_ms: heartbeat_timeout_ms,
            ..MasterConfig::default()
        };
        FileSystemMaster::new_in_memory(config, S3Config::default())
    }

    #[test]
    fn test_create_file_picks_most_available_worker() {
        let master = memory_master(30_000);
        master.register_worker("small:29999", 1_000, 900);
        let big = master.register_worker("big:29999", 100_000, 0);

        let created = master.create_file("/f", 0o644).unwrap();
        assert_eq!(created.worker_id, big);
        assert_eq!(created.worker_address, "big:29999");
    }

    #[test]
    fn test_create_file_without_workers_still_succeeds() {
        let master = memory_master(30_000);
        let created = master.create_file("/f", 0o644).unwrap();
        assert_eq!(created.worker_id, INVALID_WORKER_ID);
        assert!(created.worker_address.is_empty());
        assert!(master.get_file_info("/f").is_ok());
    }

    #[test]
    fn test_mkdir_is_idempotent() {
        let master = memory_master(30_000);
        master.mkdir("/a/b", 0o755, true).unwrap();
        master.mkdir("/a/b", 0o755, true).unwrap();
        master.mkdir("/a/b", 0o755, false).unwrap();
    }

    #[test]
    fn test_worker_death_evicts_locations() {
        let master = memory_master(10);
        let w1 = master.register_worker("w1:29999", 1_000_000, 0);
        master.report_block_location(w1, 0xABCD, "w1:29999", TierKind::Memory);
        assert_eq!(master.get_block_locations(&[0xABCD]).len(), 1);

        std::thread::sleep(Duration::from_millis(30));
        master.run_heartbeat_sweep();

        assert!(master.get_block_locations(&[0xABCD]).is_empty());
        assert!(!master.worker_manager().get_worker(w1).unwrap().alive);
    }

    #[test]
    fn test_delete_file_purges_locations() {
        let master = memory_master(30_000);
        let w1 = master.register_worker("w1:29999", 1_000_000, 0);
        let created = master.create_file("/data.bin", 0o644).unwrap();
        let bs = master.get_file_info("/data.bin").unwrap().block_size;

        master.complete_file(created.file_id, 3 * bs).unwrap();
        let ids: Vec<_> = (0..3u32).map(|i| make_block_id(created.file_id, i)).collect();
        for &id in &ids {
            master.report_block_location(w1, id, "w1:29999", TierKind::Memory);
        }
        assert_eq!(master.get_block_locations(&ids).len(), 3);

        master.delete_file("/data.bin", false).unwrap();
        assert!(master.get_block_locations(&ids).is_empty());
    }

    #[test]
    fn test_truncate_purges_tail_locations() {
        let master = memory_master(30_000);
        let w1 = master.register_worker("w1:29999", 1_000_000, 0);
        let created = master.create_file("/t.bin", 0o644).unwrap();
        let inode = master.get_file_info("/t.bin").unwrap();
        let bs = inode.block_size;

        master.complete_file(created.file_id, 4 * bs).unwrap();
        for i in 0..4u32 {
            master.report_block_location(
                w1,
                make_block_id(created.file_id, i),
                "w1:29999",
                TierKind::Ssd,
            );
        }

        master.truncate_file("/t.bin", 2 * bs).unwrap();

        let remaining = master.get_block_locations(&[
            make_block_id(created.file_id, 0),
            make_block_id(created.file_id, 1),
            make_block_id(created.file_id, 2),
            make_block_id(created.file_id, 3),
        ]);
        let mut kept: Vec<u32> = remaining.iter().map(|l| index_of(l.block_id)).collect();
        kept.sort_unstable();
        assert_eq!(kept, vec![0, 1]);
        assert_eq!(master.get_file_info("/t.bin").unwrap().size, 2 * bs);
    }

    #[test]
    fn test_rpc_surface_maps_errors() {
        let master = memory_master(30_000);
        let resp = master.handle_get_file_info(GetFileInfoRequest {
            path: "/missing".to_string(),
        });
        assert_eq!(resp.status.code, anycache_lib::StatusCode::NotFound);
        assert!(resp.file_info.is_none());

        master.mkdir("/d", 0o755, false).unwrap();
        let resp = master.handle_get_file_info(GetFileInfoRequest {
            path: "/d".to_string(),
        });
        assert!(resp.status.is_ok());
        assert!(resp.file_info.unwrap().is_directory);
    }

    #[test]
    fn test_persistent_master_open_and_reopen() {
        let meta_dir = TempDir::new().unwrap();
        let mount_dir = TempDir::new().unwrap();
        let config = MasterConfig {
            meta_db_dir: meta_dir.path().to_path_buf(),
            mount_db_dir: mount_dir.path().to_path_buf(),
            ..MasterConfig::default()
        };
        {
            let master = FileSystemMaster::open(
                config.clone(),
                S3Config::default(),
                Arc::new(MasterMetrics::new()),
            )
            .unwrap();
            master.mkdir("/warm", 0o755, false).unwrap();
            let created = master.create_file("/warm/x", 0o644).unwrap();
            master.complete_file(created.file_id, 512).unwrap();
            master.mount("/warm", "s3://bucket/warm").unwrap();
            master.shutdown();
        }

        let master = FileSystemMaster::open(
            config,
            S3Config::default(),
            Arc::new(MasterMetrics::new()),
        )
        .unwrap();
        let inode = master.get_file_info("/warm/x").unwrap();
        assert_eq!(inode.size, 512);
        assert!(inode.is_complete);
        let mounts = master.handle_get_mount_table().mounts;
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].ufs_uri, "s3://bucket/warm");
    }

    #[test]
    fn test_heartbeat_checker_thread_runs_and_stops() {
        let config = MasterConfig {
            worker_heartbeat_timeout_ms: 10,
            heartbeat_check_interval_ms: 5,
            ..MasterConfig::default()
        };
        let master = FileSystemMaster::new_in_memory(config, S3Config::default());
        let w1 = master.register_worker("w1:29999", 1_000, 0);
        master.report_block_location(w1, 0x1, "w1:29999", TierKind::Memory);

        master.start_heartbeat_checker();
        std::thread::sleep(Duration::from_millis(80));
        assert!(master.get_block_locations(&[0x1]).is_empty());
        master.shutdown();
    }
}
