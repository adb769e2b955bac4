// One master, one worker, no transport: the client-side flows are driven
// directly against the two service facades.

use anycache_lib::block_id::{block_count, block_length, make_block_id};
use anycache_lib::config::{MasterConfig, S3Config, TierSpec, WorkerConfig};
use anycache_lib::metrics::{BlockStoreMetrics, DataMoverMetrics, MasterMetrics};
use anycache_lib::{StatusCode, TierKind};
use block_worker::worker_service::{CacheBlockRequest, ReadBlockRequest, WriteBlockRequest};
use block_worker::BlockWorker;
use fs_master::FileSystemMaster;
use std::sync::Arc;
use tempfile::TempDir;

fn start_master(meta_dir: &TempDir, mount_dir: &TempDir) -> Arc<FileSystemMaster> {
    let config = MasterConfig {
        meta_db_dir: meta_dir.path().to_path_buf(),
        mount_db_dir: mount_dir.path().to_path_buf(),
        ..MasterConfig::default()
    };
    FileSystemMaster::open(config, S3Config::default(), Arc::new(MasterMetrics::new())).unwrap()
}

fn start_worker(ssd_dir: &TempDir, meta_dir: &TempDir) -> BlockWorker {
    let config = WorkerConfig {
        tiers: vec![
            TierSpec {
                kind: TierKind::Memory,
                path: Default::default(),
                capacity_bytes: 4 << 20,
            },
            TierSpec {
                kind: TierKind::Ssd,
                path: ssd_dir.path().to_path_buf(),
                capacity_bytes: 64 << 20,
            },
        ],
        meta_db_dir: meta_dir.path().to_path_buf(),
        data_mover_threads: 2,
        ..WorkerConfig::default()
    };
    BlockWorker::new(
        &config,
        S3Config::default(),
        Arc::new(BlockStoreMetrics::new()),
        Arc::new(DataMoverMetrics::new()),
    )
    .unwrap()
}

#[test]
fn test_write_read_delete_through_master_and_worker() {
    let master_meta = TempDir::new().unwrap();
    let master_mounts = TempDir::new().unwrap();
    let worker_ssd = TempDir::new().unwrap();
    let worker_meta = TempDir::new().unwrap();

    let master = start_master(&master_meta, &master_mounts);
    let worker = start_worker(&worker_ssd, &worker_meta);

    // worker joins the cluster
    let worker_id = master.register_worker("worker-1:29999", 64 << 20, 0);
    assert_ne!(worker_id, 0);

    // client: create the file, write its single block at the worker
    master.mkdir("/datasets", 0o755, false).unwrap();
    let created = master.create_file("/datasets/sample.bin", 0o644).unwrap();
    assert_eq!(created.worker_id, worker_id);

    let payload = b"sixteen byte blk".to_vec();
    let block_id = make_block_id(created.file_id, 0);
    let resp = worker.handle_write_block(WriteBlockRequest {
        block_id,
        offset: 0,
        data: payload.clone(),
    });
    assert!(resp.status.is_ok());

    // worker reports the placement, client finalizes the file
    master.report_block_location(worker_id, block_id, "worker-1:29999", TierKind::Memory);
    master
        .complete_file(created.file_id, payload.len() as u64)
        .unwrap();

    // read path: resolve, enumerate blocks, fetch from the located worker
    let info = master.get_file_info("/datasets/sample.bin").unwrap();
    assert!(info.is_complete);
    let count = block_count(info.size, info.block_size);
    assert_eq!(count, 1);
    let wanted = block_length(info.size, 0, info.block_size);

    let locations = master.get_block_locations(&[block_id]);
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].worker_address, "worker-1:29999");

    let resp = worker.handle_read_block(ReadBlockRequest {
        block_id,
        offset: 0,
        length: wanted,
    });
    assert!(resp.status.is_ok());
    assert_eq!(resp.data, payload);

    // delete drops the namespace entry and the location map entry
    master.delete_file("/datasets/sample.bin", false).unwrap();
    assert!(master
        .get_file_info("/datasets/sample.bin")
        .unwrap_err()
        .is_not_found());
    assert!(master.get_block_locations(&[block_id]).is_empty());

    worker.shutdown();
    master.shutdown();
}

#[test]
fn test_mounted_store_preload_flow() {
    let master_meta = TempDir::new().unwrap();
    let master_mounts = TempDir::new().unwrap();
    let worker_ssd = TempDir::new().unwrap();
    let worker_meta = TempDir::new().unwrap();
    let backing = TempDir::new().unwrap();

    let master = start_master(&master_meta, &master_mounts);
    let worker = start_worker(&worker_ssd, &worker_meta);
    let worker_id = master.register_worker("worker-1:29999", 64 << 20, 0);

    // external data lives under the mounted store
    std::fs::write(backing.path().join("events.log"), b"mounted bytes").unwrap();
    master
        .mount("/ext", &format!("file://{}", backing.path().display()))
        .unwrap();

    // client resolves the namespace path to the store and asks the worker
    // to cache the block
    let (ufs, rel) = master.mount_table().resolve("/ext/events.log").unwrap();
    assert_eq!(rel, "events.log");
    assert!(ufs.exists(&rel).unwrap());

    let file_id = 77u64;
    let block_id = make_block_id(file_id, 0);
    let status = worker.handle_cache_block(CacheBlockRequest {
        block_id,
        ufs_path: format!("file://{}/events.log", backing.path().display()),
        offset_in_ufs: 0,
        length: 13,
    });
    assert_eq!(status.code, StatusCode::Ok);
    master.report_block_location(worker_id, block_id, "worker-1:29999", TierKind::Memory);

    let resp = worker.handle_read_block(ReadBlockRequest {
        block_id,
        offset: 0,
        length: 13,
    });
    assert_eq!(resp.data, b"mounted bytes");

    worker.shutdown();
    master.shutdown();
}
