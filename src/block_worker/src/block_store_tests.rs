use crate::block_store::{BlockStore, BlockStoreOptions};
use crate::meta_store::{BlockMeta, BlockMetaStore, MemoryMetaStore};
use anycache_lib::config::{CachePolicyKind, TierSpec};
use anycache_lib::metrics::BlockStoreMetrics;
use anycache_lib::{AcError, AcResult, BlockId, StatusCode, TierKind};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn memory_spec(capacity: u64) -> TierSpec {
    TierSpec {
        kind: TierKind::Memory,
        path: Default::default(),
        capacity_bytes: capacity,
    }
}

fn disk_spec(kind: TierKind, dir: &Path, capacity: u64) -> TierSpec {
    TierSpec {
        kind,
        path: dir.to_path_buf(),
        capacity_bytes: capacity,
    }
}

fn open_store(tiers: Vec<TierSpec>) -> BlockStore {
    let opts = BlockStoreOptions {
        tiers,
        ..BlockStoreOptions::default()
    };
    BlockStore::new(opts, Arc::new(BlockStoreMetrics::new())).unwrap()
}

#[test]
fn test_create_lands_in_fastest_tier() {
    let ssd_dir = TempDir::new().unwrap();
    let store = open_store(vec![
        disk_spec(TierKind::Ssd, ssd_dir.path(), 1 << 20),
        memory_spec(1 << 20),
    ]);

    store.create_block(1, 4096).unwrap();
    assert!(store.has_block(1));
    // tiers are rank-sorted regardless of configuration order
    assert_eq!(store.block_meta(1).unwrap().tier, TierKind::Memory);
    assert_eq!(store.tier_used_bytes(TierKind::Memory), 4096);
    assert_eq!(store.tier_used_bytes(TierKind::Ssd), 0);
}

#[test]
fn test_create_spills_to_slower_tier() {
    let ssd_dir = TempDir::new().unwrap();
    let store = open_store(vec![
        memory_spec(1000),
        disk_spec(TierKind::Ssd, ssd_dir.path(), 1 << 20),
    ]);

    store.create_block(1, 800).unwrap();
    store.create_block(2, 600).unwrap();
    assert_eq!(store.block_meta(1).unwrap().tier, TierKind::Memory);
    assert_eq!(store.block_meta(2).unwrap().tier, TierKind::Ssd);
}

#[test]
fn test_create_exhausted_after_eviction_fails() {
    let store = open_store(vec![memory_spec(1000)]);
    store.create_block(1, 500).unwrap();

    let err = store.create_block(2, 2000).unwrap_err();
    assert_eq!(err.code(), StatusCode::ResourceExhausted);
    // the eviction attempt sacrificed the resident block
    assert!(!store.has_block(1));
}

#[test]
fn test_create_evicts_fastest_tier_to_fit() {
    let store = open_store(vec![memory_spec(1000)]);
    store.create_block(1, 600).unwrap();
    store.create_block(2, 300).unwrap();

    // 100 free; evicting the oldest (1) makes room
    store.create_block(3, 500).unwrap();
    assert!(!store.has_block(1));
    assert!(store.has_block(2));
    assert!(store.has_block(3));
}

#[test]
fn test_ensure_block_is_idempotent() {
    let store = open_store(vec![memory_spec(1 << 20)]);
    store.ensure_block(5, 1024).unwrap();
    store.ensure_block(5, 1024).unwrap();
    assert_eq!(store.cached_block_count(), 1);
}

#[test]
fn test_read_write_roundtrip_updates_access_stats() {
    let store = open_store(vec![memory_spec(1 << 20)]);
    store.create_block(3, 64).unwrap();
    store.write_block(3, 0, b"anycache").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(store.read_block(3, 0, &mut buf).unwrap(), 8);
    assert_eq!(&buf, b"anycache");

    let meta = store.block_meta(3).unwrap();
    assert_eq!(meta.access_count, 1);
    assert!(meta.last_access_time_ms >= meta.create_time_ms);

    let mut tail = [0u8; 5];
    assert_eq!(store.read_block(3, 3, &mut tail).unwrap(), 5);
    assert_eq!(&tail, b"cache");
    assert_eq!(store.block_meta(3).unwrap().access_count, 2);
}

#[test]
fn test_read_missing_block() {
    let store = open_store(vec![memory_spec(1 << 20)]);
    let mut buf = [0u8; 4];
    assert!(store.read_block(9, 0, &mut buf).unwrap_err().is_not_found());
}

#[test]
fn test_remove_block_clears_all_state() {
    let store = open_store(vec![memory_spec(1 << 20)]);
    store.create_block(4, 128).unwrap();
    store.remove_block(4).unwrap();

    assert!(!store.has_block(4));
    assert!(store.block_meta(4).unwrap_err().is_not_found());
    assert_eq!(store.total_cached_bytes(), 0);
    assert_eq!(store.tier_used_bytes(TierKind::Memory), 0);
}

#[test]
fn test_explicit_promotion_moves_bytes() {
    let ssd_dir = TempDir::new().unwrap();
    let store = open_store(vec![
        memory_spec(1 << 20),
        disk_spec(TierKind::Ssd, ssd_dir.path(), 1 << 20),
    ]);

    // force the block onto the slower tier, then promote by hand
    store.create_block(1, 900 * 1024).unwrap();
    store.create_block(2, 200 * 1024).unwrap();
    assert_eq!(store.block_meta(2).unwrap().tier, TierKind::Ssd);
    store.write_block(2, 0, b"moving day").unwrap();

    store.remove_block(1).unwrap();
    store.promote_block(2, TierKind::Memory).unwrap();

    assert_eq!(store.block_meta(2).unwrap().tier, TierKind::Memory);
    assert_eq!(store.tier_used_bytes(TierKind::Ssd), 0);
    let mut buf = [0u8; 10];
    store.read_block(2, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"moving day");
}

#[test]
fn test_auto_promotion_after_access_threshold() {
    let ssd_dir = TempDir::new().unwrap();
    let store = open_store(vec![
        memory_spec(8192),
        disk_spec(TierKind::Ssd, ssd_dir.path(), 1 << 20),
    ]);

    // occupy memory so the 4 KiB block is admitted on SSD
    store.create_block(100, 6000).unwrap();
    store.create_block(7, 4096).unwrap();
    assert_eq!(store.block_meta(7).unwrap().tier, TierKind::Ssd);

    // free memory, then cross the default threshold of 3 reads
    store.remove_block(100).unwrap();
    let mut buf = [0u8; 16];
    for _ in 0..3 {
        store.read_block(7, 0, &mut buf).unwrap();
    }

    assert_eq!(store.block_meta(7).unwrap().tier, TierKind::Memory);
    assert_eq!(store.tier_used_bytes(TierKind::Ssd), 0);
    assert_eq!(store.tier_used_bytes(TierKind::Memory), 4096);
}

#[test]
fn test_promotion_count_is_bounded_by_tier_count() {
    let ssd_dir = TempDir::new().unwrap();
    let hdd_dir = TempDir::new().unwrap();
    let store = open_store(vec![
        memory_spec(1 << 20),
        disk_spec(TierKind::Ssd, ssd_dir.path(), 1 << 20),
        disk_spec(TierKind::Hdd, hdd_dir.path(), 1 << 20),
    ]);

    store.create_block(1, 512).unwrap();
    assert_eq!(store.block_meta(1).unwrap().tier, TierKind::Memory);
    // already at the fastest tier: repeated hot reads promote nothing
    let mut buf = [0u8; 8];
    for _ in 0..10 {
        store.read_block(1, 0, &mut buf).unwrap();
    }
    assert_eq!(store.block_meta(1).unwrap().tier, TierKind::Memory);
}

#[test]
fn test_watermark_auto_eviction() {
    let store = open_store(vec![memory_spec(1000)]);
    store.create_block(1, 300).unwrap();
    store.create_block(2, 300).unwrap();
    store.create_block(3, 300).unwrap();
    assert_eq!(store.tier_used_bytes(TierKind::Memory), 900);

    // 960/1000 > 0.95 high watermark: evict down toward 800
    store.create_block(4, 60).unwrap();
    assert!(!store.has_block(1), "LRU victim should have been evicted");
    assert!(store.has_block(4));
    assert!(store.tier_used_bytes(TierKind::Memory) <= 800);
}

#[test]
fn test_eviction_sufficiency() {
    let store = open_store(vec![memory_spec(1 << 20)]);
    for id in 0..8u64 {
        store.create_block(id + 1, 100).unwrap();
    }
    let evicted = store.evict_blocks(TierKind::Memory, 250).unwrap();
    let freed: u64 = evicted.len() as u64 * 100;
    assert!(freed >= 250);
    assert_eq!(evicted.len(), 3);

    // asking for more than everything empties the policy but not more
    let evicted = store.evict_blocks(TierKind::Memory, 10_000).unwrap();
    assert_eq!(evicted.len(), 5);
    assert_eq!(store.cached_block_count(), 0);
}

#[test]
fn test_warm_restart_recovers_disk_blocks_only() {
    let ssd_dir = TempDir::new().unwrap();
    let meta_dir = TempDir::new().unwrap();
    let opts = || BlockStoreOptions {
        tiers: vec![
            memory_spec(4096),
            disk_spec(TierKind::Ssd, ssd_dir.path(), 1 << 20),
        ],
        meta_db_dir: Some(meta_dir.path().to_path_buf()),
        ..BlockStoreOptions::default()
    };

    {
        let store = BlockStore::new(opts(), Arc::new(BlockStoreMetrics::new())).unwrap();
        store.create_block(1, 1024).unwrap(); // memory
        store.create_block(2, 8192).unwrap(); // ssd (memory too small)
        store.write_block(2, 0, b"survivor").unwrap();
        assert_eq!(store.block_meta(2).unwrap().tier, TierKind::Ssd);
    }

    let store = BlockStore::new(opts(), Arc::new(BlockStoreMetrics::new())).unwrap();
    store.recover().unwrap();

    // the disk block came back, the memory block's metadata was purged
    assert!(store.has_block(2));
    assert!(!store.has_block(1));
    assert!(store.block_meta(1).unwrap_err().is_not_found());
    let mut buf = [0u8; 8];
    store.read_block(2, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"survivor");
    assert_eq!(store.total_cached_bytes(), 8192);
}

// ─── Failure injection ──────────────────────────────────────────

struct FailingMetaStore {
    inner: MemoryMetaStore,
    fail_puts: AtomicBool,
}

impl FailingMetaStore {
    fn new() -> Self {
        Self {
            inner: MemoryMetaStore::new(),
            fail_puts: AtomicBool::new(false),
        }
    }
}

impl BlockMetaStore for FailingMetaStore {
    fn put(&self, id: BlockId, meta: &BlockMeta) -> AcResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(AcError::IoError("injected put failure".to_string()));
        }
        self.inner.put(id, meta)
    }

    fn get(&self, id: BlockId) -> AcResult<BlockMeta> {
        self.inner.get(id)
    }

    fn delete(&self, id: BlockId) -> AcResult<()> {
        self.inner.delete(id)
    }

    fn scan_all(&self) -> AcResult<Vec<BlockMeta>> {
        self.inner.scan_all()
    }
}

impl BlockMetaStore for Arc<FailingMetaStore> {
    fn put(&self, id: BlockId, meta: &BlockMeta) -> AcResult<()> {
        self.as_ref().put(id, meta)
    }

    fn get(&self, id: BlockId) -> AcResult<BlockMeta> {
        self.as_ref().get(id)
    }

    fn delete(&self, id: BlockId) -> AcResult<()> {
        self.as_ref().delete(id)
    }

    fn scan_all(&self) -> AcResult<Vec<BlockMeta>> {
        self.as_ref().scan_all()
    }
}

#[test]
fn test_failed_allocation_rolls_back_tier() {
    let meta = Arc::new(FailingMetaStore::new());
    let opts = BlockStoreOptions {
        tiers: vec![memory_spec(1 << 20)],
        cache_policy: CachePolicyKind::Lru,
        ..BlockStoreOptions::default()
    };
    let store = BlockStore::with_meta_store(
        opts,
        Box::new(Arc::clone(&meta)),
        Arc::new(BlockStoreMetrics::new()),
    )
    .unwrap();

    meta.fail_puts.store(true, Ordering::SeqCst);
    let err = store.create_block(1, 512).unwrap_err();
    assert_eq!(err.code(), StatusCode::IoError);

    // tier, policy, byte counter and map all agree: nothing was admitted
    assert!(!store.has_block(1));
    assert_eq!(store.tier_used_bytes(TierKind::Memory), 0);
    assert_eq!(store.cached_block_count(), 0);
    assert_eq!(store.total_cached_bytes(), 0);

    // the same id can be created once the store heals
    meta.fail_puts.store(false, Ordering::SeqCst);
    store.create_block(1, 512).unwrap();
    assert!(store.has_block(1));
}
