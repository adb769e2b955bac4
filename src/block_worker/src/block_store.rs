//! The block engine: tier placement, eviction, promotion, recovery.
//!
//! Admission policy: a new block lands in the fastest tier that can hold
//! it; when none can, the fastest tier is asked to evict first. Reads feed
//! the eviction policy and the per-block access counter, which in turn
//! drives one-tier-up auto-promotion. Allocation keeps the tier, the
//! metadata store, the policy and the block-to-tier map in agreement: a
//! failed step rolls back the steps before it.

use crate::cache_manager::CacheManager;
use crate::meta_store::{open_meta_store, BlockMeta, BlockMetaStore};
use crate::tier::StorageTier;
use anycache_lib::config::{CachePolicyKind, TierSpec, WorkerConfig};
use anycache_lib::metrics::BlockStoreMetrics;
use anycache_lib::{now_ms, AcError, AcResult, BlockId, TierKind};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct BlockStoreOptions {
    pub tiers: Vec<TierSpec>,
    /// Metadata database directory; `None` keeps metadata in memory only.
    pub meta_db_dir: Option<PathBuf>,
    pub cache_policy: CachePolicyKind,
    /// Promote after this many accesses; 0 disables auto-promotion.
    pub auto_promote_access_threshold: u32,
    pub auto_evict_high_watermark: f64,
    pub auto_evict_low_watermark: f64,
}

impl Default for BlockStoreOptions {
    fn default() -> Self {
        Self {
            tiers: Vec::new(),
            meta_db_dir: None,
            cache_policy: CachePolicyKind::Lru,
            auto_promote_access_threshold: 3,
            auto_evict_high_watermark: 0.95,
            auto_evict_low_watermark: 0.80,
        }
    }
}

impl BlockStoreOptions {
    pub fn from_worker_config(config: &WorkerConfig) -> Self {
        Self {
            tiers: config.tiers.clone(),
            meta_db_dir: if config.meta_db_dir.as_os_str().is_empty() {
                None
            } else {
                Some(config.meta_db_dir.clone())
            },
            cache_policy: config.cache_policy,
            auto_promote_access_threshold: config.auto_promote_access_threshold,
            auto_evict_high_watermark: config.auto_evict_high_watermark,
            auto_evict_low_watermark: config.auto_evict_low_watermark,
        }
    }
}

/// Per-tier usage snapshot for worker status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStats {
    pub kind: TierKind,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub block_count: u64,
}

pub struct BlockStore {
    /// Fastest first; configuration order breaks rank ties.
    tiers: Vec<StorageTier>,
    cache_mgr: CacheManager,
    meta: Box<dyn BlockMetaStore>,
    tier_map: Mutex<HashMap<BlockId, TierKind>>,
    metrics: Arc<BlockStoreMetrics>,
    promote_threshold: u32,
    high_watermark: f64,
    low_watermark: f64,
}

impl BlockStore {
    pub fn new(opts: BlockStoreOptions, metrics: Arc<BlockStoreMetrics>) -> AcResult<Self> {
        let meta = open_meta_store(opts.meta_db_dir.as_deref());
        Self::with_meta_store(opts, meta, metrics)
    }

    /// Seam for injecting a metadata store (tests exercise failure paths
    /// through it).
    pub fn with_meta_store(
        opts: BlockStoreOptions,
        meta: Box<dyn BlockMetaStore>,
        metrics: Arc<BlockStoreMetrics>,
    ) -> AcResult<Self> {
        let mut tiers = Vec::with_capacity(opts.tiers.len());
        for spec in &opts.tiers {
            let root = match spec.kind {
                TierKind::Memory => None,
                _ => Some(spec.path.clone()),
            };
            tiers.push(StorageTier::new(spec.kind, root, spec.capacity_bytes)?);
        }
        tiers.sort_by_key(|t| t.kind().rank());

        Ok(Self {
            tiers,
            cache_mgr: CacheManager::new(opts.cache_policy),
            meta,
            tier_map: Mutex::new(HashMap::new()),
            metrics,
            promote_threshold: opts.auto_promote_access_threshold,
            high_watermark: opts.auto_evict_high_watermark,
            low_watermark: opts.auto_evict_low_watermark,
        })
    }

    fn find_tier(&self, kind: TierKind) -> Option<&StorageTier> {
        self.tiers.iter().find(|t| t.kind() == kind)
    }

    fn block_tier(&self, id: BlockId) -> Option<TierKind> {
        self.tier_map.lock().unwrap().get(&id).copied()
    }

    /// Rebuild the block index from persisted metadata. A record whose
    /// claimed tier no longer holds the block (volatile tier, or the file
    /// vanished) is dropped.
    pub fn recover(&self) -> AcResult<()> {
        let mut recovered = 0usize;
        for meta in self.meta.scan_all()? {
            let present = self
                .find_tier(meta.tier)
                .map_or(false, |t| t.has_block(meta.block_id));
            if present {
                self.tier_map.lock().unwrap().insert(meta.block_id, meta.tier);
                self.cache_mgr.on_block_insert(meta.block_id, meta.length);
                recovered += 1;
            } else {
                let _ = self.meta.delete(meta.block_id);
            }
        }
        info!("block store recovery: {} blocks recovered", recovered);
        Ok(())
    }

    // ─── Engine operations ──────────────────────────────────────

    /// Allocate a block in the fastest tier that can take it, evicting
    /// from the fastest tier when nothing fits.
    pub fn create_block(&self, id: BlockId, size: u64) -> AcResult<()> {
        let mut target = self.tiers.iter().find(|t| t.available_bytes() >= size);
        if target.is_none() {
            let fastest = self
                .tiers
                .first()
                .ok_or_else(|| AcError::ResourceExhausted("no storage tiers configured".to_string()))?;
            self.evict_blocks(fastest.kind(), size)?;
            if fastest.available_bytes() >= size {
                target = Some(fastest);
            }
        }
        let target = target.ok_or_else(|| {
            AcError::ResourceExhausted("no tier has enough space".to_string())
        })?;

        target.allocate(id, size)?;

        let now = now_ms();
        let meta = BlockMeta {
            block_id: id,
            length: size,
            tier: target.kind(),
            create_time_ms: now,
            last_access_time_ms: now,
            access_count: 0,
        };
        if let Err(err) = self.meta.put(id, &meta) {
            // undo the allocation so nothing refers to a half-born block
            let _ = target.remove(id);
            return Err(err);
        }

        self.tier_map.lock().unwrap().insert(id, target.kind());
        self.cache_mgr.on_block_insert(id, size);
        self.metrics.record_block_created();

        self.maybe_auto_evict(target.kind());
        Ok(())
    }

    /// Idempotent create.
    pub fn ensure_block(&self, id: BlockId, size: u64) -> AcResult<()> {
        if self.has_block(id) {
            return Ok(());
        }
        self.create_block(id, size)
    }

    pub fn read_block(&self, id: BlockId, offset: u64, buf: &mut [u8]) -> AcResult<usize> {
        let kind = self
            .block_tier(id)
            .ok_or_else(|| AcError::NotFound(format!("block {} not cached", id)))?;
        let tier = self
            .find_tier(kind)
            .ok_or_else(|| AcError::Internal(format!("tier {} missing", kind)))?;
        let n = tier.read(id, offset, buf)?;

        self.cache_mgr.on_block_access(id);
        if let Ok(mut meta) = self.meta.get(id) {
            meta.last_access_time_ms = now_ms();
            meta.access_count = meta.access_count.wrapping_add(1);
            let _ = self.meta.put(id, &meta);
            self.maybe_auto_promote(id, &meta);
        }
        self.metrics.record_read();
        Ok(n)
    }

    /// Writes stay in whatever tier the block already occupies.
    pub fn write_block(&self, id: BlockId, offset: u64, data: &[u8]) -> AcResult<()> {
        let kind = self
            .block_tier(id)
            .ok_or_else(|| AcError::NotFound(format!("block {} not cached", id)))?;
        let tier = self
            .find_tier(kind)
            .ok_or_else(|| AcError::Internal(format!("tier {} missing", kind)))?;
        tier.write(id, offset, data)?;
        self.cache_mgr.on_block_access(id);
        self.metrics.record_write();
        Ok(())
    }

    pub fn remove_block(&self, id: BlockId) -> AcResult<()> {
        if let Some(kind) = self.block_tier(id) {
            if let Some(tier) = self.find_tier(kind) {
                let _ = tier.remove(id);
            }
        }
        self.cache_mgr.on_block_remove(id);
        self.meta.delete(id)?;
        self.tier_map.lock().unwrap().remove(&id);
        self.metrics.record_block_removed();
        Ok(())
    }

    /// Move a block to `target`: export, import, then drop the source
    /// copy. Any failure before the source removal leaves the block
    /// readable from where it was.
    pub fn promote_block(&self, id: BlockId, target: TierKind) -> AcResult<()> {
        let src_kind = self
            .block_tier(id)
            .ok_or_else(|| AcError::NotFound(format!("block {} not found", id)))?;
        if src_kind == target {
            return Ok(());
        }
        let src = self
            .find_tier(src_kind)
            .ok_or_else(|| AcError::Internal(format!("tier {} missing", src_kind)))?;
        let dst = self
            .find_tier(target)
            .ok_or_else(|| AcError::NotFound(format!("target tier {} not found", target)))?;

        let data = src.export(id)?;
        if let Err(err) = dst.import(id, &data) {
            if dst.has_block(id) {
                let _ = dst.remove(id);
            }
            return Err(err);
        }
        let _ = src.remove(id);

        if let Ok(mut meta) = self.meta.get(id) {
            meta.tier = target;
            let _ = self.meta.put(id, &meta);
        }
        self.tier_map.lock().unwrap().insert(id, target);
        self.metrics.record_promotion();
        debug!("promoted block {} from {} to {}", id, src_kind, target);
        Ok(())
    }

    /// Evict policy-chosen blocks from `tier` until `bytes_needed` is
    /// freed or the policy runs out. Victims that turned out to live in a
    /// different tier are put back untouched.
    pub fn evict_blocks(&self, tier: TierKind, bytes_needed: u64) -> AcResult<Vec<BlockId>> {
        let candidates = self.cache_mgr.eviction_candidates(bytes_needed);
        let mut evicted = Vec::new();
        for (id, size) in candidates {
            match self.block_tier(id) {
                Some(kind) if kind == tier => {
                    if let Some(t) = self.find_tier(kind) {
                        let _ = t.remove(id);
                    }
                    let _ = self.meta.delete(id);
                    self.tier_map.lock().unwrap().remove(&id);
                    evicted.push(id);
                }
                _ => {
                    self.cache_mgr.on_block_insert(id, size);
                }
            }
        }
        self.metrics.record_evictions(evicted.len() as u64);
        Ok(evicted)
    }

    // ─── Background rules ───────────────────────────────────────

    /// One tier up once the access count crosses the threshold, and only
    /// when the faster tier has room. Promotion is monotone; nothing here
    /// ever demotes.
    fn maybe_auto_promote(&self, id: BlockId, meta: &BlockMeta) {
        if self.promote_threshold == 0 || meta.access_count < u64::from(self.promote_threshold) {
            return;
        }
        let current = match self.block_tier(id) {
            Some(kind) => kind,
            None => return,
        };
        let idx = match self.tiers.iter().position(|t| t.kind() == current) {
            Some(i) => i,
            None => return,
        };
        if idx == 0 {
            return; // already fastest
        }
        let dst = &self.tiers[idx - 1];
        if dst.available_bytes() < meta.length {
            return;
        }
        if self.promote_block(id, dst.kind()).is_ok() {
            debug!(
                "auto-promoted block {} to {} (access_count={})",
                id,
                dst.kind(),
                meta.access_count
            );
        }
    }

    /// Past the high watermark, evict down to the low watermark.
    fn maybe_auto_evict(&self, kind: TierKind) {
        let tier = match self.find_tier(kind) {
            Some(t) if t.capacity() > 0 => t,
            _ => return,
        };
        let usage = tier.used_bytes() as f64 / tier.capacity() as f64;
        if usage <= self.high_watermark {
            return;
        }
        let target_used = (tier.capacity() as f64 * self.low_watermark) as u64;
        let to_free = tier.used_bytes().saturating_sub(target_used);
        if to_free == 0 {
            return;
        }
        if let Ok(evicted) = self.evict_blocks(kind, to_free) {
            if !evicted.is_empty() {
                debug!(
                    "auto-evicted {} blocks from {} (usage was {:.1}%)",
                    evicted.len(),
                    kind,
                    usage * 100.0
                );
            }
        }
    }

    // ─── Queries ────────────────────────────────────────────────

    pub fn has_block(&self, id: BlockId) -> bool {
        self.tier_map.lock().unwrap().contains_key(&id)
    }

    pub fn block_meta(&self, id: BlockId) -> AcResult<BlockMeta> {
        self.meta.get(id)
    }

    pub fn tier_used_bytes(&self, kind: TierKind) -> u64 {
        self.find_tier(kind).map_or(0, |t| t.used_bytes())
    }

    pub fn tier_capacity(&self, kind: TierKind) -> u64 {
        self.find_tier(kind).map_or(0, |t| t.capacity())
    }

    pub fn total_cached_bytes(&self) -> u64 {
        self.cache_mgr.cached_bytes()
    }

    pub fn cached_block_count(&self) -> usize {
        self.cache_mgr.cached_block_count()
    }

    pub fn tier_stats(&self) -> Vec<TierStats> {
        self.tiers
            .iter()
            .map(|t| TierStats {
                kind: t.kind(),
                capacity_bytes: t.capacity(),
                used_bytes: t.used_bytes(),
                block_count: t.block_count() as u64,
            })
            .collect()
    }
}
