//! Block location registry.
//!
//! Tracks which workers hold which blocks, with a reverse index so a dead
//! worker's locations can be dropped in one sweep. Entirely in memory:
//! workers rebuild it by re-reporting after a master restart.

use anycache_lib::{BlockId, BlockLocation, TierKind, WorkerId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct BlockMasterInner {
    locations: HashMap<BlockId, Vec<BlockLocation>>,
    worker_blocks: HashMap<WorkerId, BTreeSet<BlockId>>,
}

#[derive(Default)]
pub struct BlockMaster {
    inner: Mutex<BlockMasterInner>,
}

impl BlockMaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known locations for the given blocks; blocks without any location
    /// simply contribute nothing.
    pub fn get_block_locations(&self, block_ids: &[BlockId]) -> Vec<BlockLocation> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for id in block_ids {
            if let Some(locs) = inner.locations.get(id) {
                out.extend(locs.iter().cloned());
            }
        }
        out
    }

    /// Record that `worker_id` holds `block_id`. A re-report from the same
    /// worker replaces its previous entry (tier may have changed).
    pub fn add_block_location(
        &self,
        block_id: BlockId,
        worker_id: WorkerId,
        address: &str,
        tier: TierKind,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let locs = inner.locations.entry(block_id).or_default();
        locs.retain(|l| l.worker_id != worker_id);
        locs.push(BlockLocation {
            block_id,
            worker_id,
            worker_address: address.to_string(),
            tier,
        });
        inner
            .worker_blocks
            .entry(worker_id)
            .or_default()
            .insert(block_id);
    }

    pub fn remove_block_location(&self, block_id: BlockId, worker_id: WorkerId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(locs) = inner.locations.get_mut(&block_id) {
            locs.retain(|l| l.worker_id != worker_id);
            if locs.is_empty() {
                inner.locations.remove(&block_id);
            }
        }
        if let Some(blocks) = inner.worker_blocks.get_mut(&worker_id) {
            blocks.remove(&block_id);
            if blocks.is_empty() {
                inner.worker_blocks.remove(&worker_id);
            }
        }
    }

    /// Bulk removal when a worker is pronounced dead.
    pub fn remove_worker_blocks(&self, worker_id: WorkerId) {
        let mut inner = self.inner.lock().unwrap();
        let blocks = match inner.worker_blocks.remove(&worker_id) {
            Some(b) => b,
            None => return,
        };
        for block_id in blocks {
            if let Some(locs) = inner.locations.get_mut(&block_id) {
                locs.retain(|l| l.worker_id != worker_id);
                if locs.is_empty() {
                    inner.locations.remove(&block_id);
                }
            }
        }
    }

    /// Drop every location of one block (delete / truncate cleanup).
    pub fn remove_block(&self, block_id: BlockId) {
        let mut inner = self.inner.lock().unwrap();
        let locs = match inner.locations.remove(&block_id) {
            Some(l) => l,
            None => return,
        };
        for loc in locs {
            if let Some(blocks) = inner.worker_blocks.get_mut(&loc.worker_id) {
                blocks.remove(&block_id);
                if blocks.is_empty() {
                    inner.worker_blocks.remove(&loc.worker_id);
                }
            }
        }
    }

    pub fn worker_blocks(&self, worker_id: WorkerId) -> Vec<BlockId> {
        let inner = self.inner.lock().unwrap();
        inner
            .worker_blocks
            .get(&worker_id)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn replica_count(&self, block_id: BlockId) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.locations.get(&block_id).map_or(0, |l| l.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let bm = BlockMaster::new();
        bm.add_block_location(0xABCD, 1, "w1:29999", TierKind::Memory);
        bm.add_block_location(0xABCD, 2, "w2:29999", TierKind::Ssd);

        let locs = bm.get_block_locations(&[0xABCD, 0xBEEF]);
        assert_eq!(locs.len(), 2);
        assert_eq!(bm.replica_count(0xABCD), 2);
        assert_eq!(bm.replica_count(0xBEEF), 0);
    }

    #[test]
    fn test_rereport_replaces_tier() {
        let bm = BlockMaster::new();
        bm.add_block_location(7, 1, "w1:29999", TierKind::Ssd);
        bm.add_block_location(7, 1, "w1:29999", TierKind::Memory);

        let locs = bm.get_block_locations(&[7]);
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].tier, TierKind::Memory);
    }

    #[test]
    fn test_remove_worker_blocks() {
        let bm = BlockMaster::new();
        bm.add_block_location(1, 1, "w1", TierKind::Memory);
        bm.add_block_location(2, 1, "w1", TierKind::Memory);
        bm.add_block_location(2, 2, "w2", TierKind::Hdd);

        bm.remove_worker_blocks(1);
        assert!(bm.get_block_locations(&[1]).is_empty());
        let locs = bm.get_block_locations(&[2]);
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].worker_id, 2);
        assert!(bm.worker_blocks(1).is_empty());
    }

    #[test]
    fn test_remove_block_clears_reverse_index() {
        let bm = BlockMaster::new();
        bm.add_block_location(5, 1, "w1", TierKind::Memory);
        bm.add_block_location(6, 1, "w1", TierKind::Memory);
        bm.remove_block(5);
        assert!(bm.get_block_locations(&[5]).is_empty());
        assert_eq!(bm.worker_blocks(1), vec![6]);
    }
}
