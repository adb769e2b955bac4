//! Basic type aliases and shared records.

use serde::{Deserialize, Serialize};

pub type InodeId = u64;
pub type BlockId = u64;
pub type WorkerId = u64;

pub const INVALID_INODE_ID: InodeId = 0;
pub const INVALID_BLOCK_ID: BlockId = 0;
pub const INVALID_WORKER_ID: WorkerId = 0;

/// Root directory inode.
pub const ROOT_INODE_ID: InodeId = 1;

pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024 * 1024;
pub const DEFAULT_PAGE_SIZE: u64 = 1024 * 1024;
pub const MAX_BLOCK_SIZE: u64 = 512 * 1024 * 1024;

/// Storage medium of a worker tier. Lower rank is faster; the configured
/// tier list is kept sorted by rank, configuration order breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Memory,
    Ssd,
    Hdd,
}

impl TierKind {
    pub fn rank(&self) -> u8 {
        match self {
            TierKind::Memory => 0,
            TierKind::Ssd => 1,
            TierKind::Hdd => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TierKind::Memory => "MEM",
            TierKind::Ssd => "SSD",
            TierKind::Hdd => "HDD",
        }
    }

    pub fn from_rank(rank: u8) -> Option<TierKind> {
        match rank {
            0 => Some(TierKind::Memory),
            1 => Some(TierKind::Ssd),
            2 => Some(TierKind::Hdd),
            _ => None,
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a cached block lives. Shared between master, worker and client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub block_id: BlockId,
    pub worker_id: WorkerId,
    pub worker_address: String,
    pub tier: TierKind,
}

/// A registered worker as the master sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub address: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub last_heartbeat_ms: i64,
    pub alive: bool,
}

impl WorkerInfo {
    pub fn available_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }
}
