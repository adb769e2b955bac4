//! Operation counters.
//!
//! Plain atomic counters handed to components at construction. A metrics
//! endpoint (out of scope here) snapshots them; nothing in the core reads
//! its own counters for control decisions.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MasterMetrics {
    get_file_info: AtomicU64,
    create_file: AtomicU64,
    complete_file: AtomicU64,
    delete_file: AtomicU64,
    rename_file: AtomicU64,
    list_status: AtomicU64,
    mkdir: AtomicU64,
    truncate_file: AtomicU64,
    workers_lost: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $get:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl MasterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_get_file_info, get_file_info, get_file_info);
    counter!(record_create_file, create_file, create_file);
    counter!(record_complete_file, complete_file, complete_file);
    counter!(record_delete_file, delete_file, delete_file);
    counter!(record_rename_file, rename_file, rename_file);
    counter!(record_list_status, list_status, list_status);
    counter!(record_mkdir, mkdir, mkdir);
    counter!(record_truncate_file, truncate_file, truncate_file);
    counter!(record_worker_lost, workers_lost, workers_lost);
}

#[derive(Debug, Default)]
pub struct BlockStoreMetrics {
    blocks_created: AtomicU64,
    blocks_removed: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
}

impl BlockStoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_block_created, blocks_created, blocks_created);
    counter!(record_block_removed, blocks_removed, blocks_removed);
    counter!(record_read, reads, reads);
    counter!(record_write, writes, writes);
    counter!(record_promotion, promotions, promotions);

    pub fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct DataMoverMetrics {
    preloads: AtomicU64,
    persists: AtomicU64,
    failures: AtomicU64,
}

impl DataMoverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_preload, preloads, preloads);
    counter!(record_persist, persists, persists);
    counter!(record_failure, failures, failures);
}
