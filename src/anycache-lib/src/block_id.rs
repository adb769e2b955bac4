//! Composite block identifiers.
//!
//! A `BlockId` packs the owning inode and the block index into one 64-bit
//! value: `[inode id (40 bits) | block index (24 bits)]`. The file-to-block
//! mapping is therefore computable and needs no stored table. Id 0 stays
//! invalid because inode 0 is invalid.

use crate::types::{BlockId, InodeId};

pub const BLOCK_INDEX_BITS: u32 = 24;
pub const BLOCK_INDEX_MASK: u64 = (1u64 << BLOCK_INDEX_BITS) - 1;
pub const MAX_INODE_ID: InodeId = (1u64 << 40) - 1;
pub const MAX_BLOCK_INDEX: u32 = (1u32 << BLOCK_INDEX_BITS) - 1;

/// Compose a block id from the owning inode and the block index within the
/// file. The index is masked to 24 bits.
pub fn make_block_id(inode_id: InodeId, block_index: u32) -> BlockId {
    (inode_id << BLOCK_INDEX_BITS) | (u64::from(block_index) & BLOCK_INDEX_MASK)
}

/// The inode id a block belongs to.
pub fn inode_of(block_id: BlockId) -> InodeId {
    block_id >> BLOCK_INDEX_BITS
}

/// The index of a block within its file.
pub fn index_of(block_id: BlockId) -> u32 {
    (block_id & BLOCK_INDEX_MASK) as u32
}

/// Number of blocks a file of `file_size` bytes occupies.
pub fn block_count(file_size: u64, block_size: u64) -> u32 {
    if file_size == 0 {
        return 0;
    }
    ((file_size + block_size - 1) / block_size) as u32
}

/// Actual data length of one block; only the last block may be short.
pub fn block_length(file_size: u64, block_index: u32, block_size: u64) -> u64 {
    let start = u64::from(block_index) * block_size;
    if start >= file_size {
        return 0;
    }
    block_size.min(file_size - start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_decode_roundtrip() {
        for inode in [1u64, 42, 0xFFFF, MAX_INODE_ID] {
            for index in [0u32, 1, 7, MAX_BLOCK_INDEX] {
                let id = make_block_id(inode, index);
                assert_eq!(inode_of(id), inode);
                assert_eq!(index_of(id), index);
            }
        }
    }

    #[test]
    fn test_zero_is_only_zero() {
        assert_eq!(make_block_id(0, 0), 0);
        assert_ne!(make_block_id(1, 0), 0);
        assert_ne!(make_block_id(0, 1), 0);
    }

    #[test]
    fn test_index_masked_to_24_bits() {
        let id = make_block_id(5, 0xFF00_0001);
        assert_eq!(inode_of(id), 5);
        assert_eq!(index_of(id), 1);
    }

    #[test]
    fn test_block_count() {
        let mib = 1024 * 1024;
        assert_eq!(block_count(0, 64 * mib), 0);
        assert_eq!(block_count(1, 64 * mib), 1);
        assert_eq!(block_count(64 * mib, 64 * mib), 1);
        assert_eq!(block_count(64 * mib + 1, 64 * mib), 2);
    }

    #[test]
    fn test_block_enumeration_for_file() {
        // inode 42, 200 MiB file at 64 MiB blocks: four blocks, last short.
        let mib = 1024 * 1024;
        let size = 200 * mib;
        let bs = 64 * mib;
        assert_eq!(block_count(size, bs), 4);
        let ids: Vec<_> = (0..block_count(size, bs)).map(|i| make_block_id(42, i)).collect();
        assert_eq!(ids, vec![
            make_block_id(42, 0),
            make_block_id(42, 1),
            make_block_id(42, 2),
            make_block_id(42, 3),
        ]);
        assert_eq!(block_length(size, 0, bs), 64 * mib);
        assert_eq!(block_length(size, 1, bs), 64 * mib);
        assert_eq!(block_length(size, 2, bs), 64 * mib);
        assert_eq!(block_length(size, 3, bs), 8 * mib);
        assert_eq!(block_length(size, 4, bs), 0);
    }
}
