//! Per-block metadata, persisted so a worker restart can rebuild its
//! cache index from whatever survived on the disk tiers.
//!
//! The record is a packed 41-byte value keyed by the 8-byte big-endian
//! block id: `block_id(8) | length(8) | create_time_ms(8) |
//! last_access_time_ms(8) | access_count(8) | tier(1)`, all big-endian.

use anycache_lib::{AcError, AcResult, BlockId, TierKind, INVALID_BLOCK_ID};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

const DB_FILE_NAME: &str = "block_meta.db";
pub const BLOCK_META_LEN: usize = 41;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMeta {
    pub block_id: BlockId,
    /// Actual data length; at most the allocated block size.
    pub length: u64,
    pub tier: TierKind,
    pub create_time_ms: i64,
    pub last_access_time_ms: i64,
    /// Monotonically increasing; wrap-around is tolerated.
    pub access_count: u64,
}

impl Default for BlockMeta {
    fn default() -> Self {
        Self {
            block_id: INVALID_BLOCK_ID,
            length: 0,
            tier: TierKind::Memory,
            create_time_ms: 0,
            last_access_time_ms: 0,
            access_count: 0,
        }
    }
}

impl BlockMeta {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_META_LEN);
        buf.extend_from_slice(&self.block_id.to_be_bytes());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(&self.create_time_ms.to_be_bytes());
        buf.extend_from_slice(&self.last_access_time_ms.to_be_bytes());
        buf.extend_from_slice(&self.access_count.to_be_bytes());
        buf.push(self.tier.rank());
        buf
    }

    /// Short or unknown-tier records decode to defaults; recovery drops
    /// them when the backing tier does not confirm the block.
    pub fn decode(data: &[u8]) -> BlockMeta {
        if data.len() < BLOCK_META_LEN {
            return BlockMeta::default();
        }
        let u64_at =
            |off: usize| u64::from_be_bytes(data[off..off + 8].try_into().unwrap());
        BlockMeta {
            block_id: u64_at(0),
            length: u64_at(8),
            create_time_ms: u64_at(16) as i64,
            last_access_time_ms: u64_at(24) as i64,
            access_count: u64_at(32),
            tier: TierKind::from_rank(data[40]).unwrap_or(TierKind::Memory),
        }
    }
}

/// Durable block-metadata surface. The SQLite implementation is the
/// production path; the in-memory one serves tests and workers that run
/// without a metadata directory (no warm restart).
pub trait BlockMetaStore: Send + Sync {
    fn put(&self, id: BlockId, meta: &BlockMeta) -> AcResult<()>;
    fn get(&self, id: BlockId) -> AcResult<BlockMeta>;
    fn delete(&self, id: BlockId) -> AcResult<()>;
    fn scan_all(&self) -> AcResult<Vec<BlockMeta>>;
}

/// Open the metadata store for a worker: SQLite when a directory is
/// given, falling back to memory when opening fails (the cache still
/// works, it just restarts cold).
pub fn open_meta_store(db_dir: Option<&Path>) -> Box<dyn BlockMetaStore> {
    match db_dir {
        Some(dir) => match SqliteMetaStore::open(dir) {
            Ok(store) => Box::new(store),
            Err(err) => {
                warn!("block meta store unavailable ({}), using memory", err);
                Box::new(MemoryMetaStore::new())
            }
        },
        None => Box::new(MemoryMetaStore::new()),
    }
}

fn db_err(context: &str, err: rusqlite::Error) -> AcError {
    AcError::IoError(format!("block meta store {}: {}", context, err))
}

pub struct SqliteMetaStore {
    conn: Mutex<Connection>,
}

impl SqliteMetaStore {
    pub fn open(db_dir: &Path) -> AcResult<Self> {
        std::fs::create_dir_all(db_dir)
            .map_err(|e| AcError::IoError(format!("create {}: {}", db_dir.display(), e)))?;
        let conn = Connection::open(db_dir.join(DB_FILE_NAME)).map_err(|e| db_err("open", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| db_err("journal_mode", e))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| db_err("synchronous", e))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS block_meta (
                 key BLOB PRIMARY KEY,
                 value BLOB NOT NULL
             ) WITHOUT ROWID",
            [],
        )
        .map_err(|e| db_err("create table", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl BlockMetaStore for SqliteMetaStore {
    fn put(&self, id: BlockId, meta: &BlockMeta) -> AcResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO block_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![id.to_be_bytes().as_slice(), meta.encode()],
        )
        .map_err(|e| db_err("put", e))?;
        Ok(())
    }

    fn get(&self, id: BlockId) -> AcResult<BlockMeta> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT value FROM block_meta WHERE key = ?1",
                params![id.to_be_bytes().as_slice()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|e| db_err("get", e))?;
        match row {
            Some(data) => Ok(BlockMeta::decode(&data)),
            None => Err(AcError::NotFound(format!("block {} metadata not found", id))),
        }
    }

    fn delete(&self, id: BlockId) -> AcResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM block_meta WHERE key = ?1",
            params![id.to_be_bytes().as_slice()],
        )
        .map_err(|e| db_err("delete", e))?;
        Ok(())
    }

    fn scan_all(&self) -> AcResult<Vec<BlockMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT value FROM block_meta ORDER BY key")
            .map_err(|e| db_err("prepare scan", e))?;
        let mut rows = stmt.query([]).map_err(|e| db_err("scan", e))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("scan", e))? {
            let data: Vec<u8> = row.get(0).map_err(|e| db_err("scan value", e))?;
            out.push(BlockMeta::decode(&data));
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryMetaStore {
    inner: Mutex<HashMap<BlockId, BlockMeta>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockMetaStore for MemoryMetaStore {
    fn put(&self, id: BlockId, meta: &BlockMeta) -> AcResult<()> {
        self.inner.lock().unwrap().insert(id, meta.clone());
        Ok(())
    }

    fn get(&self, id: BlockId) -> AcResult<BlockMeta> {
        self.inner
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AcError::NotFound(format!("block {} metadata not found", id)))
    }

    fn delete(&self, id: BlockId) -> AcResult<()> {
        self.inner.lock().unwrap().remove(&id);
        Ok(())
    }

    fn scan_all(&self) -> AcResult<Vec<BlockMeta>> {
        Ok(self.inner.lock().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_meta(id: BlockId) -> BlockMeta {
        BlockMeta {
            block_id: id,
            length: 4096,
            tier: TierKind::Ssd,
            create_time_ms: 1_700_000_000_000,
            last_access_time_ms: 1_700_000_000_500,
            access_count: 7,
        }
    }

    #[test]
    fn test_codec_roundtrip() {
        let meta = sample_meta(0xABCD_EF01);
        let buf = meta.encode();
        assert_eq!(buf.len(), BLOCK_META_LEN);
        assert_eq!(BlockMeta::decode(&buf), meta);
    }

    #[test]
    fn test_short_record_decodes_to_default() {
        let meta = BlockMeta::decode(&[1, 2, 3]);
        assert_eq!(meta.block_id, INVALID_BLOCK_ID);
        assert_eq!(meta.access_count, 0);
    }

    #[test]
    fn test_sqlite_store_crud_and_restart() {
        let dir = TempDir::new().unwrap();
        {
            let store = SqliteMetaStore::open(dir.path()).unwrap();
            store.put(1, &sample_meta(1)).unwrap();
            store.put(2, &sample_meta(2)).unwrap();
            store.delete(2).unwrap();
        }
        let store = SqliteMetaStore::open(dir.path()).unwrap();
        assert_eq!(store.get(1).unwrap(), sample_meta(1));
        assert!(store.get(2).unwrap_err().is_not_found());
        assert_eq!(store.scan_all().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryMetaStore::new();
        store.put(9, &sample_meta(9)).unwrap();
        assert_eq!(store.get(9).unwrap().length, 4096);
        store.delete(9).unwrap();
        assert!(store.get(9).unwrap_err().is_not_found());
    }

    #[test]
    fn test_factory_fallback() {
        let store = open_meta_store(None);
        store.put(1, &sample_meta(1)).unwrap();
        assert_eq!(store.scan_all().unwrap().len(), 1);
    }
}
