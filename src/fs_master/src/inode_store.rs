//! Durable inode store.
//!
//! Two key/value tables in one embedded database:
//!
//!   - `inodes`: 8-byte big-endian inode id -> record (header + name).
//!     Point lookups dominate; the primary-key index serves them.
//!   - `edges`: 8-byte big-endian parent id + raw child name -> 8-byte
//!     big-endian child id. One parent's edges are a contiguous key range.
//!
//! The owner/group dictionaries and the id-allocator cursor live under
//! sentinel keys in `inodes`, sorted after every valid id. All writes go
//! through `commit(StoreBatch)`, one transaction per batch; the database
//! runs in WAL mode with relaxed synchronous so group commit stays cheap.

use crate::inode::{
    be64, decode_record, encode_edge_key, encode_inode_key, encode_record, Inode, OwnerGroupDict,
    FLAGS_OFFSET, FLAG_DIRECTORY, GROUP_DICT_KEY, NEXT_ID_KEY, OWNER_DICT_KEY, RECORD_HEADER_LEN,
};
use anycache_lib::{AcError, AcResult, InodeId};
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const DB_FILE_NAME: &str = "metadata.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Inodes,
    Edges,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Inodes => "inodes",
            Table::Edges => "edges",
        }
    }
}

#[derive(Debug)]
enum BatchOp {
    Put {
        table: Table,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        table: Table,
        key: Vec<u8>,
    },
}

/// An atomic group of inode/edge/cursor mutations. Built through the
/// `batch_*` helpers on the store, applied by `commit`.
#[derive(Debug, Default)]
pub struct StoreBatch {
    ops: Vec<BatchOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

struct StoreInner {
    conn: Connection,
    dict: OwnerGroupDict,
}

pub struct InodeStore {
    inner: Mutex<StoreInner>,
}

fn db_err(context: &str, err: rusqlite::Error) -> AcError {
    AcError::IoError(format!("inode store {}: {}", context, err))
}

impl InodeStore {
    /// Open (or create) the store under `db_dir` and load the dictionaries.
    pub fn open(db_dir: &Path) -> AcResult<InodeStore> {
        std::fs::create_dir_all(db_dir)
            .map_err(|e| AcError::IoError(format!("create {}: {}", db_dir.display(), e)))?;
        let conn = Connection::open(db_dir.join(DB_FILE_NAME))
            .map_err(|e| db_err("open", e))?;

        // WAL gives us the required write-ahead log; NORMAL lets the OS
        // schedule the fsync of committed frames.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| db_err("journal_mode", e))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| db_err("synchronous", e))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS inodes (
                 key BLOB PRIMARY KEY,
                 value BLOB NOT NULL
             ) WITHOUT ROWID;
             CREATE TABLE IF NOT EXISTS edges (
                 key BLOB PRIMARY KEY,
                 value BLOB NOT NULL
             ) WITHOUT ROWID;",
        )
        .map_err(|e| db_err("create tables", e))?;

        let mut dict = OwnerGroupDict::default();
        if let Some(data) = Self::read_value(&conn, Table::Inodes, &encode_inode_key(OWNER_DICT_KEY))? {
            dict.load_owners(&data);
        }
        if let Some(data) = Self::read_value(&conn, Table::Inodes, &encode_inode_key(GROUP_DICT_KEY))? {
            dict.load_groups(&data);
        }
        dict.clear_dirty();

        info!(
            "inode store opened at {}, owners={}, groups={}",
            db_dir.display(),
            dict.owner_count(),
            dict.group_count()
        );
        Ok(InodeStore {
            inner: Mutex::new(StoreInner { conn, dict }),
        })
    }

    fn read_value(conn: &Connection, table: Table, key: &[u8]) -> AcResult<Option<Vec<u8>>> {
        conn.query_row(
            &format!("SELECT value FROM {} WHERE key = ?1", table.name()),
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| db_err("get", e))
    }

    // ─── Runtime reads ──────────────────────────────────────────

    /// Point lookup of one inode. The children map comes back empty.
    pub fn get_inode(&self, id: InodeId) -> AcResult<Inode> {
        let inner = self.inner.lock().unwrap();
        match Self::read_value(&inner.conn, Table::Inodes, &encode_inode_key(id))? {
            Some(data) => Ok(decode_record(id, &data, &inner.dict)),
            None => Err(AcError::NotFound(format!("inode {} not found", id))),
        }
    }

    /// Batched point lookups. Missing ids are silently dropped.
    pub fn multi_get_inodes(&self, ids: &[InodeId]) -> AcResult<Vec<Inode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.lock().unwrap();
        let mut stmt = inner
            .conn
            .prepare("SELECT value FROM inodes WHERE key = ?1")
            .map_err(|e| db_err("prepare multi_get", e))?;
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            let row = stmt
                .query_row(params![encode_inode_key(id).as_slice()], |row| {
                    row.get::<_, Vec<u8>>(0)
                })
                .optional()
                .map_err(|e| db_err("multi_get", e))?;
            if let Some(data) = row {
                out.push(decode_record(id, &data, &inner.dict));
            }
        }
        Ok(out)
    }

    /// The persisted id-allocator cursor.
    pub fn get_next_id(&self) -> AcResult<InodeId> {
        let inner = self.inner.lock().unwrap();
        match Self::read_value(&inner.conn, Table::Inodes, &encode_inode_key(NEXT_ID_KEY))? {
            Some(data) if data.len() >= 8 => Ok(be64(&data)),
            Some(_) => Err(AcError::IoError("next_id value truncated".to_string())),
            None => Err(AcError::NotFound("next_id not persisted".to_string())),
        }
    }

    // ─── Batch building ─────────────────────────────────────────

    pub fn batch_put_inode(&self, batch: &mut StoreBatch, id: InodeId, inode: &Inode) {
        let mut inner = self.inner.lock().unwrap();
        let value = encode_record(inode, &mut inner.dict);
        batch.ops.push(BatchOp::Put {
            table: Table::Inodes,
            key: encode_inode_key(id).to_vec(),
            value,
        });
    }

    pub fn batch_delete_inode(&self, batch: &mut StoreBatch, id: InodeId) {
        batch.ops.push(BatchOp::Delete {
            table: Table::Inodes,
            key: encode_inode_key(id).to_vec(),
        });
    }

    pub fn batch_put_edge(
        &self,
        batch: &mut StoreBatch,
        parent_id: InodeId,
        child_name: &str,
        child_id: InodeId,
    ) {
        batch.ops.push(BatchOp::Put {
            table: Table::Edges,
            key: encode_edge_key(parent_id, child_name),
            value: child_id.to_be_bytes().to_vec(),
        });
    }

    pub fn batch_delete_edge(&self, batch: &mut StoreBatch, parent_id: InodeId, child_name: &str) {
        batch.ops.push(BatchOp::Delete {
            table: Table::Edges,
            key: encode_edge_key(parent_id, child_name),
        });
    }

    pub fn batch_put_next_id(&self, batch: &mut StoreBatch, next_id: InodeId) {
        batch.ops.push(BatchOp::Put {
            table: Table::Inodes,
            key: encode_inode_key(NEXT_ID_KEY).to_vec(),
            value: next_id.to_be_bytes().to_vec(),
        });
    }

    /// Apply a batch atomically. A record put that introduced a new
    /// owner/group id carries the dictionary with it in the same
    /// transaction; the dirty flag is only cleared once the commit lands.
    pub fn commit(&self, batch: StoreBatch) -> AcResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut ops = batch.ops;
        let dict_dirty = inner.dict.is_dirty();
        if dict_dirty {
            ops.push(BatchOp::Put {
                table: Table::Inodes,
                key: encode_inode_key(OWNER_DICT_KEY).to_vec(),
                value: inner.dict.serialize_owners(),
            });
            ops.push(BatchOp::Put {
                table: Table::Inodes,
                key: encode_inode_key(GROUP_DICT_KEY).to_vec(),
                value: inner.dict.serialize_groups(),
            });
        }

        let tx = inner.conn.transaction().map_err(|e| db_err("begin", e))?;
        for op in &ops {
            match op {
                BatchOp::Put { table, key, value } => {
                    tx.execute(
                        &format!(
                            "INSERT INTO {} (key, value) VALUES (?1, ?2)
                             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                            table.name()
                        ),
                        params![key, value],
                    )
                    .map_err(|e| db_err("put", e))?;
                }
                BatchOp::Delete { table, key } => {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE key = ?1", table.name()),
                        params![key],
                    )
                    .map_err(|e| db_err("delete", e))?;
                }
            }
        }
        tx.commit().map_err(|e| db_err("commit", e))?;

        if dict_dirty {
            inner.dict.clear_dirty();
        }
        Ok(())
    }

    // ─── Recovery scans ─────────────────────────────────────────

    /// Stream every directory record in key order. Sentinels and file
    /// records are skipped without deserializing.
    pub fn for_each_directory_inode(&self, mut f: impl FnMut(Inode)) -> AcResult<()> {
        let inner = self.inner.lock().unwrap();
        let mut stmt = inner
            .conn
            .prepare("SELECT key, value FROM inodes ORDER BY key")
            .map_err(|e| db_err("prepare dir scan", e))?;
        let mut rows = stmt.query([]).map_err(|e| db_err("dir scan", e))?;
        while let Some(row) = rows.next().map_err(|e| db_err("dir scan", e))? {
            let key: Vec<u8> = row.get(0).map_err(|e| db_err("dir scan key", e))?;
            if key.len() != 8 {
                continue;
            }
            let id = be64(&key);
            if id >= OWNER_DICT_KEY {
                continue; // sentinel
            }
            let value: Vec<u8> = row.get(1).map_err(|e| db_err("dir scan value", e))?;
            if value.len() >= RECORD_HEADER_LEN && value[FLAGS_OFFSET] & FLAG_DIRECTORY != 0 {
                f(decode_record(id, &value, &inner.dict));
            }
        }
        Ok(())
    }

    /// Stream every edge as (parent id, child name, child id), key order.
    pub fn for_each_edge(&self, mut f: impl FnMut(InodeId, String, InodeId)) -> AcResult<()> {
        let inner = self.inner.lock().unwrap();
        let mut stmt = inner
            .conn
            .prepare("SELECT key, value FROM edges ORDER BY key")
            .map_err(|e| db_err("prepare edge scan", e))?;
        let mut rows = stmt.query([]).map_err(|e| db_err("edge scan", e))?;
        while let Some(row) = rows.next().map_err(|e| db_err("edge scan", e))? {
            let key: Vec<u8> = row.get(0).map_err(|e| db_err("edge scan key", e))?;
            let value: Vec<u8> = row.get(1).map_err(|e| db_err("edge scan value", e))?;
            if key.len() < 8 || value.len() < 8 {
                continue;
            }
            let parent = be64(&key[..8]);
            let name = String::from_utf8_lossy(&key[8..]).into_owned();
            f(parent, name, be64(&value));
        }
        Ok(())
    }

    /// Prefix scan of one parent's edges: the key range
    /// `[parent, parent + 1)` in big-endian order.
    pub fn scan_children(&self, parent_id: InodeId) -> AcResult<Vec<(String, InodeId)>> {
        let inner = self.inner.lock().unwrap();
        let low = encode_inode_key(parent_id).to_vec();
        let high = encode_inode_key(parent_id + 1).to_vec();
        let mut stmt = inner
            .conn
            .prepare("SELECT key, value FROM edges WHERE key >= ?1 AND key < ?2 ORDER BY key")
            .map_err(|e| db_err("prepare child scan", e))?;
        let mut rows = stmt
            .query(params![low, high])
            .map_err(|e| db_err("child scan", e))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| db_err("child scan", e))? {
            let key: Vec<u8> = row.get(0).map_err(|e| db_err("child scan key", e))?;
            let value: Vec<u8> = row.get(1).map_err(|e| db_err("child scan value", e))?;
            if key.len() < 8 || value.len() < 8 {
                continue;
            }
            out.push((
                String::from_utf8_lossy(&key[8..]).into_owned(),
                be64(&value),
            ));
        }
        Ok(out)
    }
}
