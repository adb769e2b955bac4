//! A single storage tier.
//!
//! The memory tier keeps each block as a heap buffer; disk tiers keep one
//! file per block under the tier root, pre-sized at allocation so the
//! capacity accounting matches what the file system will actually hold.
//! One mutex serializes all operations on a tier; byte-range writes to a
//! block are therefore ordered, and reads see completed writes.

use anycache_lib::{AcError, AcResult, BlockId, TierKind};
use log::info;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::Mutex;

enum BlockSlot {
    Memory(Vec<u8>),
    Disk { path: PathBuf, capacity: u64 },
}

impl BlockSlot {
    fn capacity(&self) -> u64 {
        match self {
            BlockSlot::Memory(buf) => buf.len() as u64,
            BlockSlot::Disk { capacity, .. } => *capacity,
        }
    }
}

struct TierState {
    blocks: HashMap<BlockId, BlockSlot>,
    used_bytes: u64,
}

pub struct StorageTier {
    kind: TierKind,
    capacity: u64,
    root: Option<PathBuf>,
    state: Mutex<TierState>,
}

impl StorageTier {
    /// Create a tier. Disk tiers get their root directory created and any
    /// block files already present registered, so metadata recovery can
    /// confirm what survived the restart. The memory tier ignores `root`.
    pub fn new(kind: TierKind, root: Option<PathBuf>, capacity: u64) -> AcResult<Self> {
        let mut blocks = HashMap::new();
        let mut used_bytes = 0u64;
        let root = match kind {
            TierKind::Memory => None,
            _ => {
                let dir = root.ok_or_else(|| {
                    AcError::InvalidArgument(format!("{} tier requires a path", kind))
                })?;
                std::fs::create_dir_all(&dir)
                    .map_err(|e| AcError::IoError(format!("create {}: {}", dir.display(), e)))?;
                for entry in std::fs::read_dir(&dir)
                    .map_err(|e| AcError::IoError(format!("scan {}: {}", dir.display(), e)))?
                {
                    let entry =
                        entry.map_err(|e| AcError::IoError(format!("scan {}: {}", dir.display(), e)))?;
                    let name = entry.file_name();
                    let id: BlockId = match name
                        .to_str()
                        .and_then(|n| n.strip_prefix("block_"))
                        .and_then(|n| n.parse().ok())
                    {
                        Some(id) => id,
                        None => continue,
                    };
                    let len = entry
                        .metadata()
                        .map_err(|e| AcError::IoError(format!("stat {:?}: {}", name, e)))?
                        .len();
                    blocks.insert(
                        id,
                        BlockSlot::Disk {
                            path: entry.path(),
                            capacity: len,
                        },
                    );
                    used_bytes += len;
                }
                Some(dir)
            }
        };
        info!(
            "storage tier created: kind={}, capacity={}MB, preexisting_blocks={}",
            kind,
            capacity / (1024 * 1024),
            blocks.len()
        );
        Ok(Self {
            kind,
            capacity,
            root,
            state: Mutex::new(TierState { blocks, used_bytes }),
        })
    }

    pub fn kind(&self) -> TierKind {
        self.kind
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used_bytes(&self) -> u64 {
        self.state.lock().unwrap().used_bytes
    }

    pub fn available_bytes(&self) -> u64 {
        self.capacity.saturating_sub(self.used_bytes())
    }

    pub fn has_block(&self, id: BlockId) -> bool {
        self.state.lock().unwrap().blocks.contains_key(&id)
    }

    pub fn block_count(&self) -> usize {
        self.state.lock().unwrap().blocks.len()
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.state.lock().unwrap().blocks.keys().copied().collect()
    }

    fn block_file_path(&self, id: BlockId) -> PathBuf {
        self.root.as_ref().unwrap().join(format!("block_{}", id))
    }

    /// Reserve `size` bytes for a new block.
    pub fn allocate(&self, id: BlockId, size: u64) -> AcResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.blocks.contains_key(&id) {
            return Err(AcError::AlreadyExists(format!(
                "block {} already allocated in {}",
                id, self.kind
            )));
        }
        if st.used_bytes + size > self.capacity {
            return Err(AcError::ResourceExhausted(format!(
                "{} tier capacity exceeded",
                self.kind
            )));
        }

        let slot = match self.kind {
            TierKind::Memory => BlockSlot::Memory(vec![0u8; size as usize]),
            _ => {
                let path = self.block_file_path(id);
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(|e| AcError::IoError(format!("create {}: {}", path.display(), e)))?;
                if let Err(err) = file.set_len(size) {
                    drop(file);
                    let _ = std::fs::remove_file(&path);
                    return Err(AcError::IoError(format!(
                        "presize {}: {}",
                        path.display(),
                        err
                    )));
                }
                BlockSlot::Disk {
                    path,
                    capacity: size,
                }
            }
        };

        st.blocks.insert(id, slot);
        st.used_bytes += size;
        Ok(())
    }

    /// Copy out up to `buf.len()` bytes at `offset`; returns bytes read.
    /// Reads past the end of the block are clamped.
    pub fn read(&self, id: BlockId, offset: u64, buf: &mut [u8]) -> AcResult<usize> {
        let st = self.state.lock().unwrap();
        let slot = st
            .blocks
            .get(&id)
            .ok_or_else(|| AcError::NotFound(format!("block {} not in {}", id, self.kind)))?;
        match slot {
            BlockSlot::Memory(data) => {
                if offset >= data.len() as u64 {
                    return Ok(0);
                }
                let start = offset as usize;
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                Ok(n)
            }
            BlockSlot::Disk { path, .. } => {
                let file = OpenOptions::new()
                    .read(true)
                    .open(path)
                    .map_err(|e| AcError::IoError(format!("open {}: {}", path.display(), e)))?;
                file.read_at(buf, offset)
                    .map_err(|e| AcError::IoError(format!("read {}: {}", path.display(), e)))
            }
        }
    }

    /// Write `data` at `offset`. Writing past the allocated capacity is
    /// rejected; allocation fixed the block's size.
    pub fn write(&self, id: BlockId, offset: u64, data: &[u8]) -> AcResult<()> {
        let mut st = self.state.lock().unwrap();
        let slot = st
            .blocks
            .get_mut(&id)
            .ok_or_else(|| AcError::NotFound(format!("block {} not in {}", id, self.kind)))?;
        if offset + data.len() as u64 > slot.capacity() {
            return Err(AcError::InvalidArgument(format!(
                "write exceeds block capacity: {} + {} > {}",
                offset,
                data.len(),
                slot.capacity()
            )));
        }
        match slot {
            BlockSlot::Memory(buf) => {
                let start = offset as usize;
                buf[start..start + data.len()].copy_from_slice(data);
                Ok(())
            }
            BlockSlot::Disk { path, .. } => {
                let file = OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .map_err(|e| AcError::IoError(format!("open {}: {}", path.display(), e)))?;
                file.write_all_at(data, offset)
                    .map_err(|e| AcError::IoError(format!("write {}: {}", path.display(), e)))
            }
        }
    }

    /// Remove a block, freeing its reservation.
    pub fn remove(&self, id: BlockId) -> AcResult<()> {
        let mut st = self.state.lock().unwrap();
        let slot = st
            .blocks
            .remove(&id)
            .ok_or_else(|| AcError::NotFound(format!("block {} not in {}", id, self.kind)))?;
        st.used_bytes -= slot.capacity();
        if let BlockSlot::Disk { path, .. } = slot {
            if let Err(err) = std::fs::remove_file(&path) {
                return Err(AcError::IoError(format!(
                    "unlink {}: {}",
                    path.display(),
                    err
                )));
            }
        }
        Ok(())
    }

    /// Move a block's bytes out for promotion.
    pub fn export(&self, id: BlockId) -> AcResult<Vec<u8>> {
        let st = self.state.lock().unwrap();
        let slot = st
            .blocks
            .get(&id)
            .ok_or_else(|| AcError::NotFound(format!("block {} not in {}", id, self.kind)))?;
        match slot {
            BlockSlot::Memory(data) => Ok(data.clone()),
            BlockSlot::Disk { path, capacity } => {
                let file = OpenOptions::new()
                    .read(true)
                    .open(path)
                    .map_err(|e| AcError::IoError(format!("open {}: {}", path.display(), e)))?;
                let mut data = vec![0u8; *capacity as usize];
                let n = file
                    .read_at(&mut data, 0)
                    .map_err(|e| AcError::IoError(format!("read {}: {}", path.display(), e)))?;
                data.truncate(n);
                Ok(data)
            }
        }
    }

    /// Allocate and fill a block from exported bytes.
    pub fn import(&self, id: BlockId, data: &[u8]) -> AcResult<()> {
        self.allocate(id, data.len() as u64)?;
        self.write(id, 0, data)
    }
}
