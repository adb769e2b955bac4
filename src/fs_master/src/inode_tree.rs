//! The file system namespace.
//!
//! Two operating modes share one implementation:
//!
//!   1. Memory-only (no store): every inode lives in the directory map.
//!      Used by tests and by embedders that do not need persistence.
//!   2. Two-tier (with store): only directories and their children maps are
//!      held in memory; file inodes are fetched from the store on demand.
//!
//! Every mutation follows persist-then-memorize: build a batch, commit it,
//! and only then touch the in-memory maps. A failed commit therefore never
//! leaves memory ahead of disk. One reader-writer lock covers both the
//! directory map and the id allocator.

use crate::inode::Inode;
use crate::inode_store::{InodeStore, StoreBatch};
use anycache_lib::{now_ms, AcError, AcResult, InodeId, INVALID_INODE_ID, ROOT_INODE_ID};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Persist the allocator cursor every this many ids; a restart discards at
/// most this many unused ids and never reuses one.
const ID_ALLOC_BATCH: u64 = 1000;

struct TreeState {
    dirs: HashMap<InodeId, Inode>,
    next_id: InodeId,
    alloc_end: InodeId,
}

pub struct InodeTree {
    state: RwLock<TreeState>,
    store: Option<Arc<InodeStore>>,
}

fn new_root() -> Inode {
    let now = now_ms();
    Inode {
        id: ROOT_INODE_ID,
        parent_id: INVALID_INODE_ID,
        name: String::new(),
        is_directory: true,
        mode: 0o755,
        creation_time_ms: now,
        modification_time_ms: now,
        ..Inode::default()
    }
}

impl InodeTree {
    /// Memory-only tree with a fresh root.
    pub fn new_in_memory() -> Self {
        let mut dirs = HashMap::new();
        dirs.insert(ROOT_INODE_ID, new_root());
        Self {
            state: RwLock::new(TreeState {
                dirs,
                next_id: ROOT_INODE_ID + 1,
                alloc_end: ROOT_INODE_ID + 1,
            }),
            store: None,
        }
    }

    /// Two-tier tree; call `recover()` before serving requests.
    pub fn with_store(store: Arc<InodeStore>) -> Self {
        let mut tree = Self::new_in_memory();
        tree.store = Some(store);
        tree
    }

    pub fn root_id(&self) -> InodeId {
        ROOT_INODE_ID
    }

    pub fn dir_count(&self) -> usize {
        self.state.read().unwrap().dirs.len()
    }

    /// Rebuild the in-memory directory map from the store: load directory
    /// records, relink every edge into its parent's children map, restore
    /// the id allocator, and synthesize the root on first-time start.
    pub fn recover(&self) -> AcResult<()> {
        let store = match &self.store {
            Some(s) => Arc::clone(s),
            None => return Ok(()),
        };

        let mut st = self.state.write().unwrap();
        st.dirs.clear();

        store.for_each_directory_inode(|inode| {
            st.dirs.insert(inode.id, inode);
        })?;

        store.for_each_edge(|parent_id, name, child_id| {
            if let Some(parent) = st.dirs.get_mut(&parent_id) {
                parent.children.insert(name, child_id);
            }
        })?;

        match store.get_next_id() {
            Ok(next) if next > 0 => {
                st.next_id = next;
                st.alloc_end = next;
            }
            _ => {
                let max_id = st.dirs.keys().copied().max().unwrap_or(ROOT_INODE_ID);
                st.next_id = max_id + 1;
                st.alloc_end = max_id + 1;
            }
        }

        if !st.dirs.contains_key(&ROOT_INODE_ID) {
            let root = new_root();
            let mut batch = StoreBatch::new();
            store.batch_put_inode(&mut batch, ROOT_INODE_ID, &root);
            store.commit(batch)?;
            st.dirs.insert(ROOT_INODE_ID, root);
        }

        info!("inode tree recovered: {} directories", st.dirs.len());
        Ok(())
    }

    // ─── Path helpers ───────────────────────────────────────────

    fn split_path(path: &str) -> Vec<&str> {
        path.split('/').filter(|p| !p.is_empty()).collect()
    }

    /// Walk `parts` from the root; every component, the terminal included,
    /// must be a directory. Returns the final directory id (the root for
    /// an empty slice).
    fn resolve_dir_locked(&self, st: &TreeState, parts: &[&str]) -> AcResult<InodeId> {
        let mut current = ROOT_INODE_ID;
        for part in parts {
            let node = match st.dirs.get(&current) {
                Some(n) => n,
                None => return Err(self.classify_non_dir(current)),
            };
            if !node.is_directory {
                return Err(AcError::InvalidArgument(format!("not a directory: {}", part)));
            }
            current = *node
                .children
                .get(*part)
                .ok_or_else(|| AcError::NotFound(format!("path component not found: {}", part)))?;
        }
        match st.dirs.get(&current) {
            Some(node) if node.is_directory => Ok(current),
            Some(_) => Err(AcError::InvalidArgument("not a directory".to_string())),
            None => Err(self.classify_non_dir(current)),
        }
    }

    /// Resolve a full path; the terminal may be a file or a directory.
    fn resolve_locked(&self, st: &TreeState, path: &str) -> AcResult<InodeId> {
        let parts = Self::split_path(path);
        if parts.is_empty() {
            return Ok(ROOT_INODE_ID);
        }
        let parent = self.resolve_dir_locked(st, &parts[..parts.len() - 1])?;
        st.dirs[&parent]
            .children
            .get(*parts.last().unwrap())
            .copied()
            .ok_or_else(|| AcError::NotFound(format!("path not found: {}", path)))
    }

    /// An id reached through a children map but absent from the directory
    /// map is a file when the store confirms it, otherwise it dangles.
    fn classify_non_dir(&self, id: InodeId) -> AcError {
        if let Some(store) = &self.store {
            if store.get_inode(id).is_ok() {
                return AcError::InvalidArgument("not a directory".to_string());
            }
        }
        AcError::NotFound("inode missing".to_string())
    }

    fn allocate_id(&self, st: &mut TreeState) -> InodeId {
        let id = st.next_id;
        st.next_id += 1;
        if let Some(store) = &self.store {
            if id >= st.alloc_end {
                st.alloc_end = id + ID_ALLOC_BATCH;
                let mut batch = StoreBatch::new();
                store.batch_put_next_id(&mut batch, st.alloc_end);
                if let Err(err) = store.commit(batch) {
                    warn!("persisting id cursor failed: {}", err);
                }
            }
        }
        id
    }

    // ─── Reads ──────────────────────────────────────────────────

    pub fn get_by_path(&self, path: &str) -> AcResult<Inode> {
        let st = self.state.read().unwrap();
        let id = self.resolve_locked(&st, path)?;
        if let Some(inode) = st.dirs.get(&id) {
            return Ok(inode.clone());
        }
        match &self.store {
            Some(store) => store.get_inode(id),
            None => Err(AcError::NotFound("inode missing".to_string())),
        }
    }

    pub fn get_by_id(&self, id: InodeId) -> AcResult<Inode> {
        let st = self.state.read().unwrap();
        if let Some(inode) = st.dirs.get(&id) {
            return Ok(inode.clone());
        }
        match &self.store {
            Some(store) => store.get_inode(id),
            None => Err(AcError::NotFound("inode not found".to_string())),
        }
    }

    /// All direct children of a directory, unordered. Directories come from
    /// memory, files are batch-fetched from the store.
    pub fn list(&self, path: &str) -> AcResult<Vec<Inode>> {
        let st = self.state.read().unwrap();
        let id = self.resolve_locked(&st, path)?;
        let dir = match st.dirs.get(&id) {
            Some(d) => d,
            None => return Err(self.classify_non_dir(id)),
        };
        if !dir.is_directory {
            return Err(AcError::InvalidArgument("not a directory".to_string()));
        }

        let mut out = Vec::with_capacity(dir.children.len());
        let mut file_ids = Vec::new();
        for child_id in dir.children.values() {
            if let Some(child) = st.dirs.get(child_id) {
                out.push(child.clone());
            } else {
                file_ids.push(*child_id);
            }
        }
        if !file_ids.is_empty() {
            let store = self
                .store
                .as_ref()
                .ok_or_else(|| AcError::Internal("dangling child without store".to_string()))?;
            out.extend(store.multi_get_inodes(&file_ids)?);
        }
        Ok(out)
    }

    // ─── Writes ─────────────────────────────────────────────────

    pub fn create_file(&self, path: &str, mode: u32) -> AcResult<InodeId> {
        let parts = Self::split_path(path);
        if parts.is_empty() {
            return Err(AcError::InvalidArgument("empty path".to_string()));
        }

        let mut st = self.state.write().unwrap();
        let parent_id = self.resolve_dir_locked(&st, &parts[..parts.len() - 1])?;
        let name = *parts.last().unwrap();

        let parent = st
            .dirs
            .get(&parent_id)
            .ok_or_else(|| AcError::NotFound("parent missing".to_string()))?;
        if parent.children.contains_key(name) {
            return Err(AcError::AlreadyExists(format!("file already exists: {}", path)));
        }

        let id = self.allocate_id(&mut st);
        let now = now_ms();
        let inode = Inode {
            id,
            parent_id,
            name: name.to_string(),
            is_directory: false,
            mode,
            creation_time_ms: now,
            modification_time_ms: now,
            is_complete: false,
            ..Inode::default()
        };

        if let Some(store) = &self.store {
            let mut batch = StoreBatch::new();
            store.batch_put_inode(&mut batch, id, &inode);
            store.batch_put_edge(&mut batch, parent_id, name, id);
            store.commit(batch)?;
            // file inodes do not enter the directory map
            st.dirs
                .get_mut(&parent_id)
                .unwrap()
                .children
                .insert(name.to_string(), id);
        } else {
            st.dirs
                .get_mut(&parent_id)
                .unwrap()
                .children
                .insert(name.to_string(), id);
            st.dirs.insert(id, inode);
        }
        Ok(id)
    }

    /// Create a directory. With `recursive` every missing ancestor is
    /// created, each in its own batch. An existing terminal directory is
    /// `AlreadyExists`; the coordinator maps that to OK for mkdir.
    pub fn create_directory(&self, path: &str, mode: u32, recursive: bool) -> AcResult<InodeId> {
        let parts = Self::split_path(path);
        if parts.is_empty() {
            return Ok(ROOT_INODE_ID);
        }

        let mut st = self.state.write().unwrap();
        let mut current = ROOT_INODE_ID;
        for (i, part) in parts.iter().enumerate() {
            let node = match st.dirs.get(&current) {
                Some(n) => n,
                None => return Err(self.classify_non_dir(current)),
            };
            if !node.is_directory {
                return Err(AcError::InvalidArgument(format!("not a directory: {}", part)));
            }
            if let Some(&child) = node.children.get(*part) {
                current = child;
                if i + 1 == parts.len() {
                    return Err(AcError::AlreadyExists(format!("directory exists: {}", path)));
                }
                continue;
            }
            if !recursive && i + 1 < parts.len() {
                return Err(AcError::NotFound(format!("parent not found: {}", part)));
            }

            let id = self.allocate_id(&mut st);
            let now = now_ms();
            let dir = Inode {
                id,
                parent_id: current,
                name: part.to_string(),
                is_directory: true,
                mode,
                creation_time_ms: now,
                modification_time_ms: now,
                ..Inode::default()
            };

            if let Some(store) = &self.store {
                let mut batch = StoreBatch::new();
                store.batch_put_inode(&mut batch, id, &dir);
                store.batch_put_edge(&mut batch, current, part, id);
                store.commit(batch)?;
            }

            st.dirs
                .get_mut(&current)
                .unwrap()
                .children
                .insert(part.to_string(), id);
            st.dirs.insert(id, dir);
            current = id;
        }
        Ok(current)
    }

    /// Finalize a file: set its size, flip the completeness flag.
    pub fn complete_file(&self, id: InodeId, size: u64) -> AcResult<()> {
        let mut st = self.state.write().unwrap();

        if let Some(store) = &self.store {
            let mut inode = match store.get_inode(id) {
                Ok(inode) => inode,
                Err(err) if err.is_not_found() => {
                    if st.dirs.contains_key(&id) {
                        return Err(AcError::InvalidArgument(
                            "cannot complete a directory".to_string(),
                        ));
                    }
                    return Err(AcError::NotFound("file not found".to_string()));
                }
                Err(err) => return Err(err),
            };
            if inode.is_directory {
                return Err(AcError::InvalidArgument("cannot complete a directory".to_string()));
            }
            inode.size = size;
            inode.is_complete = true;
            inode.modification_time_ms = now_ms();

            let mut batch = StoreBatch::new();
            store.batch_put_inode(&mut batch, id, &inode);
            return store.commit(batch);
        }

        let inode = st
            .dirs
            .get_mut(&id)
            .ok_or_else(|| AcError::NotFound("file not found".to_string()))?;
        if inode.is_directory {
            return Err(AcError::InvalidArgument("cannot complete a directory".to_string()));
        }
        inode.size = size;
        inode.is_complete = true;
        inode.modification_time_ms = now_ms();
        Ok(())
    }

    pub fn update_size(&self, id: InodeId, new_size: u64) -> AcResult<()> {
        let mut st = self.state.write().unwrap();

        if let Some(store) = &self.store {
            if let Some(dir) = st.dirs.get(&id) {
                // unusual, but size updates on directories persist too
                let mut updated = dir.clone();
                updated.size = new_size;
                updated.modification_time_ms = now_ms();
                let mut batch = StoreBatch::new();
                store.batch_put_inode(&mut batch, id, &updated);
                store.commit(batch)?;
                st.dirs.insert(id, updated);
                return Ok(());
            }
            let mut inode = store.get_inode(id)?;
            inode.size = new_size;
            inode.modification_time_ms = now_ms();
            let mut batch = StoreBatch::new();
            store.batch_put_inode(&mut batch, id, &inode);
            return store.commit(batch);
        }

        let inode = st
            .dirs
            .get_mut(&id)
            .ok_or_else(|| AcError::NotFound("inode not found".to_string()))?;
        inode.size = new_size;
        inode.modification_time_ms = now_ms();
        Ok(())
    }

    pub fn delete(&self, path: &str, recursive: bool) -> AcResult<()> {
        let parts = Self::split_path(path);
        if parts.is_empty() {
            return Err(AcError::InvalidArgument("cannot delete root".to_string()));
        }

        let mut st = self.state.write().unwrap();
        let id = self.resolve_locked(&st, path)?;
        let target_name = parts.last().unwrap().to_string();

        let is_dir = st.dirs.contains_key(&id);
        let parent_id = if is_dir {
            let inode = &st.dirs[&id];
            if !inode.children.is_empty() && !recursive {
                return Err(AcError::InvalidArgument("directory not empty".to_string()));
            }
            inode.parent_id
        } else {
            // a file known only to the store; its parent is on the path
            self.resolve_dir_locked(&st, &parts[..parts.len() - 1])?
        };

        if let Some(store) = &self.store {
            let mut batch = StoreBatch::new();
            store.batch_delete_inode(&mut batch, id);
            store.batch_delete_edge(&mut batch, parent_id, &target_name);

            if is_dir && recursive {
                let mut edges = Vec::new();
                let mut inode_ids = Vec::new();
                Self::collect_subtree(&st, id, &mut edges, &mut inode_ids);
                for (pid, name) in &edges {
                    store.batch_delete_edge(&mut batch, *pid, name);
                }
                for iid in &inode_ids {
                    store.batch_delete_inode(&mut batch, *iid);
                }
            }

            store.commit(batch)?;

            if let Some(parent) = st.dirs.get_mut(&parent_id) {
                parent.children.remove(&target_name);
            }
            if is_dir {
                if recursive {
                    Self::remove_dir_subtree(&mut st, id);
                }
                st.dirs.remove(&id);
            }
        } else {
            let parent_id = st.dirs[&id].parent_id;
            let name = st.dirs[&id].name.clone();
            if let Some(parent) = st.dirs.get_mut(&parent_id) {
                parent.children.remove(&name);
            }
            let mut stack = vec![id];
            while let Some(rid) = stack.pop() {
                if let Some(inode) = st.dirs.remove(&rid) {
                    stack.extend(inode.children.values().copied());
                }
            }
        }
        Ok(())
    }

    pub fn rename(&self, src: &str, dst: &str) -> AcResult<()> {
        let src_parts = Self::split_path(src);
        let dst_parts = Self::split_path(dst);
        if src_parts.is_empty() || dst_parts.is_empty() {
            return Err(AcError::InvalidArgument("invalid path".to_string()));
        }

        let mut st = self.state.write().unwrap();
        let src_id = self.resolve_locked(&st, src)?;
        let dst_parent_id = self.resolve_dir_locked(&st, &dst_parts[..dst_parts.len() - 1])?;
        let new_name = dst_parts.last().unwrap().to_string();

        let dst_parent = st
            .dirs
            .get(&dst_parent_id)
            .ok_or_else(|| AcError::NotFound("destination parent missing".to_string()))?;
        if !dst_parent.is_directory {
            return Err(AcError::InvalidArgument(
                "destination parent is not a directory".to_string(),
            ));
        }
        if dst_parent.children.contains_key(&new_name) {
            return Err(AcError::AlreadyExists("destination exists".to_string()));
        }

        if let Some(store) = &self.store {
            let is_dir = st.dirs.contains_key(&src_id);
            let (old_parent_id, old_name, mut inode) = if is_dir {
                let d = &st.dirs[&src_id];
                (d.parent_id, d.name.clone(), d.clone())
            } else {
                let pid = self.resolve_dir_locked(&st, &src_parts[..src_parts.len() - 1])?;
                (
                    pid,
                    src_parts.last().unwrap().to_string(),
                    store.get_inode(src_id)?,
                )
            };
            inode.parent_id = dst_parent_id;
            inode.name = new_name.clone();

            let mut batch = StoreBatch::new();
            store.batch_put_inode(&mut batch, src_id, &inode);
            store.batch_delete_edge(&mut batch, old_parent_id, &old_name);
            store.batch_put_edge(&mut batch, dst_parent_id, &new_name, src_id);
            store.commit(batch)?;

            st.dirs
                .get_mut(&old_parent_id)
                .unwrap()
                .children
                .remove(&old_name);
            st.dirs
                .get_mut(&dst_parent_id)
                .unwrap()
                .children
                .insert(new_name.clone(), src_id);
            if is_dir {
                let d = st.dirs.get_mut(&src_id).unwrap();
                d.name = new_name;
                d.parent_id = dst_parent_id;
            }
        } else {
            let old_parent_id = st.dirs[&src_id].parent_id;
            let old_name = st.dirs[&src_id].name.clone();
            st.dirs
                .get_mut(&old_parent_id)
                .unwrap()
                .children
                .remove(&old_name);
            {
                let node = st.dirs.get_mut(&src_id).unwrap();
                node.name = new_name.clone();
                node.parent_id = dst_parent_id;
            }
            st.dirs
                .get_mut(&dst_parent_id)
                .unwrap()
                .children
                .insert(new_name, src_id);
        }
        Ok(())
    }

    // ─── Subtree helpers ────────────────────────────────────────

    /// Depth-first collection of every edge and inode under `dir_id`. File
    /// children are reached through their parent's children map; no store
    /// scan happens here.
    fn collect_subtree(
        st: &TreeState,
        dir_id: InodeId,
        edges: &mut Vec<(InodeId, String)>,
        inode_ids: &mut Vec<InodeId>,
    ) {
        let dir = match st.dirs.get(&dir_id) {
            Some(d) => d,
            None => return,
        };
        for (name, child_id) in &dir.children {
            edges.push((dir_id, name.clone()));
            inode_ids.push(*child_id);
            if st.dirs.contains_key(child_id) {
                Self::collect_subtree(st, *child_id, edges, inode_ids);
            }
        }
    }

    /// Drop every directory strictly below `id` from the map; the caller
    /// removes `id` itself.
    fn remove_dir_subtree(st: &mut TreeState, id: InodeId) {
        let children: Vec<InodeId> = match st.dirs.get(&id) {
            Some(d) => d.children.values().copied().collect(),
            None => return,
        };
        for child in children {
            Self::remove_dir_subtree(st, child);
            st.dirs.remove(&child);
        }
    }
}
