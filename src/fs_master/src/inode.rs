//! Inode records and their persisted encoding.
//!
//! On disk an inode is a fixed 48-byte header followed by the raw name
//! bytes. The id is not stored in the value (it is the key), and a
//! directory's children map is not stored at all: it is rebuilt from the
//! edge table on recovery. Owner and group strings are dictionary-encoded
//! to one byte each since the distinct set is tiny.

use anycache_lib::{InodeId, DEFAULT_BLOCK_SIZE, INVALID_INODE_ID};
use log::error;
use std::collections::HashMap;

/// Record header length; the name follows as raw bytes.
pub const RECORD_HEADER_LEN: usize = 48;

/// Offset of the flags byte within the header (after five u64 fields and
/// the u32 mode).
pub const FLAGS_OFFSET: usize = 44;

pub const FLAG_DIRECTORY: u8 = 0x01;
pub const FLAG_COMPLETE: u8 = 0x02;

// Sentinel keys in the inodes table, sorted after every valid id.
pub const OWNER_DICT_KEY: u64 = 0xFFFF_FFFF_FFFF_FFFD;
pub const GROUP_DICT_KEY: u64 = 0xFFFF_FFFF_FFFF_FFFE;
pub const NEXT_ID_KEY: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// In-memory inode for one file or directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Inode {
    pub id: InodeId,
    pub parent_id: InodeId,
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub mode: u32,
    pub owner: String,
    pub group: String,
    /// Per-file block size; fixed at creation.
    pub block_size: u64,
    pub creation_time_ms: i64,
    pub modification_time_ms: i64,
    /// Directory only: child name to child id. Files never populate this.
    pub children: HashMap<String, InodeId>,
    /// False while a file is still being written.
    pub is_complete: bool,
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            id: INVALID_INODE_ID,
            parent_id: INVALID_INODE_ID,
            name: String::new(),
            is_directory: false,
            size: 0,
            mode: 0o644,
            owner: String::new(),
            group: String::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            creation_time_ms: 0,
            modification_time_ms: 0,
            children: HashMap::new(),
            is_complete: true,
        }
    }
}

/// Maps owner/group strings to one-byte ids. Id 0 is the empty string;
/// insertion order assigns 1..=255, overflow collapses to 0 (empty).
#[derive(Debug, Default)]
pub struct OwnerGroupDict {
    owners: Vec<String>,
    groups: Vec<String>,
    owner_ids: HashMap<String, u8>,
    group_ids: HashMap<String, u8>,
    dirty: bool,
}

impl OwnerGroupDict {
    pub fn get_or_add_owner(&mut self, owner: &str) -> u8 {
        Self::get_or_add(owner, &mut self.owners, &mut self.owner_ids, &mut self.dirty)
    }

    pub fn get_or_add_group(&mut self, group: &str) -> u8 {
        Self::get_or_add(group, &mut self.groups, &mut self.group_ids, &mut self.dirty)
    }

    pub fn owner(&self, id: u8) -> &str {
        Self::lookup(id, &self.owners)
    }

    pub fn group(&self, id: u8) -> &str {
        Self::lookup(id, &self.groups)
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn serialize_owners(&self) -> Vec<u8> {
        Self::serialize_list(&self.owners)
    }

    pub fn serialize_groups(&self) -> Vec<u8> {
        Self::serialize_list(&self.groups)
    }

    pub fn load_owners(&mut self, data: &[u8]) {
        self.owners = Self::deserialize_list(data);
        self.owner_ids = Self::rebuild_map(&self.owners);
    }

    pub fn load_groups(&mut self, data: &[u8]) {
        self.groups = Self::deserialize_list(data);
        self.group_ids = Self::rebuild_map(&self.groups);
    }

    fn get_or_add(
        s: &str,
        list: &mut Vec<String>,
        map: &mut HashMap<String, u8>,
        dirty: &mut bool,
    ) -> u8 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&id) = map.get(s) {
            return id;
        }
        if list.len() >= 255 {
            return 0;
        }
        list.push(s.to_string());
        let id = list.len() as u8;
        map.insert(s.to_string(), id);
        *dirty = true;
        id
    }

    fn lookup(id: u8, list: &[String]) -> &str {
        if id == 0 || id as usize > list.len() {
            ""
        } else {
            &list[id as usize - 1]
        }
    }

    /// Format: `[count:1][len:1|bytes]*`, list index == id - 1.
    fn serialize_list(list: &[String]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + list.len() * 8);
        buf.push(list.len().min(255) as u8);
        for s in list {
            let len = s.len().min(255);
            buf.push(len as u8);
            buf.extend_from_slice(&s.as_bytes()[..len]);
        }
        buf
    }

    fn deserialize_list(data: &[u8]) -> Vec<String> {
        let mut list = Vec::new();
        if data.is_empty() {
            return list;
        }
        let count = data[0] as usize;
        let mut pos = 1;
        for _ in 0..count {
            if pos >= data.len() {
                break;
            }
            let len = data[pos] as usize;
            pos += 1;
            let end = (pos + len).min(data.len());
            list.push(String::from_utf8_lossy(&data[pos..end]).into_owned());
            pos = end;
        }
        list
    }

    fn rebuild_map(list: &[String]) -> HashMap<String, u8> {
        list.iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), (i + 1) as u8))
            .collect()
    }
}

// ─── Record encoding ────────────────────────────────────────────

/// Serialize an inode to the persisted value: 48-byte header + name.
pub fn encode_record(inode: &Inode, dict: &mut OwnerGroupDict) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + inode.name.len());
    buf.extend_from_slice(&inode.parent_id.to_be_bytes());
    buf.extend_from_slice(&inode.size.to_be_bytes());
    buf.extend_from_slice(&inode.block_size.to_be_bytes());
    buf.extend_from_slice(&inode.creation_time_ms.to_be_bytes());
    buf.extend_from_slice(&inode.modification_time_ms.to_be_bytes());
    buf.extend_from_slice(&inode.mode.to_be_bytes());
    let mut flags = 0u8;
    if inode.is_directory {
        flags |= FLAG_DIRECTORY;
    }
    if inode.is_complete {
        flags |= FLAG_COMPLETE;
    }
    buf.push(flags);
    buf.push(dict.get_or_add_owner(&inode.owner));
    buf.push(dict.get_or_add_group(&inode.group));
    buf.push(0); // reserved
    buf.extend_from_slice(inode.name.as_bytes());
    buf
}

/// Deserialize a persisted record. The id comes from the key; the children
/// map stays empty (rebuilt from edges). A record shorter than the header
/// is corrupt: it decodes to a default inode carrying only the id, so
/// recovery can proceed past it.
pub fn decode_record(id: InodeId, data: &[u8], dict: &OwnerGroupDict) -> Inode {
    let mut inode = Inode {
        id,
        ..Inode::default()
    };
    if data.len() < RECORD_HEADER_LEN {
        error!("inode {} record truncated ({} bytes), using defaults", id, data.len());
        return inode;
    }

    inode.parent_id = be64(&data[0..8]);
    inode.size = be64(&data[8..16]);
    inode.block_size = be64(&data[16..24]);
    inode.creation_time_ms = be64(&data[24..32]) as i64;
    inode.modification_time_ms = be64(&data[32..40]) as i64;
    inode.mode = u32::from_be_bytes(data[40..44].try_into().unwrap());
    let flags = data[FLAGS_OFFSET];
    inode.is_directory = flags & FLAG_DIRECTORY != 0;
    inode.is_complete = flags & FLAG_COMPLETE != 0;
    inode.owner = dict.owner(data[45]).to_string();
    inode.group = dict.group(data[46]).to_string();
    inode.name = String::from_utf8_lossy(&data[RECORD_HEADER_LEN..]).into_owned();
    inode
}

// ─── Key encoding ───────────────────────────────────────────────
//
// All keys are big-endian so lexicographic key order equals numeric order,
// which keeps one parent's edges clustered and the sentinels last.

pub fn be64(data: &[u8]) -> u64 {
    u64::from_be_bytes(data[..8].try_into().unwrap())
}

pub fn encode_inode_key(id: InodeId) -> [u8; 8] {
    id.to_be_bytes()
}

/// `[parent id (8B big-endian)][child name bytes]`
pub fn encode_edge_key(parent_id: InodeId, child_name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + child_name.len());
    key.extend_from_slice(&parent_id.to_be_bytes());
    key.extend_from_slice(child_name.as_bytes());
    key
}

pub fn decode_edge_key(key: &[u8]) -> (InodeId, String) {
    if key.len() < 8 {
        return (INVALID_INODE_ID, String::new());
    }
    let parent = be64(&key[..8]);
    let name = String::from_utf8_lossy(&key[8..]).into_owned();
    (parent, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let mut dict = OwnerGroupDict::default();
        let inode = Inode {
            id: 42,
            parent_id: 7,
            name: "train.csv".to_string(),
            is_directory: false,
            size: 1234,
            mode: 0o640,
            owner: "alice".to_string(),
            group: "ml".to_string(),
            block_size: 4096,
            creation_time_ms: 1_700_000_000_000,
            modification_time_ms: 1_700_000_000_001,
            children: HashMap::new(),
            is_complete: false,
        };
        let buf = encode_record(&inode, &mut dict);
        assert_eq!(buf.len(), RECORD_HEADER_LEN + "train.csv".len());

        let decoded = decode_record(42, &buf, &dict);
        assert_eq!(decoded, inode);
    }

    #[test]
    fn test_directory_flags() {
        let mut dict = OwnerGroupDict::default();
        let dir = Inode {
            id: 2,
            is_directory: true,
            is_complete: true,
            name: "logs".to_string(),
            ..Inode::default()
        };
        let buf = encode_record(&dir, &mut dict);
        assert_eq!(buf[FLAGS_OFFSET], FLAG_DIRECTORY | FLAG_COMPLETE);
        let decoded = decode_record(2, &buf, &dict);
        assert!(decoded.is_directory);
        assert!(decoded.is_complete);
    }

    #[test]
    fn test_truncated_record_decodes_to_default() {
        let dict = OwnerGroupDict::default();
        let decoded = decode_record(9, &[1, 2, 3], &dict);
        assert_eq!(decoded.id, 9);
        assert_eq!(decoded.parent_id, INVALID_INODE_ID);
        assert_eq!(decoded.name, "");
    }

    #[test]
    fn test_dict_assigns_sequential_ids() {
        let mut dict = OwnerGroupDict::default();
        assert_eq!(dict.get_or_add_owner(""), 0);
        assert_eq!(dict.get_or_add_owner("alice"), 1);
        assert_eq!(dict.get_or_add_owner("bob"), 2);
        assert_eq!(dict.get_or_add_owner("alice"), 1);
        assert!(dict.is_dirty());
        assert_eq!(dict.owner(1), "alice");
        assert_eq!(dict.owner(0), "");
        assert_eq!(dict.owner(99), "");
    }

    #[test]
    fn test_dict_serialization_roundtrip() {
        let mut dict = OwnerGroupDict::default();
        dict.get_or_add_owner("alice");
        dict.get_or_add_owner("bob");
        dict.get_or_add_group("ml");

        let owners = dict.serialize_owners();
        let groups = dict.serialize_groups();

        let mut loaded = OwnerGroupDict::default();
        loaded.load_owners(&owners);
        loaded.load_groups(&groups);
        assert_eq!(loaded.owner(1), "alice");
        assert_eq!(loaded.owner(2), "bob");
        assert_eq!(loaded.group(1), "ml");
        // reloaded dictionary keeps assigning after the loaded entries
        assert_eq!(loaded.get_or_add_owner("carol"), 3);
    }

    #[test]
    fn test_dict_overflow_collapses_to_empty() {
        let mut dict = OwnerGroupDict::default();
        for i in 0..255 {
            assert_eq!(dict.get_or_add_owner(&format!("u{}", i)), (i + 1) as u8);
        }
        assert_eq!(dict.get_or_add_owner("one-too-many"), 0);
    }

    #[test]
    fn test_edge_key_roundtrip() {
        let key = encode_edge_key(7, "f.bin");
        assert_eq!(key.len(), 13);
        let (parent, name) = decode_edge_key(&key);
        assert_eq!(parent, 7);
        assert_eq!(name, "f.bin");
    }

    #[test]
    fn test_sentinels_sort_after_ids() {
        // 40-bit inode ids can never collide with the sentinel range
        let max_id_key = encode_inode_key(anycache_lib::block_id::MAX_INODE_ID);
        assert!(max_id_key < encode_inode_key(OWNER_DICT_KEY));
        assert!(encode_inode_key(OWNER_DICT_KEY) < encode_inode_key(GROUP_DICT_KEY));
        assert!(encode_inode_key(GROUP_DICT_KEY) < encode_inode_key(NEXT_ID_KEY));
    }
}
