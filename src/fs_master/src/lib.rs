// Master node internals: the durable inode store, the namespace tree,
// block locations, worker membership, the mount table, and the
// FileSystemMaster facade that ties them to the RPC surface.

pub mod block_master;
pub mod inode;
pub mod inode_store;
pub mod inode_tree;
pub mod master;
pub mod mount_table;
pub mod proto;
pub mod worker_manager;

pub use inode::Inode;
pub use inode_store::{InodeStore, StoreBatch};
pub use inode_tree::InodeTree;
pub use master::{CreateFileResult, FileSystemMaster};
