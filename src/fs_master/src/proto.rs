//! Wire contract of the master service.
//!
//! Encoding-agnostic request/response shapes: the transport (out of this
//! crate) serializes them however it likes; field names are the contract.
//! Every response leads with an `RpcStatus`.

use crate::inode::Inode;
pub use anycache_lib::RpcStatus;
use anycache_lib::{BlockId, InodeId, TierKind, WorkerId};
use serde::{Deserialize, Serialize};

/// Inode fields exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: InodeId,
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub mode: u32,
    pub owner: String,
    pub group: String,
    pub block_size: u64,
    pub creation_time_ms: i64,
    pub modification_time_ms: i64,
    pub is_complete: bool,
}

impl From<&Inode> for FileInfo {
    fn from(inode: &Inode) -> Self {
        Self {
            file_id: inode.id,
            name: inode.name.clone(),
            is_directory: inode.is_directory,
            size: inode.size,
            mode: inode.mode,
            owner: inode.owner.clone(),
            group: inode.group.clone(),
            block_size: inode.block_size,
            creation_time_ms: inode.creation_time_ms,
            modification_time_ms: inode.modification_time_ms,
            is_complete: inode.is_complete,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLocationInfo {
    pub block_id: BlockId,
    pub worker_id: WorkerId,
    pub worker_address: String,
    pub tier: TierKind,
}

// ─── File operations ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileInfoRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileInfoResponse {
    pub status: RpcStatus,
    pub file_info: Option<FileInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileRequest {
    pub path: String,
    pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileResponse {
    pub status: RpcStatus,
    pub file_id: InodeId,
    pub worker_id: WorkerId,
    pub worker_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteFileRequest {
    pub file_id: InodeId,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFileRequest {
    pub path: String,
    pub recursive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameFileRequest {
    pub src: String,
    pub dst: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListStatusRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListStatusResponse {
    pub status: RpcStatus,
    pub entries: Vec<FileInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
    pub mode: u32,
    pub recursive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncateFileRequest {
    pub path: String,
    pub new_size: u64,
}

/// Responses that carry nothing but a status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: RpcStatus,
}

// ─── Block operations ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlockLocationsRequest {
    pub block_ids: Vec<BlockId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlockLocationsResponse {
    pub status: RpcStatus,
    pub locations: Vec<BlockLocationInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedLocation {
    pub block_id: BlockId,
    pub worker_address: String,
    pub tier: TierKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBlockLocationRequest {
    pub worker_id: WorkerId,
    pub locations: Vec<ReportedLocation>,
}

// ─── Worker management ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub address: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub status: RpcStatus,
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatRequest {
    pub worker_id: WorkerId,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
}

// ─── Mount operations ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountRequest {
    pub ns_path: String,
    pub ufs_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmountRequest {
    pub ns_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountPoint {
    pub ns_path: String,
    pub ufs_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMountTableResponse {
    pub status: RpcStatus,
    pub mounts: Vec<MountPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anycache_lib::{AcError, StatusCode};

    #[test]
    fn test_status_from_result() {
        let ok: Result<u32, AcError> = Ok(1);
        assert!(RpcStatus::from(&ok).is_ok());

        let err: Result<u32, AcError> = Err(AcError::NotFound("f".into()));
        let status = RpcStatus::from(&err);
        assert_eq!(status.code, StatusCode::NotFound);
        assert!(status.message.contains("f"));
    }

    #[test]
    fn test_response_serialization() {
        let resp = CreateFileResponse {
            status: RpcStatus::ok(),
            file_id: 42,
            worker_id: 1,
            worker_address: "w1:29999".to_string(),
        };
        let text = serde_json::to_string(&resp).unwrap();
        let back: CreateFileResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(back.file_id, 42);
        assert!(back.status.is_ok());
    }
}
