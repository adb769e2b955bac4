// AnyCache shared foundation: id types, the composite block-id scheme,
// the status/error taxonomy, configuration and metrics handles.
//
// Everything here is transport-agnostic; the master and worker crates
// build on these types, the RPC layer maps AcError to wire statuses.

pub mod block_id;
pub mod config;
pub mod metrics;
pub mod types;

pub use types::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire-level status code, one per error kind. `Ok` is only ever produced
/// by the RPC layer; in-process APIs use `AcResult` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok = 0,
    NotFound = 1,
    AlreadyExists = 2,
    InvalidArgument = 3,
    IoError = 4,
    PermissionDenied = 5,
    NotImplemented = 6,
    ResourceExhausted = 7,
    Unavailable = 8,
    Internal = 9,
    Cancelled = 10,
    DeadlineExceeded = 11,
}

#[derive(Error, Debug)]
pub enum AcError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not implemented: {0}")]
    Unsupported(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

impl AcError {
    pub fn code(&self) -> StatusCode {
        match self {
            AcError::NotFound(_) => StatusCode::NotFound,
            AcError::AlreadyExists(_) => StatusCode::AlreadyExists,
            AcError::InvalidArgument(_) => StatusCode::InvalidArgument,
            AcError::IoError(_) => StatusCode::IoError,
            AcError::PermissionDenied(_) => StatusCode::PermissionDenied,
            AcError::Unsupported(_) => StatusCode::NotImplemented,
            AcError::ResourceExhausted(_) => StatusCode::ResourceExhausted,
            AcError::Unavailable(_) => StatusCode::Unavailable,
            AcError::Internal(_) => StatusCode::Internal,
            AcError::Cancelled(_) => StatusCode::Cancelled,
            AcError::DeadlineExceeded(_) => StatusCode::DeadlineExceeded,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AcError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AcError::AlreadyExists(_))
    }
}

pub type AcResult<T> = std::result::Result<T, AcError>;

/// Status-plus-message pair leading every RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RpcStatus {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl From<&AcError> for RpcStatus {
    fn from(err: &AcError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl<T> From<&Result<T, AcError>> for RpcStatus {
    fn from(res: &Result<T, AcError>) -> Self {
        match res {
            Ok(_) => RpcStatus::ok(),
            Err(err) => err.into(),
        }
    }
}

impl From<std::io::Error> for AcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AcError::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => AcError::AlreadyExists(err.to_string()),
            std::io::ErrorKind::PermissionDenied => AcError::PermissionDenied(err.to_string()),
            _ => AcError::IoError(err.to_string()),
        }
    }
}

/// Epoch milliseconds from the system clock.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
