//! Runtime error types.

use thiserror::Error;

use crate::status::describe_status;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("marshaling error: {0}")]
    Ndr(#[from] ndr::NdrError),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("call timed out")]
    Timeout,

    #[error("unsupported protocol version {major}.{minor}")]
    VersionMismatch { major: u8, minor: u8 },

    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("unsupported protocol feature: {0}")]
    Unsupported(&'static str),

    #[error("malformed PDU: {0}")]
    MalformedPdu(&'static str),

    #[error("PDU of {size} bytes exceeds the {max}-byte limit")]
    PduTooLarge { size: usize, max: usize },

    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("bind rejected: {0}")]
    BindRejected(String),

    #[error("call id mismatch: expected {expected}, got {got}")]
    CallIdMismatch { expected: u32, got: u32 },

    #[error("fragment received out of order")]
    FragmentOutOfOrder,

    #[error("fragment assembly failed: {0}")]
    FragmentAssembly(String),

    #[error("presentation context mismatch")]
    ContextMismatch,

    #[error("operation {opnum} is not implemented by this interface")]
    NotImplemented { opnum: u16 },

    #[error("call rejected: {0}")]
    CallRejected(String),

    #[error("peer returned fault status {status:#010x}")]
    Fault { status: u32 },

    /// An operation completed at the RPC level but reported a nonzero
    /// status. The response's output parameters were still unmarshaled
    /// into the operation before this was raised.
    #[error("{opname} failed with status {status:#010x} ({description})")]
    OperationFailed {
        opname: &'static str,
        status: u32,
        description: &'static str,
    },

    #[error("unexpected response packet type")]
    UnexpectedResponse,
}

impl RpcError {
    /// Typed status error for a completed operation with a failing
    /// return code.
    pub fn operation_failed(opname: &'static str, status: u32) -> Self {
        Self::OperationFailed {
            opname,
            status,
            description: describe_status(status),
        }
    }

    /// The failing status code, for callers that branch on it.
    pub fn status(&self) -> Option<u32> {
        match self {
            Self::Fault { status } | Self::OperationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
