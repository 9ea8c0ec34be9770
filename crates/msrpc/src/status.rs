//! Fault status codes and HRESULT descriptions.

/// Connection-oriented fault status values carried in a fault PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultStatus {
    /// Generic runtime failure.
    RpcError = 0x1C00_0000,
    /// Presentation context ID does not name a negotiated context.
    ContextMismatch = 0x1C00_001A,
    /// Operation number out of range (`nca_s_op_rng_error`).
    OpRngError = 0x1C01_0002,
    /// Interface is not registered at this endpoint.
    UnknownInterface = 0x1C01_0003,
    /// Protocol error in the PDU stream.
    ProtocolError = 0x1C01_000B,
}

impl FaultStatus {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x1C00_0000 => Some(Self::RpcError),
            0x1C00_001A => Some(Self::ContextMismatch),
            0x1C01_0002 => Some(Self::OpRngError),
            0x1C01_0003 => Some(Self::UnknownInterface),
            0x1C01_000B => Some(Self::ProtocolError),
            _ => None,
        }
    }
}

impl std::fmt::Display for FaultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RpcError => "nca_s_fault_rpc_error",
            Self::ContextMismatch => "nca_s_fault_context_mismatch",
            Self::OpRngError => "nca_s_op_rng_error",
            Self::UnknownInterface => "nca_s_unk_if",
            Self::ProtocolError => "nca_s_proto_error",
        };
        write!(f, "{name} ({:#010x})", *self as u32)
    }
}

/// Human-readable name for common HRESULT / Win32-in-HRESULT status
/// values returned by operations.
pub fn describe_status(status: u32) -> &'static str {
    match status {
        0x0000_0000 => "S_OK",
        0x0000_0001 => "S_FALSE",
        0x8000_4001 => "E_NOTIMPL",
        0x8000_4002 => "E_NOINTERFACE",
        0x8000_4003 => "E_POINTER",
        0x8000_4004 => "E_ABORT",
        0x8000_4005 => "E_FAIL",
        0x8000_FFFF => "E_UNEXPECTED",
        0x8007_000E => "E_OUTOFMEMORY",
        0x8007_0002 => "ERROR_FILE_NOT_FOUND",
        0x8007_0005 => "E_ACCESSDENIED",
        0x8007_0032 => "ERROR_NOT_SUPPORTED",
        0x8007_0057 => "E_INVALIDARG",
        0x8007_06BA => "RPC_S_SERVER_UNAVAILABLE",
        0x8001_0108 => "RPC_E_DISCONNECTED",
        0x8001_0001 => "RPC_E_CALL_REJECTED",
        _ => "unrecognized status",
    }
}
