//! Error types for NDR encoding and decoding.

use thiserror::Error;

/// Maximum size in bytes for a single wire-driven allocation.
///
/// Conformance counts come off the wire and are attacker-controlled; any
/// count that would require allocating more than this is rejected before
/// a buffer is reserved.
pub const MAX_ALLOCATION_SIZE: usize = 16 * 1024 * 1024;

/// Maximum number of elements accepted from a conformance field.
pub const MAX_ARRAY_ELEMENTS: usize = 1024 * 1024;

/// Errors that can occur during NDR encoding or decoding.
#[derive(Debug, Error)]
pub enum NdrError {
    /// A read would run past the end of the octet stream.
    #[error("buffer overflow: needed {needed} bytes, have {have}")]
    BufferOverflow { needed: usize, have: usize },

    /// A wire-supplied count would require an unreasonable allocation.
    #[error("allocation limit exceeded: {requested} bytes requested, limit is {limit}")]
    AllocationLimitExceeded { requested: usize, limit: usize },

    /// A size computation overflowed.
    #[error("integer overflow in size calculation")]
    IntegerOverflow,

    /// Varying header is inconsistent with the conformance header.
    #[error("conformance mismatch: max_count={max_count}, offset={offset}, actual_count={actual_count}")]
    ConformanceMismatch {
        max_count: u32,
        offset: u32,
        actual_count: u32,
    },

    /// String data is malformed (missing terminator, bad varying header).
    #[error("invalid string encoding: {0}")]
    InvalidString(String),

    /// A referent ID is malformed or refers to an unknown referent.
    #[error("invalid pointer: referent id {0:#010x}")]
    InvalidPointer(u32),

    /// A `ref` pointer was null; `ref` pointers must always point at data.
    #[error("null ref pointer")]
    NullRefPointer,

    /// A deferred pointer body was promised by a referent ID but never
    /// appeared in the deferred region.
    #[error("missing deferred body for referent id {0:#010x}")]
    DeferredUnderflow(u32),

    /// An enum discriminant has no corresponding variant.
    #[error("invalid enum value: {0}")]
    InvalidEnumValue(i64),

    #[error("invalid UTF-8 string: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid UTF-16 string: {0}")]
    Utf16(#[from] std::char::DecodeUtf16Error),
}

pub type Result<T> = std::result::Result<T, NdrError>;
