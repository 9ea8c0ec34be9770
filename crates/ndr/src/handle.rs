//! Context handles.
//!
//! A context handle is an opaque 20-byte token (attribute word plus UUID)
//! the server hands out to name per-client state. The all-zero handle is
//! the null handle.

use crate::encode::{NdrDecode, NdrEncode};
use crate::reader::NdrReader;
use crate::uuid::Uuid;
use crate::writer::NdrWriter;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextHandle {
    pub attributes: u32,
    pub uuid: Uuid,
}

impl ContextHandle {
    pub const SIZE: usize = 20;

    pub const NULL: ContextHandle = ContextHandle {
        attributes: 0,
        uuid: Uuid::NIL,
    };

    /// Mint a fresh handle with a random UUID.
    pub fn generate() -> Self {
        Self {
            attributes: 0,
            uuid: Uuid::generate(),
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl std::fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx[{:#010x}:{}]", self.attributes, self.uuid)
    }
}

impl NdrEncode for ContextHandle {
    fn ndr_encode(&self, writer: &mut NdrWriter) -> Result<()> {
        writer.write_u32(self.attributes);
        self.uuid.ndr_encode(writer)
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for ContextHandle {
    fn ndr_decode(reader: &mut NdrReader) -> Result<Self> {
        Ok(Self {
            attributes: reader.read_u32()?,
            uuid: Uuid::ndr_decode(reader)?,
        })
    }

    fn ndr_align() -> usize {
        4
    }
}
