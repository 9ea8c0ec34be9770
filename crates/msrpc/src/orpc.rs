//! ORPC call envelopes.
//!
//! Object-style calls prepend `ORPCTHIS` to the request stub and
//! `ORPCTHAT` to the response stub. Body extensions are not supported;
//! a non-null extension pointer is rejected on decode.

use ndr::{NdrDecode, NdrEncode, NdrError, NdrReader, NdrWriter, Uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComVersion {
    pub major: u16,
    pub minor: u16,
}

impl ComVersion {
    /// DCOM protocol version 5.7.
    pub const DCOM_5_7: ComVersion = ComVersion { major: 5, minor: 7 };
}

impl Default for ComVersion {
    fn default() -> Self {
        Self::DCOM_5_7
    }
}

impl NdrEncode for ComVersion {
    fn ndr_encode(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_u16(self.major);
        writer.write_u16(self.minor);
        Ok(())
    }

    fn ndr_align() -> usize {
        2
    }
}

impl NdrDecode for ComVersion {
    fn ndr_decode(reader: &mut NdrReader) -> ndr::Result<Self> {
        Ok(Self {
            major: reader.read_u16()?,
            minor: reader.read_u16()?,
        })
    }

    fn ndr_align() -> usize {
        2
    }
}

/// Request-side envelope carrying the caller's version and causality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrpcThis {
    pub version: ComVersion,
    pub flags: u32,
    pub reserved1: u32,
    pub causality_id: Uuid,
}

impl OrpcThis {
    pub fn new(causality_id: Uuid) -> Self {
        Self {
            version: ComVersion::default(),
            flags: 0,
            reserved1: 0,
            causality_id,
        }
    }
}

impl NdrEncode for OrpcThis {
    fn ndr_encode(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        self.version.ndr_encode(writer)?;
        writer.write_u32(self.flags);
        writer.write_u32(self.reserved1);
        self.causality_id.ndr_encode(writer)?;
        writer.write_u32(0); // null extension pointer
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for OrpcThis {
    fn ndr_decode(reader: &mut NdrReader) -> ndr::Result<Self> {
        let version = ComVersion::ndr_decode(reader)?;
        let flags = reader.read_u32()?;
        let reserved1 = reader.read_u32()?;
        let causality_id = Uuid::ndr_decode(reader)?;
        let extensions = reader.read_u32()?;
        if extensions != 0 {
            return Err(NdrError::InvalidPointer(extensions));
        }
        Ok(Self {
            version,
            flags,
            reserved1,
            causality_id,
        })
    }

    fn ndr_align() -> usize {
        4
    }
}

/// Response-side envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrpcThat {
    pub flags: u32,
}

impl NdrEncode for OrpcThat {
    fn ndr_encode(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_u32(self.flags);
        writer.write_u32(0); // null extension pointer
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for OrpcThat {
    fn ndr_decode(reader: &mut NdrReader) -> ndr::Result<Self> {
        let flags = reader.read_u32()?;
        let extensions = reader.read_u32()?;
        if extensions != 0 {
            return Err(NdrError::InvalidPointer(extensions));
        }
        Ok(Self { flags })
    }

    fn ndr_align() -> usize {
        4
    }
}
