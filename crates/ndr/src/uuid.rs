//! UUID type with the mixed-endian DCE wire layout.
//!
//! On the wire the first three fields follow the stream byte order while
//! the trailing eight bytes are always a plain byte array. The textual
//! form is the usual `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.

use bytes::{Buf, BufMut};

use crate::encode::{NdrDecode, NdrEncode};
use crate::error::NdrError;
use crate::reader::NdrReader;
use crate::writer::NdrWriter;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Uuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Uuid {
    pub const SIZE: usize = 16;

    pub const NIL: Uuid = Uuid {
        data1: 0,
        data2: 0,
        data3: 0,
        data4: [0; 8],
    };

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// Construct from 16 bytes in field order (RFC 4122 byte layout).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self {
            data1: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data2: u16::from_be_bytes([bytes[4], bytes[5]]),
            data3: u16::from_be_bytes([bytes[6], bytes[7]]),
            data4: [
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ],
        }
    }

    /// Generate a random (version 4) UUID.
    pub fn generate() -> Self {
        Self::from_bytes(uuid::Uuid::new_v4().into_bytes())
    }

    /// Parse the canonical `8-4-4-4-12` textual form.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || NdrError::InvalidString(format!("malformed uuid: {s}"));
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 5
            || parts[0].len() != 8
            || parts[1].len() != 4
            || parts[2].len() != 4
            || parts[3].len() != 4
            || parts[4].len() != 12
        {
            return Err(malformed());
        }

        let data1 = u32::from_str_radix(parts[0], 16).map_err(|_| malformed())?;
        let data2 = u16::from_str_radix(parts[1], 16).map_err(|_| malformed())?;
        let data3 = u16::from_str_radix(parts[2], 16).map_err(|_| malformed())?;

        let mut data4 = [0u8; 8];
        let tail = format!("{}{}", parts[3], parts[4]);
        for (i, byte) in data4.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&tail[i * 2..i * 2 + 2], 16).map_err(|_| malformed())?;
        }

        Ok(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }

    /// Raw 16-byte emit in the given stream byte order (used by the PDU
    /// codec, which does not run through an NDR writer).
    pub fn write_to<B: BufMut>(&self, buf: &mut B, little_endian: bool) {
        if little_endian {
            buf.put_u32_le(self.data1);
            buf.put_u16_le(self.data2);
            buf.put_u16_le(self.data3);
        } else {
            buf.put_u32(self.data1);
            buf.put_u16(self.data2);
            buf.put_u16(self.data3);
        }
        buf.put_slice(&self.data4);
    }

    /// Raw 16-byte read in the given stream byte order. Returns `None`
    /// if fewer than 16 bytes remain.
    pub fn read_from<B: Buf>(buf: &mut B, little_endian: bool) -> Option<Self> {
        if buf.remaining() < Self::SIZE {
            return None;
        }
        let (data1, data2, data3) = if little_endian {
            (buf.get_u32_le(), buf.get_u16_le(), buf.get_u16_le())
        } else {
            (buf.get_u32(), buf.get_u16(), buf.get_u16())
        };
        let mut data4 = [0u8; 8];
        buf.copy_to_slice(&mut data4);
        Some(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }
}

impl std::fmt::Display for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl NdrEncode for Uuid {
    fn ndr_encode(&self, writer: &mut NdrWriter) -> Result<()> {
        writer.write_u32(self.data1);
        writer.write_u16(self.data2);
        writer.write_u16(self.data3);
        writer.write_bytes(&self.data4);
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for Uuid {
    fn ndr_decode(reader: &mut NdrReader) -> Result<Self> {
        let data1 = reader.read_u32()?;
        let data2 = reader.read_u16()?;
        let data3 = reader.read_u16()?;
        let raw = reader.read_bytes(8)?;
        let mut data4 = [0u8; 8];
        data4.copy_from_slice(&raw);
        Ok(Self {
            data1,
            data2,
            data3,
            data4,
        })
    }

    fn ndr_align() -> usize {
        4
    }
}
