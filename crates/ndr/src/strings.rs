//! NDR string representations.
//!
//! Strings travel as conformant varying arrays of their code units with a
//! trailing NUL included in the counts: `max_count`, `offset` (always
//! zero here), `actual_count`, the units, the terminator, then padding to
//! a four-byte boundary.
//!
//! Two additional conventions from the Windows stubs are carried here:
//! empty strings behind `unique` pointers marshal as a null pointer, and
//! fixed-capacity WCHAR buffers truncate silently to their declared
//! capacity.

use crate::encode::{NdrDecode, NdrEncode};
use crate::error::{NdrError, MAX_ALLOCATION_SIZE};
use crate::reader::{NdrReader, PtrSlot};
use crate::writer::NdrWriter;
use crate::Result;

/// A UTF-16 (WCHAR) string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WString(pub String);

/// A single-byte (CHAR) string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CString(pub String);

impl NdrWriter {
    /// Conformant varying UTF-16 string, NUL terminator included in the
    /// counts, padded to a four-byte boundary.
    pub fn write_wstring(&mut self, s: &str) -> Result<()> {
        let units: Vec<u16> = s.encode_utf16().collect();
        let count = units
            .len()
            .checked_add(1)
            .filter(|&c| c <= u32::MAX as usize)
            .ok_or(NdrError::IntegerOverflow)? as u32;

        self.write_u32(count); // max_count
        self.write_u32(0); // offset
        self.write_u32(count); // actual_count
        for unit in units {
            self.write_u16(unit);
        }
        self.write_u16(0);
        self.align(4);
        Ok(())
    }

    /// Conformant varying single-byte string.
    pub fn write_cstring(&mut self, s: &str) -> Result<()> {
        let bytes = s.as_bytes();
        let count = bytes
            .len()
            .checked_add(1)
            .filter(|&c| c <= u32::MAX as usize)
            .ok_or(NdrError::IntegerOverflow)? as u32;

        self.write_u32(count);
        self.write_u32(0);
        self.write_u32(count);
        self.write_bytes(bytes);
        self.write_u8(0);
        self.align(4);
        Ok(())
    }

    /// `unique` pointer to a UTF-16 string, with the empty string gated
    /// to a null pointer.
    pub fn write_wstring_unique(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            self.write_u32(0);
            return Ok(());
        }
        self.write_unique_pointer(Some(&WString(s.to_owned())))
    }

    /// `unique` pointer to a single-byte string, empty gated to null.
    pub fn write_cstring_unique(&mut self, s: &str) -> Result<()> {
        if s.is_empty() {
            self.write_u32(0);
            return Ok(());
        }
        self.write_unique_pointer(Some(&CString(s.to_owned())))
    }

    /// Fixed-capacity WCHAR buffer of exactly `capacity` code units.
    /// Input longer than the capacity is silently truncated; shorter
    /// input is NUL-terminated and zero-filled. The field always
    /// occupies `capacity * 2` bytes.
    pub fn write_fixed_wstring(&mut self, s: &str, capacity: usize) {
        let mut written = 0;
        for unit in s.encode_utf16().take(capacity) {
            self.write_u16(unit);
            written += 1;
        }
        for _ in written..capacity {
            self.write_u16(0);
        }
    }
}

impl NdrReader {
    /// Read a conformant varying UTF-16 string.
    pub fn read_wstring(&mut self) -> Result<String> {
        let max_count = self.read_u32()?;
        let offset = self.read_u32()?;
        let actual_count = self.read_u32()?;
        if offset != 0 || actual_count > max_count {
            return Err(NdrError::ConformanceMismatch {
                max_count,
                offset,
                actual_count,
            });
        }

        let n = actual_count as usize;
        if n == 0 {
            return Err(NdrError::InvalidString(
                "string varying header with zero count".into(),
            ));
        }
        let byte_len = n.checked_mul(2).ok_or(NdrError::IntegerOverflow)?;
        if byte_len > MAX_ALLOCATION_SIZE {
            return Err(NdrError::AllocationLimitExceeded {
                requested: byte_len,
                limit: MAX_ALLOCATION_SIZE,
            });
        }
        if byte_len > self.remaining() {
            return Err(NdrError::BufferOverflow {
                needed: byte_len,
                have: self.remaining(),
            });
        }

        let mut units = Vec::with_capacity(n);
        for _ in 0..n {
            units.push(self.read_u16()?);
        }
        if units.pop() != Some(0) {
            return Err(NdrError::InvalidString("missing NUL terminator".into()));
        }
        self.skip_tail_padding(4);

        let s = char::decode_utf16(units).collect::<std::result::Result<String, _>>()?;
        Ok(s)
    }

    /// Read a conformant varying single-byte string.
    pub fn read_cstring(&mut self) -> Result<String> {
        let max_count = self.read_u32()?;
        let offset = self.read_u32()?;
        let actual_count = self.read_u32()?;
        if offset != 0 || actual_count > max_count {
            return Err(NdrError::ConformanceMismatch {
                max_count,
                offset,
                actual_count,
            });
        }

        let n = actual_count as usize;
        if n == 0 {
            return Err(NdrError::InvalidString(
                "string varying header with zero count".into(),
            ));
        }
        if n > MAX_ALLOCATION_SIZE {
            return Err(NdrError::AllocationLimitExceeded {
                requested: n,
                limit: MAX_ALLOCATION_SIZE,
            });
        }
        let raw = self.read_bytes(n)?;
        if raw[n - 1] != 0 {
            return Err(NdrError::InvalidString("missing NUL terminator".into()));
        }
        self.skip_tail_padding(4);
        Ok(String::from_utf8(raw[..n - 1].to_vec())?)
    }

    /// Read a `unique` string pointer; resolves when the deferred region
    /// drains. A null pointer stands for the empty string.
    pub fn read_wstring_unique(&mut self) -> Result<PtrSlot<WString>> {
        self.read_unique_pointer()
    }

    pub fn read_cstring_unique(&mut self) -> Result<PtrSlot<CString>> {
        self.read_unique_pointer()
    }

    /// Read a fixed-capacity WCHAR buffer of exactly `capacity` units,
    /// stopping the string at the first NUL.
    pub fn read_fixed_wstring(&mut self, capacity: usize) -> Result<String> {
        let byte_len = capacity.checked_mul(2).ok_or(NdrError::IntegerOverflow)?;
        if byte_len > self.remaining() {
            return Err(NdrError::BufferOverflow {
                needed: byte_len,
                have: self.remaining(),
            });
        }
        let mut units = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            units.push(self.read_u16()?);
        }
        if let Some(nul) = units.iter().position(|&u| u == 0) {
            units.truncate(nul);
        }
        let s = char::decode_utf16(units).collect::<std::result::Result<String, _>>()?;
        Ok(s)
    }
}

impl PtrSlot<WString> {
    /// The decoded string, with a null pointer standing for empty.
    pub fn string_value(&self) -> String {
        self.value().map(|w| w.0).unwrap_or_default()
    }
}

impl PtrSlot<CString> {
    pub fn string_value(&self) -> String {
        self.value().map(|c| c.0).unwrap_or_default()
    }
}

impl NdrEncode for WString {
    fn ndr_encode(&self, writer: &mut NdrWriter) -> Result<()> {
        writer.write_wstring(&self.0)
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for WString {
    fn ndr_decode(reader: &mut NdrReader) -> Result<Self> {
        Ok(WString(reader.read_wstring()?))
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrEncode for CString {
    fn ndr_encode(&self, writer: &mut NdrWriter) -> Result<()> {
        writer.write_cstring(&self.0)
    }

    fn ndr_align() -> usize {
        4
    }
}

impl NdrDecode for CString {
    fn ndr_decode(reader: &mut NdrReader) -> Result<Self> {
        Ok(CString(reader.read_cstring()?))
    }

    fn ndr_align() -> usize {
        4
    }
}
