//! Conformant and conformant varying arrays.
//!
//! The conformance (`max_count`) and variance (`offset`, `actual_count`)
//! headers come off the wire before any element data and are validated
//! against the allocation limits before element storage is reserved.

use crate::encode::{NdrDecode, NdrEncode};
use crate::error::{NdrError, MAX_ARRAY_ELEMENTS};
use crate::reader::NdrReader;
use crate::writer::NdrWriter;
use crate::Result;

/// An array whose size is decided at transmission time: `max_count`
/// followed by exactly that many elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConformantArray<T>(pub Vec<T>);

/// An array with separate capacity and occupancy: `max_count`, `offset`
/// (always zero here), `actual_count`, then `actual_count` elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConformantVaryingArray<T> {
    pub max_count: u32,
    pub elements: Vec<T>,
}

impl<T> ConformantVaryingArray<T> {
    /// A fully occupied array (`max_count == actual_count`).
    pub fn full(elements: Vec<T>) -> Self {
        let max_count = elements.len() as u32;
        Self {
            max_count,
            elements,
        }
    }
}

fn checked_count(len: usize) -> Result<u32> {
    if len > MAX_ARRAY_ELEMENTS {
        return Err(NdrError::AllocationLimitExceeded {
            requested: len,
            limit: MAX_ARRAY_ELEMENTS,
        });
    }
    Ok(len as u32)
}

impl<T: NdrEncode> NdrEncode for ConformantArray<T> {
    fn ndr_encode(&self, writer: &mut NdrWriter) -> Result<()> {
        writer.write_conformance(checked_count(self.0.len())?);
        for element in &self.0 {
            element.ndr_encode(writer)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrDecode> NdrDecode for ConformantArray<T> {
    fn ndr_decode(reader: &mut NdrReader) -> Result<Self> {
        let count = reader.read_conformance()?;
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            elements.push(T::ndr_decode(reader)?);
        }
        Ok(Self(elements))
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrEncode> NdrEncode for ConformantVaryingArray<T> {
    fn ndr_encode(&self, writer: &mut NdrWriter) -> Result<()> {
        let actual = checked_count(self.elements.len())?;
        if actual > self.max_count {
            return Err(NdrError::ConformanceMismatch {
                max_count: self.max_count,
                offset: 0,
                actual_count: actual,
            });
        }
        writer.write_u32(self.max_count);
        writer.write_u32(0);
        writer.write_u32(actual);
        for element in &self.elements {
            element.ndr_encode(writer)?;
        }
        Ok(())
    }

    fn ndr_align() -> usize {
        4
    }
}

impl<T: NdrDecode> NdrDecode for ConformantVaryingArray<T> {
    fn ndr_decode(reader: &mut NdrReader) -> Result<Self> {
        let max_count = reader.read_u32()?;
        if max_count as usize > MAX_ARRAY_ELEMENTS {
            return Err(NdrError::AllocationLimitExceeded {
                requested: max_count as usize,
                limit: MAX_ARRAY_ELEMENTS,
            });
        }
        let offset = reader.read_u32()?;
        let actual_count = reader.read_conformance()? as u32;
        if offset != 0 || actual_count > max_count {
            return Err(NdrError::ConformanceMismatch {
                max_count,
                offset,
                actual_count,
            });
        }
        let mut elements = Vec::with_capacity(actual_count as usize);
        for _ in 0..actual_count {
            elements.push(T::ndr_decode(reader)?);
        }
        Ok(Self {
            max_count,
            elements,
        })
    }

    fn ndr_align() -> usize {
        4
    }
}
