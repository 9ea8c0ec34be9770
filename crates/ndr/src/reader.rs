//! Stateful NDR decoder.
//!
//! [`NdrReader`] mirrors [`NdrWriter`](crate::NdrWriter): it owns the input
//! buffer, the alignment position, and the referent table for a single
//! unmarshaling frame. Every read is bounds-checked before the cursor
//! advances; a truncated or hostile stream yields
//! [`NdrError::BufferOverflow`] rather than a panic or an oversized
//! allocation.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};

use bytes::{Buf, Bytes};

use crate::encode::NdrDecode;
use crate::error::{NdrError, MAX_ARRAY_ELEMENTS};
use crate::writer::align_padding;
use crate::Result;

type DeferredDecode = Box<dyn FnOnce(&mut NdrReader) -> Result<()> + Send>;

/// Destination cell for a deferred pointer body.
///
/// Decoding a `unique` or full pointer yields a slot immediately; the
/// pointed-at value arrives when the enclosing frame drains the deferred
/// region with [`NdrReader::read_deferred`]. Full pointers that shared a
/// referent ID on the wire yield slots backed by the same cell, so
/// aliasing survives the round trip.
pub struct PtrSlot<T> {
    cell: Arc<OnceLock<T>>,
    referent_id: u32,
}

impl<T> PtrSlot<T> {
    fn null() -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
            referent_id: 0,
        }
    }

    fn pending(referent_id: u32) -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
            referent_id,
        }
    }

    /// True if the wire pointer was null.
    pub fn is_null(&self) -> bool {
        self.referent_id == 0
    }

    /// The decoded value, if the pointer was non-null and its body has
    /// been read.
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// The decoded value, or an error if the referent ID promised a body
    /// that never arrived in the deferred region.
    pub fn require(&self) -> Result<&T> {
        if self.referent_id == 0 {
            return Err(NdrError::NullRefPointer);
        }
        self.cell
            .get()
            .ok_or(NdrError::DeferredUnderflow(self.referent_id))
    }

    /// Clone the decoded value out of the slot, treating null as `None`.
    pub fn value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.cell.get().cloned()
    }

    /// True if both slots resolve to the same referent (full-pointer
    /// aliasing reconstructed from the wire).
    pub fn aliases(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    fn fill(&self, value: T) -> Result<()> {
        self.cell
            .set(value)
            .map_err(|_| NdrError::InvalidPointer(self.referent_id))
    }
}

impl<T> Default for PtrSlot<T> {
    /// A null slot, the state before anything has been decoded.
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for PtrSlot<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            referent_id: self.referent_id,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PtrSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtrSlot")
            .field("referent_id", &self.referent_id)
            .field("value", &self.cell.get())
            .finish()
    }
}

/// NDR decoder with self-relative alignment and referent tracking.
pub struct NdrReader {
    buf: Bytes,
    position: usize,
    little_endian: bool,
    deferred: VecDeque<DeferredDecode>,
    /// Referent ID -> the `PtrSlot<T>` (type-erased) already handed out
    /// for it, so repeated full-pointer IDs alias the same cell.
    referents: HashMap<u32, Box<dyn Any + Send + Sync>>,
}

impl NdrReader {
    /// Create a little-endian reader over `buf`.
    pub fn new(buf: Bytes) -> Self {
        Self::with_byte_order(buf, true)
    }

    pub fn with_byte_order(buf: Bytes, little_endian: bool) -> Self {
        Self {
            buf,
            position: 0,
            little_endian,
            deferred: VecDeque::new(),
            referents: HashMap::new(),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    fn check(&self, needed: usize) -> Result<()> {
        let have = self.buf.remaining();
        if have < needed {
            return Err(NdrError::BufferOverflow { needed, have });
        }
        Ok(())
    }

    /// Skip padding so the next read lands on `alignment`.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = align_padding(self.position, alignment);
        self.check(padding)?;
        self.buf.advance(padding);
        self.position += padding;
        Ok(())
    }

    /// Skip trailing padding if present. Some encoders omit padding that
    /// would fall past the end of the stream (string tails), so this
    /// consumes at most what remains.
    pub fn skip_tail_padding(&mut self, alignment: usize) {
        let padding = align_padding(self.position, alignment).min(self.buf.remaining());
        self.buf.advance(padding);
        self.position += padding;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.check(1)?;
        self.position += 1;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        self.check(2)?;
        self.position += 2;
        Ok(if self.little_endian {
            self.buf.get_u16_le()
        } else {
            self.buf.get_u16()
        })
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        self.check(4)?;
        self.position += 4;
        Ok(if self.little_endian {
            self.buf.get_u32_le()
        } else {
            self.buf.get_u32()
        })
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.align(8)?;
        self.check(8)?;
        self.position += 8;
        Ok(if self.little_endian {
            self.buf.get_u64_le()
        } else {
            self.buf.get_u64()
        })
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.align(4)?;
        self.check(4)?;
        self.position += 4;
        Ok(if self.little_endian {
            self.buf.get_f32_le()
        } else {
            self.buf.get_f32()
        })
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.align(8)?;
        self.check(8)?;
        self.position += 8;
        Ok(if self.little_endian {
            self.buf.get_f64_le()
        } else {
            self.buf.get_f64()
        })
    }

    /// Read `len` raw bytes, no alignment.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.check(len)?;
        self.position += len;
        Ok(self.buf.copy_to_bytes(len))
    }

    /// Read a conformance (`max_count`) field and validate it against the
    /// allocation limit and the bytes actually present. The count is
    /// checked before anything is allocated, so a hostile `0xFFFFFFFF`
    /// against a ten-byte buffer fails cleanly here.
    pub fn read_conformance(&mut self) -> Result<usize> {
        let count = self.read_u32()? as usize;
        if count > MAX_ARRAY_ELEMENTS {
            return Err(NdrError::AllocationLimitExceeded {
                requested: count,
                limit: MAX_ARRAY_ELEMENTS,
            });
        }
        // Every element occupies at least one octet.
        if count > self.buf.remaining() {
            return Err(NdrError::BufferOverflow {
                needed: count,
                have: self.buf.remaining(),
            });
        }
        Ok(count)
    }

    /// Queue a decode step for the deferred region.
    pub fn defer(&mut self, body: impl FnOnce(&mut NdrReader) -> Result<()> + Send + 'static) {
        self.deferred.push_back(Box::new(body));
    }

    /// A `ref` pointer body is inline at the point of reference.
    pub fn read_ref_pointer<T: NdrDecode>(&mut self) -> Result<T> {
        T::ndr_decode(self)
    }

    /// Read a `unique` pointer: the referent ID now, the body later when
    /// the deferred region drains. A zero ID yields a null slot.
    pub fn read_unique_pointer<T>(&mut self) -> Result<PtrSlot<T>>
    where
        T: NdrDecode + Send + Sync + 'static,
    {
        let id = self.read_u32()?;
        if id == 0 {
            return Ok(PtrSlot::null());
        }
        let slot = PtrSlot::pending(id);
        let target = slot.clone();
        self.defer(move |r| target.fill(T::ndr_decode(r)?));
        Ok(slot)
    }

    /// Read a full pointer. The first occurrence of a referent ID queues
    /// the body; later occurrences of the same ID return a slot backed by
    /// the same cell without consuming more of the deferred region.
    pub fn read_full_pointer<T>(&mut self) -> Result<PtrSlot<T>>
    where
        T: NdrDecode + Send + Sync + 'static,
    {
        let id = self.read_u32()?;
        if id == 0 {
            return Ok(PtrSlot::null());
        }
        if let Some(existing) = self.referents.get(&id) {
            return existing
                .downcast_ref::<PtrSlot<T>>()
                .cloned()
                .ok_or(NdrError::InvalidPointer(id));
        }
        let slot = PtrSlot::pending(id);
        self.referents.insert(id, Box::new(slot.clone()));
        let target = slot.clone();
        self.defer(move |r| target.fill(T::ndr_decode(r)?));
        Ok(slot)
    }

    /// Drain the deferred region: decode every queued pointer body, in the
    /// order the referent IDs appeared. Nested pointers queue further
    /// bodies which drain in the same pass.
    pub fn read_deferred(&mut self) -> Result<()> {
        while let Some(body) = self.deferred.pop_front() {
            body(self)?;
        }
        Ok(())
    }
}
