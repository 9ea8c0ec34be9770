//! Stateful NDR encoder.
//!
//! [`NdrWriter`] owns the output buffer, the alignment position, and the
//! pointer-tracking state for a single marshaling frame. Every call gets a
//! fresh writer; referent IDs and identity tracking never leak between
//! calls.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::encode::NdrEncode;
use crate::Result;

/// First referent ID handed out by a writer. Decoders must treat referent
/// IDs as opaque non-zero tokens; only equality is meaningful.
const REFERENT_ID_BASE: u32 = 0x0002_0000;

/// Bytes of padding needed to bring `position` up to `alignment`
/// (which must be a power of two).
pub(crate) fn align_padding(position: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    position.wrapping_neg() & (alignment - 1)
}

type DeferredEncode = Box<dyn FnOnce(&mut NdrWriter) -> Result<()> + Send>;

/// NDR encoder with self-relative alignment and deferred-pointer tracking.
pub struct NdrWriter {
    buf: BytesMut,
    position: usize,
    little_endian: bool,
    next_referent_id: u32,
    /// Referent identity map for full pointers, keyed by allocation address.
    referents: HashMap<usize, u32>,
    /// Pointer bodies queued for the deferred region, FIFO.
    deferred: VecDeque<DeferredEncode>,
}

impl NdrWriter {
    /// Create a little-endian writer (the common transfer representation).
    pub fn new() -> Self {
        Self::with_byte_order(true)
    }

    pub fn with_byte_order(little_endian: bool) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            position: 0,
            little_endian,
            next_referent_id: REFERENT_ID_BASE,
            referents: HashMap::new(),
            deferred: VecDeque::new(),
        }
    }

    /// Current offset from the start of the octet stream. Alignment is
    /// relative to this, not to any enclosing transport frame.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    /// Insert zero padding so the next write lands on `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let padding = align_padding(self.position, alignment);
        for _ in 0..padding {
            self.buf.put_u8(0);
        }
        self.position += padding;
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
        self.position += 1;
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.align(2);
        if self.little_endian {
            self.buf.put_u16_le(value);
        } else {
            self.buf.put_u16(value);
        }
        self.position += 2;
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.align(4);
        if self.little_endian {
            self.buf.put_u32_le(value);
        } else {
            self.buf.put_u32(value);
        }
        self.position += 4;
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.align(8);
        if self.little_endian {
            self.buf.put_u64_le(value);
        } else {
            self.buf.put_u64(value);
        }
        self.position += 8;
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_u64(value as u64);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.align(4);
        if self.little_endian {
            self.buf.put_f32_le(value);
        } else {
            self.buf.put_f32(value);
        }
        self.position += 4;
    }

    pub fn write_f64(&mut self, value: f64) {
        self.align(8);
        if self.little_endian {
            self.buf.put_f64_le(value);
        } else {
            self.buf.put_f64(value);
        }
        self.position += 8;
    }

    /// Raw bytes, no alignment.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
        self.position += data.len();
    }

    /// Copy `data` into a fixed-capacity field of `capacity` bytes.
    /// Longer input is silently truncated, shorter input is zero-filled,
    /// so the field always occupies exactly `capacity` bytes.
    pub fn write_fixed_bytes(&mut self, data: &[u8], capacity: usize) {
        let take = data.len().min(capacity);
        self.buf.put_slice(&data[..take]);
        for _ in take..capacity {
            self.buf.put_u8(0);
        }
        self.position += capacity;
    }

    /// Emit a conformance (`max_count`) field.
    pub fn write_conformance(&mut self, count: u32) {
        self.write_u32(count);
    }

    fn alloc_referent_id(&mut self) -> u32 {
        let id = self.next_referent_id;
        self.next_referent_id = self.next_referent_id.wrapping_add(4);
        id
    }

    /// Queue an encode step for the deferred region. Bodies run in the
    /// order queued when [`write_deferred`](Self::write_deferred) drains
    /// the queue.
    pub fn defer(&mut self, body: impl FnOnce(&mut NdrWriter) -> Result<()> + Send + 'static) {
        self.deferred.push_back(Box::new(body));
    }

    /// A `ref` pointer has no wire representation of its own; the body is
    /// encoded inline at the point of reference.
    pub fn write_ref_pointer<T: NdrEncode>(&mut self, value: &T) -> Result<()> {
        value.ndr_encode(self)
    }

    /// A `unique` pointer: null encodes as a zero referent ID, non-null
    /// emits a fresh referent ID and queues the body for the deferred
    /// region. Unique pointers never share referent IDs, so aliasing is
    /// not preserved across them.
    pub fn write_unique_pointer<T>(&mut self, value: Option<&T>) -> Result<()>
    where
        T: NdrEncode + Clone + Send + 'static,
    {
        match value {
            None => self.write_u32(0),
            Some(v) => {
                let id = self.alloc_referent_id();
                self.write_u32(id);
                let body = v.clone();
                self.defer(move |w| body.ndr_encode(w));
            }
        }
        Ok(())
    }

    /// A full pointer: like `unique`, but multiple pointers to the same
    /// allocation (the same `Arc`) reuse one referent ID and the body is
    /// marshaled once. Decoders reconstruct the aliasing.
    pub fn write_full_pointer<T>(&mut self, value: Option<&Arc<T>>) -> Result<()>
    where
        T: NdrEncode + Send + Sync + 'static,
    {
        match value {
            None => self.write_u32(0),
            Some(v) => {
                let key = Arc::as_ptr(v) as usize;
                if let Some(&id) = self.referents.get(&key) {
                    self.write_u32(id);
                } else {
                    let id = self.alloc_referent_id();
                    self.referents.insert(key, id);
                    self.write_u32(id);
                    let body = Arc::clone(v);
                    self.defer(move |w| body.ndr_encode(w));
                }
            }
        }
        Ok(())
    }

    /// Flush all queued pointer bodies, in the order their referent IDs
    /// were emitted. A body may itself queue further bodies (nested
    /// pointers); those drain in the same pass, after everything already
    /// queued.
    pub fn write_deferred(&mut self) -> Result<()> {
        while let Some(body) = self.deferred.pop_front() {
            body(self)?;
        }
        Ok(())
    }

    /// Finish the frame and hand back the octet stream. Any pointer bodies
    /// still queued are flushed to the tail first.
    pub fn finish(mut self) -> Result<Bytes> {
        self.write_deferred()?;
        Ok(self.buf.freeze())
    }
}

impl Default for NdrWriter {
    fn default() -> Self {
        Self::new()
    }
}
