//! Core encode/decode traits.
//!
//! Types that travel on the wire implement [`NdrEncode`] and [`NdrDecode`]
//! against the stateful [`NdrWriter`](crate::NdrWriter) and
//! [`NdrReader`](crate::NdrReader) cursors. The cursor carries alignment
//! position, byte order, and the deferred-pointer state, so implementations
//! only describe field order.
//!
//! Structures follow the NDR composition protocol: the fixed-size part of
//! every field is emitted in declaration order, pointer fields contribute
//! only their referent IDs, and the pointed-at bodies land in the deferred
//! region flushed by the enclosing top-level frame.

use crate::reader::NdrReader;
use crate::writer::NdrWriter;
use crate::Result;

/// A type that can be marshaled into an NDR octet stream.
pub trait NdrEncode {
    /// Append this value's representation to the writer.
    fn ndr_encode(&self, writer: &mut NdrWriter) -> Result<()>;

    /// NDR alignment of this type (the alignment of its largest scalar).
    fn ndr_align() -> usize
    where
        Self: Sized,
    {
        1
    }
}

/// A type that can be unmarshaled from an NDR octet stream.
pub trait NdrDecode: Sized {
    /// Read one value from the reader.
    fn ndr_decode(reader: &mut NdrReader) -> Result<Self>;

    /// NDR alignment of this type.
    fn ndr_align() -> usize {
        1
    }
}
