//! NDR (Network Data Representation) wire codec.
//!
//! Implements the transfer syntax that generated RPC stubs marshal
//! against: self-aligned little-endian scalars, conformant and varying
//! arrays, UTF-16 strings, and the three pointer flavors (`ref`,
//! `unique`, full) with deferred referent bodies.
//!
//! The codec is built around two stateful cursors. [`NdrWriter`] owns the
//! output buffer, the alignment position, and the referent tracking for
//! one marshaling frame; [`NdrReader`] is its decoding mirror. Types
//! implement [`NdrEncode`] / [`NdrDecode`] in terms of the cursor, and
//! the top-level frame drains the deferred pointer region once after the
//! fixed part:
//!
//! ```
//! use ndr::{NdrReader, NdrWriter};
//!
//! let mut w = NdrWriter::new();
//! w.write_u32(42);
//! w.write_wstring_unique("hello")?;
//! w.write_deferred()?;
//! let wire = w.finish()?;
//!
//! let mut r = NdrReader::new(wire);
//! assert_eq!(r.read_u32()?, 42);
//! let name = r.read_wstring_unique()?;
//! r.read_deferred()?;
//! assert_eq!(name.string_value(), "hello");
//! # Ok::<(), ndr::NdrError>(())
//! ```
//!
//! Every read is bounds-checked and every wire-supplied count is
//! validated against [`MAX_ALLOCATION_SIZE`] / [`MAX_ARRAY_ELEMENTS`]
//! before anything is allocated, so truncated or hostile streams fail
//! with a typed error instead of a panic.

mod arrays;
mod encode;
mod error;
mod handle;
mod primitives;
mod reader;
mod strings;
mod uuid;
mod writer;

pub use arrays::{ConformantArray, ConformantVaryingArray};
pub use encode::{NdrDecode, NdrEncode};
pub use error::{NdrError, Result, MAX_ALLOCATION_SIZE, MAX_ARRAY_ELEMENTS};
pub use handle::ContextHandle;
pub use reader::{NdrReader, PtrSlot};
pub use strings::{CString, WString};
pub use self::uuid::Uuid;
pub use writer::NdrWriter;

pub use bytes;
