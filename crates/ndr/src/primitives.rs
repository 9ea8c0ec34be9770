//! Trait implementations for NDR primitive types.
//!
//! Scalars are self-aligned: a value of size N sits on an N-byte boundary
//! relative to the start of the octet stream.

use crate::encode::{NdrDecode, NdrEncode};
use crate::reader::NdrReader;
use crate::writer::NdrWriter;
use crate::Result;

macro_rules! impl_ndr_scalar {
    ($ty:ty, $align:expr, $write:ident, $read:ident) => {
        impl NdrEncode for $ty {
            fn ndr_encode(&self, writer: &mut NdrWriter) -> Result<()> {
                writer.$write(*self);
                Ok(())
            }

            fn ndr_align() -> usize {
                $align
            }
        }

        impl NdrDecode for $ty {
            fn ndr_decode(reader: &mut NdrReader) -> Result<Self> {
                reader.$read()
            }

            fn ndr_align() -> usize {
                $align
            }
        }
    };
}

impl_ndr_scalar!(u8, 1, write_u8, read_u8);
impl_ndr_scalar!(i8, 1, write_i8, read_i8);
impl_ndr_scalar!(bool, 1, write_bool, read_bool);
impl_ndr_scalar!(u16, 2, write_u16, read_u16);
impl_ndr_scalar!(i16, 2, write_i16, read_i16);
impl_ndr_scalar!(u32, 4, write_u32, read_u32);
impl_ndr_scalar!(i32, 4, write_i32, read_i32);
impl_ndr_scalar!(u64, 8, write_u64, read_u64);
impl_ndr_scalar!(i64, 8, write_i64, read_i64);
impl_ndr_scalar!(f32, 4, write_f32, read_f32);
impl_ndr_scalar!(f64, 8, write_f64, read_f64);
