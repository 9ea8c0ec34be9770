//! Identifier newtypes used by object-style (ORPC) calls.

use ndr::{NdrDecode, NdrEncode, NdrReader, NdrWriter, Uuid};

macro_rules! uuid_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub Uuid);

        impl $name {
            pub const SIZE: usize = Uuid::SIZE;

            pub const NIL: $name = $name(Uuid::NIL);

            pub fn generate() -> Self {
                Self(Uuid::generate())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl NdrEncode for $name {
            fn ndr_encode(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
                self.0.ndr_encode(writer)
            }

            fn ndr_align() -> usize {
                4
            }
        }

        impl NdrDecode for $name {
            fn ndr_decode(reader: &mut NdrReader) -> ndr::Result<Self> {
                Ok(Self(Uuid::ndr_decode(reader)?))
            }

            fn ndr_align() -> usize {
                4
            }
        }
    };
}

uuid_newtype! {
    /// Interface identifier.
    Iid
}

uuid_newtype! {
    /// Interface pointer identifier: one exported interface instance.
    Ipid
}
