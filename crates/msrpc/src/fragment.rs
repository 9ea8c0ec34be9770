//! Fragmentation of large stubs across multiple PDUs.
//!
//! A call whose stub exceeds the negotiated fragment size is split into a
//! train of request (or response) PDUs sharing one `call_id`:
//! `FIRST_FRAG` on the first, `LAST_FRAG` on the last, every fragment
//! carrying the total stub size in `alloc_hint` so the receiver can
//! reserve once.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, RpcError};
use crate::pdu::{PacketFlags, PduHeader, RequestPdu, ResponsePdu};
use ndr::Uuid;

/// Upper bound for a reassembled stub, independent of how many
/// fragments the peer sends.
pub const MAX_ASSEMBLED_STUB: usize = 64 * 1024 * 1024;

/// Largest stub payload that fits in one request fragment of `max_frag`
/// wire bytes.
pub fn max_request_stub(max_frag: u16, has_object_uuid: bool) -> usize {
    let overhead = PduHeader::SIZE
        + RequestPdu::BODY_HEADER_SIZE
        + if has_object_uuid { Uuid::SIZE } else { 0 };
    (max_frag as usize).saturating_sub(overhead).max(1)
}

/// Largest stub payload that fits in one response fragment.
pub fn max_response_stub(max_frag: u16) -> usize {
    (max_frag as usize)
        .saturating_sub(PduHeader::SIZE + ResponsePdu::BODY_HEADER_SIZE)
        .max(1)
}

fn fragment_flags(base: PacketFlags, first: bool, last: bool) -> PacketFlags {
    let mut flags = base;
    flags.remove(PacketFlags::FIRST_FRAG | PacketFlags::LAST_FRAG);
    if first {
        flags.insert(PacketFlags::FIRST_FRAG);
    }
    if last {
        flags.insert(PacketFlags::LAST_FRAG);
    }
    flags
}

/// Split a request into fragments no larger than `max_frag` on the wire.
/// A request that already fits comes back as a single complete PDU.
pub fn split_request(request: &RequestPdu, max_frag: u16) -> Vec<RequestPdu> {
    let chunk = max_request_stub(max_frag, request.object_uuid.is_some());
    let total = request.stub_data.len();
    if total <= chunk {
        return vec![request.clone()];
    }

    let mut fragments = Vec::with_capacity(total.div_ceil(chunk));
    let mut offset = 0;
    while offset < total {
        let end = (offset + chunk).min(total);
        let mut frag = request.clone();
        frag.stub_data = request.stub_data.slice(offset..end);
        frag.alloc_hint = total as u32;
        frag.header.packet_flags =
            fragment_flags(request.header.packet_flags, offset == 0, end == total);
        fragments.push(frag);
        offset = end;
    }
    fragments
}

/// Split a response into fragments no larger than `max_frag` on the wire.
pub fn split_response(response: &ResponsePdu, max_frag: u16) -> Vec<ResponsePdu> {
    let chunk = max_response_stub(max_frag);
    let total = response.stub_data.len();
    if total <= chunk {
        return vec![response.clone()];
    }

    let mut fragments = Vec::with_capacity(total.div_ceil(chunk));
    let mut offset = 0;
    while offset < total {
        let end = (offset + chunk).min(total);
        let mut frag = response.clone();
        frag.stub_data = response.stub_data.slice(offset..end);
        frag.alloc_hint = total as u32;
        frag.header.packet_flags =
            fragment_flags(response.header.packet_flags, offset == 0, end == total);
        fragments.push(frag);
        offset = end;
    }
    fragments
}

/// Reassembles the stub of one fragmented call.
pub struct FragmentAssembler {
    call_id: u32,
    max_assembled: usize,
    received_first: bool,
    buf: BytesMut,
}

impl FragmentAssembler {
    pub fn new(call_id: u32, max_assembled: usize) -> Self {
        Self {
            call_id,
            max_assembled,
            received_first: false,
            buf: BytesMut::new(),
        }
    }

    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    /// Feed one fragment. Returns the complete stub once `LAST_FRAG`
    /// arrives, `None` while more fragments are expected.
    pub fn add_fragment(&mut self, header: &PduHeader, stub: &Bytes) -> Result<Option<Bytes>> {
        if header.call_id != self.call_id {
            return Err(RpcError::CallIdMismatch {
                expected: self.call_id,
                got: header.call_id,
            });
        }

        let first = header.packet_flags.contains(PacketFlags::FIRST_FRAG);
        if self.received_first == first {
            // Either a missing first fragment or a duplicate one.
            return Err(RpcError::FragmentOutOfOrder);
        }
        self.received_first = true;

        if self.buf.len() + stub.len() > self.max_assembled {
            return Err(RpcError::FragmentAssembly(format!(
                "assembled stub exceeds {} bytes",
                self.max_assembled
            )));
        }
        self.buf.extend_from_slice(stub);

        if header.packet_flags.contains(PacketFlags::LAST_FRAG) {
            Ok(Some(std::mem::take(&mut self.buf).freeze()))
        } else {
            Ok(None)
        }
    }

    pub fn reset(&mut self) {
        self.received_first = false;
        self.buf.clear();
    }
}
