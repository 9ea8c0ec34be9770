//! Connection-oriented DCE/RPC PDU codec.
//!
//! Every PDU starts with a common 16-byte header carrying the protocol
//! version (5.0), packet type, fragment flags, the data representation
//! label, `frag_length` (the transport framing length), `auth_length`
//! (always zero here; authenticated trailers are not supported) and the
//! `call_id` that correlates requests with responses.
//!
//! Multi-byte header and body fields honor the sender's data
//! representation label. Bind and alter-context bodies carry presentation
//! context negotiation; request/response/fault bodies carry the NDR stub
//! octets produced by the codec in the `ndr` crate.

use bytes::{BufMut, Bytes, BytesMut};
use ndr::Uuid;

use crate::error::{Result, RpcError};
use crate::status::FaultStatus;

pub const RPC_VERSION_MAJOR: u8 = 5;
pub const RPC_VERSION_MINOR: u8 = 0;

/// Default fragment size negotiated when neither side asks for less.
pub const DEFAULT_MAX_FRAG: u16 = 4280;

/// The NDR transfer syntax (version 2), proposed in every bind.
pub const NDR_TRANSFER_SYNTAX: SyntaxId = SyntaxId {
    uuid: Uuid {
        data1: 0x8a88_5d04,
        data2: 0x1ceb,
        data3: 0x11c9,
        data4: [0x9f, 0xe8, 0x08, 0x00, 0x2b, 0x10, 0x48, 0x60],
    },
    version: 2,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 2,
    Fault = 3,
    Bind = 11,
    BindAck = 12,
    BindNak = 13,
    AlterContext = 14,
    AlterContextResp = 15,
    Shutdown = 17,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Fault),
            11 => Some(Self::Bind),
            12 => Some(Self::BindAck),
            13 => Some(Self::BindNak),
            14 => Some(Self::AlterContext),
            15 => Some(Self::AlterContextResp),
            17 => Some(Self::Shutdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(pub u8);

impl PacketFlags {
    pub const FIRST_FRAG: u8 = 0x01;
    pub const LAST_FRAG: u8 = 0x02;
    pub const CANCEL_PENDING: u8 = 0x04;
    pub const MULTIPLEX: u8 = 0x10;
    pub const DID_NOT_EXECUTE: u8 = 0x20;
    pub const OBJECT_UUID: u8 = 0x80;

    /// An unfragmented PDU: first and last fragment at once.
    pub fn complete() -> Self {
        Self(Self::FIRST_FRAG | Self::LAST_FRAG)
    }

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn insert(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn remove(&mut self, flag: u8) {
        self.0 &= !flag;
    }
}

/// Data representation label: byte order in the high nibble of the first
/// octet, character set in the low nibble, floating point in the second
/// octet. We always emit little-endian / ASCII / IEEE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRep {
    pub little_endian: bool,
}

impl DataRep {
    pub const LITTLE_ENDIAN: DataRep = DataRep {
        little_endian: true,
    };

    pub fn encode(&self) -> [u8; 4] {
        let order = if self.little_endian { 0x10 } else { 0x00 };
        [order, 0, 0, 0]
    }

    pub fn decode(bytes: [u8; 4]) -> Self {
        Self {
            little_endian: bytes[0] & 0xF0 == 0x10,
        }
    }
}

impl Default for DataRep {
    fn default() -> Self {
        Self::LITTLE_ENDIAN
    }
}

/// Interface or transfer syntax identifier: a UUID plus a version word
/// with the major version in the low half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyntaxId {
    pub uuid: Uuid,
    pub version: u32,
}

impl SyntaxId {
    pub const SIZE: usize = 20;

    pub fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self {
            uuid,
            version: (major as u32) | ((minor as u32) << 16),
        }
    }

    pub fn major(&self) -> u16 {
        (self.version & 0xFFFF) as u16
    }

    pub fn minor(&self) -> u16 {
        (self.version >> 16) as u16
    }

    fn write_to(&self, buf: &mut BytesMut, little_endian: bool) {
        self.uuid.write_to(buf, little_endian);
        if little_endian {
            buf.put_u32_le(self.version);
        } else {
            buf.put_u32(self.version);
        }
    }

    fn read_from(cursor: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            uuid: cursor.uuid()?,
            version: cursor.u32()?,
        })
    }
}

impl std::fmt::Display for SyntaxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}.{}", self.uuid, self.major(), self.minor())
    }
}

/// Bounds-checked body cursor honoring the sender's byte order.
struct Cursor<'a> {
    buf: &'a [u8],
    consumed: usize,
    little_endian: bool,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], little_endian: bool) -> Self {
        Self {
            buf,
            consumed: 0,
            little_endian,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(RpcError::MalformedPdu("truncated PDU body"));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        self.consumed += n;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let raw = self.take(2)?;
        let raw = [raw[0], raw[1]];
        Ok(if self.little_endian {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        })
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        let raw = [raw[0], raw[1], raw[2], raw[3]];
        Ok(if self.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn uuid(&mut self) -> Result<Uuid> {
        let mut raw = self.take(Uuid::SIZE)?;
        Uuid::read_from(&mut raw, self.little_endian)
            .ok_or(RpcError::MalformedPdu("truncated UUID"))
    }

    /// Skip padding to a 4-byte boundary relative to the PDU body start
    /// (the 16-byte header keeps body offsets congruent to PDU offsets).
    fn align4(&mut self) -> Result<()> {
        let pad = self.consumed.wrapping_neg() & 3;
        self.take(pad)?;
        Ok(())
    }

    fn rest(self) -> Bytes {
        Bytes::copy_from_slice(self.buf)
    }
}

/// Common 16-byte PDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub version: u8,
    pub version_minor: u8,
    pub packet_type: PacketType,
    pub packet_flags: PacketFlags,
    pub data_rep: DataRep,
    pub frag_length: u16,
    pub auth_length: u16,
    pub call_id: u32,
}

impl PduHeader {
    pub const SIZE: usize = 16;

    pub fn new(packet_type: PacketType, call_id: u32) -> Self {
        Self {
            version: RPC_VERSION_MAJOR,
            version_minor: RPC_VERSION_MINOR,
            packet_type,
            packet_flags: PacketFlags::complete(),
            data_rep: DataRep::default(),
            frag_length: 0,
            auth_length: 0,
            call_id,
        }
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.version_minor);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.packet_flags.0);
        buf.put_slice(&self.data_rep.encode());
        if self.data_rep.little_endian {
            buf.put_u16_le(self.frag_length);
            buf.put_u16_le(self.auth_length);
            buf.put_u32_le(self.call_id);
        } else {
            buf.put_u16(self.frag_length);
            buf.put_u16(self.auth_length);
            buf.put_u32(self.call_id);
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(RpcError::MalformedPdu("short PDU header"));
        }
        let version = data[0];
        let version_minor = data[1];
        if version != RPC_VERSION_MAJOR || version_minor != RPC_VERSION_MINOR {
            return Err(RpcError::VersionMismatch {
                major: version,
                minor: version_minor,
            });
        }
        let packet_type =
            PacketType::from_u8(data[2]).ok_or(RpcError::InvalidPacketType(data[2]))?;
        let packet_flags = PacketFlags(data[3]);
        let data_rep = DataRep::decode([data[4], data[5], data[6], data[7]]);

        let mut cursor = Cursor::new(&data[8..16], data_rep.little_endian);
        let frag_length = cursor.u16()?;
        let auth_length = cursor.u16()?;
        let call_id = cursor.u32()?;
        if auth_length != 0 {
            return Err(RpcError::Unsupported("authentication trailer"));
        }

        Ok(Self {
            version,
            version_minor,
            packet_type,
            packet_flags,
            data_rep,
            frag_length,
            auth_length,
            call_id,
        })
    }
}

/// Patch the final length into the frag_length field at offset 8.
fn patch_frag_length(buf: &mut BytesMut, little_endian: bool) {
    let len = buf.len() as u16;
    let raw = if little_endian {
        len.to_le_bytes()
    } else {
        len.to_be_bytes()
    };
    buf[8] = raw[0];
    buf[9] = raw[1];
}

/// One proposed presentation context: an abstract (interface) syntax and
/// the transfer syntaxes the client can speak for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextElement {
    pub context_id: u16,
    pub abstract_syntax: SyntaxId,
    pub transfer_syntaxes: Vec<SyntaxId>,
}

impl ContextElement {
    pub fn new(context_id: u16, abstract_syntax: SyntaxId) -> Self {
        Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes: vec![NDR_TRANSFER_SYNTAX],
        }
    }

    fn write_to(&self, buf: &mut BytesMut, little_endian: bool) {
        if little_endian {
            buf.put_u16_le(self.context_id);
        } else {
            buf.put_u16(self.context_id);
        }
        buf.put_u8(self.transfer_syntaxes.len() as u8);
        buf.put_u8(0);
        self.abstract_syntax.write_to(buf, little_endian);
        for ts in &self.transfer_syntaxes {
            ts.write_to(buf, little_endian);
        }
    }

    fn read_from(cursor: &mut Cursor<'_>) -> Result<Self> {
        let context_id = cursor.u16()?;
        let n_transfer = cursor.u8()?;
        cursor.u8()?; // reserved
        let abstract_syntax = SyntaxId::read_from(cursor)?;
        let mut transfer_syntaxes = Vec::with_capacity(n_transfer as usize);
        for _ in 0..n_transfer {
            transfer_syntaxes.push(SyntaxId::read_from(cursor)?);
        }
        Ok(Self {
            context_id,
            abstract_syntax,
            transfer_syntaxes,
        })
    }
}

/// Negotiation outcome codes for one presentation context.
pub const RESULT_ACCEPTANCE: u16 = 0;
pub const RESULT_USER_REJECTION: u16 = 1;
pub const RESULT_PROVIDER_REJECTION: u16 = 2;

/// Provider rejection reasons.
pub const REASON_NOT_SPECIFIED: u16 = 0;
pub const REASON_ABSTRACT_SYNTAX_NOT_SUPPORTED: u16 = 1;
pub const REASON_TRANSFER_SYNTAXES_NOT_SUPPORTED: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextResult {
    pub result: u16,
    pub reason: u16,
    pub transfer_syntax: SyntaxId,
}

impl ContextResult {
    pub fn acceptance() -> Self {
        Self {
            result: RESULT_ACCEPTANCE,
            reason: REASON_NOT_SPECIFIED,
            transfer_syntax: NDR_TRANSFER_SYNTAX,
        }
    }

    pub fn provider_rejection(reason: u16) -> Self {
        Self {
            result: RESULT_PROVIDER_REJECTION,
            reason,
            transfer_syntax: SyntaxId::new(Uuid::NIL, 0, 0),
        }
    }

    pub fn accepted(&self) -> bool {
        self.result == RESULT_ACCEPTANCE
    }

    fn write_to(&self, buf: &mut BytesMut, little_endian: bool) {
        if little_endian {
            buf.put_u16_le(self.result);
            buf.put_u16_le(self.reason);
        } else {
            buf.put_u16(self.result);
            buf.put_u16(self.reason);
        }
        self.transfer_syntax.write_to(buf, little_endian);
    }

    fn read_from(cursor: &mut Cursor<'_>) -> Result<Self> {
        Ok(Self {
            result: cursor.u16()?,
            reason: cursor.u16()?,
            transfer_syntax: SyntaxId::read_from(cursor)?,
        })
    }
}

/// Bind or alter-context PDU; the two share a body layout and differ only
/// in packet type. A bind opens the association, alter-context adds
/// presentation contexts to an established one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub context_list: Vec<ContextElement>,
}

impl BindPdu {
    pub fn new(call_id: u32, context_list: Vec<ContextElement>) -> Self {
        Self {
            header: PduHeader::new(PacketType::Bind, call_id),
            max_xmit_frag: DEFAULT_MAX_FRAG,
            max_recv_frag: DEFAULT_MAX_FRAG,
            assoc_group_id: 0,
            context_list,
        }
    }

    pub fn alter(call_id: u32, context_list: Vec<ContextElement>) -> Self {
        Self {
            header: PduHeader::new(PacketType::AlterContext, call_id),
            ..Self::new(call_id, context_list)
        }
    }

    pub fn encode(&self) -> Bytes {
        let le = self.header.data_rep.little_endian;
        let mut buf = BytesMut::with_capacity(128);
        self.header.encode_to(&mut buf);
        if le {
            buf.put_u16_le(self.max_xmit_frag);
            buf.put_u16_le(self.max_recv_frag);
            buf.put_u32_le(self.assoc_group_id);
        } else {
            buf.put_u16(self.max_xmit_frag);
            buf.put_u16(self.max_recv_frag);
            buf.put_u32(self.assoc_group_id);
        }
        buf.put_u8(self.context_list.len() as u8);
        buf.put_u8(0);
        buf.put_u16(0);
        for element in &self.context_list {
            element.write_to(&mut buf, le);
        }
        patch_frag_length(&mut buf, le);
        buf.freeze()
    }

    pub fn decode(header: PduHeader, body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body, header.data_rep.little_endian);
        let max_xmit_frag = cursor.u16()?;
        let max_recv_frag = cursor.u16()?;
        let assoc_group_id = cursor.u32()?;
        let n_contexts = cursor.u8()?;
        cursor.u8()?;
        cursor.u16()?;
        let mut context_list = Vec::with_capacity(n_contexts as usize);
        for _ in 0..n_contexts {
            context_list.push(ContextElement::read_from(&mut cursor)?);
        }
        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            context_list,
        })
    }
}

/// Bind-ack or alter-context-response PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAckPdu {
    pub header: PduHeader,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group_id: u32,
    pub secondary_addr: String,
    pub results: Vec<ContextResult>,
}

impl BindAckPdu {
    /// Build the response for `request`, mirroring its packet type
    /// (bind -> bind_ack, alter_context -> alter_context_resp).
    pub fn respond_to(
        request: &BindPdu,
        assoc_group_id: u32,
        secondary_addr: String,
        results: Vec<ContextResult>,
        max_frag: u16,
    ) -> Self {
        let packet_type = match request.header.packet_type {
            PacketType::AlterContext => PacketType::AlterContextResp,
            _ => PacketType::BindAck,
        };
        Self {
            header: PduHeader::new(packet_type, request.header.call_id),
            max_xmit_frag: request.max_xmit_frag.min(max_frag),
            max_recv_frag: request.max_recv_frag.min(max_frag),
            assoc_group_id,
            secondary_addr,
            results,
        }
    }

    pub fn encode(&self) -> Bytes {
        let le = self.header.data_rep.little_endian;
        let mut buf = BytesMut::with_capacity(128);
        self.header.encode_to(&mut buf);
        if le {
            buf.put_u16_le(self.max_xmit_frag);
            buf.put_u16_le(self.max_recv_frag);
            buf.put_u32_le(self.assoc_group_id);
        } else {
            buf.put_u16(self.max_xmit_frag);
            buf.put_u16(self.max_recv_frag);
            buf.put_u32(self.assoc_group_id);
        }
        let addr_len = (self.secondary_addr.len() + 1) as u16;
        if le {
            buf.put_u16_le(addr_len);
        } else {
            buf.put_u16(addr_len);
        }
        buf.put_slice(self.secondary_addr.as_bytes());
        buf.put_u8(0);
        // Result list is aligned to 4 relative to the PDU start.
        while buf.len() % 4 != 0 {
            buf.put_u8(0);
        }
        buf.put_u8(self.results.len() as u8);
        buf.put_u8(0);
        buf.put_u16(0);
        for result in &self.results {
            result.write_to(&mut buf, le);
        }
        patch_frag_length(&mut buf, le);
        buf.freeze()
    }

    pub fn decode(header: PduHeader, body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body, header.data_rep.little_endian);
        let max_xmit_frag = cursor.u16()?;
        let max_recv_frag = cursor.u16()?;
        let assoc_group_id = cursor.u32()?;
        let addr_len = cursor.u16()? as usize;
        let raw_addr = cursor.take(addr_len)?;
        let secondary_addr = match raw_addr.split_last() {
            Some((0, head)) => String::from_utf8_lossy(head).into_owned(),
            _ => String::from_utf8_lossy(raw_addr).into_owned(),
        };
        cursor.align4()?;
        let n_results = cursor.u8()?;
        cursor.u8()?;
        cursor.u16()?;
        let mut results = Vec::with_capacity(n_results as usize);
        for _ in 0..n_results {
            results.push(ContextResult::read_from(&mut cursor)?);
        }
        Ok(Self {
            header,
            max_xmit_frag,
            max_recv_frag,
            assoc_group_id,
            secondary_addr,
            results,
        })
    }
}

/// Bind rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindNakPdu {
    pub header: PduHeader,
    pub reject_reason: u16,
}

impl BindNakPdu {
    pub fn decode(header: PduHeader, body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body, header.data_rep.little_endian);
        let reject_reason = cursor.u16()?;
        Ok(Self {
            header,
            reject_reason,
        })
    }
}

/// Request PDU carrying one fragment of a call's stub data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub opnum: u16,
    pub object_uuid: Option<Uuid>,
    pub stub_data: Bytes,
}

impl RequestPdu {
    /// Body bytes before the stub data (alloc_hint, context_id, opnum),
    /// excluding the optional object UUID.
    pub const BODY_HEADER_SIZE: usize = 8;

    pub fn new(
        call_id: u32,
        context_id: u16,
        opnum: u16,
        object_uuid: Option<Uuid>,
        stub_data: Bytes,
    ) -> Self {
        let mut header = PduHeader::new(PacketType::Request, call_id);
        if object_uuid.is_some() {
            header.packet_flags.insert(PacketFlags::OBJECT_UUID);
        }
        Self {
            header,
            alloc_hint: stub_data.len() as u32,
            context_id,
            opnum,
            object_uuid,
            stub_data,
        }
    }

    pub fn encode(&self) -> Bytes {
        let le = self.header.data_rep.little_endian;
        let mut buf =
            BytesMut::with_capacity(PduHeader::SIZE + Self::BODY_HEADER_SIZE + self.stub_data.len());
        self.header.encode_to(&mut buf);
        if le {
            buf.put_u32_le(self.alloc_hint);
            buf.put_u16_le(self.context_id);
            buf.put_u16_le(self.opnum);
        } else {
            buf.put_u32(self.alloc_hint);
            buf.put_u16(self.context_id);
            buf.put_u16(self.opnum);
        }
        if let Some(uuid) = &self.object_uuid {
            uuid.write_to(&mut buf, le);
        }
        buf.put_slice(&self.stub_data);
        patch_frag_length(&mut buf, le);
        buf.freeze()
    }

    pub fn decode(header: PduHeader, body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body, header.data_rep.little_endian);
        let alloc_hint = cursor.u32()?;
        let context_id = cursor.u16()?;
        let opnum = cursor.u16()?;
        let object_uuid = if header.packet_flags.contains(PacketFlags::OBJECT_UUID) {
            Some(cursor.uuid()?)
        } else {
            None
        };
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            opnum,
            object_uuid,
            stub_data: cursor.rest(),
        })
    }
}

/// Response PDU carrying one fragment of a call's result stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub stub_data: Bytes,
}

impl ResponsePdu {
    pub const BODY_HEADER_SIZE: usize = 8;

    pub fn new(call_id: u32, context_id: u16, stub_data: Bytes) -> Self {
        Self {
            header: PduHeader::new(PacketType::Response, call_id),
            alloc_hint: stub_data.len() as u32,
            context_id,
            cancel_count: 0,
            stub_data,
        }
    }

    pub fn encode(&self) -> Bytes {
        let le = self.header.data_rep.little_endian;
        let mut buf =
            BytesMut::with_capacity(PduHeader::SIZE + Self::BODY_HEADER_SIZE + self.stub_data.len());
        self.header.encode_to(&mut buf);
        if le {
            buf.put_u32_le(self.alloc_hint);
            buf.put_u16_le(self.context_id);
        } else {
            buf.put_u32(self.alloc_hint);
            buf.put_u16(self.context_id);
        }
        buf.put_u8(self.cancel_count);
        buf.put_u8(0);
        buf.put_slice(&self.stub_data);
        patch_frag_length(&mut buf, le);
        buf.freeze()
    }

    pub fn decode(header: PduHeader, body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body, header.data_rep.little_endian);
        let alloc_hint = cursor.u32()?;
        let context_id = cursor.u16()?;
        let cancel_count = cursor.u8()?;
        cursor.u8()?; // reserved
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
            stub_data: cursor.rest(),
        })
    }
}

/// Fault PDU reporting a runtime failure for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPdu {
    pub header: PduHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub cancel_count: u8,
    pub status: u32,
}

impl FaultPdu {
    pub fn new(call_id: u32, context_id: u16, status: FaultStatus) -> Self {
        Self {
            header: PduHeader::new(PacketType::Fault, call_id),
            alloc_hint: 0,
            context_id,
            cancel_count: 0,
            status: status as u32,
        }
    }

    pub fn encode(&self) -> Bytes {
        let le = self.header.data_rep.little_endian;
        let mut buf = BytesMut::with_capacity(PduHeader::SIZE + 16);
        self.header.encode_to(&mut buf);
        if le {
            buf.put_u32_le(self.alloc_hint);
            buf.put_u16_le(self.context_id);
        } else {
            buf.put_u32(self.alloc_hint);
            buf.put_u16(self.context_id);
        }
        buf.put_u8(self.cancel_count);
        buf.put_u8(0);
        if le {
            buf.put_u32_le(self.status);
        } else {
            buf.put_u32(self.status);
        }
        buf.put_u32(0); // reserved / alignment
        patch_frag_length(&mut buf, le);
        buf.freeze()
    }

    pub fn decode(header: PduHeader, body: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(body, header.data_rep.little_endian);
        let alloc_hint = cursor.u32()?;
        let context_id = cursor.u16()?;
        let cancel_count = cursor.u8()?;
        cursor.u8()?;
        let status = cursor.u32()?;
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            cancel_count,
            status,
        })
    }
}

/// A decoded PDU of any supported type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Bind(BindPdu),
    BindAck(BindAckPdu),
    BindNak(BindNakPdu),
    AlterContext(BindPdu),
    AlterContextResp(BindAckPdu),
    Request(RequestPdu),
    Response(ResponsePdu),
    Fault(FaultPdu),
    Shutdown(PduHeader),
}

impl Pdu {
    /// Decode one complete PDU (header plus body, as framed by
    /// `frag_length` on the transport).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = PduHeader::decode(data)?;
        let body = &data[PduHeader::SIZE..];
        Ok(match header.packet_type {
            PacketType::Bind => Pdu::Bind(BindPdu::decode(header, body)?),
            PacketType::BindAck => Pdu::BindAck(BindAckPdu::decode(header, body)?),
            PacketType::BindNak => Pdu::BindNak(BindNakPdu::decode(header, body)?),
            PacketType::AlterContext => Pdu::AlterContext(BindPdu::decode(header, body)?),
            PacketType::AlterContextResp => {
                Pdu::AlterContextResp(BindAckPdu::decode(header, body)?)
            }
            PacketType::Request => Pdu::Request(RequestPdu::decode(header, body)?),
            PacketType::Response => Pdu::Response(ResponsePdu::decode(header, body)?),
            PacketType::Fault => Pdu::Fault(FaultPdu::decode(header, body)?),
            PacketType::Shutdown => Pdu::Shutdown(header),
        })
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Pdu::Bind(p) | Pdu::AlterContext(p) => p.encode(),
            Pdu::BindAck(p) | Pdu::AlterContextResp(p) => p.encode(),
            Pdu::Request(p) => p.encode(),
            Pdu::Response(p) => p.encode(),
            Pdu::Fault(p) => p.encode(),
            Pdu::BindNak(p) => {
                let le = p.header.data_rep.little_endian;
                let mut buf = BytesMut::with_capacity(PduHeader::SIZE + 4);
                p.header.encode_to(&mut buf);
                if le {
                    buf.put_u16_le(p.reject_reason);
                } else {
                    buf.put_u16(p.reject_reason);
                }
                buf.put_u16(0);
                patch_frag_length(&mut buf, le);
                buf.freeze()
            }
            Pdu::Shutdown(header) => {
                let mut buf = BytesMut::with_capacity(PduHeader::SIZE);
                header.encode_to(&mut buf);
                patch_frag_length(&mut buf, header.data_rep.little_endian);
                buf.freeze()
            }
        }
    }

    pub fn header(&self) -> &PduHeader {
        match self {
            Pdu::Bind(p) | Pdu::AlterContext(p) => &p.header,
            Pdu::BindAck(p) | Pdu::AlterContextResp(p) => &p.header,
            Pdu::BindNak(p) => &p.header,
            Pdu::Request(p) => &p.header,
            Pdu::Response(p) => &p.header,
            Pdu::Fault(p) => &p.header,
            Pdu::Shutdown(h) => h,
        }
    }

    pub fn call_id(&self) -> u32 {
        self.header().call_id
    }
}
