//! PDU framing over a byte stream.
//!
//! `frag_length` in the common header is the framing length: the
//! transport reads the 16-byte header, learns the total PDU size, then
//! reads the remainder. Works over anything `AsyncRead`/`AsyncWrite`,
//! which is the seam a named-pipe or in-process transport would plug
//! into; TCP is what the client and server use.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};
use crate::pdu::{Pdu, PduHeader};

/// Default upper bound for one PDU on the wire.
pub const DEFAULT_MAX_PDU_SIZE: usize = 1024 * 1024;

pub struct PduTransport<T> {
    inner: T,
    read_buf: BytesMut,
    max_pdu_size: usize,
}

impl<T> PduTransport<T> {
    pub fn new(inner: T) -> Self {
        Self::with_limit(inner, DEFAULT_MAX_PDU_SIZE)
    }

    pub fn with_limit(inner: T, max_pdu_size: usize) -> Self {
        Self {
            inner,
            read_buf: BytesMut::with_capacity(8192),
            max_pdu_size,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AsyncRead + Unpin> PduTransport<T> {
    async fn fill(&mut self) -> Result<()> {
        self.read_buf.reserve(4096);
        let n = self.inner.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(RpcError::ConnectionClosed);
        }
        Ok(())
    }

    /// Read one complete PDU's raw bytes.
    pub async fn read_pdu(&mut self) -> Result<Bytes> {
        while self.read_buf.len() < PduHeader::SIZE {
            self.fill().await?;
        }

        // frag_length sits at offset 8, in the byte order announced by
        // the data representation label at offset 4.
        let little_endian = self.read_buf[4] & 0xF0 == 0x10;
        let raw = [self.read_buf[8], self.read_buf[9]];
        let frag_length = if little_endian {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        } as usize;

        if frag_length < PduHeader::SIZE {
            return Err(RpcError::MalformedPdu("frag_length shorter than header"));
        }
        if frag_length > self.max_pdu_size {
            return Err(RpcError::PduTooLarge {
                size: frag_length,
                max: self.max_pdu_size,
            });
        }

        while self.read_buf.len() < frag_length {
            self.fill().await?;
        }
        Ok(self.read_buf.split_to(frag_length).freeze())
    }

    /// Read and decode one PDU.
    pub async fn read(&mut self) -> Result<Pdu> {
        let raw = self.read_pdu().await?;
        Pdu::decode(&raw)
    }
}

impl<T: AsyncWrite + Unpin> PduTransport<T> {
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn write(&mut self, pdu: &Pdu) -> Result<()> {
        self.write_raw(&pdu.encode()).await
    }
}
