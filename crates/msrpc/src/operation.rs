//! The operation envelope.
//!
//! An [`Operation`] is one procedure of an interface: its operation
//! number, a name for diagnostics, and the four marshaling functions a
//! generated stub provides. The free functions here are the top-level
//! marshaling frames; they own the writer/reader for the call and drain
//! the deferred pointer region exactly once after the fixed parameter
//! part, so operation impls never call `write_deferred`/`read_deferred`
//! themselves.

use bytes::Bytes;
use ndr::{NdrReader, NdrWriter};

use crate::error::{Result, RpcError};

pub trait Operation: Send {
    fn opnum(&self) -> u16;

    /// Name used in typed status errors and traces.
    fn opname(&self) -> &'static str;

    /// Marshal the input ([in]) parameters.
    fn marshal_request(&self, writer: &mut NdrWriter) -> ndr::Result<()>;

    /// Unmarshal the input parameters (server side).
    fn unmarshal_request(&mut self, reader: &mut NdrReader) -> ndr::Result<()>;

    /// Marshal the output ([out]) parameters and the return code.
    fn marshal_response(&self, writer: &mut NdrWriter) -> ndr::Result<()>;

    /// Unmarshal the output parameters (client side).
    fn unmarshal_response(&mut self, reader: &mut NdrReader) -> ndr::Result<()>;

    /// The operation's return code after a response has been
    /// unmarshaled (or before one is marshaled). Zero is success;
    /// anything else makes the invoker raise a typed status error.
    fn return_code(&self) -> i32 {
        0
    }
}

/// Marshal a request stub: fixed parameter part, then the deferred
/// pointer region.
pub fn marshal_request_stub(op: &dyn Operation) -> Result<Bytes> {
    let mut writer = NdrWriter::new();
    op.marshal_request(&mut writer)?;
    writer.write_deferred()?;
    Ok(writer.finish()?)
}

pub fn unmarshal_request_stub(op: &mut dyn Operation, stub: Bytes) -> Result<()> {
    let mut reader = NdrReader::new(stub);
    op.unmarshal_request(&mut reader)?;
    reader.read_deferred()?;
    Ok(())
}

pub fn marshal_response_stub(op: &dyn Operation) -> Result<Bytes> {
    let mut writer = NdrWriter::new();
    op.marshal_response(&mut writer)?;
    writer.write_deferred()?;
    Ok(writer.finish()?)
}

pub fn unmarshal_response_stub(op: &mut dyn Operation, stub: Bytes) -> Result<()> {
    let mut reader = NdrReader::new(stub);
    op.unmarshal_response(&mut reader)?;
    reader.read_deferred()?;
    Ok(())
}

/// Server-side glue for a typed handler: unmarshal the request into
/// `op`, run the handler, marshal the response it returns.
pub async fn serve_call<O, F, Fut>(stub: Bytes, mut op: O, handler: F) -> Result<Bytes>
where
    O: Operation,
    F: FnOnce(O) -> Fut,
    Fut: std::future::Future<Output = Result<O>>,
{
    unmarshal_request_stub(&mut op, stub)?;
    let op = handler(op).await?;
    marshal_response_stub(&op)
}

/// Map a nonzero return code to the typed failure for `op`.
pub fn check_return_code(op: &dyn Operation) -> Result<()> {
    let status = op.return_code();
    if status == 0 {
        Ok(())
    } else {
        Err(RpcError::operation_failed(op.opname(), status as u32))
    }
}
