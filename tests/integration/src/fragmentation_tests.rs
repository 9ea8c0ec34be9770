//! Fragmentation tests: stubs larger than the negotiated fragment size
//! split into FIRST/LAST-flagged PDUs and reassemble intact in both
//! directions.

mod common;

use bytes::Bytes;
use common::*;
use msrpc::{
    serve_call, CallOptions, InterfaceBuilder, InterfaceClient, Operation, RpcConnection,
    ServerConfig, SyntaxId,
};
use ndr::{NdrReader, NdrWriter, Uuid};

const BLOB_UUID: &str = "c8d24e19-6b7a-4f30-92c5-1a8e0d3f7b64";

fn blob_syntax() -> SyntaxId {
    SyntaxId::new(Uuid::parse(BLOB_UUID).unwrap(), 1, 0)
}

/// `EchoBlob([in] DWORD len, [in, size_is(len)] byte data[],
/// [out] DWORD* out_len, [out, size_is(*out_len)] byte out_data[])`.
#[derive(Default)]
struct EchoBlobOp {
    data: Bytes,
    reply: Bytes,
}

impl Operation for EchoBlobOp {
    fn opnum(&self) -> u16 {
        0
    }

    fn opname(&self) -> &'static str {
        "EchoBlob"
    }

    fn marshal_request(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_conformance(self.data.len() as u32);
        writer.write_bytes(&self.data);
        Ok(())
    }

    fn unmarshal_request(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        let len = reader.read_conformance()?;
        self.data = reader.read_bytes(len)?;
        Ok(())
    }

    fn marshal_response(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_conformance(self.reply.len() as u32);
        writer.write_bytes(&self.reply);
        Ok(())
    }

    fn unmarshal_response(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        let len = reader.read_conformance()?;
        self.reply = reader.read_bytes(len)?;
        Ok(())
    }
}

fn blob_interface() -> msrpc::Interface {
    InterfaceBuilder::from_syntax(blob_syntax())
        .operation(0, |stub| async move {
            serve_call(stub, EchoBlobOp::default(), |mut op| async move {
                op.reply = op.data.clone();
                Ok(op)
            })
            .await
        })
        .build()
}

async fn echo(client: &InterfaceClient, payload: Bytes) -> Bytes {
    let mut op = EchoBlobOp {
        data: payload,
        ..Default::default()
    };
    client.invoke(&mut op, &CallOptions::default()).await.unwrap();
    op.reply
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn large_payload_survives_fragmentation_both_ways() {
    init_logging();
    // A small fragment size forces many fragments per direction.
    let config = ServerConfig {
        max_frag: 1024,
        ..Default::default()
    };
    let (addr, _server, accept_task) = start_server_with_config(blob_interface(), config).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = InterfaceClient::new(conn, blob_syntax());

    let payload = pattern(100 * 1024);
    let expected = compute_checksum(&payload);

    let reply = echo(&client, payload.clone()).await;
    assert_eq!(reply.len(), payload.len());
    assert_eq!(compute_checksum(&reply), expected);
    assert_eq!(reply, payload);

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn payload_near_fragment_boundary() {
    init_logging();
    let config = ServerConfig {
        max_frag: 1024,
        ..Default::default()
    };
    let (addr, _server, accept_task) = start_server_with_config(blob_interface(), config).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = InterfaceClient::new(conn, blob_syntax());

    // Straddle the single-fragment limit from both sides.
    for len in [0usize, 1, 900, 1000, 1024, 1025, 2048, 4096 + 3] {
        let payload = pattern(len);
        let reply = echo(&client, payload.clone()).await;
        assert_eq!(reply, payload, "payload of {len} bytes corrupted");
    }

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_large_calls_keep_their_payloads() {
    init_logging();
    let config = ServerConfig {
        max_frag: 2048,
        ..Default::default()
    };
    let (addr, _server, accept_task) = start_server_with_config(blob_interface(), config).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = std::sync::Arc::new(InterfaceClient::new(conn, blob_syntax()));

    // Concurrent fragmented calls on one connection; response fragments
    // of different calls may interleave on the wire.
    let calls = (1..=8usize).map(|i| {
        let client = std::sync::Arc::clone(&client);
        async move {
            let payload = pattern(i * 10_000 + i);
            let reply = echo(&client, payload.clone()).await;
            assert_eq!(reply, payload, "call {i} got another call's bytes");
        }
    });
    futures::future::join_all(calls).await;

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn default_fragment_size_still_splits_big_stubs() {
    init_logging();
    let (addr, _server, accept_task) = start_server(blob_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = InterfaceClient::new(conn, blob_syntax());

    // Well above the default 4280-byte fragment, well below the PDU cap.
    let payload = pattern(64 * 1024);
    let reply = echo(&client, payload.clone()).await;
    assert_eq!(reply, payload);

    accept_task.abort();
}
