//! Fault path tests: opnum range faults across a base-interface chain,
//! faults for requests outside any negotiated context, and protocol
//! faults for PDUs a server never expects.

mod common;

use std::time::Duration;

use common::*;
use msrpc::{
    serve_call, BindAckPdu, CallOptions, ContextResult, FaultStatus, Interface,
    InterfaceBuilder, InterfaceClient, Operation, Pdu, PduTransport, RequestPdu, ResponsePdu,
    RpcConnection, RpcError, SyntaxId, DEFAULT_MAX_FRAG,
};
use ndr::{NdrReader, NdrWriter, Uuid};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const BASE_UUID: &str = "3a7f82c5-1d49-4b06-9e3a-5c8d0f2b6e14";
const DERIVED_UUID: &str = "b64c10e9-8f27-4a53-b1c0-7d9e3f5a2c88";

fn derived_syntax() -> SyntaxId {
    SyntaxId::new(Uuid::parse(DERIVED_UUID).unwrap(), 1, 0)
}

/// One call per opnum; `origin` reports which interface level answered.
#[derive(Default)]
struct OriginOp {
    opnum: u16,
    origin: u32,
}

impl OriginOp {
    fn at(opnum: u16) -> Self {
        Self { opnum, origin: 0 }
    }
}

impl Operation for OriginOp {
    fn opnum(&self) -> u16 {
        self.opnum
    }

    fn opname(&self) -> &'static str {
        "GetOrigin"
    }

    fn marshal_request(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_u16(self.opnum);
        Ok(())
    }

    fn unmarshal_request(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        self.opnum = reader.read_u16()?;
        Ok(())
    }

    fn marshal_response(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_u32(self.origin);
        Ok(())
    }

    fn unmarshal_response(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        self.origin = reader.read_u32()?;
        Ok(())
    }
}

const ORIGIN_BASE: u32 = 1;
const ORIGIN_DERIVED: u32 = 2;

/// Base covers opnums 0..22; the derived interface adds 22..25 and
/// delegates everything below 22 down the chain.
fn derived_interface() -> Interface {
    let mut base = Interface::new(SyntaxId::new(Uuid::parse(BASE_UUID).unwrap(), 1, 0));
    for opnum in 0..22u16 {
        base.register_operation(opnum, |stub| async move {
            serve_call(stub, OriginOp::default(), |mut op| async move {
                op.origin = ORIGIN_BASE;
                Ok(op)
            })
            .await
        });
    }

    let mut builder = InterfaceBuilder::from_syntax(derived_syntax()).extending(22, base);
    for opnum in 22..25u16 {
        builder = builder.operation(opnum, |stub| async move {
            serve_call(stub, OriginOp::default(), |mut op| async move {
                op.origin = ORIGIN_DERIVED;
                Ok(op)
            })
            .await
        });
    }
    builder.build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opnums_route_through_base_chain() {
    init_logging();
    let (addr, _server, accept_task) = start_server(derived_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = InterfaceClient::new(conn, derived_syntax());

    let mut low = OriginOp::at(5);
    client.invoke(&mut low, &CallOptions::default()).await.unwrap();
    assert_eq!(low.origin, ORIGIN_BASE);

    let mut boundary = OriginOp::at(21);
    client.invoke(&mut boundary, &CallOptions::default()).await.unwrap();
    assert_eq!(boundary.origin, ORIGIN_BASE);

    let mut high = OriginOp::at(23);
    client.invoke(&mut high, &CallOptions::default()).await.unwrap();
    assert_eq!(high.origin, ORIGIN_DERIVED);

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn out_of_range_opnum_faults_with_op_rng_error() {
    init_logging();
    let (addr, _server, accept_task) = start_server(derived_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = InterfaceClient::new(conn, derived_syntax());

    let mut op = OriginOp::at(30);
    let err = client.invoke(&mut op, &CallOptions::default()).await.unwrap_err();
    match err {
        RpcError::Fault { status } => {
            assert_eq!(status, FaultStatus::OpRngError as u32);
            assert_eq!(status, 0x1c010002);
        }
        other => panic!("expected fault, got {other}"),
    }

    // Faults are per call; the connection keeps working.
    let mut check = OriginOp::at(0);
    client.invoke(&mut check, &CallOptions::default()).await.unwrap();
    assert_eq!(check.origin, ORIGIN_BASE);

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_without_bind_faults_with_context_mismatch() {
    init_logging();
    let (addr, _server, accept_task) = start_server(derived_interface()).await;

    // Raw transport, skipping the bind handshake entirely.
    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut transport = PduTransport::new(stream);

    let request = RequestPdu::new(1, 0, 0, None, bytes::Bytes::from_static(&[0, 0]));
    transport.write_raw(&request.encode()).await.unwrap();

    match transport.read().await.unwrap() {
        Pdu::Fault(fault) => {
            assert_eq!(fault.status, FaultStatus::ContextMismatch as u32);
            assert_eq!(fault.header.call_id, 1);
        }
        other => panic!("expected fault, got {:?}", other.header().packet_type),
    }

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unexpected_pdu_type_faults_with_protocol_error() {
    init_logging();
    let (addr, _server, accept_task) = start_server(derived_interface()).await;

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut transport = PduTransport::new(stream);

    // A client has no business sending a response PDU.
    let bogus = ResponsePdu::new(9, 0, bytes::Bytes::new());
    transport.write_raw(&bogus.encode()).await.unwrap();

    match transport.read().await.unwrap() {
        Pdu::Fault(fault) => {
            assert_eq!(fault.status, FaultStatus::ProtocolError as u32);
        }
        other => panic!("expected fault, got {:?}", other.header().packet_type),
    }

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn calls_after_peer_close_fail_instead_of_hanging() {
    init_logging();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // A peer that accepts the bind, then closes its write half while
    // still draining input, so client writes keep succeeding after the
    // reader task has seen EOF.
    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut transport = PduTransport::new(stream);
        let bind = match transport.read().await.unwrap() {
            Pdu::Bind(bind) => bind,
            other => panic!("expected bind, got {:?}", other.header().packet_type),
        };
        let ack = BindAckPdu::respond_to(
            &bind,
            1,
            String::new(),
            vec![ContextResult::acceptance()],
            DEFAULT_MAX_FRAG,
        );
        transport.write_raw(&ack.encode()).await.unwrap();

        let (mut read_half, mut write_half) = transport.into_inner().into_split();
        write_half.shutdown().await.unwrap();
        let mut sink = [0u8; 4096];
        loop {
            match read_half.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = InterfaceClient::new(conn, derived_syntax());
    assert_calls_fail_fast(&client).await;

    // Closing the client ends the peer's drain loop.
    drop(client);
    peer.await.unwrap();
}

/// Two invokes with no timeout: one racing the EOF, one issued well
/// after it. Both must resolve with an error instead of waiting on a
/// reply that can never come.
async fn assert_calls_fail_fast(client: &InterfaceClient) {
    for _ in 0..2 {
        let mut op = OriginOp::at(0);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.invoke(&mut op, &CallOptions::default()),
        )
        .await
        .expect("invoke stalled on a dead connection");
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_error_maps_to_rpc_fault() {
    init_logging();
    let failing = InterfaceBuilder::from_syntax(derived_syntax())
        .operation(0, |_stub| async move {
            Err::<bytes::Bytes, _>(RpcError::CallRejected("handler refused".into()))
        })
        .build();
    let (addr, _server, accept_task) = start_server(failing).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = InterfaceClient::new(conn, derived_syntax());

    let mut op = OriginOp::at(0);
    let err = client.invoke(&mut op, &CallOptions::default()).await.unwrap_err();
    match err {
        RpcError::Fault { status } => assert_eq!(status, FaultStatus::RpcError as u32),
        other => panic!("expected fault, got {other}"),
    }

    accept_task.abort();
}
