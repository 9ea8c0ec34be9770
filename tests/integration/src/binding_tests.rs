//! Presentation-context negotiation tests: explicit bind, rejection of
//! unknown interfaces and incompatible versions, and alter-context for a
//! second interface on a live connection.

mod common;

use std::sync::Arc;

use common::*;
use msrpc::{
    serve_call, CallOptions, InterfaceBuilder, InterfaceClient, Operation, RpcConnection,
    RpcError, RpcServer, SyntaxId,
};
use ndr::{NdrReader, NdrWriter, Uuid};

const CALC_UUID: &str = "0d4b7a36-55f1-4c8a-8c2f-9e6a1b3d7c20";
const CLOCK_UUID: &str = "7e91c3f8-2a64-4d0b-b851-6f0c2d9e4a17";

fn calc_syntax() -> SyntaxId {
    SyntaxId::new(Uuid::parse(CALC_UUID).unwrap(), 1, 0)
}

fn clock_syntax() -> SyntaxId {
    SyntaxId::new(Uuid::parse(CLOCK_UUID).unwrap(), 2, 0)
}

/// `Add([in] long a, [in] long b, [out] long* sum)`.
#[derive(Default)]
struct AddOp {
    a: i32,
    b: i32,
    sum: i32,
}

impl Operation for AddOp {
    fn opnum(&self) -> u16 {
        0
    }

    fn opname(&self) -> &'static str {
        "Add"
    }

    fn marshal_request(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_i32(self.a);
        writer.write_i32(self.b);
        Ok(())
    }

    fn unmarshal_request(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        self.a = reader.read_i32()?;
        self.b = reader.read_i32()?;
        Ok(())
    }

    fn marshal_response(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_i32(self.sum);
        Ok(())
    }

    fn unmarshal_response(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        self.sum = reader.read_i32()?;
        Ok(())
    }
}

/// `GetTicks([out] hyper* ticks)`.
#[derive(Default)]
struct GetTicksOp {
    ticks: u64,
}

impl Operation for GetTicksOp {
    fn opnum(&self) -> u16 {
        0
    }

    fn opname(&self) -> &'static str {
        "GetTicks"
    }

    fn marshal_request(&self, _writer: &mut NdrWriter) -> ndr::Result<()> {
        Ok(())
    }

    fn unmarshal_request(&mut self, _reader: &mut NdrReader) -> ndr::Result<()> {
        Ok(())
    }

    fn marshal_response(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_u64(self.ticks);
        Ok(())
    }

    fn unmarshal_response(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        self.ticks = reader.read_u64()?;
        Ok(())
    }
}

fn calc_interface() -> msrpc::Interface {
    InterfaceBuilder::from_syntax(calc_syntax())
        .operation(0, |stub| async move {
            serve_call(stub, AddOp::default(), |mut op| async move {
                op.sum = op.a.wrapping_add(op.b);
                Ok(op)
            })
            .await
        })
        .build()
}

fn clock_interface() -> msrpc::Interface {
    InterfaceBuilder::from_syntax(clock_syntax())
        .operation(0, |stub| async move {
            serve_call(stub, GetTicksOp::default(), |mut op| async move {
                op.ticks = 0x1234_5678_9abc_def0;
                Ok(op)
            })
            .await
        })
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn explicit_bind_succeeds() {
    init_logging();
    let (addr, _server, accept_task) = start_server(calc_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let context_id = conn.bind(calc_syntax()).await.unwrap();
    assert_eq!(context_id, 0);

    // The cached context is reused by a later invoke.
    let client = InterfaceClient::new(conn, calc_syntax());
    let mut op = AddOp {
        a: 40,
        b: 2,
        ..Default::default()
    };
    client.invoke(&mut op, &CallOptions::default()).await.unwrap();
    assert_eq!(op.sum, 42);

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bind_to_unregistered_interface_is_rejected() {
    init_logging();
    let (addr, _server, accept_task) = start_server(calc_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let unknown = SyntaxId::new(Uuid::generate(), 1, 0);
    let err = conn.bind(unknown).await.unwrap_err();
    assert!(matches!(err, RpcError::BindRejected(_)), "got {err}");

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn version_mismatch_is_rejected() {
    init_logging();
    let (addr, _server, accept_task) = start_server(calc_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();

    // Registered major is 1; asking for major 3 must be refused.
    let wrong_major = SyntaxId::new(Uuid::parse(CALC_UUID).unwrap(), 3, 0);
    let err = conn.bind(wrong_major).await.unwrap_err();
    assert!(matches!(err, RpcError::BindRejected(_)), "got {err}");

    // The same connection can still bind the correct version.
    conn.bind(calc_syntax()).await.unwrap();

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_interface_negotiated_via_alter_context() {
    init_logging();
    let server = Arc::new(RpcServer::new());
    server.register_interface(calc_interface());
    server.register_interface(clock_interface());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = server.serve_listener(listener).await;
        })
    };

    let conn = RpcConnection::connect(addr).await.unwrap();
    let calc = InterfaceClient::new(Arc::clone(&conn), calc_syntax());
    let clock = InterfaceClient::new(Arc::clone(&conn), clock_syntax());

    // First invoke binds; the second interface goes through
    // alter-context on the same connection and gets a fresh context id.
    let mut add = AddOp {
        a: 1,
        b: 2,
        ..Default::default()
    };
    calc.invoke(&mut add, &CallOptions::default()).await.unwrap();
    assert_eq!(add.sum, 3);

    let mut ticks = GetTicksOp::default();
    clock.invoke(&mut ticks, &CallOptions::default()).await.unwrap();
    assert_eq!(ticks.ticks, 0x1234_5678_9abc_def0);

    // Both contexts stay usable after the alter-context exchange.
    let mut add2 = AddOp {
        a: -5,
        b: 5,
        ..Default::default()
    };
    calc.invoke(&mut add2, &CallOptions::default()).await.unwrap();
    assert_eq!(add2.sum, 0);

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_stub_operation_round_trips() {
    init_logging();
    let (addr, _server, accept_task) = start_server(clock_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = InterfaceClient::new(conn, clock_syntax());

    let mut op = GetTicksOp::default();
    client.invoke(&mut op, &CallOptions::default()).await.unwrap();
    assert_eq!(op.ticks, 0x1234_5678_9abc_def0);

    accept_task.abort();
}
