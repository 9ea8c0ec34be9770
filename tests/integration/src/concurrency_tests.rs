//! Call multiplexing tests: many calls in flight on one connection,
//! slow handlers not blocking fast ones, and several connections hitting
//! the same server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use msrpc::{
    serve_call, CallOptions, InterfaceBuilder, InterfaceClient, Operation, RpcConnection,
    SyntaxId,
};
use ndr::{NdrReader, NdrWriter, Uuid};

const WORKBENCH_UUID: &str = "9b3f61d2-7c05-4e4a-a9d8-0f5b2c8e6a31";

fn workbench_syntax() -> SyntaxId {
    SyntaxId::new(Uuid::parse(WORKBENCH_UUID).unwrap(), 1, 0)
}

mod opnum {
    pub const SCRAMBLE: u16 = 0;
    pub const SLEEP_MS: u16 = 1;
}

/// `Scramble([in] DWORD seed, [out] DWORD* mixed)`; the handler applies
/// a fixed bijection so every reply can be checked against its request.
#[derive(Default)]
struct ScrambleOp {
    seed: u32,
    mixed: u32,
}

fn scramble(seed: u32) -> u32 {
    seed.wrapping_mul(0x9e37_79b9).rotate_left(13) ^ 0xa5a5_a5a5
}

impl Operation for ScrambleOp {
    fn opnum(&self) -> u16 {
        opnum::SCRAMBLE
    }

    fn opname(&self) -> &'static str {
        "Scramble"
    }

    fn marshal_request(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_u32(self.seed);
        Ok(())
    }

    fn unmarshal_request(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        self.seed = reader.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_u32(self.mixed);
        Ok(())
    }

    fn unmarshal_response(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        self.mixed = reader.read_u32()?;
        Ok(())
    }
}

/// `SleepMs([in] DWORD millis)`: holds the handler for the given time.
#[derive(Default)]
struct SleepOp {
    millis: u32,
}

impl Operation for SleepOp {
    fn opnum(&self) -> u16 {
        opnum::SLEEP_MS
    }

    fn opname(&self) -> &'static str {
        "SleepMs"
    }

    fn marshal_request(&self, writer: &mut NdrWriter) -> ndr::Result<()> {
        writer.write_u32(self.millis);
        Ok(())
    }

    fn unmarshal_request(&mut self, reader: &mut NdrReader) -> ndr::Result<()> {
        self.millis = reader.read_u32()?;
        Ok(())
    }

    fn marshal_response(&self, _writer: &mut NdrWriter) -> ndr::Result<()> {
        Ok(())
    }

    fn unmarshal_response(&mut self, _reader: &mut NdrReader) -> ndr::Result<()> {
        Ok(())
    }
}

fn workbench_interface() -> msrpc::Interface {
    InterfaceBuilder::from_syntax(workbench_syntax())
        .operation(opnum::SCRAMBLE, |stub| async move {
            serve_call(stub, ScrambleOp::default(), |mut op| async move {
                op.mixed = scramble(op.seed);
                Ok(op)
            })
            .await
        })
        .operation(opnum::SLEEP_MS, |stub| async move {
            serve_call(stub, SleepOp::default(), |op| async move {
                tokio::time::sleep(Duration::from_millis(op.millis as u64)).await;
                Ok(op)
            })
            .await
        })
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_calls_in_flight_on_one_connection() {
    init_logging();
    let (addr, _server, accept_task) = start_server(workbench_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = Arc::new(InterfaceClient::new(conn, workbench_syntax()));

    let calls = (0..64u32).map(|seed| {
        let client = Arc::clone(&client);
        async move {
            let mut op = ScrambleOp {
                seed,
                ..Default::default()
            };
            client.invoke(&mut op, &CallOptions::default()).await?;
            Ok::<(u32, u32), msrpc::RpcError>((seed, op.mixed))
        }
    });

    // Each reply is matched to its own request by call id.
    for result in futures::future::join_all(calls).await {
        let (seed, mixed) = result.unwrap();
        assert_eq!(mixed, scramble(seed), "reply crossed calls for seed {seed}");
    }

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_handler_does_not_block_fast_call() {
    init_logging();
    let (addr, _server, accept_task) = start_server(workbench_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = Arc::new(InterfaceClient::new(conn, workbench_syntax()));

    let slow_client = Arc::clone(&client);
    let slow = tokio::spawn(async move {
        let mut op = SleepOp { millis: 800 };
        slow_client.invoke(&mut op, &CallOptions::default()).await
    });

    // Give the slow request a head start on the wire.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let mut fast = ScrambleOp {
        seed: 7,
        ..Default::default()
    };
    client.invoke(&mut fast, &CallOptions::default()).await.unwrap();
    let fast_elapsed = started.elapsed();

    assert_eq!(fast.mixed, scramble(7));
    assert!(
        fast_elapsed < Duration::from_millis(500),
        "fast call waited {fast_elapsed:?} behind the sleeping handler"
    );

    slow.await.unwrap().unwrap();
    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn several_connections_share_one_server() {
    init_logging();
    let (addr, server, accept_task) = start_server(workbench_interface()).await;

    let mut tasks = Vec::new();
    for conn_index in 0..8u32 {
        tasks.push(tokio::spawn(async move {
            let conn = RpcConnection::connect(addr).await.unwrap();
            let client = InterfaceClient::new(conn, workbench_syntax());
            for call_index in 0..16u32 {
                let seed = conn_index * 1000 + call_index;
                let mut op = ScrambleOp {
                    seed,
                    ..Default::default()
                };
                client.invoke(&mut op, &CallOptions::default()).await.unwrap();
                assert_eq!(op.mixed, scramble(seed));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = server.stats();
    assert_eq!(stats.connections_accepted, 8);
    assert_eq!(stats.requests_received, 8 * 16);
    assert_eq!(stats.requests_failed, 0);

    accept_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn call_timeout_fires_and_connection_survives() {
    init_logging();
    let (addr, _server, accept_task) = start_server(workbench_interface()).await;

    let conn = RpcConnection::connect(addr).await.unwrap();
    let client = InterfaceClient::new(conn, workbench_syntax());

    let mut op = SleepOp { millis: 2000 };
    let err = client
        .invoke(&mut op, &CallOptions::default().with_timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, msrpc::RpcError::Timeout));

    // The connection is still usable for further calls.
    let mut check = ScrambleOp {
        seed: 99,
        ..Default::default()
    };
    client.invoke(&mut check, &CallOptions::default()).await.unwrap();
    assert_eq!(check.mixed, scramble(99));

    accept_task.abort();
}
