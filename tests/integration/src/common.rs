//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use msrpc::{Interface, RpcServer, ServerConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Initialize tracing once per test binary; `RUST_LOG` controls the
/// filter.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Start a server for `interface` on a random loopback port.
pub async fn start_server(
    interface: Interface,
) -> (SocketAddr, Arc<RpcServer>, JoinHandle<()>) {
    start_server_with_config(interface, ServerConfig::default()).await
}

pub async fn start_server_with_config(
    interface: Interface,
    config: ServerConfig,
) -> (SocketAddr, Arc<RpcServer>, JoinHandle<()>) {
    let server = Arc::new(RpcServer::with_config(config));
    server.register_interface(interface);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = server.serve_listener(listener).await;
        })
    };
    (addr, server, accept_task)
}

/// Simple rolling checksum for corruption checks on large transfers.
pub fn compute_checksum(data: &[u8]) -> u64 {
    data.iter()
        .fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

/// Deterministic pattern payload.
pub fn pattern(len: usize) -> bytes::Bytes {
    (0..len)
        .map(|i| (i % 251) as u8)
        .collect::<Vec<_>>()
        .into()
}
