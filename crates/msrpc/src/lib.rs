//! Connection-oriented DCE/RPC runtime.
//!
//! This crate carries a call from a typed client stub to a registered
//! server handler and back: PDU encoding and framing, fragmentation of
//! large stubs, presentation-context negotiation (bind and
//! alter-context), a multiplexing client invoker, and a concurrent
//! server dispatcher. Parameter marshaling itself lives in the `ndr`
//! crate; this one moves the marshaled octets.
//!
//! Client side:
//!
//! ```no_run
//! use msrpc::{CallOptions, InterfaceClient, RpcConnection, SyntaxId};
//! use ndr::Uuid;
//!
//! # async fn example(mut op: impl msrpc::Operation) -> msrpc::Result<()> {
//! let conn = RpcConnection::connect("127.0.0.1:4050").await?;
//! let syntax = SyntaxId::new(Uuid::parse("e3514235-4b06-11d1-ab04-00c04fc2dcd2")?, 4, 0);
//! let client = InterfaceClient::new(conn, syntax);
//! // First invoke binds the interface automatically.
//! client.invoke(&mut op, &CallOptions::default()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Server side:
//!
//! ```no_run
//! use std::sync::Arc;
//! use msrpc::{InterfaceBuilder, RpcServer};
//!
//! # async fn example() -> msrpc::Result<()> {
//! let interface = InterfaceBuilder::new("e3514235-4b06-11d1-ab04-00c04fc2dcd2", 4, 0)?
//!     .operation(0, |stub| async move { Ok(stub) })
//!     .build();
//! let server = Arc::new(RpcServer::new());
//! server.register_interface(interface);
//! server.run("0.0.0.0:4050".parse().unwrap()).await
//! # }
//! ```

pub mod client;
pub mod error;
pub mod fragment;
pub mod operation;
pub mod orpc;
pub mod pdu;
pub mod server;
pub mod status;
pub mod transport;
pub mod types;

pub use client::{CallOptions, InterfaceClient, RpcConnection};
pub use error::{Result, RpcError};
pub use operation::{
    marshal_request_stub, marshal_response_stub, serve_call, unmarshal_request_stub,
    unmarshal_response_stub, Operation,
};
pub use orpc::{ComVersion, OrpcThat, OrpcThis};
pub use pdu::{
    BindAckPdu, BindPdu, ContextElement, ContextResult, DataRep, FaultPdu, PacketFlags,
    PacketType, Pdu, PduHeader, RequestPdu, ResponsePdu, SyntaxId, DEFAULT_MAX_FRAG,
    NDR_TRANSFER_SYNTAX,
};
pub use server::{
    Interface, InterfaceBuilder, OperationHandler, RpcServer, ServerConfig, StatsSnapshot,
};
pub use status::{describe_status, FaultStatus};
pub use transport::PduTransport;
pub use types::{Iid, Ipid};
