//! Client side: connection management, binding negotiation, and the
//! typed invoker.
//!
//! An [`RpcConnection`] owns one transport. A background reader task
//! demultiplexes incoming PDUs into a pending-call table keyed by
//! `call_id`, so any number of calls can be in flight concurrently on
//! the same connection. Presentation contexts are negotiated lazily: the
//! first call through an interface binds it (bind PDU for the first
//! interface on the connection, alter-context for every further one) and
//! the negotiated context ID is cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Result, RpcError};
use crate::fragment::{split_request, FragmentAssembler, MAX_ASSEMBLED_STUB};
use crate::operation::{self, Operation};
use crate::pdu::{BindPdu, ContextElement, PacketFlags, Pdu, RequestPdu, SyntaxId};
use crate::transport::PduTransport;
use ndr::Uuid;

const BIND_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overall deadline for the call, from send to decoded response.
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Object UUID routed in the request header (ORPC-style calls).
    pub object_uuid: Option<Uuid>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_object(mut self, object_uuid: Uuid) -> Self {
        self.object_uuid = Some(object_uuid);
        self
    }
}

/// Pending-call table shared with the reader task.
struct Pending {
    state: Mutex<PendingState>,
}

struct PendingState {
    map: HashMap<u32, oneshot::Sender<Result<Pdu>>>,
    closed: bool,
}

impl Pending {
    fn new() -> Self {
        Self {
            state: Mutex::new(PendingState {
                map: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Fails once the reader task has stopped: a sender registered after
    /// that point would never be completed.
    fn register(&self, call_id: u32) -> Result<oneshot::Receiver<Result<Pdu>>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RpcError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        state.map.insert(call_id, tx);
        Ok(rx)
    }

    fn take(&self, call_id: u32) -> Option<oneshot::Sender<Result<Pdu>>> {
        self.state.lock().map.remove(&call_id)
    }

    /// Fail every in-flight call and refuse further registrations.
    fn fail_all(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for (_, tx) in state.map.drain() {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
    }
}

/// Removes the pending entry if the waiter bails out early (timeout,
/// marshaling error) so the table cannot leak abandoned calls.
struct PendingCall<'a> {
    pending: &'a Pending,
    call_id: u32,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.pending.take(self.call_id);
    }
}

struct BindingState {
    contexts: HashMap<SyntaxId, u16>,
    next_context_id: u16,
    bound: bool,
    max_xmit_frag: u16,
}

/// One connection to an RPC endpoint, shareable across tasks.
pub struct RpcConnection {
    writer: tokio::sync::Mutex<PduTransport<OwnedWriteHalf>>,
    pending: Arc<Pending>,
    next_call_id: AtomicU32,
    binding: tokio::sync::Mutex<BindingState>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl RpcConnection {
    /// Connect to `addr` and start the demultiplexing reader task.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an established stream (useful for tests and custom dialing).
    pub fn from_stream(stream: TcpStream) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let pending = Arc::new(Pending::new());
        let reader_task = tokio::spawn(reader_loop(
            PduTransport::new(read_half),
            Arc::clone(&pending),
        ));
        Arc::new(Self {
            writer: tokio::sync::Mutex::new(PduTransport::new(write_half)),
            pending,
            next_call_id: AtomicU32::new(1),
            binding: tokio::sync::Mutex::new(BindingState {
                contexts: HashMap::new(),
                next_context_id: 0,
                bound: false,
                max_xmit_frag: crate::pdu::DEFAULT_MAX_FRAG,
            }),
            reader_task,
        })
    }

    fn next_call_id(&self) -> u32 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `frames` and wait for the correlated reply.
    async fn transact(
        &self,
        frames: Vec<Bytes>,
        call_id: u32,
        timeout: Option<Duration>,
    ) -> Result<Pdu> {
        let rx = self.pending.register(call_id)?;
        let _guard = PendingCall {
            pending: &self.pending,
            call_id,
        };

        {
            let mut writer = self.writer.lock().await;
            for frame in &frames {
                writer.write_raw(frame).await?;
            }
        }

        let reply = match timeout {
            Some(t) => tokio::time::timeout(t, rx)
                .await
                .map_err(|_| RpcError::Timeout)?,
            None => rx.await,
        };
        reply.map_err(|_| RpcError::ConnectionClosed)?
    }

    /// The negotiated context ID for `syntax`, negotiating it first if
    /// this connection has not bound the interface yet.
    async fn context_for(&self, syntax: SyntaxId) -> Result<(u16, u16)> {
        let mut state = self.binding.lock().await;
        if let Some(&context_id) = state.contexts.get(&syntax) {
            return Ok((context_id, state.max_xmit_frag));
        }

        let context_id = state.next_context_id;
        let call_id = self.next_call_id();
        let element = ContextElement::new(context_id, syntax);
        let request = if state.bound {
            BindPdu::alter(call_id, vec![element])
        } else {
            BindPdu::new(call_id, vec![element])
        };

        let reply = self
            .transact(vec![request.encode()], call_id, Some(BIND_TIMEOUT))
            .await?;
        match reply {
            Pdu::BindAck(ack) | Pdu::AlterContextResp(ack) => {
                let result = ack
                    .results
                    .first()
                    .ok_or_else(|| RpcError::BindRejected("empty result list".into()))?;
                if !result.accepted() {
                    return Err(RpcError::BindRejected(format!(
                        "context for {syntax} refused: result={} reason={}",
                        result.result, result.reason
                    )));
                }
                if !state.bound {
                    state.bound = true;
                    state.max_xmit_frag = ack.max_xmit_frag;
                }
                state.contexts.insert(syntax, context_id);
                state.next_context_id += 1;
                debug!(%syntax, context_id, "presentation context negotiated");
                Ok((context_id, state.max_xmit_frag))
            }
            Pdu::BindNak(nak) => Err(RpcError::BindRejected(format!(
                "bind_nak, reason {}",
                nak.reject_reason
            ))),
            Pdu::Fault(fault) => Err(RpcError::Fault {
                status: fault.status,
            }),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    /// Negotiate a presentation context for `syntax` up front. Calls
    /// bind lazily, so this is only needed to surface negotiation
    /// failures early.
    pub async fn bind(&self, syntax: SyntaxId) -> Result<u16> {
        self.context_for(syntax).await.map(|(id, _)| id)
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn reader_loop(mut transport: PduTransport<OwnedReadHalf>, pending: Arc<Pending>) {
    let mut assemblers: HashMap<u32, FragmentAssembler> = HashMap::new();
    loop {
        let pdu = match transport.read().await {
            Ok(pdu) => pdu,
            Err(err) => {
                trace!(%err, "reader task stopping");
                pending.fail_all();
                return;
            }
        };

        let call_id = pdu.call_id();
        let complete = match pdu {
            Pdu::Response(response) => {
                let flags = response.header.packet_flags;
                if flags.contains(PacketFlags::FIRST_FRAG)
                    && flags.contains(PacketFlags::LAST_FRAG)
                {
                    Some(Pdu::Response(response))
                } else {
                    let assembler = assemblers
                        .entry(call_id)
                        .or_insert_with(|| FragmentAssembler::new(call_id, MAX_ASSEMBLED_STUB));
                    match assembler.add_fragment(&response.header, &response.stub_data) {
                        Ok(Some(stub)) => {
                            assemblers.remove(&call_id);
                            let mut full = response;
                            full.header.packet_flags = PacketFlags::complete();
                            full.stub_data = stub;
                            Some(Pdu::Response(full))
                        }
                        Ok(None) => None,
                        Err(err) => {
                            assemblers.remove(&call_id);
                            if let Some(tx) = pending.take(call_id) {
                                let _ = tx.send(Err(err));
                            }
                            None
                        }
                    }
                }
            }
            Pdu::Shutdown(_) => {
                pending.fail_all();
                return;
            }
            other => Some(other),
        };

        if let Some(pdu) = complete {
            match pending.take(call_id) {
                Some(tx) => {
                    let _ = tx.send(Ok(pdu));
                }
                None => warn!(call_id, "reply for unknown call, dropping"),
            }
        }
    }
}

/// Typed client for one interface over a shared connection.
pub struct InterfaceClient {
    conn: Arc<RpcConnection>,
    syntax: SyntaxId,
}

impl InterfaceClient {
    pub fn new(conn: Arc<RpcConnection>, syntax: SyntaxId) -> Self {
        Self { conn, syntax }
    }

    pub fn syntax(&self) -> SyntaxId {
        self.syntax
    }

    pub fn connection(&self) -> &Arc<RpcConnection> {
        &self.conn
    }

    /// Run one operation: marshal its request, send (fragmenting as
    /// needed), wait for the correlated response, unmarshal the outputs
    /// into `op`, and check its return code. Output parameters decoded
    /// before a nonzero return code stay populated in `op`.
    pub async fn invoke(&self, op: &mut dyn Operation, options: &CallOptions) -> Result<()> {
        let (context_id, max_frag) = self.conn.context_for(self.syntax).await?;
        let stub = operation::marshal_request_stub(op)?;
        let call_id = self.conn.next_call_id();
        let request = RequestPdu::new(call_id, context_id, op.opnum(), options.object_uuid, stub);
        let frames: Vec<Bytes> = split_request(&request, max_frag)
            .iter()
            .map(RequestPdu::encode)
            .collect();

        let reply = self.conn.transact(frames, call_id, options.timeout).await?;
        match reply {
            Pdu::Response(response) => {
                operation::unmarshal_response_stub(op, response.stub_data)?;
                operation::check_return_code(op)
            }
            Pdu::Fault(fault) => Err(RpcError::Fault {
                status: fault.status,
            }),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }
}
