//! Server side: interface registry and connection-oriented dispatcher.
//!
//! Handlers are async closures from request stub bytes to response stub
//! bytes, registered per operation number. An [`Interface`] may sit on a
//! base interface: operation numbers below `first_opnum` are delegated
//! down the chain, the way a derived COM-style interface inherits its
//! base's methods.
//!
//! Each accepted connection gets its own task; each complete request is
//! dispatched on a further task so a slow handler never stalls other
//! calls multiplexed on the same connection. No connection-wide lock is
//! held across a handler invocation.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{Result, RpcError};
use crate::fragment::{split_response, FragmentAssembler, MAX_ASSEMBLED_STUB};
use crate::pdu::{
    BindAckPdu, BindPdu, ContextResult, FaultPdu, PacketFlags, Pdu, RequestPdu, ResponsePdu,
    SyntaxId, DEFAULT_MAX_FRAG, NDR_TRANSFER_SYNTAX, REASON_ABSTRACT_SYNTAX_NOT_SUPPORTED,
    REASON_TRANSFER_SYNTAXES_NOT_SUPPORTED,
};
use crate::status::FaultStatus;
use crate::transport::{PduTransport, DEFAULT_MAX_PDU_SIZE};
use ndr::Uuid;

/// Async handler for one operation: request stub in, response stub out.
pub type OperationHandler = Arc<
    dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send>> + Send + Sync,
>;

/// A registered interface: its syntax, its operation handlers, and
/// optionally the base interface it extends.
pub struct Interface {
    syntax: SyntaxId,
    first_opnum: u16,
    base: Option<Arc<Interface>>,
    operations: HashMap<u16, OperationHandler>,
}

impl Interface {
    pub fn new(syntax: SyntaxId) -> Self {
        Self {
            syntax,
            first_opnum: 0,
            base: None,
            operations: HashMap::new(),
        }
    }

    /// Extend `base`: operation numbers below `first_opnum` are routed
    /// to it.
    pub fn extending(syntax: SyntaxId, first_opnum: u16, base: Interface) -> Self {
        Self {
            syntax,
            first_opnum,
            base: Some(Arc::new(base)),
            operations: HashMap::new(),
        }
    }

    pub fn syntax(&self) -> SyntaxId {
        self.syntax
    }

    pub fn register_operation<F, Fut>(&mut self, opnum: u16, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        debug_assert!(
            opnum >= self.first_opnum,
            "opnum {opnum} belongs to the base interface"
        );
        self.operations
            .insert(opnum, Arc::new(move |stub| Box::pin(handler(stub))));
    }

    /// Find the handler for `opnum`, walking down the base chain for
    /// inherited operation numbers.
    fn resolve(&self, opnum: u16) -> Result<OperationHandler> {
        if opnum < self.first_opnum {
            return match &self.base {
                Some(base) => base.resolve(opnum),
                None => Err(RpcError::NotImplemented { opnum }),
            };
        }
        self.operations
            .get(&opnum)
            .cloned()
            .ok_or(RpcError::NotImplemented { opnum })
    }
}

/// Fluent construction of an [`Interface`].
pub struct InterfaceBuilder {
    interface: Interface,
}

impl InterfaceBuilder {
    pub fn new(uuid: &str, major: u16, minor: u16) -> Result<Self> {
        let uuid = Uuid::parse(uuid).map_err(|_| RpcError::InvalidUuid(uuid.to_string()))?;
        Ok(Self::from_syntax(SyntaxId::new(uuid, major, minor)))
    }

    pub fn from_syntax(syntax: SyntaxId) -> Self {
        Self {
            interface: Interface::new(syntax),
        }
    }

    /// Make the interface under construction extend `base` from
    /// `first_opnum` upward.
    pub fn extending(mut self, first_opnum: u16, base: Interface) -> Self {
        self.interface.first_opnum = first_opnum;
        self.interface.base = Some(Arc::new(base));
        self
    }

    pub fn operation<F, Fut>(mut self, opnum: u16, handler: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.interface.register_operation(opnum, handler);
        self
    }

    pub fn build(self) -> Interface {
        self.interface
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_pdu_size: usize,
    pub max_connections: usize,
    pub max_frag: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            max_connections: 1024,
            max_frag: DEFAULT_MAX_FRAG,
        }
    }
}

#[derive(Default)]
struct ServerStats {
    connections_accepted: AtomicU64,
    connections_active: AtomicU64,
    requests_received: AtomicU64,
    requests_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub requests_received: u64,
    pub requests_failed: u64,
}

/// Connection-oriented RPC server.
pub struct RpcServer {
    config: ServerConfig,
    interfaces: RwLock<HashMap<Uuid, Arc<Interface>>>,
    stats: Arc<ServerStats>,
    assoc_groups: AtomicU32,
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            interfaces: RwLock::new(HashMap::new()),
            stats: Arc::new(ServerStats::default()),
            assoc_groups: AtomicU32::new(1),
        }
    }

    /// Register an interface. Later registrations with the same UUID
    /// replace earlier ones.
    pub fn register_interface(&self, interface: Interface) {
        let syntax = interface.syntax();
        info!(%syntax, "interface registered");
        self.interfaces
            .write()
            .insert(syntax.uuid, Arc::new(interface));
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.stats.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.stats.connections_active.load(Ordering::Relaxed),
            requests_received: self.stats.requests_received.load(Ordering::Relaxed),
            requests_failed: self.stats.requests_failed.load(Ordering::Relaxed),
        }
    }

    /// Bind `addr` and serve until the listener fails.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve until `shutdown` resolves, then stop accepting.
    pub async fn run_until<F>(self: Arc<Self>, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(addr).await?;
        tokio::select! {
            biased;
            _ = shutdown => {
                info!("shutdown requested, no longer accepting");
                Ok(())
            }
            result = Arc::clone(&self).serve_listener(listener) => result,
        }
    }

    /// Accept loop over an already bound listener.
    pub async fn serve_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let limiter = Arc::new(Semaphore::new(self.config.max_connections));
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "rpc server listening");
        }
        loop {
            let (stream, peer) = listener.accept().await?;
            let permit = match Arc::clone(&limiter).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(%peer, "connection limit reached, refusing");
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);

            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = Arc::clone(&server).handle_connection(stream).await {
                    debug!(%peer, %err, "connection ended with error");
                }
                server
                    .stats
                    .connections_active
                    .fetch_sub(1, Ordering::Relaxed);
                drop(permit);
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = PduTransport::with_limit(read_half, self.config.max_pdu_size);
        let writer = Arc::new(tokio::sync::Mutex::new(PduTransport::new(write_half)));

        // Presentation contexts negotiated on this connection.
        let mut contexts: HashMap<u16, Uuid> = HashMap::new();
        let mut assemblers: HashMap<u32, FragmentAssembler> = HashMap::new();
        let mut max_frag = self.config.max_frag;

        loop {
            let pdu = match reader.read().await {
                Ok(pdu) => pdu,
                Err(RpcError::ConnectionClosed) => return Ok(()),
                Err(err) => return Err(err),
            };

            match pdu {
                Pdu::Bind(bind) | Pdu::AlterContext(bind) => {
                    let ack = self.negotiate(&bind, &mut contexts, &mut max_frag);
                    writer.lock().await.write_raw(&ack.encode()).await?;
                }
                Pdu::Request(request) => {
                    self.stats.requests_received.fetch_add(1, Ordering::Relaxed);
                    let call_id = request.header.call_id;
                    let flags = request.header.packet_flags;

                    let complete = if flags.contains(PacketFlags::FIRST_FRAG)
                        && flags.contains(PacketFlags::LAST_FRAG)
                    {
                        Some(request)
                    } else {
                        let assembler = assemblers.entry(call_id).or_insert_with(|| {
                            FragmentAssembler::new(call_id, MAX_ASSEMBLED_STUB)
                        });
                        match assembler.add_fragment(&request.header, &request.stub_data) {
                            Ok(Some(stub)) => {
                                assemblers.remove(&call_id);
                                let mut full = request;
                                full.header.packet_flags.insert(
                                    PacketFlags::FIRST_FRAG | PacketFlags::LAST_FRAG,
                                );
                                full.stub_data = stub;
                                Some(full)
                            }
                            Ok(None) => None,
                            Err(err) => {
                                assemblers.remove(&call_id);
                                warn!(call_id, %err, "request reassembly failed");
                                self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                                send_fault(
                                    &writer,
                                    call_id,
                                    request.context_id,
                                    FaultStatus::ProtocolError,
                                )
                                .await;
                                None
                            }
                        }
                    };

                    if let Some(request) = complete {
                        self.dispatch(request, &contexts, max_frag, Arc::clone(&writer));
                    }
                }
                Pdu::Shutdown(_) => return Ok(()),
                other => {
                    warn!(packet_type = ?other.header().packet_type, "unexpected pdu from client");
                    send_fault(&writer, other.call_id(), 0, FaultStatus::ProtocolError).await;
                }
            }
        }
    }

    /// Evaluate every proposed context and build the (alter-)bind ack.
    fn negotiate(
        &self,
        bind: &BindPdu,
        contexts: &mut HashMap<u16, Uuid>,
        max_frag: &mut u16,
    ) -> BindAckPdu {
        let interfaces = self.interfaces.read();
        let mut results = Vec::with_capacity(bind.context_list.len());
        for element in &bind.context_list {
            let speaks_ndr = element
                .transfer_syntaxes
                .iter()
                .any(|ts| *ts == NDR_TRANSFER_SYNTAX);
            if !speaks_ndr {
                results.push(ContextResult::provider_rejection(
                    REASON_TRANSFER_SYNTAXES_NOT_SUPPORTED,
                ));
                continue;
            }

            let known = interfaces
                .get(&element.abstract_syntax.uuid)
                .map(|ifc| compatible(ifc.syntax(), element.abstract_syntax))
                .unwrap_or(false);
            if known {
                contexts.insert(element.context_id, element.abstract_syntax.uuid);
                results.push(ContextResult::acceptance());
                debug!(
                    context_id = element.context_id,
                    syntax = %element.abstract_syntax,
                    "presentation context accepted"
                );
            } else {
                results.push(ContextResult::provider_rejection(
                    REASON_ABSTRACT_SYNTAX_NOT_SUPPORTED,
                ));
            }
        }

        *max_frag = (*max_frag).min(bind.max_recv_frag);
        let assoc_group_id = if bind.assoc_group_id != 0 {
            bind.assoc_group_id
        } else {
            self.assoc_groups.fetch_add(1, Ordering::Relaxed)
        };
        BindAckPdu::respond_to(
            bind,
            assoc_group_id,
            String::new(),
            results,
            self.config.max_frag,
        )
    }

    /// Route one complete request to its handler on a fresh task.
    fn dispatch(
        &self,
        request: RequestPdu,
        contexts: &HashMap<u16, Uuid>,
        max_frag: u16,
        writer: Arc<tokio::sync::Mutex<PduTransport<OwnedWriteHalf>>>,
    ) {
        let call_id = request.header.call_id;
        let context_id = request.context_id;

        let resolved: std::result::Result<OperationHandler, FaultStatus> =
            match contexts.get(&context_id) {
                None => Err(FaultStatus::ContextMismatch),
                Some(uuid) => match self.interfaces.read().get(uuid) {
                    None => Err(FaultStatus::UnknownInterface),
                    Some(interface) => interface
                        .resolve(request.opnum)
                        .map_err(|_| FaultStatus::OpRngError),
                },
            };

        let handler = match resolved {
            Ok(handler) => handler,
            Err(status) => {
                debug!(call_id, opnum = request.opnum, %status, "request refused");
                self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(async move {
                    send_fault(&writer, call_id, context_id, status).await;
                });
                return;
            }
        };

        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            match handler(request.stub_data).await {
                Ok(stub) => {
                    let response = ResponsePdu::new(call_id, context_id, stub);
                    let mut w = writer.lock().await;
                    for frag in split_response(&response, max_frag) {
                        if let Err(err) = w.write_raw(&frag.encode()).await {
                            debug!(call_id, %err, "failed to write response");
                            return;
                        }
                    }
                }
                Err(err) => {
                    stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                    let status = match &err {
                        RpcError::NotImplemented { .. } => FaultStatus::OpRngError,
                        RpcError::ContextMismatch => FaultStatus::ContextMismatch,
                        RpcError::Unsupported(_) | RpcError::MalformedPdu(_) => {
                            FaultStatus::ProtocolError
                        }
                        _ => FaultStatus::RpcError,
                    };
                    debug!(call_id, %err, %status, "handler failed, sending fault");
                    send_fault(&writer, call_id, context_id, status).await;
                }
            }
        });
    }
}

async fn send_fault(
    writer: &Arc<tokio::sync::Mutex<PduTransport<OwnedWriteHalf>>>,
    call_id: u32,
    context_id: u16,
    status: FaultStatus,
) {
    let fault = FaultPdu::new(call_id, context_id, status);
    if let Err(err) = writer.lock().await.write_raw(&fault.encode()).await {
        debug!(call_id, %err, "failed to write fault");
    }
}

/// A registered interface satisfies a requested one when the UUID and
/// major version match and the registered minor version is at least the
/// requested one.
fn compatible(registered: SyntaxId, requested: SyntaxId) -> bool {
    registered.uuid == requested.uuid
        && registered.major() == requested.major()
        && registered.minor() >= requested.minor()
}
