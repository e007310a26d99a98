//! Modbus slave (server) implementations
//!
//! [`ModbusTcpServer`] is the TCP listener: it binds with a configurable
//! backlog, accepts connections into a bounded worker pool and runs one
//! framer loop per connection against the shared
//! [`ModbusHandler`](crate::handler::ModbusHandler). Pool admission happens
//! *before* `accept`, so a saturated pool stops accepting — that is the
//! intended back-pressure against connection floods, with the listen backlog
//! as the second line of defense.
//!
//! [`ModbusUdpServer`] is the datagram slave: a receiver task reads requests
//! and remembers each sender keyed by transaction id, a sender task delivers
//! prepared responses to the remembered address. Entries expire after a TTL
//! so responses that never materialize cannot leak the map.
//!
//! Listener lifecycle: `New → Listening → Stopping → Stopped`, with
//! `Failed` on bind errors. `stop()` flips the state, wakes the accept loop
//! and joins it; in-flight handlers finish their current response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::constants::{
    DEFAULT_BACKLOG, DEFAULT_POOL_SIZE, DEFAULT_TIMEOUT_MS, MAX_RTU_ADU_SIZE, MBAP_HEADER_LEN,
    UDP_RECEIVE_BUFFER_SIZE,
};
use crate::error::{ModbusError, ModbusResult};
use crate::framing::{self, PduLength};
use crate::handler::ModbusHandler;

/// Listener lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    New,
    Listening,
    Stopping,
    Stopped,
    Failed,
}

/// Server-side counters, updated across handler tasks.
#[derive(Debug, Default)]
struct ServerCounters {
    connections: AtomicU64,
    requests: AtomicU64,
    responses: AtomicU64,
    exceptions: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of the server counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections: u64,
    pub requests: u64,
    pub responses: u64,
    pub exceptions: u64,
    pub dropped: u64,
}

impl ServerCounters {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            connections: self.connections.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Common lifecycle surface of the slave listeners.
#[async_trait]
pub trait ModbusServer: Send {
    /// Bind and start serving.
    async fn start(&mut self) -> ModbusResult<()>;

    /// Stop serving: wake the accept loop, join the tasks.
    async fn stop(&mut self) -> ModbusResult<()>;

    /// Current lifecycle state.
    fn state(&self) -> ListenerState;

    /// Whether the listener is accepting work.
    fn is_running(&self) -> bool {
        self.state() == ListenerState::Listening
    }

    /// Server statistics.
    fn get_stats(&self) -> ServerStats;
}

// ============================================================================
// TCP listener
// ============================================================================

/// Modbus TCP listener configuration.
#[derive(Debug, Clone)]
pub struct ModbusTcpServerConfig {
    /// Address to bind; port 0 picks an ephemeral port.
    pub bind_address: SocketAddr,
    /// Worker pool size: maximum concurrently served connections.
    pub pool_size: usize,
    /// Listen backlog (flood protection).
    pub backlog: u32,
    /// Close a connection after this many seconds without traffic;
    /// 0 disables the watchdog.
    pub max_idle_seconds: u64,
    /// Per-read timeout while a request is mid-frame.
    pub request_timeout: Duration,
    /// Serve RTU-framed PDUs on the stream instead of MBAP.
    pub rtu_over_tcp: bool,
}

impl Default for ModbusTcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:502".parse().unwrap(),
            pool_size: DEFAULT_POOL_SIZE,
            backlog: DEFAULT_BACKLOG,
            max_idle_seconds: 0,
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            rtu_over_tcp: false,
        }
    }
}

/// Modbus TCP slave listener.
pub struct ModbusTcpServer {
    config: ModbusTcpServerConfig,
    handler: Arc<ModbusHandler>,
    state: Arc<Mutex<ListenerState>>,
    /// Bind error detail once `Failed`.
    error: Arc<Mutex<Option<String>>>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<broadcast::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
    counters: Arc<ServerCounters>,
}

impl ModbusTcpServer {
    /// Create a listener over `handler` with `config`.
    pub fn new(config: ModbusTcpServerConfig, handler: Arc<ModbusHandler>) -> Self {
        Self {
            config,
            handler,
            state: Arc::new(Mutex::new(ListenerState::New)),
            error: Arc::new(Mutex::new(None)),
            local_addr: None,
            shutdown: None,
            accept_task: None,
            counters: Arc::new(ServerCounters::default()),
        }
    }

    /// The actually bound address (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind error detail once the state is `Failed`.
    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, state: ListenerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn bind_listener(&self) -> ModbusResult<tokio::net::TcpListener> {
        let socket = if self.config.bind_address.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| ModbusError::connection(format!("socket creation failed: {}", e)))?;
        socket.set_reuseaddr(true).ok();
        socket.bind(self.config.bind_address).map_err(|e| {
            ModbusError::connection(format!("bind {} failed: {}", self.config.bind_address, e))
        })?;
        socket.listen(self.config.backlog).map_err(|e| {
            ModbusError::connection(format!("listen on {} failed: {}", self.config.bind_address, e))
        })
    }
}

#[async_trait]
impl ModbusServer for ModbusTcpServer {
    async fn start(&mut self) -> ModbusResult<()> {
        if self.is_running() {
            return Err(ModbusError::protocol("listener already running"));
        }

        let listener = match self.bind_listener() {
            Ok(listener) => listener,
            Err(e) => {
                *self.error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
                self.set_state(ListenerState::Failed);
                return Err(e);
            }
        };
        self.local_addr = listener.local_addr().ok();
        info!(
            "modbus tcp listener on {} (pool {}, backlog {})",
            self.local_addr.unwrap_or(self.config.bind_address),
            self.config.pool_size,
            self.config.backlog
        );

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown = Some(shutdown_tx.clone());
        self.set_state(ListenerState::Listening);

        let handler = self.handler.clone();
        let counters = self.counters.clone();
        let config = self.config.clone();
        let pool = Arc::new(Semaphore::new(config.pool_size.max(1)));

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                // Take a worker slot first: a full pool blocks the accept
                // loop, pushing excess connections onto the kernel backlog.
                let permit = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    permit = pool.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let (stream, peer) = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    },
                };

                debug!("connection from {}", peer);
                counters.connections.fetch_add(1, Ordering::Relaxed);
                let handler = handler.clone();
                let counters = counters.clone();
                let config = config.clone();
                let shutdown = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    let _permit = permit;
                    handle_tcp_connection(stream, peer, handler, counters, config, shutdown)
                        .await;
                });
            }
            debug!("accept loop finished");
        }));
        Ok(())
    }

    async fn stop(&mut self) -> ModbusResult<()> {
        self.set_state(ListenerState::Stopping);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        self.set_state(ListenerState::Stopped);
        info!("modbus tcp listener stopped");
        Ok(())
    }

    fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get_stats(&self) -> ServerStats {
        self.counters.snapshot()
    }
}

/// Read with the idle watchdog applied when configured.
async fn read_exact_idle(
    stream: &mut TcpStream,
    buf: &mut [u8],
    idle: Option<Duration>,
) -> ModbusResult<()> {
    match idle {
        Some(limit) => match timeout(limit, stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ModbusError::timeout(
                "idle watchdog",
                limit.as_millis() as u64,
            )),
        },
        None => {
            stream.read_exact(buf).await?;
            Ok(())
        }
    }
}

/// Read one RTU-framed request from a stream socket, sizing the frame with
/// the per-function length tables.
async fn read_rtu_request(
    stream: &mut TcpStream,
    first_deadline: Option<Duration>,
    rest_deadline: Duration,
) -> ModbusResult<(u8, Vec<u8>)> {
    let mut adu: Vec<u8> = Vec::with_capacity(8);
    let mut byte = [0u8; 1];

    // First byte waits for the idle watchdog; the rest of the frame is
    // bounded by the request timeout.
    read_exact_idle(stream, &mut byte, first_deadline).await?;
    adu.push(byte[0]);

    loop {
        match framing::request_pdu_len(&adu)? {
            PduLength::Known(pdu_len) => {
                let total = 1 + pdu_len + 2;
                if adu.len() < total {
                    let mut rest = vec![0u8; total - adu.len()];
                    read_exact_idle(stream, &mut rest, Some(rest_deadline)).await?;
                    adu.extend_from_slice(&rest);
                }
                adu.truncate(total);
                return framing::decode_rtu(&adu);
            }
            PduLength::Partial => {
                read_exact_idle(stream, &mut byte, Some(rest_deadline)).await?;
                adu.push(byte[0]);
                if adu.len() > MAX_RTU_ADU_SIZE {
                    return Err(ModbusError::protocol("frame exceeds maximum ADU size"));
                }
            }
            PduLength::Variable => {
                return Err(ModbusError::protocol(
                    "variable-length request framing not derivable",
                ));
            }
        }
    }
}

/// Per-connection framer loop: read request, dispatch, write response.
async fn handle_tcp_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<ModbusHandler>,
    counters: Arc<ServerCounters>,
    config: ModbusTcpServerConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let idle = (config.max_idle_seconds > 0)
        .then(|| Duration::from_secs(config.max_idle_seconds));

    loop {
        // (transaction id, unit id, request pdu)
        let frame: ModbusResult<(u16, u8, Vec<u8>)> = if config.rtu_over_tcp {
            tokio::select! {
                _ = shutdown.recv() => break,
                frame = read_rtu_request(&mut stream, idle, config.request_timeout) => {
                    frame.map(|(unit_id, pdu)| (0, unit_id, pdu))
                }
            }
        } else {
            let mut header = [0u8; MBAP_HEADER_LEN];
            let header_read = tokio::select! {
                _ = shutdown.recv() => break,
                result = read_exact_idle(&mut stream, &mut header, idle) => result,
            };
            match header_read {
                Ok(()) => match framing::MbapHeader::parse(&header) {
                    Ok(parsed) => {
                        let mut body = vec![0u8; parsed.length as usize];
                        match read_exact_idle(
                            &mut stream,
                            &mut body,
                            Some(config.request_timeout),
                        )
                        .await
                        {
                            Ok(()) => Ok((parsed.transaction_id, body[0], body[1..].to_vec())),
                            Err(e) => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        };

        let (transaction_id, unit_id, pdu) = match frame {
            Ok(frame) => frame,
            Err(ModbusError::Timeout { operation, .. }) if operation == "idle watchdog" => {
                info!("closing idle connection from {}", peer);
                break;
            }
            Err(e) => {
                debug!("closing connection from {}: {}", peer, e);
                break;
            }
        };

        counters.requests.fetch_add(1, Ordering::Relaxed);
        match handler.handle_pdu(unit_id, &pdu) {
            Ok(Some(response_pdu)) => {
                if response_pdu.first().map(|fc| fc & 0x80 != 0).unwrap_or(false) {
                    counters.exceptions.fetch_add(1, Ordering::Relaxed);
                }
                let response = if config.rtu_over_tcp {
                    framing::encode_rtu(unit_id, &response_pdu)
                } else {
                    framing::encode_mbap(transaction_id, unit_id, &response_pdu)
                };
                if let Err(e) = stream.write_all(&response).await {
                    debug!("write to {} failed: {}", peer, e);
                    break;
                }
                counters.responses.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!("malformed frame from {}: {}", peer, e);
                break;
            }
        }
    }
    debug!("connection handler for {} finished", peer);
}

// ============================================================================
// UDP slave terminal
// ============================================================================

/// How long a remembered request may wait for its response before the entry
/// is swept.
const UDP_PENDING_TTL: Duration = Duration::from_secs(60);

/// Modbus UDP slave endpoint.
///
/// Two cooperating tasks share the bound socket: the receiver reads
/// datagrams, remembers each sender keyed by transaction id and dispatches
/// the request; the sender pulls prepared responses off a bounded queue and
/// delivers them to the remembered address. A response whose transaction id
/// has no remembered sender is dropped.
pub struct ModbusUdpServer {
    bind_address: SocketAddr,
    handler: Arc<ModbusHandler>,
    state: Arc<Mutex<ListenerState>>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<broadcast::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
    counters: Arc<ServerCounters>,
}

type PendingMap = Arc<Mutex<HashMap<u16, (SocketAddr, Instant)>>>;

impl ModbusUdpServer {
    /// Create a UDP slave bound to `bind_address` on start.
    pub fn new(bind_address: SocketAddr, handler: Arc<ModbusHandler>) -> Self {
        Self {
            bind_address,
            handler,
            state: Arc::new(Mutex::new(ListenerState::New)),
            local_addr: None,
            shutdown: None,
            tasks: Vec::new(),
            counters: Arc::new(ServerCounters::default()),
        }
    }

    /// The actually bound address (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn set_state(&self, state: ListenerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Drop pending entries older than the TTL. Runs opportunistically in the
    /// receiver so an unanswered request cannot leak its entry forever.
    fn sweep_pending(pending: &PendingMap) {
        let now = Instant::now();
        pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, (_, inserted)| now.duration_since(*inserted) < UDP_PENDING_TTL);
    }
}

#[async_trait]
impl ModbusServer for ModbusUdpServer {
    async fn start(&mut self) -> ModbusResult<()> {
        if self.is_running() {
            return Err(ModbusError::protocol("listener already running"));
        }

        let socket = match UdpSocket::bind(self.bind_address).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                self.set_state(ListenerState::Failed);
                return Err(ModbusError::connection(format!(
                    "bind {} failed: {}",
                    self.bind_address, e
                )));
            }
        };
        self.local_addr = socket.local_addr().ok();
        info!(
            "modbus udp slave on {}",
            self.local_addr.unwrap_or(self.bind_address)
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown = Some(shutdown_tx.clone());
        self.set_state(ListenerState::Listening);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (send_tx, mut send_rx) = mpsc::channel::<(u16, u8, Vec<u8>)>(32);

        // Sender: deliver prepared responses to the remembered peer.
        let sender_socket = socket.clone();
        let sender_pending = pending.clone();
        let sender_counters = self.counters.clone();
        let mut sender_shutdown = shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            loop {
                let (transaction_id, unit_id, response_pdu) = tokio::select! {
                    _ = sender_shutdown.recv() => break,
                    queued = send_rx.recv() => match queued {
                        Some(entry) => entry,
                        None => break,
                    },
                };
                let peer = sender_pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&transaction_id)
                    .map(|(addr, _)| addr);
                match peer {
                    Some(addr) => {
                        let frame = framing::encode_mbap(transaction_id, unit_id, &response_pdu);
                        if let Err(e) = sender_socket.send_to(&frame, addr).await {
                            error!("udp send to {} failed: {}", addr, e);
                        } else {
                            sender_counters.responses.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    None => {
                        warn!(
                            "dropping response with unremembered transaction id {}",
                            transaction_id
                        );
                        sender_counters.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));

        // Receiver: intentionally untimed; shutdown wakes it via select.
        let handler = self.handler.clone();
        let counters = self.counters.clone();
        let mut receiver_shutdown = shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            let mut buffer = [0u8; UDP_RECEIVE_BUFFER_SIZE];
            loop {
                let (received, peer) = tokio::select! {
                    _ = receiver_shutdown.recv() => break,
                    result = socket.recv_from(&mut buffer) => match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("udp receive failed: {}", e);
                            continue;
                        }
                    },
                };
                counters.requests.fetch_add(1, Ordering::Relaxed);
                Self::sweep_pending(&pending);

                let (transaction_id, unit_id, pdu) = match framing::decode_mbap(&buffer[..received])
                {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("dropping malformed datagram from {}: {}", peer, e);
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };

                // Exactly one record per in-flight transaction id.
                pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(transaction_id, (peer, Instant::now()));

                match handler.handle_pdu(unit_id, &pdu) {
                    Ok(Some(response_pdu)) => {
                        if response_pdu.first().map(|fc| fc & 0x80 != 0).unwrap_or(false) {
                            counters.exceptions.fetch_add(1, Ordering::Relaxed);
                        }
                        if send_tx
                            .send((transaction_id, unit_id, response_pdu))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        // No response will be produced; forget the sender.
                        pending
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .remove(&transaction_id);
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> ModbusResult<()> {
        self.set_state(ListenerState::Stopping);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.set_state(ListenerState::Stopped);
        info!("modbus udp slave stopped");
        Ok(())
    }

    fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get_stats(&self) -> ServerStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{ProcessImage, UnitImage};

    fn test_handler() -> Arc<ModbusHandler> {
        let mut image = ProcessImage::new();
        let unit = image.add_unit(1, UnitImage::new(16, 16, 8, 8));
        unit.set_holding(0, 0x000A).unwrap();
        unit.set_holding(1, 0x000B).unwrap();
        unit.set_holding(2, 0x000C).unwrap();
        Arc::new(ModbusHandler::new(Arc::new(image)))
    }

    fn tcp_config(port: u16) -> ModbusTcpServerConfig {
        ModbusTcpServerConfig {
            bind_address: format!("127.0.0.1:{}", port).parse().unwrap(),
            ..Default::default()
        }
    }

    async fn started_tcp_server(config: ModbusTcpServerConfig) -> ModbusTcpServer {
        let mut server = ModbusTcpServer::new(config, test_handler());
        server.start().await.unwrap();
        server
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let mut server = ModbusTcpServer::new(tcp_config(0), test_handler());
        assert_eq!(server.state(), ListenerState::New);

        server.start().await.unwrap();
        assert_eq!(server.state(), ListenerState::Listening);
        assert!(server.is_running());

        server.stop().await.unwrap();
        assert_eq!(server.state(), ListenerState::Stopped);
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_bind_failure_sets_failed() {
        let mut first = started_tcp_server(tcp_config(0)).await;
        let occupied = first.local_addr().unwrap();

        let mut second = ModbusTcpServer::new(
            ModbusTcpServerConfig {
                bind_address: occupied,
                ..Default::default()
            },
            test_handler(),
        );
        assert!(second.start().await.is_err());
        assert_eq!(second.state(), ListenerState::Failed);
        assert!(second.error().is_some());

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_mbap_request_response() {
        let mut server = started_tcp_server(tcp_config(0)).await;
        let addr = server.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = framing::encode_mbap(0x0001, 1, &[0x03, 0x00, 0x00, 0x00, 0x03]);
        client.write_all(&request).await.unwrap();

        let mut response = vec![0u8; 15];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(
            response,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x01, 0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B,
                 0x00, 0x0C]
        );

        let stats = server.get_stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.responses, 1);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_function_answered_with_exception() {
        let mut server = started_tcp_server(tcp_config(0)).await;
        let addr = server.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = framing::encode_mbap(7, 1, &[0x63, 0x00, 0x00]);
        client.write_all(&request).await.unwrap();

        let mut response = vec![0u8; 9];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(&response[6..], &[0x01, 0xE3, 0x01]);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unserved_unit_gets_no_reply() {
        let mut server = started_tcp_server(tcp_config(0)).await;
        let addr = server.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = framing::encode_mbap(7, 42, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        client.write_all(&request).await.unwrap();

        let mut byte = [0u8; 1];
        let read = timeout(Duration::from_millis(300), client.read_exact(&mut byte)).await;
        assert!(read.is_err(), "unserved unit must stay silent");
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_watchdog_closes_connection() {
        let mut server = started_tcp_server(ModbusTcpServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            max_idle_seconds: 1,
            ..Default::default()
        })
        .await;
        let addr = server.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let started = Instant::now();
        let mut byte = [0u8; 1];
        // The server closes the idle socket; the client observes EOF.
        let result = timeout(Duration::from_secs(3), client.read(&mut byte)).await;
        let elapsed = started.elapsed();
        assert_eq!(result.unwrap().unwrap(), 0, "expected EOF from watchdog");
        assert!(elapsed >= Duration::from_millis(950), "closed too early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "closed too late: {:?}", elapsed);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rtu_over_tcp_server() {
        let mut server = started_tcp_server(ModbusTcpServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            rtu_over_tcp: true,
            ..Default::default()
        })
        .await;
        let addr = server.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = framing::encode_rtu(1, &[0x03, 0x00, 0x00, 0x00, 0x02]);
        client.write_all(&request).await.unwrap();

        // unit + fc + count + 4 data bytes + crc
        let mut response = vec![0u8; 9];
        client.read_exact(&mut response).await.unwrap();
        let (unit, pdu) = framing::decode_rtu(&response).unwrap();
        assert_eq!(unit, 1);
        assert_eq!(pdu, vec![0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B]);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_pool_saturation_defers_third_connection() {
        let mut server = started_tcp_server(ModbusTcpServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            pool_size: 1,
            ..Default::default()
        })
        .await;
        let addr = server.local_addr().unwrap();

        // First connection occupies the only worker slot.
        let first = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Second connection is accepted by the kernel but not served yet.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let request = framing::encode_mbap(5, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        second.write_all(&request).await.unwrap();

        let mut header = [0u8; 6];
        let early = timeout(Duration::from_millis(300), second.read_exact(&mut header)).await;
        assert!(early.is_err(), "second connection served while pool full");

        // Freeing the slot lets the queued connection through.
        drop(first);
        timeout(Duration::from_secs(2), second.read_exact(&mut header))
            .await
            .expect("second connection never served")
            .unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_server_concurrent_clients() {
        let mut server = ModbusUdpServer::new("127.0.0.1:0".parse().unwrap(), test_handler());
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        let run_client = |txid: u16| async move {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            socket.connect(addr).await.unwrap();
            let request = framing::encode_mbap(txid, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
            socket.send(&request).await.unwrap();

            let mut buffer = [0u8; UDP_RECEIVE_BUFFER_SIZE];
            let received = timeout(Duration::from_secs(2), socket.recv(&mut buffer))
                .await
                .unwrap()
                .unwrap();
            framing::decode_mbap(&buffer[..received]).unwrap()
        };

        let (a, b) = tokio::join!(run_client(0x1111), run_client(0x2222));
        assert_eq!(a.0, 0x1111);
        assert_eq!(b.0, 0x2222);
        assert_eq!(a.2, b.2);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_malformed_datagram_dropped() {
        let mut server = ModbusUdpServer::new("127.0.0.1:0".parse().unwrap(), test_handler());
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(addr).await.unwrap();
        socket.send(&[0x00, 0x01]).await.unwrap();

        let mut buffer = [0u8; 16];
        let received = timeout(Duration::from_millis(300), socket.recv(&mut buffer)).await;
        assert!(received.is_err(), "malformed datagram must be ignored");
        server.stop().await.unwrap();
    }
}
