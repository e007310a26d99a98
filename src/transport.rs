//! Network and serial transport layer
//!
//! A transport owns one I/O handle (TCP socket, UDP socket or serial port)
//! and moves whole ADUs across it. The framing rules live in
//! [`framing`](crate::framing); a transport only decides *which* framer runs
//! (MBAP for TCP/UDP, RTU/ASCII for serial, RTU for "RTU over TCP") and how
//! frame boundaries are found on its medium.
//!
//! Transports do not retry and do not match transaction ids; that supervision
//! belongs to [`ModbusTransaction`](crate::transaction::ModbusTransaction).
//! They do track connection state: a fatal I/O error clears the handle so the
//! next transaction reconnects.
//!
//! | Transport | Framing | Frame boundary |
//! |-----------|---------|----------------|
//! | [`TcpTransport`] | MBAP | length field |
//! | [`TcpTransport`] (headless) | RTU | per-function length tables |
//! | [`UdpTransport`] | MBAP | datagram |
//! | [`RtuTransport`] | RTU | 3.5-character silence |
//! | [`AsciiTransport`] | ASCII | ':' ... CR LF |

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::constants::{MAX_RTU_ADU_SIZE, UDP_RECEIVE_BUFFER_SIZE};
use crate::error::{ModbusError, ModbusResult};
use crate::framing::{self, PduLength};
use crate::logging::log_packet;

/// One decoded ADU as it crossed the wire.
///
/// Serial flavors carry no transaction id on the wire; the transport fills in
/// the id it tracks internally so correlation works uniformly upstream.
#[derive(Debug, Clone)]
pub struct AduFrame {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub pdu: Vec<u8>,
}

/// Transport layer statistics.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Transport abstraction shared by every Modbus medium.
///
/// All implementations are `Send` so a master can live inside a task. A
/// transport is used by at most one transaction at a time; `&mut self`
/// receivers make that single-outstanding-request invariant structural.
#[async_trait]
pub trait ModbusTransport: Send {
    /// (Re)open the underlying handle. Called by the transaction engine when
    /// `is_connected()` is false.
    async fn connect(&mut self) -> ModbusResult<()>;

    /// Whether the transport believes its handle is usable.
    fn is_connected(&self) -> bool;

    /// Allocate the next transaction id: monotonically incrementing,
    /// wrapping, never 0. Serial flavors track the id without transmitting it.
    fn next_transaction_id(&mut self) -> u16;

    /// Frame and send one request PDU.
    async fn send_frame(
        &mut self,
        transaction_id: u16,
        unit_id: u8,
        pdu: &[u8],
    ) -> ModbusResult<()>;

    /// Receive one complete frame within `deadline`.
    async fn recv_frame(&mut self, deadline: Duration) -> ModbusResult<AduFrame>;

    /// Close the handle gracefully.
    async fn close(&mut self) -> ModbusResult<()>;

    /// Communication statistics.
    fn get_stats(&self) -> TransportStats;
}

fn advance_transaction_id(counter: &mut u16) -> u16 {
    *counter = counter.wrapping_add(1);
    if *counter == 0 {
        *counter = 1;
    }
    *counter
}

// ============================================================================
// TCP
// ============================================================================

/// Modbus TCP transport (MBAP framing, or RTU framing in headless mode).
pub struct TcpTransport {
    stream: Option<TcpStream>,
    /// Peer address this transport reconnects to.
    pub address: SocketAddr,
    timeout: Duration,
    /// Omit the MBAP envelope and frame PDUs as RTU ("RTU over TCP").
    headless: bool,
    transaction_id: u16,
    /// Id of the request most recently sent; stamped onto headless frames.
    current_txid: u16,
    stats: TransportStats,
    packet_logging: bool,
}

impl TcpTransport {
    /// Connect a new MBAP transport.
    pub async fn new(address: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        let mut transport = Self::disconnected(address, timeout, false);
        transport.connect().await?;
        Ok(transport)
    }

    /// Connect a new RTU-over-TCP transport: RTU bytes on a stream socket,
    /// frame ends located via the per-function length tables.
    pub async fn new_rtu_over_tcp(address: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        let mut transport = Self::disconnected(address, timeout, true);
        transport.connect().await?;
        Ok(transport)
    }

    /// Build without connecting; the first transaction will connect.
    pub fn disconnected(address: SocketAddr, timeout: Duration, headless: bool) -> Self {
        Self {
            stream: None,
            address,
            timeout,
            headless,
            transaction_id: 0,
            current_txid: 0,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable hex packet logging.
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    fn take_fatal(&mut self, err: ModbusError) -> ModbusError {
        if err.is_fatal() {
            self.stream = None;
        }
        self.stats.errors += 1;
        err
    }

    /// Read one headless (RTU-framed) response from the stream, locating the
    /// end with the length tables. FC43 responses have a variable sub-encoding
    /// the tables cannot size; those drain until the line goes quiet.
    async fn recv_headless(&mut self, deadline: Duration) -> ModbusResult<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("not connected"))?;

        let mut adu: Vec<u8> = Vec::with_capacity(8);
        let mut byte = [0u8; 1];
        let started = tokio::time::Instant::now();

        loop {
            let needed = match framing::response_pdu_len(&adu)? {
                PduLength::Known(pdu_len) => Some(1 + pdu_len + 2),
                PduLength::Partial => None,
                PduLength::Variable => {
                    // Drain until the peer pauses, then treat the frame as
                    // complete. The CRC check below still guards integrity.
                    loop {
                        match timeout(Duration::from_millis(20), stream.read(&mut byte)).await {
                            Ok(Ok(0)) => {
                                return Err(ModbusError::fatal_io("connection closed mid-frame"))
                            }
                            Ok(Ok(_)) => adu.push(byte[0]),
                            Ok(Err(e)) => return Err(e.into()),
                            Err(_) => break,
                        }
                        if adu.len() > MAX_RTU_ADU_SIZE {
                            return Err(ModbusError::protocol("frame exceeds maximum ADU size"));
                        }
                    }
                    Some(adu.len())
                }
            };

            if let Some(total) = needed {
                if adu.len() >= total {
                    adu.truncate(total);
                    return Ok(adu);
                }
                let mut rest = vec![0u8; total - adu.len()];
                let remaining = deadline.saturating_sub(started.elapsed());
                match timeout(remaining, stream.read_exact(&mut rest)).await {
                    Ok(Ok(_)) => {
                        adu.extend_from_slice(&rest);
                        return Ok(adu);
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => {
                        return Err(ModbusError::timeout(
                            "read response",
                            deadline.as_millis() as u64,
                        ))
                    }
                }
            }

            let remaining = deadline.saturating_sub(started.elapsed());
            match timeout(remaining, stream.read_exact(&mut byte)).await {
                Ok(Ok(_)) => adu.push(byte[0]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(ModbusError::timeout(
                        "read response",
                        deadline.as_millis() as u64,
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        let stream = timeout(self.timeout, TcpStream::connect(self.address))
            .await
            .map_err(|_| {
                ModbusError::timeout("connect", self.timeout.as_millis() as u64)
            })?
            .map_err(|e| {
                ModbusError::connection(format!("failed to connect to {}: {}", self.address, e))
            })?;
        stream.set_nodelay(true).ok();
        debug!("connected to {}", self.address);
        self.stream = Some(stream);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn next_transaction_id(&mut self) -> u16 {
        advance_transaction_id(&mut self.transaction_id)
    }

    async fn send_frame(
        &mut self,
        transaction_id: u16,
        unit_id: u8,
        pdu: &[u8],
    ) -> ModbusResult<()> {
        let frame = if self.headless {
            framing::encode_rtu(unit_id, pdu)
        } else {
            framing::encode_mbap(transaction_id, unit_id, pdu)
        };
        self.current_txid = transaction_id;
        if self.packet_logging {
            log_packet("send", &frame, "TCP", Some(unit_id));
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("not connected"))?;
        let result = match timeout(self.timeout, stream.write_all(&frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ModbusError::from(e)),
            Err(_) => Err(ModbusError::timeout(
                "send request",
                self.timeout.as_millis() as u64,
            )),
        };
        match result {
            Ok(()) => {
                self.stats.requests_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Err(e) => Err(self.take_fatal(e)),
        }
    }

    async fn recv_frame(&mut self, deadline: Duration) -> ModbusResult<AduFrame> {
        if self.headless {
            let adu = match self.recv_headless(deadline).await {
                Ok(adu) => adu,
                Err(e) => {
                    if matches!(e, ModbusError::Timeout { .. }) {
                        self.stats.timeouts += 1;
                    }
                    return Err(self.take_fatal(e));
                }
            };
            if self.packet_logging {
                log_packet("recv", &adu, "TCP", None);
            }
            self.stats.responses_received += 1;
            self.stats.bytes_received += adu.len() as u64;
            let (unit_id, pdu) = framing::decode_rtu(&adu)?;
            return Ok(AduFrame {
                transaction_id: self.current_txid,
                unit_id,
                pdu,
            });
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("not connected"))?;

        let mut header = [0u8; 6];
        let read_header = timeout(deadline, stream.read_exact(&mut header)).await;
        let parsed = match read_header {
            Ok(Ok(_)) => framing::MbapHeader::parse(&header),
            Ok(Err(e)) => Err(ModbusError::from(e)),
            Err(_) => {
                self.stats.timeouts += 1;
                Err(ModbusError::timeout(
                    "read response header",
                    deadline.as_millis() as u64,
                ))
            }
        };
        let parsed = match parsed {
            Ok(h) => h,
            Err(e) => return Err(self.take_fatal(e)),
        };

        let mut body = vec![0u8; parsed.length as usize];
        let read_body = match timeout(deadline, stream.read_exact(&mut body)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ModbusError::from(e)),
            Err(_) => {
                self.stats.timeouts += 1;
                Err(ModbusError::timeout(
                    "read response body",
                    deadline.as_millis() as u64,
                ))
            }
        };
        if let Err(e) = read_body {
            return Err(self.take_fatal(e));
        }

        if self.packet_logging {
            let mut frame = header.to_vec();
            frame.extend_from_slice(&body);
            log_packet("recv", &frame, "TCP", Some(body[0]));
        }
        if parsed.protocol_id != 0 {
            debug!("non-zero MBAP protocol id {}", parsed.protocol_id);
        }
        self.stats.responses_received += 1;
        self.stats.bytes_received += (6 + body.len()) as u64;
        Ok(AduFrame {
            transaction_id: parsed.transaction_id,
            unit_id: body[0],
            pdu: body[1..].to_vec(),
        })
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

// ============================================================================
// UDP (master side)
// ============================================================================

/// Modbus UDP master transport: a datagram socket pinned to one peer.
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    /// Peer address datagrams are exchanged with.
    pub address: SocketAddr,
    timeout: Duration,
    transaction_id: u16,
    stats: TransportStats,
    packet_logging: bool,
}

impl UdpTransport {
    /// Bind an ephemeral local socket and pin it to `address`.
    pub async fn new(address: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        let mut transport = Self {
            socket: None,
            address,
            timeout,
            transaction_id: 0,
            stats: TransportStats::default(),
            packet_logging: false,
        };
        transport.connect().await?;
        Ok(transport)
    }

    /// Enable or disable hex packet logging.
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }
}

#[async_trait]
impl ModbusTransport for UdpTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        let local: SocketAddr = if self.address.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| ModbusError::connection(format!("failed to bind UDP socket: {}", e)))?;
        socket.connect(self.address).await.map_err(|e| {
            ModbusError::connection(format!("failed to pin UDP socket to {}: {}", self.address, e))
        })?;
        self.socket = Some(socket);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn next_transaction_id(&mut self) -> u16 {
        advance_transaction_id(&mut self.transaction_id)
    }

    async fn send_frame(
        &mut self,
        transaction_id: u16,
        unit_id: u8,
        pdu: &[u8],
    ) -> ModbusResult<()> {
        let frame = framing::encode_mbap(transaction_id, unit_id, pdu);
        if self.packet_logging {
            log_packet("send", &frame, "UDP", Some(unit_id));
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ModbusError::connection("not connected"))?;
        match timeout(self.timeout, socket.send(&frame)).await {
            Ok(Ok(_)) => {
                self.stats.requests_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(ModbusError::io(format!("UDP send failed: {}", e)))
            }
            Err(_) => {
                self.stats.timeouts += 1;
                Err(ModbusError::timeout(
                    "send request",
                    self.timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn recv_frame(&mut self, deadline: Duration) -> ModbusResult<AduFrame> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ModbusError::connection("not connected"))?;
        let mut buffer = [0u8; UDP_RECEIVE_BUFFER_SIZE];
        let received = match timeout(deadline, socket.recv(&mut buffer)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(ModbusError::io(format!("UDP receive failed: {}", e)));
            }
            Err(_) => {
                self.stats.timeouts += 1;
                return Err(ModbusError::timeout(
                    "read response",
                    deadline.as_millis() as u64,
                ));
            }
        };
        let datagram = &buffer[..received];
        if self.packet_logging {
            log_packet("recv", datagram, "UDP", None);
        }
        self.stats.responses_received += 1;
        self.stats.bytes_received += received as u64;
        let (transaction_id, unit_id, pdu) = framing::decode_mbap(datagram)?;
        Ok(AduFrame {
            transaction_id,
            unit_id,
            pdu,
        })
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.socket = None;
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

// ============================================================================
// Serial (RTU / ASCII)
// ============================================================================

/// Serial line parameters shared by the RTU and ASCII transports.
#[cfg(feature = "rtu")]
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
}

#[cfg(feature = "rtu")]
impl SerialSettings {
    /// RTU default: 8 data bits, 1 stop bit, no parity.
    pub fn rtu(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::None,
        }
    }

    /// ASCII default: 7 data bits, 1 stop bit, even parity.
    pub fn ascii(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: tokio_serial::DataBits::Seven,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::Even,
        }
    }
}

#[cfg(feature = "rtu")]
fn open_serial(
    port_name: &str,
    settings: &SerialSettings,
    timeout: Duration,
) -> ModbusResult<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let builder = tokio_serial::new(port_name, settings.baud_rate)
        .data_bits(settings.data_bits)
        .stop_bits(settings.stop_bits)
        .parity(settings.parity)
        .timeout(timeout);
    builder.open_native_async().map_err(|e| {
        ModbusError::connection(format!("failed to open serial port {}: {}", port_name, e))
    })
}

/// Modbus RTU transport over a serial line.
///
/// The decoder is silence-driven: bytes are gathered until the line is quiet
/// for 3.5 character times, which ends the frame. The CRC then decides whether
/// the frame is delivered or dropped with a checksum error.
#[cfg(feature = "rtu")]
pub struct RtuTransport {
    port: Option<tokio_serial::SerialStream>,
    port_name: String,
    settings: SerialSettings,
    timeout: Duration,
    frame_gap: Duration,
    transaction_id: u16,
    current_txid: u16,
    stats: TransportStats,
    packet_logging: bool,
}

#[cfg(feature = "rtu")]
impl RtuTransport {
    /// Open an RTU transport with default 8N1 settings.
    pub fn new(port_name: &str, baud_rate: u32) -> ModbusResult<Self> {
        Self::new_with_settings(
            port_name,
            SerialSettings::rtu(baud_rate),
            Duration::from_millis(crate::constants::DEFAULT_TIMEOUT_MS),
        )
    }

    /// Open an RTU transport with explicit serial settings.
    pub fn new_with_settings(
        port_name: &str,
        settings: SerialSettings,
        timeout: Duration,
    ) -> ModbusResult<Self> {
        let port = open_serial(port_name, &settings, timeout)?;
        let frame_gap = framing::frame_gap(settings.baud_rate);
        Ok(Self {
            port: Some(port),
            port_name: port_name.to_string(),
            settings,
            timeout,
            frame_gap,
            transaction_id: 0,
            current_txid: 0,
            stats: TransportStats::default(),
            packet_logging: false,
        })
    }

    /// Enable or disable hex packet logging.
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Gather bytes until the inter-frame gap elapses.
    async fn read_silence_framed(&mut self, deadline: Duration) -> ModbusResult<Vec<u8>> {
        let gap = self.frame_gap;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not open"))?;

        let started = tokio::time::Instant::now();
        let mut frame: Vec<u8> = Vec::with_capacity(16);
        let mut byte = [0u8; 1];
        loop {
            let wait = if frame.is_empty() {
                // Nothing received yet: wait up to the full deadline for the
                // first byte of the reply.
                deadline.saturating_sub(started.elapsed())
            } else {
                gap
            };
            match timeout(wait, port.read(&mut byte)).await {
                Ok(Ok(0)) => return Err(ModbusError::fatal_io("serial port closed")),
                Ok(Ok(_)) => {
                    frame.push(byte[0]);
                    if frame.len() > MAX_RTU_ADU_SIZE {
                        return Err(ModbusError::protocol("frame exceeds maximum ADU size"));
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) if frame.is_empty() => {
                    return Err(ModbusError::timeout(
                        "read response",
                        deadline.as_millis() as u64,
                    ));
                }
                // Gap elapsed with bytes in hand: frame boundary.
                Err(_) => return Ok(frame),
            }
        }
    }
}

#[cfg(feature = "rtu")]
#[async_trait]
impl ModbusTransport for RtuTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        self.port = Some(open_serial(&self.port_name, &self.settings, self.timeout)?);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn next_transaction_id(&mut self) -> u16 {
        advance_transaction_id(&mut self.transaction_id)
    }

    async fn send_frame(
        &mut self,
        transaction_id: u16,
        unit_id: u8,
        pdu: &[u8],
    ) -> ModbusResult<()> {
        // Respect the inter-frame silence before keying the line.
        tokio::time::sleep(self.frame_gap).await;

        let frame = framing::encode_rtu(unit_id, pdu);
        self.current_txid = transaction_id;
        if self.packet_logging {
            log_packet("send", &frame, "RTU", Some(unit_id));
        }
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not open"))?;
        match timeout(self.timeout, port.write_all(&frame)).await {
            Ok(Ok(())) => {
                let _ = port.flush().await;
                self.stats.requests_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(e.into())
            }
            Err(_) => {
                self.stats.timeouts += 1;
                Err(ModbusError::timeout(
                    "send request",
                    self.timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn recv_frame(&mut self, deadline: Duration) -> ModbusResult<AduFrame> {
        let frame = match self.read_silence_framed(deadline).await {
            Ok(frame) => frame,
            Err(e) => {
                if matches!(e, ModbusError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                }
                self.stats.errors += 1;
                return Err(e);
            }
        };
        if self.packet_logging {
            log_packet("recv", &frame, "RTU", None);
        }
        self.stats.responses_received += 1;
        self.stats.bytes_received += frame.len() as u64;
        let (unit_id, pdu) = framing::decode_rtu(&frame)?;
        Ok(AduFrame {
            transaction_id: self.current_txid,
            unit_id,
            pdu,
        })
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.port = None;
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Modbus ASCII transport over a serial line.
///
/// Frames are delimited by ':' and CR LF; there is no time-based gap rule.
#[cfg(feature = "rtu")]
pub struct AsciiTransport {
    port: Option<tokio_serial::SerialStream>,
    port_name: String,
    settings: SerialSettings,
    timeout: Duration,
    transaction_id: u16,
    current_txid: u16,
    stats: TransportStats,
    packet_logging: bool,
}

#[cfg(feature = "rtu")]
impl AsciiTransport {
    /// Open an ASCII transport with default 7E1 settings.
    pub fn new(port_name: &str, baud_rate: u32) -> ModbusResult<Self> {
        Self::new_with_settings(
            port_name,
            SerialSettings::ascii(baud_rate),
            Duration::from_millis(crate::constants::DEFAULT_TIMEOUT_MS),
        )
    }

    /// Open an ASCII transport with explicit serial settings.
    pub fn new_with_settings(
        port_name: &str,
        settings: SerialSettings,
        timeout: Duration,
    ) -> ModbusResult<Self> {
        let port = open_serial(port_name, &settings, timeout)?;
        Ok(Self {
            port: Some(port),
            port_name: port_name.to_string(),
            settings,
            timeout,
            transaction_id: 0,
            current_txid: 0,
            stats: TransportStats::default(),
            packet_logging: false,
        })
    }

    /// Enable or disable hex packet logging.
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Synchronize to ':' and accumulate until CR LF.
    async fn read_crlf_framed(&mut self, deadline: Duration) -> ModbusResult<Vec<u8>> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not open"))?;

        let started = tokio::time::Instant::now();
        let mut frame: Vec<u8> = Vec::with_capacity(32);
        let mut byte = [0u8; 1];
        loop {
            let remaining = deadline.saturating_sub(started.elapsed());
            match timeout(remaining, port.read(&mut byte)).await {
                Ok(Ok(0)) => return Err(ModbusError::fatal_io("serial port closed")),
                Ok(Ok(_)) => {
                    if frame.is_empty() {
                        // Hunt for the start of frame, discarding line noise.
                        if byte[0] == b':' {
                            frame.push(byte[0]);
                        }
                        continue;
                    }
                    frame.push(byte[0]);
                    if frame.len() >= 3 && frame.ends_with(b"\r\n") {
                        return Ok(frame);
                    }
                    if frame.len() > MAX_RTU_ADU_SIZE * 2 + 3 {
                        return Err(ModbusError::protocol("frame exceeds maximum ADU size"));
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(ModbusError::timeout(
                        "read response",
                        deadline.as_millis() as u64,
                    ));
                }
            }
        }
    }
}

#[cfg(feature = "rtu")]
#[async_trait]
impl ModbusTransport for AsciiTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        self.port = Some(open_serial(&self.port_name, &self.settings, self.timeout)?);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn next_transaction_id(&mut self) -> u16 {
        advance_transaction_id(&mut self.transaction_id)
    }

    async fn send_frame(
        &mut self,
        transaction_id: u16,
        unit_id: u8,
        pdu: &[u8],
    ) -> ModbusResult<()> {
        let frame = framing::encode_ascii(unit_id, pdu);
        self.current_txid = transaction_id;
        if self.packet_logging {
            log_packet("send", &frame, "ASCII", Some(unit_id));
        }
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not open"))?;
        match timeout(self.timeout, port.write_all(&frame)).await {
            Ok(Ok(())) => {
                let _ = port.flush().await;
                self.stats.requests_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(e.into())
            }
            Err(_) => {
                self.stats.timeouts += 1;
                Err(ModbusError::timeout(
                    "send request",
                    self.timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn recv_frame(&mut self, deadline: Duration) -> ModbusResult<AduFrame> {
        let frame = match self.read_crlf_framed(deadline).await {
            Ok(frame) => frame,
            Err(e) => {
                if matches!(e, ModbusError::Timeout { .. }) {
                    self.stats.timeouts += 1;
                }
                self.stats.errors += 1;
                return Err(e);
            }
        };
        if self.packet_logging {
            log_packet("recv", &frame, "ASCII", None);
        }
        self.stats.responses_received += 1;
        self.stats.bytes_received += frame.len() as u64;
        let (unit_id, pdu) = framing::decode_ascii(&frame)?;
        Ok(AduFrame {
            transaction_id: self.current_txid,
            unit_id,
            pdu,
        })
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.port = None;
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
