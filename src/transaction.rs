//! Master-side transaction engine
//!
//! A [`ModbusTransaction`] pairs one request with its response and supervises
//! the exchange: connect on demand, allocate a transaction id, send, await the
//! matched reply within the timeout, and retry lost attempts. Resends reuse
//! the *same* transaction id; deduplication of a late-arriving duplicate is
//! the server's responsibility.
//!
//! While hunting for the matching reply the engine skips up to
//! [`STALE_FRAME_SKIP_LIMIT`] frames whose transaction id, unit id or function
//! code belong to an earlier attempt. Exhausting the skip budget counts as a
//! lost attempt and surfaces as a timeout once the retries are spent.
//!
//! A transaction executes at most once successfully. Exclusive `&mut` access
//! to the transport for the whole call enforces the one-outstanding-request
//! rule per master connection.

use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::{DEFAULT_RETRIES, DEFAULT_TIMEOUT_MS, EXCEPTION_FLAG, STALE_FRAME_SKIP_LIMIT};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusRequest, ModbusResponse, UnitId};
use crate::transport::ModbusTransport;

/// One request/response exchange with retry and timeout supervision.
#[derive(Debug, Clone)]
pub struct ModbusTransaction {
    unit_id: UnitId,
    request: ModbusRequest,
    timeout: Duration,
    retries: u32,
    transaction_id: Option<u16>,
    response: Option<ModbusResponse>,
}

impl ModbusTransaction {
    /// Create a transaction with the default timeout and retry policy.
    pub fn new(unit_id: UnitId, request: ModbusRequest) -> Self {
        Self {
            unit_id,
            request,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: DEFAULT_RETRIES,
            transaction_id: None,
            response: None,
        }
    }

    /// Override the per-attempt response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the number of retries after a lost attempt.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Replace the request. Only allowed before execution.
    pub fn set_request(&mut self, unit_id: UnitId, request: ModbusRequest) {
        debug_assert!(self.response.is_none(), "transaction already executed");
        self.unit_id = unit_id;
        self.request = request;
        self.transaction_id = None;
    }

    /// The request under execution.
    pub fn request(&self) -> &ModbusRequest {
        &self.request
    }

    /// The transaction id assigned by the last `execute` call.
    pub fn transaction_id(&self) -> Option<u16> {
        self.transaction_id
    }

    /// The response captured by a successful `execute` call.
    pub fn response(&self) -> Option<&ModbusResponse> {
        self.response.as_ref()
    }

    /// Run the exchange to completion.
    ///
    /// Exception responses are delivered as a successful
    /// [`ModbusResponse::Exception`]; callers must check. Fatal transport
    /// errors close the connection and surface immediately; the next
    /// transaction on the same transport reconnects.
    pub async fn execute<T: ModbusTransport>(
        &mut self,
        transport: &mut T,
    ) -> ModbusResult<ModbusResponse> {
        if self.response.is_some() {
            return Err(ModbusError::protocol(
                "transaction already executed; build a new one",
            ));
        }

        let pdu = self.request.to_pdu_bytes();
        let request_fc = self.request.function().to_u8();
        let mut txid: Option<u16> = None;
        let mut last_error: Option<ModbusError> = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                debug!(
                    "retrying transaction (attempt {}/{})",
                    attempt + 1,
                    self.retries + 1
                );
            }

            if !transport.is_connected() {
                if let Err(e) = transport.connect().await {
                    warn!("connect failed: {}", e);
                    last_error = Some(e);
                    continue;
                }
            }

            // The id is allocated once and reused verbatim on every resend.
            let id = match txid {
                Some(id) => id,
                None => {
                    let id = transport.next_transaction_id();
                    txid = Some(id);
                    self.transaction_id = Some(id);
                    id
                }
            };

            if let Err(e) = transport.send_frame(id, self.unit_id, &pdu).await {
                if e.is_fatal() {
                    return Err(e);
                }
                last_error = Some(e);
                continue;
            }

            match self.await_matched(transport, id, request_fc).await {
                Ok(response) => {
                    self.response = Some(response.clone());
                    return Ok(response);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if e.is_retryable() => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(match last_error {
            Some(ModbusError::Timeout {
                operation,
                timeout_ms,
            }) => ModbusError::timeout(operation, timeout_ms),
            Some(other) => other,
            None => ModbusError::timeout("awaiting response", self.timeout.as_millis() as u64),
        })
    }

    /// Receive frames until one correlates with `txid`, skipping stale frames
    /// left over from earlier attempts.
    async fn await_matched<T: ModbusTransport>(
        &self,
        transport: &mut T,
        txid: u16,
        request_fc: u8,
    ) -> ModbusResult<ModbusResponse> {
        let mut skipped = 0usize;
        loop {
            let frame = transport.recv_frame(self.timeout).await?;

            let stale_reason = if frame.transaction_id != txid {
                Some(format!(
                    "transaction id {} (expected {})",
                    frame.transaction_id, txid
                ))
            } else if self.unit_id != 0 && frame.unit_id != self.unit_id {
                Some(format!("unit id {} (expected {})", frame.unit_id, self.unit_id))
            } else if frame
                .pdu
                .first()
                .map(|fc| fc & !EXCEPTION_FLAG != request_fc)
                .unwrap_or(true)
            {
                Some(format!(
                    "function 0x{:02X} (expected 0x{:02X})",
                    frame.pdu.first().copied().unwrap_or(0),
                    request_fc
                ))
            } else {
                None
            };

            if let Some(reason) = stale_reason {
                skipped += 1;
                warn!("skipping stale frame: {}", reason);
                if skipped >= STALE_FRAME_SKIP_LIMIT {
                    return Err(ModbusError::mismatch(format!(
                        "no matching response within {} frames, last: {}",
                        STALE_FRAME_SKIP_LIMIT, reason
                    )));
                }
                continue;
            }

            return ModbusResponse::from_pdu_bytes(&frame.pdu);
        }
    }
}
