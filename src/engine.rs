//! # RTU Frame Engine
//!
//! Byte-driven state machine that turns a stream of received bytes into
//! dispatched requests and response frames.
//!
//! ```text
//!   Idle ──byte──► Accumulating ──length reached──► Validating
//!    ▲                  │ silence                     │      │ CRC / address
//!    │                  ▼                             │      ▼
//!    │           (stale: discard)                     │   Rejected ──► Idle
//!    │                                                ▼
//!    └──── response taken ◄── Responding ◄──── Dispatching
//! ```
//!
//! Frame completion is derived from the function code: FC03/FC04/FC06
//! requests are 8 bytes, FC16 requests are `9 + byte_count` bytes. Frames
//! with any other function code carry no length information and are closed by
//! the inter-frame silence (t3.5) instead; if such a frame is intact and
//! addressed to this server it is answered with Illegal Function.
//!
//! Malformed frames (bad CRC) and frames for other slaves are dropped without
//! a response. Broadcast frames (address 0) are dispatched but never answered.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::config::{ServerConfig, ServerLimits, SlaveId};
use crate::constants::{BROADCAST_ADDRESS, MIN_RTU_FRAME_SIZE};
use crate::error::ExceptionCode;
use crate::pdu::{ModbusPdu, ModbusRequest, PduBuilder};
use crate::register_store::{RegisterKind, RegisterStore};
use crate::rtu::{expected_request_len, hex_dump, verify_crc, ExpectedLength, FrameBuffer};

/// Frame engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameState {
    /// No partial frame
    Idle,
    /// Collecting request bytes
    Accumulating,
    /// Checking CRC and slave address
    Validating,
    /// Applying the request to the register store
    Dispatching,
    /// Response frame ready for transmission
    Responding,
    /// Last frame was dropped. The next byte starts a new frame and a
    /// quiet poll returns to `Idle`.
    Rejected,
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a frame was dropped without a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Received CRC does not match the computed one
    CrcMismatch,
    /// Frame addressed to another slave
    AddressMismatch { address: u8 },
    /// More bytes than an RTU frame can hold
    Oversize,
}

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// A response frame is ready in [`RtuFrameEngine::response`]
    Response {
        function_code: u8,
        exception: Option<ExceptionCode>,
    },
    /// Broadcast request dispatched; nothing to send
    Broadcast {
        function_code: u8,
        exception: Option<ExceptionCode>,
    },
    /// Frame dropped silently
    Rejected(RejectReason),
    /// Incomplete frame discarded after the inter-frame silence
    StaleDiscarded { len: usize },
}

/// RTU request/response state machine
#[derive(Debug)]
pub struct RtuFrameEngine {
    slave_id: SlaveId,
    limits: ServerLimits,
    silence: Duration,
    packet_logging: bool,
    state: FrameState,
    rx: FrameBuffer,
    tx: FrameBuffer,
    last_byte_at: Option<Instant>,
}

impl RtuFrameEngine {
    /// Engine answering to `slave_id`, closing frames after `silence`
    pub fn new(slave_id: SlaveId, silence: Duration) -> Self {
        Self {
            slave_id,
            limits: ServerLimits::default(),
            silence,
            packet_logging: false,
            state: FrameState::Idle,
            rx: FrameBuffer::new(),
            tx: FrameBuffer::new(),
            last_byte_at: None,
        }
    }

    /// Engine set up from a server configuration at the given baud rate
    pub fn from_config(config: &ServerConfig, baud_rate: u32) -> Self {
        Self::new(config.slave_id, config.silence_for(baud_rate))
            .with_limits(config.limits)
            .with_packet_logging(config.packet_logging)
    }

    pub fn with_limits(mut self, limits: ServerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn slave_id(&self) -> SlaveId {
        self.slave_id
    }

    pub fn inter_frame_silence(&self) -> Duration {
        self.silence
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Bytes of the request currently being accumulated
    pub fn pending_len(&self) -> usize {
        if self.state == FrameState::Accumulating {
            self.rx.len()
        } else {
            0
        }
    }

    /// Drop any partial request and pending response
    pub fn reset(&mut self) {
        self.rx.clear();
        self.tx.clear();
        self.last_byte_at = None;
        self.state = FrameState::Idle;
    }

    /// Response frame awaiting transmission
    pub fn response(&self) -> Option<&[u8]> {
        if self.state == FrameState::Responding {
            Some(self.tx.as_slice())
        } else {
            None
        }
    }

    /// Mark the pending response as handed to the transport
    pub fn complete_response(&mut self) {
        if self.state == FrameState::Responding {
            self.tx.clear();
            self.state = FrameState::Idle;
        }
    }

    /// Feed one received byte.
    ///
    /// A byte arriving after the inter-frame silence closes (or discards) the
    /// frame in progress and starts a new one.
    pub fn feed(&mut self, byte: u8, now: Instant, store: &mut RegisterStore) -> Option<FrameEvent> {
        if self.state == FrameState::Responding {
            warn!("Request byte received before the pending response was sent; dropping response");
            self.complete_response();
        }

        let expired = self.poll_silence(now, store);
        if self.state == FrameState::Responding {
            debug!(
                "Byte 0x{:02X} arrived while a silence-delimited response is pending; dropped",
                byte
            );
            return expired;
        }

        if self.state != FrameState::Accumulating {
            self.rx.clear();
            self.state = FrameState::Accumulating;
        }
        self.last_byte_at = Some(now);

        if self.rx.push(byte).is_err() {
            debug!("Discarding oversize RTU frame ({} bytes)", self.rx.len());
            return expired.or(Some(self.reject(RejectReason::Oversize)));
        }

        let completed = match expected_request_len(self.rx.as_slice()) {
            ExpectedLength::Known(len) if self.rx.len() >= len => self.finish_frame(store),
            _ => None,
        };
        expired.or(completed)
    }

    /// Record that the line carried data at `now`.
    ///
    /// Bytes drained in one batch may have arrived at any point since the
    /// previous poll, so the gap between polls says nothing about the gap
    /// between bytes.
    pub fn mark_line_active(&mut self, now: Instant) {
        if self.state == FrameState::Accumulating {
            self.last_byte_at = Some(now);
        }
    }

    /// Check the inter-frame silence without new input.
    ///
    /// Closes a silence-delimited frame, or discards a stale partial one.
    /// A quiet line also clears the `Rejected` state.
    pub fn poll_silence(&mut self, now: Instant, store: &mut RegisterStore) -> Option<FrameEvent> {
        if self.state == FrameState::Rejected {
            self.state = FrameState::Idle;
            return None;
        }
        if self.state != FrameState::Accumulating {
            return None;
        }
        let last = self.last_byte_at?;
        if now.saturating_duration_since(last) < self.silence {
            return None;
        }

        match expected_request_len(self.rx.as_slice()) {
            ExpectedLength::Unknown if self.rx.len() >= MIN_RTU_FRAME_SIZE => {
                self.finish_frame(store)
            }
            _ => {
                let len = self.rx.len();
                debug!(
                    "Discarding stale partial frame ({} bytes): {}",
                    len,
                    hex_dump(self.rx.as_slice())
                );
                self.rx.clear();
                self.state = FrameState::Idle;
                Some(FrameEvent::StaleDiscarded { len })
            }
        }
    }

    /// Validate and dispatch a complete frame held in `rx`
    fn finish_frame(&mut self, store: &mut RegisterStore) -> Option<FrameEvent> {
        self.state = FrameState::Validating;

        if self.packet_logging {
            debug!("RTU request: {}", hex_dump(self.rx.as_slice()));
        }

        if !verify_crc(self.rx.as_slice()) {
            debug!("CRC mismatch, frame discarded: {}", hex_dump(self.rx.as_slice()));
            return Some(self.reject(RejectReason::CrcMismatch));
        }

        let address = self.rx.slave_address().unwrap_or(BROADCAST_ADDRESS);
        if address != self.slave_id && address != BROADCAST_ADDRESS {
            trace!("Frame for slave {} ignored (we are {})", address, self.slave_id);
            return Some(self.reject(RejectReason::AddressMismatch { address }));
        }

        self.state = FrameState::Dispatching;
        let function_code = self.rx.function_code().unwrap_or(0);
        let result = self.dispatch(store);
        self.rx.clear();

        let exception = result.as_ref().err().copied();
        if let Some(code) = exception {
            debug!(
                "Request FC={:02X} ({}) answered with exception {}",
                function_code,
                ModbusPdu::function_code_description(function_code),
                code
            );
        }

        if address == BROADCAST_ADDRESS {
            debug!("Broadcast FC={:02X} dispatched, no response", function_code);
            self.state = FrameState::Idle;
            return Some(FrameEvent::Broadcast {
                function_code,
                exception,
            });
        }

        let pdu = match result {
            Ok(pdu) => Ok(pdu),
            Err(code) => PduBuilder::build_exception(function_code, code),
        };
        let built = pdu.and_then(|pdu| {
            self.tx.clear();
            self.tx.push(self.slave_id)?;
            self.tx.extend(pdu.as_slice())?;
            self.tx.append_crc()
        });
        if let Err(e) = built {
            error!("Failed to build response for FC={:02X}: {}", function_code, e);
            self.tx.clear();
            self.state = FrameState::Idle;
            return None;
        }

        if self.packet_logging {
            debug!("RTU response: {}", hex_dump(self.tx.as_slice()));
        }
        self.state = FrameState::Responding;
        Some(FrameEvent::Response {
            function_code,
            exception,
        })
    }

    fn reject(&mut self, reason: RejectReason) -> FrameEvent {
        self.rx.clear();
        self.state = FrameState::Rejected;
        FrameEvent::Rejected(reason)
    }

    /// Apply the request in `rx` to the store and build the response PDU
    fn dispatch(&self, store: &mut RegisterStore) -> Result<ModbusPdu, ExceptionCode> {
        let request =
            ModbusRequest::parse(self.rx.pdu()).map_err(|e| ExceptionCode::from(&e))?;
        let function_code = request.function_code();

        let pdu = match request {
            ModbusRequest::ReadRegisters {
                kind,
                address,
                quantity,
            } => {
                if quantity == 0 || quantity > self.limits.max_read_registers {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                let values = store
                    .read_range(kind, address, quantity)
                    .map_err(|e| ExceptionCode::from(&e))?;
                PduBuilder::build_read_response(function_code, &values)
            }
            ModbusRequest::WriteSingleRegister { address, value } => {
                store
                    .write(RegisterKind::Holding, address, value)
                    .map_err(|e| ExceptionCode::from(&e))?;
                PduBuilder::build_write_single_response(address, value)
            }
            ModbusRequest::WriteMultipleRegisters { address, values } => {
                let quantity = values.len() as u16;
                if quantity == 0 || quantity > self.limits.max_write_registers {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                store
                    .write_range(RegisterKind::Holding, address, &values)
                    .map_err(|e| ExceptionCode::from(&e))?;
                PduBuilder::build_write_multiple_response(address, quantity)
            }
        };

        pdu.map_err(|e| {
            error!("Response PDU construction failed: {}", e);
            ExceptionCode::ServerDeviceFailure
        })
    }
}
