//! # Modbus RTU Server
//!
//! Polling driver tying the register store, frame engine, direction
//! controller and serial transport together.
//!
//! The host calls [`ModbusRtuServer::setup`] once and then
//! [`ModbusRtuServer::step`] from its main loop. A step never blocks on
//! input: it drains whatever bytes are available, answers complete requests
//! and keeps track of an unfinished output flush across calls. While a
//! response is still shifting out, received bytes stay in the transport.
//! Inter-frame silence is measured only across steps that find no input,
//! so a slow poll loop does not split a frame that arrived in one burst.
//!
//! ## Example
//!
//! ```rust,no_run
//! use voltage_modbus_server::{
//!     DirectionController, ModbusResult, ModbusRtuServer, SerialTransport, ServerConfig,
//! };
//!
//! fn serve<T: SerialTransport>(transport: T) -> ModbusResult<()> {
//!     let config = ServerConfig::new(0x11).with_holding_registers(0, 10, 0);
//!     let mut server = ModbusRtuServer::new(config, transport, DirectionController::none());
//!     server.setup()?;
//!
//!     // Scale every value written to register 3
//!     server.on_write_holding_register(3, 1, |_addr, value| value.wrapping_mul(2))?;
//!
//!     loop {
//!         server.step();
//!     }
//! }
//! ```

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::direction::{Direction, DirectionController};
use crate::engine::{FrameEvent, FrameState, RejectReason, RtuFrameEngine};
use crate::error::{ModbusError, ModbusResult};
use crate::register_store::{Access, RangeDeclaration, RegisterKind, RegisterStore};
use crate::transport::{FlushStatus, SerialTransport};

/// Server counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    /// Complete frames seen on the line, valid or not
    pub frames_received: u64,
    pub responses_sent: u64,
    /// Responses carrying an exception code
    pub exceptions_sent: u64,
    pub crc_errors: u64,
    /// Frames addressed to other slaves
    pub address_mismatches: u64,
    pub broadcasts: u64,
    pub stale_frames_discarded: u64,
    pub oversize_frames: u64,
    pub transport_errors: u64,
}

impl ServerStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Modbus RTU server over a [`SerialTransport`]
pub struct ModbusRtuServer<T: SerialTransport> {
    config: ServerConfig,
    transport: T,
    direction: DirectionController,
    store: RegisterStore,
    engine: RtuFrameEngine,
    /// A response was written and its flush has not completed yet
    flush_pending: bool,
    stats: ServerStats,
}

impl<T: SerialTransport> ModbusRtuServer<T> {
    /// Create a server. Nothing is validated or declared until
    /// [`setup`](Self::setup).
    pub fn new(config: ServerConfig, transport: T, direction: DirectionController) -> Self {
        let engine = RtuFrameEngine::from_config(&config, transport.baud_rate());
        Self {
            config,
            transport,
            direction,
            store: RegisterStore::new(),
            engine,
            flush_pending: false,
            stats: ServerStats::default(),
        }
    }

    /// Validate the configuration, declare the configured register blocks and
    /// release the bus.
    pub fn setup(&mut self) -> ModbusResult<()> {
        self.config.validate()?;

        for block in &self.config.register_blocks {
            self.store
                .declare_range(block.kind, block.start, block.count, block.initial_value)?;
        }

        self.direction.assert_receive()?;
        self.dump_config();
        info!(
            "Modbus RTU server ready (slave {})",
            self.config.slave_id
        );
        Ok(())
    }

    /// Log the effective configuration
    pub fn dump_config(&self) {
        info!("Modbus RTU server:");
        info!("  Slave address: {}", self.config.slave_id);
        info!("  Baud rate: {}", self.transport.baud_rate());
        info!(
            "  Inter-frame silence: {} us",
            self.engine.inter_frame_silence().as_micros()
        );
        info!(
            "  Limits: read {} / write {} registers",
            self.config.limits.max_read_registers, self.config.limits.max_write_registers
        );
        for kind in [RegisterKind::Holding, RegisterKind::Input] {
            for range in self.store.ranges(kind) {
                info!(
                    "  {} registers: {}..{}",
                    kind,
                    range.start,
                    range.end()
                );
            }
        }
        info!(
            "  Direction pin: {}",
            if self.direction.has_pin() {
                "configured"
            } else {
                "none"
            }
        );
        info!(
            "  Flush: {}",
            if self.transport.supports_blocking_flush() {
                "blocking"
            } else {
                "polled"
            }
        );
    }

    /// One non-blocking iteration of the server loop
    pub fn step(&mut self) {
        self.step_at(Instant::now());
    }

    /// [`step`](Self::step) with an explicit timestamp for received bytes
    pub fn step_at(&mut self, now: Instant) {
        if self.flush_pending {
            self.poll_flush();
            if self.flush_pending {
                return;
            }
        }

        if !self.direction.is_transmitting() {
            if let Err(e) = self.direction.assert_receive() {
                self.stats.transport_errors += 1;
                warn!("Failed to release the bus: {}", e);
            }
        }

        let available = match self.transport.bytes_available() {
            Ok(n) => n,
            Err(e) => {
                self.transport_error(e);
                return;
            }
        };

        // Silence only counts from a poll that found the line quiet
        if available == 0 {
            if let Some(event) = self.engine.poll_silence(now, &mut self.store) {
                self.record(event);
                if self.engine.response().is_some() {
                    self.transmit();
                }
            }
            return;
        }
        self.engine.mark_line_active(now);

        for _ in 0..available {
            let byte = match self.transport.read_byte() {
                Ok(Some(byte)) => byte,
                Ok(None) => break,
                Err(e) => {
                    self.transport_error(e);
                    return;
                }
            };
            self.stats.bytes_received += 1;

            if let Some(event) = self.engine.feed(byte, now, &mut self.store) {
                self.record(event);
            }
            if self.engine.response().is_some() {
                self.transmit();
                if self.flush_pending {
                    // Half-duplex: the rest of the input waits for the flush
                    return;
                }
            }
        }
    }

    fn record(&mut self, event: FrameEvent) {
        match event {
            FrameEvent::Response { .. } => self.stats.frames_received += 1,
            FrameEvent::Broadcast { .. } => {
                self.stats.frames_received += 1;
                self.stats.broadcasts += 1;
            }
            FrameEvent::Rejected(RejectReason::CrcMismatch) => {
                self.stats.frames_received += 1;
                self.stats.crc_errors += 1;
            }
            FrameEvent::Rejected(RejectReason::AddressMismatch { .. }) => {
                self.stats.frames_received += 1;
                self.stats.address_mismatches += 1;
            }
            FrameEvent::Rejected(RejectReason::Oversize) => self.stats.oversize_frames += 1,
            FrameEvent::StaleDiscarded { .. } => self.stats.stale_frames_discarded += 1,
        }
        if let FrameEvent::Response {
            exception: Some(_), ..
        } = event
        {
            self.stats.exceptions_sent += 1;
        }
    }

    /// Send the engine's pending response
    fn transmit(&mut self) {
        let Some(frame) = self.engine.response() else {
            return;
        };

        if let Err(e) = self.direction.assert_transmit() {
            error!("Cannot enable transmitter, response dropped: {}", e);
            self.stats.transport_errors += 1;
            self.engine.reset();
            return;
        }

        let len = frame.len();
        if let Err(e) = self.transport.write_bytes(frame) {
            self.transport_error(e);
            return;
        }
        self.engine.complete_response();
        self.stats.bytes_sent += len as u64;
        self.stats.responses_sent += 1;

        if self.transport.supports_blocking_flush() {
            match self.transport.flush_blocking() {
                Ok(()) => self.finish_transmit(),
                Err(e) => self.transport_error(e),
            }
        } else {
            self.flush_pending = true;
            self.poll_flush();
        }
    }

    fn poll_flush(&mut self) {
        match self.transport.poll_flush() {
            Ok(FlushStatus::Complete) => self.finish_transmit(),
            Ok(FlushStatus::Pending) => {}
            Err(e) => self.transport_error(e),
        }
    }

    fn finish_transmit(&mut self) {
        self.flush_pending = false;
        if let Err(e) = self.direction.assert_receive() {
            self.stats.transport_errors += 1;
            warn!("Failed to release the bus after transmit: {}", e);
        }
    }

    /// Drop the frame in progress and return to receiving
    fn transport_error(&mut self, e: ModbusError) {
        error!("Serial transport error: {}", e);
        self.stats.transport_errors += 1;
        self.engine.reset();
        self.flush_pending = false;
        if let Err(e) = self.direction.assert_receive() {
            warn!("Failed to release the bus: {}", e);
        }
    }

    // ------------------------------------------------------------------
    // Register API
    // ------------------------------------------------------------------

    /// Declare `count` holding registers at `start`
    pub fn add_holding_register(
        &mut self,
        start: u16,
        count: u16,
        initial_value: u16,
    ) -> ModbusResult<RangeDeclaration> {
        self.store
            .declare_range(RegisterKind::Holding, start, count, initial_value)
    }

    /// Declare `count` input registers at `start`
    pub fn add_input_register(
        &mut self,
        start: u16,
        count: u16,
        initial_value: u16,
    ) -> ModbusResult<RangeDeclaration> {
        self.store
            .declare_range(RegisterKind::Input, start, count, initial_value)
    }

    pub fn read_holding_register(&self, address: u16) -> ModbusResult<u16> {
        self.store.read(RegisterKind::Holding, address)
    }

    pub fn read_input_register(&self, address: u16) -> ModbusResult<u16> {
        self.store.read(RegisterKind::Input, address)
    }

    pub fn write_holding_register(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        self.store.write(RegisterKind::Holding, address, value)
    }

    pub fn write_input_register(&mut self, address: u16, value: u16) -> ModbusResult<()> {
        self.store.write(RegisterKind::Input, address, value)
    }

    /// Bind a read callback to `count` holding registers
    pub fn on_read_holding_register<F>(&mut self, address: u16, count: u16, callback: F) -> ModbusResult<()>
    where
        F: Fn(u16, u16) -> u16 + Send + Sync + 'static,
    {
        self.store
            .bind_callback(RegisterKind::Holding, address, Access::Read, count, callback)
    }

    /// Bind a read callback to `count` input registers
    pub fn on_read_input_register<F>(&mut self, address: u16, count: u16, callback: F) -> ModbusResult<()>
    where
        F: Fn(u16, u16) -> u16 + Send + Sync + 'static,
    {
        self.store
            .bind_callback(RegisterKind::Input, address, Access::Read, count, callback)
    }

    /// Bind a write callback to `count` holding registers
    pub fn on_write_holding_register<F>(&mut self, address: u16, count: u16, callback: F) -> ModbusResult<()>
    where
        F: Fn(u16, u16) -> u16 + Send + Sync + 'static,
    {
        self.store
            .bind_callback(RegisterKind::Holding, address, Access::Write, count, callback)
    }

    /// Bind a write callback to `count` input registers.
    ///
    /// Input registers cannot be written over the wire; the callback sees
    /// host-side writes only.
    pub fn on_write_input_register<F>(&mut self, address: u16, count: u16, callback: F) -> ModbusResult<()>
    where
        F: Fn(u16, u16) -> u16 + Send + Sync + 'static,
    {
        self.store
            .bind_callback(RegisterKind::Input, address, Access::Write, count, callback)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn register_store(&self) -> &RegisterStore {
        &self.store
    }

    pub fn register_store_mut(&mut self) -> &mut RegisterStore {
        &mut self.store
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn frame_state(&self) -> FrameState {
        self.engine.state()
    }

    pub fn direction(&self) -> Direction {
        self.direction.state()
    }

    /// Whether a written response is still being flushed
    pub fn is_flushing(&self) -> bool {
        self.flush_pending
    }

    /// Hex-dump requests and responses at debug level
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.config.packet_logging = enabled;
        self.engine.set_packet_logging(enabled);
        debug!(
            "Packet logging {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Tear down the server and hand back its transport
    pub fn into_transport(self) -> T {
        self.transport
    }
}

#[cfg(feature = "rtu")]
impl<T: SerialTransport> ModbusRtuServer<T> {
    /// Drive [`step`](Self::step) every `poll_interval` until `shutdown`
    /// resolves.
    ///
    /// Call [`setup`](Self::setup) first.
    pub async fn run<F>(&mut self, poll_interval: std::time::Duration, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Serving slave {} every {:?}",
            self.config.slave_id, poll_interval
        );
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Modbus RTU server shutting down");
                    break;
                }
                _ = ticker.tick() => self.step(),
            }
        }
    }
}

impl<T: SerialTransport> std::fmt::Debug for ModbusRtuServer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusRtuServer")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("engine", &self.engine)
            .field("direction", &self.direction)
            .field("flush_pending", &self.flush_pending)
            .field("stats", &self.stats)
            .finish()
    }
}
