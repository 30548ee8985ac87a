//! # Voltage Modbus Server - Modbus RTU Slave Engine
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! A Modbus RTU server (slave) for RS-485 / RS-232 serial lines: it exposes
//! holding and input registers to a remote master, invokes per-register
//! callbacks when values are read or written, and drives an optional
//! half-duplex direction pin around every response.
//!
//! ## Features
//!
//! - **Register store**: declared holding/input ranges with read and write
//!   callbacks per address
//! - **RTU framing**: length derived from the function code, CRC-16/MODBUS,
//!   inter-frame silence handling, broadcast support
//! - **Half-duplex control**: idempotent DE/RE switching that releases the
//!   bus only after the output has been flushed
//! - **Non-blocking driver**: one `step()` per host loop iteration, or an
//!   async `run()` loop with the `rtu` feature
//! - **Statistics**: frame, error and byte counters
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Server |
//! |------|----------|--------|
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//!
//! Any other function code addressed to the server is answered with
//! exception 0x01 (Illegal Function).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_modbus_server::{
//!     DirectionController, ModbusRtuServer, SerialPortTransport, ServerConfig,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> voltage_modbus_server::ModbusResult<()> {
//!     let transport = SerialPortTransport::open("/dev/ttyUSB0", 9600)?;
//!     let config = ServerConfig::new(0x11).with_holding_registers(0, 10, 0);
//!
//!     let mut server = ModbusRtuServer::new(config, transport, DirectionController::none());
//!     server.setup()?;
//!     server.on_read_holding_register(0, 1, |_addr, _value| 230)?;
//!
//!     server
//!         .run(Duration::from_millis(1), async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// High-performance PDU with stack-allocated fixed array
pub mod pdu;

/// RTU framing: CRC, frame buffer and request length detection
pub mod rtu;

// ============================================================================
// Server modules
// ============================================================================

/// Holding and input register storage with callbacks
pub mod register_store;

/// Server configuration and protocol limits
pub mod config;

/// RS-485 direction control
pub mod direction;

/// Serial byte transport
pub mod transport;

/// RTU request/response state machine
pub mod engine;

/// Polling server driver
pub mod server;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Error handling ===
pub use error::{ExceptionCode, ModbusError, ModbusResult};

// === Server API ===
pub use config::{RegisterBlock, ServerConfig, ServerLimits, SlaveId};
pub use server::{ModbusRtuServer, ServerStats};

// === Registers ===
pub use register_store::{
    Access, RangeDeclaration, RegisterCallback, RegisterKind, RegisterRange, RegisterStore,
};

// === Hardware seams ===
pub use direction::{Direction, DirectionController, DirectionPin, MAX_SETTLE_TIME};
pub use transport::{FlushStatus, SerialTransport};

#[cfg(feature = "rtu")]
pub use transport::SerialPortTransport;

// === Framing (advanced usage) ===
pub use engine::{FrameEvent, FrameState, RejectReason, RtuFrameEngine};
pub use pdu::{ModbusPdu, ModbusRequest, PduBuilder};
pub use rtu::{crc16, FrameBuffer};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    inter_frame_silence, BROADCAST_ADDRESS, MAX_PDU_SIZE, MAX_READ_REGISTERS, MAX_RTU_FRAME_SIZE,
    MAX_SLAVE_ADDRESS, MAX_WRITE_REGISTERS, MIN_SLAVE_ADDRESS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library information
pub fn info() -> String {
    format!(
        "Voltage Modbus Server v{} - Modbus RTU slave engine by Evan Liu",
        VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info() {
        let info = info();
        assert!(info.contains("Voltage Modbus Server"));
        assert!(info.contains(VERSION));
    }
}
