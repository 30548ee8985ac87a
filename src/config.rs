//! # Server Configuration
//!
//! Setup-time configuration of an RTU server: slave address, register ranges
//! to pre-allocate, protocol limits and frame timing.
//!
//! ## Example
//!
//! ```rust
//! use voltage_modbus_server::{ServerConfig, ServerLimits};
//!
//! let config = ServerConfig::new(0x11)
//!     .with_holding_registers(0, 10, 0)
//!     .with_input_registers(100, 4, 0xFFFF)
//!     .with_limits(ServerLimits::new().with_max_read_registers(32));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.register_blocks.len(), 2);
//! ```

use std::time::Duration;

use crate::constants::{
    inter_frame_silence, MAX_READ_REGISTERS, MAX_SLAVE_ADDRESS, MAX_WRITE_REGISTERS,
    MIN_SLAVE_ADDRESS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::register_store::RegisterKind;

/// Modbus slave address
pub type SlaveId = u8;

/// Default maximum registers per read request (Modbus specification).
pub const DEFAULT_MAX_READ_REGISTERS: u16 = MAX_READ_REGISTERS;

/// Default maximum registers per write request (Modbus specification).
pub const DEFAULT_MAX_WRITE_REGISTERS: u16 = MAX_WRITE_REGISTERS;

/// Per-request quantity limits enforced by the server.
///
/// Requests above these limits are answered with Illegal Data Value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLimits {
    /// Maximum registers per FC03/FC04 request.
    pub max_read_registers: u16,
    /// Maximum registers per FC16 request.
    pub max_write_registers: u16,
}

impl ServerLimits {
    /// Create limits with the Modbus specification values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum read registers.
    pub fn with_max_read_registers(mut self, count: u16) -> Self {
        self.max_read_registers = count;
        self
    }

    /// Set maximum write registers.
    pub fn with_max_write_registers(mut self, count: u16) -> Self {
        self.max_write_registers = count;
        self
    }

    /// Check limits against the protocol maximums.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.max_read_registers == 0 || self.max_read_registers > MAX_READ_REGISTERS {
            return Err(ModbusError::configuration(format!(
                "max_read_registers must be 1-{}, got {}",
                MAX_READ_REGISTERS, self.max_read_registers
            )));
        }
        if self.max_write_registers == 0 || self.max_write_registers > MAX_WRITE_REGISTERS {
            return Err(ModbusError::configuration(format!(
                "max_write_registers must be 1-{}, got {}",
                MAX_WRITE_REGISTERS, self.max_write_registers
            )));
        }
        Ok(())
    }
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_read_registers: DEFAULT_MAX_READ_REGISTERS,
            max_write_registers: DEFAULT_MAX_WRITE_REGISTERS,
        }
    }
}

/// A register range to allocate at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBlock {
    pub kind: RegisterKind,
    pub start: u16,
    pub count: u16,
    pub initial_value: u16,
}

/// RTU server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address this server answers to (1-247)
    pub slave_id: SlaveId,
    /// Ranges declared by `setup()`
    pub register_blocks: Vec<RegisterBlock>,
    /// Quantity limits per request
    pub limits: ServerLimits,
    /// Override for t3.5; derived from the baud rate when `None`
    pub inter_frame_silence: Option<Duration>,
    /// Hex-dump every request and response at debug level
    pub packet_logging: bool,
}

impl ServerConfig {
    /// Configuration for `slave_id` with no registers
    pub fn new(slave_id: SlaveId) -> Self {
        Self {
            slave_id,
            register_blocks: Vec::new(),
            limits: ServerLimits::default(),
            inter_frame_silence: None,
            packet_logging: false,
        }
    }

    pub fn with_slave_id(mut self, slave_id: SlaveId) -> Self {
        self.slave_id = slave_id;
        self
    }

    /// Pre-allocate `count` holding registers
    pub fn with_holding_registers(mut self, start: u16, count: u16, initial_value: u16) -> Self {
        self.register_blocks.push(RegisterBlock {
            kind: RegisterKind::Holding,
            start,
            count,
            initial_value,
        });
        self
    }

    /// Pre-allocate `count` input registers
    pub fn with_input_registers(mut self, start: u16, count: u16, initial_value: u16) -> Self {
        self.register_blocks.push(RegisterBlock {
            kind: RegisterKind::Input,
            start,
            count,
            initial_value,
        });
        self
    }

    pub fn with_limits(mut self, limits: ServerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_inter_frame_silence(mut self, silence: Duration) -> Self {
        self.inter_frame_silence = Some(silence);
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Effective t3.5 at the given baud rate
    pub fn silence_for(&self, baud_rate: u32) -> Duration {
        self.inter_frame_silence
            .unwrap_or_else(|| inter_frame_silence(baud_rate))
    }

    /// Validate slave address, limits and timing
    pub fn validate(&self) -> ModbusResult<()> {
        if !(MIN_SLAVE_ADDRESS..=MAX_SLAVE_ADDRESS).contains(&self.slave_id) {
            return Err(ModbusError::InvalidSlaveId { id: self.slave_id });
        }
        self.limits.validate()?;
        if self.inter_frame_silence == Some(Duration::ZERO) {
            return Err(ModbusError::configuration(
                "inter_frame_silence must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(MIN_SLAVE_ADDRESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ServerLimits::new();
        assert_eq!(limits.max_read_registers, 125);
        assert_eq!(limits.max_write_registers, 123);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_limits_out_of_protocol_bounds() {
        assert!(ServerLimits::new()
            .with_max_read_registers(126)
            .validate()
            .is_err());
        assert!(ServerLimits::new()
            .with_max_write_registers(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_slave_id_validation() {
        assert!(ServerConfig::new(1).validate().is_ok());
        assert!(ServerConfig::new(247).validate().is_ok());
        assert_eq!(
            ServerConfig::new(0).validate(),
            Err(ModbusError::InvalidSlaveId { id: 0 })
        );
        assert_eq!(
            ServerConfig::new(248).validate(),
            Err(ModbusError::InvalidSlaveId { id: 248 })
        );
    }

    #[test]
    fn test_silence_override() {
        let config = ServerConfig::new(1);
        assert_eq!(config.silence_for(115_200), Duration::from_micros(1750));

        let config = config.with_inter_frame_silence(Duration::from_millis(10));
        assert_eq!(config.silence_for(9600), Duration::from_millis(10));

        let zero = ServerConfig::new(1).with_inter_frame_silence(Duration::ZERO);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_register_blocks() {
        let config = ServerConfig::new(5)
            .with_holding_registers(0, 10, 0)
            .with_input_registers(0, 2, 7);
        assert_eq!(
            config.register_blocks,
            vec![
                RegisterBlock {
                    kind: RegisterKind::Holding,
                    start: 0,
                    count: 10,
                    initial_value: 0
                },
                RegisterBlock {
                    kind: RegisterKind::Input,
                    start: 0,
                    count: 2,
                    initial_value: 7
                },
            ]
        );
    }
}
