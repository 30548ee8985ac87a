//! Error types for the RTU server engine
//!
//! Errors fall into two groups. Configuration errors are returned to the host
//! application at setup time and indicate a programming mistake. Runtime
//! errors (transport failures, protocol violations) never cross the wire as
//! anything but silence or a well-formed exception response; see
//! [`ExceptionCode`].

use std::fmt;

use thiserror::Error;

use crate::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
    EXCEPTION_SERVER_DEVICE_FAILURE,
};
use crate::register_store::RegisterKind;

/// Result type used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors produced by the register store, frame engine and transports
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModbusError {
    /// Address not covered by any declared range
    #[error("{kind} register {address} is out of range")]
    OutOfRange { kind: RegisterKind, address: u16 },

    /// A range overlaps a previously declared range with different bounds
    #[error(
        "{kind} range {start}+{count} conflicts with declared range {existing_start}+{existing_count}"
    )]
    RangeConflict {
        kind: RegisterKind,
        start: u16,
        count: u16,
        existing_start: u16,
        existing_count: u16,
    },

    /// Slave address outside 1-247
    #[error("Invalid slave id: {id} (must be 1-247)")]
    InvalidSlaveId { id: u8 },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Request data rejected by the protocol rules
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Unsupported function code
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Frame format or CRC error
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Protocol violation
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Transport I/O failure
    #[error("IO error: {message}")]
    Io { message: String },
}

impl ModbusError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ModbusError::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        ModbusError::InvalidData {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        ModbusError::InvalidFunction { code }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        ModbusError::Frame {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ModbusError::Protocol {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        ModbusError::Io {
            message: message.into(),
        }
    }

    /// Whether this error stems from setup-time configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ModbusError::RangeConflict { .. }
                | ModbusError::InvalidSlaveId { .. }
                | ModbusError::Configuration { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::io(err.to_string())
    }
}

/// Modbus exception codes a server sends back to the requester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExceptionCode {
    /// 0x01 - function code not supported by this server
    IllegalFunction,
    /// 0x02 - address outside the declared register map
    IllegalDataAddress,
    /// 0x03 - quantity or byte count not acceptable
    IllegalDataValue,
    /// 0x04 - unrecoverable error while serving the request
    ServerDeviceFailure,
}

impl ExceptionCode {
    /// Wire value of the exception code
    #[inline]
    pub fn to_u8(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            ExceptionCode::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            ExceptionCode::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
            ExceptionCode::ServerDeviceFailure => EXCEPTION_SERVER_DEVICE_FAILURE,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::ServerDeviceFailure => "Server Device Failure",
        };
        write!(f, "{} (0x{:02X})", name, self.to_u8())
    }
}

impl From<&ModbusError> for ExceptionCode {
    fn from(err: &ModbusError) -> Self {
        match err {
            ModbusError::OutOfRange { .. } => ExceptionCode::IllegalDataAddress,
            ModbusError::InvalidFunction { .. } => ExceptionCode::IllegalFunction,
            ModbusError::InvalidData { .. } => ExceptionCode::IllegalDataValue,
            _ => ExceptionCode::ServerDeviceFailure,
        }
    }
}
