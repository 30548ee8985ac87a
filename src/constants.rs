//! Modbus RTU protocol constants based on official specification
//!
//! These constants are derived from the Modbus Application Protocol and the
//! Modbus over Serial Line specifications:
//! - Maximum RTU ADU size: 256 bytes (RS485 limit)
//! - Maximum PDU size: 253 bytes (ADU - slave address - CRC)
//! - Register limits are calculated to fit within the PDU size constraint

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum RTU ADU (Application Data Unit) size
/// Format: Slave Address(1) + PDU(max 253) + CRC(2) = 256 bytes
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// This is the fundamental limit inherited from RS485 implementation:
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Length of the trailing CRC field of an RTU frame
pub const RTU_CRC_LEN: usize = 2;

/// Smallest well-formed RTU frame: Slave Address(1) + FC(1) + CRC(2)
pub const MIN_RTU_FRAME_SIZE: usize = 4;

/// Total length of FC03/FC04/FC06 requests
/// Slave(1) + FC(1) + Address(2) + Quantity/Value(2) + CRC(2) = 8 bytes
pub const FIXED_REQUEST_FRAME_LEN: usize = 8;

/// Header length of an FC16 request up to and including the byte count
/// Slave(1) + FC(1) + Address(2) + Quantity(2) + Byte Count(1) = 7 bytes
pub const WRITE_MULTIPLE_HEADER_LEN: usize = 7;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Calculation for response PDU:
/// - Function Code: 1 byte
/// - Byte Count: 1 byte
/// - Register Data: N × 2 bytes
/// - Total: 1 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ (253 - 2) / 2 = 125.5 → 125 registers
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Calculation for request PDU:
/// - Function Code: 1 byte
/// - Starting Address: 2 bytes
/// - Quantity of Registers: 2 bytes
/// - Byte Count: 1 byte
/// - Register Values: N × 2 bytes
/// - Total: 1 + 2 + 2 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ (253 - 6) / 2 = 123.5 → 123 registers
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Addressing
// ============================================================================

/// Broadcast slave address: dispatched by every server, never answered
pub const BROADCAST_ADDRESS: u8 = 0;

/// Lowest assignable slave address
pub const MIN_SLAVE_ADDRESS: u8 = 1;

/// Highest assignable slave address (248-255 are reserved)
pub const MAX_SLAVE_ADDRESS: u8 = 247;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

// ============================================================================
// Serial Line Timing
// ============================================================================

/// Bits per RTU character: start(1) + data(8) + parity/stop(1) + stop(1)
pub const BITS_PER_CHARACTER: u32 = 11;

/// Baud rate above which the fixed inter-frame delay applies
pub const FIXED_SILENCE_BAUD_THRESHOLD: u32 = 19_200;

/// Fixed t3.5 for baud rates above 19200 (Modbus over Serial Line §2.5.1.1)
pub const FIXED_INTER_FRAME_SILENCE: Duration = Duration::from_micros(1750);

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Inter-frame silence (t3.5) for the given baud rate.
///
/// 3.5 character times of 11 bits each; at rates above 19200 baud the
/// specification fixes the value at 1.75 ms.
pub fn inter_frame_silence(baud_rate: u32) -> Duration {
    if baud_rate == 0 || baud_rate > FIXED_SILENCE_BAUD_THRESHOLD {
        return FIXED_INTER_FRAME_SILENCE;
    }
    // 3.5 * 11 bits = 38.5 bit times
    let micros = (38_500_000u64).div_ceil(baud_rate as u64);
    Duration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MAX_RTU_FRAME_SIZE, 256);
        assert_eq!(MAX_PDU_SIZE, MAX_RTU_FRAME_SIZE - 1 - RTU_CRC_LEN);
        assert_eq!(FIXED_REQUEST_FRAME_LEN, 8);
    }

    #[test]
    fn test_register_limits() {
        // Verify read register limit calculation
        let read_pdu_size = 1 + 1 + (MAX_READ_REGISTERS as usize * 2);
        assert!(read_pdu_size <= MAX_PDU_SIZE);

        // Verify write register limit calculation
        let write_pdu_size = 1 + 2 + 2 + 1 + (MAX_WRITE_REGISTERS as usize * 2);
        assert!(write_pdu_size <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_inter_frame_silence() {
        // 9600 baud: 38.5 / 9600 s ≈ 4010 µs
        assert_eq!(inter_frame_silence(9600), Duration::from_micros(4011));
        assert_eq!(inter_frame_silence(19_200), Duration::from_micros(2006));
        assert_eq!(inter_frame_silence(115_200), FIXED_INTER_FRAME_SILENCE);
        assert_eq!(inter_frame_silence(0), FIXED_INTER_FRAME_SILENCE);
    }
}
