//! RTU framing primitives
//!
//! An RTU frame is `slave address | PDU | CRC-16 (little-endian)`. This module
//! holds the pieces the frame engine builds on: the CRC, the
//! function-code-derived request length, and a fixed-size frame buffer.

use crc::{Crc, CRC_16_MODBUS};

use crate::constants::{
    FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_REGISTER, FIXED_REQUEST_FRAME_LEN, MAX_RTU_FRAME_SIZE, RTU_CRC_LEN,
    WRITE_MULTIPLE_HEADER_LEN,
};
use crate::error::{ModbusError, ModbusResult};

/// CRC calculator for RTU (polynomial 0xA001 reflected, init 0xFFFF)
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the Modbus CRC-16 of `data`
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Check the trailing little-endian CRC of a complete frame
pub fn verify_crc(frame: &[u8]) -> bool {
    if frame.len() < RTU_CRC_LEN + 1 {
        return false;
    }
    let data_len = frame.len() - RTU_CRC_LEN;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    received == crc16(&frame[..data_len])
}

/// How long a request frame is, judging from the bytes seen so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedLength {
    /// Not enough bytes yet to tell
    NeedMore,
    /// Total frame length including CRC
    Known(usize),
    /// Function code without a derivable length; only silence ends the frame
    Unknown,
}

/// Derive the total request length from the function code (and for FC16 the
/// byte count field).
pub fn expected_request_len(frame: &[u8]) -> ExpectedLength {
    let Some(&function_code) = frame.get(1) else {
        return ExpectedLength::NeedMore;
    };

    match function_code {
        FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS | FC_WRITE_SINGLE_REGISTER => {
            ExpectedLength::Known(FIXED_REQUEST_FRAME_LEN)
        }
        FC_WRITE_MULTIPLE_REGISTERS => match frame.get(WRITE_MULTIPLE_HEADER_LEN - 1) {
            Some(&byte_count) => {
                ExpectedLength::Known(WRITE_MULTIPLE_HEADER_LEN + byte_count as usize + RTU_CRC_LEN)
            }
            None => ExpectedLength::NeedMore,
        },
        _ => ExpectedLength::Unknown,
    }
}

/// Fixed-size buffer holding one RTU frame
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    data: [u8; MAX_RTU_FRAME_SIZE],
    len: usize,
}

impl FrameBuffer {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_RTU_FRAME_SIZE],
            len: 0,
        }
    }

    /// Append one byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_RTU_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "RTU frame exceeds {} bytes",
                MAX_RTU_FRAME_SIZE
            )));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append a slice
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        if self.len + bytes.len() > MAX_RTU_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "RTU frame would exceed max size: {} + {} > {}",
                self.len,
                bytes.len(),
                MAX_RTU_FRAME_SIZE
            )));
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Compute the CRC over the current content and append it little-endian
    pub fn append_crc(&mut self) -> ModbusResult<()> {
        let crc = crc16(self.as_slice());
        self.extend(&crc.to_le_bytes())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Slave address (byte 0)
    #[inline]
    pub fn slave_address(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Function code (byte 1)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().get(1).copied()
    }

    /// PDU without slave address and CRC; empty until the frame is complete
    pub fn pdu(&self) -> &[u8] {
        if self.len < 1 + RTU_CRC_LEN {
            return &[];
        }
        &self.data[1..self.len - RTU_CRC_LEN]
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Format bytes as space-separated hex for packet logging
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_reference_frames() {
        // Modbus application protocol reference request
        assert_eq!(crc16(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]), 0x8776);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
    }

    #[test]
    fn test_verify_crc() {
        let frame = [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87];
        assert!(verify_crc(&frame));

        let mut corrupted = frame;
        corrupted[7] ^= 0x01;
        assert!(!verify_crc(&corrupted));

        assert!(!verify_crc(&[0x01, 0x02]));
    }

    #[test]
    fn test_expected_request_len() {
        assert_eq!(expected_request_len(&[0x11]), ExpectedLength::NeedMore);
        assert_eq!(expected_request_len(&[0x11, 0x03]), ExpectedLength::Known(8));
        assert_eq!(expected_request_len(&[0x11, 0x04]), ExpectedLength::Known(8));
        assert_eq!(expected_request_len(&[0x11, 0x06]), ExpectedLength::Known(8));
        assert_eq!(
            expected_request_len(&[0x11, 0x10, 0x00, 0x01, 0x00]),
            ExpectedLength::NeedMore
        );
        assert_eq!(
            expected_request_len(&[0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04]),
            ExpectedLength::Known(13)
        );
        assert_eq!(expected_request_len(&[0x11, 0x2B]), ExpectedLength::Unknown);
    }

    #[test]
    fn test_frame_buffer_crc_and_pdu() {
        let mut frame = FrameBuffer::new();
        frame.extend(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]).unwrap();
        frame.append_crc().unwrap();

        assert_eq!(
            frame.as_slice(),
            &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]
        );
        assert_eq!(frame.slave_address(), Some(0x11));
        assert_eq!(frame.function_code(), Some(0x03));
        assert_eq!(frame.pdu(), &[0x03, 0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn test_frame_buffer_overflow() {
        let mut frame = FrameBuffer::new();
        for _ in 0..MAX_RTU_FRAME_SIZE {
            frame.push(0xAA).unwrap();
        }
        assert!(frame.push(0xAA).is_err());
        frame.clear();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x01, 0xAB, 0x00]), "01 AB 00");
        assert_eq!(hex_dump(&[]), "");
    }
}
