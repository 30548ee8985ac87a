//! Modbus PDU handling for the server side
//!
//! Requests are parsed out of a received PDU into [`ModbusRequest`]; responses
//! are assembled with [`PduBuilder`] into a stack-allocated [`ModbusPdu`].

use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE,
};
use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::register_store::RegisterKind;

/// High-performance PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_PDU_SIZE],
    /// Actual data length
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        for byte in value.to_be_bytes() {
            self.push(byte)?;
        }
        Ok(())
    }

    /// Get immutable data slice
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

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.as_slice().get(1).copied()
        } else {
            None
        }
    }

    /// Get human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & !EXCEPTION_FLAG {
            FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
            FC_READ_INPUT_REGISTERS => "Read Input Registers",
            FC_WRITE_SINGLE_REGISTER => "Write Single Register",
            FC_WRITE_MULTIPLE_REGISTERS => "Write Multiple Registers",
            _ => "Unsupported Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// A request decoded from a received PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusRequest {
    /// FC03 / FC04
    ReadRegisters {
        kind: RegisterKind,
        address: u16,
        quantity: u16,
    },
    /// FC06
    WriteSingleRegister { address: u16, value: u16 },
    /// FC16
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl ModbusRequest {
    /// Decode a request PDU (function code first).
    ///
    /// Fails with [`ModbusError::InvalidFunction`] for unsupported codes and
    /// [`ModbusError::InvalidData`] for a malformed body or inconsistent byte
    /// count. Map the error through [`ExceptionCode::from`] to get the
    /// exception to answer with.
    pub fn parse(pdu: &[u8]) -> ModbusResult<Self> {
        let (&function_code, body) = pdu
            .split_first()
            .ok_or_else(|| ModbusError::invalid_function(0))?;

        let word = |index: usize| -> ModbusResult<u16> {
            match body.get(index..index + 2) {
                Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
                None => Err(ModbusError::invalid_data(format!(
                    "FC{:02X} request truncated at byte {}",
                    function_code,
                    index + 1
                ))),
            }
        };

        match function_code {
            FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS => {
                let kind = if function_code == FC_READ_HOLDING_REGISTERS {
                    RegisterKind::Holding
                } else {
                    RegisterKind::Input
                };
                Ok(ModbusRequest::ReadRegisters {
                    kind,
                    address: word(0)?,
                    quantity: word(2)?,
                })
            }
            FC_WRITE_SINGLE_REGISTER => Ok(ModbusRequest::WriteSingleRegister {
                address: word(0)?,
                value: word(2)?,
            }),
            FC_WRITE_MULTIPLE_REGISTERS => {
                let address = word(0)?;
                let quantity = word(2)?;
                let byte_count = *body
                    .get(4)
                    .ok_or_else(|| ModbusError::invalid_data("FC16 request without byte count"))?
                    as usize;
                let data = &body[5.min(body.len())..];

                if byte_count != quantity as usize * 2 || data.len() != byte_count {
                    debug!(
                        "FC16 byte count mismatch: quantity={}, byte_count={}, data_len={}",
                        quantity,
                        byte_count,
                        data.len()
                    );
                    return Err(ModbusError::invalid_data(format!(
                        "FC16 byte count {} does not match quantity {}",
                        byte_count, quantity
                    )));
                }

                let values = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(ModbusRequest::WriteMultipleRegisters { address, values })
            }
            _ => Err(ModbusError::invalid_function(function_code)),
        }
    }

    /// Function code of this request
    pub fn function_code(&self) -> u8 {
        match self {
            ModbusRequest::ReadRegisters {
                kind: RegisterKind::Holding,
                ..
            } => FC_READ_HOLDING_REGISTERS,
            ModbusRequest::ReadRegisters {
                kind: RegisterKind::Input,
                ..
            } => FC_READ_INPUT_REGISTERS,
            ModbusRequest::WriteSingleRegister { .. } => FC_WRITE_SINGLE_REGISTER,
            ModbusRequest::WriteMultipleRegisters { .. } => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    /// Create a new builder
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    /// Set function code
    #[inline]
    pub fn function_code(mut self, fc: u8) -> ModbusResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    /// Add a big-endian word (address, quantity or register value)
    #[inline]
    pub fn word(mut self, value: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(value)?;
        Ok(self)
    }

    /// Add a byte
    #[inline]
    pub fn byte(mut self, b: u8) -> ModbusResult<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    /// Build the PDU
    #[inline]
    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            debug!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                ModbusPdu::function_code_description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }

    /// FC03/FC04 response: byte count followed by big-endian registers
    pub fn build_read_response(fc: u8, registers: &[u16]) -> ModbusResult<ModbusPdu> {
        let byte_count = u8::try_from(registers.len() * 2).map_err(|_| {
            ModbusError::protocol(format!("{} registers do not fit a PDU", registers.len()))
        })?;

        let mut builder = PduBuilder::new().function_code(fc)?.byte(byte_count)?;
        for &value in registers {
            builder = builder.word(value)?;
        }
        Ok(builder.build())
    }

    /// FC06 response: echo of the requested address and value
    pub fn build_write_single_response(address: u16, value: u16) -> ModbusResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_WRITE_SINGLE_REGISTER)?
            .word(address)?
            .word(value)?
            .build())
    }

    /// FC16 response: starting address and quantity written
    pub fn build_write_multiple_response(address: u16, quantity: u16) -> ModbusResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
            .word(address)?
            .word(quantity)?
            .build())
    }

    /// Exception response: `fc | 0x80` followed by the exception code
    pub fn build_exception(fc: u8, code: ExceptionCode) -> ModbusResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(fc | EXCEPTION_FLAG)?
            .byte(code.to_u8())?
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_basic_operations() {
        let mut pdu = ModbusPdu::new();
        assert!(pdu.is_empty());

        pdu.push(0x03).unwrap();
        pdu.push_u16(0x0100).unwrap();
        assert_eq!(pdu.function_code(), Some(0x03));
        assert!(!pdu.is_exception());
        assert_eq!(pdu.as_slice(), &[0x03, 0x01, 0x00]);
    }

    #[test]
    fn test_pdu_full() {
        let mut pdu = ModbusPdu::new();
        for _ in 0..MAX_PDU_SIZE {
            pdu.push(0).unwrap();
        }
        assert!(pdu.push(0).is_err());
    }

    #[test]
    fn test_parse_read_holding() {
        let request = ModbusRequest::parse(&[0x03, 0x00, 0x6B, 0x00, 0x03]).unwrap();
        assert_eq!(
            request,
            ModbusRequest::ReadRegisters {
                kind: RegisterKind::Holding,
                address: 0x006B,
                quantity: 3
            }
        );
        assert_eq!(request.function_code(), 0x03);
    }

    #[test]
    fn test_parse_read_input() {
        let request = ModbusRequest::parse(&[0x04, 0x00, 0x08, 0x00, 0x01]).unwrap();
        assert_eq!(request.function_code(), 0x04);
    }

    #[test]
    fn test_parse_write_single() {
        let request = ModbusRequest::parse(&[0x06, 0x00, 0x01, 0x00, 0x03]).unwrap();
        assert_eq!(
            request,
            ModbusRequest::WriteSingleRegister {
                address: 1,
                value: 3
            }
        );
    }

    #[test]
    fn test_parse_write_multiple() {
        let request =
            ModbusRequest::parse(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02])
                .unwrap();
        assert_eq!(
            request,
            ModbusRequest::WriteMultipleRegisters {
                address: 1,
                values: vec![0x000A, 0x0102]
            }
        );
    }

    #[test]
    fn test_parse_write_multiple_byte_count_mismatch() {
        // quantity 2 but byte count 2
        let result = ModbusRequest::parse(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x02, 0x00, 0x0A]);
        let err = result.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        assert_eq!(ExceptionCode::from(&err), ExceptionCode::IllegalDataValue);
    }

    #[test]
    fn test_parse_unsupported_function() {
        let err = ModbusRequest::parse(&[0x01, 0x00, 0x00, 0x00, 0x08]).unwrap_err();
        assert_eq!(err, ModbusError::InvalidFunction { code: 0x01 });
        assert_eq!(ExceptionCode::from(&err), ExceptionCode::IllegalFunction);

        let err = ModbusRequest::parse(&[]).unwrap_err();
        assert_eq!(ExceptionCode::from(&err), ExceptionCode::IllegalFunction);
    }

    #[test]
    fn test_parse_truncated_body() {
        let err = ModbusRequest::parse(&[0x03, 0x00]).unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
        assert_eq!(ExceptionCode::from(&err), ExceptionCode::IllegalDataValue);
    }

    #[test]
    fn test_build_read_response() {
        let pdu = PduBuilder::build_read_response(0x03, &[0x022B, 0x0000, 0x0064]).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]
        );
    }

    #[test]
    fn test_build_write_responses() {
        let single = PduBuilder::build_write_single_response(0x0001, 0x0003).unwrap();
        assert_eq!(single.as_slice(), &[0x06, 0x00, 0x01, 0x00, 0x03]);

        let multiple = PduBuilder::build_write_multiple_response(0x0001, 2).unwrap();
        assert_eq!(multiple.as_slice(), &[0x10, 0x00, 0x01, 0x00, 0x02]);
    }

    #[test]
    fn test_build_exception() {
        let pdu = PduBuilder::build_exception(0x03, ExceptionCode::IllegalDataAddress).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.as_slice(), &[0x83, 0x02]);
        assert_eq!(pdu.exception_code(), Some(0x02));
    }
}
