//! Byte transport for the RTU server
//!
//! [`SerialTransport`] is the capability the server needs from a serial line:
//! non-blocking reads, buffered writes, and a flush that tells when the last
//! byte has physically left the UART. Flushing comes in two flavours:
//!
//! - **Pollable** (default): [`SerialTransport::poll_flush`] is called once per
//!   server step until it reports [`FlushStatus::Complete`].
//! - **Blocking**: transports that can wait for transmission to finish
//!   advertise it through [`SerialTransport::supports_blocking_flush`]; the
//!   server then calls [`SerialTransport::flush_blocking`] right after writing.
//!
//! With the `rtu` feature, [`SerialPortTransport`] implements the trait for a
//! real serial port.

use crate::error::{ModbusError, ModbusResult};

/// Progress of an output flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Every written byte has been transmitted
    Complete,
    /// Bytes are still queued or shifting out
    Pending,
}

/// Serial byte stream consumed by the server
pub trait SerialTransport {
    /// Take the next received byte, `None` if nothing is pending
    fn read_byte(&mut self) -> ModbusResult<Option<u8>>;

    /// Look at the next received byte without consuming it
    fn peek_byte(&mut self) -> ModbusResult<Option<u8>>;

    /// Number of received bytes ready to read
    fn bytes_available(&mut self) -> ModbusResult<usize>;

    /// Queue bytes for transmission
    fn write_bytes(&mut self, data: &[u8]) -> ModbusResult<()>;

    /// Push queued output and report whether it has been fully transmitted
    fn poll_flush(&mut self) -> ModbusResult<FlushStatus>;

    /// Whether [`flush_blocking`](Self::flush_blocking) waits for physical
    /// completion of the transmission
    fn supports_blocking_flush(&self) -> bool {
        false
    }

    /// Block until every written byte has been transmitted
    fn flush_blocking(&mut self) -> ModbusResult<()> {
        Err(ModbusError::protocol(
            "transport does not support blocking flush",
        ))
    }

    /// Configured line speed
    fn baud_rate(&self) -> u32;
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn read_byte(&mut self) -> ModbusResult<Option<u8>> {
        (**self).read_byte()
    }

    fn peek_byte(&mut self) -> ModbusResult<Option<u8>> {
        (**self).peek_byte()
    }

    fn bytes_available(&mut self) -> ModbusResult<usize> {
        (**self).bytes_available()
    }

    fn write_bytes(&mut self, data: &[u8]) -> ModbusResult<()> {
        (**self).write_bytes(data)
    }

    fn poll_flush(&mut self) -> ModbusResult<FlushStatus> {
        (**self).poll_flush()
    }

    fn supports_blocking_flush(&self) -> bool {
        (**self).supports_blocking_flush()
    }

    fn flush_blocking(&mut self) -> ModbusResult<()> {
        (**self).flush_blocking()
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }
}

#[cfg(feature = "rtu")]
pub use serial::SerialPortTransport;

#[cfg(feature = "rtu")]
mod serial {
    use std::io::{ErrorKind, Read, Write};
    use std::time::Duration;

    use bytes::{Buf, BytesMut};
    use tokio_serial::{DataBits, Parity, SerialPort, StopBits};
    use tracing::{debug, info};

    use super::{FlushStatus, SerialTransport};
    use crate::constants::MAX_RTU_FRAME_SIZE;
    use crate::error::{ModbusError, ModbusResult};

    /// [`SerialTransport`] over a serial port opened in non-blocking mode
    pub struct SerialPortTransport {
        port: Box<dyn SerialPort>,
        port_name: String,
        baud_rate: u32,
        /// Byte taken off the port by `peek_byte`
        peeked: Option<u8>,
        /// Output not yet accepted by the driver
        tx: BytesMut,
        blocking_flush: bool,
    }

    impl SerialPortTransport {
        /// Open `port_name` at `baud_rate`, 8N1
        pub fn open(port_name: &str, baud_rate: u32) -> ModbusResult<Self> {
            Self::open_with(port_name, baud_rate, Parity::None, StopBits::One)
        }

        /// Open with explicit parity and stop bits
        pub fn open_with(
            port_name: &str,
            baud_rate: u32,
            parity: Parity,
            stop_bits: StopBits,
        ) -> ModbusResult<Self> {
            let port = tokio_serial::new(port_name, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(parity)
                .stop_bits(stop_bits)
                .timeout(Duration::ZERO)
                .open()
                .map_err(|e| {
                    ModbusError::io(format!("Failed to open serial port {}: {}", port_name, e))
                })?;

            info!(
                "Opened serial port {} at {} baud ({:?}, {:?})",
                port_name, baud_rate, parity, stop_bits
            );
            Ok(Self::from_port(port, port_name, baud_rate))
        }

        /// Wrap an already opened port
        pub fn from_port(port: Box<dyn SerialPort>, port_name: &str, baud_rate: u32) -> Self {
            Self {
                port,
                port_name: port_name.to_string(),
                baud_rate,
                peeked: None,
                tx: BytesMut::with_capacity(MAX_RTU_FRAME_SIZE),
                blocking_flush: true,
            }
        }

        /// Use the driver's drain (`tcdrain`) instead of polling the output
        /// queue. Enabled by default.
        pub fn with_blocking_flush(mut self, enabled: bool) -> Self {
            self.blocking_flush = enabled;
            self
        }

        pub fn port_name(&self) -> &str {
            &self.port_name
        }

        fn pending_input(&self) -> ModbusResult<usize> {
            let queued = self
                .port
                .bytes_to_read()
                .map_err(|e| ModbusError::io(format!("{}: {}", self.port_name, e)))?;
            Ok(queued as usize)
        }

        /// Hand as much of `tx` to the driver as it accepts without blocking
        fn push_output(&mut self) -> ModbusResult<()> {
            while !self.tx.is_empty() {
                match self.port.write(&self.tx) {
                    Ok(0) => break,
                    Ok(n) => self.tx.advance(n),
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                        break
                    }
                    Err(e) => {
                        self.tx.clear();
                        return Err(ModbusError::io(format!(
                            "Serial write error on {}: {}",
                            self.port_name, e
                        )));
                    }
                }
            }
            Ok(())
        }
    }

    impl SerialTransport for SerialPortTransport {
        fn read_byte(&mut self) -> ModbusResult<Option<u8>> {
            if let Some(byte) = self.peeked.take() {
                return Ok(Some(byte));
            }
            if self.pending_input()? == 0 {
                return Ok(None);
            }

            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(1) => Ok(Some(byte[0])),
                Ok(_) => Ok(None),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    Ok(None)
                }
                Err(e) => Err(ModbusError::io(format!(
                    "Serial read error on {}: {}",
                    self.port_name, e
                ))),
            }
        }

        fn peek_byte(&mut self) -> ModbusResult<Option<u8>> {
            if self.peeked.is_none() {
                self.peeked = self.read_byte()?;
            }
            Ok(self.peeked)
        }

        fn bytes_available(&mut self) -> ModbusResult<usize> {
            Ok(self.pending_input()? + usize::from(self.peeked.is_some()))
        }

        fn write_bytes(&mut self, data: &[u8]) -> ModbusResult<()> {
            self.tx.extend_from_slice(data);
            self.push_output()
        }

        fn poll_flush(&mut self) -> ModbusResult<FlushStatus> {
            self.push_output()?;
            if !self.tx.is_empty() {
                return Ok(FlushStatus::Pending);
            }
            let queued = self
                .port
                .bytes_to_write()
                .map_err(|e| ModbusError::io(format!("{}: {}", self.port_name, e)))?;
            if queued == 0 {
                Ok(FlushStatus::Complete)
            } else {
                Ok(FlushStatus::Pending)
            }
        }

        fn supports_blocking_flush(&self) -> bool {
            self.blocking_flush
        }

        fn flush_blocking(&mut self) -> ModbusResult<()> {
            while !self.tx.is_empty() {
                self.push_output()?;
            }
            self.port.flush()?;
            debug!("Drained output of {}", self.port_name);
            Ok(())
        }

        fn baud_rate(&self) -> u32 {
            self.baud_rate
        }
    }
}
