//! Voltage Modbus RTU Slave
//!
//! Serves a small register map on a serial port:
//! - Holding registers 0..10, writable by the master (register 9 doubles
//!   every value written to it)
//! - Input registers 0..4: uptime seconds (lo/hi), request counter, constant
//!
//! Usage: cargo run --features rtu --bin rtu_slave [port] [baud] [slave_id]
//! Example: cargo run --features rtu --bin rtu_slave /dev/ttyUSB0 9600 17
//!
//! Log level follows `RUST_LOG` (default `info`); set
//! `RUST_LOG=voltage_modbus_server=debug` to see packet dumps.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};
use voltage_modbus_server::{
    DirectionController, ModbusResult, ModbusRtuServer, SerialPortTransport, ServerConfig,
};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if let Err(e) = serve().await {
        error!("RTU slave stopped: {}", e);
        std::process::exit(1);
    }
}

async fn serve() -> ModbusResult<()> {
    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let baud_rate = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(voltage_modbus_server::constants::DEFAULT_BAUD_RATE);
    let slave_id = args.next().and_then(|s| s.parse().ok()).unwrap_or(1);

    info!("{}", voltage_modbus_server::info());

    let transport = SerialPortTransport::open(&port, baud_rate)?;
    let config = ServerConfig::new(slave_id)
        .with_holding_registers(0, 10, 0)
        .with_input_registers(0, 4, 0)
        .with_packet_logging(true);

    let mut server = ModbusRtuServer::new(config, transport, DirectionController::none());
    server.setup()?;

    let started = Instant::now();
    let requests = Arc::new(AtomicU16::new(0));

    server.on_write_holding_register(9, 1, |_addr, value| value.wrapping_mul(2))?;
    server.on_read_input_register(0, 2, move |addr, _value| {
        let secs = started.elapsed().as_secs() as u32;
        if addr == 0 {
            secs as u16
        } else {
            (secs >> 16) as u16
        }
    })?;
    {
        let requests = Arc::clone(&requests);
        server.on_read_input_register(2, 1, move |_addr, _value| {
            requests.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
        })?;
    }
    server.write_input_register(3, 0x5A5A)?;

    server
        .run(POLL_INTERVAL, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await;

    let stats = server.stats();
    info!(
        "Served {} responses ({} exceptions), {} CRC errors, {} bytes in / {} bytes out",
        stats.responses_sent,
        stats.exceptions_sent,
        stats.crc_errors,
        stats.bytes_received,
        stats.bytes_sent
    );
    Ok(())
}
