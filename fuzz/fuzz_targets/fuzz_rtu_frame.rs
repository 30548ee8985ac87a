#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use voltage_modbus_server::{RegisterKind, RegisterStore, RtuFrameEngine};

#[derive(Debug, Arbitrary)]
struct Input {
    slave_id: u8,
    /// Gaps in microseconds between consecutive bytes
    gaps: Vec<u16>,
    bytes: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let slave_id = input.slave_id.clamp(1, 247);
    let mut store = RegisterStore::new();
    let _ = store.declare_range(RegisterKind::Holding, 0, 64, 0);
    let _ = store.declare_range(RegisterKind::Input, 100, 16, 0xFFFF);

    let mut engine = RtuFrameEngine::new(slave_id, Duration::from_micros(1750));
    let mut now = Instant::now();

    for (i, &byte) in input.bytes.iter().enumerate() {
        let gap = input.gaps.get(i).copied().unwrap_or(0);
        now += Duration::from_micros(gap as u64);
        engine.feed(byte, now, &mut store);

        if let Some(response) = engine.response() {
            assert_eq!(response[0], slave_id);
            assert!(response.len() >= 5);
            engine.complete_response();
        }
    }
    engine.poll_silence(now + Duration::from_secs(1), &mut store);
});
