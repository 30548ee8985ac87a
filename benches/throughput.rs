//! Throughput benchmarks

use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use voltage_modbus_server::{crc16, RegisterKind, RegisterStore, RtuFrameEngine};

const SLAVE: u8 = 0x01;

fn frame(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&crc16(body).to_le_bytes());
    frame
}

fn store() -> RegisterStore {
    let mut store = RegisterStore::new();
    store
        .declare_range(RegisterKind::Holding, 0, 125, 0x1234)
        .unwrap();
    store
}

fn crc_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..254).map(|i| i as u8).collect();

    let mut group = c.benchmark_group("crc");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("crc16_max_frame", |b| b.iter(|| crc16(black_box(&data))));
    group.finish();
}

fn engine_benchmark(c: &mut Criterion) {
    let read = frame(&[SLAVE, 0x03, 0x00, 0x00, 0x00, 0x7D]);
    let mut write_body = vec![SLAVE, 0x10, 0x00, 0x00, 0x00, 0x7B, 0xF6];
    for i in 0..123u16 {
        write_body.extend_from_slice(&i.to_be_bytes());
    }
    let write = frame(&write_body);

    let mut group = c.benchmark_group("engine");

    group.throughput(Throughput::Bytes(read.len() as u64));
    group.bench_function("read_125_registers", |b| {
        let mut store = store();
        let mut engine = RtuFrameEngine::new(SLAVE, Duration::from_micros(1750));
        let now = Instant::now();
        b.iter(|| {
            for &byte in black_box(&read) {
                engine.feed(byte, now, &mut store);
            }
            let len = engine.response().map_or(0, |r| r.len());
            engine.complete_response();
            black_box(len)
        })
    });

    group.throughput(Throughput::Bytes(write.len() as u64));
    group.bench_function("write_123_registers", |b| {
        let mut store = store();
        store
            .bind_callback(RegisterKind::Holding, 0, voltage_modbus_server::Access::Write, 123, |_a, v| v ^ 0xFFFF)
            .unwrap();
        let mut engine = RtuFrameEngine::new(SLAVE, Duration::from_micros(1750));
        let now = Instant::now();
        b.iter(|| {
            for &byte in black_box(&write) {
                engine.feed(byte, now, &mut store);
            }
            engine.complete_response();
        })
    });

    group.finish();
}

criterion_group!(benches, crc_benchmark, engine_benchmark);
criterion_main!(benches);
