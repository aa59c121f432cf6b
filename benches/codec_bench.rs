//! Criterion benchmarks for the codec and the buffered send path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use memwire::network::{connect, Listener};
use memwire::protocol::{AccessKind, Array, MemAccess, Message};
use memwire::ChannelConfig;

fn sample(i: u64) -> MemAccess {
    MemAccess::new(AccessKind::ReadWrite, i, i << 6, (i % 4) as u8, 7)
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("memaccess_encode", |b| {
        let msg = sample(42);
        let mut out = [0u8; 31];
        b.iter(|| black_box(&msg).encode(black_box(&mut out)).unwrap());
    });

    group.bench_function("memaccess_decode", |b| {
        let bytes = sample(42).to_bytes().unwrap();
        b.iter(|| MemAccess::decode(black_box(&bytes)).unwrap());
    });

    for batch_size in [16u64, 128, 1024].iter() {
        group.throughput(Throughput::Elements(*batch_size));
        let array: Array<MemAccess> = (0..*batch_size).map(sample).collect();
        let bytes = array.to_bytes().unwrap();

        group.bench_function(format!("array_encode_{}", batch_size), |b| {
            let mut out = vec![0u8; bytes.len()];
            b.iter(|| array.encode(black_box(&mut out)).unwrap());
        });
        group.bench_function(format!("array_decode_{}", batch_size), |b| {
            b.iter(|| Array::<MemAccess>::decode(black_box(&bytes)).unwrap());
        });
    }

    group.finish();
}

fn bench_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("send");
    group.throughput(Throughput::Elements(1));

    let dir = std::env::temp_dir();
    let config = ChannelConfig::new(std::process::id()).with_socket_dir(&dir);
    let listener = Listener::bind(&config).unwrap();
    let mut socket = connect(&config).unwrap();

    // Drain the peer so flushes never block on a full kernel buffer
    let mut server = listener.accept_one().unwrap();
    let drain = std::thread::spawn(move || {
        let mut buf = vec![0u8; 4096];
        while server.receive_dynamic(&mut buf, true).is_ok() {}
    });

    group.bench_function("buffered_memaccess", |b| {
        let mut i = 0u64;
        b.iter(|| {
            socket.send(black_box(&sample(i))).unwrap();
            i = i.wrapping_add(1);
        });
    });

    group.finish();
    drop(socket);
    let _ = drain.join();
}

criterion_group!(benches, bench_codec, bench_send);
criterion_main!(benches);
