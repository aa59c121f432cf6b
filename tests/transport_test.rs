//! End-to-end transport tests over real Unix-domain sockets.
//!
//! The listener is always bound before the connector starts, so the
//! connect-after-listen ordering holds without extra signalling.
//!
//! Usage:
//!   cargo test --test transport_test -- --nocapture

use std::thread;
use std::time::{Duration, Instant};

use memwire::network::{connect, Listener, Socket, MAX_MESSAGE_LEN};
use memwire::protocol::{
    AccessKind, AnyMessage, Array, MBind, MBindFlags, MemAccess, MemPolicyMode, Message,
};
use memwire::{ChannelConfig, Error};
use tempfile::TempDir;

fn channel(id: u32) -> (TempDir, ChannelConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = ChannelConfig::new(id).with_socket_dir(dir.path());
    (dir, config)
}

/// Both ends in the current thread: connect lands in the backlog, then
/// accept picks it up.
fn connected_pair(config: &ChannelConfig) -> (Socket, Socket) {
    let listener = Listener::bind(config).unwrap();
    let connector = connect(config).unwrap();
    let server = listener.accept_one().unwrap();
    (server, connector)
}

fn sample_bind() -> MBind {
    MBind::new(0x435436534, 4096 * 16, 0x2, MemPolicyMode::Interleave, MBindFlags::empty())
}

#[test]
fn connector_to_listener_memaccess() {
    let (_dir, config) = channel(1001);
    let listener = Listener::bind(&config).unwrap();

    let client_config = config.clone();
    let client = thread::spawn(move || {
        let mut socket = connect(&client_config).unwrap();
        let msg = MemAccess::new(AccessKind::ReadWrite, 2345235, 0, 1, 4354353);
        assert_eq!(socket.send(&msg).unwrap(), 31);
        assert_eq!(socket.flush().unwrap(), 31);
    });

    let mut server = listener.accept_one().unwrap();
    let mut chk = MemAccess::default();
    assert_eq!(server.receive_into(&mut chk, true).unwrap(), 31);
    assert_eq!(
        chk,
        MemAccess::new(AccessKind::ReadWrite, 2345235, 0, 1, 4354353)
    );
    assert_eq!(chk.tick, 2345235);

    client.join().unwrap();
}

#[test]
fn round_trips_in_both_directions() {
    let (_dir, config) = channel(1002);
    let listener = Listener::bind(&config).unwrap();

    let accesses = [
        MemAccess::new(AccessKind::ReadWrite, 2903847, 32940, 1, 4354353),
        MemAccess::new(AccessKind::Read, 2903999, 0x7f00_0000_1000, 0, 12),
    ];
    let binds = [
        sample_bind(),
        MBind::new(0x7f00_0000_0000, 4096, 0x1, MemPolicyMode::Bind, MBindFlags::MOVE),
    ];

    let client_config = config.clone();
    let client = thread::spawn(move || {
        let mut socket = connect(&client_config).unwrap();
        for (access, expected) in accesses.iter().zip(binds.iter()) {
            socket.send(access).unwrap();
            socket.flush().unwrap();

            let mut chk = MBind::default();
            socket.receive_into(&mut chk, true).unwrap();
            assert_eq!(&chk, expected);
        }
    });

    let mut server = listener.accept_one().unwrap();
    for (expected, reply) in accesses.iter().zip(binds.iter()) {
        let mut chk = MemAccess::default();
        server.receive_into(&mut chk, true).unwrap();
        assert_eq!(&chk, expected);

        server.send(reply).unwrap();
        server.flush().unwrap();
    }

    client.join().unwrap();
}

#[test]
fn unflushed_messages_are_not_observed() {
    let (_dir, config) = channel(1003);
    let (mut server, mut connector) = connected_pair(&config);
    let mut buf = [0u8; 128];

    connector.send(&MemAccess::default()).unwrap();
    connector.send(&MemAccess::default()).unwrap();
    assert_eq!(connector.pending(), 62);

    let err = server.receive_dynamic(&mut buf, false).unwrap_err();
    assert!(err.is_would_block());

    connector.flush().unwrap();
    assert_eq!(server.receive_dynamic(&mut buf, true).unwrap(), MemAccess::TYPE_ID);
    assert_eq!(server.receive_dynamic(&mut buf, true).unwrap(), MemAccess::TYPE_ID);
}

#[test]
fn non_blocking_receive_on_empty_channel() {
    let (_dir, config) = channel(1004);
    let (mut server, _connector) = connected_pair(&config);
    let mut buf = [0xAAu8; 64];

    let start = Instant::now();
    for _ in 0..100 {
        match server.receive_dynamic(&mut buf, false) {
            Err(Error::WouldBlock) => {}
            other => panic!("expected WouldBlock, got {:?}", other),
        }
    }
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(buf.iter().all(|&b| b == 0xAA));
    assert!(!server.is_poisoned());
}

#[test]
fn declared_length_above_capacity_is_rejected() {
    let (_dir, config) = channel(1005);
    let (mut server, mut connector) = connected_pair(&config);

    let batch: Array<MemAccess> = (0..10)
        .map(|i| MemAccess::new(AccessKind::Read, i, i * 64, 0, 0))
        .collect();
    connector.send(&batch).unwrap();
    connector.flush().unwrap();

    let mut buf = [0u8; 64];
    match server.receive_dynamic(&mut buf, true) {
        Err(Error::LengthExceeded { declared, capacity }) => {
            assert_eq!(declared, batch.encoded_len());
            assert_eq!(capacity, 64);
        }
        other => panic!("expected LengthExceeded, got {:?}", other),
    }
    assert!(buf[..9].iter().all(|&b| b == 0));
    assert!(matches!(
        server.receive_dynamic(&mut buf, true),
        Err(Error::Poisoned)
    ));
}

#[test]
fn dynamic_receive_dispatches_by_type() {
    let (_dir, config) = channel(1006);
    let (mut server, mut connector) = connected_pair(&config);

    let access = MemAccess::new(AccessKind::Write, 77, 0xbeef, 1, 5);
    let batch: Array<MemAccess> = (0..3)
        .map(|i| MemAccess::new(AccessKind::Read, i, 0x1000 + i * 8, 0, 2))
        .collect();
    connector.send(&access).unwrap();
    connector.send(&batch).unwrap();
    connector.send(&sample_bind()).unwrap();
    connector.flush().unwrap();

    let mut buf = vec![0u8; 4096];
    assert_eq!(
        server.receive(&mut buf, true).unwrap(),
        AnyMessage::MemAccess(access)
    );
    assert_eq!(
        server.receive(&mut buf, true).unwrap(),
        AnyMessage::MemAccessArray(batch)
    );
    assert_eq!(
        server.receive(&mut buf, true).unwrap(),
        AnyMessage::MBind(sample_bind())
    );
}

#[test]
fn array_received_into_typed_value() {
    let (_dir, config) = channel(1007);
    let (mut server, mut connector) = connected_pair(&config);

    let batch: Array<MemAccess> = (0..200)
        .map(|i| MemAccess::new(AccessKind::ReadWrite, i, i << 12, (i % 2) as u8, 9))
        .collect();
    // Larger than the 4 KiB send buffer: written straight through
    assert!(batch.encoded_len() > 4096);
    connector.send(&batch).unwrap();
    assert_eq!(connector.pending(), 0);

    let mut chk: Array<MemAccess> = Array::new();
    let n = server.receive_into(&mut chk, true).unwrap();
    assert_eq!(n as u64, batch.encoded_len());
    assert_eq!(chk, batch);
}

#[test]
fn type_mismatch_desynchronizes() {
    let (_dir, config) = channel(1008);
    let (mut server, mut connector) = connected_pair(&config);

    connector.send(&sample_bind()).unwrap();
    connector.flush().unwrap();

    let mut chk = MemAccess::default();
    assert!(matches!(
        server.receive_into(&mut chk, true),
        Err(Error::Desynchronized {
            expected: 1,
            got: 2
        })
    ));
    assert!(server.is_poisoned());
}

#[test]
fn peer_close_is_reported() {
    let (_dir, config) = channel(1009);
    let (mut server, connector) = connected_pair(&config);

    drop(connector);
    let mut chk = MemAccess::default();
    assert!(matches!(server.receive_into(&mut chk, true), Err(Error::Closed)));
    assert!(!server.is_connected());
}

#[test]
fn stream_of_small_records_preserves_order() {
    const COUNT: u64 = 10_000;
    let (_dir, config) = channel(1010);
    let listener = Listener::bind(&config).unwrap();

    let client_config = config.clone();
    let client = thread::spawn(move || {
        let mut socket = connect(&client_config).unwrap();
        for i in 0..COUNT {
            let msg = MemAccess::new(AccessKind::Read, i, i * 64, (i % 4) as u8, i as u32);
            socket.send(&msg).unwrap();
        }
        socket.close().unwrap();
    });

    let mut server = listener.accept_one().unwrap();
    let mut chk = MemAccess::default();
    for i in 0..COUNT {
        server.receive_into(&mut chk, true).unwrap();
        assert_eq!(chk.tick, i);
        assert_eq!(chk.address, i * 64);
    }
    assert!(matches!(server.receive_into(&mut chk, true), Err(Error::Closed)));

    client.join().unwrap();
}

#[test]
fn polling_until_a_directive_arrives() {
    let (_dir, config) = channel(1011);
    let listener = Listener::bind(&config).unwrap();

    let client_config = config.clone();
    let client = thread::spawn(move || {
        let mut socket = connect(&client_config).unwrap();
        thread::sleep(Duration::from_millis(50));
        socket.send(&sample_bind()).unwrap();
        socket.flush().unwrap();
    });

    let mut server = listener.accept_one().unwrap();
    let mut buf = [0u8; 64];
    let mut misses = 0u32;
    let received = loop {
        match server.receive(&mut buf, false) {
            Ok(msg) => break msg,
            Err(e) if e.is_would_block() => {
                misses += 1;
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    };
    assert_eq!(received, AnyMessage::MBind(sample_bind()));
    assert!(misses > 0);

    client.join().unwrap();
}

#[test]
fn batch_larger_than_64k_fits_max_sized_buffer() {
    let (_dir, config) = channel(1012);
    let listener = Listener::bind(&config).unwrap();

    let batch: Array<MemAccess> = (0..4096u64)
        .map(|i| MemAccess::new(AccessKind::Read, i, i << 6, 0, 1))
        .collect();
    assert!(batch.encoded_len() > 64 * 1024);

    let sent = batch.clone();
    let client_config = config.clone();
    let client = thread::spawn(move || {
        let mut socket = connect(&client_config).unwrap();
        socket.send(&sent).unwrap();
    });

    let mut server = listener.accept_one().unwrap();
    let mut buffer = vec![0u8; MAX_MESSAGE_LEN as usize];
    assert_eq!(
        server.receive(&mut buffer, true).unwrap(),
        AnyMessage::MemAccessArray(batch)
    );
    client.join().unwrap();
}
