use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio_pump::{Destination, EndpointStats, Proxy};

use util;

// Counters only ever grow, and once the sink's peer has seen the bytes the
// source-side receive total matches what was written.
#[test]
fn counters_rise_monotonically() {
    util::init();
    let (source, source_peer) = UnixStream::pair().unwrap();
    let (sink, sink_peer) = UnixStream::pair().unwrap();
    sink_peer
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut proxy = Proxy::new(source.as_raw_fd(), Destination::Fd(sink.as_raw_fd())).unwrap();
    proxy.start().unwrap();

    let mut previous = EndpointStats::default();
    let mut total = 0u64;
    for round in 0..8 {
        let chunk = vec![round as u8; 512];
        (&source_peer).write_all(&chunk).unwrap();
        let mut sunk = vec![0u8; chunk.len()];
        (&sink_peer).read_exact(&mut sunk).unwrap();
        total += chunk.len() as u64;

        let snapshot = proxy.source_stats();
        assert!(snapshot.rx.ops >= previous.rx.ops);
        assert!(snapshot.rx.bytes >= previous.rx.bytes);
        assert!(snapshot.tx.ops >= previous.tx.ops);
        assert!(snapshot.tx.bytes >= previous.tx.bytes);
        previous = snapshot;
    }
    assert_eq!(previous.rx.bytes, total);
    assert_eq!(proxy.sink_stats().tx.bytes, total);
}

// The observer fires under the endpoint lock with a snapshot that already
// includes the receive that triggered it.
#[test]
fn observer_sees_consistent_snapshots() {
    util::init();
    let (source, source_peer) = UnixStream::pair().unwrap();
    let (sink, sink_peer) = UnixStream::pair().unwrap();
    sink_peer
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut proxy = Proxy::new(source.as_raw_fd(), Destination::Fd(sink.as_raw_fd())).unwrap();
    let seen_bytes = Arc::new(AtomicU64::new(0));
    let seen_ops = Arc::new(AtomicU64::new(0));
    let bytes = seen_bytes.clone();
    let ops = seen_ops.clone();
    proxy.set_source_observer(Some(Arc::new(move |stats: &EndpointStats| {
        bytes.store(stats.rx.bytes, Ordering::SeqCst);
        ops.store(stats.rx.ops, Ordering::SeqCst);
    })));
    proxy.start().unwrap();

    (&source_peer).write_all(b"count").unwrap();
    let mut buf = [0; 5];
    (&sink_peer).read_exact(&mut buf).unwrap();

    util::await_true(
        || seen_bytes.load(Ordering::SeqCst) == 5,
        "observer to report the receive",
    );
    assert!(seen_ops.load(Ordering::SeqCst) >= 1);

    // Removing the observer stops the updates but not the counting.
    proxy.set_source_observer(None);
    (&source_peer).write_all(b"more!").unwrap();
    (&sink_peer).read_exact(&mut buf).unwrap();
    util::await_true(
        || proxy.source_stats().rx.bytes == 10,
        "counters to keep rising without the observer",
    );
    assert_eq!(seen_bytes.load(Ordering::SeqCst), 5);
}
