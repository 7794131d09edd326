use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use mio_pump::{Destination, Proxy};

use util;

// Scenario: both descriptors are pre-opened (Fd mode); the proxy is a plain
// relay between the two socket pairs, in both directions at once.
#[test]
fn echo_through_fd_sink() {
    util::init();
    let (source, source_peer) = UnixStream::pair().unwrap();
    let (sink, sink_peer) = UnixStream::pair().unwrap();
    source_peer
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    sink_peer
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut proxy = Proxy::new(source.as_raw_fd(), Destination::Fd(sink.as_raw_fd())).unwrap();
    proxy.start().unwrap();

    (&source_peer).write_all(b"hello").unwrap();
    let mut buf = [0; 5];
    (&sink_peer).read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    (&sink_peer).write_all(b"world").unwrap();
    (&source_peer).read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"world");

    drop(proxy);

    // The proxy only ever owned duplicates; the caller's source pair is
    // still a working stream after the teardown.
    (&source).write_all(b"still open").unwrap();
    let mut buf = [0; 10];
    (&source_peer).read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"still open");
}

// A chunk larger than one staging buffer still arrives intact; the worker
// relays it as a sequence of buffer-sized pieces.
#[test]
fn relays_chunks_larger_than_the_staging_buffer() {
    util::init();
    let (source, source_peer) = UnixStream::pair().unwrap();
    let (sink, sink_peer) = UnixStream::pair().unwrap();
    sink_peer
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut proxy = Proxy::new(source.as_raw_fd(), Destination::Fd(sink.as_raw_fd())).unwrap();
    proxy.start().unwrap();

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 239) as u8).collect();
    (&source_peer).write_all(&payload).unwrap();

    let mut received = vec![0u8; payload.len()];
    (&sink_peer).read_exact(&mut received).unwrap();
    assert_eq!(received, payload);
}
