use std::fmt;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};
use std::sync::{Arc, Mutex};

use socket2::{SockAddr, Socket};

/// Cumulative counters for one transfer direction of an endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirStats {
    /// Number of completed I/O operations.
    pub ops: u64,
    /// Total bytes moved.
    pub bytes: u64,
}

/// Bidirectional I/O statistics of one endpoint.
///
/// Both directions are counted from the endpoint's point of view: `rx` is
/// what the proxy received from this descriptor, `tx` what it sent to it.
/// Counters are monotonically non-decreasing for the lifetime of the proxy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EndpointStats {
    /// Receive side.
    pub rx: DirStats,
    /// Transmit side.
    pub tx: DirStats,
}

/// Callback invoked with a statistics snapshot after every successful
/// receive on the endpoint it is installed on.
///
/// The observer runs on the worker thread **while the endpoint's statistics
/// lock is held**, so the snapshot it sees is always consistent with the
/// counters that produced it. The flip side: an observer that blocks stalls
/// all I/O on that endpoint, and calling back into the stats accessors from
/// inside the observer deadlocks. Keep it short.
pub type StatsObserver = Arc<dyn Fn(&EndpointStats) + Send + Sync>;

/// A stream descriptor plus its I/O statistics.
///
/// The descriptor is owned: it is a duplicate of whatever the caller handed
/// in (or a freshly created outbound socket) and is closed when the endpoint
/// is dropped. Between `start` and join the worker is the only party issuing
/// I/O on it.
pub struct Endpoint {
    sock: Socket,
    inner: Mutex<Inner>,
}

struct Inner {
    stats: EndpointStats,
    observer: Option<StatsObserver>,
}

impl Endpoint {
    /// Duplicates `fd` and wraps the duplicate.
    ///
    /// The caller keeps ownership of `fd` itself; it must be a valid open
    /// stream-socket descriptor for the lifetime of this call.
    pub fn from_raw_fd(fd: RawFd) -> io::Result<Endpoint> {
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        let dup = fd.try_clone_to_owned()?;
        Ok(Endpoint::from_socket(Socket::from(dup)))
    }

    /// Wraps an already-owned socket.
    pub fn from_socket(sock: Socket) -> Endpoint {
        Endpoint {
            sock: sock,
            inner: Mutex::new(Inner {
                stats: EndpointStats::default(),
                observer: None,
            }),
        }
    }

    /// Performs a single non-blocking receive into `buf`.
    ///
    /// On `Ok(n)` with `n > 0` the receive counters are bumped under the
    /// statistics lock and the observer, if any, is invoked with a snapshot
    /// while the lock is still held. `Ok(0)` (EOF) and errors leave the
    /// counters untouched.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (&self.sock).read(buf)?;
        if n > 0 {
            let mut inner = self.inner.lock().unwrap();
            inner.stats.rx.ops += 1;
            inner.stats.rx.bytes += n as u64;
            if let Some(ref observer) = inner.observer {
                let snapshot = inner.stats;
                observer(&snapshot);
            }
        }
        Ok(n)
    }

    /// Performs a single non-blocking send from `buf`, counting any bytes
    /// the kernel accepted.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let n = (&self.sock).write(buf)?;
        if n > 0 {
            let mut inner = self.inner.lock().unwrap();
            inner.stats.tx.ops += 1;
            inner.stats.tx.bytes += n as u64;
        }
        Ok(n)
    }

    /// Snapshots the statistics record.
    pub fn stats(&self) -> EndpointStats {
        self.inner.lock().unwrap().stats
    }

    /// Installs or removes the statistics observer. Replacement is atomic;
    /// the worker sees the new observer no later than its next receive.
    pub fn set_observer(&self, observer: Option<StatsObserver>) {
        self.inner.lock().unwrap().observer = observer;
    }

    /// Issues a non-blocking connect to `addr`.
    pub fn connect(&self, addr: &SockAddr) -> io::Result<()> {
        self.sock.connect(addr)
    }

    /// Moves the descriptor in or out of non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.sock.set_nonblocking(nonblocking)
    }

    /// Shuts down the read, write, or both halves of the stream.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.sock.shutdown(how)
    }

    /// Returns the socket address of the local half of the stream.
    pub fn local_addr(&self) -> io::Result<SockAddr> {
        self.sock.local_addr()
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("fd", &self.as_raw_fd())
            .field("stats", &self.stats())
            .finish()
    }
}
