//! The worker: a two-endpoint, dual-buffer I/O pump.
//!
//! One pump per proxy, running on its own thread. Both descriptors are
//! registered with a level-triggered poll; each loop iteration re-checks the
//! lifecycle state, waits for readiness, performs at most one receive per
//! readable side and one send per drainable buffer, and keeps the interest
//! masks in lockstep with the buffer occupancy:
//!
//! - read interest on side `i` ⇔ `bufs[i]` has free space;
//! - write interest on side `j` ⇔ data is pending for `j`, or `j` is still
//!   completing its asynchronous connect.
//!
//! That second rule doubles as backpressure: a full staging buffer disables
//! the read that would overflow it until the peer drains some of it.

use std::io;
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, RawFd};

use libc::EINPROGRESS;
use mio::unix::{EventedFd, UnixReady};
use mio::{Events, Poll, PollOpt, Ready, Token};

use endpoint::Endpoint;
use proxy::{Shared, State};
use transform::TransformBuf;

/// Staging buffer capacity per direction.
const BUF_SIZE: usize = 16 * 1024;

const SINK: usize = 1;

/// Fixed-capacity staging area between one endpoint's read side and the
/// other endpoint's write side. `data[..len]` awaits transmission to the
/// peer; `data[len..]` is free for further receives. Worker-private.
struct IoBuf {
    data: Box<[u8]>,
    len: usize,
}

impl IoBuf {
    fn new() -> IoBuf {
        IoBuf {
            data: vec![0; BUF_SIZE].into_boxed_slice(),
            len: 0,
        }
    }

    fn free(&self) -> usize {
        self.data.len() - self.len
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn pending(&self) -> &[u8] {
        &self.data[..self.len]
    }

    fn tail(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.data[len..]
    }

    fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.free());
        self.len += n;
    }

    /// Drops `n` written bytes off the front, left-aligning the remainder.
    fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        if n < self.len {
            self.data.copy_within(n..self.len, 0);
            self.len -= n;
        } else {
            self.len = 0;
        }
    }
}

/// The worker's rendition of a two-entry pollfd array: requested interest
/// (`events`) applied through level-triggered reregistration, and the
/// readiness delivered in the current cycle (`revents`).
struct PollSet {
    poll: Poll,
    fds: [RawFd; 2],
    events: [Ready; 2],
    revents: [Ready; 2],
}

impl PollSet {
    fn new(fds: [RawFd; 2]) -> io::Result<PollSet> {
        let poll = Poll::new()?;
        for i in 0..2 {
            poll.register(
                &EventedFd(&fds[i]),
                Token(i),
                Ready::readable(),
                PollOpt::level(),
            )?;
        }
        Ok(PollSet {
            poll: poll,
            fds: fds,
            events: [Ready::readable(); 2],
            revents: [Ready::empty(); 2],
        })
    }

    /// Blocks until at least one descriptor is ready, then scatters the
    /// delivered readiness into `revents`.
    fn wait(&mut self, events: &mut Events) -> io::Result<usize> {
        self.revents = [Ready::empty(); 2];
        let n = self.poll.poll(events, None)?;
        for event in events.iter() {
            let idx = event.token().0;
            self.revents[idx].insert(event.readiness());
        }
        Ok(n)
    }

    fn request(&mut self, i: usize, what: Ready) -> io::Result<()> {
        if self.events[i].contains(what) {
            return Ok(());
        }
        self.events[i].insert(what);
        self.reregister(i)
    }

    fn unrequest(&mut self, i: usize, what: Ready) -> io::Result<()> {
        if !self.events[i].contains(what) {
            return Ok(());
        }
        self.events[i].remove(what);
        self.reregister(i)
    }

    fn reregister(&self, i: usize) -> io::Result<()> {
        self.poll.reregister(
            &EventedFd(&self.fds[i]),
            Token(i),
            self.events[i],
            PollOpt::level(),
        )
    }

    fn requested(&self, i: usize, what: Ready) -> bool {
        self.events[i].contains(what)
    }

    fn ready(&self, i: usize, what: Ready) -> bool {
        self.revents[i].contains(what)
    }

    fn clear_ready(&mut self, i: usize, what: Ready) {
        self.revents[i].remove(what);
    }

    fn hup(&self, i: usize) -> bool {
        UnixReady::from(self.revents[i]).is_hup()
    }
}

/// Worker entry point. Owns the START→RUN transition on the way in and the
/// RUN→QUIT transition (plus the source shutdown that unblocks outside
/// observers) on the way out; a CEASE set by the owner is left untouched so
/// the owner can always tell who initiated termination.
pub fn run(shared: &Shared) {
    let debug = shared.debug;
    if debug > 1 {
        debug!("pump({:p}): enter", shared);
    }

    {
        let mut ctl = shared.ctl.lock().unwrap();
        if ctl.state == State::Start {
            ctl.state = State::Run;
        }
    }

    if let Err(e) = pump(shared) {
        warn!("pump({:p}): worker failed: {}", shared, e);
    }

    {
        let mut ctl = shared.ctl.lock().unwrap();
        if ctl.state == State::Run {
            ctl.state = State::Quit;
            // Wake anything still blocked on the source.
            let _ = shared.source.shutdown(Shutdown::Both);
        }
    }

    if debug > 0 {
        debug!("pump({:p}): cease", shared);
    }
}

fn pump(shared: &Shared) -> io::Result<()> {
    let debug = shared.debug;
    let endpoints: [&Endpoint; 2] = [&shared.source, &shared.sink];
    let fds = [shared.source.as_raw_fd(), shared.sink.as_raw_fd()];
    let mut pfds = PollSet::new(fds)?;
    let mut bufs = [IoBuf::new(), IoBuf::new()];
    let mut events = Events::with_capacity(4);

    if let Some(ref addr) = shared.dest {
        match shared.sink.connect(addr) {
            Ok(()) => {}
            Err(ref e) if e.raw_os_error() == Some(EINPROGRESS) => {
                if debug > 2 {
                    trace!("pump({:p}): connect({}) in progress", shared, fds[SINK]);
                }
                pfds.request(SINK, Ready::writable())?;
            }
            Err(e) => {
                warn!("pump({:p}): connect() failed: {}", shared, e);
                return Ok(());
            }
        }
    }

    loop {
        let state = shared.ctl.lock().unwrap().state;
        if state != State::Run {
            if debug > 2 {
                trace!("pump({:p}): exit on state {}", shared, state.name());
            }
            return Ok(());
        }

        let n = match pfds.wait(&mut events) {
            Ok(n) => n,
            Err(e) => {
                if debug > 0 {
                    warn!("pump({:p}): poll() failed: {}", shared, e);
                }
                continue;
            }
        };
        if debug > 3 {
            trace!("pump({:p}): poll() = {}", shared, n);
        }
        if n == 0 {
            continue;
        }

        // Read phase: at most one receive per readable side, transformed
        // before it is staged. A hangup or a dead receive ends the pump.
        let mut eidx = None;
        for i in 0..2 {
            if debug > 3 {
                trace!(
                    "pump({:p}): fd {}: events {:?}, revents {:?}",
                    shared,
                    fds[i],
                    pfds.events[i],
                    pfds.revents[i]
                );
            }
            if pfds.hup(i) {
                if debug > 1 {
                    debug!("pump({:p}): fd {} is gone, out", shared, fds[i]);
                }
                eidx = Some(i);
                break;
            }
            if pfds.ready(i, Ready::readable()) && bufs[i].free() > 0 {
                match endpoints[i].recv(bufs[i].tail()) {
                    Ok(n) if n > 0 => {
                        if debug > 2 {
                            trace!("pump({:p}): received {} bytes from {}", shared, n, fds[i]);
                        }
                        let staged = apply_transform(shared, i, &mut bufs[i], n);
                        bufs[i].advance(staged);
                        if bufs[i].free() == 0 {
                            pfds.unrequest(i, Ready::readable())?;
                        }
                    }
                    other => {
                        if debug > 1 {
                            debug!(
                                "pump({:p}): fd {} recv returned {:?}, out",
                                shared, fds[i], other
                            );
                        }
                        eidx = Some(i);
                        break;
                    }
                }
                pfds.clear_ready(i, Ready::readable());
            }
        }
        if let Some(i) = eidx {
            // A clean exit leaves nothing stranded: either the peer still
            // has write interest outstanding or this side's buffer drained.
            let j = i ^ 1;
            debug_assert!(pfds.requested(j, Ready::writable()) || bufs[i].is_empty());
            return Ok(());
        }

        // Write phase: drain each staged buffer into its peer.
        for i in 0..2 {
            let j = i ^ 1;
            if !bufs[i].is_empty() {
                // Writer backpressure: a previous send came up short and the
                // peer has not reported writable again yet.
                if pfds.requested(j, Ready::writable()) && !pfds.ready(j, Ready::writable()) {
                    continue;
                }
                let pending = bufs[i].pending().len();
                let sent = match endpoints[j].send(bufs[i].pending()) {
                    Ok(n) => n,
                    Err(e) => {
                        if debug > 1 {
                            debug!("pump({:p}): fd {} send failed: {}", shared, fds[j], e);
                        }
                        0
                    }
                };
                if debug > 2 {
                    trace!("pump({:p}): sent {} bytes to {}", shared, sent, fds[j]);
                }
                if sent < pending {
                    pfds.request(j, Ready::writable())?;
                }
                if sent == 0 {
                    continue;
                }
                bufs[i].consume(sent);
                if bufs[i].is_empty() {
                    pfds.unrequest(j, Ready::writable())?;
                }
                pfds.clear_ready(j, Ready::writable());
                // The send freed staging space, so reading may resume.
                pfds.request(i, Ready::readable())?;
            } else if pfds.requested(j, Ready::writable()) && pfds.ready(j, Ready::writable()) {
                // Writable with nothing queued: the asynchronous connect
                // completed (or the readiness was spurious).
                pfds.clear_ready(j, Ready::writable());
                pfds.unrequest(j, Ready::writable())?;
                pfds.request(i, Ready::readable())?;
            }
        }
    }
}

/// Runs side `i`'s transformer, if any, over the `received` bytes sitting at
/// the head of `buf`'s free tail; returns the chunk length to stage.
///
/// The slot is snapshotted under the proxy mutex and invoked outside it, so
/// a registration from another thread never races the call and a transformer
/// can never deadlock against `set_i2o`/`set_o2i`.
fn apply_transform(shared: &Shared, i: usize, buf: &mut IoBuf, received: usize) -> usize {
    let transform = shared.ctl.lock().unwrap().transform[i].clone();
    let transform = match transform {
        Some(t) => t,
        None => return received,
    };
    let mut chunk = TransformBuf::new(buf.tail(), received);
    transform(&mut chunk);
    chunk.len()
}

#[cfg(test)]
mod tests {
    use super::{IoBuf, BUF_SIZE};

    #[test]
    fn iobuf_tracks_free_space() {
        let mut buf = IoBuf::new();
        assert_eq!(buf.free(), BUF_SIZE);
        buf.tail()[..3].copy_from_slice(b"abc");
        buf.advance(3);
        assert_eq!(buf.free(), BUF_SIZE - 3);
        assert_eq!(buf.pending(), b"abc");
    }

    #[test]
    fn iobuf_partial_consume_left_aligns() {
        let mut buf = IoBuf::new();
        buf.tail()[..5].copy_from_slice(b"hello");
        buf.advance(5);
        buf.consume(2);
        assert_eq!(buf.pending(), b"llo");
        buf.consume(3);
        assert!(buf.is_empty());
        assert_eq!(buf.free(), BUF_SIZE);
    }
}
