use std::fmt;
use std::io;
use std::net::Shutdown;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicI8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use socket2::SockAddr;

use dest::{self, Destination, Family};
use endpoint::{Endpoint, EndpointStats, StatsObserver};
use pump;
use transform::Transform;

static DEBUG_LEVEL: AtomicI32 = AtomicI32::new(0);

/// Sets the process-wide debug verbosity.
///
/// Levels above zero progressively enable `debug!`/`trace!` records from
/// proxy lifecycles and workers. Each proxy snapshots the level at
/// construction; reads of the global are intentionally unsynchronized. This
/// is a diagnostics knob, not configuration.
pub fn set_debug(level: i32) {
    DEBUG_LEVEL.store(level, Ordering::Relaxed);
}

pub(crate) fn debug_level() -> i32 {
    DEBUG_LEVEL.load(Ordering::Relaxed)
}

/// The proxy lifecycle.
///
/// Only the worker writes `Run` and `Quit`; only the owner writes `Start`
/// and `Cease`. Every read and write happens under the proxy mutex, which is
/// the sole synchronization between the two threads; the worker re-reads
/// the state at the top of each loop iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Constructed, worker not yet requested.
    Init,
    /// `start` ran; the worker has not entered its loop yet.
    Start,
    /// The worker is pumping.
    Run,
    /// The owner asked the worker to stop. Terminal for the worker, never
    /// rewritten by it.
    Cease,
    /// The worker stopped on its own (EOF, hangup, or error). Terminal.
    Quit,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::Init => "INIT",
            State::Start => "START",
            State::Run => "RUN",
            State::Cease => "CEASE",
            State::Quit => "QUIT",
        }
    }
}

/// Owner/worker shared control block: the lifecycle state and the two
/// transformer slots, all guarded by the proxy mutex.
pub struct Ctl {
    pub state: State,
    /// `transform[0]` rewrites source→sink traffic, `transform[1]` the
    /// reverse direction.
    pub transform: [Option<Transform>; 2],
}

/// Everything the owner and the worker share.
pub struct Shared {
    pub source: Endpoint,
    pub sink: Endpoint,
    /// Resolved destination; `None` for `Fd` sinks (nothing to connect).
    pub dest: Option<SockAddr>,
    pub family: Option<Family>,
    pub ctl: Mutex<Ctl>,
    /// Debug level snapshotted at construction.
    pub debug: i32,
}

/// A bidirectional byte-stream proxy.
///
/// Construct one with [`new`], hand it transformers if needed, then call
/// [`start`] to spawn the worker. Progress is observed through
/// [`is_alive`] / [`describe`] and the statistics accessors; dropping the
/// proxy requests termination, breaks the worker out of its poll, joins it,
/// and closes both duplicated descriptors.
///
/// [`new`]: #method.new
/// [`start`]: #method.start
/// [`is_alive`]: #method.is_alive
/// [`describe`]: #method.describe
pub struct Proxy {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
    last_seen_alive: AtomicI8,
}

impl Proxy {
    /// Builds a proxy from a pre-opened source descriptor and a sink
    /// description.
    ///
    /// The source descriptor is duplicated (the caller keeps the original),
    /// the sink is prepared per `dest`, and both endpoints are switched to
    /// non-blocking mode. Nothing is connected yet and no thread runs until
    /// [`start`](#method.start). Every failure (duplication, socket
    /// creation, bind, resolution, an over-long UNIX path, a bind literal on
    /// a UNIX destination) releases whatever was already acquired.
    pub fn new(fd: RawFd, dest: Destination) -> io::Result<Proxy> {
        let debug = debug_level();
        if debug > 0 {
            debug!("Proxy::new({}, {:?})", fd, dest);
        }
        let source = Endpoint::from_raw_fd(fd)?;
        let sink = dest::prepare(&dest)?;
        source.set_nonblocking(true)?;
        sink.endpoint.set_nonblocking(true)?;
        Ok(Proxy {
            shared: Arc::new(Shared {
                source: source,
                sink: sink.endpoint,
                dest: sink.addr,
                family: sink.family,
                ctl: Mutex::new(Ctl {
                    state: State::Init,
                    transform: [None, None],
                }),
                debug: debug,
            }),
            worker: None,
            last_seen_alive: AtomicI8::new(-1),
        })
    }

    /// Spawns the worker thread.
    ///
    /// Transitions `INIT → START`; the worker itself performs `START → RUN`
    /// once it is on CPU. If the spawn fails the state reverts to `INIT` and
    /// the error is returned.
    pub fn start(&mut self) -> io::Result<()> {
        if self.shared.debug > 0 {
            debug!("Proxy::start({:p})", &*self.shared);
        }
        {
            let mut ctl = self.shared.ctl.lock().unwrap();
            debug_assert_eq!(ctl.state, State::Init);
            ctl.state = State::Start;
        }
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("mio-pump".to_owned())
            .spawn(move || pump::run(&shared));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                warn!("Proxy::start: thread spawn failed: {}", e);
                let mut ctl = self.shared.ctl.lock().unwrap();
                debug_assert_eq!(ctl.state, State::Start);
                ctl.state = State::Init;
                Err(e)
            }
        }
    }

    /// True while the worker is starting up or pumping.
    pub fn is_alive(&self) -> bool {
        let state = self.shared.ctl.lock().unwrap().state;
        let alive = state == State::Start || state == State::Run;
        if self.shared.debug > 1 {
            let seen = self.last_seen_alive.swap(alive as i8, Ordering::Relaxed);
            if seen != alive as i8 {
                debug!(
                    "Proxy::is_alive({:p}) = {} -> {}",
                    &*self.shared,
                    seen,
                    alive as i8
                );
            }
        }
        alive
    }

    /// Installs (or, with `None`, removes) the source→sink transformer.
    ///
    /// Replacement is atomic; the worker picks it up no later than its next
    /// receive on the source.
    pub fn set_i2o(&self, transform: Option<Transform>) {
        self.shared.ctl.lock().unwrap().transform[0] = transform;
    }

    /// Installs (or removes) the sink→source transformer.
    pub fn set_o2i(&self, transform: Option<Transform>) {
        self.shared.ctl.lock().unwrap().transform[1] = transform;
    }

    /// Waits for the worker to exit. Returns immediately when there is
    /// nothing to join.
    ///
    /// With `force`, the sink is shut down first: the worker polls with an
    /// infinite timeout, and a quiescent stream would otherwise never wake
    /// it to notice a pending `CEASE`.
    pub fn join(&mut self, force: bool) {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return,
        };
        if force {
            let _ = self.shared.sink.shutdown(Shutdown::Both);
        }
        let _ = worker.join();
    }

    /// The symbolic name of the current lifecycle state:
    /// `"INIT"`, `"START"`, `"RUN"`, `"CEASE"` or `"QUIT"`.
    pub fn describe(&self) -> &'static str {
        self.shared.ctl.lock().unwrap().state.name()
    }

    /// The sink's bound local address in presentation form, plus its port.
    ///
    /// UNIX destinations have no meaningful local name and report the
    /// constant marker `"AF_UNIX"` with port 0.
    pub fn local_name(&self) -> io::Result<(String, u16)> {
        if self.shared.family == Some(Family::Unix) {
            return Ok(("AF_UNIX".to_owned(), 0));
        }
        let addr = self.shared.sink.local_addr()?;
        match addr.as_socket() {
            Some(sa) => Ok((sa.ip().to_string(), sa.port())),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "sink is not bound to an internet address",
            )),
        }
    }

    /// Snapshots the source endpoint's statistics.
    pub fn source_stats(&self) -> EndpointStats {
        self.shared.source.stats()
    }

    /// Snapshots the sink endpoint's statistics.
    pub fn sink_stats(&self) -> EndpointStats {
        self.shared.sink.stats()
    }

    /// Installs (or removes) the source endpoint's statistics observer. See
    /// [`StatsObserver`](type.StatsObserver.html) for the locking contract.
    pub fn set_source_observer(&self, observer: Option<StatsObserver>) {
        self.shared.source.set_observer(observer);
    }

    /// Installs (or removes) the sink endpoint's statistics observer.
    pub fn set_sink_observer(&self, observer: Option<StatsObserver>) {
        self.shared.sink.set_observer(observer);
    }
}

impl Drop for Proxy {
    /// Requests termination (`CEASE`) if the worker is starting or running,
    /// force-joins it, and closes both endpoints.
    fn drop(&mut self) {
        if self.shared.debug > 0 {
            debug!("Proxy::drop({:p})", &*self.shared);
        }
        {
            let mut ctl = self.shared.ctl.lock().unwrap();
            if ctl.state == State::Start || ctl.state == State::Run {
                ctl.state = State::Cease;
            }
        }
        self.join(true);
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("state", &self.describe())
            .field("source", &self.shared.source)
            .field("sink", &self.shared.sink)
            .finish()
    }
}
