use std::thread;
use std::time::{Duration, Instant};

use env_logger;

/// Installs the test logger once; later calls are no-ops.
pub fn init() {
    let _ = env_logger::init();
}

/// Spins until `cond` holds, panicking after ten seconds. The proxy has no
/// completion notifications by design, so tests poll the facade the same
/// way an owning application would.
pub fn await_true<F>(cond: F, what: &str)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}
