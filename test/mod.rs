//! Integration tests for the proxy: construction, pumping in both
//! directions, transformers, lifecycle and statistics. `RUST_LOG` plus
//! `mio_pump::set_debug` make failing runs talkative.

extern crate env_logger;
extern crate mio_pump;
extern crate tempdir;

mod util;

mod echo;
mod stats;
