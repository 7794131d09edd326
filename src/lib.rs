#![doc(html_root_url = "https://docs.rs/mio-pump/0.1.0")]
#![deny(missing_docs, missing_debug_implementations)]
#![cfg_attr(test, deny(warnings))]

//! A bidirectional byte-stream proxy built on non-blocking sockets and mio
//! readiness polling.
//!
//! Each [`Proxy`] shuttles bytes between one pre-opened *source* descriptor
//! and a *sink* described by a [`Destination`], in both directions, on a
//! dedicated worker thread, until either side closes or the owner drops the
//! proxy. Bytes move through two fixed staging buffers with read/write
//! backpressure: a peer that stops accepting data suspends reads on the side
//! feeding it. An optional [`Transform`] per direction may rewrite each chunk
//! just after it is received.
//!
//! This is a building block, not a listener: accepting connections, session
//! management and configuration belong to the caller. The proxy is also
//! deliberately protocol-blind. It neither frames nor reorders anything, and
//! a broken stream terminates the worker.
//!
//! Both descriptors handed to the proxy are duplicated, so the caller keeps
//! ownership of the originals.
//!
//! [`Proxy`]: struct.Proxy.html
//! [`Destination`]: enum.Destination.html
//! [`Transform`]: type.Transform.html
//!
//! # Example
//!
//! ```
//! # use std::error::Error;
//! # fn try_main() -> Result<(), Box<dyn Error>> {
//! use std::io::{Read, Write};
//! use std::os::unix::io::AsRawFd;
//! use std::os::unix::net::UnixStream;
//!
//! use mio_pump::{Destination, Proxy};
//!
//! // One socket pair feeds the proxy, the other drains it.
//! let (source, source_peer) = UnixStream::pair()?;
//! let (sink, sink_peer) = UnixStream::pair()?;
//!
//! let mut proxy = Proxy::new(source.as_raw_fd(), Destination::Fd(sink.as_raw_fd()))?;
//! proxy.start()?;
//!
//! (&source_peer).write_all(b"ping")?;
//! let mut buf = [0; 4];
//! (&sink_peer).read_exact(&mut buf)?;
//! assert_eq!(&buf, b"ping");
//!
//! // Dropping the proxy stops the worker; the caller's sockets stay open.
//! drop(proxy);
//! #     Ok(())
//! # }
//! #
//! # fn main() {
//! #     try_main().unwrap();
//! # }
//! ```

extern crate libc;
#[macro_use]
extern crate log;
extern crate mio;
extern crate socket2;

mod dest;
mod endpoint;
mod proxy;
mod pump;
mod transform;

pub use dest::{Destination, Family};
pub use endpoint::{DirStats, EndpointStats, StatsObserver};
pub use proxy::{set_debug, Proxy};
pub use transform::{Transform, TransformBuf};
