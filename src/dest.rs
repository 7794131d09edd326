use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, ToSocketAddrs};
use std::os::unix::io::RawFd;

use socket2::{Domain, SockAddr, Socket, Type};

use endpoint::Endpoint;

/// Address family of a [`Destination::Host`].
///
/// [`Destination::Host`]: enum.Destination.html#variant.Host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
    /// UNIX domain stream socket; the destination host is a filesystem path.
    Unix,
}

/// Where a proxy delivers the bytes it reads from its source.
#[derive(Clone, Debug)]
pub enum Destination {
    /// Connect a new stream socket of the given family to `host`.
    ///
    /// Resolution and the (non-blocking) connect itself are deferred to the
    /// worker where possible: the address is resolved at construction, the
    /// connect is issued by the worker right before it enters its loop.
    Host {
        /// Host name or address literal, or a filesystem path for
        /// [`Family::Unix`](enum.Family.html#variant.Unix).
        host: String,
        /// Destination port. Ignored for UNIX paths.
        port: u16,
        /// Address family to resolve for.
        family: Family,
        /// Optional local IPv4 address the outbound socket is bound to
        /// before connecting. Not permitted for UNIX destinations.
        bind: Option<Ipv4Addr>,
    },
    /// Use a pre-opened stream descriptor as the sink.
    ///
    /// The descriptor is duplicated; the caller keeps the original. No bind,
    /// no resolution, no connect.
    Fd(RawFd),
}

/// A sink endpoint ready to hand to the worker, plus whatever the facade
/// still needs to know about how it was made.
#[derive(Debug)]
pub struct PreparedSink {
    pub endpoint: Endpoint,
    /// Resolved destination address; `None` for `Fd` sinks, which are
    /// already connected (or at least already open).
    pub addr: Option<SockAddr>,
    pub family: Option<Family>,
}

/// Builds the sink endpoint for `dest`.
///
/// Any failure (duplication, socket creation, bind, resolution, an
/// over-long UNIX path) aborts construction; partially acquired descriptors
/// are released on the way out.
pub fn prepare(dest: &Destination) -> io::Result<PreparedSink> {
    match *dest {
        Destination::Fd(fd) => Ok(PreparedSink {
            endpoint: Endpoint::from_raw_fd(fd)?,
            addr: None,
            family: None,
        }),
        Destination::Host { ref host, port, family, bind } => {
            if family == Family::Unix && bind.is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "bind address cannot be combined with a UNIX destination",
                ));
            }

            // Create the socket
            let domain = match family {
                Family::Inet => Domain::IPV4,
                Family::Inet6 => Domain::IPV6,
                Family::Unix => Domain::UNIX,
            };
            let sock = Socket::new(domain, Type::STREAM, None)?;

            // Bind the outbound side when a local address was requested
            if let Some(ip) = bind {
                sock.bind(&SockAddr::from(SocketAddrV4::new(ip, 0)))?;
            }

            let addr = resolve(host, port, family)?;
            Ok(PreparedSink {
                endpoint: Endpoint::from_socket(sock),
                addr: Some(addr),
                family: Some(family),
            })
        }
    }
}

/// Resolves `host:port` to a connectable stream address of the requested
/// family, taking the first address the resolver returns for it. UNIX
/// destinations skip the resolver; the path length is validated here.
fn resolve(host: &str, port: u16, family: Family) -> io::Result<SockAddr> {
    if family == Family::Unix {
        return SockAddr::unix(host);
    }
    let found = (host, port).to_socket_addrs()?.find(|addr| match family {
        Family::Inet => addr.is_ipv4(),
        Family::Inet6 => addr.is_ipv6(),
        Family::Unix => false,
    });
    match found {
        Some(addr) => Ok(SockAddr::from(addr)),
        None => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("no usable address for {}:{}", host, port),
        )),
    }
}
