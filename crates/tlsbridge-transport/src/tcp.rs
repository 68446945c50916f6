//! TCP connect/listen helpers.
//!
//! Sockets are built with `socket2` so options are applied before the
//! connection exists.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Listen backlog used by [`listen`]
pub const DEFAULT_BACKLOG: i32 = 128;

/// Options applied to connected streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Give up connecting after this long (`None` = OS default)
    pub connect_timeout: Option<Duration>,
    /// Per-call read/write timeout on the connected stream
    pub io_timeout: Option<Duration>,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            io_timeout: None,
            nodelay: true,
        }
    }
}

/// Connect to `addr`, trying each resolved address in turn
///
/// # Examples
/// ```no_run
/// use std::time::Duration;
/// use tlsbridge_transport::tcp::{self, ConnectOptions};
///
/// let options = ConnectOptions {
///     connect_timeout: Some(Duration::from_secs(5)),
///     ..ConnectOptions::default()
/// };
/// let stream = tcp::connect("example.com:443", &options).unwrap();
/// println!("Connected to {}", stream.peer_addr().unwrap());
/// ```
pub fn connect<A: ToSocketAddrs>(addr: A, options: &ConnectOptions) -> io::Result<TcpStream> {
    let mut last_error = None;

    for candidate in addr.to_socket_addrs()? {
        match connect_one(candidate, options) {
            Ok(stream) => {
                tracing::debug!(peer = %candidate, "TCP connected");
                return Ok(stream);
            }
            Err(err) => {
                tracing::debug!(peer = %candidate, error = %err, "TCP connect attempt failed");
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    }))
}

fn connect_one(addr: SocketAddr, options: &ConnectOptions) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    let target = SockAddr::from(addr);

    match options.connect_timeout {
        Some(timeout) => socket.connect_timeout(&target, timeout)?,
        None => socket.connect(&target)?,
    }

    let stream: TcpStream = socket.into();
    configure_stream(&stream, options)?;
    Ok(stream)
}

/// Apply `options` to an established stream (e.g. one returned by `accept`)
pub fn configure_stream(stream: &TcpStream, options: &ConnectOptions) -> io::Result<()> {
    stream.set_nodelay(options.nodelay)?;
    if let Some(timeout) = options.io_timeout {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
    }
    Ok(())
}

/// Bind a listener on `addr` with address reuse enabled
///
/// # Examples
/// ```no_run
/// use tlsbridge_transport::tcp;
///
/// let listener = tcp::listen("127.0.0.1:0".parse().unwrap()).unwrap();
/// println!("Listening on {}", listener.local_addr().unwrap());
/// ```
pub fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(DEFAULT_BACKLOG)?;
    tracing::debug!(local = %addr, "TCP listening");
    Ok(socket.into())
}
