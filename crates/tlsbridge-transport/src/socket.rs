//! Blocking socket adapter.
//!
//! [`TlsSocket`] owns a socket and a [`TlsBuffer`] and runs the retry loop
//! that turns the session's would-block signals into socket calls:
//!
//! - `NeedsInput`: one receive into ingress. On a non-blocking socket only
//!   the first attempt of a call may receive; a second need surfaces to the
//!   caller instead of spinning.
//! - `NeedsFlush` / `EgressFull`: drain egress with bounded sends, dropping
//!   only confirmed bytes.
//! - Success or a fatal error: return.
//!
//! This loop is the only place the bridge waits on the network. Timeouts are
//! per socket call; an expired call surfaces as [`TlsError::Timeout`].

use crate::SocketConfig;
use socket2::{SockRef, Socket};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use thiserror::Error;
use tlsbridge_core::{
    CipherSuite, ClientContext, FatalCode, NextProtocol, Pending, ProtocolError, Result,
    ServerContext, SessionState, TlsBuffer, TlsContext, TlsError, TlsTransport, TlsVersion,
    TransportStats,
};

/// How socket calls wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockingMode {
    /// Wait indefinitely
    #[default]
    Blocking,
    /// Never wait; report would-block immediately
    NonBlocking,
    /// Wait at most the given duration per call
    Timeout(Duration),
}

impl BlockingMode {
    /// Mode for a socket-style timeout: `None` blocks, zero never blocks
    #[must_use]
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            None => Self::Blocking,
            Some(duration) if duration.is_zero() => Self::NonBlocking,
            Some(duration) => Self::Timeout(duration),
        }
    }

    /// Socket-style timeout for this mode
    #[must_use]
    pub fn timeout(self) -> Option<Duration> {
        match self {
            Self::Blocking => None,
            Self::NonBlocking => Some(Duration::ZERO),
            Self::Timeout(duration) => Some(duration),
        }
    }

    /// Check if socket calls return immediately
    #[must_use]
    pub fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }
}

/// Byte-stream socket the adapter drives.
///
/// `recv` returning `Ok(0)` means the peer reached end-of-stream. Timed-out
/// calls report `WouldBlock` or `TimedOut`.
pub trait SocketIo {
    /// Receive into `buf`, returning the byte count
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send from `buf`, returning how many bytes the socket accepted
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Current blocking mode
    fn blocking_mode(&self) -> io::Result<BlockingMode>;

    /// Change the blocking mode
    fn set_blocking_mode(&mut self, mode: BlockingMode) -> io::Result<()>;
}

#[cfg(unix)]
fn is_nonblocking(socket: &Socket) -> io::Result<bool> {
    socket.nonblocking()
}

// The flag cannot be read back on this platform
#[cfg(not(unix))]
fn is_nonblocking(_socket: &Socket) -> io::Result<bool> {
    Ok(false)
}

fn query_mode(socket: &Socket) -> io::Result<BlockingMode> {
    if is_nonblocking(socket)? {
        return Ok(BlockingMode::NonBlocking);
    }
    Ok(BlockingMode::from_timeout(socket.read_timeout()?))
}

fn apply_mode(socket: &Socket, mode: BlockingMode) -> io::Result<()> {
    match mode {
        BlockingMode::Blocking => {
            socket.set_nonblocking(false)?;
            socket.set_read_timeout(None)?;
            socket.set_write_timeout(None)
        }
        BlockingMode::NonBlocking => socket.set_nonblocking(true),
        BlockingMode::Timeout(duration) => {
            socket.set_nonblocking(false)?;
            socket.set_read_timeout(Some(duration))?;
            socket.set_write_timeout(Some(duration))
        }
    }
}

impl SocketIo for TcpStream {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn blocking_mode(&self) -> io::Result<BlockingMode> {
        query_mode(&SockRef::from(self))
    }

    fn set_blocking_mode(&mut self, mode: BlockingMode) -> io::Result<()> {
        apply_mode(&SockRef::from(&*self), mode)
    }
}

impl SocketIo for Socket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn blocking_mode(&self) -> io::Result<BlockingMode> {
        query_mode(self)
    }

    fn set_blocking_mode(&mut self, mode: BlockingMode) -> io::Result<()> {
        apply_mode(self, mode)
    }
}

/// Translate a socket failure for the current mode
fn socket_error(err: io::Error, mode: BlockingMode, pending: Pending) -> TlsError {
    match (err.kind(), mode) {
        (io::ErrorKind::WouldBlock, BlockingMode::NonBlocking) => TlsError::WouldBlock(pending),
        (io::ErrorKind::WouldBlock, BlockingMode::Timeout(_)) | (io::ErrorKind::TimedOut, _) => {
            TlsError::Timeout
        }
        _ => TlsError::Io(err),
    }
}

/// Socket-shaped TLS transport.
///
/// # Example
///
/// ```no_run
/// use std::net::TcpStream;
/// use tlsbridge_core::{ClientContext, TlsConfiguration};
/// use tlsbridge_transport::ClientWrapExt;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let context = ClientContext::new(TlsConfiguration::default())?;
/// let stream = TcpStream::connect("example.com:443")?;
/// let mut tls = context.wrap_socket(stream, Some("example.com"), true)?;
///
/// tls.send_all(b"HEAD / HTTP/1.0\r\nHost: example.com\r\n\r\n")?;
/// let response = tls.read(4096)?;
/// println!("{}", String::from_utf8_lossy(&response));
/// tls.close()?;
/// # Ok(())
/// # }
/// ```
pub struct TlsSocket<S> {
    socket: S,
    session: TlsBuffer,
    config: SocketConfig,
    recv_buf: Vec<u8>,
}

impl<S: SocketIo> TlsSocket<S> {
    /// Bind a session to a socket with the default configuration
    pub fn new(socket: S, session: TlsBuffer) -> Self {
        Self::with_config(socket, session, SocketConfig::default())
    }

    /// Bind a session to a socket
    pub fn with_config(socket: S, mut session: TlsBuffer, config: SocketConfig) -> Self {
        if config.egress_limit.is_some() {
            session.set_egress_limit(config.egress_limit);
        }
        let recv_buf = vec![0u8; config.recv_chunk_size.max(1)];
        Self {
            socket,
            session,
            config,
            recv_buf,
        }
    }

    /// Underlying socket
    pub fn get_ref(&self) -> &S {
        &self.socket
    }

    /// Underlying socket, mutably.
    ///
    /// Reading or writing it directly corrupts the TLS stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Session wrapper driven by this socket
    pub fn session(&self) -> &TlsBuffer {
        &self.session
    }

    /// Adapter configuration
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Current blocking mode of the socket
    pub fn blocking_mode(&self) -> Result<BlockingMode> {
        Ok(self.socket.blocking_mode()?)
    }

    /// Change the blocking mode of the socket
    pub fn set_blocking_mode(&mut self, mode: BlockingMode) -> Result<()> {
        Ok(self.socket.set_blocking_mode(mode)?)
    }

    /// Run the handshake to completion, or until the socket would block.
    pub fn do_handshake(&mut self) -> Result<()> {
        self.drive(TlsBuffer::handshake)
    }

    /// Read up to `max_len` bytes.
    ///
    /// For a non-zero `max_len` an empty result means the peer closed
    /// cleanly. `read(0)` returns empty without receiving from the socket.
    pub fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = self.read_into(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read into `buf`, returning the count (0 on clean closure, or when
    /// `buf` is empty)
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.drive(|session| session.read_into(buf))
    }

    /// Encrypt and send application data, returning how many bytes were
    /// consumed
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.drive(|session| session.write(data))
    }

    /// Write all of `data`
    pub fn send_all(&mut self, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            offset += self.write(&data[offset..])?;
        }
        Ok(())
    }

    /// Send any staged ciphertext
    pub fn flush(&mut self) -> Result<()> {
        let mode = self.socket.blocking_mode()?;
        self.flush_egress(mode, false)
    }

    /// Send the closure alert and drain egress.
    ///
    /// Input needs are not waited for: a peer is not obliged to answer the
    /// alert. On a non-blocking socket this may report `NeedsFlush`; call it
    /// again once the socket is writable.
    pub fn shutdown(&mut self) -> Result<()> {
        let mode = self.socket.blocking_mode()?;
        loop {
            match self.session.shutdown() {
                Ok(()) | Err(TlsError::WouldBlock(Pending::NeedsInput)) => break,
                Err(TlsError::WouldBlock(pending)) => {
                    if self.session.pending_outgoing() == 0 {
                        return Err(TlsError::WouldBlock(pending));
                    }
                    self.flush_egress(mode, false)?;
                }
                Err(err) => return Err(err),
            }
        }
        self.flush_egress(mode, false)?;
        tracing::debug!(state = ?self.session.state(), "TLS socket shut down");
        Ok(())
    }

    /// Shut the session down and hand back the raw socket.
    ///
    /// # Errors
    ///
    /// On failure the adapter is returned inside [`UnwrapError`].
    pub fn unwrap(mut self) -> std::result::Result<S, UnwrapError<S>> {
        match self.shutdown() {
            Ok(()) => Ok(self.socket),
            Err(error) => Err(UnwrapError {
                error,
                socket: Box::new(self),
            }),
        }
    }

    /// Shut the session down and release the socket
    pub fn close(mut self) -> Result<()> {
        let result = self.shutdown();
        tracing::debug!(ok = result.is_ok(), "TLS socket closed");
        result
    }

    /// Session lifecycle state
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Negotiated cipher suite
    pub fn cipher(&self) -> Option<CipherSuite> {
        self.session.cipher()
    }

    /// Negotiated ALPN protocol
    pub fn negotiated_protocol(&self) -> Option<NextProtocol> {
        self.session.negotiated_protocol()
    }

    /// Negotiated protocol version
    pub fn negotiated_version(&self) -> Option<TlsVersion> {
        self.session.negotiated_version()
    }

    /// Context the session was created from
    pub fn context(&self) -> &TlsContext {
        self.session.context()
    }

    /// Transfer counters
    pub fn stats(&self) -> TransportStats {
        self.session.stats()
    }

    /// Retry loop around one session operation
    fn drive<T>(&mut self, mut op: impl FnMut(&mut TlsBuffer) -> Result<T>) -> Result<T> {
        let mode = self.socket.blocking_mode()?;
        let mut received = false;

        loop {
            match op(&mut self.session) {
                Ok(value) => {
                    self.flush_egress(mode, mode.is_non_blocking())?;
                    return Ok(value);
                }
                Err(TlsError::WouldBlock(Pending::NeedsInput)) => {
                    if self.session.pending_outgoing() > 0 {
                        self.flush_egress(mode, false)?;
                    }
                    if received && mode.is_non_blocking() {
                        return Err(TlsError::WouldBlock(Pending::NeedsInput));
                    }
                    self.receive(mode)?;
                    received = true;
                }
                Err(TlsError::WouldBlock(pending)) => {
                    if self.session.pending_outgoing() == 0 {
                        return Err(TlsError::WouldBlock(pending));
                    }
                    self.flush_egress(mode, false)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Exactly one receive into ingress
    fn receive(&mut self, mode: BlockingMode) -> Result<()> {
        if self.session.is_network_eof() {
            return Err(self.session.abort(ProtocolError::new(
                FatalCode::PeerAbort,
                "connection closed without close_notify",
            )));
        }

        loop {
            match self.socket.recv(&mut self.recv_buf) {
                Ok(0) => {
                    tracing::trace!("socket end-of-stream");
                    self.session.mark_network_eof();
                    return Ok(());
                }
                Ok(n) => {
                    tracing::trace!(bytes = n, "socket recv");
                    self.session.receive_from_network(&self.recv_buf[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(socket_error(err, mode, Pending::NeedsInput)),
            }
        }
    }

    /// Drain egress. With `lenient`, a would-block ends the drain quietly.
    fn flush_egress(&mut self, mode: BlockingMode, lenient: bool) -> Result<()> {
        let chunk = self.config.send_chunk_size.max(1);

        while self.session.pending_outgoing() > 0 {
            let sent = match self.socket.send(self.session.peek_outgoing(chunk)) {
                Ok(0) => return Err(TlsError::Io(io::ErrorKind::WriteZero.into())),
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if lenient && err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(socket_error(err, mode, Pending::NeedsFlush)),
            };
            tracing::trace!(bytes = sent, "socket send");
            self.session.consume_outgoing(sent);
        }
        Ok(())
    }

    /// Complete the handshake before the first byte stream operation
    fn ensure_established(&mut self) -> Result<()> {
        match self.session.state() {
            SessionState::Idle | SessionState::Handshaking => self.do_handshake(),
            _ => Ok(()),
        }
    }
}

impl<S: SocketIo> TlsTransport for TlsSocket<S> {
    fn do_handshake(&mut self) -> Result<()> {
        TlsSocket::do_handshake(self)
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        TlsSocket::read(self, max_len)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        TlsSocket::read_into(self, buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        TlsSocket::write(self, data)
    }

    fn shutdown(&mut self) -> Result<()> {
        TlsSocket::shutdown(self)
    }

    fn state(&self) -> SessionState {
        self.session.state()
    }

    fn cipher(&self) -> Option<CipherSuite> {
        self.session.cipher()
    }

    fn negotiated_protocol(&self) -> Option<NextProtocol> {
        self.session.negotiated_protocol()
    }

    fn negotiated_version(&self) -> Option<TlsVersion> {
        self.session.negotiated_version()
    }

    fn context(&self) -> &TlsContext {
        self.session.context()
    }

    fn stats(&self) -> TransportStats {
        self.session.stats()
    }
}

impl<S: SocketIo> io::Read for TlsSocket<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_established()?;
        Ok(self.read_into(buf)?)
    }
}

impl<S: SocketIo> io::Write for TlsSocket<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_established()?;
        Ok(TlsSocket::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(TlsSocket::flush(self)?)
    }
}

impl<S: fmt::Debug> fmt::Debug for TlsSocket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSocket")
            .field("socket", &self.socket)
            .field("session", &self.session)
            .field("config", &self.config)
            .finish()
    }
}

/// Failed [`TlsSocket::unwrap`]; the adapter is kept so nothing is lost
#[derive(Error)]
#[error("failed to unwrap TLS socket: {error}")]
pub struct UnwrapError<S> {
    #[source]
    error: TlsError,
    socket: Box<TlsSocket<S>>,
}

impl<S> UnwrapError<S> {
    /// Error that interrupted the shutdown
    pub fn error(&self) -> &TlsError {
        &self.error
    }

    /// Recover the adapter
    pub fn into_inner(self) -> TlsSocket<S> {
        *self.socket
    }

    /// Split into the error and the adapter
    pub fn into_parts(self) -> (TlsError, TlsSocket<S>) {
        (self.error, *self.socket)
    }
}

impl<S> fmt::Debug for UnwrapError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnwrapError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<S> From<UnwrapError<S>> for TlsError {
    fn from(err: UnwrapError<S>) -> Self {
        err.error
    }
}

/// `wrap_socket` for client contexts
pub trait ClientWrapExt {
    /// Wrap `socket` in a client session.
    ///
    /// `server_hostname` drives SNI and host-name matching; `None` disables
    /// both. With `auto_handshake` the handshake runs before returning.
    fn wrap_socket<S: SocketIo>(
        &self,
        socket: S,
        server_hostname: Option<&str>,
        auto_handshake: bool,
    ) -> Result<TlsSocket<S>> {
        self.wrap_socket_with_config(socket, server_hostname, auto_handshake, SocketConfig::default())
    }

    /// [`wrap_socket`](Self::wrap_socket) with explicit adapter configuration
    fn wrap_socket_with_config<S: SocketIo>(
        &self,
        socket: S,
        server_hostname: Option<&str>,
        auto_handshake: bool,
        config: SocketConfig,
    ) -> Result<TlsSocket<S>>;
}

impl ClientWrapExt for ClientContext {
    fn wrap_socket_with_config<S: SocketIo>(
        &self,
        socket: S,
        server_hostname: Option<&str>,
        auto_handshake: bool,
        config: SocketConfig,
    ) -> Result<TlsSocket<S>> {
        let session = self.wrap_buffers(server_hostname)?;
        finish(TlsSocket::with_config(socket, session, config), auto_handshake)
    }
}

/// `wrap_socket` for server contexts
pub trait ServerWrapExt {
    /// Wrap an accepted `socket` in a server session
    fn wrap_socket<S: SocketIo>(&self, socket: S, auto_handshake: bool) -> Result<TlsSocket<S>> {
        self.wrap_socket_with_config(socket, auto_handshake, SocketConfig::default())
    }

    /// [`wrap_socket`](Self::wrap_socket) with explicit adapter configuration
    fn wrap_socket_with_config<S: SocketIo>(
        &self,
        socket: S,
        auto_handshake: bool,
        config: SocketConfig,
    ) -> Result<TlsSocket<S>>;
}

impl ServerWrapExt for ServerContext {
    fn wrap_socket_with_config<S: SocketIo>(
        &self,
        socket: S,
        auto_handshake: bool,
        config: SocketConfig,
    ) -> Result<TlsSocket<S>> {
        let session = self.wrap_buffers()?;
        finish(TlsSocket::with_config(socket, session, config), auto_handshake)
    }
}

fn finish<S: SocketIo>(mut socket: TlsSocket<S>, auto_handshake: bool) -> Result<TlsSocket<S>> {
    if auto_handshake {
        socket.do_handshake()?;
    }
    Ok(socket)
}
