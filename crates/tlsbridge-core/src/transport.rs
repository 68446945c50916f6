//! Capability interface shared by the buffer-shaped and socket-shaped
//! transports.

use crate::config::{CipherSuite, NextProtocol, TlsVersion};
use crate::context::TlsContext;
use crate::error::{Pending, Result};
use crate::session::SessionState;

/// TLS transport operations.
///
/// Implemented by [`TlsBuffer`](crate::session::TlsBuffer), which surfaces
/// every would-block signal to the caller, and by the socket adapter, which
/// resolves them against a real socket according to its blocking mode.
///
/// # Example
///
/// ```no_run
/// use tlsbridge_core::{TlsError, TlsTransport};
///
/// fn echo_once<T: TlsTransport>(transport: &mut T) -> Result<(), TlsError> {
///     transport.do_handshake()?;
///     let data = transport.read(1024)?;
///     if !data.is_empty() {
///         transport.write(&data)?;
///     }
///     Ok(())
/// }
/// ```
pub trait TlsTransport {
    /// Drive the handshake
    ///
    /// # Errors
    ///
    /// Returns a would-block signal when the transport cannot make progress
    /// without the caller, or a fatal error.
    fn do_handshake(&mut self) -> Result<()>;

    /// Read up to `max_len` bytes of application data.
    ///
    /// # Returns
    ///
    /// The decrypted bytes; an empty vector only after a clean closure by the peer.
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>>;

    /// Read application data into `buf`
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Encrypt application data
    ///
    /// # Returns
    ///
    /// Number of bytes of `data` consumed.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Send the closure alert
    fn shutdown(&mut self) -> Result<()>;

    /// Session lifecycle state
    fn state(&self) -> SessionState;

    /// Negotiated cipher suite
    fn cipher(&self) -> Option<CipherSuite>;

    /// Negotiated ALPN protocol
    fn negotiated_protocol(&self) -> Option<NextProtocol>;

    /// Negotiated protocol version
    fn negotiated_version(&self) -> Option<TlsVersion>;

    /// Context the session was created from
    fn context(&self) -> &TlsContext;

    /// Transfer statistics
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Transport statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Completed handshakes
    pub handshakes: u64,
    /// Application bytes delivered to the caller
    pub cleartext_read: u64,
    /// Application bytes accepted from the caller
    pub cleartext_written: u64,
    /// Ciphertext bytes received from the network
    pub ciphertext_received: u64,
    /// Ciphertext bytes confirmed sent to the network
    pub ciphertext_sent: u64,
    /// Would-block outcomes waiting on input
    pub wants_read: u64,
    /// Would-block outcomes waiting on a flush
    pub wants_write: u64,
}

impl TransportStats {
    /// Create new empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed handshake
    pub fn record_handshake(&mut self) {
        self.handshakes += 1;
    }

    /// Record application data handed to the caller
    pub fn record_read(&mut self, bytes: usize) {
        self.cleartext_read += bytes as u64;
    }

    /// Record application data accepted for encryption
    pub fn record_write(&mut self, bytes: usize) {
        self.cleartext_written += bytes as u64;
    }

    /// Record ciphertext appended to ingress
    pub fn record_ingress(&mut self, bytes: usize) {
        self.ciphertext_received += bytes as u64;
    }

    /// Record ciphertext dropped from egress after transmission
    pub fn record_egress(&mut self, bytes: usize) {
        self.ciphertext_sent += bytes as u64;
    }

    /// Record a would-block outcome
    pub fn record_would_block(&mut self, pending: Pending) {
        if pending.wants_read() {
            self.wants_read += 1;
        } else {
            self.wants_write += 1;
        }
    }
}
