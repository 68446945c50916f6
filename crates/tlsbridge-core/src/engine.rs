//! TLS engine capability.
//!
//! The engine is reachable only through the fixed operation set of [`Engine`].
//! Ciphertext never flows through the engine's own transport: every operation
//! borrows the callback pair ([`EngineIo`]) for the duration of that single
//! call, which lets the caller observe exactly what each call consumed and
//! produced.

mod rustls_engine;
pub(crate) mod verify;

use crate::config::{CipherSuite, NextProtocol, TlsVersion};
use crate::error::{ConfigError, ProtocolError};
use crate::io::EngineIo;

pub use self::rustls_engine::{EngineSettings, RustlsEngine};

/// Side of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the handshake
    Client,
    /// Accepts the handshake
    Server,
}

/// Transport flavour an engine session runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Reliable byte stream (TLS)
    Stream,
    /// Datagrams (DTLS)
    Datagram,
}

/// Result of one engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus<T> {
    /// Operation completed
    Ready(T),
    /// The callbacks could not move enough bytes to make progress
    WouldBlock,
    /// The peer closed the session gracefully
    ClosedGraceful,
    /// Fatal condition; the engine session is unusable
    Fatal(ProtocolError),
}

impl<T> EngineStatus<T> {
    /// Check if the operation completed
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Engine session state as reported by query-state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Created, no handshake message exchanged
    Idle,
    /// Handshake in progress
    Handshake,
    /// Handshake complete, application data may flow
    Connected,
    /// Closed gracefully
    Closed,
    /// Terminated by a fatal error
    Aborted,
}

/// Callback-driven TLS engine session
pub trait Engine: Send {
    /// Set the name used for SNI and certificate host-name matching.
    /// Only meaningful before the first handshake step.
    fn set_peer_name(&mut self, name: &str) -> Result<(), ConfigError>;

    /// Advance the handshake as far as the callbacks allow
    fn handshake_step(&mut self, io: &mut dyn EngineIo) -> EngineStatus<()>;

    /// Decrypt up to `buf.len()` bytes of application data into `buf`
    fn read_cleartext(&mut self, io: &mut dyn EngineIo, buf: &mut [u8]) -> EngineStatus<usize>;

    /// Encrypt application data, returning how many bytes were consumed
    fn write_cleartext(&mut self, io: &mut dyn EngineIo, data: &[u8]) -> EngineStatus<usize>;

    /// Emit the closure alert
    fn close(&mut self, io: &mut dyn EngineIo) -> EngineStatus<()>;

    /// Hand ciphertext the engine still holds to the write callback.
    /// Only bounded egress leaves anything behind.
    fn flush(&mut self, io: &mut dyn EngineIo) -> EngineStatus<()>;

    /// Current session state
    fn state(&self) -> EngineState;

    /// Negotiated cipher suite, once known
    fn cipher_suite(&self) -> Option<CipherSuite>;

    /// Negotiated ALPN protocol, once known
    fn negotiated_protocol(&self) -> Option<NextProtocol>;

    /// Negotiated protocol version, once known
    fn negotiated_version(&self) -> Option<TlsVersion>;
}
