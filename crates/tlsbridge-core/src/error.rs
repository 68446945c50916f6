//! Error types for the tlsbridge core.

use crate::config::TlsVersion;
use crate::engine::Role;
use crate::session::SessionState;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// Direction a would-block outcome is waiting on.
///
/// Recomputed on every call from what the engine did to the staging buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pending {
    /// Ingress holds too few bytes; receive more from the network
    NeedsInput,
    /// The engine staged new ciphertext in egress; send it before retrying
    NeedsFlush,
    /// Bounded egress is full; send, then retry the same write
    EgressFull,
}

impl Pending {
    /// Check if the caller must supply more input
    #[must_use]
    pub fn wants_read(self) -> bool {
        self == Self::NeedsInput
    }

    /// Check if the caller must flush egress
    #[must_use]
    pub fn wants_write(self) -> bool {
        matches!(self, Self::NeedsFlush | Self::EgressFull)
    }
}

impl fmt::Display for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeedsInput => f.write_str("read needed"),
            Self::NeedsFlush => f.write_str("write needed"),
            Self::EgressFull => f.write_str("write needed, output buffer full"),
        }
    }
}

/// Closed set of fatal conditions reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalCode {
    /// Malformed or unexpected message, peer misbehaviour
    Protocol,
    /// No acceptable handshake parameters
    HandshakeFailure,
    /// No mutually supported protocol version
    UnsupportedVersion,
    /// Certificate invalid, unsupported or rejected
    BadCertificate,
    /// Certificate chain does not lead to a trusted root
    UnknownIssuer,
    /// Certificate expired or not yet valid
    CertificateExpired,
    /// Certificate not valid for the configured peer name
    HostNameMismatch,
    /// Peer sent a fatal alert not covered above
    FatalAlert,
    /// Record failed to decrypt or authenticate
    Decrypt,
    /// Transport ended without a close_notify
    PeerAbort,
    /// No common application protocol (ALPN)
    NoApplicationProtocol,
    /// Any other engine failure
    Internal,
}

impl FatalCode {
    /// Stable numeric code
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Protocol => 1,
            Self::HandshakeFailure => 2,
            Self::UnsupportedVersion => 3,
            Self::BadCertificate => 4,
            Self::UnknownIssuer => 5,
            Self::CertificateExpired => 6,
            Self::HostNameMismatch => 7,
            Self::FatalAlert => 8,
            Self::Decrypt => 9,
            Self::PeerAbort => 10,
            Self::NoApplicationProtocol => 11,
            Self::Internal => 99,
        }
    }
}

impl fmt::Display for FatalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Protocol => "protocol violation",
            Self::HandshakeFailure => "handshake failure",
            Self::UnsupportedVersion => "unsupported protocol version",
            Self::BadCertificate => "bad certificate",
            Self::UnknownIssuer => "unknown certificate issuer",
            Self::CertificateExpired => "certificate expired or not yet valid",
            Self::HostNameMismatch => "host name mismatch",
            Self::FatalAlert => "fatal alert received",
            Self::Decrypt => "decryption failed",
            Self::PeerAbort => "connection aborted by peer",
            Self::NoApplicationProtocol => "no application protocol",
            Self::Internal => "internal engine error",
        };
        f.write_str(text)
    }
}

/// Fatal engine condition. Once raised, the session is faulted and keeps
/// returning a clone of this value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} ({detail})")]
pub struct ProtocolError {
    code: FatalCode,
    detail: String,
}

impl ProtocolError {
    /// Create a protocol error with engine-provided detail text
    pub fn new(code: FatalCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    /// Fatal condition code
    #[must_use]
    pub fn code(&self) -> FatalCode {
        self.code
    }

    /// Engine-provided detail text
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Errors surfaced by sessions and socket adapters
#[derive(Debug, Error)]
pub enum TlsError {
    /// Recoverable control-flow signal: retry after reading or flushing
    #[error("operation would block: {0}")]
    WouldBlock(Pending),

    /// Operation invalid in the current session state
    #[error("{operation} is not valid in state {state:?}")]
    Usage {
        /// Rejected operation
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },

    /// Fatal engine condition
    #[error("TLS protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer completed a graceful closure
    #[error("connection closed by peer")]
    PeerClosed,

    /// A socket call exceeded its configured timeout
    #[error("socket operation timed out")]
    Timeout,

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TlsError {
    /// The would-block direction, if this is a would-block signal
    #[must_use]
    pub fn pending(&self) -> Option<Pending> {
        match self {
            Self::WouldBlock(pending) => Some(*pending),
            _ => None,
        }
    }

    /// Check if this is a would-block signal of either direction
    #[must_use]
    pub fn is_would_block(&self) -> bool {
        self.pending().is_some()
    }

    /// Check if the caller must supply more input before retrying
    #[must_use]
    pub fn is_want_read(&self) -> bool {
        self.pending().is_some_and(Pending::wants_read)
    }

    /// Check if the caller must flush egress before retrying
    #[must_use]
    pub fn is_want_write(&self) -> bool {
        self.pending().is_some_and(Pending::wants_write)
    }

    /// Check if the error leaves the session unusable
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_would_block()
    }
}

impl From<TlsError> for io::Error {
    fn from(err: TlsError) -> Self {
        match err {
            TlsError::Io(err) => err,
            TlsError::WouldBlock(_) => io::Error::new(io::ErrorKind::WouldBlock, err),
            TlsError::Timeout => io::Error::new(io::ErrorKind::TimedOut, err),
            TlsError::PeerClosed => io::Error::new(io::ErrorKind::BrokenPipe, err),
            TlsError::Protocol(ref protocol) if protocol.code() == FatalCode::PeerAbort => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            TlsError::Protocol(_) => io::Error::new(io::ErrorKind::InvalidData, err),
            TlsError::Usage { .. } => io::Error::new(io::ErrorKind::NotConnected, err),
            TlsError::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A certificate, key or trust file could not be read
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Certificate data could not be parsed
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Private key data could not be parsed
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Password-protected private key
    #[error("encrypted private keys are not supported")]
    EncryptedKey,

    /// None of the configured cipher suites is implemented by the engine
    #[error("no configured cipher suite is supported by the engine")]
    NoUsableCiphers,

    /// The configured version range excludes every engine version
    #[error("no supported TLS version between {lowest:?} and {highest:?}")]
    VersionRange {
        /// Configured lower bound
        lowest: TlsVersion,
        /// Configured upper bound
        highest: TlsVersion,
    },

    /// Server context without certificate material
    #[error("server contexts need a certificate chain or a server-name callback")]
    MissingCertificate,

    /// Peer name is neither a DNS name nor an IP address
    #[error("invalid peer name: {0}")]
    InvalidPeerName(String),

    /// Engine settings were built for the other side of the connection
    #[error("engine settings do not match the {0:?} role")]
    RoleMismatch(Role),

    /// The engine cannot run this connection kind
    #[error("{0} connections are not supported")]
    UnsupportedConnectionKind(&'static str),

    /// Trust store could not be built
    #[error("trust store: {0}")]
    TrustStore(String),

    /// A textual setting could not be parsed
    #[error("unknown {kind}: {value}")]
    Parse {
        /// Kind of setting
        kind: &'static str,
        /// Rejected text
        value: String,
    },

    /// The engine rejected the translated settings
    #[error("engine rejected configuration: {0}")]
    Engine(#[from] rustls::Error),
}
