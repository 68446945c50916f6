//! # tlsbridge core
//!
//! Buffered TLS transport bridge: lets a callback-driven TLS engine run over
//! in-memory staging buffers, and translates the engine's per-call
//! "would block" into directional signals a caller can act on.
//!
//! This crate provides:
//! - Ingress/egress staging buffers
//! - The engine callback adapter over those buffers
//! - The engine capability trait and its rustls implementation
//! - The session wrapper ([`TlsBuffer`]) and its state machine
//! - Immutable configuration and client/server contexts
//!
//! Socket I/O lives in `tlsbridge-transport`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    TlsBuffer (session wrapper)                   │
//! │   state machine, would-block classification, sticky faults      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                    Engine (rustls)                               │
//! │   handshake / read / write / close over borrowed callbacks      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                    StagingIo (callback adapter)                  │
//! │   never blocks, reports insufficient data as WouldBlock         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │           ingress StagingBuffer   │   egress StagingBuffer       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod io;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod transport;

pub use buffer::StagingBuffer;
pub use config::{
    Certificate, CertificateChain, CipherSuite, NextProtocol, PrivateKey, ServerNameCallback,
    TlsConfiguration, TlsVersion, TrustStore,
};
pub use context::{ClientContext, ServerContext, TlsContext};
pub use engine::{ConnectionKind, Engine, EngineState, EngineStatus, Role};
pub use error::{ConfigError, FatalCode, Pending, ProtocolError, Result, TlsError};
pub use io::{EngineIo, IoStatus, StagingIo};
pub use session::{SessionState, TlsBuffer};
pub use transport::{TlsTransport, TransportStats};
