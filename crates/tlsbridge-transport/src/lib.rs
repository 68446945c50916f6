//! # tlsbridge transport
//!
//! Socket adapter for the tlsbridge session wrapper.
//!
//! This crate provides:
//! - [`TlsSocket`], which drives a [`TlsBuffer`](tlsbridge_core::TlsBuffer)
//!   to completion over a real socket with the retry loop
//! - The [`SocketIo`] seam over `TcpStream`, `socket2::Socket` and test doubles
//! - Blocking, non-blocking and timeout-bound socket modes
//! - TCP connect/listen helpers built on `socket2`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod socket;
pub mod tcp;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use socket::{BlockingMode, ClientWrapExt, ServerWrapExt, SocketIo, TlsSocket, UnwrapError};

/// Socket adapter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// Maximum bytes requested by a single receive
    pub recv_chunk_size: usize,
    /// Maximum bytes handed to a single send
    pub send_chunk_size: usize,
    /// Bound on staged egress ciphertext (`None` = unbounded)
    pub egress_limit: Option<usize>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            recv_chunk_size: 8192,
            send_chunk_size: 8192,
            egress_limit: None,
        }
    }
}
