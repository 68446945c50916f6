//! Engine callback adapter.
//!
//! The engine moves ciphertext exclusively through a read/write callback pair
//! ([`EngineIo`]). [`StagingIo`] implements that pair on top of a session's
//! staging buffers: it never blocks, and it reports "insufficient data" with
//! [`IoStatus::WouldBlock`] instead of waiting for the network.
//!
//! [`CallbackReader`] and [`CallbackWriter`] expose any [`EngineIo`] through
//! `std::io::Read` / `std::io::Write`, which is the shape rustls' `read_tls` and
//! `write_tls` consume. A zero-byte would-block becomes
//! [`io::ErrorKind::WouldBlock`]; a partial would-block is reported as a short
//! read or write and the next call observes the would-block.

use crate::buffer::StagingBuffer;
use std::io;

/// Outcome of a single engine I/O callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The whole request was satisfied
    Complete(usize),
    /// Only the carried number of bytes (possibly zero) could be moved
    WouldBlock(usize),
    /// Ingress reached end-of-stream and holds no more bytes
    Eof,
}

impl IoStatus {
    /// Number of bytes moved by the callback
    #[must_use]
    pub fn transferred(self) -> usize {
        match self {
            Self::Complete(n) | Self::WouldBlock(n) => n,
            Self::Eof => 0,
        }
    }
}

/// Read/write callback pair the engine drives its ciphertext through.
///
/// Implementations must return immediately. A read that cannot be fully
/// satisfied returns [`IoStatus::WouldBlock`] with whatever was available.
pub trait EngineIo {
    /// Fill `buf` with ciphertext received from the peer
    fn read(&mut self, buf: &mut [u8]) -> IoStatus;

    /// Stage ciphertext destined for the peer
    fn write(&mut self, buf: &[u8]) -> IoStatus;
}

/// [`EngineIo`] over a session's ingress and egress staging buffers.
///
/// Besides moving bytes it records what happened during one engine call, so
/// the session can classify a would-block outcome afterwards.
#[derive(Debug)]
pub struct StagingIo<'a> {
    ingress: &'a mut StagingBuffer,
    egress: &'a mut StagingBuffer,
    consumed: usize,
    produced: usize,
    egress_blocked: bool,
}

impl<'a> StagingIo<'a> {
    /// Bind the callbacks to a buffer pair for the duration of one engine call
    pub fn new(ingress: &'a mut StagingBuffer, egress: &'a mut StagingBuffer) -> Self {
        Self {
            ingress,
            egress,
            consumed: 0,
            produced: 0,
            egress_blocked: false,
        }
    }

    /// Bytes taken from ingress so far
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Bytes appended to egress so far
    #[must_use]
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Check if a write was refused because bounded egress was full
    #[must_use]
    pub fn egress_blocked(&self) -> bool {
        self.egress_blocked
    }
}

impl EngineIo for StagingIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> IoStatus {
        if buf.is_empty() {
            return IoStatus::Complete(0);
        }

        let n = self.ingress.take_into(buf);
        self.consumed += n;

        if n == buf.len() {
            IoStatus::Complete(n)
        } else if n == 0 && self.ingress.is_eof() {
            IoStatus::Eof
        } else {
            IoStatus::WouldBlock(n)
        }
    }

    fn write(&mut self, buf: &[u8]) -> IoStatus {
        let accepted = self.egress.offer(buf);
        self.produced += accepted;

        if accepted == buf.len() {
            IoStatus::Complete(accepted)
        } else {
            self.egress_blocked = true;
            IoStatus::WouldBlock(accepted)
        }
    }
}

/// `std::io::Read` view of an [`EngineIo`] read callback
pub struct CallbackReader<'a, I: ?Sized>(pub &'a mut I);

impl<I: EngineIo + ?Sized> io::Read for CallbackReader<'_, I> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf) {
            IoStatus::Complete(n) => Ok(n),
            IoStatus::WouldBlock(0) => Err(io::ErrorKind::WouldBlock.into()),
            IoStatus::WouldBlock(n) => Ok(n),
            IoStatus::Eof => Ok(0),
        }
    }
}

/// `std::io::Write` view of an [`EngineIo`] write callback
pub struct CallbackWriter<'a, I: ?Sized>(pub &'a mut I);

impl<I: EngineIo + ?Sized> io::Write for CallbackWriter<'_, I> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.0.write(buf) {
            IoStatus::Complete(n) => Ok(n),
            IoStatus::WouldBlock(0) | IoStatus::Eof => Err(io::ErrorKind::WouldBlock.into()),
            IoStatus::WouldBlock(n) => Ok(n),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
