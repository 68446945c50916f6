//! Byte staging buffers standing in for the network on either side of the engine.
//!
//! A session owns two of these: **ingress** (ciphertext received from the peer,
//! waiting to be consumed by the engine) and **egress** (ciphertext emitted by the
//! engine, waiting to be transmitted).
//!
//! # Design
//!
//! - **FIFO**: bytes leave in exactly the order they were appended
//! - **Never blocks**: every operation completes immediately; a request for more
//!   bytes than are staged yields what is staged
//! - **Single owner**: no interior mutability, no atomics; the owning session
//!   serializes all access
//! - **Compacting**: consumed bytes are reclaimed lazily once they make up at
//!   least half of the allocation
//!
//! An optional limit turns the buffer into the bounded variant used for
//! egress back-pressure. [`StagingBuffer::append`] ignores the limit;
//! [`StagingBuffer::offer`] honours it.

/// Consumed prefix length below which compaction is skipped.
const COMPACT_THRESHOLD: usize = 4096;

/// Growable FIFO byte queue.
///
/// # Example
///
/// ```
/// use tlsbridge_core::buffer::StagingBuffer;
///
/// let mut ingress = StagingBuffer::new();
/// ingress.append(b"hello world");
///
/// assert_eq!(ingress.peek(5), b"hello");
/// assert_eq!(ingress.take(6), b"hello ".to_vec());
/// assert_eq!(ingress.consume(100), 5);
/// assert!(ingress.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StagingBuffer {
    /// Backing storage; bytes before `head` are already consumed
    data: Vec<u8>,
    /// Read position inside `data`
    head: usize,
    /// Maximum number of staged bytes accepted by `offer`
    limit: Option<usize>,
    /// The producing side will never append again
    eof: bool,
}

impl StagingBuffer {
    /// Create an empty, unbounded buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer whose [`offer`](Self::offer) accepts at most
    /// `limit` staged bytes
    #[must_use]
    pub fn bounded(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Number of staged (not yet consumed) bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    /// Check if no bytes are staged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured limit, `None` when unbounded
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Change the limit. Bytes already staged are kept even if they exceed it.
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    /// Free space under the limit, `None` when unbounded
    #[must_use]
    pub fn remaining_capacity(&self) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_sub(self.len()))
    }

    /// Check if a bounded buffer has no room left
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.remaining_capacity() == Some(0)
    }

    /// Append all of `bytes`, regardless of any limit.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.data.extend_from_slice(bytes);
        tracing::trace!(appended = bytes.len(), staged = self.len(), "staging append");
    }

    /// Append as many leading bytes of `bytes` as the limit allows.
    ///
    /// Returns the number of bytes accepted. On an unbounded buffer this is
    /// always `bytes.len()`.
    pub fn offer(&mut self, bytes: &[u8]) -> usize {
        let accepted = match self.remaining_capacity() {
            Some(room) => room.min(bytes.len()),
            None => bytes.len(),
        };
        self.append(&bytes[..accepted]);
        accepted
    }

    /// Up to `n` leading bytes, left in place
    #[must_use]
    pub fn peek(&self, n: usize) -> &[u8] {
        let end = self.head + n.min(self.len());
        &self.data[self.head..end]
    }

    /// Remove and return up to `n` leading bytes.
    pub fn take(&mut self, n: usize) -> Vec<u8> {
        let out = self.peek(n).to_vec();
        self.consume(out.len());
        out
    }

    /// Remove up to `out.len()` leading bytes into `out`.
    ///
    /// Returns the number of bytes copied.
    pub fn take_into(&mut self, out: &mut [u8]) -> usize {
        let chunk = self.peek(out.len());
        let n = chunk.len();
        out[..n].copy_from_slice(chunk);
        self.consume(n);
        n
    }

    /// Discard up to `n` leading bytes, typically after the socket confirmed
    /// their transmission.
    ///
    /// Returns the number of bytes discarded.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.len());
        self.head += n;
        self.compact();
        n
    }

    /// Discard every staged byte. The end-of-stream mark is kept.
    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }

    /// Record that the producing side has reached end-of-stream
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Check if end-of-stream was recorded
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Check if end-of-stream was recorded and every staged byte was consumed
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.eof && self.is_empty()
    }

    fn compact(&mut self) {
        if self.head == self.data.len() {
            self.data.clear();
            self.head = 0;
        } else if self.head >= COMPACT_THRESHOLD && self.head * 2 >= self.data.len() {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }
}
