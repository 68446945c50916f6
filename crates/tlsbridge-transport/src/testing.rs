//! Socket double for adapter tests.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for downstream test crates.

use crate::socket::{BlockingMode, SocketIo};
use std::collections::VecDeque;
use std::io;

/// Socket double replaying scripted receive results and send limits
#[derive(Debug, Default)]
pub struct ScriptedSocket {
    /// Receive results in order; once exhausted a non-blocking socket
    /// would-blocks and any other reports end-of-stream
    pub incoming: VecDeque<io::Result<Vec<u8>>>,
    /// Per-call send outcomes; once exhausted every byte is accepted
    pub send_script: VecDeque<io::Result<usize>>,
    /// Everything the socket accepted
    pub sent: Vec<u8>,
    /// Number of receive calls
    pub recv_calls: usize,
    /// Number of send calls
    pub send_calls: usize,
    /// Reported blocking mode
    pub mode: BlockingMode,
}

impl ScriptedSocket {
    /// Empty script in `mode`
    pub fn new(mode: BlockingMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }
}

impl SocketIo for ScriptedSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv_calls += 1;
        match self.incoming.pop_front() {
            Some(Ok(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.incoming.push_front(Ok(bytes.split_off(n)));
                }
                Ok(n)
            }
            Some(Err(err)) => Err(err),
            None if self.mode.is_non_blocking() => Err(io::ErrorKind::WouldBlock.into()),
            None => Ok(0),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send_calls += 1;
        let n = match self.send_script.pop_front() {
            Some(Ok(limit)) => limit.min(buf.len()),
            Some(Err(err)) => return Err(err),
            None => buf.len(),
        };
        self.sent.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn blocking_mode(&self) -> io::Result<BlockingMode> {
        Ok(self.mode)
    }

    fn set_blocking_mode(&mut self, mode: BlockingMode) -> io::Result<()> {
        self.mode = mode;
        Ok(())
    }
}
