//! Engine double for session and adapter tests.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for downstream test crates.

use crate::config::{CipherSuite, NextProtocol, TlsConfiguration, TlsVersion};
use crate::context::ClientContext;
use crate::engine::{Engine, EngineState, EngineStatus};
use crate::error::{ConfigError, Result};
use crate::io::EngineIo;
use crate::session::TlsBuffer;
use std::collections::VecDeque;

/// Engine double: each call emits scripted ciphertext, then returns the
/// scripted status. An exhausted script would-blocks forever.
#[derive(Debug)]
pub struct ScriptedEngine {
    script: VecDeque<(Vec<u8>, EngineStatus<usize>)>,
    state: EngineState,
}

impl ScriptedEngine {
    /// Engine replaying `script`
    pub fn new(script: Vec<(Vec<u8>, EngineStatus<usize>)>) -> Self {
        Self {
            script: script.into(),
            state: EngineState::Idle,
        }
    }

    /// Handshake that stages `hello`, waits once, then completes
    pub fn handshake_emitting(hello: &[u8]) -> Self {
        Self::new(vec![
            (hello.to_vec(), EngineStatus::WouldBlock),
            (Vec::new(), EngineStatus::Ready(0)),
        ])
    }

    /// Wrap the engine in a client session with a default context
    pub fn into_session(self) -> Result<TlsBuffer> {
        let context = ClientContext::new(TlsConfiguration::default())?;
        Ok(TlsBuffer::new(context.into(), Box::new(self)))
    }

    fn next(&mut self, io: &mut dyn EngineIo) -> EngineStatus<usize> {
        let (output, status) = self
            .script
            .pop_front()
            .unwrap_or((Vec::new(), EngineStatus::WouldBlock));
        if !output.is_empty() {
            io.write(&output);
        }
        status
    }

    fn next_unit(&mut self, io: &mut dyn EngineIo) -> EngineStatus<()> {
        match self.next(io) {
            EngineStatus::Ready(_) => EngineStatus::Ready(()),
            EngineStatus::WouldBlock => EngineStatus::WouldBlock,
            EngineStatus::ClosedGraceful => EngineStatus::ClosedGraceful,
            EngineStatus::Fatal(err) => EngineStatus::Fatal(err),
        }
    }
}

impl Engine for ScriptedEngine {
    fn set_peer_name(&mut self, _name: &str) -> std::result::Result<(), ConfigError> {
        Ok(())
    }

    fn handshake_step(&mut self, io: &mut dyn EngineIo) -> EngineStatus<()> {
        let status = self.next_unit(io);
        self.state = if status.is_ready() {
            EngineState::Connected
        } else {
            EngineState::Handshake
        };
        status
    }

    fn read_cleartext(&mut self, io: &mut dyn EngineIo, _buf: &mut [u8]) -> EngineStatus<usize> {
        self.next(io)
    }

    fn write_cleartext(&mut self, io: &mut dyn EngineIo, _data: &[u8]) -> EngineStatus<usize> {
        self.next(io)
    }

    fn close(&mut self, io: &mut dyn EngineIo) -> EngineStatus<()> {
        self.state = EngineState::Closed;
        self.next_unit(io)
    }

    fn flush(&mut self, _io: &mut dyn EngineIo) -> EngineStatus<()> {
        EngineStatus::Ready(())
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn cipher_suite(&self) -> Option<CipherSuite> {
        None
    }

    fn negotiated_protocol(&self) -> Option<NextProtocol> {
        None
    }

    fn negotiated_version(&self) -> Option<TlsVersion> {
        None
    }
}
