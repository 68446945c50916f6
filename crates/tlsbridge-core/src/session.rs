//! Session wrapper: the buffer-shaped TLS transport.
//!
//! [`TlsBuffer`] owns one engine session and its ingress/egress staging
//! buffers. It never touches a socket: callers feed received ciphertext with
//! [`TlsBuffer::receive_from_network`] and ship whatever
//! [`TlsBuffer::peek_outgoing`] shows, confirming transmission with
//! [`TlsBuffer::consume_outgoing`].
//!
//! ```text
//!            handshake()             engine Ready
//!   Idle ──────────────► Handshaking ─────────────► Established
//!    │                        │                          │
//!    │ shutdown()             │ fatal                    │ shutdown() / peer close_notify
//!    ▼                        ▼                          ▼
//!  Closed                  Faulted ◄──── fatal ────── Closed
//! ```
//!
//! Would-block outcomes carry a [`Pending`] direction computed from what the
//! engine did to the buffers during the failed call: if egress grew, the new
//! bytes must reach the peer first ([`Pending::NeedsFlush`]); if bounded
//! egress refused bytes, flush and retry ([`Pending::EgressFull`]); otherwise
//! more ciphertext is needed ([`Pending::NeedsInput`]).

use crate::buffer::StagingBuffer;
use crate::config::{CipherSuite, NextProtocol, TlsVersion};
use crate::context::TlsContext;
use crate::engine::{Engine, EngineState, EngineStatus, Role};
use crate::error::{FatalCode, Pending, ProtocolError, Result, TlsError};
use crate::io::{EngineIo, StagingIo};
use crate::transport::{TlsTransport, TransportStats};
use std::fmt;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, handshake not started
    Idle,
    /// Handshake in progress
    Handshaking,
    /// Handshake complete; application data may flow
    Established,
    /// Closed gracefully, by either side
    Closed,
    /// A fatal engine error occurred; absorbing
    Faulted,
}

impl SessionState {
    /// Check if a transition from `self` to `to` is valid
    #[must_use]
    pub fn can_transition(self, to: SessionState) -> bool {
        match (self, to) {
            (Self::Idle, Self::Handshaking | Self::Closed) => true,
            (Self::Handshaking, Self::Established) => true,
            (Self::Handshaking | Self::Established, Self::Closed) => true,
            (Self::Idle | Self::Handshaking | Self::Established | Self::Closed, Self::Faulted) => {
                true
            }
            _ => false,
        }
    }

    /// Check if the state is terminal
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Faulted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Engine call outcome after status translation
enum Step<T> {
    Done(T),
    PeerClosed,
}

/// Buffer-shaped TLS session.
///
/// # Example
///
/// ```no_run
/// use tlsbridge_core::{ClientContext, TlsConfiguration};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let context = ClientContext::new(TlsConfiguration::default())?;
/// let mut session = context.wrap_buffers(Some("example.com"))?;
///
/// // Drives the handshake until it asks for the network
/// let err = session.handshake().unwrap_err();
/// assert!(err.is_want_write());
/// let client_hello = session.take_outgoing(usize::MAX);
/// # let _ = client_hello;
/// # Ok(())
/// # }
/// ```
pub struct TlsBuffer {
    context: TlsContext,
    engine: Box<dyn Engine>,
    ingress: StagingBuffer,
    egress: StagingBuffer,
    state: SessionState,
    /// Sticky fatal error once `Faulted`
    fault: Option<ProtocolError>,
    /// The peer's close_notify was observed
    peer_closed: bool,
    /// Our close_notify was staged
    local_closed: bool,
    stats: TransportStats,
}

impl TlsBuffer {
    /// Bind an idle engine session to a fresh pair of staging buffers
    pub fn new(context: TlsContext, engine: Box<dyn Engine>) -> Self {
        Self {
            context,
            engine,
            ingress: StagingBuffer::new(),
            egress: StagingBuffer::new(),
            state: SessionState::Idle,
            fault: None,
            peer_closed: false,
            local_closed: false,
            stats: TransportStats::new(),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Side of the connection this session plays
    #[must_use]
    pub fn role(&self) -> Role {
        self.context.role()
    }

    /// Context the session was created from
    #[must_use]
    pub fn context(&self) -> &TlsContext {
        &self.context
    }

    /// Engine-level state (query-state)
    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// Transfer counters
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    /// Check if the peer closed the session gracefully
    #[must_use]
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Negotiated cipher suite
    #[must_use]
    pub fn cipher(&self) -> Option<CipherSuite> {
        self.engine.cipher_suite()
    }

    /// Negotiated ALPN protocol
    #[must_use]
    pub fn negotiated_protocol(&self) -> Option<NextProtocol> {
        self.engine.negotiated_protocol()
    }

    /// Negotiated protocol version
    #[must_use]
    pub fn negotiated_version(&self) -> Option<TlsVersion> {
        self.engine.negotiated_version()
    }

    /// Set the name used for SNI and certificate host-name matching.
    ///
    /// # Errors
    ///
    /// [`TlsError::Usage`] unless the session is `Idle`;
    /// [`TlsError::Config`] if the name is neither a DNS name nor an IP address.
    pub fn set_peer_name(&mut self, name: &str) -> Result<()> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Faulted => return Err(self.sticky_fault()),
            state => {
                return Err(TlsError::Usage {
                    operation: "set_peer_name",
                    state,
                });
            }
        }
        self.engine.set_peer_name(name)?;
        Ok(())
    }

    /// Drive the handshake one step.
    ///
    /// Returns `Ok(())` once the session is `Established`; calling it again
    /// then is a no-op that touches neither buffer.
    ///
    /// # Errors
    ///
    /// [`TlsError::WouldBlock`] when the network must be serviced first,
    /// [`TlsError::Protocol`] on a fatal engine error.
    pub fn handshake(&mut self) -> Result<()> {
        match self.state {
            SessionState::Established => return Ok(()),
            SessionState::Idle => self.transition(SessionState::Handshaking),
            SessionState::Handshaking => {}
            SessionState::Closed => return Err(self.closed_error("handshake")),
            SessionState::Faulted => return Err(self.sticky_fault()),
        }

        match self.drive(|engine, io| engine.handshake_step(io))? {
            Step::Done(()) => {
                self.transition(SessionState::Established);
                self.stats.record_handshake();
                tracing::debug!(
                    role = ?self.role(),
                    version = ?self.negotiated_version(),
                    cipher = ?self.cipher(),
                    alpn = ?self.negotiated_protocol(),
                    "TLS handshake complete"
                );
                Ok(())
            }
            Step::PeerClosed => Err(TlsError::PeerClosed),
        }
    }

    /// Read up to `max_len` bytes of application data.
    ///
    /// An empty result for a non-zero `max_len` means the peer closed the
    /// session gracefully; it is never used to signal would-block. A
    /// zero-length request returns empty without calling the engine, so
    /// only the state tells closure apart there.
    pub fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = self.read_into(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read application data into `buf`, returning the count.
    ///
    /// 0 means clean closure unless `buf` is empty, in which case nothing
    /// is read and the state is unchanged.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.state {
            SessionState::Established => {}
            SessionState::Closed if self.peer_closed => return Ok(0),
            SessionState::Faulted => return Err(self.sticky_fault()),
            state => return Err(TlsError::Usage { operation: "read", state }),
        }
        if buf.is_empty() {
            return Ok(0);
        }

        match self.drive(|engine, io| engine.read_cleartext(io, buf))? {
            Step::Done(n) => {
                self.stats.record_read(n);
                Ok(n)
            }
            Step::PeerClosed => Ok(0),
        }
    }

    /// Encrypt application data, returning how many bytes were consumed.
    ///
    /// Consumption may be partial; the remainder must be written again.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self.state {
            SessionState::Established => {}
            SessionState::Faulted => return Err(self.sticky_fault()),
            SessionState::Closed => return Err(self.closed_error("write")),
            state => return Err(TlsError::Usage { operation: "write", state }),
        }
        if data.is_empty() {
            return Ok(0);
        }

        match self.drive(|engine, io| engine.write_cleartext(io, data))? {
            Step::Done(n) => {
                self.stats.record_write(n);
                Ok(n)
            }
            Step::PeerClosed => Err(TlsError::PeerClosed),
        }
    }

    /// Stage the closure alert and move to `Closed`.
    ///
    /// From `Idle` the session closes without engine traffic. Once `Closed`
    /// this is a no-op, except that a close_notify is still answered.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.state {
            SessionState::Idle => {
                self.local_closed = true;
                self.transition(SessionState::Closed);
                return Ok(());
            }
            SessionState::Closed if self.local_closed => return Ok(()),
            SessionState::Faulted => return Err(self.sticky_fault()),
            SessionState::Handshaking | SessionState::Established | SessionState::Closed => {}
        }

        match self.drive(|engine, io| engine.close(io))? {
            Step::Done(()) | Step::PeerClosed => {
                self.local_closed = true;
                if self.state != SessionState::Closed {
                    self.transition(SessionState::Closed);
                }
                Ok(())
            }
        }
    }

    /// Append ciphertext received from the peer to ingress
    pub fn receive_from_network(&mut self, bytes: &[u8]) {
        self.ingress.append(bytes);
        self.stats.record_ingress(bytes.len());
    }

    /// Record that the peer's transport reached end-of-stream
    pub fn mark_network_eof(&mut self) {
        self.ingress.set_eof();
    }

    /// Check if end-of-stream was recorded for ingress
    #[must_use]
    pub fn is_network_eof(&self) -> bool {
        self.ingress.is_eof()
    }

    /// Ciphertext received but not yet consumed by the engine
    #[must_use]
    pub fn pending_incoming(&self) -> usize {
        self.ingress.len()
    }

    /// Ciphertext waiting to be transmitted
    #[must_use]
    pub fn pending_outgoing(&self) -> usize {
        self.egress.len()
    }

    /// Up to `n` bytes of ciphertext waiting to be transmitted, left in place
    #[must_use]
    pub fn peek_outgoing(&self, n: usize) -> &[u8] {
        self.egress.peek(n)
    }

    /// Drop `n` transmitted bytes from egress.
    ///
    /// With a bounded egress the engine may hold further ciphertext; it is
    /// moved into the freed space immediately.
    pub fn consume_outgoing(&mut self, n: usize) -> usize {
        let consumed = self.egress.consume(n);
        self.stats.record_egress(consumed);
        if consumed > 0 && self.egress.limit().is_some() {
            self.refill_egress();
        }
        consumed
    }

    /// Remove and return up to `n` bytes of ciphertext waiting to be transmitted
    pub fn take_outgoing(&mut self, n: usize) -> Vec<u8> {
        let out = self.egress.peek(n).to_vec();
        self.consume_outgoing(out.len());
        out
    }

    /// Bound egress (`Some`) or make it unbounded (`None`)
    pub fn set_egress_limit(&mut self, limit: Option<usize>) {
        self.egress.set_limit(limit);
    }

    /// Configured egress bound
    #[must_use]
    pub fn egress_limit(&self) -> Option<usize> {
        self.egress.limit()
    }

    /// Run one engine operation against the staging buffers and translate
    /// its status.
    fn drive<T>(
        &mut self,
        op: impl FnOnce(&mut dyn Engine, &mut dyn EngineIo) -> EngineStatus<T>,
    ) -> Result<Step<T>> {
        let mut io = StagingIo::new(&mut self.ingress, &mut self.egress);
        let status = op(self.engine.as_mut(), &mut io);
        let consumed = io.consumed();
        let produced = io.produced();
        let egress_blocked = io.egress_blocked();
        tracing::trace!(consumed, produced, egress_blocked, "engine call");

        match status {
            EngineStatus::Ready(value) => Ok(Step::Done(value)),
            EngineStatus::WouldBlock => {
                let pending = if egress_blocked {
                    Pending::EgressFull
                } else if produced > 0 {
                    Pending::NeedsFlush
                } else {
                    Pending::NeedsInput
                };
                self.stats.record_would_block(pending);
                Err(TlsError::WouldBlock(pending))
            }
            EngineStatus::ClosedGraceful => {
                self.peer_closed = true;
                if self.state != SessionState::Closed {
                    self.transition(SessionState::Closed);
                }
                Ok(Step::PeerClosed)
            }
            EngineStatus::Fatal(err) => Err(self.fail(err)),
        }
    }

    fn refill_egress(&mut self) {
        if matches!(self.state, SessionState::Idle | SessionState::Faulted) {
            return;
        }
        let mut io = StagingIo::new(&mut self.ingress, &mut self.egress);
        if let EngineStatus::Fatal(err) = self.engine.flush(&mut io) {
            // Surfaces on the next operation
            let _ = self.fail(err);
        }
    }

    /// Fault the session with a condition detected outside the engine,
    /// such as a transport ending without a close_notify.
    ///
    /// Returns the error to surface. An already faulted session keeps its
    /// first fault.
    pub fn abort(&mut self, err: ProtocolError) -> TlsError {
        if self.state == SessionState::Faulted {
            return self.sticky_fault();
        }
        self.fail(err)
    }

    fn fail(&mut self, err: ProtocolError) -> TlsError {
        tracing::warn!(
            code = ?err.code(),
            detail = err.detail(),
            state = ?self.state,
            "TLS session faulted"
        );
        self.fault = Some(err.clone());
        self.transition(SessionState::Faulted);
        TlsError::Protocol(err)
    }

    fn sticky_fault(&self) -> TlsError {
        TlsError::Protocol(
            self.fault
                .clone()
                .unwrap_or_else(|| ProtocolError::new(FatalCode::Internal, "session faulted")),
        )
    }

    fn closed_error(&self, operation: &'static str) -> TlsError {
        if self.peer_closed {
            TlsError::PeerClosed
        } else {
            TlsError::Usage {
                operation,
                state: self.state,
            }
        }
    }

    fn transition(&mut self, to: SessionState) {
        debug_assert!(
            self.state.can_transition(to),
            "invalid session transition {:?} -> {:?}",
            self.state,
            to
        );
        tracing::debug!(from = ?self.state, to = ?to, "session state transition");
        self.state = to;
    }
}

impl TlsTransport for TlsBuffer {
    fn do_handshake(&mut self) -> Result<()> {
        self.handshake()
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        TlsBuffer::read(self, max_len)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        TlsBuffer::read_into(self, buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        TlsBuffer::write(self, data)
    }

    fn shutdown(&mut self) -> Result<()> {
        TlsBuffer::shutdown(self)
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn cipher(&self) -> Option<CipherSuite> {
        TlsBuffer::cipher(self)
    }

    fn negotiated_protocol(&self) -> Option<NextProtocol> {
        TlsBuffer::negotiated_protocol(self)
    }

    fn negotiated_version(&self) -> Option<TlsVersion> {
        TlsBuffer::negotiated_version(self)
    }

    fn context(&self) -> &TlsContext {
        &self.context
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

impl fmt::Debug for TlsBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsBuffer")
            .field("role", &self.role())
            .field("state", &self.state)
            .field("ingress", &self.ingress.len())
            .field("egress", &self.egress.len())
            .field("peer_closed", &self.peer_closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Certificate, CertificateChain, PrivateKey, TlsConfiguration, TrustStore};
    use crate::context::{ClientContext, ServerContext};
    use crate::engine::ConnectionKind;
    use crate::testing::ScriptedEngine;

    fn scripted(script: Vec<(Vec<u8>, EngineStatus<usize>)>) -> TlsBuffer {
        ScriptedEngine::new(script).into_session().unwrap()
    }

    fn established() -> TlsBuffer {
        let mut session = scripted(vec![(Vec::new(), EngineStatus::Ready(0))]);
        session.handshake().unwrap();
        session
    }

    fn fatal(code: FatalCode) -> EngineStatus<usize> {
        EngineStatus::Fatal(ProtocolError::new(code, "scripted"))
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition(Handshaking));
        assert!(Idle.can_transition(Closed));
        assert!(Handshaking.can_transition(Established));
        assert!(Established.can_transition(Closed));
        assert!(Established.can_transition(Faulted));
        assert!(!Idle.can_transition(Established));
        assert!(!Closed.can_transition(Established));
        assert!(!Faulted.can_transition(Idle));
        assert!(Closed.is_terminal() && Faulted.is_terminal());
    }

    #[test]
    fn test_would_block_with_output_needs_flush() {
        let mut session = scripted(vec![(b"hello".to_vec(), EngineStatus::WouldBlock)]);
        let err = session.handshake().unwrap_err();
        assert_eq!(err.pending(), Some(Pending::NeedsFlush));
        assert_eq!(session.state(), SessionState::Handshaking);
        assert_eq!(session.take_outgoing(100), b"hello".to_vec());
    }

    #[test]
    fn test_would_block_without_output_needs_input() {
        let mut session = scripted(vec![(Vec::new(), EngineStatus::WouldBlock)]);
        let err = session.handshake().unwrap_err();
        assert_eq!(err.pending(), Some(Pending::NeedsInput));
    }

    #[test]
    fn test_bounded_egress_reports_full() {
        let mut session = scripted(vec![(vec![0u8; 10], EngineStatus::WouldBlock)]);
        session.set_egress_limit(Some(4));
        let err = session.handshake().unwrap_err();
        assert_eq!(err.pending(), Some(Pending::EgressFull));
        assert_eq!(session.pending_outgoing(), 4);
    }

    #[test]
    fn test_handshake_idempotent_once_established() {
        let mut session = established();
        session.receive_from_network(b"untouched");

        session.handshake().unwrap();
        assert_eq!(session.state(), SessionState::Established);
        assert_eq!(session.pending_incoming(), 9);
        assert_eq!(session.pending_outgoing(), 0);
    }

    #[test]
    fn test_read_write_before_handshake_is_usage_error() {
        let mut session = scripted(Vec::new());
        assert!(matches!(
            session.read(5),
            Err(TlsError::Usage {
                state: SessionState::Idle,
                ..
            })
        ));
        assert!(matches!(session.write(b"x"), Err(TlsError::Usage { .. })));

        let _ = session.handshake();
        assert_eq!(session.state(), SessionState::Handshaking);
        let err = session.read(5).unwrap_err();
        assert!(!err.is_would_block());
        assert!(matches!(err, TlsError::Usage { .. }));
    }

    #[test]
    fn test_fault_is_sticky() {
        let mut session = scripted(vec![(Vec::new(), fatal(FatalCode::BadCertificate))]);
        let first = session.handshake().unwrap_err();
        assert_eq!(session.state(), SessionState::Faulted);

        for err in [
            session.handshake().unwrap_err(),
            session.read(1).unwrap_err(),
            session.write(b"x").unwrap_err(),
            session.shutdown().unwrap_err(),
        ] {
            assert_eq!(err.to_string(), first.to_string());
            match err {
                TlsError::Protocol(e) => assert_eq!(e.code(), FatalCode::BadCertificate),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_abort_faults_and_sticks() {
        let mut session = scripted(Vec::new());
        let _ = session.handshake();
        assert_eq!(session.state(), SessionState::Handshaking);

        let err = session.abort(ProtocolError::new(FatalCode::PeerAbort, "transport ended"));
        assert!(matches!(&err, TlsError::Protocol(e) if e.code() == FatalCode::PeerAbort));
        assert_eq!(session.state(), SessionState::Faulted);

        // The first fault wins
        let again = session.abort(ProtocolError::new(FatalCode::Internal, "later"));
        assert_eq!(again.to_string(), err.to_string());
        assert_eq!(session.handshake().unwrap_err().to_string(), err.to_string());
    }

    #[test]
    fn test_zero_length_read_is_not_closure() {
        let mut session = established();
        assert!(session.read(0).unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Established);
        assert!(!session.is_peer_closed());
    }

    #[test]
    fn test_peer_close_reads_empty() {
        let mut session = scripted(vec![
            (Vec::new(), EngineStatus::Ready(0)),
            (Vec::new(), EngineStatus::ClosedGraceful),
        ]);
        session.handshake().unwrap();

        assert!(session.read(10).unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.is_peer_closed());
        // End-of-stream is sticky
        assert!(session.read(10).unwrap().is_empty());
        assert!(matches!(session.write(b"x"), Err(TlsError::PeerClosed)));
    }

    #[test]
    fn test_shutdown_paths() {
        let mut idle = scripted(Vec::new());
        idle.shutdown().unwrap();
        assert_eq!(idle.state(), SessionState::Closed);
        assert_eq!(idle.pending_outgoing(), 0);
        idle.shutdown().unwrap();
        assert!(matches!(idle.read(1), Err(TlsError::Usage { .. })));

        let mut session = scripted(vec![
            (Vec::new(), EngineStatus::Ready(0)),
            (b"alert".to_vec(), EngineStatus::Ready(0)),
        ]);
        session.handshake().unwrap();
        session.shutdown().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.take_outgoing(64), b"alert".to_vec());
        assert!(matches!(session.handshake(), Err(TlsError::Usage { .. })));
    }

    #[test]
    fn test_set_peer_name_only_when_idle() {
        let mut session = established();
        assert!(matches!(
            session.set_peer_name("example.com"),
            Err(TlsError::Usage { operation: "set_peer_name", .. })
        ));
    }

    #[test]
    fn test_write_counts_and_stats() {
        let mut session = scripted(vec![
            (Vec::new(), EngineStatus::Ready(0)),
            (b"ciphertext".to_vec(), EngineStatus::Ready(4)),
        ]);
        session.handshake().unwrap();
        assert_eq!(session.write(b"ping").unwrap(), 4);
        assert_eq!(session.consume_outgoing(3), 3);
        assert_eq!(session.peek_outgoing(100), b"hertext");

        let stats = session.stats();
        assert_eq!(stats.handshakes, 1);
        assert_eq!(stats.cleartext_written, 4);
        assert_eq!(stats.ciphertext_sent, 3);
    }

    // End-to-end through the rustls engine, pumping bytes by hand

    fn pair() -> (TlsBuffer, TlsBuffer) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let certificate = Certificate::from_buffer(cert.pem().as_bytes()).unwrap();
        let key = PrivateKey::from_buffer(key_pair.serialize_pem().as_bytes(), None).unwrap();

        let server_config = TlsConfiguration::default()
            .with_certificate_chain(Some(CertificateChain::new(vec![certificate.clone()], key).unwrap()));
        let client_config = TlsConfiguration::default()
            .with_trust_store(Some(TrustStore::from_certificates(vec![certificate])));

        let server = ServerContext::new(server_config).unwrap().wrap_buffers().unwrap();
        let client = ClientContext::new(client_config)
            .unwrap()
            .wrap_buffers(Some("localhost"))
            .unwrap();
        (client, server)
    }

    fn shuttle(from: &mut TlsBuffer, to: &mut TlsBuffer) {
        let bytes = from.take_outgoing(usize::MAX);
        to.receive_from_network(&bytes);
    }

    fn handshake_pair(client: &mut TlsBuffer, server: &mut TlsBuffer) {
        for _ in 0..10 {
            let c = client.handshake();
            shuttle(client, server);
            let s = server.handshake();
            shuttle(server, client);
            if c.is_ok() && s.is_ok() {
                return;
            }
        }
        panic!("handshake did not converge");
    }

    #[test]
    fn test_rustls_pair_exchange() {
        let (mut client, mut server) = pair();
        assert!(client.handshake().unwrap_err().is_want_write());

        handshake_pair(&mut client, &mut server);
        assert_eq!(client.negotiated_version(), Some(TlsVersion::TLSv1_3));
        assert!(client.cipher().is_some());

        assert_eq!(client.write(b"ping").unwrap(), 4);
        assert!(client.pending_outgoing() > 4);
        shuttle(&mut client, &mut server);
        assert_eq!(server.read(4).unwrap(), b"ping".to_vec());

        // Nothing more to read: a retry signal, not an empty read
        assert!(server.read(4).unwrap_err().is_want_read());
    }

    #[test]
    fn test_rustls_graceful_close() {
        let (mut client, mut server) = pair();
        handshake_pair(&mut client, &mut server);

        client.shutdown().unwrap();
        assert_eq!(client.state(), SessionState::Closed);
        shuttle(&mut client, &mut server);

        assert!(server.read(16).unwrap().is_empty());
        assert_eq!(server.state(), SessionState::Closed);
        assert!(server.is_peer_closed());
    }

    #[test]
    fn test_rustls_create_engine_datagram() {
        let context = ClientContext::new(TlsConfiguration::default()).unwrap();
        assert!(context.create_engine(ConnectionKind::Datagram).is_err());
    }
}
