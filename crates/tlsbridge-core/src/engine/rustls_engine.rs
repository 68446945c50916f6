//! [`Engine`] implementation backed by rustls.
//!
//! rustls already works on caller-supplied `Read`/`Write` objects
//! (`read_tls` / `write_tls`), so each operation wraps the borrowed callback
//! pair in [`CallbackReader`] / [`CallbackWriter`] and pumps records until the
//! callbacks report would-block.

use super::{ConnectionKind, Engine, EngineState, EngineStatus, Role};
use crate::config::{CipherSuite, NextProtocol, TlsVersion};
use crate::error::{ConfigError, FatalCode, ProtocolError};
use crate::io::{CallbackReader, CallbackWriter, EngineIo};
use rustls::pki_types::ServerName;
use rustls::{
    AlertDescription, CertificateError, ClientConfig, ClientConnection, Connection, Error,
    PeerIncompatible, ProtocolVersion, ServerConfig, ServerConnection,
};
use std::io::{self, Read, Write};
use std::sync::Arc;

/// Server name sent nowhere: clients without a peer name run with SNI
/// disabled and a verifier that skips host-name matching.
const ANONYMOUS_PEER: &str = "localhost";

/// rustls configurations an engine session is created from
#[derive(Debug, Clone)]
pub enum EngineSettings {
    /// Client settings
    Client {
        /// Used when a peer name is set: SNI and host-name matching enabled
        named: Arc<ClientConfig>,
        /// Used without a peer name: SNI disabled, chain validation only
        anonymous: Arc<ClientConfig>,
    },
    /// Server settings
    Server(Arc<ServerConfig>),
}

impl EngineSettings {
    /// Role these settings were built for
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Client { .. } => Role::Client,
            Self::Server(_) => Role::Server,
        }
    }
}

/// rustls engine session.
///
/// The rustls connection is created at the first handshake step, which is
/// what allows the peer name to be set after construction.
#[derive(Debug)]
pub struct RustlsEngine {
    settings: EngineSettings,
    peer_name: Option<ServerName<'static>>,
    connection: Option<Connection>,
    state: EngineState,
    close_sent: bool,
}

impl RustlsEngine {
    /// Create an idle engine session (create-session)
    pub fn new(
        settings: EngineSettings,
        role: Role,
        kind: ConnectionKind,
    ) -> Result<Self, ConfigError> {
        if kind == ConnectionKind::Datagram {
            return Err(ConfigError::UnsupportedConnectionKind("datagram"));
        }
        if settings.role() != role {
            return Err(ConfigError::RoleMismatch(role));
        }
        Ok(Self {
            settings,
            peer_name: None,
            connection: None,
            state: EngineState::Idle,
            close_sent: false,
        })
    }

    fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.connection.is_some() {
            return Ok(());
        }
        let connection = match &self.settings {
            EngineSettings::Client { named, anonymous } => {
                let conn = match &self.peer_name {
                    Some(name) => ClientConnection::new(Arc::clone(named), name.clone()),
                    None => {
                        let placeholder = ServerName::try_from(ANONYMOUS_PEER)
                            .map_err(|e| ProtocolError::new(FatalCode::Internal, e.to_string()))?;
                        ClientConnection::new(Arc::clone(anonymous), placeholder)
                    }
                };
                Connection::Client(conn.map_err(|e| map_error(&e))?)
            }
            EngineSettings::Server(config) => Connection::Server(
                ServerConnection::new(Arc::clone(config)).map_err(|e| map_error(&e))?,
            ),
        };
        self.connection = Some(connection);
        Ok(())
    }

    /// Fold a terminal status into the session state
    fn settle<T>(&mut self, status: EngineStatus<T>) -> EngineStatus<T> {
        match &status {
            EngineStatus::Fatal(err) => {
                tracing::debug!(code = ?err.code(), "engine session aborted");
                self.state = EngineState::Aborted;
            }
            EngineStatus::ClosedGraceful => self.state = EngineState::Closed,
            EngineStatus::Ready(_) | EngineStatus::WouldBlock => {}
        }
        status
    }

    fn unavailable<T>(&self, operation: &str) -> EngineStatus<T> {
        EngineStatus::Fatal(ProtocolError::new(
            FatalCode::Internal,
            format!("{operation} before handshake"),
        ))
    }
}

/// Move queued records into the write callback.
///
/// Returns `Ok(false)` when the callback stopped accepting bytes.
fn pump_out(conn: &mut Connection, io: &mut dyn EngineIo) -> io::Result<bool> {
    while conn.wants_write() {
        match conn.write_tls(&mut CallbackWriter(&mut *io)) {
            Ok(0) => return Ok(false),
            Ok(n) => tracing::trace!(bytes = n, "engine emitted ciphertext"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn io_fault<T>(err: &io::Error) -> EngineStatus<T> {
    EngineStatus::Fatal(ProtocolError::new(FatalCode::Internal, err.to_string()))
}

/// Decrypt newly received records. On failure the alert rustls queued is
/// pushed out before the error is reported.
fn process(conn: &mut Connection, io: &mut dyn EngineIo) -> Result<(), ProtocolError> {
    match conn.process_new_packets() {
        Ok(_) => Ok(()),
        Err(err) => {
            let _ = pump_out(conn, io);
            Err(map_error(&err))
        }
    }
}

fn drive_handshake(conn: &mut Connection, io: &mut dyn EngineIo) -> EngineStatus<()> {
    loop {
        match pump_out(conn, io) {
            Ok(true) => {}
            Ok(false) => return EngineStatus::WouldBlock,
            Err(e) => return io_fault(&e),
        }
        if !conn.is_handshaking() {
            return EngineStatus::Ready(());
        }

        match conn.read_tls(&mut CallbackReader(&mut *io)) {
            Ok(0) => {
                return EngineStatus::Fatal(ProtocolError::new(
                    FatalCode::PeerAbort,
                    "connection closed during handshake",
                ));
            }
            Ok(_) => {
                if let Err(err) = process(conn, io) {
                    return EngineStatus::Fatal(err);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return EngineStatus::WouldBlock,
            Err(e) => return io_fault(&e),
        }
    }
}

fn drive_read(conn: &mut Connection, io: &mut dyn EngineIo, buf: &mut [u8]) -> EngineStatus<usize> {
    loop {
        match conn.reader().read(buf) {
            Ok(0) => return EngineStatus::ClosedGraceful,
            Ok(n) => {
                // Key updates answered while reading
                if let Err(e) = pump_out(conn, io) {
                    return io_fault(&e);
                }
                return EngineStatus::Ready(n);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return EngineStatus::Fatal(ProtocolError::new(
                    FatalCode::PeerAbort,
                    "peer closed connection without sending close_notify",
                ));
            }
            Err(e) => return io_fault(&e),
        }

        if let Err(e) = pump_out(conn, io) {
            return io_fault(&e);
        }

        match conn.read_tls(&mut CallbackReader(&mut *io)) {
            // A zero-length read records EOF; the reader reports it next round
            Ok(_) => {
                if let Err(err) = process(conn, io) {
                    return EngineStatus::Fatal(err);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return EngineStatus::WouldBlock,
            Err(e) => return io_fault(&e),
        }
    }
}

fn drive_write(conn: &mut Connection, io: &mut dyn EngineIo, data: &[u8]) -> EngineStatus<usize> {
    // Make room in the engine's own record buffer first
    if let Err(e) = pump_out(conn, io) {
        return io_fault(&e);
    }

    let accepted = match conn.writer().write(data) {
        Ok(n) => n,
        Err(e) => return io_fault(&e),
    };

    if let Err(e) = pump_out(conn, io) {
        return io_fault(&e);
    }

    if accepted == 0 {
        EngineStatus::WouldBlock
    } else {
        EngineStatus::Ready(accepted)
    }
}

impl Engine for RustlsEngine {
    fn set_peer_name(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.connection.is_some() {
            return Err(ConfigError::InvalidPeerName(format!(
                "{name}: handshake already started"
            )));
        }
        let parsed = ServerName::try_from(name.to_owned())
            .map_err(|_| ConfigError::InvalidPeerName(name.to_owned()))?;
        self.peer_name = Some(parsed);
        Ok(())
    }

    fn handshake_step(&mut self, io: &mut dyn EngineIo) -> EngineStatus<()> {
        match self.state {
            EngineState::Connected => return EngineStatus::Ready(()),
            EngineState::Closed => return EngineStatus::ClosedGraceful,
            EngineState::Aborted => {
                return EngineStatus::Fatal(ProtocolError::new(
                    FatalCode::Internal,
                    "engine session aborted",
                ));
            }
            EngineState::Idle | EngineState::Handshake => {}
        }

        if let Err(err) = self.connect() {
            return self.settle(EngineStatus::Fatal(err));
        }
        self.state = EngineState::Handshake;

        let Some(conn) = self.connection.as_mut() else {
            return self.unavailable("handshake");
        };
        let status = drive_handshake(conn, io);
        if status.is_ready() {
            self.state = EngineState::Connected;
        }
        self.settle(status)
    }

    fn read_cleartext(&mut self, io: &mut dyn EngineIo, buf: &mut [u8]) -> EngineStatus<usize> {
        if self.state == EngineState::Closed {
            return EngineStatus::ClosedGraceful;
        }
        if buf.is_empty() {
            return EngineStatus::Ready(0);
        }
        let Some(conn) = self.connection.as_mut() else {
            return self.unavailable("read");
        };
        let status = drive_read(conn, io, buf);
        self.settle(status)
    }

    fn write_cleartext(&mut self, io: &mut dyn EngineIo, data: &[u8]) -> EngineStatus<usize> {
        if self.state == EngineState::Closed {
            return EngineStatus::ClosedGraceful;
        }
        if data.is_empty() {
            return EngineStatus::Ready(0);
        }
        let Some(conn) = self.connection.as_mut() else {
            return self.unavailable("write");
        };
        let status = drive_write(conn, io, data);
        self.settle(status)
    }

    fn close(&mut self, io: &mut dyn EngineIo) -> EngineStatus<()> {
        let Some(conn) = self.connection.as_mut() else {
            self.state = EngineState::Closed;
            return EngineStatus::Ready(());
        };

        if !self.close_sent {
            conn.send_close_notify();
            self.close_sent = true;
        }

        let status = match pump_out(conn, io) {
            Ok(true) => EngineStatus::Ready(()),
            Ok(false) => EngineStatus::WouldBlock,
            Err(e) => io_fault(&e),
        };
        if status.is_ready() && self.state != EngineState::Aborted {
            self.state = EngineState::Closed;
        }
        self.settle(status)
    }

    fn flush(&mut self, io: &mut dyn EngineIo) -> EngineStatus<()> {
        let Some(conn) = self.connection.as_mut() else {
            return EngineStatus::Ready(());
        };
        let status = match pump_out(conn, io) {
            Ok(true) => EngineStatus::Ready(()),
            Ok(false) => EngineStatus::WouldBlock,
            Err(e) => io_fault(&e),
        };
        self.settle(status)
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn cipher_suite(&self) -> Option<CipherSuite> {
        let suite = self.connection.as_ref()?.negotiated_cipher_suite()?;
        Some(CipherSuite(u16::from(suite.suite())))
    }

    fn negotiated_protocol(&self) -> Option<NextProtocol> {
        self.connection
            .as_ref()?
            .alpn_protocol()
            .map(NextProtocol::from_bytes)
    }

    fn negotiated_version(&self) -> Option<TlsVersion> {
        match self.connection.as_ref()?.protocol_version()? {
            ProtocolVersion::SSLv2 => Some(TlsVersion::SSLv2),
            ProtocolVersion::SSLv3 => Some(TlsVersion::SSLv3),
            ProtocolVersion::TLSv1_0 => Some(TlsVersion::TLSv1),
            ProtocolVersion::TLSv1_1 => Some(TlsVersion::TLSv1_1),
            ProtocolVersion::TLSv1_2 => Some(TlsVersion::TLSv1_2),
            ProtocolVersion::TLSv1_3 => Some(TlsVersion::TLSv1_3),
            _ => None,
        }
    }
}

/// Map a rustls error onto the closed fatal-code set
pub(crate) fn map_error(err: &Error) -> ProtocolError {
    let code = match err {
        Error::InvalidCertificate(cert) => match cert {
            CertificateError::Expired
            | CertificateError::ExpiredContext { .. }
            | CertificateError::NotValidYet
            | CertificateError::NotValidYetContext { .. } => FatalCode::CertificateExpired,
            CertificateError::UnknownIssuer => FatalCode::UnknownIssuer,
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. } => {
                FatalCode::HostNameMismatch
            }
            _ => FatalCode::BadCertificate,
        },
        Error::AlertReceived(alert) => match alert {
            AlertDescription::HandshakeFailure | AlertDescription::InsufficientSecurity => {
                FatalCode::HandshakeFailure
            }
            AlertDescription::ProtocolVersion => FatalCode::UnsupportedVersion,
            AlertDescription::BadCertificate
            | AlertDescription::UnsupportedCertificate
            | AlertDescription::CertificateRevoked
            | AlertDescription::CertificateUnknown => FatalCode::BadCertificate,
            AlertDescription::CertificateExpired => FatalCode::CertificateExpired,
            AlertDescription::UnknownCA => FatalCode::UnknownIssuer,
            AlertDescription::NoApplicationProtocol => FatalCode::NoApplicationProtocol,
            AlertDescription::DecryptError | AlertDescription::BadRecordMac => FatalCode::Decrypt,
            _ => FatalCode::FatalAlert,
        },
        Error::PeerIncompatible(
            PeerIncompatible::ServerDoesNotSupportTls12Or13
            | PeerIncompatible::ServerTlsVersionIsDisabledByOurConfig
            | PeerIncompatible::Tls12NotOffered
            | PeerIncompatible::Tls12NotOfferedOrEnabled
            | PeerIncompatible::SupportedVersionsExtensionRequired,
        ) => FatalCode::UnsupportedVersion,
        Error::PeerIncompatible(_) => FatalCode::HandshakeFailure,
        Error::NoApplicationProtocol => FatalCode::NoApplicationProtocol,
        Error::DecryptError => FatalCode::Decrypt,
        Error::InappropriateMessage { .. }
        | Error::InappropriateHandshakeMessage { .. }
        | Error::InvalidMessage(_)
        | Error::PeerMisbehaved(_)
        | Error::PeerSentOversizedRecord => FatalCode::Protocol,
        Error::NoCertificatesPresented => FatalCode::BadCertificate,
        _ => FatalCode::Internal,
    };
    ProtocolError::new(code, err.to_string())
}
