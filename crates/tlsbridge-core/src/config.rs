//! Immutable TLS configuration and certificate material.
//!
//! A [`TlsConfiguration`] is never mutated after construction. Every `with_*`
//! method borrows the receiver and returns an updated copy, so a context can
//! hand its configuration to a server-name callback without risk of it being
//! changed underneath it.

use crate::error::ConfigError;
use rustls::RootCertStore;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Supported protocol versions, ordered from oldest to newest.
///
/// `MinimumSupported` and `MaximumSupported` stand for whatever the engine
/// implements at either end of its range.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// Oldest version the engine implements
    MinimumSupported,
    /// SSL 2.0
    SSLv2,
    /// SSL 3.0
    SSLv3,
    /// TLS 1.0
    TLSv1,
    /// TLS 1.1
    TLSv1_1,
    /// TLS 1.2
    TLSv1_2,
    /// TLS 1.3
    TLSv1_3,
    /// Newest version the engine implements
    MaximumSupported,
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MinimumSupported => "minimum",
            Self::SSLv2 => "SSLv2",
            Self::SSLv3 => "SSLv3",
            Self::TLSv1 => "TLSv1",
            Self::TLSv1_1 => "TLSv1.1",
            Self::TLSv1_2 => "TLSv1.2",
            Self::TLSv1_3 => "TLSv1.3",
            Self::MaximumSupported => "maximum",
        };
        f.write_str(text)
    }
}

impl FromStr for TlsVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', ".");
        match normalized.as_str() {
            "minimum" | "min" => Ok(Self::MinimumSupported),
            "sslv2" => Ok(Self::SSLv2),
            "sslv3" => Ok(Self::SSLv3),
            "tlsv1" | "tlsv1.0" | "1.0" => Ok(Self::TLSv1),
            "tlsv1.1" | "1.1" => Ok(Self::TLSv1_1),
            "tlsv1.2" | "1.2" => Ok(Self::TLSv1_2),
            "tlsv1.3" | "1.3" => Ok(Self::TLSv1_3),
            "maximum" | "max" => Ok(Self::MaximumSupported),
            _ => Err(ConfigError::Parse {
                kind: "TLS version",
                value: s.to_string(),
            }),
        }
    }
}

/// Cipher suite identified by its IANA code point.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    /// TLS 1.3 AES-128-GCM with SHA-256
    pub const TLS_AES_128_GCM_SHA256: Self = Self(0x1301);
    /// TLS 1.3 AES-256-GCM with SHA-384
    pub const TLS_AES_256_GCM_SHA384: Self = Self(0x1302);
    /// TLS 1.3 ChaCha20-Poly1305 with SHA-256
    pub const TLS_CHACHA20_POLY1305_SHA256: Self = Self(0x1303);
    /// TLS 1.2 ECDHE-ECDSA AES-128-GCM
    pub const TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02B);
    /// TLS 1.2 ECDHE-ECDSA AES-256-GCM
    pub const TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384: Self = Self(0xC02C);
    /// TLS 1.2 ECDHE-RSA AES-128-GCM
    pub const TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02F);
    /// TLS 1.2 ECDHE-RSA AES-256-GCM
    pub const TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384: Self = Self(0xC030);
    /// TLS 1.2 ECDHE-RSA ChaCha20-Poly1305
    pub const TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256: Self = Self(0xCCA8);
    /// TLS 1.2 ECDHE-ECDSA ChaCha20-Poly1305
    pub const TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256: Self = Self(0xCCA9);
    /// Legacy static-RSA CBC suite
    pub const TLS_RSA_WITH_AES_128_CBC_SHA: Self = Self(0x002F);

    const NAMED: [(Self, &'static str); 10] = [
        (Self::TLS_AES_128_GCM_SHA256, "TLS_AES_128_GCM_SHA256"),
        (Self::TLS_AES_256_GCM_SHA384, "TLS_AES_256_GCM_SHA384"),
        (Self::TLS_CHACHA20_POLY1305_SHA256, "TLS_CHACHA20_POLY1305_SHA256"),
        (
            Self::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        ),
        (
            Self::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        ),
        (
            Self::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        ),
        (
            Self::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        ),
        (
            Self::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        ),
        (
            Self::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        ),
        (Self::TLS_RSA_WITH_AES_128_CBC_SHA, "TLS_RSA_WITH_AES_128_CBC_SHA"),
    ];

    /// Default priority list: AEAD suites only, TLS 1.3 first
    pub const DEFAULT: [Self; 9] = [
        Self::TLS_AES_256_GCM_SHA384,
        Self::TLS_CHACHA20_POLY1305_SHA256,
        Self::TLS_AES_128_GCM_SHA256,
        Self::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        Self::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        Self::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        Self::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        Self::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        Self::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ];

    /// IANA code point
    #[must_use]
    pub fn id(self) -> u16 {
        self.0
    }

    /// IANA name, if the suite is one of the named constants
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(suite, _)| *suite == self)
            .map(|(_, name)| *name)
    }
}

impl fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherSuite({self})")
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:04X}", self.0),
        }
    }
}

impl FromStr for CipherSuite {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u16::from_str_radix(hex, 16).map(Self).map_err(|_| ConfigError::Parse {
                kind: "cipher suite",
                value: s.to_string(),
            });
        }
        Self::NAMED
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(suite, _)| *suite)
            .ok_or_else(|| ConfigError::Parse {
                kind: "cipher suite",
                value: s.to_string(),
            })
    }
}

/// Application protocols negotiable through ALPN
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NextProtocol {
    /// HTTP/2 over TLS
    H2,
    /// HTTP/2 over cleartext
    H2C,
    /// HTTP/1.1
    Http1,
    /// WebRTC media and data
    WebRtc,
    /// Confidential WebRTC
    CWebRtc,
    /// FTP
    Ftp,
    /// STUN NAT discovery
    Stun,
    /// TURN relaying
    Turn,
    /// Any other registered or private identifier
    Other(Vec<u8>),
}

impl NextProtocol {
    /// Wire identifier
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::H2 => b"h2",
            Self::H2C => b"h2c",
            Self::Http1 => b"http/1.1",
            Self::WebRtc => b"webrtc",
            Self::CWebRtc => b"c-webrtc",
            Self::Ftp => b"ftp",
            Self::Stun => b"stun.nat-discovery",
            Self::Turn => b"stun.turn",
            Self::Other(bytes) => bytes,
        }
    }

    /// Map a wire identifier back to a known protocol, or `Other`
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match bytes {
            b"h2" => Self::H2,
            b"h2c" => Self::H2C,
            b"http/1.1" => Self::Http1,
            b"webrtc" => Self::WebRtc,
            b"c-webrtc" => Self::CWebRtc,
            b"ftp" => Self::Ftp,
            b"stun.nat-discovery" => Self::Stun,
            b"stun.turn" => Self::Turn,
            other => Self::Other(other.to_vec()),
        }
    }
}

impl fmt::Display for NextProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl FromStr for NextProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ALPN identifiers are 1..=255 bytes on the wire
        if s.is_empty() || s.len() > 255 {
            return Err(ConfigError::Parse {
                kind: "ALPN protocol",
                value: s.to_string(),
            });
        }
        Ok(Self::from_bytes(s.as_bytes()))
    }
}

fn is_pem(buf: &[u8]) -> bool {
    buf.trim_ascii_start().starts_with(b"-----BEGIN")
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Single X.509 certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: CertificateDer<'static>,
}

impl Certificate {
    /// Parse one certificate, PEM if the buffer carries a PEM preamble and
    /// DER otherwise. For PEM input the first certificate block is used.
    pub fn from_buffer(buf: &[u8]) -> Result<Self, ConfigError> {
        if is_pem(buf) {
            let der = CertificateDer::from_pem_slice(buf)
                .map_err(|e| ConfigError::InvalidCertificate(e.to_string()))?;
            Ok(Self { der })
        } else if buf.is_empty() {
            Err(ConfigError::InvalidCertificate("empty buffer".into()))
        } else {
            Ok(Self::from_der(buf.to_vec()))
        }
    }

    /// Load one certificate from a PEM or DER file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_buffer(&read_file(path.as_ref())?)
    }

    /// Parse every certificate of a PEM bundle, in file order
    pub fn chain_from_buffer(buf: &[u8]) -> Result<Vec<Self>, ConfigError> {
        if !is_pem(buf) {
            return Ok(vec![Self::from_buffer(buf)?]);
        }
        let chain = CertificateDer::pem_slice_iter(buf)
            .map(|der| der.map(|der| Self { der }))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::InvalidCertificate(e.to_string()))?;
        if chain.is_empty() {
            return Err(ConfigError::InvalidCertificate(
                "no certificates found in PEM data".into(),
            ));
        }
        Ok(chain)
    }

    /// Load every certificate of a PEM bundle file
    pub fn chain_from_file(path: impl AsRef<Path>) -> Result<Vec<Self>, ConfigError> {
        Self::chain_from_buffer(&read_file(path.as_ref())?)
    }

    /// Wrap raw DER bytes without parsing them
    #[must_use]
    pub fn from_der(der: Vec<u8>) -> Self {
        Self {
            der: CertificateDer::from(der),
        }
    }

    /// DER encoding
    #[must_use]
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }
}

/// Private key matching a certificate's public key
pub struct PrivateKey {
    der: PrivateKeyDer<'static>,
}

impl PrivateKey {
    /// Parse a private key, PEM if the buffer carries a PEM preamble and DER
    /// otherwise.
    ///
    /// Password-protected keys are refused with [`ConfigError::EncryptedKey`];
    /// a password supplied for a plain key is ignored.
    pub fn from_buffer(buf: &[u8], password: Option<&[u8]>) -> Result<Self, ConfigError> {
        if is_pem(buf) {
            if contains(buf, b"ENCRYPTED") {
                return Err(ConfigError::EncryptedKey);
            }
            let der = PrivateKeyDer::from_pem_slice(buf)
                .map_err(|e| ConfigError::InvalidPrivateKey(e.to_string()))?;
            return Ok(Self { der });
        }

        match PrivateKeyDer::try_from(buf) {
            Ok(der) => Ok(Self {
                der: der.clone_key(),
            }),
            // PKCS#8 EncryptedPrivateKeyInfo does not parse as any plain key type
            Err(_) if password.is_some() => Err(ConfigError::EncryptedKey),
            Err(reason) => Err(ConfigError::InvalidPrivateKey(reason.to_string())),
        }
    }

    /// Load a private key from a PEM or DER file
    pub fn from_file(path: impl AsRef<Path>, password: Option<&[u8]>) -> Result<Self, ConfigError> {
        Self::from_buffer(&read_file(path.as_ref())?, password)
    }

    /// DER encoding
    #[must_use]
    pub fn der(&self) -> &PrivateKeyDer<'static> {
        &self.der
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            der: self.der.clone_key(),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey").finish_non_exhaustive()
    }
}

/// Leaf certificate, intermediates and the leaf's private key
#[derive(Debug, Clone)]
pub struct CertificateChain {
    certificates: Vec<Certificate>,
    private_key: PrivateKey,
}

impl CertificateChain {
    /// Build a chain. `certificates` must start with the leaf.
    pub fn new(certificates: Vec<Certificate>, private_key: PrivateKey) -> Result<Self, ConfigError> {
        if certificates.is_empty() {
            return Err(ConfigError::InvalidCertificate(
                "certificate chain is empty".into(),
            ));
        }
        Ok(Self {
            certificates,
            private_key,
        })
    }

    /// Load a PEM chain file and a key file
    pub fn from_files(
        chain: impl AsRef<Path>,
        key: impl AsRef<Path>,
        password: Option<&[u8]>,
    ) -> Result<Self, ConfigError> {
        Self::new(
            Certificate::chain_from_file(chain)?,
            PrivateKey::from_file(key, password)?,
        )
    }

    /// Leaf first, then intermediates
    #[must_use]
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// The leaf's private key
    #[must_use]
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub(crate) fn der_chain(&self) -> Vec<CertificateDer<'static>> {
        self.certificates.iter().map(|c| c.der().clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TrustSource {
    System,
    Certificates(Vec<Certificate>),
}

/// Set of trust anchors used to validate peer certificates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustStore {
    source: TrustSource,
}

impl TrustStore {
    /// The bundled Mozilla root program
    #[must_use]
    pub fn system() -> Self {
        Self {
            source: TrustSource::System,
        }
    }

    /// Trust exactly the certificates of a PEM bundle file
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::from_certificates(Certificate::chain_from_file(path)?))
    }

    /// Trust exactly the given certificates
    #[must_use]
    pub fn from_certificates(certificates: Vec<Certificate>) -> Self {
        Self {
            source: TrustSource::Certificates(certificates),
        }
    }

    /// Check if this is the bundled root program
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.source == TrustSource::System
    }

    pub(crate) fn root_store(&self) -> Result<RootCertStore, ConfigError> {
        let mut roots = RootCertStore::empty();
        match &self.source {
            TrustSource::System => {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
            TrustSource::Certificates(certificates) => {
                for certificate in certificates {
                    roots
                        .add(certificate.der().clone())
                        .map_err(|e| ConfigError::TrustStore(e.to_string()))?;
                }
            }
        }
        if roots.is_empty() {
            return Err(ConfigError::TrustStore("no trust anchors".into()));
        }
        Ok(roots)
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::system()
    }
}

/// Server-side hook run when a client announces its server name.
///
/// Receives the SNI name (if any) and the context's configuration. Returning
/// `Some` continues the handshake with that configuration's certificate
/// chain; returning `None` aborts it.
pub type ServerNameCallback =
    Arc<dyn Fn(Option<&str>, &TlsConfiguration) -> Option<TlsConfiguration> + Send + Sync>;

/// Immutable TLS settings shared by client and server contexts.
///
/// # Example
///
/// ```
/// use tlsbridge_core::config::{NextProtocol, TlsConfiguration, TlsVersion};
///
/// let base = TlsConfiguration::default();
/// let strict = base
///     .with_lowest_supported_version(TlsVersion::TLSv1_2)
///     .with_inner_protocols(vec![NextProtocol::H2, NextProtocol::Http1]);
///
/// assert_eq!(base.lowest_supported_version(), TlsVersion::TLSv1);
/// assert_eq!(strict.lowest_supported_version(), TlsVersion::TLSv1_2);
/// ```
#[derive(Clone)]
pub struct TlsConfiguration {
    validate_certificates: bool,
    certificate_chain: Option<CertificateChain>,
    ciphers: Vec<CipherSuite>,
    inner_protocols: Vec<NextProtocol>,
    lowest_supported_version: TlsVersion,
    highest_supported_version: TlsVersion,
    trust_store: Option<TrustStore>,
    sni_callback: Option<ServerNameCallback>,
}

impl Default for TlsConfiguration {
    fn default() -> Self {
        Self {
            validate_certificates: true,
            certificate_chain: None,
            ciphers: CipherSuite::DEFAULT.to_vec(),
            inner_protocols: Vec::new(),
            lowest_supported_version: TlsVersion::TLSv1,
            highest_supported_version: TlsVersion::MaximumSupported,
            trust_store: None,
            sni_callback: None,
        }
    }
}

impl TlsConfiguration {
    /// Default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if peer certificates are validated
    #[must_use]
    pub fn validate_certificates(&self) -> bool {
        self.validate_certificates
    }

    /// Certificate chain presented to the peer
    #[must_use]
    pub fn certificate_chain(&self) -> Option<&CertificateChain> {
        self.certificate_chain.as_ref()
    }

    /// Cipher suites in priority order
    #[must_use]
    pub fn ciphers(&self) -> &[CipherSuite] {
        &self.ciphers
    }

    /// ALPN protocols in preference order
    #[must_use]
    pub fn inner_protocols(&self) -> &[NextProtocol] {
        &self.inner_protocols
    }

    /// Lower bound of the version range
    #[must_use]
    pub fn lowest_supported_version(&self) -> TlsVersion {
        self.lowest_supported_version
    }

    /// Upper bound of the version range
    #[must_use]
    pub fn highest_supported_version(&self) -> TlsVersion {
        self.highest_supported_version
    }

    /// Configured trust store, `None` meaning the system store
    #[must_use]
    pub fn trust_store(&self) -> Option<&TrustStore> {
        self.trust_store.as_ref()
    }

    /// Server-name callback
    #[must_use]
    pub fn sni_callback(&self) -> Option<&ServerNameCallback> {
        self.sni_callback.as_ref()
    }

    /// Copy with certificate validation switched on or off
    #[must_use]
    pub fn with_validate_certificates(&self, validate: bool) -> Self {
        Self {
            validate_certificates: validate,
            ..self.clone()
        }
    }

    /// Copy with a different certificate chain
    #[must_use]
    pub fn with_certificate_chain(&self, chain: Option<CertificateChain>) -> Self {
        Self {
            certificate_chain: chain,
            ..self.clone()
        }
    }

    /// Copy with a different cipher priority list
    #[must_use]
    pub fn with_ciphers(&self, ciphers: Vec<CipherSuite>) -> Self {
        Self {
            ciphers,
            ..self.clone()
        }
    }

    /// Copy with a different ALPN list
    #[must_use]
    pub fn with_inner_protocols(&self, protocols: Vec<NextProtocol>) -> Self {
        Self {
            inner_protocols: protocols,
            ..self.clone()
        }
    }

    /// Copy with a different lower version bound
    #[must_use]
    pub fn with_lowest_supported_version(&self, version: TlsVersion) -> Self {
        Self {
            lowest_supported_version: version,
            ..self.clone()
        }
    }

    /// Copy with a different upper version bound
    #[must_use]
    pub fn with_highest_supported_version(&self, version: TlsVersion) -> Self {
        Self {
            highest_supported_version: version,
            ..self.clone()
        }
    }

    /// Copy with a different trust store
    #[must_use]
    pub fn with_trust_store(&self, trust_store: Option<TrustStore>) -> Self {
        Self {
            trust_store,
            ..self.clone()
        }
    }

    /// Copy with a different server-name callback
    #[must_use]
    pub fn with_sni_callback(&self, callback: Option<ServerNameCallback>) -> Self {
        Self {
            sni_callback: callback,
            ..self.clone()
        }
    }
}

impl fmt::Debug for TlsConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfiguration")
            .field("validate_certificates", &self.validate_certificates)
            .field("certificate_chain", &self.certificate_chain.is_some())
            .field("ciphers", &self.ciphers)
            .field("inner_protocols", &self.inner_protocols)
            .field("lowest_supported_version", &self.lowest_supported_version)
            .field("highest_supported_version", &self.highest_supported_version)
            .field("trust_store", &self.trust_store)
            .field("sni_callback", &self.sni_callback.is_some())
            .finish()
    }
}
