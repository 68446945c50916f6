//! Client and server contexts.
//!
//! A context translates one [`TlsConfiguration`] into engine settings once and
//! then stamps out sessions from them. Invalid combinations are reported here,
//! before any session exists.

use crate::config::{CertificateChain, ServerNameCallback, TlsConfiguration, TlsVersion};
use crate::engine::verify::{AnyNameVerifier, NoVerifier};
use crate::engine::{ConnectionKind, Engine, EngineSettings, Role, RustlsEngine};
use crate::error::{ConfigError, Result};
use crate::session::TlsBuffer;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::ServerCertVerifier;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug)]
struct ContextInner {
    role: Role,
    configuration: TlsConfiguration,
    settings: EngineSettings,
}

/// Role-independent view of a client or server context
#[derive(Debug, Clone)]
pub struct TlsContext {
    inner: Arc<ContextInner>,
}

impl TlsContext {
    /// Configuration the context was created from
    #[must_use]
    pub fn configuration(&self) -> &TlsConfiguration {
        &self.inner.configuration
    }

    /// Side of the connection sessions of this context play
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Create an idle engine session
    pub fn create_engine(&self, kind: ConnectionKind) -> Result<Box<dyn Engine>> {
        let engine = RustlsEngine::new(self.inner.settings.clone(), self.inner.role, kind)?;
        Ok(Box::new(engine))
    }
}

/// Context for the connecting side
#[derive(Debug, Clone)]
pub struct ClientContext(TlsContext);

impl ClientContext {
    /// Validate `configuration` and build client engine settings
    pub fn new(configuration: TlsConfiguration) -> std::result::Result<Self, ConfigError> {
        let settings = client_settings(&configuration)?;
        tracing::debug!(
            validate = configuration.validate_certificates(),
            ciphers = configuration.ciphers().len(),
            "client context ready"
        );
        Ok(Self(TlsContext {
            inner: Arc::new(ContextInner {
                role: Role::Client,
                configuration,
                settings,
            }),
        }))
    }

    /// Create a buffer-only session.
    ///
    /// `server_hostname` enables SNI and host-name matching. Without it the
    /// certificate chain is still validated (unless validation is disabled)
    /// but any name is accepted.
    pub fn wrap_buffers(&self, server_hostname: Option<&str>) -> Result<TlsBuffer> {
        let mut buffer = TlsBuffer::new(self.0.clone(), self.0.create_engine(ConnectionKind::Stream)?);
        if let Some(name) = server_hostname {
            buffer.set_peer_name(name)?;
        }
        Ok(buffer)
    }
}

impl Deref for ClientContext {
    type Target = TlsContext;

    fn deref(&self) -> &TlsContext {
        &self.0
    }
}

impl From<ClientContext> for TlsContext {
    fn from(context: ClientContext) -> Self {
        context.0
    }
}

/// Context for the accepting side
#[derive(Debug, Clone)]
pub struct ServerContext(TlsContext);

impl ServerContext {
    /// Validate `configuration` and build server engine settings.
    ///
    /// The configuration must carry a certificate chain or a server-name
    /// callback.
    pub fn new(configuration: TlsConfiguration) -> std::result::Result<Self, ConfigError> {
        let settings = server_settings(&configuration)?;
        tracing::debug!(
            sni_callback = configuration.sni_callback().is_some(),
            ciphers = configuration.ciphers().len(),
            "server context ready"
        );
        Ok(Self(TlsContext {
            inner: Arc::new(ContextInner {
                role: Role::Server,
                configuration,
                settings,
            }),
        }))
    }

    /// Create a buffer-only session
    pub fn wrap_buffers(&self) -> Result<TlsBuffer> {
        Ok(TlsBuffer::new(
            self.0.clone(),
            self.0.create_engine(ConnectionKind::Stream)?,
        ))
    }
}

impl Deref for ServerContext {
    type Target = TlsContext;

    fn deref(&self) -> &TlsContext {
        &self.0
    }
}

impl From<ServerContext> for TlsContext {
    fn from(context: ServerContext) -> Self {
        context.0
    }
}

/// Crypto provider restricted to the configured cipher suites, in priority order
fn provider(configuration: &TlsConfiguration) -> std::result::Result<Arc<CryptoProvider>, ConfigError> {
    let mut provider = rustls::crypto::ring::default_provider();
    let available = std::mem::take(&mut provider.cipher_suites);

    let mut selected: Vec<SupportedCipherSuite> = Vec::new();
    for wanted in configuration.ciphers() {
        let found = available
            .iter()
            .find(|suite| u16::from(suite.suite()) == wanted.id());
        match found {
            Some(suite) if !selected.iter().any(|s| s.suite() == suite.suite()) => {
                selected.push(*suite);
            }
            Some(_) => {}
            None => tracing::debug!(suite = %wanted, "cipher suite not implemented, skipped"),
        }
    }
    if selected.is_empty() {
        return Err(ConfigError::NoUsableCiphers);
    }

    provider.cipher_suites = selected;
    Ok(Arc::new(provider))
}

/// Engine versions inside the configured range
fn protocol_versions(
    configuration: &TlsConfiguration,
) -> std::result::Result<Vec<&'static SupportedProtocolVersion>, ConfigError> {
    let lowest = configuration.lowest_supported_version();
    let highest = configuration.highest_supported_version();

    let versions: Vec<_> = [
        (TlsVersion::TLSv1_2, &rustls::version::TLS12),
        (TlsVersion::TLSv1_3, &rustls::version::TLS13),
    ]
    .into_iter()
    .filter(|(version, _)| lowest <= *version && *version <= highest)
    .map(|(_, supported)| supported)
    .collect();

    if versions.is_empty() {
        return Err(ConfigError::VersionRange { lowest, highest });
    }
    Ok(versions)
}

fn alpn(configuration: &TlsConfiguration) -> Vec<Vec<u8>> {
    configuration
        .inner_protocols()
        .iter()
        .map(|protocol| protocol.as_bytes().to_vec())
        .collect()
}

fn client_settings(configuration: &TlsConfiguration) -> std::result::Result<EngineSettings, ConfigError> {
    let provider = provider(configuration)?;
    let versions = protocol_versions(configuration)?;

    let named: Arc<dyn ServerCertVerifier>;
    let anonymous: Arc<dyn ServerCertVerifier>;
    if configuration.validate_certificates() {
        let roots = configuration
            .trust_store()
            .cloned()
            .unwrap_or_default()
            .root_store()?;
        let webpki =
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()
                .map_err(|e| ConfigError::TrustStore(e.to_string()))?;
        anonymous = Arc::new(AnyNameVerifier::new(Arc::clone(&webpki)));
        named = webpki;
    } else {
        named = Arc::new(NoVerifier::new(provider.signature_verification_algorithms));
        anonymous = Arc::clone(&named);
    }

    Ok(EngineSettings::Client {
        named: client_config(configuration, &provider, &versions, named, true)?,
        anonymous: client_config(configuration, &provider, &versions, anonymous, false)?,
    })
}

fn client_config(
    configuration: &TlsConfiguration,
    provider: &Arc<CryptoProvider>,
    versions: &[&'static SupportedProtocolVersion],
    verifier: Arc<dyn ServerCertVerifier>,
    enable_sni: bool,
) -> std::result::Result<Arc<ClientConfig>, ConfigError> {
    let builder = ClientConfig::builder_with_provider(Arc::clone(provider))
        .with_protocol_versions(versions)?
        .dangerous()
        .with_custom_certificate_verifier(verifier);
    let mut config = match configuration.certificate_chain() {
        Some(chain) => {
            builder.with_client_auth_cert(chain.der_chain(), chain.private_key().der().clone_key())?
        }
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = alpn(configuration);
    config.enable_sni = enable_sni;
    Ok(Arc::new(config))
}

fn server_settings(configuration: &TlsConfiguration) -> std::result::Result<EngineSettings, ConfigError> {
    let provider = provider(configuration)?;
    let versions = protocol_versions(configuration)?;

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&versions)?
        .with_no_client_auth();

    let mut config = match (configuration.sni_callback(), configuration.certificate_chain()) {
        (Some(callback), _) => builder.with_cert_resolver(Arc::new(SniResolver {
            configuration: configuration.clone(),
            callback: Arc::clone(callback),
            provider,
        })),
        (None, Some(chain)) => {
            builder.with_single_cert(chain.der_chain(), chain.private_key().der().clone_key())?
        }
        (None, None) => return Err(ConfigError::MissingCertificate),
    };
    config.alpn_protocols = alpn(configuration);

    Ok(EngineSettings::Server(Arc::new(config)))
}

fn certified_key(
    chain: &CertificateChain,
    provider: &CryptoProvider,
) -> std::result::Result<CertifiedKey, rustls::Error> {
    let key = provider
        .key_provider
        .load_private_key(chain.private_key().der().clone_key())?;
    Ok(CertifiedKey::new(chain.der_chain(), key))
}

/// Picks the server certificate by running the server-name callback
struct SniResolver {
    configuration: TlsConfiguration,
    callback: ServerNameCallback,
    provider: Arc<CryptoProvider>,
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name();
        let Some(selected) = (self.callback)(server_name, &self.configuration) else {
            tracing::debug!(?server_name, "server-name callback rejected handshake");
            return None;
        };

        let chain = selected
            .certificate_chain()
            .or(self.configuration.certificate_chain())?;
        match certified_key(chain, &self.provider) {
            Ok(key) => Some(Arc::new(key)),
            Err(err) => {
                tracing::warn!(?server_name, %err, "server-name callback returned unusable key");
                None
            }
        }
    }
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniResolver")
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}
