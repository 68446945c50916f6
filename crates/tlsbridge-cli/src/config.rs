//! Configuration system for the tlsbridge CLI.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tlsbridge_core::{
    CertificateChain, CipherSuite, NextProtocol, TlsConfiguration, TlsVersion, TrustStore,
};
use tlsbridge_transport::SocketConfig;
use tlsbridge_transport::tcp::ConnectOptions;

/// Largest accepted socket chunk size
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// tlsbridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Client (connect) configuration
    #[serde(default)]
    pub client: ClientConfig,
    /// Server (serve) configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Socket adapter configuration
    #[serde(default)]
    pub socket: SocketSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TLS parameters shared by both sides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSection {
    /// Cipher suite priority list (names or 0xNNNN); empty selects the defaults
    #[serde(default)]
    pub ciphers: Vec<String>,
    /// ALPN protocols in preference order
    #[serde(default)]
    pub alpn: Vec<String>,
    /// Lowest protocol version
    #[serde(default = "default_min_version")]
    pub min_version: String,
    /// Highest protocol version
    #[serde(default = "default_max_version")]
    pub max_version: String,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name used for SNI and certificate matching; defaults to the target host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Validate the server certificate chain
    #[serde(default = "default_true")]
    pub validate_certificates: bool,
    /// PEM bundle of trusted roots; the bundled Mozilla roots when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    /// Connect timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    /// Per-call socket timeout in seconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: Option<u64>,
    /// TLS parameters
    #[serde(flatten)]
    pub tls: TlsSection,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// PEM certificate chain, leaf first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    /// PEM or DER private key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// Per-call socket timeout in seconds for accepted connections
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: Option<u64>,
    /// TLS parameters
    #[serde(flatten)]
    pub tls: TlsSection,
}

/// Socket adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketSection {
    /// Bytes requested per receive
    #[serde(default = "default_chunk_size")]
    pub recv_chunk_size: usize,
    /// Bytes handed to each send
    #[serde(default = "default_chunk_size")]
    pub send_chunk_size: usize,
    /// Bound on staged outgoing ciphertext
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress_limit: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_true() -> bool {
    true
}

fn default_min_version() -> String {
    TlsVersion::TLSv1.to_string()
}

fn default_max_version() -> String {
    TlsVersion::MaximumSupported.to_string()
}

fn default_io_timeout() -> Option<u64> {
    Some(30)
}

fn default_listen_addr() -> String {
    "127.0.0.1:8443".to_string()
}

fn default_chunk_size() -> usize {
    8192
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            ciphers: Vec::new(),
            alpn: Vec::new(),
            min_version: default_min_version(),
            max_version: default_max_version(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_name: None,
            validate_certificates: true,
            ca_file: None,
            connect_timeout_secs: None,
            io_timeout_secs: default_io_timeout(),
            tls: TlsSection::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cert_file: None,
            key_file: None,
            io_timeout_secs: default_io_timeout(),
            tls: TlsSection::default(),
        }
    }
}

impl Default for SocketSection {
    fn default() -> Self {
        Self {
            recv_chunk_size: default_chunk_size(),
            send_chunk_size: default_chunk_size(),
            egress_limit: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TlsSection {
    /// Configuration carrying the cipher, ALPN and version settings
    ///
    /// # Errors
    ///
    /// Returns an error if a name cannot be parsed.
    pub fn base_configuration(&self) -> anyhow::Result<TlsConfiguration> {
        let mut configuration = TlsConfiguration::default()
            .with_lowest_supported_version(self.min_version.parse()?)
            .with_highest_supported_version(self.max_version.parse()?);

        if !self.ciphers.is_empty() {
            let ciphers = self
                .ciphers
                .iter()
                .map(|name| name.parse::<CipherSuite>())
                .collect::<Result<Vec<_>, _>>()?;
            configuration = configuration.with_ciphers(ciphers);
        }
        if !self.alpn.is_empty() {
            let protocols = self
                .alpn
                .iter()
                .map(|name| name.parse::<NextProtocol>())
                .collect::<Result<Vec<_>, _>>()?;
            configuration = configuration.with_inner_protocols(protocols);
        }
        Ok(configuration)
    }

    fn validate(&self, section: &str) -> anyhow::Result<()> {
        let lowest: TlsVersion = self
            .min_version
            .parse()
            .with_context(|| format!("[{section}] min_version"))?;
        let highest: TlsVersion = self
            .max_version
            .parse()
            .with_context(|| format!("[{section}] max_version"))?;
        if lowest > highest {
            anyhow::bail!("[{section}] min_version {lowest} is above max_version {highest}");
        }
        for cipher in &self.ciphers {
            cipher
                .parse::<CipherSuite>()
                .with_context(|| format!("[{section}] ciphers"))?;
        }
        for protocol in &self.alpn {
            protocol
                .parse::<NextProtocol>()
                .with_context(|| format!("[{section}] alpn"))?;
        }
        Ok(())
    }
}

impl ClientConfig {
    /// Resolve into an immutable TLS configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a setting is invalid or the CA file cannot be read.
    pub fn tls_configuration(&self) -> anyhow::Result<TlsConfiguration> {
        let trust_store = match &self.ca_file {
            Some(path) => Some(
                TrustStore::from_pem_file(path)
                    .with_context(|| format!("loading CA file {}", path.display()))?,
            ),
            None => None,
        };
        Ok(self
            .tls
            .base_configuration()?
            .with_validate_certificates(self.validate_certificates)
            .with_trust_store(trust_store))
    }

    /// TCP options for outgoing connections
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
            io_timeout: self.io_timeout_secs.map(Duration::from_secs),
            nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Resolve into an immutable TLS configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a setting is invalid or the certificate material
    /// cannot be loaded.
    pub fn tls_configuration(&self) -> anyhow::Result<TlsConfiguration> {
        let chain = match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Some(
                CertificateChain::from_files(cert, key, None)
                    .with_context(|| format!("loading {} / {}", cert.display(), key.display()))?,
            ),
            (None, None) => None,
            _ => anyhow::bail!("[server] cert_file and key_file must be set together"),
        };
        Ok(self.tls.base_configuration()?.with_certificate_chain(chain))
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listen_addr.parse()?)
    }

    /// TCP options for accepted connections
    #[must_use]
    pub fn accept_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: None,
            io_timeout: self.io_timeout_secs.map(Duration::from_secs),
            nodelay: true,
        }
    }
}

impl SocketSection {
    /// Socket adapter configuration
    #[must_use]
    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            recv_chunk_size: self.recv_chunk_size,
            send_chunk_size: self.send_chunk_size,
            egress_limit: self.egress_limit,
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("tlsbridge/config.toml")
    }

    /// Load the config at `path`, or the default path if it exists, or the
    /// built-in defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed, or an
    /// explicitly given file does not exist.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        for (name, size) in [
            ("recv_chunk_size", self.socket.recv_chunk_size),
            ("send_chunk_size", self.socket.send_chunk_size),
        ] {
            if size == 0 || size > MAX_CHUNK_SIZE {
                anyhow::bail!("[socket] {name} must be between 1 and 16MB");
            }
        }
        if self.socket.egress_limit == Some(0) {
            anyhow::bail!("[socket] egress_limit must be positive");
        }

        self.client.tls.validate("client")?;
        self.server.tls.validate("server")?;

        self.server
            .parse_listen_addr()
            .with_context(|| format!("[server] listen_addr '{}'", self.server.listen_addr))?;

        Ok(())
    }
}

/// Validate host:port format, returning the host
///
/// # Errors
///
/// Returns an error if the port is missing or invalid or the host is empty.
pub fn split_host_port(addr: &str) -> anyhow::Result<(&str, u16)> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!("'{addr}' missing port (expected format: host:port)");
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("'{addr}' has invalid port: {port_str}"))?;
    if port == 0 {
        anyhow::bail!("'{addr}' has invalid port: 0");
    }

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        anyhow::bail!("'{addr}' has empty hostname");
    }
    if host.contains('/') || host.contains('\\') {
        anyhow::bail!("'{addr}' contains invalid characters");
    }

    Ok((host, port))
}
