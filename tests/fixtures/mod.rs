//! Test fixtures.

mod sockets;

pub use sockets::{CountingSocket, MemorySocket, tcp_pair};
pub use tlsbridge_core::testing::ScriptedEngine;
pub use tlsbridge_transport::testing::ScriptedSocket;

use std::path::{Path, PathBuf};
use tlsbridge_core::{
    Certificate, CertificateChain, ClientContext, PrivateKey, ServerContext, TlsBuffer,
    TlsConfiguration, TlsError, TrustStore,
};

/// Name every fixture certificate is issued for
pub const SERVER_NAME: &str = "localhost";

/// Self-signed certificate and key
#[derive(Debug, Clone)]
pub struct Pki {
    /// The certificate
    pub certificate: Certificate,
    /// Certificate and key as a chain
    pub chain: CertificateChain,
    /// PEM text of the certificate
    pub cert_pem: String,
    /// PEM text of the PKCS#8 key
    pub key_pem: String,
}

impl Pki {
    /// Generate a certificate valid for `names`
    pub fn generate(names: &[&str]) -> Self {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .expect("certificate generation");
        let cert_pem = cert.pem();
        let key_pem = key_pair.serialize_pem();

        let certificate = Certificate::from_buffer(cert_pem.as_bytes()).expect("certificate");
        let key = PrivateKey::from_buffer(key_pem.as_bytes(), None).expect("key");
        let chain = CertificateChain::new(vec![certificate.clone()], key).expect("chain");

        Self {
            certificate,
            chain,
            cert_pem,
            key_pem,
        }
    }

    /// Certificate for [`SERVER_NAME`]
    pub fn localhost() -> Self {
        Self::generate(&[SERVER_NAME])
    }

    /// Server configuration presenting this certificate
    pub fn server_configuration(&self) -> TlsConfiguration {
        TlsConfiguration::default().with_certificate_chain(Some(self.chain.clone()))
    }

    /// Client configuration trusting only this certificate
    pub fn client_configuration(&self) -> TlsConfiguration {
        TlsConfiguration::default()
            .with_trust_store(Some(TrustStore::from_certificates(vec![self.certificate.clone()])))
    }

    /// Write the certificate and key PEM files into `dir`
    pub fn write_files(&self, dir: &Path) -> (PathBuf, PathBuf) {
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        std::fs::write(&cert, &self.cert_pem).expect("write cert");
        std::fs::write(&key, &self.key_pem).expect("write key");
        (cert, key)
    }
}

/// Client and server contexts for [`SERVER_NAME`]
pub fn contexts() -> (ClientContext, ServerContext) {
    contexts_with(|c| c, |s| s)
}

/// Contexts for [`SERVER_NAME`] with adjusted configurations
pub fn contexts_with(
    client: impl FnOnce(TlsConfiguration) -> TlsConfiguration,
    server: impl FnOnce(TlsConfiguration) -> TlsConfiguration,
) -> (ClientContext, ServerContext) {
    let pki = Pki::localhost();
    (
        ClientContext::new(client(pki.client_configuration())).expect("client context"),
        ServerContext::new(server(pki.server_configuration())).expect("server context"),
    )
}

/// Fresh client/server buffer sessions for [`SERVER_NAME`]
pub fn buffer_pair() -> (TlsBuffer, TlsBuffer) {
    let (client, server) = contexts();
    (
        client.wrap_buffers(Some(SERVER_NAME)).expect("client session"),
        server.wrap_buffers().expect("server session"),
    )
}

/// Move all staged ciphertext from `from` to `to`, returning the byte count
pub fn shuttle(from: &mut TlsBuffer, to: &mut TlsBuffer) -> usize {
    let bytes = from.take_outgoing(usize::MAX);
    to.receive_from_network(&bytes);
    bytes.len()
}

/// Drive both handshakes by hand until both are established
pub fn handshake_buffers(client: &mut TlsBuffer, server: &mut TlsBuffer) -> Result<(), TlsError> {
    for _ in 0..16 {
        let c = client.handshake();
        shuttle(client, server);
        let s = server.handshake();
        shuttle(server, client);

        match (c, s) {
            (Ok(()), Ok(())) => return Ok(()),
            (Err(err), _) | (_, Err(err)) if !err.is_would_block() => return Err(err),
            _ => {}
        }
    }
    panic!("handshake did not converge");
}
