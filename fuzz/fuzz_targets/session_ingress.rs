//! Fuzz target for session ingress
//!
//! Feeds arbitrary ciphertext, in arbitrary fragments, to client and server
//! sessions. Sessions must never panic and a fault must stay put.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;
use tlsbridge_core::{
    CertificateChain, Certificate, ClientContext, PrivateKey, ServerContext, SessionState,
    TlsConfiguration,
};

#[derive(Debug, Arbitrary)]
struct Input {
    client: bool,
    eof: bool,
    fragments: Vec<Vec<u8>>,
}

fn contexts() -> &'static (ClientContext, ServerContext) {
    static CONTEXTS: OnceLock<(ClientContext, ServerContext)> = OnceLock::new();
    CONTEXTS.get_or_init(|| {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKey::from_buffer(&key_pair.serialize_der(), None).unwrap();
        let chain = CertificateChain::new(vec![Certificate::from_der(cert.der().to_vec())], key)
            .unwrap();
        let server =
            ServerContext::new(TlsConfiguration::default().with_certificate_chain(Some(chain)))
                .unwrap();
        let client =
            ClientContext::new(TlsConfiguration::default().with_validate_certificates(false))
                .unwrap();
        (client, server)
    })
}

fuzz_target!(|input: Input| {
    let (client, server) = contexts();
    let mut session = if input.client {
        client.wrap_buffers(Some("localhost")).unwrap()
    } else {
        server.wrap_buffers().unwrap()
    };

    let mut fault = None;
    for fragment in &input.fragments {
        session.receive_from_network(fragment);
        match session.handshake() {
            Ok(()) => {
                let _ = session.read(4096);
            }
            Err(err) if err.is_would_block() => {}
            Err(err) => {
                fault = Some(err.to_string());
                break;
            }
        }
        let _ = session.take_outgoing(usize::MAX);
    }

    if input.eof && fault.is_none() {
        session.mark_network_eof();
        if let Err(err) = session.handshake() {
            if !err.is_would_block() {
                fault = Some(err.to_string());
            }
        }
    }

    if let Some(first) = fault {
        assert_eq!(session.state(), SessionState::Faulted);
        let again = session.handshake().unwrap_err();
        assert_eq!(again.to_string(), first);
    }
});
