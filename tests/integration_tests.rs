//! Integration tests for the buffer-shaped transport.
//!
//! Sessions are driven by hand: ciphertext is moved between a client and a
//! server `TlsBuffer` without any socket.

use std::sync::{Arc, Mutex};
use tlsbridge_core::{
    CertificateChain, CipherSuite, ClientContext, EngineState, EngineStatus, FatalCode,
    NextProtocol, Pending, ServerContext, ServerNameCallback, SessionState, TlsBuffer,
    TlsConfiguration, TlsError, TlsTransport, TlsVersion, TrustStore,
};
use tlsbridge_integration_tests::fixtures::{
    Pki, SERVER_NAME, ScriptedEngine, buffer_pair, contexts_with, handshake_buffers, shuttle,
};

fn protocol_code(err: &TlsError) -> Option<FatalCode> {
    match err {
        TlsError::Protocol(e) => Some(e.code()),
        _ => None,
    }
}

/// Read everything currently decryptable
fn drain_reads(session: &mut TlsBuffer) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        match session.read(4096) {
            Ok(data) if data.is_empty() => return out,
            Ok(data) => out.extend_from_slice(&data),
            Err(err) if err.is_want_read() => return out,
            Err(err) => panic!("unexpected read error: {err}"),
        }
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_handshake_establishes_both_sides() {
    let (mut client, mut server) = buffer_pair();
    assert_eq!(client.state(), SessionState::Idle);

    handshake_buffers(&mut client, &mut server).unwrap();

    for session in [&client, &server] {
        assert_eq!(session.state(), SessionState::Established);
        assert_eq!(session.engine_state(), EngineState::Connected);
        assert_eq!(session.negotiated_version(), Some(TlsVersion::TLSv1_3));
        assert!(session.cipher().is_some());
        assert_eq!(session.negotiated_protocol(), None);
        assert_eq!(session.stats().handshakes, 1);
    }
}

#[test]
fn test_first_handshake_step_needs_flush() {
    let (mut client, mut server) = buffer_pair();

    let err = client.handshake().unwrap_err();
    assert_eq!(err.pending(), Some(Pending::NeedsFlush));
    assert!(client.pending_outgoing() > 0);
    // TLS handshake record
    assert_eq!(client.peek_outgoing(1), &[0x16]);

    // Server has nothing to work with yet
    let err = server.handshake().unwrap_err();
    assert_eq!(err.pending(), Some(Pending::NeedsInput));
    assert_eq!(server.pending_outgoing(), 0);
}

#[test]
fn test_handshake_idempotent_once_established() {
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();

    let incoming = client.pending_incoming();
    let outgoing = client.pending_outgoing();
    client.handshake().unwrap();
    client.handshake().unwrap();

    assert_eq!(client.pending_incoming(), incoming);
    assert_eq!(client.pending_outgoing(), outgoing);
    assert_eq!(client.stats().handshakes, 1);
}

#[test]
fn test_read_while_idle_is_usage_error() {
    let (mut client, _server) = buffer_pair();

    let err = client.read(5).unwrap_err();
    assert!(matches!(
        err,
        TlsError::Usage {
            operation: "read",
            state: SessionState::Idle
        }
    ));
    assert!(!err.is_would_block());
    assert!(err.is_fatal());
}

#[test]
fn test_write_while_handshaking_is_usage_error() {
    let (mut client, _server) = buffer_pair();
    let _ = client.handshake();
    assert_eq!(client.state(), SessionState::Handshaking);
    assert!(matches!(
        client.write(b"early"),
        Err(TlsError::Usage {
            state: SessionState::Handshaking,
            ..
        })
    ));
}

#[test]
fn test_fragmented_delivery() {
    let (mut client, mut server) = buffer_pair();

    // Feed ciphertext one byte at a time in both directions
    for _ in 0..16 {
        let c = client.handshake();
        for byte in client.take_outgoing(usize::MAX) {
            server.receive_from_network(&[byte]);
            let _ = server.handshake();
        }
        let s = server.handshake();
        for byte in server.take_outgoing(usize::MAX) {
            client.receive_from_network(&[byte]);
        }
        if c.is_ok() && s.is_ok() {
            break;
        }
    }
    assert_eq!(client.state(), SessionState::Established);
    assert_eq!(server.state(), SessionState::Established);
}

// ============================================================================
// Application data
// ============================================================================

#[test]
fn test_ping_write_and_peer_read() {
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();

    assert_eq!(client.write(b"ping").unwrap(), 4);
    // Full record framing: header, payload, content type, tag
    assert!(client.pending_outgoing() > 4 + 5);
    assert_eq!(client.peek_outgoing(1), &[0x17]);

    shuttle(&mut client, &mut server);
    assert_eq!(client.pending_outgoing(), 0);
    assert_eq!(server.read(4).unwrap(), b"ping".to_vec());

    let stats = client.stats();
    assert_eq!(stats.cleartext_written, 4);
    assert!(stats.ciphertext_sent > 4);
}

#[test]
fn test_no_data_is_retry_not_eof() {
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();

    let err = server.read(16).unwrap_err();
    assert_eq!(err.pending(), Some(Pending::NeedsInput));
    assert!(err.is_want_read());
    assert_eq!(server.state(), SessionState::Established);
}

#[test]
fn test_bidirectional_exchange() {
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();

    for round in 0..5u8 {
        let request = vec![round; 100 + round as usize];
        assert_eq!(client.write(&request).unwrap(), request.len());
        shuttle(&mut client, &mut server);
        let echoed = drain_reads(&mut server);
        assert_eq!(echoed, request);

        assert_eq!(server.write(&echoed).unwrap(), echoed.len());
        shuttle(&mut server, &mut client);
        assert_eq!(drain_reads(&mut client), request);
    }
}

#[test]
fn test_large_write_spans_records() {
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();

    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let mut offset = 0;
    while offset < payload.len() {
        offset += client.write(&payload[offset..]).unwrap();
    }
    shuttle(&mut client, &mut server);
    assert_eq!(drain_reads(&mut server), payload);
}

#[test]
fn test_bounded_egress_back_pressure() {
    const LIMIT: usize = 512;
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();
    client.set_egress_limit(Some(LIMIT));
    assert_eq!(client.egress_limit(), Some(LIMIT));

    let payload: Vec<u8> = (0..32 * 1024u32).map(|i| (i % 253) as u8).collect();
    let mut offset = 0;
    let mut received = Vec::new();

    for _ in 0..10_000 {
        if received.len() == payload.len() {
            break;
        }
        if offset < payload.len() {
            match client.write(&payload[offset..]) {
                Ok(n) => offset += n,
                Err(err) if err.is_would_block() => {}
                Err(err) => panic!("unexpected write error: {err}"),
            }
        }
        assert!(client.pending_outgoing() <= LIMIT);
        while client.pending_outgoing() > 0 {
            shuttle(&mut client, &mut server);
            assert!(client.pending_outgoing() <= LIMIT);
        }
        received.extend(drain_reads(&mut server));
    }
    assert_eq!(received, payload);
}

// ============================================================================
// Closure and faults
// ============================================================================

#[test]
fn test_graceful_close_reads_empty() {
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();

    client.shutdown().unwrap();
    assert_eq!(client.state(), SessionState::Closed);
    assert!(client.pending_outgoing() > 0);
    shuttle(&mut client, &mut server);

    let data = server.read(16).unwrap();
    assert!(data.is_empty());
    assert_eq!(server.state(), SessionState::Closed);
    assert!(server.is_peer_closed());

    // Sticky end-of-stream, other operations report the closure
    assert!(server.read(16).unwrap().is_empty());
    assert!(matches!(server.write(b"late"), Err(TlsError::PeerClosed)));

    // The closed side still answers with its own close_notify
    server.shutdown().unwrap();
    assert!(server.pending_outgoing() > 0);
}

#[test]
fn test_data_before_close_is_delivered() {
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();

    client.write(b"last words").unwrap();
    client.shutdown().unwrap();
    shuttle(&mut client, &mut server);

    assert_eq!(server.read(64).unwrap(), b"last words".to_vec());
    assert!(server.read(64).unwrap().is_empty());
}

#[test]
fn test_shutdown_idle_and_twice() {
    let (mut client, _server) = buffer_pair();
    client.shutdown().unwrap();
    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(client.pending_outgoing(), 0);

    client.shutdown().unwrap();
    assert!(matches!(
        client.handshake(),
        Err(TlsError::Usage {
            state: SessionState::Closed,
            ..
        })
    ));
}

#[test]
fn test_abrupt_eof_is_peer_abort() {
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();

    server.mark_network_eof();
    assert!(server.is_network_eof());
    let err = server.read(16).unwrap_err();
    assert_eq!(protocol_code(&err), Some(FatalCode::PeerAbort));
    assert_eq!(server.state(), SessionState::Faulted);
}

#[test]
fn test_garbage_faults_and_fault_is_sticky() {
    let (_client, mut server) = buffer_pair();
    server.receive_from_network(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");

    let first = server.handshake().unwrap_err();
    assert_eq!(protocol_code(&first), Some(FatalCode::Protocol));
    assert_eq!(server.state(), SessionState::Faulted);
    assert_eq!(server.engine_state(), EngineState::Aborted);

    for err in [
        server.handshake().unwrap_err(),
        server.read(1).unwrap_err(),
        server.write(b"x").unwrap_err(),
        server.shutdown().unwrap_err(),
        server.set_peer_name("other").unwrap_err(),
    ] {
        assert_eq!(err.to_string(), first.to_string());
    }
}

#[test]
fn test_scripted_engine_fatal_status() {
    let mut session = ScriptedEngine::new(vec![(
        Vec::new(),
        EngineStatus::Fatal(tlsbridge_core::ProtocolError::new(
            FatalCode::HandshakeFailure,
            "scripted",
        )),
    )])
    .into_session()
    .unwrap();

    let err = session.handshake().unwrap_err();
    assert_eq!(protocol_code(&err), Some(FatalCode::HandshakeFailure));
    assert!(err.is_fatal());
    assert_eq!(session.state(), SessionState::Faulted);
}

// ============================================================================
// Certificate validation and peer names
// ============================================================================

#[test]
fn test_host_name_mismatch() {
    let pki = Pki::localhost();
    let client = ClientContext::new(pki.client_configuration()).unwrap();
    let server = ServerContext::new(pki.server_configuration()).unwrap();

    let mut c = client.wrap_buffers(Some("example.com")).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    let err = handshake_buffers(&mut c, &mut s).unwrap_err();
    assert_eq!(protocol_code(&err), Some(FatalCode::HostNameMismatch));
    assert_eq!(c.state(), SessionState::Faulted);
}

#[test]
fn test_unknown_issuer_with_system_roots() {
    let pki = Pki::localhost();
    let client = ClientContext::new(TlsConfiguration::default()).unwrap();
    let server = ServerContext::new(pki.server_configuration()).unwrap();

    let mut c = client.wrap_buffers(Some(SERVER_NAME)).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    let err = handshake_buffers(&mut c, &mut s).unwrap_err();
    assert_eq!(protocol_code(&err), Some(FatalCode::UnknownIssuer));
}

#[test]
fn test_validation_disabled_accepts_untrusted() {
    let pki = Pki::localhost();
    let client =
        ClientContext::new(TlsConfiguration::default().with_validate_certificates(false)).unwrap();
    let server = ServerContext::new(pki.server_configuration()).unwrap();

    let mut c = client.wrap_buffers(Some("wrong.example")).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    handshake_buffers(&mut c, &mut s).unwrap();
    assert_eq!(c.state(), SessionState::Established);
}

#[test]
fn test_no_hostname_skips_name_check_only() {
    let pki = Pki::localhost();
    let server = ServerContext::new(pki.server_configuration()).unwrap();

    // Trusted chain, no name: accepted
    let trusted = ClientContext::new(pki.client_configuration()).unwrap();
    let mut c = trusted.wrap_buffers(None).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    handshake_buffers(&mut c, &mut s).unwrap();

    // Untrusted chain, no name: still rejected
    let untrusted = ClientContext::new(TlsConfiguration::default()).unwrap();
    let mut c = untrusted.wrap_buffers(None).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    let err = handshake_buffers(&mut c, &mut s).unwrap_err();
    assert_eq!(protocol_code(&err), Some(FatalCode::UnknownIssuer));
}

#[test]
fn test_set_peer_name_rejects_invalid_and_late() {
    let (mut client, mut server) = buffer_pair();
    assert!(matches!(
        client.set_peer_name("not a host name!"),
        Err(TlsError::Config(_))
    ));
    client.set_peer_name("127.0.0.1").unwrap();

    let _ = client.handshake();
    shuttle(&mut client, &mut server);
    assert!(matches!(
        client.set_peer_name(SERVER_NAME),
        Err(TlsError::Usage {
            operation: "set_peer_name",
            ..
        })
    ));
}

#[test]
fn test_chain_and_trust_store_from_files() {
    let pki = Pki::localhost();
    let dir = tempfile::tempdir().unwrap();
    let (cert, key) = pki.write_files(dir.path());

    let chain = CertificateChain::from_files(&cert, &key, None).unwrap();
    let server = ServerContext::new(
        TlsConfiguration::default().with_certificate_chain(Some(chain)),
    )
    .unwrap();
    let client = ClientContext::new(
        TlsConfiguration::default().with_trust_store(Some(TrustStore::from_pem_file(&cert).unwrap())),
    )
    .unwrap();

    let mut c = client.wrap_buffers(Some(SERVER_NAME)).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    handshake_buffers(&mut c, &mut s).unwrap();
}

// ============================================================================
// Negotiation
// ============================================================================

#[test]
fn test_alpn_negotiation() {
    let (client, server) = contexts_with(
        |c| c.with_inner_protocols(vec![NextProtocol::H2, NextProtocol::Http1]),
        |s| s.with_inner_protocols(vec![NextProtocol::Http1]),
    );
    let mut c = client.wrap_buffers(Some(SERVER_NAME)).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    handshake_buffers(&mut c, &mut s).unwrap();

    assert_eq!(c.negotiated_protocol(), Some(NextProtocol::Http1));
    assert_eq!(s.negotiated_protocol(), Some(NextProtocol::Http1));
}

#[test]
fn test_alpn_mismatch_fails() {
    let (client, server) = contexts_with(
        |c| c.with_inner_protocols(vec![NextProtocol::H2]),
        |s| s.with_inner_protocols(vec![NextProtocol::Other(b"custom/1".to_vec())]),
    );
    let mut c = client.wrap_buffers(Some(SERVER_NAME)).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    let err = handshake_buffers(&mut c, &mut s).unwrap_err();
    assert_eq!(protocol_code(&err), Some(FatalCode::NoApplicationProtocol));
}

#[test]
fn test_tls12_only() {
    let tls12 = |c: TlsConfiguration| {
        c.with_lowest_supported_version(TlsVersion::TLSv1_2)
            .with_highest_supported_version(TlsVersion::TLSv1_2)
    };
    let (client, server) = contexts_with(tls12, tls12);
    let mut c = client.wrap_buffers(Some(SERVER_NAME)).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    handshake_buffers(&mut c, &mut s).unwrap();

    assert_eq!(c.negotiated_version(), Some(TlsVersion::TLSv1_2));
    assert_eq!(s.negotiated_version(), Some(TlsVersion::TLSv1_2));
}

#[test]
fn test_version_mismatch_fails() {
    let (client, server) = contexts_with(
        |c| c.with_lowest_supported_version(TlsVersion::TLSv1_3),
        |s| s.with_highest_supported_version(TlsVersion::TLSv1_2),
    );
    let mut c = client.wrap_buffers(Some(SERVER_NAME)).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    let err = handshake_buffers(&mut c, &mut s).unwrap_err();
    assert_eq!(protocol_code(&err), Some(FatalCode::UnsupportedVersion));
}

#[test]
fn test_cipher_restriction() {
    let (client, server) = contexts_with(
        |c| c.with_ciphers(vec![CipherSuite::TLS_AES_256_GCM_SHA384]),
        |s| s,
    );
    let mut c = client.wrap_buffers(Some(SERVER_NAME)).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    handshake_buffers(&mut c, &mut s).unwrap();

    assert_eq!(c.cipher(), Some(CipherSuite::TLS_AES_256_GCM_SHA384));
    assert_eq!(s.cipher(), Some(CipherSuite::TLS_AES_256_GCM_SHA384));
}

// ============================================================================
// Server-name callback
// ============================================================================

#[test]
fn test_sni_callback_selects_certificate() {
    let alt = Pki::generate(&["alt.test"]);
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::default();

    let chain = alt.chain.clone();
    let recorder = Arc::clone(&seen);
    let callback: ServerNameCallback = Arc::new(move |name: Option<&str>, original: &TlsConfiguration| {
        recorder.lock().unwrap().push(name.map(str::to_string));
        Some(original.with_certificate_chain(Some(chain.clone())))
    });
    let original = TlsConfiguration::default().with_sni_callback(Some(callback));
    let server = ServerContext::new(original).unwrap();
    let client = ClientContext::new(alt.client_configuration()).unwrap();

    let mut c = client.wrap_buffers(Some("alt.test")).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    handshake_buffers(&mut c, &mut s).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![Some("alt.test".to_string())]);
    // The context's configuration is untouched
    assert!(server.configuration().certificate_chain().is_none());

    // Without a name the callback sees None
    let mut c = client.wrap_buffers(None).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    handshake_buffers(&mut c, &mut s).unwrap();
    assert_eq!(seen.lock().unwrap().last(), Some(&None));
}

#[test]
fn test_sni_callback_rejection_aborts() {
    let pki = Pki::localhost();
    let callback: ServerNameCallback = Arc::new(|_: Option<&str>, _: &TlsConfiguration| None);
    let server = ServerContext::new(pki.server_configuration().with_sni_callback(Some(callback)))
        .unwrap();
    let client = ClientContext::new(pki.client_configuration()).unwrap();

    let mut c = client.wrap_buffers(Some(SERVER_NAME)).unwrap();
    let mut s = server.wrap_buffers().unwrap();
    let err = handshake_buffers(&mut c, &mut s).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(s.state(), SessionState::Faulted);
}

// ============================================================================
// Capability interface
// ============================================================================

fn exchange_via_trait(writer: &mut dyn TlsTransport, payload: &[u8]) -> usize {
    writer.do_handshake().unwrap();
    writer.write(payload).unwrap()
}

#[test]
fn test_transport_trait_object() {
    let (mut client, mut server) = buffer_pair();
    handshake_buffers(&mut client, &mut server).unwrap();

    assert_eq!(exchange_via_trait(&mut client, b"dyn"), 3);
    let transport: &dyn TlsTransport = &client;
    assert_eq!(transport.state(), SessionState::Established);
    assert_eq!(transport.context().configuration().ciphers().len(), 9);
    assert_eq!(transport.stats().cleartext_written, 3);

    shuttle(&mut client, &mut server);
    let mut buf = [0u8; 8];
    let n = TlsTransport::read_into(&mut server, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"dyn");
}
