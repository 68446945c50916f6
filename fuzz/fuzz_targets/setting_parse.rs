//! Fuzz target for textual settings
//!
//! Version, cipher suite and ALPN names parse without panicking, and
//! anything that parses displays back to an equal value.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tlsbridge_core::{CipherSuite, NextProtocol, TlsVersion};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(version) = text.parse::<TlsVersion>() {
        assert_eq!(version.to_string().parse::<TlsVersion>().ok(), Some(version));
    }
    if let Ok(suite) = text.parse::<CipherSuite>() {
        assert_eq!(suite.to_string().parse::<CipherSuite>().ok(), Some(suite));
    }
    if let Ok(protocol) = text.parse::<NextProtocol>() {
        assert_eq!(NextProtocol::from_bytes(protocol.as_bytes()), protocol);
    }
});
