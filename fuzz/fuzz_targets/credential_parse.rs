//! Fuzz target for credential loading
//!
//! Certificates, chains and private keys parsed from arbitrary PEM or DER
//! must fail with an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tlsbridge_core::{Certificate, CertificateChain, PrivateKey};

fuzz_target!(|data: &[u8]| {
    let _ = Certificate::from_buffer(data);
    let chain = Certificate::chain_from_buffer(data);

    let (password, body) = match data.split_first() {
        Some((&len, rest)) if (len as usize) <= rest.len() => {
            let (password, body) = rest.split_at(len as usize);
            (Some(password), body)
        }
        _ => (None, data),
    };
    let key = PrivateKey::from_buffer(body, password);

    if let (Ok(certificates), Ok(key)) = (chain, key) {
        let _ = CertificateChain::new(certificates, key);
    }
});
