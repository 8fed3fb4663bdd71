//! Selection of the [`CryptoProvider`] and the cipher suite policy applied to
//! it.
//!
//! TLS 1.3 negotiates from its own fixed set of AEAD suites, all of which are
//! kept. For TLS 1.2 only the suites on [`TLS12_CIPHER_SUITES`] survive:
//! ephemeral ECDH key exchange with AES-GCM or ChaCha20-Poly1305.

use rustls::crypto::CryptoProvider;
use rustls::{CipherSuite, ProtocolVersion, SupportedCipherSuite};
use std::sync::Arc;

/// TLS 1.2 cipher suites that remain acceptable.
pub const TLS12_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
];

/// The process-global default [`CryptoProvider`] if there is one, otherwise
/// the `aws-lc-rs` provider.
pub fn default_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Whether `suite` may be offered.
pub fn is_allowed(suite: &SupportedCipherSuite) -> bool {
    suite.version().version == ProtocolVersion::TLSv1_3
        || TLS12_CIPHER_SUITES.contains(&suite.suite())
}

/// A copy of `base` whose cipher suites are restricted by [`is_allowed`].
/// Order of preference is preserved.
pub fn restrict_cipher_suites(base: &CryptoProvider) -> CryptoProvider {
    CryptoProvider {
        cipher_suites: base
            .cipher_suites
            .iter()
            .filter(|s| is_allowed(s))
            .copied()
            .collect(),
        ..base.clone()
    }
}
