//! Application-level verification of peer certificates.
//!
//! A [`PeerVerifiers`] chain runs after the platform (webpki) verification
//! has accepted the peer's chain. Every presented certificate is parsed with
//! [`x509_parser`] and handed to each [`PeerVerifier`] in order; the first
//! rejection fails the handshake.
//!
//! Chains are immutable. [`PeerVerifiers::append`] and
//! [`PeerVerifiers::extend`] return new chains and may be called freely
//! while the original is in use by concurrent handshakes.
//!
//! ```
//! use declarative_tls::verify::{self, PeerVerificationError, PeerVerifiers, PeerVerifyConfig};
//!
//! let policy = PeerVerifyConfig {
//!     dns_suffixes: vec![".internal.example.org".into()],
//!     common_names: vec![],
//! };
//! let chain = PeerVerifiers::default()
//!     .append(policy.verifier())
//!     .append([verify::from_fn(|cert, _chain| {
//!         if cert.validity().time_to_expiration().is_some() {
//!             Ok(())
//!         } else {
//!             Err(PeerVerificationError::rejected(cert, "expired"))
//!         }
//!     })]);
//! assert_eq!(chain.len(), 2);
//! ```

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;

/// Reason a peer certificate was refused.
#[derive(Clone, Debug, Error)]
pub enum PeerVerificationError {
    /// The presented bytes are not an X.509 certificate.
    #[error("malformed peer certificate: {0}")]
    Malformed(String),
    /// A verifier refused the certificate.
    #[error("peer certificate {subject} (serial {serial}) rejected: {reason}")]
    Rejected {
        /// Subject of the refused certificate.
        subject: String,
        /// Serial number of the refused certificate, in hex.
        serial: String,
        /// Why it was refused.
        reason: String,
    },
}

impl PeerVerificationError {
    /// Refuse `cert` for `reason`.
    pub fn rejected(cert: &X509Certificate<'_>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            subject: cert.subject().to_string(),
            serial: cert.raw_serial_as_string(),
            reason: reason.into(),
        }
    }
}

impl From<PeerVerificationError> for rustls::Error {
    fn from(e: PeerVerificationError) -> Self {
        match e {
            PeerVerificationError::Malformed(_) => {
                rustls::Error::InvalidCertificate(CertificateError::BadEncoding)
            }
            rejected => rustls::Error::InvalidCertificate(CertificateError::Other(
                rustls::OtherError(Arc::new(rejected)),
            )),
        }
    }
}

/// A single predicate applied to each certificate presented by a peer.
pub trait PeerVerifier: Send + Sync {
    /// Accept or refuse `cert`. `verified_chain` is the chain presented by
    /// the peer (end entity first) once the platform verifier has accepted
    /// it, or empty if platform verification was skipped.
    fn verify_peer(
        &self,
        cert: &X509Certificate<'_>,
        verified_chain: &[CertificateDer<'_>],
    ) -> Result<(), PeerVerificationError>;
}

impl<F> PeerVerifier for F
where
    F: Fn(&X509Certificate<'_>, &[CertificateDer<'_>]) -> Result<(), PeerVerificationError>
        + Send
        + Sync,
{
    fn verify_peer(
        &self,
        cert: &X509Certificate<'_>,
        verified_chain: &[CertificateDer<'_>],
    ) -> Result<(), PeerVerificationError> {
        self(cert, verified_chain)
    }
}

/// Wrap a closure as a shareable [`PeerVerifier`].
pub fn from_fn<F>(f: F) -> Arc<dyn PeerVerifier>
where
    F: Fn(&X509Certificate<'_>, &[CertificateDer<'_>]) -> Result<(), PeerVerificationError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Declarative peer certificate policy.
///
/// A certificate is accepted if any of its DNS names or its subject common
/// name ends with any of `dns_suffixes` (ignoring case), or if its subject
/// common name is exactly one of `common_names`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PeerVerifyConfig {
    /// Acceptable DNS name suffixes, compared case-insensitively.
    pub dns_suffixes: Vec<String>,
    /// Acceptable subject common names, compared exactly.
    pub common_names: Vec<String>,
}

impl PeerVerifyConfig {
    /// Whether the policy constrains anything.
    pub fn is_empty(&self) -> bool {
        self.dns_suffixes.is_empty() && self.common_names.is_empty()
    }

    /// The predicate implementing this policy, or `None` if the policy is
    /// empty. The predicate owns a copy of the policy.
    pub fn verifier(&self) -> Option<Arc<dyn PeerVerifier>> {
        if self.is_empty() {
            return None;
        }
        Some(Arc::new(NamePolicy {
            dns_suffixes: self
                .dns_suffixes
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            common_names: self.common_names.clone(),
        }))
    }
}

#[derive(Debug)]
struct NamePolicy {
    // lower case
    dns_suffixes: Vec<String>,
    common_names: Vec<String>,
}

fn common_name<'a>(cert: &'a X509Certificate<'_>) -> Option<&'a str> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
}

fn dns_names<'a>(cert: &'a X509Certificate<'_>) -> Vec<&'a str> {
    cert.subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|gn| match gn {
                    GeneralName::DNSName(name) => Some(*name),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

impl PeerVerifier for NamePolicy {
    fn verify_peer(
        &self,
        cert: &X509Certificate<'_>,
        _verified_chain: &[CertificateDer<'_>],
    ) -> Result<(), PeerVerificationError> {
        let cn = common_name(cert);
        let suffix_match = dns_names(cert).into_iter().chain(cn).any(|name| {
            let name = name.to_ascii_lowercase();
            self.dns_suffixes.iter().any(|s| name.ends_with(s.as_str()))
        });
        let cn_match = cn.is_some_and(|cn| self.common_names.iter().any(|n| n == cn));
        if suffix_match || cn_match {
            Ok(())
        } else {
            Err(PeerVerificationError::rejected(
                cert,
                "no DNS name or common name matches the peer verification policy",
            ))
        }
    }
}

/// An immutable, ordered chain of [`PeerVerifier`].
#[derive(Clone)]
pub struct PeerVerifiers(Arc<[Arc<dyn PeerVerifier>]>);

impl Default for PeerVerifiers {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl std::fmt::Debug for PeerVerifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerVerifiers {{ {} verifier(s) }}", self.0.len())
    }
}

impl PeerVerifiers {
    /// A new chain consisting of this one followed by `more`.
    pub fn append<I>(&self, more: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn PeerVerifier>>,
    {
        Self(self.0.iter().cloned().chain(more).collect())
    }

    /// A new chain consisting of this one followed by `other`.
    pub fn extend(&self, other: &PeerVerifiers) -> Self {
        self.append(other.0.iter().cloned())
    }

    /// Number of verifiers in the chain.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the chain is empty, in which case no verification callback
    /// needs to be installed at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the verifiers in order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PeerVerifier>> {
        self.0.iter()
    }

    /// Run every verifier over every certificate in `raw_certs`. A
    /// certificate that fails to parse is refused before any verifier sees
    /// it. The first refusal ends verification.
    pub fn verify_peer_certificate(
        &self,
        raw_certs: &[CertificateDer<'_>],
        verified_chain: &[CertificateDer<'_>],
    ) -> Result<(), PeerVerificationError> {
        if self.is_empty() {
            return Ok(());
        }
        for raw in raw_certs {
            let (_, cert) = x509_parser::parse_x509_certificate(raw.as_ref())
                .map_err(|e| PeerVerificationError::Malformed(e.to_string()))?;
            for v in self.iter() {
                v.verify_peer(&cert, verified_chain)?;
            }
        }
        Ok(())
    }
}

impl FromIterator<Arc<dyn PeerVerifier>> for PeerVerifiers {
    fn from_iter<I: IntoIterator<Item = Arc<dyn PeerVerifier>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn presented_chain<'a>(
    end_entity: &'a CertificateDer<'_>,
    intermediates: &'a [CertificateDer<'_>],
) -> Vec<CertificateDer<'a>> {
    std::iter::once(end_entity.as_ref())
        .chain(intermediates.iter().map(|c| c.as_ref()))
        .map(CertificateDer::from)
        .collect()
}

/// Client-side verifier: webpki verification of the server (unless
/// disabled), against a fixed server name if one is configured, followed by
/// the peer verification chain.
#[derive(Debug)]
pub(crate) struct PeerCheckingServerVerifier {
    // None: chain validation skipped.
    inner: Option<Arc<WebPkiServerVerifier>>,
    server_name: Option<ServerName<'static>>,
    peers: PeerVerifiers,
    supported_algs: WebPkiSupportedAlgorithms,
}

impl PeerCheckingServerVerifier {
    pub(crate) fn new(
        inner: Option<Arc<WebPkiServerVerifier>>,
        server_name: Option<ServerName<'static>>,
        peers: PeerVerifiers,
        supported_algs: WebPkiSupportedAlgorithms,
    ) -> Self {
        Self {
            inner,
            server_name,
            peers,
            supported_algs,
        }
    }
}

impl ServerCertVerifier for PeerCheckingServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let presented = presented_chain(end_entity, intermediates);
        let verified: &[CertificateDer<'_>] = match &self.inner {
            Some(inner) => {
                let expected = self.server_name.as_ref().unwrap_or(server_name);
                inner.verify_server_cert(end_entity, intermediates, expected, ocsp_response, now)?;
                &presented
            }
            None => &[],
        };
        self.peers.verify_peer_certificate(&presented, verified)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}

/// Server-side verifier: the configured client verifier followed by the
/// peer verification chain.
#[derive(Debug)]
pub(crate) struct PeerCheckingClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    peers: PeerVerifiers,
}

impl PeerCheckingClientVerifier {
    pub(crate) fn new(inner: Arc<dyn ClientCertVerifier>, peers: PeerVerifiers) -> Self {
        Self { inner, peers }
    }
}

impl ClientCertVerifier for PeerCheckingClientVerifier {
    fn offer_client_auth(&self) -> bool {
        self.inner.offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.inner.client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        self.inner
            .verify_client_cert(end_entity, intermediates, now)?;
        let presented = presented_chain(end_entity, intermediates);
        self.peers.verify_peer_certificate(&presented, &presented)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
