//! Assembly of a validated [`TlsConfig`] from a declarative [`Config`].
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config: Option<declarative_tls::Config> = None;
//! // No TLS requested: nothing to build and nothing wrong.
//! assert!(declarative_tls::build(config.as_ref(), [])?.is_none());
//! # Ok(())
//! # }
//! ```
//!
//! Secure defaults apply to everything left unset: the minimum protocol
//! version is TLS 1.3, TLS 1.2 (when explicitly allowed) is restricted to
//! the cipher suites in [`crate::crypto_provider::TLS12_CIPHER_SUITES`], and
//! the application protocol list is `["http/1.1"]`. Declaring a non-empty
//! `client_cas` pool turns on mandatory client certificate verification.

use rustls::client::{ResolvesClientCert, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::server::{
    ClientHello, ParsedCertificate, ResolvesServerCert, VerifierBuilderError, WebPkiClientVerifier,
};
use rustls::sign::CertifiedKey;
use rustls::{
    ClientConfig, RootCertStore, ServerConfig, SignatureScheme, SupportedCipherSuite,
    SupportedProtocolVersion,
};
use rustls_pki_types::ServerName;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::files::{ExternalCertPool, ExternalCertificates, LoadError};
use crate::verify::{
    PeerCheckingClientVerifier, PeerCheckingServerVerifier, PeerVerifier, PeerVerifiers,
    PeerVerifyConfig,
};

/// Application protocol offered when none is configured.
pub const DEFAULT_NEXT_PROTO: &str = "http/1.1";

/// Error type returned while building a [`TlsConfig`].
#[derive(Debug, Error)]
pub enum TlsConfigError {
    /// An identity certificate could not be loaded.
    #[error("loading certificates: {0}")]
    Certificates(#[source] LoadError),
    /// The root CA pool could not be built.
    #[error("loading root CAs: {0}")]
    RootCAs(#[source] LoadError),
    /// The client CA pool could not be built.
    #[error("loading client CAs: {0}")]
    ClientCAs(#[source] LoadError),
    /// `server_name` is neither a DNS name nor an IP address.
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    /// A server configuration was requested without any certificate.
    #[error("no certificate is configured for serving")]
    NoServerCertificate,
    /// Wrapper for rustls::Error
    #[error("{0}")]
    Tls(#[from] rustls::Error),
    /// Wrapper for rustls::server::VerifierBuilderError
    #[error("{0}")]
    Verifier(#[from] VerifierBuilderError),
}

/// Error returned when parsing an unknown [`TlsVersion`].
#[derive(Debug, Error)]
#[error("unknown or unsupported TLS version {0:?}")]
pub struct UnknownTlsVersion(String);

/// A TLS protocol version. Versions older than 1.2 are not supported.
///
/// Configuration files and command line flags share one grammar: `1.2`,
/// `1.3`, optionally prefixed by `TLS` or `TLSv` in any case.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// The most recent version, used as the minimum when none is configured.
    pub const LATEST: TlsVersion = TlsVersion::Tls13;

    const ALL: [TlsVersion; 2] = [TlsVersion::Tls12, TlsVersion::Tls13];

    /// The corresponding rustls version.
    pub fn supported(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsVersion::Tls12 => write!(f, "1.2"),
            TlsVersion::Tls13 => write!(f, "1.3"),
        }
    }
}

impl std::str::FromStr for TlsVersion {
    type Err = UnknownTlsVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let number = lower
            .strip_prefix("tlsv")
            .or_else(|| lower.strip_prefix("tls"))
            .unwrap_or(&lower);
        match number {
            "1.2" => Ok(TlsVersion::Tls12),
            "1.3" => Ok(TlsVersion::Tls13),
            _ => Err(UnknownTlsVersion(s.to_owned())),
        }
    }
}

impl Serialize for TlsVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TlsVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Declarative TLS settings for one endpoint.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Identity certificates. A server selects among them by SNI; a client
    /// presents the first.
    pub certificates: ExternalCertificates,
    /// Trust anchors for verifying servers. The bundled Mozilla roots are
    /// used if unset or empty.
    pub root_cas: Option<ExternalCertPool>,
    /// Trust anchors for verifying clients. If this yields any certificate
    /// then every client must present a certificate which verifies.
    pub client_cas: Option<ExternalCertPool>,
    /// Name the server's certificate is verified against, in place of the
    /// name the client connects to.
    pub server_name: Option<String>,
    /// Skip verification of the server's certificate chain and name.
    pub insecure_skip_verify: bool,
    /// ALPN protocols, in order of preference.
    pub next_protos: Vec<String>,
    /// Lowest acceptable version. Defaults to [`TlsVersion::LATEST`].
    pub min_version: Option<TlsVersion>,
    /// Highest acceptable version. Raised to the minimum if lower.
    pub max_version: Option<TlsVersion>,
    /// Name policy applied to peer certificates.
    pub peer_verify: Option<PeerVerifyConfig>,
}

/// Build a [`TlsConfig`] from `config`, or `None` if `config` is absent.
///
/// `extra` verifiers run after the declared `peer_verify` policy.
pub fn build<I>(config: Option<&Config>, extra: I) -> Result<Option<TlsConfig>, TlsConfigError>
where
    I: IntoIterator<Item = Arc<dyn PeerVerifier>>,
{
    config.map(|c| c.build(extra)).transpose()
}

fn effective_versions(
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
) -> (TlsVersion, TlsVersion) {
    let min = min_version.unwrap_or(TlsVersion::LATEST);
    let max = match max_version {
        Some(max) if max < min => {
            log::warn!(
                "TLS max_version {} is below min_version {}; using {}",
                max,
                min,
                min
            );
            min
        }
        Some(max) => max,
        None => TlsVersion::LATEST,
    };
    (min, max)
}

impl Config {
    /// Build with the default [`CryptoProvider`].
    pub fn build<I>(&self, extra: I) -> Result<TlsConfig, TlsConfigError>
    where
        I: IntoIterator<Item = Arc<dyn PeerVerifier>>,
    {
        self.build_with_provider(&crate::crypto_provider::default_provider(), extra)
    }

    /// Build with the given [`CryptoProvider`]. Its cipher suites are
    /// restricted before use.
    pub fn build_with_provider<I>(
        &self,
        provider: &CryptoProvider,
        extra: I,
    ) -> Result<TlsConfig, TlsConfigError>
    where
        I: IntoIterator<Item = Arc<dyn PeerVerifier>>,
    {
        let next_protos = if self.next_protos.is_empty() {
            vec![DEFAULT_NEXT_PROTO.to_owned()]
        } else {
            self.next_protos.clone()
        };

        let (min_version, max_version) = effective_versions(self.min_version, self.max_version);

        let crypto_provider = Arc::new(crate::crypto_provider::restrict_cipher_suites(provider));

        let peer_verifiers = PeerVerifiers::default()
            .append(self.peer_verify.as_ref().and_then(PeerVerifyConfig::verifier))
            .append(extra);

        let server_name = self
            .server_name
            .as_ref()
            .map(|name| {
                ServerName::try_from(name.clone())
                    .map_err(|_| TlsConfigError::InvalidServerName(name.clone()))
            })
            .transpose()?;

        let certificates = self
            .certificates
            .append_to(&crypto_provider, Vec::new())
            .map_err(|p| {
                log::error!(
                    "Loaded {} of {} TLS certificates before failing",
                    p.loaded.len(),
                    self.certificates.len()
                );
                TlsConfigError::Certificates(p.error)
            })?;

        let root_cas = match self.root_cas {
            Some(ref pool) => non_empty(
                "root_cas",
                load_pool("root_cas", pool).map_err(TlsConfigError::RootCAs)?,
            ),
            None => None,
        };

        let client_cas = match self.client_cas {
            Some(ref pool) => non_empty(
                "client_cas",
                load_pool("client_cas", pool).map_err(TlsConfigError::ClientCAs)?,
            ),
            None => None,
        };
        let client_auth_required = client_cas.is_some();

        if self.insecure_skip_verify {
            log::warn!("TLS server certificate verification is disabled");
        }
        log::info!(
            "TLS configuration: {} certificate(s), versions {}..={}, client auth {}, {} peer verifier(s)",
            certificates.len(),
            min_version,
            max_version,
            if client_auth_required {
                "required"
            } else {
                "off"
            },
            peer_verifiers.len()
        );

        Ok(TlsConfig {
            crypto_provider,
            min_version,
            max_version,
            certificates,
            root_cas,
            client_cas,
            client_auth_required,
            server_name,
            insecure_skip_verify: self.insecure_skip_verify,
            next_protos,
            peer_verifiers,
        })
    }
}

fn load_pool(what: &str, pool: &ExternalCertPool) -> Result<RootCertStore, LoadError> {
    let mut store = RootCertStore::empty();
    pool.append_to(&mut store).map_err(|p| {
        log::error!(
            "Loaded {} TLS {} certificate(s) before failing",
            p.loaded,
            what
        );
        p.error
    })?;
    Ok(store)
}

fn non_empty(what: &str, store: RootCertStore) -> Option<Arc<RootCertStore>> {
    if store.is_empty() {
        log::warn!("TLS {} is declared but contains no certificates; ignoring", what);
        None
    } else {
        Some(Arc::new(store))
    }
}

/// A validated TLS configuration, ready to produce [`ServerConfig`] and
/// [`ClientConfig`] values.
///
/// Cheap to clone. Nothing in it changes after construction, so it may be
/// shared by any number of concurrent handshakes.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    crypto_provider: Arc<CryptoProvider>,
    min_version: TlsVersion,
    max_version: TlsVersion,
    certificates: Vec<Arc<CertifiedKey>>,
    root_cas: Option<Arc<RootCertStore>>,
    client_cas: Option<Arc<RootCertStore>>,
    client_auth_required: bool,
    server_name: Option<ServerName<'static>>,
    insecure_skip_verify: bool,
    next_protos: Vec<String>,
    peer_verifiers: PeerVerifiers,
}

impl TlsConfig {
    /// Provider with the restricted cipher suites.
    pub fn crypto_provider(&self) -> &Arc<CryptoProvider> {
        &self.crypto_provider
    }

    /// Loaded identity certificates, in declaration order.
    pub fn certificates(&self) -> &[Arc<CertifiedKey>] {
        &self.certificates
    }

    /// The declared root CA pool, if it contains anything.
    pub fn root_cas(&self) -> Option<&Arc<RootCertStore>> {
        self.root_cas.as_ref()
    }

    /// The declared client CA pool, if it contains anything.
    pub fn client_cas(&self) -> Option<&Arc<RootCertStore>> {
        self.client_cas.as_ref()
    }

    /// Whether servers require and verify a client certificate.
    pub fn client_auth_required(&self) -> bool {
        self.client_auth_required
    }

    /// Name server certificates are verified against, if fixed.
    pub fn server_name(&self) -> Option<&ServerName<'static>> {
        self.server_name.as_ref()
    }

    /// Whether server certificate verification is skipped.
    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    /// Effective ALPN protocols.
    pub fn next_protos(&self) -> &[String] {
        &self.next_protos
    }

    /// Effective minimum version.
    pub fn min_version(&self) -> TlsVersion {
        self.min_version
    }

    /// Effective maximum version.
    pub fn max_version(&self) -> TlsVersion {
        self.max_version
    }

    /// Versions between the effective minimum and maximum, inclusive.
    pub fn protocol_versions(&self) -> Vec<&'static SupportedProtocolVersion> {
        TlsVersion::ALL
            .into_iter()
            .filter(|v| (self.min_version..=self.max_version).contains(v))
            .map(TlsVersion::supported)
            .collect()
    }

    /// Cipher suites that may be negotiated.
    pub fn cipher_suites(&self) -> &[SupportedCipherSuite] {
        &self.crypto_provider.cipher_suites
    }

    /// The peer verification chain installed on produced configurations.
    pub fn peer_verifiers(&self) -> &PeerVerifiers {
        &self.peer_verifiers
    }

    fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        self.next_protos
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect()
    }

    fn resolver(&self) -> Arc<CertificateResolver> {
        Arc::new(CertificateResolver(self.certificates.clone()))
    }

    /// Returns a TLS [`ServerConfig`]. At least one certificate must be
    /// configured.
    pub fn server_config(&self) -> Result<ServerConfig, TlsConfigError> {
        if self.certificates.is_empty() {
            return Err(TlsConfigError::NoServerCertificate);
        }
        let builder = ServerConfig::builder_with_provider(Arc::clone(&self.crypto_provider))
            .with_protocol_versions(&self.protocol_versions())?;
        let builder = match self.client_cas {
            Some(ref roots) if self.client_auth_required => {
                let verifier = WebPkiClientVerifier::builder_with_provider(
                    Arc::clone(roots),
                    Arc::clone(&self.crypto_provider),
                )
                .build()?;
                if self.peer_verifiers.is_empty() {
                    builder.with_client_cert_verifier(verifier)
                } else {
                    builder.with_client_cert_verifier(Arc::new(PeerCheckingClientVerifier::new(
                        verifier,
                        self.peer_verifiers.clone(),
                    )))
                }
            }
            _ => {
                if !self.peer_verifiers.is_empty() {
                    log::warn!(
                        "Peer verifiers are configured but client certificates are not requested"
                    );
                }
                builder.with_no_client_auth()
            }
        };
        let mut sc = builder.with_cert_resolver(self.resolver());
        sc.alpn_protocols = self.alpn_protocols();
        Ok(sc)
    }

    /// Returns a TLS [`ClientConfig`]. The first certificate, if any, is
    /// presented to servers that ask for one.
    pub fn client_config(&self) -> Result<ClientConfig, TlsConfigError> {
        let builder = ClientConfig::builder_with_provider(Arc::clone(&self.crypto_provider))
            .with_protocol_versions(&self.protocol_versions())?;
        let roots = self
            .root_cas
            .clone()
            .unwrap_or_else(|| Arc::new(default_roots()));
        let builder = if self.insecure_skip_verify
            || self.server_name.is_some()
            || !self.peer_verifiers.is_empty()
        {
            let inner = if self.insecure_skip_verify {
                None
            } else {
                Some(
                    WebPkiServerVerifier::builder_with_provider(
                        roots,
                        Arc::clone(&self.crypto_provider),
                    )
                    .build()?,
                )
            };
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(PeerCheckingServerVerifier::new(
                    inner,
                    self.server_name.clone(),
                    self.peer_verifiers.clone(),
                    self.crypto_provider.signature_verification_algorithms,
                )))
        } else {
            builder.with_root_certificates(roots)
        };
        let mut cc = if self.certificates.is_empty() {
            builder.with_no_client_auth()
        } else {
            builder.with_client_cert_resolver(self.resolver())
        };
        cc.alpn_protocols = self.alpn_protocols();
        Ok(cc)
    }
}

fn default_roots() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Serves the certificate whose names match the SNI, or the first one.
#[derive(Debug)]
struct CertificateResolver(Vec<Arc<CertifiedKey>>);

fn valid_for_name(certified_key: &CertifiedKey, name: &ServerName<'_>) -> bool {
    certified_key
        .end_entity_cert()
        .ok()
        .and_then(|der| ParsedCertificate::try_from(der).ok())
        .map(|parsed| rustls::client::verify_server_name(&parsed, name).is_ok())
        .unwrap_or(false)
}

impl CertificateResolver {
    fn select(&self, sni: Option<&str>) -> Option<Arc<CertifiedKey>> {
        sni.and_then(|sni| ServerName::try_from(sni).ok())
            .and_then(|name| self.0.iter().find(|c| valid_for_name(c, &name)))
            .or_else(|| self.0.first())
            .cloned()
    }
}

impl ResolvesServerCert for CertificateResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.select(client_hello.server_name())
    }
}

impl ResolvesClientCert for CertificateResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.0.first().cloned()
    }

    fn has_certs(&self) -> bool {
        !self.0.is_empty()
    }
}
