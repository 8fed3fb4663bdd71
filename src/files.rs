//! Loading of key pairs and trust bundles from PEM files on disk.
//!
//! ```yaml
//! certificates:
//!   - cert_file: /etc/tls/server.pem
//!     key_file: /etc/tls/server.key
//! root_cas: [/etc/tls/ca-bundle.pem]
//! ```
//!
//! Nothing here is cached: every call rereads the files.

use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use rustls_pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error type returned while loading certificates and trust bundles.
#[derive(Debug, Error)]
pub enum LoadError {
    /// One of the two paths of an [`ExternalCertificate`] is empty.
    #[error("certificate required: both cert_file and key_file must be set")]
    CertificateRequired,
    /// A file could not be read.
    #[error("{}: {source}", .path.display())]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A file was read but is not well-formed PEM.
    #[error("{}: malformed PEM: {source}", .path.display())]
    Pem {
        /// Offending file.
        path: PathBuf,
        /// Parse error reported by the PEM reader.
        #[source]
        source: std::io::Error,
    },
    /// The certificate file contains no certificate.
    #[error("no certificate found in {}", .path.display())]
    NoCertificate {
        /// Offending file.
        path: PathBuf,
    },
    /// The key file contains no private key.
    #[error("no private key found in {}", .path.display())]
    NoPrivateKey {
        /// Offending file.
        path: PathBuf,
    },
    /// The private key is unusable or does not belong to the certificate.
    #[error("{}: {source}", .path.display())]
    KeyPair {
        /// Key file of the pair.
        path: PathBuf,
        /// Error reported by rustls.
        #[source]
        source: rustls::Error,
    },
    /// A trust bundle was readable but contributed no usable certificate.
    #[error("unable to add any certificate from {} to the pool", .path.display())]
    UnableToAddCertificate {
        /// Offending bundle.
        path: PathBuf,
    },
}

/// The progress made before a load failed, together with the failure.
#[derive(Debug)]
pub struct PartialLoad<T> {
    /// Whatever was successfully loaded before the failure.
    pub loaded: T,
    /// The error which stopped loading.
    pub error: LoadError,
}

fn read(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_owned(),
        source,
    })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, LoadError> {
    let pem = read(path)?;
    rustls_pemfile::certs(&mut Cursor::new(&pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| LoadError::Pem {
            path: path.to_owned(),
            source,
        })
}

/// A certificate (chain) and its private key, both PEM files on disk.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ExternalCertificate {
    /// File holding the certificate, optionally followed by intermediates.
    pub cert_file: PathBuf,
    /// File holding the private key.
    pub key_file: PathBuf,
}

impl ExternalCertificate {
    /// Refer to a certificate and key pair.
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }

    /// Read and parse the pair. The key is loaded through `provider` and
    /// checked against the end-entity certificate.
    pub fn load(&self, provider: &CryptoProvider) -> Result<Arc<CertifiedKey>, LoadError> {
        if self.cert_file.as_os_str().is_empty() || self.key_file.as_os_str().is_empty() {
            return Err(LoadError::CertificateRequired);
        }

        let cert = read_certs(&self.cert_file)?;
        if cert.is_empty() {
            return Err(LoadError::NoCertificate {
                path: self.cert_file.clone(),
            });
        }

        let key_pem = read(&self.key_file)?;
        let key = rustls_pemfile::private_key(&mut Cursor::new(&key_pem))
            .map_err(|source| LoadError::Pem {
                path: self.key_file.clone(),
                source,
            })?
            .ok_or_else(|| LoadError::NoPrivateKey {
                path: self.key_file.clone(),
            })?;

        let key_pair_error = |source| LoadError::KeyPair {
            path: self.key_file.clone(),
            source,
        };
        let signing_key = provider
            .key_provider
            .load_private_key(key)
            .map_err(key_pair_error)?;
        let certified_key = CertifiedKey::new(cert, signing_key);
        certified_key.keys_match().map_err(key_pair_error)?;
        log::debug!(
            "Loaded TLS certificate {} with key {}",
            self.cert_file.display(),
            self.key_file.display()
        );
        Ok(Arc::new(certified_key))
    }
}

/// An ordered list of [`ExternalCertificate`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExternalCertificates(pub Vec<ExternalCertificate>);

impl ExternalCertificates {
    /// Load every pair in order, appending to `existing`. On failure the
    /// pairs loaded so far are returned alongside the error.
    pub fn append_to(
        &self,
        provider: &CryptoProvider,
        mut existing: Vec<Arc<CertifiedKey>>,
    ) -> Result<Vec<Arc<CertifiedKey>>, PartialLoad<Vec<Arc<CertifiedKey>>>> {
        existing.reserve(self.0.len());
        for c in &self.0 {
            match c.load(provider) {
                Ok(certified_key) => existing.push(certified_key),
                Err(error) => {
                    return Err(PartialLoad {
                        loaded: existing,
                        error,
                    });
                }
            }
        }
        Ok(existing)
    }

    /// Number of declared pairs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no pair is declared.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<ExternalCertificate>> for ExternalCertificates {
    fn from(v: Vec<ExternalCertificate>) -> Self {
        Self(v)
    }
}

/// An ordered list of PEM trust bundles. Each file may hold any number of
/// certificates.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExternalCertPool(pub Vec<PathBuf>);

impl ExternalCertPool {
    /// Add the certificates of every bundle to `pool`, returning how many
    /// certificates were added. Certificates rustls cannot use as trust
    /// anchors are skipped, but a bundle from which none could be added is
    /// an error. The count is kept on failure.
    pub fn append_to(&self, pool: &mut RootCertStore) -> Result<usize, PartialLoad<usize>> {
        let mut count = 0;
        for path in &self.0 {
            let certs = match read_certs(path) {
                Ok(certs) => certs,
                Err(error) => {
                    return Err(PartialLoad {
                        loaded: count,
                        error,
                    });
                }
            };
            let (added, ignored) = pool.add_parsable_certificates(certs);
            if ignored > 0 {
                log::warn!(
                    "Ignored {} unusable certificate(s) in {}",
                    ignored,
                    path.display()
                );
            }
            if added == 0 {
                return Err(PartialLoad {
                    loaded: count,
                    error: LoadError::UnableToAddCertificate { path: path.clone() },
                });
            }
            log::debug!("Loaded {} trust anchor(s) from {}", added, path.display());
            count += added;
        }
        Ok(count)
    }

    /// Build a fresh [`RootCertStore`] from the bundles.
    pub fn to_root_store(&self) -> Result<RootCertStore, LoadError> {
        let mut pool = RootCertStore::empty();
        self.append_to(&mut pool).map_err(|p| p.error)?;
        Ok(pool)
    }

    /// Whether no bundle is declared.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<PathBuf>> for ExternalCertPool {
    fn from(v: Vec<PathBuf>) -> Self {
        Self(v)
    }
}
