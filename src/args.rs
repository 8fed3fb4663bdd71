//! Command line flags which produce a [`Config`].
//!
//! Flatten [`Args`] into an application's own [`clap::Parser`] and call
//! [`Args::to_config`]. Certificate and key paths are repeatable and are
//! paired up in the order given.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::{Config, TlsVersion};
use crate::files::{ExternalCertPool, ExternalCertificate, ExternalCertificates};
use crate::verify::PeerVerifyConfig;

/// Error type returned by [`Args::to_config`].
#[derive(Debug, Error)]
pub enum ArgsError {
    /// Every `--tls-cert-path` needs a `--tls-key-path` and vice versa.
    #[error("{certs} --tls-cert-path flag(s) but {keys} --tls-key-path flag(s)")]
    UnpairedCertificates {
        /// Number of certificate paths given.
        certs: usize,
        /// Number of key paths given.
        keys: usize,
    },
}

/// Command line arguments for building a [`Config`].
#[derive(clap::Args, Debug, Default)]
#[group(id = "declarative_tls_args")]
pub struct Args {
    #[arg(
        long,
        help = "Path to a TLS certificate chain in PEM format. May be repeated; each needs a matching --tls-key-path."
    )]
    tls_cert_path: Vec<PathBuf>,

    #[arg(
        long,
        help = "Path to a TLS private key in PEM format. May be repeated, in the same order as --tls-cert-path."
    )]
    tls_key_path: Vec<PathBuf>,

    #[arg(
        long,
        help = "Path to PEM root certificates for verifying servers. If unset, the built-in public roots are used."
    )]
    tls_root_ca: Vec<PathBuf>,

    #[arg(
        long,
        help = "Path to PEM root certificates for verifying clients. If set, clients must present a certificate."
    )]
    tls_client_ca: Vec<PathBuf>,

    #[arg(
        long,
        help = "Name to verify server certificates against instead of the host connected to."
    )]
    tls_server_name: Option<String>,

    #[arg(long, help = "Do not verify server certificates. Insecure.")]
    tls_insecure_skip_verify: bool,

    #[arg(
        long,
        help = "ALPN protocol to negotiate. May be repeated, most preferred first. Default http/1.1."
    )]
    tls_next_proto: Vec<String>,

    #[arg(long, help = "Minimum TLS version (1.2 or 1.3). Default 1.3.")]
    tls_min_version: Option<TlsVersion>,

    #[arg(long, help = "Maximum TLS version (1.2 or 1.3). Default 1.3.")]
    tls_max_version: Option<TlsVersion>,

    #[arg(
        long,
        help = "Accept only peers with a DNS name or common name ending in this suffix. May be repeated."
    )]
    tls_peer_dns_suffix: Vec<String>,

    #[arg(
        long,
        help = "Accept only peers with exactly this common name. May be repeated."
    )]
    tls_peer_common_name: Vec<String>,
}

impl Args {
    /// The configuration described by the flags, or `None` if no TLS flag
    /// was given at all.
    pub fn to_config(&self) -> Result<Option<Config>, ArgsError> {
        if self.tls_cert_path.len() != self.tls_key_path.len() {
            return Err(ArgsError::UnpairedCertificates {
                certs: self.tls_cert_path.len(),
                keys: self.tls_key_path.len(),
            });
        }
        let peer_verify = PeerVerifyConfig {
            dns_suffixes: self.tls_peer_dns_suffix.clone(),
            common_names: self.tls_peer_common_name.clone(),
        };
        let config = Config {
            certificates: ExternalCertificates(
                self.tls_cert_path
                    .iter()
                    .zip(self.tls_key_path.iter())
                    .map(|(cert, key)| ExternalCertificate::new(cert, key))
                    .collect(),
            ),
            root_cas: pool(&self.tls_root_ca),
            client_cas: pool(&self.tls_client_ca),
            server_name: self.tls_server_name.clone(),
            insecure_skip_verify: self.tls_insecure_skip_verify,
            next_protos: self.tls_next_proto.clone(),
            min_version: self.tls_min_version,
            max_version: self.tls_max_version,
            peer_verify: (!peer_verify.is_empty()).then_some(peer_verify),
        };
        if config == Config::default() {
            Ok(None)
        } else {
            Ok(Some(config))
        }
    }
}

fn pool(paths: &[PathBuf]) -> Option<ExternalCertPool> {
    (!paths.is_empty()).then(|| ExternalCertPool(paths.to_vec()))
}
