//! Declarative TLS configuration for rustls
//!
//! A [`Config`] names the files holding an endpoint's identity certificates
//! and trust pools, along with the protocol versions, application protocols,
//! and peer name policy it wants. Any number of such configurations can be
//! deserialised with serde or collected from command line flags ([`Args`]).
//! [`build`] loads and validates the files named, applies secure defaults
//! to everything left unset, and returns a [`TlsConfig`] from which
//! [`rustls::ServerConfig`] and [`rustls::ClientConfig`] values are made.
//!
//! Applications may impose their own checks on peers by supplying
//! [`PeerVerifier`] implementations which run after standard chain
//! validation, and after the name policy declared in the configuration.
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use declarative_tls::{Config, ExternalCertificate, ExternalCertPool};
//!
//! let config = Config {
//!     certificates: vec![ExternalCertificate::new("/tls/tls.crt", "/tls/tls.key")].into(),
//!     client_cas: Some(vec!["/tls/ca.crt".into()].into()),
//!     ..Config::default()
//! };
//! let tls = declarative_tls::build(Some(&config), [])?.expect("configured");
//! let server_config = tls.server_config()?;
//! # drop(server_config);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "args")]
pub mod args;
pub mod config;
pub mod crypto_provider;
pub mod files;
#[cfg(test)]
mod testdata;
pub mod verify;

#[cfg(feature = "args")]
pub use args::{Args, ArgsError};
pub use config::{Config, TlsConfig, TlsConfigError, TlsVersion, build};
pub use files::{ExternalCertPool, ExternalCertificate, ExternalCertificates, LoadError};
pub use verify::{PeerVerificationError, PeerVerifier, PeerVerifiers, PeerVerifyConfig};
