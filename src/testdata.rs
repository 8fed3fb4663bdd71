use rustls_pki_types::CertificateDer;
use std::io::Cursor;
use std::path::PathBuf;

use crate::files::ExternalCertificate;

pub(crate) const CACERT: &[u8] = include_bytes!("../testdata/ca.pem");
pub(crate) const USER1_CERT: &[u8] = include_bytes!("../testdata/user1.pem");
pub(crate) const USER1_KEY: &[u8] = include_bytes!("../testdata/user1.key");
pub(crate) const USER2_CERT: &[u8] = include_bytes!("../testdata/user2.pem");
pub(crate) const USER2_KEY: &[u8] = include_bytes!("../testdata/user2.key");
pub(crate) const SELFSIGNED_CERT: &[u8] = include_bytes!("../testdata/selfsigned.pem");
pub(crate) const SELFSIGNED_KEY: &[u8] = include_bytes!("../testdata/selfsigned.key");

/// First certificate in a PEM blob.
pub(crate) fn der(pem: &[u8]) -> CertificateDer<'static> {
    rustls_pemfile::certs(&mut Cursor::new(pem))
        .next()
        .expect("a certificate")
        .expect("valid PEM")
}

/// A key, its certificate and the test CA written into a temporary directory.
pub(crate) struct CertAndKeyFiles {
    pub(crate) dir: tempfile::TempDir,
}

impl CertAndKeyFiles {
    fn new(key: &[u8], cert: &[u8]) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("key"), key)?;
        std::fs::write(dir.path().join("cert"), cert)?;
        std::fs::write(dir.path().join("cacert"), CACERT)?;
        Ok(Self { dir })
    }

    pub(crate) fn user1() -> std::io::Result<Self> {
        Self::new(USER1_KEY, USER1_CERT)
    }

    pub(crate) fn user2() -> std::io::Result<Self> {
        Self::new(USER2_KEY, USER2_CERT)
    }

    pub(crate) fn selfsigned() -> std::io::Result<Self> {
        Self::new(SELFSIGNED_KEY, SELFSIGNED_CERT)
    }

    pub(crate) fn key_path(&self) -> PathBuf {
        self.dir.path().join("key")
    }

    pub(crate) fn cert_path(&self) -> PathBuf {
        self.dir.path().join("cert")
    }

    pub(crate) fn cacert_path(&self) -> PathBuf {
        self.dir.path().join("cacert")
    }

    /// Write another file next to the fixtures and return its path.
    pub(crate) fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write test file");
        path
    }

    pub(crate) fn external(&self) -> ExternalCertificate {
        ExternalCertificate::new(self.cert_path(), self.key_path())
    }
}
