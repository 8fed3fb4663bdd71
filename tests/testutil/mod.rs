use declarative_tls::{Config, ExternalCertPool, ExternalCertificate, ExternalCertificates};
use futures::future::Either;
use rustls::{ClientConfig, ServerConfig};
use rustls_pki_types::{CertificateDer, ServerName};
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_rustls::{TlsAcceptor, TlsConnector, client, server};

const CACERT: &[u8] = include_bytes!("../../testdata/ca.pem");
const USER1_CERT: &[u8] = include_bytes!("../../testdata/user1.pem");
const USER1_KEY: &[u8] = include_bytes!("../../testdata/user1.key");
const USER2_CERT: &[u8] = include_bytes!("../../testdata/user2.pem");
const USER2_KEY: &[u8] = include_bytes!("../../testdata/user2.key");
const SELFSIGNED_CERT: &[u8] = include_bytes!("../../testdata/selfsigned.pem");
const SELFSIGNED_KEY: &[u8] = include_bytes!("../../testdata/selfsigned.key");

/// Test keys and certificates written to a temporary directory.
pub struct Files {
    dir: tempfile::TempDir,
}

impl Files {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, contents) in [
            ("ca.pem", CACERT),
            ("user1.pem", USER1_CERT),
            ("user1.key", USER1_KEY),
            ("user2.pem", USER2_CERT),
            ("user2.key", USER2_KEY),
            ("selfsigned.pem", SELFSIGNED_CERT),
            ("selfsigned.key", SELFSIGNED_KEY),
        ] {
            std::fs::write(dir.path().join(name), contents).expect("write test file");
        }
        Self { dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Identity `name` (one of user1, user2, selfsigned).
    pub fn identity(&self, name: &str) -> ExternalCertificate {
        ExternalCertificate::new(
            self.path(&format!("{name}.pem")),
            self.path(&format!("{name}.key")),
        )
    }

    /// The certificate of identity `name`, as sent on the wire.
    pub fn certificate(&self, name: &str) -> CertificateDer<'static> {
        let pem = std::fs::read(self.path(&format!("{name}.pem"))).expect("read certificate");
        rustls_pemfile::certs(&mut pem.as_slice())
            .next()
            .expect("a certificate")
            .expect("valid PEM")
    }

    pub fn identities(&self, names: &[&str]) -> ExternalCertificates {
        ExternalCertificates(names.iter().map(|n| self.identity(n)).collect())
    }

    pub fn ca_pool(&self) -> Option<ExternalCertPool> {
        Some(ExternalCertPool(vec![self.path("ca.pem")]))
    }

    /// A server presenting the given identities.
    pub fn server(&self, names: &[&str]) -> Config {
        Config {
            certificates: self.identities(names),
            ..Config::default()
        }
    }

    /// A client trusting the test CA.
    pub fn client(&self) -> Config {
        Config {
            root_cas: self.ca_pool(),
            ..Config::default()
        }
    }
}

pub fn server_config(c: &Config) -> Arc<ServerConfig> {
    Arc::new(
        declarative_tls::build(Some(c), [])
            .expect("build server")
            .expect("configured")
            .server_config()
            .expect("server config"),
    )
}

pub fn client_config(c: &Config) -> Arc<ClientConfig> {
    Arc::new(
        declarative_tls::build(Some(c), [])
            .expect("build client")
            .expect("configured")
            .client_config()
            .expect("client config"),
    )
}

pub type Handshake = (
    std::io::Result<client::TlsStream<DuplexStream>>,
    std::io::Result<server::TlsStream<DuplexStream>>,
);

/// Runs a handshake between `cc` connecting to `name` and `sc`.
///
/// Both ends are driven to completion together, so the pipe must hold
/// whatever the server sends after the client is done (session tickets).
pub async fn handshake(cc: Arc<ClientConfig>, sc: Arc<ServerConfig>, name: &str) -> Handshake {
    let (client, server) = tokio::io::duplex(1 << 16);
    let server_name = ServerName::try_from(name.to_owned()).expect("valid server name");
    let client = TlsConnector::from(cc).connect(server_name, client);
    let server = TlsAcceptor::from(sc).accept(server);
    futures::future::join(client, server).await
}

/// Exchanges a few bytes over an established pair of streams.
pub async fn talk(
    mut client: client::TlsStream<DuplexStream>,
    mut server: server::TlsStream<DuplexStream>,
) {
    let client_task = pin!(async move {
        client
            .write_all(b"hello")
            .await
            .expect("write hello to client");
        let mut buf = vec![0u8; 3];
        client
            .read_exact(&mut buf)
            .await
            .expect("read bye from server");
        assert_eq!(buf, b"bye");
    });
    let server_task = pin!(async move {
        let mut buf = vec![0u8; 5];
        server
            .read_exact(&mut buf)
            .await
            .expect("read hello from client");
        assert_eq!(buf, b"hello");
        server.write_all(b"bye").await.expect("write bye to client");
        server.shutdown().await.expect("shutdown");
    });
    match futures::future::select(client_task, server_task).await {
        Either::Left((_, _)) => (),
        Either::Right((_, client_task)) => client_task.await,
    }
}

/// Handshake which must succeed, followed by a short exchange.
pub async fn connects(cc: Arc<ClientConfig>, sc: Arc<ServerConfig>, name: &str) {
    match handshake(cc, sc, name).await {
        (Ok(client), Ok(server)) => talk(client, server).await,
        (client, server) => panic!(
            "handshake failed: client {:?} server {:?}",
            client.err(),
            server.err()
        ),
    }
}

/// Handshake which must fail on at least one side, then checks the side
/// expected to notice.
pub async fn fails(cc: Arc<ClientConfig>, sc: Arc<ServerConfig>, name: &str, side: Side) {
    let (client, server) = handshake(cc, sc, name).await;
    match side {
        Side::Client => assert!(client.is_err(), "client accepted the server"),
        Side::Server => assert!(server.is_err(), "server accepted the client"),
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Side {
    Client,
    Server,
}
