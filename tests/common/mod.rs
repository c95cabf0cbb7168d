//! Shared fixtures for gateway integration tests: a throwaway PKI, mTLS
//! client configs, an in-process gateway and helpers for mock upstreams.
#![allow(dead_code)]

use bytes::Bytes;
use certgate::{server, Config};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub const SUFFIX: &str = ".example.com";

pub struct TestPki {
    ca: rcgen::Certificate,
    ca_key: KeyPair,
}

impl TestPki {
    pub fn new() -> Self {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        params
            .distinguished_name
            .push(DnType::CommonName, "certgate integration CA");
        let ca_key = KeyPair::generate().unwrap();
        let ca = params.self_signed(&ca_key).unwrap();
        Self { ca, ca_key }
    }

    pub fn ca_pem(&self) -> String {
        self.ca.pem()
    }

    pub fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca.der().clone()).unwrap();
        roots
    }

    fn issue(
        &self,
        dns_name: &str,
        usage: ExtendedKeyUsagePurpose,
    ) -> (rcgen::Certificate, KeyPair) {
        let mut params = CertificateParams::new(vec![dns_name.to_string()]).unwrap();
        params.extended_key_usages = vec![usage];
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.ca, &self.ca_key).unwrap();
        (cert, key)
    }

    /// Server certificate for `localhost`, as (cert PEM, key PEM)
    pub fn server_pem(&self) -> (String, String) {
        let (cert, key) = self.issue("localhost", ExtendedKeyUsagePurpose::ServerAuth);
        (cert.pem(), key.serialize_pem())
    }

    pub fn server_cert(&self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        let (cert, key) = self.issue("localhost", ExtendedKeyUsagePurpose::ServerAuth);
        (vec![cert.der().clone()], pkcs8(&key))
    }

    pub fn client_cert(&self, dns_name: &str) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        let (cert, key) = self.issue(dns_name, ExtendedKeyUsagePurpose::ClientAuth);
        (vec![cert.der().clone()], pkcs8(&key))
    }

    /// TLS 1.3 client presenting a certificate for `dns_name`
    pub fn client_config(&self, dns_name: &str, alpn: &[&[u8]]) -> Arc<ClientConfig> {
        let (chain, key) = self.client_cert(dns_name);
        let mut config = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
            .with_root_certificates(self.roots())
            .with_client_auth_cert(chain, key)
            .unwrap();
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
        Arc::new(config)
    }
}

fn pkcs8(key: &KeyPair) -> PrivateKeyDer<'static> {
    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()))
}

pub fn test_config(upstream_addr: &str) -> Config {
    let mut config = Config::new(upstream_addr, SUFFIX);
    config.connect_timeout = Duration::from_millis(500);
    config.relay_idle_timeout = Some(Duration::from_secs(10));
    config
}

/// Run a gateway on an ephemeral port in front of `upstream_addr`
pub async fn spawn_gateway(pki: &TestPki, upstream_addr: &str) -> SocketAddr {
    let (chain, key) = pki.server_cert();
    let tls_config = certgate::tls::server_config(pki.roots(), chain, key, SUFFIX).unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let config = Arc::new(test_config(upstream_addr));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                let _ = server::serve_tls(stream, peer, acceptor, config).await;
            });
        }
    });

    addr
}

/// Address nothing listens on
pub async fn closed_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

pub async fn connect_tls(
    gateway: SocketAddr,
    config: Arc<ClientConfig>,
) -> std::io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(gateway).await?;
    let server_name = ServerName::try_from("localhost").unwrap();
    TlsConnector::from(config).connect(server_name, tcp).await
}

pub async fn h2_client(stream: TlsStream<TcpStream>) -> h2::client::SendRequest<Bytes> {
    let (client, conn) = h2::client::handshake(stream).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });
    client.ready().await.unwrap()
}

/// Read up to and including the blank line ending an HTTP head.
///
/// Returns the head as text and any bytes read past it.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> (String, Vec<u8>) {
    let mut data = Vec::new();
    let mut buffer = [0_u8; 1024];
    loop {
        if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = data.split_off(end + 4);
            return (String::from_utf8_lossy(&data).into_owned(), rest);
        }
        let read = stream.read(&mut buffer).await.unwrap();
        assert!(read > 0, "stream closed before end of head");
        data.extend_from_slice(&buffer[..read]);
    }
}

/// Deterministic payload so each tunnel's bytes are distinguishable
pub fn payload(seed: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + seed * 7) % 251) as u8).collect()
}
