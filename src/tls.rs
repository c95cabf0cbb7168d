use anyhow::{Context, Result};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig,
    SignatureScheme,
};
use rustls_pemfile::{certs, private_key};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::warn;

use crate::identity::identity_from_leaf;

/// Load a PEM certificate chain
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer> = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates in {}", path))?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path);
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
    let mut reader = BufReader::new(file);
    private_key(&mut reader)
        .with_context(|| format!("Failed to parse private key in {}", path))?
        .ok_or_else(|| anyhow::anyhow!("No private keys found in {}", path))
}

/// Load the CA bundle client certificates must chain to
pub fn load_ca_roots(path: &str) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .with_context(|| format!("Invalid CA certificate in {}", path))?;
    }
    Ok(roots)
}

/// Client certificate verifier: WebPKI chain validation against the CA
/// bundle, then the certificate-name suffix rule on the leaf
#[derive(Debug)]
pub struct SuffixClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    suffix: String,
}

impl SuffixClientVerifier {
    pub fn new(roots: RootCertStore, suffix: impl Into<String>) -> Result<Self> {
        let inner = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build client verifier: {}", e))?;
        Ok(Self {
            inner,
            suffix: suffix.into(),
        })
    }
}

impl ClientCertVerifier for SuffixClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
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
        let verified = self
            .inner
            .verify_client_cert(end_entity, intermediates, now)?;

        if let Err(e) = identity_from_leaf(end_entity, &self.suffix) {
            warn!("[TLS] Rejecting client certificate: {}", e);
            return Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ));
        }
        Ok(verified)
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

/// mTLS server configuration: TLS 1.3 only, client certificate required
pub fn server_config(
    client_roots: RootCertStore,
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    suffix: &str,
) -> Result<ServerConfig> {
    let verifier = SuffixClientVerifier::new(client_roots, suffix)?;

    let mut tls_config = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(cert_chain, key)
        .map_err(|e| anyhow::anyhow!("Failed to create TLS config: {}", e))?;

    // Advertise both h2 and http/1.1 for ALPN negotiation
    tls_config.alpn_protocols = vec![
        b"h2".to_vec(),       // HTTP/2
        b"http/1.1".to_vec(), // HTTP/1.1 fallback
    ];

    Ok(tls_config)
}

/// Create the TLS acceptor from PEM files on disk
pub fn create_tls_acceptor(
    ca_path: &str,
    cert_path: &str,
    key_path: &str,
    suffix: &str,
) -> Result<TlsAcceptor> {
    let roots = load_ca_roots(ca_path)?;
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let tls_config = server_config(roots, certs, key, suffix)?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
