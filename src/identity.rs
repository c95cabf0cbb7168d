//! Caller identity derived from the client certificate
//!
//! The leaf certificate's first DNS subject alternative name must end with
//! the configured suffix; the identity is that name with the suffix removed.
//! The check runs inside the TLS verifier (so bad certificates never finish
//! the handshake) and again per request on the peer chain the session kept.

use std::fmt;

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::*;

use crate::error::{GatewayError, Result};

/// Verified caller identity, e.g. `alice` for `alice.example.com`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the identity from a verified peer chain (leaf first).
///
/// Fails when there is no chain, the chain is empty, the leaf carries no DNS
/// alternative name, or its first DNS name lacks `suffix`.
pub fn authenticate(chain: Option<&[CertificateDer<'_>]>, suffix: &str) -> Result<Identity> {
    let chain = chain.ok_or_else(|| GatewayError::auth("no verified certificate chain"))?;
    let leaf = chain
        .first()
        .ok_or_else(|| GatewayError::auth("verified certificate chain is empty"))?;
    identity_from_leaf(leaf, suffix)
}

/// Derive the identity from a single leaf certificate.
pub fn identity_from_leaf(leaf: &CertificateDer<'_>, suffix: &str) -> Result<Identity> {
    let name = primary_dns_name(leaf)?;
    strip_suffix(&name, suffix)
}

/// First DNS-type subject alternative name of the certificate
pub fn primary_dns_name(cert: &CertificateDer<'_>) -> Result<String> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| GatewayError::auth(format!("certificate parse failed: {}", e)))?;

    let san = parsed
        .subject_alternative_name()
        .map_err(|e| GatewayError::auth(format!("invalid subjectAltName extension: {}", e)))?
        .ok_or_else(|| GatewayError::auth("certificate has no subjectAltName"))?;

    san.value
        .general_names
        .iter()
        .find_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            _ => None,
        })
        .ok_or_else(|| GatewayError::auth("certificate has no DNS alternative name"))
}

fn strip_suffix(name: &str, suffix: &str) -> Result<Identity> {
    match name.strip_suffix(suffix) {
        Some(identity) => Ok(Identity(identity.to_string())),
        None => Err(GatewayError::auth(format!(
            "certificate name {} does not end with {}",
            name, suffix
        ))),
    }
}
