use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

use crate::config::Config;
use crate::tls;

/// Reloadable TLS acceptor that supports atomic configuration updates
pub struct ReloadableTlsAcceptor {
    acceptor: Arc<RwLock<TlsAcceptor>>,
    ca_path: String,
    cert_path: String,
    key_path: String,
    suffix: String,
}

impl ReloadableTlsAcceptor {
    /// Create a new reloadable TLS acceptor
    pub fn new(ca_path: String, cert_path: String, key_path: String, suffix: String) -> Result<Self> {
        let acceptor = tls::create_tls_acceptor(&ca_path, &cert_path, &key_path, &suffix)?;

        Ok(Self {
            acceptor: Arc::new(RwLock::new(acceptor)),
            ca_path,
            cert_path,
            key_path,
            suffix,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.ca_cert_path.clone(),
            config.cert_path.clone(),
            config.key_path.clone(),
            config.dns_suffix.clone(),
        )
    }

    /// Get a clone of the current TLS acceptor
    pub async fn get(&self) -> TlsAcceptor {
        self.acceptor.read().await.clone()
    }

    /// Reload the CA bundle, certificate and key from disk and swap the
    /// acceptor atomically. On failure the current acceptor stays in place.
    pub async fn reload(&self) -> Result<()> {
        info!("Reloading TLS material...");
        info!("CA bundle: {}", self.ca_path);
        info!("Certificate path: {}", self.cert_path);
        info!("Key path: {}", self.key_path);

        let new_acceptor = match tls::create_tls_acceptor(
            &self.ca_path,
            &self.cert_path,
            &self.key_path,
            &self.suffix,
        ) {
            Ok(acceptor) => {
                info!("Successfully loaded new TLS material");
                acceptor
            }
            Err(e) => {
                error!("Failed to load new TLS material: {}", e);
                error!("Keeping existing certificates");
                return Err(e);
            }
        };

        // Atomically swap the acceptor
        {
            let mut acceptor = self.acceptor.write().await;
            *acceptor = new_acceptor;
        }

        info!("TLS material reloaded; new connections will use it");
        Ok(())
    }

    /// Paths of the CA bundle, certificate and key
    pub fn cert_paths(&self) -> (&str, &str, &str) {
        (&self.ca_path, &self.cert_path, &self.key_path)
    }
}

impl Clone for ReloadableTlsAcceptor {
    fn clone(&self) -> Self {
        Self {
            acceptor: Arc::clone(&self.acceptor),
            ca_path: self.ca_path.clone(),
            cert_path: self.cert_path.clone(),
            key_path: self.key_path.clone(),
            suffix: self.suffix.clone(),
        }
    }
}
