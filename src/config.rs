use anyhow::{Context, Result};
use std::env;
use std::time::Duration;
use tracing::info;

const DEFAULT_PORT: u16 = 8443;

#[derive(Debug, Clone)]
pub struct Config {
    // Listener
    pub host: String,
    pub port: u16,

    // TLS material
    pub ca_cert_path: String,
    pub cert_path: String,
    pub key_path: String,

    // Identity policy
    pub dns_suffix: String,

    // Upstream proxy
    pub upstream_addr: String,
    pub connect_timeout: Duration,

    // Relay and request limits
    pub relay_idle_timeout: Option<Duration>,
    pub max_header_bytes: usize,
    pub max_request_body_size: usize,
    pub h2_max_concurrent_streams: u32,
}

impl Config {
    /// Defaults for everything except the upstream address and the
    /// required certificate-name suffix.
    pub fn new(upstream_addr: impl Into<String>, dns_suffix: impl Into<String>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            ca_cert_path: "cacert.pem".to_string(),
            cert_path: "cert.pem".to_string(),
            key_path: "key.pem".to_string(),
            dns_suffix: dns_suffix.into(),
            upstream_addr: upstream_addr.into(),
            connect_timeout: Duration::from_millis(2000),
            relay_idle_timeout: Some(Duration::from_secs(300)),
            max_header_bytes: 1024 * 1024,
            max_request_body_size: 100 * 1024 * 1024,
            h2_max_concurrent_streams: 250,
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let upstream_addr = env::var("PROXY_ADDR")
            .context("PROXY_ADDR environment variable is required (upstream proxy host:port)")?;
        if upstream_addr.trim().is_empty() {
            return Err(anyhow::anyhow!("PROXY_ADDR cannot be empty"));
        }

        let dns_suffix = env::var("CERTIFICATE_DNS_SUFFIX")
            .context("CERTIFICATE_DNS_SUFFIX environment variable is required")?;
        if dns_suffix.is_empty() {
            return Err(anyhow::anyhow!("CERTIFICATE_DNS_SUFFIX cannot be empty"));
        }

        let mut config = Self::new(upstream_addr, dns_suffix);

        config.host = env::var("HOST").unwrap_or(config.host);
        config.port = match env::var("PORT") {
            Ok(port) => port.parse().context("Invalid PORT")?,
            Err(_) => {
                info!("Defaulting to port {}", DEFAULT_PORT);
                DEFAULT_PORT
            }
        };

        config.ca_cert_path = env::var("CA_CERT_PATH").unwrap_or(config.ca_cert_path);
        config.cert_path = env::var("TLS_CERT_PATH").unwrap_or(config.cert_path);
        config.key_path = env::var("TLS_KEY_PATH").unwrap_or(config.key_path);

        let connect_timeout_ms: u64 = env::var("UPSTREAM_CONNECT_TIMEOUT_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .context("Invalid UPSTREAM_CONNECT_TIMEOUT_MS")?;
        config.connect_timeout = Duration::from_millis(connect_timeout_ms);

        let idle_secs: u64 = env::var("RELAY_IDLE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .context("Invalid RELAY_IDLE_TIMEOUT_SECS")?;
        // 0 disables the idle timeout
        config.relay_idle_timeout = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));

        config.max_header_bytes = env::var("MAX_HEADER_BYTES")
            .unwrap_or_else(|_| "1048576".to_string()) // 1MB default
            .parse()
            .context("Invalid MAX_HEADER_BYTES")?;
        config.max_request_body_size = env::var("MAX_REQUEST_BODY_SIZE")
            .unwrap_or_else(|_| "104857600".to_string()) // 100MB default
            .parse()
            .context("Invalid MAX_REQUEST_BODY_SIZE")?;
        config.h2_max_concurrent_streams = env::var("H2_MAX_CONCURRENT_STREAMS")
            .unwrap_or_else(|_| "250".to_string())
            .parse()
            .context("Invalid H2_MAX_CONCURRENT_STREAMS")?;

        Ok(config)
    }

    /// `host:port` the listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
