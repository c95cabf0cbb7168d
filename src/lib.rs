//! Certgate - Authenticating Forward-Proxy Gateway
//!
//! Certgate terminates mutually authenticated TLS from trusted clients,
//! derives a caller identity from the client certificate, and relays the
//! traffic (plain requests and CONNECT tunnels, over HTTP/1.1 and HTTP/2) to
//! a fixed upstream HTTP proxy with the identity injected as
//! `Proxy-Authorization` credentials.
//!
//! ## Identity
//!
//! The client certificate's first DNS subject alternative name must end with
//! the configured suffix; the identity is that name with the suffix removed.
//! `alice.example.com` with suffix `.example.com` becomes `alice`, and the
//! upstream sees `Proxy-Authorization: Basic base64("alice:automatic")`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use certgate::{server, Config, ReloadableTlsAcceptor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::new("127.0.0.1:3128", ".example.com"));
//!     let acceptor = ReloadableTlsAcceptor::from_config(&config)?;
//!     let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
//!     server::accept_loop(listener, acceptor, config).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - `server` - TLS accept, ALPN dispatch and the per-request handler
//! - `tunnel` - raw hijack relay (HTTP/1) vs stream relay (HTTP/2)
//! - `relay` - flushing duplex copy with half-close
//! - `identity` / `rewrite` - certificate identity and upstream request
//! - `tls` / `reload` - mTLS configuration and hot reload

// Core proxy modules
pub mod config;
pub mod error;
pub mod server;
pub mod tunnel;

// Identity and request rewriting
pub mod identity;
pub mod rewrite;

// Wire handling
pub mod body_limiter;
pub mod h2_io;
pub mod http1;
pub mod upstream;
pub mod wire;

// Relay engine
pub mod buffer_pool;
pub mod relay;

// TLS utilities
pub mod reload;
pub mod tls;

// Re-export commonly used types

/// Configuration types
pub use config::Config;

/// Errors
pub use error::{GatewayError, Result};

/// Identity
pub use identity::{authenticate, Identity};

/// Relay
pub use relay::{relay, RelayWrite};
pub use tunnel::TunnelMode;

/// TLS
pub use reload::ReloadableTlsAcceptor;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
