use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use certgate::{server, Config, ReloadableTlsAcceptor};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    info!("Starting {} {}", certgate::NAME, certgate::VERSION);

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    info!(
        upstream = %config.upstream_addr,
        suffix = %config.dns_suffix,
        "Configuration loaded"
    );

    // Setup reloadable mTLS acceptor
    let tls_acceptor = ReloadableTlsAcceptor::from_config(&config)?;
    info!("TLS 1.3 configured with client certificates required, ALPN: h2, http/1.1");
    info!("Certificate hot-reload enabled via SIGHUP");

    // Bind TCP listener
    let bind_addr = config.listen_addr();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);

    let _reload_handle = tokio::spawn(reload_signal_handler(tls_acceptor.clone()));

    tokio::select! {
        _ = server::accept_loop(listener, tls_acceptor, config) => {}
        _ = shutdown_signal() => {
            info!("Shutting down server...");
        }
    }

    Ok(())
}

/// Certificate reload signal handler (SIGHUP)
async fn reload_signal_handler(tls_acceptor: ReloadableTlsAcceptor) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };

        while sighup.recv().await.is_some() {
            info!("SIGHUP received - initiating certificate reload");

            if let Err(e) = tls_acceptor.reload().await {
                error!("Certificate reload failed: {}", e);
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tls_acceptor;
        info!("Certificate hot-reload via SIGHUP not supported on this platform");
        std::future::pending::<()>().await;
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    // Handle SIGINT (Ctrl+C)
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
