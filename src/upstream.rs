//! Upstream proxy connection

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{GatewayError, Result};

/// Open a TCP connection to the upstream proxy within `connect_timeout`.
///
/// No retry: a refused or timed-out dial ends the request attempt.
pub async fn dial(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(GatewayError::UpstreamUnreachable {
                addr: addr.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(GatewayError::UpstreamUnreachable {
                addr: addr.to_string(),
                reason: format!("connect timed out after {:?}", connect_timeout),
            })
        }
    };

    // Tunnel traffic is latency sensitive
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY on upstream connection");
    }
    Ok(stream)
}
