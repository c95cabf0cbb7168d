// Body Size Limiter - bounded collection of HTTP/2 request bodies
// Used for non-CONNECT requests, which are forwarded with a Content-Length

use bytes::{Bytes, BytesMut};
use h2::RecvStream;
use tracing::warn;

use crate::error::{GatewayError, Result};

/// Collect a request body, failing as soon as it exceeds `max_size`.
///
/// Flow-control capacity is released per frame so the client keeps sending.
pub async fn read_body_with_limit(mut body: RecvStream, max_size: usize) -> Result<Bytes> {
    let mut collected = BytesMut::new();
    let mut total_size = 0;

    while let Some(data) = body.data().await {
        let data =
            data.map_err(|e| GatewayError::MalformedRequest(format!("reading request body: {}", e)))?;
        let _ = body.flow_control().release_capacity(data.len());

        total_size += data.len();
        // Check size limit BEFORE adding to buffer
        if total_size > max_size {
            warn!(
                "[Body Limiter] Request body exceeded limit: {} bytes (limit: {})",
                total_size, max_size
            );
            return Err(GatewayError::BodyTooLarge { limit: max_size });
        }

        collected.extend_from_slice(&data);
    }

    Ok(collected.freeze())
}
