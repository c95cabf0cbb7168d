//! Inbound HTTP/1.x connection
//!
//! Reads request heads off the client stream into a buffer so that the
//! connection can be taken over ("hijacked") at any point. On hijack the
//! caller gets the raw stream back together with every byte read past the
//! request head; those bytes must reach the upstream before anything else.

use bytes::{Bytes, BytesMut};
use http::Request;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{GatewayError, Result};
use crate::wire::parse_request_head;

pub struct Http1Conn<S> {
    io: S,
    buf: BytesMut,
}

impl<S> Http1Conn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(8192),
        }
    }

    /// Read the next request head.
    ///
    /// `Ok(None)` means the client closed the connection between requests.
    pub async fn read_request_head(&mut self, max_head: usize) -> Result<Option<Request<()>>> {
        loop {
            if let Some((request, len)) = parse_request_head(&self.buf)? {
                let _ = self.buf.split_to(len);
                return Ok(Some(request));
            }
            if self.buf.len() >= max_head {
                return Err(GatewayError::HeadersTooLarge { limit: max_head });
            }

            let n = self.io.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(GatewayError::MalformedRequest(
                    "connection closed mid-request".to_string(),
                ));
            }
        }
    }

    /// Answer with a plain-text error and ask the client to close.
    pub async fn send_error(&mut self, error: &GatewayError) -> Result<()> {
        let status = error
            .status_code()
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = format!("{}\n", error.response_message());
        let response = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             X-Content-Type-Options: nosniff\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            body.len(),
            body
        );
        self.io.write_all(response.as_bytes()).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Bytes received past the last parsed request head
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Take over the connection.
    pub fn hijack(self) -> (S, Bytes) {
        (self.io, self.buf.freeze())
    }
}
