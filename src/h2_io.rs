//! Byte-stream views of a single HTTP/2 stream
//!
//! [`H2Reader`] reads a request body and returns flow-control capacity as it
//! goes. [`H2Writer`] buffers response bytes and only turns them into DATA
//! frames on flush, waiting for send capacity when the peer's window is
//! exhausted. Shutting the writer down flushes and sends END_STREAM.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use h2::server::SendResponse;
use h2::{RecvStream, SendStream};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderValue, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::buffer_pool::BUFFER_SIZE;
use crate::error::{GatewayError, Result};

/// Most bytes an [`H2Writer`] holds before a write forces a flush
const MAX_BUFFERED: usize = BUFFER_SIZE;

fn h2_to_io(e: h2::Error) -> io::Error {
    if e.is_io() {
        e.into_io()
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "HTTP/2 I/O error"))
    } else {
        io::Error::new(io::ErrorKind::Other, e)
    }
}

/// Answer a stream with a plain-text error response.
///
/// Fails if the stream has already sent its response headers.
pub fn send_error(respond: &mut SendResponse<Bytes>, error: &GatewayError) -> Result<()> {
    let status = error
        .status_code()
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Bytes::from(format!("{}\n", error.response_message()));

    let mut response = Response::new(());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

    let mut send_stream = respond
        .send_response(response, false)
        .map_err(|e| GatewayError::internal(format!("failed to send error response: {}", e)))?;
    send_stream
        .send_data(body, true)
        .map_err(|e| GatewayError::internal(format!("failed to send error body: {}", e)))?;
    Ok(())
}

/// Request body of an HTTP/2 stream as an `AsyncRead`
pub struct H2Reader {
    recv: RecvStream,
    pending: Bytes,
}

impl H2Reader {
    pub fn new(recv: RecvStream) -> Self {
        Self {
            recv,
            pending: Bytes::new(),
        }
    }
}

impl AsyncRead for H2Reader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                let chunk = this.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match ready!(this.recv.poll_data(cx)) {
                Some(Ok(data)) => {
                    let _ = this.recv.flow_control().release_capacity(data.len());
                    this.pending = data;
                }
                Some(Err(e)) => return Poll::Ready(Err(h2_to_io(e))),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// Response body of an HTTP/2 stream as an `AsyncWrite`
pub struct H2Writer {
    send: SendStream<Bytes>,
    buffered: BytesMut,
    finished: bool,
}

impl H2Writer {
    pub fn new(send: SendStream<Bytes>) -> Self {
        Self {
            send,
            buffered: BytesMut::with_capacity(MAX_BUFFERED),
            finished: false,
        }
    }

    /// Bytes written but not yet flushed
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    fn poll_send_buffered(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.buffered.is_empty() {
            self.send.reserve_capacity(self.buffered.len());

            let available = self.send.capacity();
            if available == 0 {
                match ready!(self.send.poll_capacity(cx)) {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Poll::Ready(Err(h2_to_io(e))),
                    None => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::BrokenPipe,
                            "HTTP/2 stream closed",
                        )))
                    }
                }
            }

            let n = available.min(self.buffered.len());
            let chunk = self.buffered.split_to(n).freeze();
            self.send.send_data(chunk, false).map_err(h2_to_io)?;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for H2Writer {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "HTTP/2 stream already ended",
            )));
        }
        if this.buffered.len() >= MAX_BUFFERED {
            ready!(this.poll_send_buffered(cx))?;
        }

        let n = buf.len().min(MAX_BUFFERED - this.buffered.len());
        this.buffered.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_send_buffered(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_send_buffered(cx))?;
        if !this.finished {
            this.finished = true;
            this.send.send_data(Bytes::new(), true).map_err(h2_to_io)?;
        }
        Poll::Ready(Ok(()))
    }
}
