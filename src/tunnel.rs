//! Tunnel strategy per protocol version
//!
//! HTTP/1 connections are taken over and relayed as raw bytes. HTTP/2
//! streams cannot be taken over (the connection is multiplexed), so the
//! upstream's reply is parsed and replayed as the stream's response and the
//! rest flows through the stream's body in both directions.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use h2::server::SendResponse;
use h2::RecvStream;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, Response, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::h2_io::{send_error, H2Reader, H2Writer};
use crate::http1::Http1Conn;
use crate::relay::{copy_direction, relay};
use crate::wire::{copy_chunked, is_chunked, read_response_head, read_response_head_after};

/// How the client side of a request is relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMode {
    /// Take over the client connection and relay raw bytes
    Hijack,
    /// Relay through the request and response bodies of one stream
    Stream,
}

impl TunnelMode {
    /// Pick the strategy for the inbound protocol version.
    ///
    /// Panics on any version the server never negotiates.
    pub fn for_version(version: Version) -> Self {
        match version {
            Version::HTTP_09 | Version::HTTP_10 | Version::HTTP_11 => TunnelMode::Hijack,
            Version::HTTP_2 => TunnelMode::Stream,
            other => unreachable!("no tunnel strategy for {:?}", other),
        }
    }
}

/// Response headers HTTP/2 does not allow
const CONNECTION_SPECIFIC: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

pub fn is_connection_specific(name: &str) -> bool {
    CONNECTION_SPECIFIC
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

/// Whether a response to `method` with `status` carries a body at all
fn response_has_body(method: &Method, status: StatusCode) -> bool {
    !(method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Read the upstream's final response head, skipping interim 1xx replies.
///
/// `101 Switching Protocols` is final but cannot be carried by an HTTP/2
/// stream, so it is an error.
async fn read_final_head<R>(reader: &mut R, max_head: usize) -> Result<(Response<()>, Bytes)>
where
    R: AsyncRead + Unpin,
{
    let (mut head, mut buffered) = read_response_head(reader, max_head).await?;
    while head.status().is_informational() {
        if head.status() == StatusCode::SWITCHING_PROTOCOLS {
            return Err(GatewayError::upstream_protocol(
                "upstream switched protocols on an HTTP/2 stream",
            ));
        }
        debug!(status = %head.status(), "[TUNNEL] Skipping interim response");
        (head, buffered) = read_response_head_after(reader, buffered, max_head).await?;
    }
    Ok((head, buffered))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Hijack path: drain the bytes read ahead of the request head into the
/// upstream, then relay raw bytes both ways.
pub async fn hijack_relay<S>(
    conn: Http1Conn<S>,
    upstream: TcpStream,
    idle_timeout: Option<Duration>,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client, buffered) = conn.hijack();
    let (upstream_read, mut upstream_write) = upstream.into_split();

    if !buffered.is_empty() {
        debug!(bytes = buffered.len(), "[TUNNEL] Draining buffered client bytes upstream");
        upstream_write.write_all(&buffered).await?;
    }

    let (client_read, client_write) = tokio::io::split(client);
    Ok(relay(upstream_read, upstream_write, client_read, client_write, idle_timeout).await?)
}

/// Stream path: turn the upstream's reply into this stream's response, then
/// relay the rest through the stream.
///
/// With `tunnel_body` (CONNECT) the stream becomes a bidirectional tunnel.
/// Without it the request body has already been sent upstream, so only the
/// upstream's response body is relayed, de-chunked when needed. Responses
/// that never carry a body (to `HEAD`, `204`, `304`) end the stream with
/// the headers.
pub async fn stream_relay(
    upstream: TcpStream,
    mut respond: SendResponse<Bytes>,
    tunnel_body: Option<RecvStream>,
    method: &Method,
    config: &Config,
) -> Result<u64> {
    let idle_timeout = config.relay_idle_timeout;
    let (mut upstream_read, upstream_write) = upstream.into_split();

    let (head, buffered) =
        match read_final_head(&mut upstream_read, config.max_header_bytes).await {
            Ok(head) => head,
            Err(e) => {
                let _ = send_error(&mut respond, &e);
                return Err(e);
            }
        };

    let end_of_stream = tunnel_body.is_none() && !response_has_body(method, head.status());
    // A HEAD response's length describes the resource; on 204/304 it would
    // contradict the empty stream
    let drop_length = end_of_stream && method != Method::HEAD;

    let mut response = Response::new(());
    *response.status_mut() = head.status();
    for (name, value) in head.headers() {
        if is_connection_specific(name.as_str()) || (drop_length && name == CONTENT_LENGTH) {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }

    let send = respond
        .send_response(response, end_of_stream)
        .map_err(|e| GatewayError::internal(format!("sending response headers: {}", e)))?;
    if end_of_stream {
        debug!(status = %head.status(), "[TUNNEL] Bodyless response relayed");
        return Ok(0);
    }
    let mut writer = H2Writer::new(send);
    // Headers are on their way; nothing else tells the client the tunnel is up
    writer.flush().await?;

    if let Some(body) = tunnel_body {
        if !buffered.is_empty() {
            writer.write_all(&buffered).await?;
            writer.flush().await?;
        }
        let client_read = H2Reader::new(body);
        return Ok(relay(upstream_read, upstream_write, client_read, writer, idle_timeout).await?);
    }

    // Keep the upstream write side open until the response is done
    let _upstream_write = upstream_write;
    let body = Cursor::new(buffered).chain(upstream_read);

    if is_chunked(head.headers()) {
        let mut reader = BufReader::new(body);
        let n = copy_chunked(&mut reader, &mut writer).await?;
        writer.shutdown().await?;
        Ok(n)
    } else if let Some(len) = content_length(head.headers()) {
        Ok(copy_direction(body.take(len), writer, idle_timeout).await?)
    } else {
        Ok(copy_direction(body, writer, idle_timeout).await?)
    }
}
