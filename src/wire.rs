//! HTTP/1.x wire format
//!
//! - request head parsing for inbound HTTP/1 connections (httparse)
//! - proxy-form encoding of the request sent to the upstream proxy
//! - upstream response head reading, keeping any bytes read past the head
//! - de-chunking of `Transfer-Encoding: chunked` upstream bodies

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::buffer_pool::BUFFER_POOL;
use crate::error::{GatewayError, Result};
use crate::relay::RelayWrite;

/// Header slots offered to httparse per head
pub const MAX_HEADERS: usize = 100;

/// Longest chunk-size or trailer line accepted from upstream
const MAX_CHUNK_LINE: u64 = 4096;

/// Request sent to the upstream proxy, in proxy form
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// `host:port` for CONNECT, absolute URI otherwise
    pub target: String,
    pub host: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    /// Attach a fully buffered body, replacing any framing headers
    pub fn set_body(&mut self, body: Bytes) {
        self.headers.remove(TRANSFER_ENCODING);
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        self.body = Some(body);
    }

    /// Ask the upstream to close the connection after its response
    pub fn close_after_response(&mut self) {
        self.headers.insert(CONNECTION, HeaderValue::from_static("close"));
    }

    /// Serialize as an HTTP/1.1 proxy request
    pub fn encode(&self) -> Bytes {
        let body_len = self.body.as_ref().map_or(0, Bytes::len);
        let mut buf = BytesMut::with_capacity(512 + body_len);

        buf.put_slice(self.method.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.target.as_bytes());
        buf.put_slice(b" HTTP/1.1\r\n");

        buf.put_slice(b"Host: ");
        buf.put_slice(self.host.as_bytes());
        buf.put_slice(b"\r\n");

        for (name, value) in &self.headers {
            if name == HOST {
                continue;
            }
            buf.put_slice(name.as_str().as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"\r\n");

        if let Some(body) = &self.body {
            buf.put_slice(body);
        }
        buf.freeze()
    }
}

fn header_map(raw: &[httparse::Header<'_>]) -> std::result::Result<HeaderMap, String> {
    let mut map = HeaderMap::with_capacity(raw.len());
    for header in raw {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| format!("invalid header name {:?}: {}", header.name, e))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| format!("invalid value for header {}: {}", name, e))?;
        map.append(name, value);
    }
    Ok(map)
}

/// Parse an HTTP/1 request head from the start of `buf`.
///
/// Returns `Ok(None)` while the head is incomplete, otherwise the request
/// and the head's length in bytes.
pub fn parse_request_head(buf: &[u8]) -> Result<Option<(Request<()>, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);

    let len = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(GatewayError::MalformedRequest(e.to_string())),
    };

    let method = Method::from_bytes(parsed.method.unwrap_or_default().as_bytes())
        .map_err(|e| GatewayError::MalformedRequest(format!("invalid method: {}", e)))?;
    let uri: Uri = parsed
        .path
        .unwrap_or_default()
        .parse()
        .map_err(|e| GatewayError::MalformedRequest(format!("invalid request target: {}", e)))?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut request = Request::new(());
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.version_mut() = version;
    *request.headers_mut() = header_map(parsed.headers).map_err(GatewayError::MalformedRequest)?;

    Ok(Some((request, len)))
}

/// Parse an HTTP/1 response head from the start of `buf`.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<(Response<()>, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);

    let len = match parsed.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(GatewayError::upstream_protocol(e.to_string())),
    };

    let status = StatusCode::from_u16(parsed.code.unwrap_or_default())
        .map_err(|e| GatewayError::upstream_protocol(format!("invalid status code: {}", e)))?;

    let mut response = Response::new(());
    *response.status_mut() = status;
    *response.headers_mut() = header_map(parsed.headers).map_err(GatewayError::UpstreamProtocol)?;

    Ok(Some((response, len)))
}

/// Read the upstream's response head.
///
/// Returns the parsed head and whatever was read past it; those bytes belong
/// to the body (or the tunnel) and must be forwarded before anything else.
pub async fn read_response_head<R>(reader: &mut R, max_head: usize) -> Result<(Response<()>, Bytes)>
where
    R: AsyncRead + Unpin,
{
    read_response_head_after(reader, Bytes::new(), max_head).await
}

/// Like [`read_response_head`], starting from bytes already read off `reader`
pub async fn read_response_head_after<R>(
    reader: &mut R,
    prefix: Bytes,
    max_head: usize,
) -> Result<(Response<()>, Bytes)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096.max(prefix.len()));
    buf.extend_from_slice(&prefix);
    loop {
        if let Some((response, len)) = parse_response_head(&buf)? {
            let _ = buf.split_to(len);
            return Ok((response, buf.freeze()));
        }
        if buf.len() >= max_head {
            return Err(GatewayError::upstream_protocol(format!(
                "response head exceeds {} bytes",
                max_head
            )));
        }

        let n = reader
            .read_buf(&mut buf)
            .await
            .map_err(|e| GatewayError::upstream_protocol(format!("reading response: {}", e)))?;
        if n == 0 {
            return Err(GatewayError::upstream_protocol(
                "upstream closed before sending a response",
            ));
        }
    }
}

/// Whether the head declares a chunked body
pub fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"))
}

async fn read_chunk_line<R>(reader: &mut R, line: &mut Vec<u8>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader)
        .take(MAX_CHUNK_LINE)
        .read_until(b'\n', line)
        .await?;
    if n == 0 || line.last() != Some(&b'\n') {
        return Err(GatewayError::upstream_protocol("truncated chunked body"));
    }
    Ok(())
}

/// Decode a chunked body from `reader` into `writer`, flushing each piece
/// when the writer needs it. Trailers are read and dropped.
pub async fn copy_chunked<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: RelayWrite,
{
    let mut buf = BUFFER_POOL.checkout();
    let mut line = Vec::with_capacity(64);
    let mut total = 0u64;

    loop {
        read_chunk_line(reader, &mut line).await?;
        let size = match httparse::parse_chunk_size(&line) {
            Ok(httparse::Status::Complete((_, size))) => size,
            _ => return Err(GatewayError::upstream_protocol("invalid chunk size line")),
        };

        if size == 0 {
            loop {
                read_chunk_line(reader, &mut line).await?;
                if line == b"\r\n" || line == b"\n" {
                    return Ok(total);
                }
            }
        }

        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(GatewayError::upstream_protocol("truncated chunk data"));
            }
            writer.write_all(&buf[..n]).await?;
            if W::FLUSH_PER_CHUNK {
                writer.flush().await?;
            }
            remaining -= n as u64;
            total += n as u64;
        }

        read_chunk_line(reader, &mut line).await?;
        if line != b"\r\n" && line != b"\n" {
            return Err(GatewayError::upstream_protocol("missing CRLF after chunk data"));
        }
    }
}
