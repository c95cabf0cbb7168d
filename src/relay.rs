//! Duplex relay between the upstream connection and the client side
//!
//! One direction (client → upstream) runs on its own task; the caller waits
//! on the other (upstream → client) and tears the first down when it ends.
//! Each direction owns one pooled buffer, copies until EOF or error, then
//! half-closes its destination when the destination supports it.
//!
//! Whether a destination needs a flush after every chunk, and whether it can
//! half-close, is a static property of its type ([`RelayWrite`]). TLS record
//! streams and HTTP/2 response bodies need per-chunk flushing or the far side
//! sees nothing until the stream ends; a plain TCP write half does not.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::task::AbortOnDropHandle;
use tracing::debug;

use crate::buffer_pool::BUFFER_POOL;
use crate::h2_io::H2Writer;

/// Write side of a relay endpoint, with its capabilities known up front
pub trait RelayWrite: AsyncWrite + Unpin + Send + 'static {
    /// Flush after every chunk written
    const FLUSH_PER_CHUNK: bool;
    /// `shutdown()` signals end-of-data without tearing down the read side
    const HALF_CLOSE: bool;
}

/// Raw upstream socket: the kernel sends what we write
impl RelayWrite for OwnedWriteHalf {
    const FLUSH_PER_CHUNK: bool = false;
    const HALF_CLOSE: bool = true;
}

/// Hijacked client connection (a TLS stream in production): records sit in
/// the session until flushed
impl<S> RelayWrite for WriteHalf<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    const FLUSH_PER_CHUNK: bool = true;
    const HALF_CLOSE: bool = true;
}

/// HTTP/2 response body: shutdown sends END_STREAM
impl RelayWrite for H2Writer {
    const FLUSH_PER_CHUNK: bool = true;
    const HALF_CLOSE: bool = true;
}

/// Relay bytes `target ↔ client` until the upstream → client direction ends.
///
/// The client → upstream direction runs on its own task; its error is logged
/// and dropped. When the awaited direction returns (or this future is
/// dropped) that task is aborted, so both connections close with the relay.
/// Buffers go back to the pool on every exit path, abort included.
/// `idle_timeout` bounds each single read or write; `None` disables it.
///
/// Returns the number of bytes delivered to the client.
pub async fn relay<TR, TW, CR, CW>(
    target_read: TR,
    target_write: TW,
    client_read: CR,
    client_write: CW,
    idle_timeout: Option<Duration>,
) -> io::Result<u64>
where
    TR: AsyncRead + Unpin + Send + 'static,
    TW: RelayWrite,
    CR: AsyncRead + Unpin + Send + 'static,
    CW: RelayWrite,
{
    let reverse = AbortOnDropHandle::new(tokio::spawn(async move {
        match copy_direction(client_read, target_write, idle_timeout).await {
            Ok(n) => debug!(bytes = n, "[RELAY] client → upstream finished"),
            Err(e) => debug!(error = %e, "[RELAY] client → upstream ended with error"),
        }
    }));

    let result = copy_direction(target_read, client_write, idle_timeout).await;
    if let Ok(n) = &result {
        debug!(bytes = n, "[RELAY] upstream → client finished");
    }
    drop(reverse);
    result
}

/// Copy one direction with a pooled buffer, then half-close the destination.
pub async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    idle_timeout: Option<Duration>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: RelayWrite,
{
    let mut buf = BUFFER_POOL.checkout();
    let result = copy_chunks(&mut reader, &mut writer, &mut buf, idle_timeout).await;

    if W::HALF_CLOSE {
        // Best effort: the peer may already be gone
        let _ = with_idle_timeout(idle_timeout, writer.shutdown()).await;
    }

    result
}

/// Read into `buf` and write each chunk out, flushing per chunk when the
/// destination requires it. Clean EOF ends the loop without error.
pub async fn copy_chunks<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: RelayWrite,
{
    let mut written = 0u64;
    loop {
        let n = with_idle_timeout(idle_timeout, reader.read(buf)).await?;
        if n == 0 {
            return Ok(written);
        }

        with_idle_timeout(idle_timeout, writer.write_all(&buf[..n]))
            .await
            .map_err(short_write)?;
        if W::FLUSH_PER_CHUNK {
            with_idle_timeout(idle_timeout, writer.flush()).await?;
        }

        written += n as u64;
    }
}

async fn with_idle_timeout<T, F>(idle_timeout: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "relay idle timeout"))?,
        None => fut.await,
    }
}

fn short_write(e: io::Error) -> io::Error {
    if e.kind() == io::ErrorKind::WriteZero {
        io::Error::new(io::ErrorKind::WriteZero, "short write")
    } else {
        e
    }
}
