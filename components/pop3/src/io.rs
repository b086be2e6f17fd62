//! Small glue between [`crate::buffer::Buffer`] and an async socket.
//!
//! The session FSM wants a buffer it can hand to a parser byte-by-byte
//! (§4.2); these helpers are the only place that actually touches
//! `AsyncRead`/`AsyncWrite`, so the rest of the crate stays testable
//! without real sockets.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::buffer::Buffer;

/// Reads whatever is available into `buf`'s write view, compacting
/// first if there's no room. Returns the number of bytes read; `0`
/// means the peer closed its write side (EOF).
pub async fn fill<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut Buffer) -> Result<usize> {
    if !buf.can_write() {
        buf.compact();
    }
    let n = stream
        .read(buf.write_view())
        .await
        .context("reading from socket")?;
    buf.advance_write(n);
    Ok(n)
}

/// Writes the whole of `data` to `stream`, handling partial writes.
/// `EAGAIN`-style backpressure is absorbed by `write_all`'s internal
/// retry loop on the runtime's reactor; callers never spin.
pub async fn write_all<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> Result<()> {
    stream.write_all(data).await.context("writing to socket")?;
    Ok(())
}

/// Reads a single `\r\n`- or `\n`-terminated line (used for the origin
/// greeting, §4.6 HELLO, which is always single-line).
pub async fn read_line<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.context("reading greeting")?;
        if n == 0 {
            anyhow::bail!("peer closed before sending a complete line");
        }
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
    }
    Ok(String::from_utf8_lossy(&line).to_string())
}
