//! External-transformation pipeline (§4.7).
//!
//! Spawns the configured filter command per retrieved mail, feeds it
//! the origin's body with the multi-line terminator stripped, and
//! relays its stdout back to the client with a synthesized preface and
//! a fresh terminator. The two directions are independent one-way
//! streams (origin→child, child→client) that run concurrently and join
//! only once both have reached a terminal state — the "clean
//! re-architecture" called out in the design notes, replacing the
//! original's several redundant `finish_rd`/`finish_wr`/`error_rd`/
//! `error_wr` flags with two plain futures and a `tokio::join!`.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::buffer::Buffer;
use crate::config::Config;
use crate::io;
use crate::metrics::Metrics;
use crate::mime;
use crate::parser::TerminatorScanner;

const SENDING_MAIL_PREFACE: &[u8] = b"+OK sending mail.\r\n";
const EMPTY_BODY_TERMINATOR: &[u8] = b"\r\n.\r\n";

/// Runs the ET pipeline for one RETR body. `origin_buf` may already
/// hold body bytes read past the status line; those are drained into
/// the child before any further reads from `origin`.
///
/// On spawn failure, synthesizes `-ERR could not open external
/// transformation.\r\n` followed by an empty well-formed body and
/// returns `Ok(())` — the session survives (§4.7, §7).
pub async fn run(
    origin: &mut TcpStream,
    client: &mut TcpStream,
    origin_buf: &mut Buffer,
    config: &Config,
    metrics: &Metrics,
    username: Option<&str>,
) -> Result<()> {
    let filter_command = config
        .filter_command
        .clone()
        .context("ET invoked with no filter_command configured")?;

    if let Some(ct) = mime::find_content_type(origin_buf.read_view()) {
        log::debug!("ET processing body with content-type {}/{}", ct.type_, ct.subtype);
    }

    let stderr = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.error_file)
        .map(Stdio::from)
        .unwrap_or_else(|_| Stdio::null());

    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(&filter_command)
        .env("FILTER_MEDIAS", config.filter_medias_env())
        .env("FILTER_MSG", &config.replacement_msg)
        .env("POP3_FILTER_VERSION", &config.version)
        .env("POP3_USERNAME", username.unwrap_or(""))
        .env("POP3_SERVER", &config.origin_server)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(stderr)
        .spawn();

    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            log::warn!("failed to spawn external transformation filter: {}", e);
            io::write_all(
                client,
                b"-ERR could not open external transformation.\r\n",
            )
            .await?;
            io::write_all(client, EMPTY_BODY_TERMINATOR).await?;
            return Ok(());
        }
    };

    let mut stdin = child.stdin.take().context("child stdin was not piped")?;
    let mut stdout = child.stdout.take().context("child stdout was not piped")?;

    let origin_to_child = async {
        let mut scanner = TerminatorScanner::new();

        loop {
            while origin_buf.can_read() {
                let b = origin_buf.read_view()[0];
                origin_buf.advance_read(1);
                if scanner.feed(b) {
                    // Terminator matched; anything still in origin_buf
                    // belongs to the next response and must stay put.
                    drop(stdin);
                    return Ok::<(), anyhow::Error>(());
                }
                stdin.write_all(&[b]).await.ok();
            }

            let n = io::fill(origin, origin_buf).await?;
            if n == 0 {
                // Origin closed before the terminator arrived; stop
                // feeding the child and let the read side notice.
                drop(stdin);
                return Ok(());
            }
        }
    };

    let child_to_client = async {
        io::write_all(client, SENDING_MAIL_PREFACE).await?;
        let mut sent = 0u64;
        let mut chunk = [0u8; 4096];
        loop {
            let n = match stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            io::write_all(client, &chunk[..n]).await?;
            sent += n as u64;
        }
        io::write_all(client, b"\r\n.\r\n").await?;
        Ok::<u64, anyhow::Error>(sent)
    };

    let (write_result, read_result) = tokio::join!(origin_to_child, child_to_client);
    if let Err(e) = write_result {
        log::warn!("ET origin->child stream ended with an error: {:#}", e);
    }
    let sent = read_result?;
    metrics.add_transferred_bytes(sent + SENDING_MAIL_PREFACE.len() as u64);

    let _ = child.wait().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preface_and_terminator_are_stable_wire_constants() {
        assert_eq!(SENDING_MAIL_PREFACE, b"+OK sending mail.\r\n");
        assert_eq!(EMPTY_BODY_TERMINATOR, b"\r\n.\r\n");
    }
}
