//! Management channel (component H, §4.9): a separate listener that
//! authenticates with a tiny HELO/USER/PASS handshake, then accepts a
//! fixed line-oriented command grammar for runtime control of the
//! shared [`Config`] and for reading back [`Metrics`].
//!
//! Unlike the POP3-facing session FSM, a management connection never
//! talks to the origin, so it gets its own much smaller state machine
//! rather than reusing [`crate::session::Phase`].

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpStream;

use crate::config::SharedConfig;
use crate::config::MediaType;
use crate::io;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum MgmtPhase {
    Helo,
    User,
    Pass,
    Config,
}

/// Drives one management connection until `QUIT` or disconnect. Like
/// [`crate::session::run`], failures are logged and swallowed — a
/// broken management client must never take the listener down.
pub async fn run(mut conn: TcpStream, config: SharedConfig, metrics: Arc<Metrics>) {
    if let Err(e) = drive(&mut conn, &config, &metrics).await {
        log::warn!("management connection ended in error: {:#}", e);
    }
}

async fn drive(conn: &mut TcpStream, config: &SharedConfig, metrics: &Metrics) -> Result<()> {
    let mut phase = MgmtPhase::Helo;
    io::write_all(conn, b"+OK popg management ready.\r\n").await?;

    loop {
        let line = io::read_line(conn).await?;
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or("").to_ascii_uppercase();
        let rest: Vec<&str> = parts.collect();

        match phase {
            MgmtPhase::Helo => match verb.as_str() {
                "HELO" => {
                    phase = MgmtPhase::User;
                    io::write_all(conn, b"+OK\r\n").await?;
                }
                "QUIT" => {
                    io::write_all(conn, b"+OK Goodbye.\r\n").await?;
                    return Ok(());
                }
                _ => io::write_all(conn, b"-ERR expected HELO\r\n").await?,
            },
            MgmtPhase::User => match verb.as_str() {
                "USER" if rest.len() == 1 => {
                    let expected = config.read().await.user.clone();
                    if rest[0] == expected {
                        phase = MgmtPhase::Pass;
                        io::write_all(conn, b"+OK\r\n").await?;
                    } else {
                        io::write_all(conn, b"-ERR unknown user\r\n").await?;
                    }
                }
                "QUIT" => {
                    io::write_all(conn, b"+OK Goodbye.\r\n").await?;
                    return Ok(());
                }
                _ => io::write_all(conn, b"-ERR expected USER <name>\r\n").await?,
            },
            MgmtPhase::Pass => match verb.as_str() {
                "PASS" if rest.len() == 1 => {
                    let expected = config.read().await.pass.clone();
                    if rest[0] == expected {
                        phase = MgmtPhase::Config;
                        io::write_all(conn, b"+OK authenticated\r\n").await?;
                    } else {
                        io::write_all(conn, b"-ERR bad password\r\n").await?;
                        phase = MgmtPhase::User;
                    }
                }
                "QUIT" => {
                    io::write_all(conn, b"+OK Goodbye.\r\n").await?;
                    return Ok(());
                }
                _ => io::write_all(conn, b"-ERR expected PASS <password>\r\n").await?,
            },
            MgmtPhase::Config => {
                if verb == "QUIT" {
                    io::write_all(conn, b"+OK Goodbye.\r\n").await?;
                    return Ok(());
                }
                let reply = handle_command(&verb, &rest, config, metrics).await;
                io::write_all(conn, reply.as_bytes()).await?;
            }
        }
    }
}

/// Executes one CONFIG-phase command and returns the exact wire reply,
/// terminator included (§4.9, §6).
async fn handle_command(
    verb: &str,
    args: &[&str],
    config: &SharedConfig,
    metrics: &Metrics,
) -> String {
    match verb {
        "MSG" if !args.is_empty() => {
            let msg = args.join(" ");
            config.write().await.replacement_msg = format!("{}\r\n", msg);
            "+OK\r\n".to_string()
        }
        "CMD" if args.is_empty() => {
            let mut cfg = config.write().await;
            cfg.et_activated = !cfg.et_activated;
            format!("+OK {}\r\n", cfg.et_activated)
        }
        "CMD" if !args.is_empty() => {
            let cmd = args.join(" ");
            let mut cfg = config.write().await;
            cfg.filter_command = Some(cmd);
            cfg.et_activated = true;
            "+OK\r\n".to_string()
        }
        "LIST" if args.is_empty() => {
            let list = config.read().await.filter_medias_list();
            if list.is_empty() {
                "+OK 0\r\n.\r\n".to_string()
            } else {
                let lines = list.replace('\n', "\r\n");
                format!("+OK\r\n{}\r\n.\r\n", lines)
            }
        }
        "BAN" if args.len() == 1 => match MediaType::parse(args[0]) {
            Some(mt) => {
                config.write().await.filtered_media_types.insert(mt);
                "+OK\r\n".to_string()
            }
            None => "-ERR malformed media type, expected type/subtype\r\n".to_string(),
        },
        "UNBAN" if args.len() == 1 => match MediaType::parse(args[0]) {
            Some(mt) => {
                config.write().await.filtered_media_types.remove(&mt);
                "+OK\r\n".to_string()
            }
            None => "-ERR malformed media type, expected type/subtype\r\n".to_string(),
        },
        "STATS" if args.is_empty() => {
            let s = metrics.snapshot();
            format!(
                "+OK\r\nconcurrent_connections {}\r\nhistorical_access {}\r\ntransferred_bytes {}\r\nretrieved_messages {}\r\n.\r\n",
                s.concurrent_connections, s.historical_access, s.transferred_bytes, s.retrieved_messages
            )
        }
        _ => "-ERR unknown command or wrong number of arguments\r\n".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn spawn_mgmt() -> (std::net::SocketAddr, SharedConfig, Arc<Metrics>) {
        let config = config::shared(Config::default());
        let metrics = Arc::new(Metrics::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_config = config.clone();
        let server_metrics = metrics.clone();
        tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            run(conn, server_config, server_metrics).await;
        });

        (addr, config, metrics)
    }

    #[tokio::test]
    async fn full_handshake_then_ban_and_list_round_trip() {
        let (addr, _config, _metrics) = spawn_mgmt().await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let mut buf = vec![0u8; 4096];

        let _ = conn.read(&mut buf).await.unwrap(); // ready banner

        conn.write_all(b"HELO\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        conn.write_all(b"USER admin\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        conn.write_all(b"PASS admin\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("+OK"));

        conn.write_all(b"BAN video/*\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        conn.write_all(b"LIST\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("video/*"));

        conn.write_all(b"QUIT\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK Goodbye.\r\n");
    }

    #[tokio::test]
    async fn bare_cmd_toggles_et_activated_and_is_idempotent_in_pairs() {
        let (addr, config, _metrics) = spawn_mgmt().await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = conn.read(&mut buf).await.unwrap();

        conn.write_all(b"HELO\r\n").await.unwrap();
        let _ = conn.read(&mut buf).await.unwrap();
        conn.write_all(b"USER admin\r\n").await.unwrap();
        let _ = conn.read(&mut buf).await.unwrap();
        conn.write_all(b"PASS admin\r\n").await.unwrap();
        let _ = conn.read(&mut buf).await.unwrap();

        let initial = config.read().await.et_activated;

        conn.write_all(b"CMD\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf[..n]),
            format!("+OK {}\r\n", !initial)
        );
        assert_eq!(config.read().await.et_activated, !initial);

        conn.write_all(b"CMD\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf[..n]),
            format!("+OK {}\r\n", initial)
        );
        assert_eq!(config.read().await.et_activated, initial);
    }

    #[tokio::test]
    async fn wrong_password_returns_to_user_state() {
        let (addr, _config, _metrics) = spawn_mgmt().await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = conn.read(&mut buf).await.unwrap();

        conn.write_all(b"HELO\r\n").await.unwrap();
        let _ = conn.read(&mut buf).await.unwrap();
        conn.write_all(b"USER admin\r\n").await.unwrap();
        let _ = conn.read(&mut buf).await.unwrap();

        conn.write_all(b"PASS wrong\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("-ERR"));

        // Back in USER phase: CONFIG-only commands should be rejected.
        conn.write_all(b"STATS\r\n").await.unwrap();
        let n = conn.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("-ERR"));
    }
}
