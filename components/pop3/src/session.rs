//! Session data model (component E) and the per-connection state
//! machine (component F, §4.6): `ORIGIN_RESOLV -> CONNECTING -> HELLO
//! -> CAPA -> REQUEST <-> RESPONSE [<-> EXTERNAL_TRANSFORMATION] ->
//! DONE/ERROR`.
//!
//! One task per accepted client, matching the single-threaded reactor's
//! one-session-per-descriptor-set model without needing its refcounting:
//! a session here is just the stack of an async function, so there is
//! nothing to keep alive once the task returns.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpStream;

use crate::block;
use crate::buffer::Buffer;
use crate::config::SharedConfig;
use crate::driver::{Driver, FsmState};
use crate::et;
use crate::io;
use crate::metrics::Metrics;
use crate::parser::{ParseOutcome, RequestParser, ResponseParser};
use crate::pool::BufferPool;
use crate::proto::{format_multiline, inject_pipelining, Request, Response, Status};

pub const BUF_CAPACITY: usize = 8 * 1024;
const MAX_CONSECUTIVE_INVALID_COMMANDS: u32 = 3;

/// The nine states of §4.6, as a closed sum type per the "tagged
/// states" design note (§9) — no dynamic dispatch, no fd table.
#[derive(Debug)]
pub enum Phase {
    OriginResolv,
    Connecting,
    Hello,
    Capa,
    Request,
    Response,
    ExternalTransformation,
    Done,
    Error,
}

impl FsmState for Phase {
    fn on_arrival(&mut self) {
        log::debug!("session phase -> {:?}", self);
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

/// Where USER/PASS has gotten the client (§3); tracked for observability
/// and for `POP3_USERNAME` in the ET pipeline, not as a proxy-side gate —
/// the origin is the authority on whether authentication succeeded.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PopPhase {
    Authorization,
    Transaction,
    Update,
}

/// Per-connection state carried across the whole FSM (§3).
pub struct Session {
    pub id: u64,
    pub client_addr: SocketAddr,
    pub user: Option<String>,
    pub pop_phase: PopPhase,
    pub pipelining: bool,
    pub concurrent_invalid_commands: u32,
}

impl Session {
    fn new(id: u64, client_addr: SocketAddr) -> Self {
        Session {
            id,
            client_addr,
            user: None,
            pop_phase: PopPhase::Authorization,
            pipelining: false,
            concurrent_invalid_commands: 0,
        }
    }
}

/// Drives one accepted client connection to completion. Never returns
/// an error to its caller — any failure is logged and the connection is
/// simply dropped, matching the acceptor's "one bad session never takes
/// down the process" contract (§5).
pub async fn run(
    id: u64,
    mut client: TcpStream,
    client_addr: SocketAddr,
    config: SharedConfig,
    metrics: Arc<Metrics>,
    pool: Arc<BufferPool>,
) {
    metrics.on_accept();
    let mut driver = Driver::new(Phase::OriginResolv);
    let mut session = Session::new(id, client_addr);

    let result = drive(&mut driver, &mut session, &mut client, &config, &metrics, &pool).await;

    match result {
        Ok(()) => driver.transition(Phase::Done),
        Err(e) => {
            driver.transition(Phase::Error);
            log::warn!("session {} ({}) ended in error: {:#}", id, client_addr, e);
        }
    }
}

async fn drive(
    driver: &mut Driver<Phase>,
    session: &mut Session,
    client: &mut TcpStream,
    config: &SharedConfig,
    metrics: &Metrics,
    pool: &BufferPool,
) -> Result<()> {
    let (origin_server, origin_port) = {
        let cfg = config.read().await;
        (cfg.origin_server.clone(), cfg.origin_port)
    };

    let resolve_guard = Arc::new(());
    let addrs = block::resolve(origin_server, origin_port, resolve_guard).await?;

    driver.transition(Phase::Connecting);
    let mut origin = connect_any(&addrs).await?;

    let origin_buf = pool.acquire().await;
    let client_buf = pool.acquire().await;
    let (origin_buf, client_buf, result) = drive_connected(
        driver, session, client, &mut origin, config, metrics, origin_buf, client_buf,
    )
    .await;
    pool.release(origin_buf).await;
    pool.release(client_buf).await;

    metrics.on_teardown();
    result
}

async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) => Err(e.into()),
        None => anyhow::bail!("origin resolved to no addresses"),
    }
}

async fn drive_connected(
    driver: &mut Driver<Phase>,
    session: &mut Session,
    client: &mut TcpStream,
    origin: &mut TcpStream,
    config: &SharedConfig,
    metrics: &Metrics,
    mut origin_buf: Buffer,
    mut client_buf: Buffer,
) -> (Buffer, Buffer, Result<()>) {
    let result = drive_connected_inner(
        driver,
        session,
        client,
        origin,
        config,
        metrics,
        &mut origin_buf,
        &mut client_buf,
    )
    .await;
    (origin_buf, client_buf, result)
}

async fn drive_connected_inner(
    driver: &mut Driver<Phase>,
    session: &mut Session,
    client: &mut TcpStream,
    origin: &mut TcpStream,
    config: &SharedConfig,
    metrics: &Metrics,
    origin_buf: &mut Buffer,
    client_buf: &mut Buffer,
) -> Result<()> {
    driver.transition(Phase::Hello);
    let greeting = io::read_line(origin).await?;
    io::write_all(client, b"+OK Proxy server POP3 ready.\r\n").await?;
    io::write_all(client, format!("{}\r\n", greeting).as_bytes()).await?;

    driver.transition(Phase::Capa);
    negotiate_capa(session, origin, origin_buf).await?;

    let mut req_parser = RequestParser::new();

    loop {
        driver.transition(Phase::Request);
        let queue = collect_requests(session, client, client_buf, &mut req_parser).await?;
        let queue = match queue {
            Some(q) => q,
            None => return Ok(()), // client closed, or invalid-command limit hit
        };

        driver.transition(Phase::Response);
        send_queue(origin, session.pipelining, &queue).await?;

        for (idx, req) in queue.iter().enumerate() {
            if !session.pipelining && idx > 0 {
                io::write_all(origin, req.to_wire().as_bytes()).await?;
            }
            apply_side_effects(session, req);

            let is_quit = matches!(req, Request::Quit);
            handle_response(
                req, origin, client, origin_buf, config, metrics, session, driver,
            )
            .await?;

            if is_quit {
                return Ok(());
            }
        }
    }
}

/// Sends the origin's CAPA listing once, right after the greeting, and
/// keeps only the PIPELINING bit — the client never sees this exchange
/// (§4.6, state CAPA).
async fn negotiate_capa(
    session: &mut Session,
    origin: &mut TcpStream,
    origin_buf: &mut Buffer,
) -> Result<()> {
    io::write_all(origin, b"CAPA\r\n").await?;
    let mut parser = ResponseParser::new(true);
    drain_response(origin, origin_buf, &mut parser).await?;
    if parser.status() == Some(Status::Ok) {
        let entries = Response::capa_entries(parser.body());
        session.pipelining = Response::has_pipelining(&entries);
    }
    Ok(())
}

/// Reads bytes from `client` until at least one full request has been
/// parsed. Invalid commands are answered immediately; three in a row
/// end the session with the fixed `-ERR` line (§4.6, §7).
///
/// Returns `None` when the session is over (client closed, or the
/// invalid-command limit was hit) and `Some(queue)` otherwise — `queue`
/// is never empty.
async fn collect_requests(
    session: &mut Session,
    client: &mut TcpStream,
    client_buf: &mut Buffer,
    req_parser: &mut RequestParser,
) -> Result<Option<Vec<Request>>> {
    let mut queue = Vec::new();

    loop {
        while client_buf.can_read() {
            let b = client_buf.read_view()[0];
            client_buf.advance_read(1);
            match req_parser.feed(b) {
                ParseOutcome::NeedMore => {}
                ParseOutcome::Done(req) => {
                    session.concurrent_invalid_commands = 0;
                    let is_quit = matches!(req, Request::Quit);
                    queue.push(req);
                    if is_quit {
                        return Ok(Some(queue));
                    }
                }
                ParseOutcome::Error(e) => {
                    session.concurrent_invalid_commands += 1;
                    io::write_all(client, format!("-ERR {}\r\n", e.wire_message()).as_bytes())
                        .await?;
                    if session.concurrent_invalid_commands >= MAX_CONSECUTIVE_INVALID_COMMANDS {
                        // Documented exception: this line ends in a bare `\n`,
                        // not `\r\n` like every other reply.
                        io::write_all(client, b"-ERR Too many invalid commands. (POPG)\n")
                            .await?;
                        return Ok(None);
                    }
                }
            }
        }

        if !queue.is_empty() {
            return Ok(Some(queue));
        }

        let n = io::fill(client, client_buf).await?;
        if n == 0 {
            return Ok(None);
        }
    }
}

async fn send_queue(origin: &mut TcpStream, pipelining: bool, queue: &[Request]) -> Result<()> {
    if pipelining {
        let mut wire = Vec::new();
        for req in queue {
            wire.extend_from_slice(req.to_wire().as_bytes());
        }
        io::write_all(origin, &wire).await
    } else {
        io::write_all(origin, queue[0].to_wire().as_bytes()).await
    }
}

fn apply_side_effects(session: &mut Session, req: &Request) {
    match req {
        Request::User(u) => session.user = Some(u.clone()),
        Request::Pass(_) => session.pop_phase = PopPhase::Transaction,
        Request::Quit if session.pop_phase == PopPhase::Transaction => {
            session.pop_phase = PopPhase::Update
        }
        _ => {}
    }
}

/// Feeds bytes already sitting in `origin_buf`, then further reads from
/// `origin`, into `parser` until it reports completion.
async fn drain_response(
    origin: &mut TcpStream,
    origin_buf: &mut Buffer,
    parser: &mut ResponseParser,
) -> Result<()> {
    loop {
        while origin_buf.can_read() {
            let b = origin_buf.read_view()[0];
            origin_buf.advance_read(1);
            if parser.feed(b)? {
                return Ok(());
            }
        }
        if parser.is_done() {
            return Ok(());
        }
        let n = io::fill(origin, origin_buf).await?;
        if n == 0 {
            anyhow::bail!("origin closed mid-response");
        }
    }
}

/// Reads one origin response and relays it to the client, diverting
/// into the ET pipeline for a RETR whose status is OK when ET is turned
/// on (§4.6 RESPONSE / EXTERNAL_TRANSFORMATION, §4.7). Returns whether
/// the response was diverted.
async fn handle_response(
    req: &Request,
    origin: &mut TcpStream,
    client: &mut TcpStream,
    origin_buf: &mut Buffer,
    config: &SharedConfig,
    metrics: &Metrics,
    session: &Session,
    driver: &mut Driver<Phase>,
) -> Result<bool> {
    let multiline = req.expects_multiline_response();
    let mut parser = ResponseParser::new(multiline);

    // Stop as soon as the status line is in, so a RETR can be diverted
    // before its body is consumed.
    loop {
        while origin_buf.can_read() {
            let b = origin_buf.read_view()[0];
            origin_buf.advance_read(1);
            parser.feed(b)?;
            if parser.first_line_done() {
                break;
            }
        }
        if parser.first_line_done() {
            break;
        }
        let n = io::fill(origin, origin_buf).await?;
        if n == 0 {
            anyhow::bail!("origin closed before a status line");
        }
    }

    if matches!(req, Request::Retr(_)) && parser.status() == Some(Status::Ok) {
        let cfg_snapshot = config.read().await.clone();
        if cfg_snapshot.et_activated && cfg_snapshot.filter_command.is_some() {
            driver.transition(Phase::ExternalTransformation);
            et::run(
                origin,
                client,
                origin_buf,
                &cfg_snapshot,
                metrics,
                session.user.as_deref(),
            )
            .await?;
            driver.transition(Phase::Response);
            metrics.on_retrieved_message();
            return Ok(true);
        }
    }

    drain_response(origin, origin_buf, &mut parser).await?;

    let wire: Vec<u8> = if multiline {
        let mut body = parser.body().to_vec();
        if matches!(req, Request::Capa) {
            let entries = Response::capa_entries(&body);
            if !Response::has_pipelining(&entries) {
                body = inject_pipelining(&body);
            }
        }
        format_multiline(parser.first_line(), &body)
    } else {
        format!("{}\r\n", parser.first_line()).into_bytes()
    };

    io::write_all(client, &wire).await?;

    if matches!(req, Request::Retr(_)) {
        metrics.add_transferred_bytes(wire.len() as u64);
        metrics.on_retrieved_message();
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::metrics::Metrics;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A minimal origin stub: greets, answers CAPA with no PIPELINING,
    /// then echoes `+OK` to anything except STAT/QUIT, which get
    /// realistic replies. Good enough to drive the proxy's own FSM
    /// end-to-end without a real mail store.
    async fn spawn_stub_origin() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"+OK dewey POP3 server ready\r\n")
                .await
                .unwrap();

            let mut buf = [0u8; 512];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"CAPA\r\n");
            sock.write_all(b"+OK Capability list follows\r\nTOP\r\nUIDL\r\n.\r\n")
                .await
                .unwrap();

            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                match &buf[..n] {
                    b"QUIT\r\n" => {
                        sock.write_all(b"+OK dewey POP3 server signing off\r\n")
                            .await
                            .unwrap();
                        break;
                    }
                    b"STAT\r\n" => {
                        sock.write_all(b"+OK 2 320\r\n").await.unwrap();
                    }
                    _ => {
                        sock.write_all(b"+OK\r\n").await.unwrap();
                    }
                }
            }
        });
        (addr, handle)
    }

    async fn spawn_proxy(origin_addr: SocketAddr) -> (SocketAddr, SharedConfig, Arc<Metrics>) {
        let config = config::shared(Config {
            origin_server: origin_addr.ip().to_string(),
            origin_port: origin_addr.port(),
            ..Config::default()
        });
        let metrics = Arc::new(Metrics::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();

        let server_config = config.clone();
        let server_metrics = metrics.clone();
        let pool = Arc::new(crate::pool::BufferPool::new(BUF_CAPACITY));
        tokio::spawn(async move {
            let (sock, peer) = listener.accept().await.unwrap();
            run(1, sock, peer, server_config, server_metrics, pool).await;
        });

        (proxy_addr, config, metrics)
    }

    #[tokio::test]
    async fn full_session_relays_stat_and_quit() {
        let (origin_addr, origin_task) = spawn_stub_origin().await;
        let (proxy_addr, _config, metrics) = spawn_proxy(origin_addr).await;

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let mut buf = vec![0u8; 4096];

        let mut banner = Vec::new();
        loop {
            let n = client.read(&mut buf).await.unwrap();
            banner.extend_from_slice(&buf[..n]);
            if banner.ends_with(b"dewey POP3 server ready\r\n") {
                break;
            }
        }
        let banner = String::from_utf8_lossy(&banner);
        assert!(banner.starts_with("+OK Proxy server POP3 ready.\r\n"));
        assert!(banner.contains("dewey POP3 server ready"));

        client.write_all(b"STAT\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK 2 320\r\n");

        client.write_all(b"QUIT\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("+OK"));

        origin_task.await.unwrap();
        assert_eq!(metrics.snapshot().historical_access, 1);
    }

    #[tokio::test]
    async fn three_invalid_commands_in_a_row_end_the_session() {
        let (origin_addr, _origin_task) = spawn_stub_origin().await;
        let (proxy_addr, _config, _metrics) = spawn_proxy(origin_addr).await;

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = client.read(&mut buf).await.unwrap(); // banner

        client
            .write_all(b"ZZZ\r\nZZZ\r\nZZZ\r\n")
            .await
            .unwrap();

        let mut received = Vec::new();
        loop {
            let n = client.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
            if received.ends_with(b"Too many invalid commands. (POPG)\n") {
                break;
            }
        }
        let text = String::from_utf8_lossy(&received);
        assert!(text.contains("Unknown command"));
        assert!(text.ends_with("Too many invalid commands. (POPG)\n"));

        // the server closes its side right after the final line.
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn pipelined_commands_are_answered_in_order() {
        let (origin_addr, origin_task) = spawn_stub_origin().await;
        let (proxy_addr, _config, _metrics) = spawn_proxy(origin_addr).await;

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = client.read(&mut buf).await.unwrap(); // banner

        client.write_all(b"NOOP\r\nSTAT\r\nQUIT\r\n").await.unwrap();

        let mut received = Vec::new();
        loop {
            let n = client.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
            if received.ends_with(b"signing off\r\n") {
                break;
            }
        }
        let text = String::from_utf8_lossy(&received);
        assert!(text.contains("+OK 2 320"));
        assert!(text.ends_with("signing off\r\n"));

        origin_task.await.unwrap();
    }
}
