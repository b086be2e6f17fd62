//! Acceptor & lifecycle (component J, §4.9): binds the client-facing
//! and management listeners and spawns one task per accepted
//! connection, sharing [`Metrics`] and the [`SharedConfig`] across all
//! of them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use popg_pop3::metrics::Metrics;
use popg_pop3::pool::BufferPool;
use popg_pop3::{config as pop3_config, mgmt, session};

mod config;

#[derive(Parser, Debug)]
#[command(
    name = "popg",
    about = "Transparent POP3 proxy with pluggable body filtering"
)]
pub struct Cli {
    /// Path to a TOML configuration file; flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub origin_server: Option<String>,
    #[arg(long)]
    pub origin_port: Option<u16>,

    #[arg(long)]
    pub listen_address: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub management_address: Option<String>,
    #[arg(long)]
    pub management_port: Option<u16>,

    /// Shell command to run per RETR; setting this also turns ET on.
    #[arg(long)]
    pub filter_command: Option<String>,
    #[arg(long)]
    pub error_file: Option<String>,

    #[arg(long)]
    pub user: Option<String>,
    #[arg(long)]
    pub pass: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = config::load(&cli)?;

    let listen_addr: SocketAddr = format!("{}:{}", cfg.listen_address, cfg.port)
        .parse()
        .context("parsing listen_address/port")?;
    let mgmt_addr: SocketAddr = format!("{}:{}", cfg.management_address, cfg.management_port)
        .parse()
        .context("parsing management_address/management_port")?;

    let shared_config = pop3_config::shared(cfg);
    let metrics = Arc::new(Metrics::new());
    let pool = Arc::new(BufferPool::new(session::BUF_CAPACITY));

    let client_listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding client listener on {}", listen_addr))?;
    log::info!("listening for clients on {}", listen_addr);

    let mgmt_listener = TcpListener::bind(mgmt_addr)
        .await
        .with_context(|| format!("binding management listener on {}", mgmt_addr))?;
    log::info!("listening for management connections on {}", mgmt_addr);

    let client_task = {
        let config = shared_config.clone();
        let metrics = metrics.clone();
        let pool = pool.clone();
        tokio::spawn(accept_clients(client_listener, config, metrics, pool))
    };

    let mgmt_task = {
        let config = shared_config.clone();
        let metrics = metrics.clone();
        tokio::spawn(accept_management(mgmt_listener, config, metrics))
    };

    let _ = tokio::join!(client_task, mgmt_task);
    Ok(())
}

async fn accept_clients(
    listener: TcpListener,
    config: pop3_config::SharedConfig,
    metrics: Arc<Metrics>,
    pool: Arc<BufferPool>,
) {
    let mut next_id: u64 = 0;
    loop {
        match listener.accept().await {
            Ok((sock, addr)) => {
                next_id += 1;
                let id = next_id;
                let config = config.clone();
                let metrics = metrics.clone();
                let pool = pool.clone();
                tokio::spawn(async move {
                    session::run(id, sock, addr, config, metrics, pool).await;
                });
            }
            Err(e) => log::warn!("accept failed on client listener: {}", e),
        }
    }
}

async fn accept_management(
    listener: TcpListener,
    config: pop3_config::SharedConfig,
    metrics: Arc<Metrics>,
) {
    loop {
        match listener.accept().await {
            Ok((sock, _addr)) => {
                let config = config.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    mgmt::run(sock, config, metrics).await;
                });
            }
            Err(e) => log::warn!("accept failed on management listener: {}", e),
        }
    }
}
