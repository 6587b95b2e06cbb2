//! Lamport node
//!
//! Runs one cluster peer: RPC listener for other peers, HTTP control
//! surface, and an interactive console.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use clap::Parser;
use lamport_cluster::{Node, NodeConfig, ReplyPolicy, RpcServer, TcpTransport, DEFAULT_PROBE_TIMEOUT_MS};
use lamport_core::PeerAddress;
use lamport_server::{api, console, logging};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Offset between the RPC port and the default HTTP port
const HTTP_PORT_OFFSET: u16 = 1000;

#[derive(Parser)]
#[command(name = "lamport-node")]
#[command(about = "Lamport mutual exclusion peer", long_about = None)]
struct Args {
    /// Host advertised to other peers
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// RPC port
    #[arg(short, long, default_value_t = 2010)]
    port: u16,

    /// Interface to bind the listeners on
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// HTTP port, defaults to the RPC port plus 1000
    #[arg(long)]
    http_port: Option<u16>,

    /// Delay before every outbound message, in milliseconds
    #[arg(short, long, default_value_t = 0)]
    delay_ms: u64,

    /// Liveness probe timeout, in milliseconds
    #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT_MS)]
    probe_timeout_ms: u64,

    /// Reply discipline: immediate or deferred
    #[arg(long, default_value = "deferred")]
    reply_policy: ReplyPolicy,

    /// Bootstrap peer to join on startup, as host:port
    #[arg(short, long)]
    join: Option<PeerAddress>,

    /// Directory for the per-node log file
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,

    /// Emit JSON logs on stdout
    #[arg(long)]
    log_json: bool,

    /// Run without the interactive console
    #[arg(long)]
    no_console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let address = PeerAddress::new(args.host.clone(), args.port);
    let config = NodeConfig::new(address)
        .with_probe_timeout(args.probe_timeout_ms)
        .with_message_delay(args.delay_ms)
        .with_reply_policy(args.reply_policy);
    logging::init(&args.log_dir, config.peer_id(), args.log_json)?;

    let node = Arc::new(Node::new(config, Arc::new(TcpTransport::new())));
    info!(node = %node.id(), address = %node.address(), policy = %args.reply_policy, "node starting");

    let rpc = TcpListener::bind((args.bind.as_str(), args.port))
        .await
        .with_context(|| format!("binding rpc port {}", args.port))?;
    let http_port = args
        .http_port
        .unwrap_or_else(|| args.port.saturating_add(HTTP_PORT_OFFSET));
    let http = TcpListener::bind((args.bind.as_str(), http_port))
        .await
        .with_context(|| format!("binding http port {}", http_port))?;

    let server = RpcServer::new(Arc::clone(&node));
    tokio::spawn(async move {
        if let Err(e) = server.serve(rpc).await {
            error!(error = %e, "rpc server stopped");
        }
    });

    let app = api::router(Arc::clone(&node));
    info!(port = http_port, "http control surface listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(http, app).await {
            error!(error = %e, "http server stopped");
        }
    });

    if let Some(bootstrap) = args.join {
        match node.join_network(&bootstrap).await {
            Ok(members) => info!(via = %bootstrap, members, "joined on startup"),
            Err(e) => error!(via = %bootstrap, error = %e, "startup join failed"),
        }
    }

    if args.no_console {
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    } else {
        console::run(Arc::clone(&node)).await?;
    }

    if let Err(e) = node.leave().await {
        error!(error = %e, "leave on shutdown failed");
    }
    info!("node stopped");
    Ok(())
}
