use anyhow::{Context, Result};
use clap::Parser;
use socks_http_gateway::config::{DEFAULT_LISTEN_ADDR, DEFAULT_UPSTREAM_URL};
use socks_http_gateway::{server, GatewayConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "socks-http-gateway")]
#[command(about = "SOCKS5 proxy that tunnels every connection through an HTTP CONNECT proxy")]
struct Args {
    /// Local address to listen on for SOCKS5 connections
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// URL of the upstream HTTP proxy
    #[arg(short, long, default_value = DEFAULT_UPSTREAM_URL)]
    upstream: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    info!(
        listen = %args.listen,
        upstream = %args.upstream,
        "Starting SOCKS5-HTTP gateway"
    );

    let config = GatewayConfig::new(args.listen, &args.upstream)?;

    tokio::select! {
        res = server::run(config) => res.context("Cannot start SOCKS5 listener")?,
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
        }
    }

    Ok(())
}
