use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::UpstreamProxy;
use crate::error::{GatewayError, Result};
use crate::http_connect;
use crate::relay::{self, RelayStats};
use crate::socks5::{self, reply};

/// Handle a single SOCKS5 client connection end-to-end.
///
/// The success reply is only sent once the upstream proxy has accepted
/// the CONNECT; every later failure is reported with a SOCKS5 error reply
/// when the protocol state allows one. Both connections are closed when
/// this returns.
pub async fn handle_client(mut stream: TcpStream, upstream: &UpstreamProxy) -> Result<RelayStats> {
    // ── Phase 1: Authentication negotiation ──────────────────────────
    socks5::negotiate_auth(&mut stream).await?;

    // ── Phase 2: Read the CONNECT request ────────────────────────────
    let target = match socks5::read_connect_request(&mut stream).await {
        Ok(target) => target,
        Err(e) => return Err(reject(&mut stream, e).await),
    };
    info!(target = %target, "SOCKS5 CONNECT");

    // ── Phase 3: Open the tunnel through the HTTP proxy ──────────────
    let tunnel = match http_connect::open_tunnel(upstream, &target).await {
        Ok(tunnel) => tunnel,
        Err(e) => return Err(reject(&mut stream, e).await),
    };

    // ── Phase 4: Send success reply ──────────────────────────────────
    socks5::send_reply(&mut stream, reply::SUCCEEDED).await?;
    if !tunnel.pending.is_empty() {
        debug!(bytes = tunnel.pending.len(), "Forwarding early tunnel data");
        stream
            .write_all(&tunnel.pending)
            .await
            .map_err(GatewayError::client("forwarding early tunnel data"))?;
    }
    info!(target = %target, upstream = %upstream, "Tunnel established");

    // ── Phase 5: Bidirectional relay ─────────────────────────────────
    Ok(relay::relay(stream, tunnel.stream).await)
}

/// Tell the client why its request failed, if the protocol allows it.
async fn reject(stream: &mut TcpStream, err: GatewayError) -> GatewayError {
    if let Some(code) = err.reply_code() {
        // Best effort: the connection is closed either way.
        if let Err(e) = socks5::send_reply(stream, code).await {
            debug!("Failed to send SOCKS5 error reply: {e}");
        }
    }
    err
}
