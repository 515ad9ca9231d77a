//! Bidirectional byte pump between the SOCKS client and the tunnel.
//!
//! Each direction owns one read half and one write half and runs as its
//! own task. The first direction to stop cancels a shared token; the other
//! direction races every read and write against that token, so both tasks
//! exit and every half is dropped exactly once.

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const READ_BUF_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Eof,
    Cancelled,
    ReadError,
    WriteError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Copy bytes both ways until either side closes or fails, then close both.
pub async fn relay<C, U>(client: C, upstream: U) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Send + 'static,
{
    let cancel = CancellationToken::new();

    let (client_read, client_write) = io::split(client);
    let (upstream_read, upstream_write) = io::split(upstream);

    let outbound = tokio::spawn(pump(
        "client->upstream",
        client_read,
        upstream_write,
        cancel.clone(),
    ));
    let inbound = tokio::spawn(pump(
        "upstream->client",
        upstream_read,
        client_write,
        cancel.clone(),
    ));

    let (outbound, inbound) = tokio::join!(outbound, inbound);
    // A panicked direction never cancelled the token itself.
    cancel.cancel();

    RelayStats {
        client_to_upstream: joined("client->upstream", outbound),
        upstream_to_client: joined("upstream->client", inbound),
    }
}

fn joined(direction: &str, res: Result<u64, tokio::task::JoinError>) -> u64 {
    res.unwrap_or_else(|e| {
        error!("Relay task {direction} panicked: {e}");
        0
    })
}

async fn pump<R, W>(
    direction: &'static str,
    mut src: ReadHalf<R>,
    mut dst: WriteHalf<W>,
    cancel: CancellationToken,
) -> u64
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut total: u64 = 0;

    let reason = loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StopReason::Cancelled,
            result = src.read(&mut buf) => match result {
                Ok(0) => break StopReason::Eof,
                Ok(n) => n,
                Err(e) => {
                    warn!("Relay {direction} read error: {e}");
                    break StopReason::ReadError;
                }
            },
        };

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => break StopReason::Cancelled,
            result = dst.write_all(&buf[..n]) => result,
        };
        if let Err(e) = written {
            warn!("Relay {direction} write error: {e}");
            break StopReason::WriteError;
        }
        total += n as u64;
    };

    if reason != StopReason::Cancelled {
        // Flush what is buffered, then release the peer's blocked direction.
        let _ = dst.shutdown().await;
        cancel.cancel();
    }

    debug!(direction, bytes = total, ?reason, "Relay direction stopped");
    total
}
