use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{GatewayConfig, UpstreamProxy};
use crate::error::{GatewayError, Result};
use crate::session;

/// Bind the configured listen address. Failure here is fatal.
pub async fn bind(config: &GatewayConfig) -> Result<TcpListener> {
    TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: config.listen_addr.clone(),
            source,
        })
}

/// Bind and serve forever.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let listener = bind(&config).await?;
    info!("SOCKS5 server listening on {}", config.listen_addr);
    serve(listener, config.upstream).await;
    Ok(())
}

/// Accept connections on a pre-bound listener, one task per client.
///
/// Accept errors are logged and the loop carries on; sessions share
/// nothing but the upstream address.
pub async fn serve(listener: TcpListener, upstream: UpstreamProxy) {
    let upstream = Arc::new(upstream);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                continue;
            }
        };
        info!("New connection from {addr}");

        let upstream = Arc::clone(&upstream);
        let span = info_span!("session", peer = %addr);
        tokio::spawn(
            async move {
                match session::handle_client(stream, &upstream).await {
                    Ok(stats) => info!(
                        sent = stats.client_to_upstream,
                        received = stats.upstream_to_client,
                        "Connection closed"
                    ),
                    Err(e) => warn!("Connection failed: {e}"),
                }
            }
            .instrument(span),
        );
    }
}
