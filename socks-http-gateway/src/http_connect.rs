use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::UpstreamProxy;
use crate::error::{GatewayError, Result};
use crate::socks5::Target;

const READ_CHUNK: usize = 1024;
const MAX_RESPONSE_HEAD: usize = 8192;
const HEADER_END: &[u8] = b"\r\n\r\n";

/// An established CONNECT tunnel through the upstream proxy.
pub struct Tunnel {
    pub stream: TcpStream,
    /// Tunnel bytes that arrived together with the response header.
    pub pending: Vec<u8>,
}

/// Dial the upstream proxy and ask it to open a tunnel to `target`.
///
/// A fresh connection is opened for every call.
pub async fn open_tunnel(upstream: &UpstreamProxy, target: &Target) -> Result<Tunnel> {
    let mut stream = TcpStream::connect((upstream.host.as_str(), upstream.port))
        .await
        .map_err(|source| GatewayError::UpstreamDial {
            addr: upstream.to_string(),
            source,
        })?;
    debug!(upstream = %upstream, "Connected to HTTP proxy");

    let pending = establish(&mut stream, target).await?;
    Ok(Tunnel { stream, pending })
}

/// Send the CONNECT request over `stream` and validate the response.
///
/// Returns any bytes the proxy sent after the response header.
pub async fn establish<S>(stream: &mut S, target: &Target) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_connect_request(target);
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(GatewayError::upstream_io("sending CONNECT request"))?;
    stream
        .flush()
        .await
        .map_err(GatewayError::upstream_io("sending CONNECT request"))?;

    let head = read_response_head(stream).await?;
    debug!(status = %head.status_line, "HTTP proxy answered CONNECT");
    Ok(head.leftover)
}

pub fn build_connect_request(target: &Target) -> String {
    format!(
        "CONNECT {target} HTTP/1.1\r\n\
         Host: {target}\r\n\
         Proxy-Connection: Keep-Alive\r\n\
         \r\n"
    )
}

#[derive(Debug)]
pub struct ResponseHead {
    pub status_line: String,
    pub leftover: Vec<u8>,
}

/// Read the response header section and accept only `200`.
pub async fn read_response_head<S>(stream: &mut S) -> Result<ResponseHead>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break Some(pos);
        }
        if buf.len() >= MAX_RESPONSE_HEAD {
            return Err(GatewayError::MalformedResponse(format!(
                "response header exceeds {MAX_RESPONSE_HEAD} bytes"
            )));
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(GatewayError::upstream_io("reading CONNECT response"))?;
        if n == 0 {
            if buf.is_empty() {
                return Err(GatewayError::EmptyResponse);
            }
            break None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let status_line = first_line(&buf);
    let code = parse_status_line(&status_line)?;
    if code != 200 {
        return Err(GatewayError::UpstreamStatus {
            code,
            line: status_line,
        });
    }

    let Some(end) = header_end else {
        return Err(GatewayError::MalformedResponse(
            "connection closed before end of response header".to_string(),
        ));
    };

    Ok(ResponseHead {
        status_line,
        leftover: buf.split_off(end + HEADER_END.len()),
    })
}

/// Parse `<http-version> <status-code> <reason>` and return the code.
pub fn parse_status_line(line: &str) -> Result<u16> {
    let fields: Vec<&str> = line.split_ascii_whitespace().collect();
    if fields.len() < 3 {
        return Err(GatewayError::MalformedResponse(format!(
            "invalid status line {line:?}"
        )));
    }

    let code = fields[1];
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GatewayError::MalformedResponse(format!(
            "invalid status code {code:?}"
        )));
    }
    code.parse::<u16>()
        .map_err(|_| GatewayError::MalformedResponse(format!("invalid status code {code:?}")))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len()).position(|w| w == HEADER_END)
}

fn first_line(buf: &[u8]) -> String {
    let end = buf
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
