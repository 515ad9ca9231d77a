//! SOCKS5 server side: method negotiation, CONNECT request parsing and
//! reply encoding (RFC 1928 subset, no authentication).

use std::fmt;
use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{GatewayError, Result};

pub const SOCKS5_VERSION: u8 = 0x05;
pub const AUTH_NONE: u8 = 0x00;
pub const CMD_CONNECT: u8 = 0x01;
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// SOCKS5 reply codes.
#[allow(dead_code)]
pub mod reply {
    pub const SUCCEEDED: u8 = 0x00;
    pub const GENERAL_FAILURE: u8 = 0x01;
    pub const CONNECTION_NOT_ALLOWED: u8 = 0x02;
    pub const NETWORK_UNREACHABLE: u8 = 0x03;
    pub const HOST_UNREACHABLE: u8 = 0x04;
    pub const CONNECTION_REFUSED: u8 = 0x05;
    pub const TTL_EXPIRED: u8 = 0x06;
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

/// Destination host as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetHost {
    Ipv4(Ipv4Addr),
    Domain(String),
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetHost::Ipv4(ip) => write!(f, "{ip}"),
            TargetHost::Domain(domain) => f.write_str(domain),
        }
    }
}

/// Destination of a CONNECT request, rendered as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: TargetHost,
    pub port: u16,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Method negotiation. "No authentication" is selected whatever the
/// client offered; a wrong version closes the session without a reply.
pub async fn negotiate_auth<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ver = stream
        .read_u8()
        .await
        .map_err(GatewayError::client("reading version"))?;
    if ver != SOCKS5_VERSION {
        return Err(GatewayError::UnsupportedVersion(ver));
    }

    let nmethods = stream
        .read_u8()
        .await
        .map_err(GatewayError::client("reading nmethods"))? as usize;
    let mut methods = vec![0u8; nmethods];
    stream
        .read_exact(&mut methods)
        .await
        .map_err(GatewayError::client("reading methods"))?;
    debug!(?methods, "Client offered auth methods");

    stream
        .write_all(&[SOCKS5_VERSION, AUTH_NONE])
        .await
        .map_err(GatewayError::client("sending method selection"))?;
    Ok(())
}

/// Read a CONNECT request field by field.
///
/// The request is self-describing, so this keeps reading until it is
/// complete no matter how the client's bytes were segmented.
pub async fn read_connect_request<S>(stream: &mut S) -> Result<Target>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(GatewayError::client("reading request header"))?;
    let [ver, cmd, _rsv, atyp] = header;

    if ver != SOCKS5_VERSION {
        return Err(GatewayError::UnsupportedVersion(ver));
    }
    if cmd != CMD_CONNECT {
        return Err(GatewayError::UnsupportedCommand(cmd));
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream
                .read_exact(&mut octets)
                .await
                .map_err(GatewayError::client("reading IPv4 address"))?;
            TargetHost::Ipv4(Ipv4Addr::from(octets))
        }
        ATYP_DOMAIN => {
            let len = stream
                .read_u8()
                .await
                .map_err(GatewayError::client("reading domain length"))? as usize;
            if len == 0 {
                return Err(GatewayError::InvalidDomain("empty domain".to_string()));
            }
            let mut buf = vec![0u8; len];
            stream
                .read_exact(&mut buf)
                .await
                .map_err(GatewayError::client("reading domain"))?;
            let domain = String::from_utf8(buf)
                .map_err(|e| GatewayError::InvalidDomain(e.to_string()))?;
            TargetHost::Domain(domain)
        }
        // IPv6 targets are not forwarded.
        _ => return Err(GatewayError::UnsupportedAddressType(atyp)),
    };

    let port = stream
        .read_u16()
        .await
        .map_err(GatewayError::client("reading port"))?;

    Ok(Target { host, port })
}

/// Reply to a CONNECT request. BND.ADDR is always 0.0.0.0:0.
pub fn encode_reply(code: u8) -> [u8; 10] {
    [SOCKS5_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}

pub async fn send_reply<S>(stream: &mut S, code: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&encode_reply(code))
        .await
        .map_err(GatewayError::client("sending reply"))?;
    stream
        .flush()
        .await
        .map_err(GatewayError::client("sending reply"))
}
