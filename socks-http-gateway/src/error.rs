use std::io;

use crate::socks5::reply;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Everything that can end a session early.
///
/// Variants map onto the SOCKS5 reply the client receives through
/// [`GatewayError::reply_code`]. Errors raised before the client has
/// been told anything about its request map to `None`.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid upstream proxy URL {url:?}: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unsupported SOCKS command: {0} (only CONNECT is supported)")]
    UnsupportedCommand(u8),

    #[error("Unsupported address type: {0}")]
    UnsupportedAddressType(u8),

    #[error("Invalid domain name in request: {0}")]
    InvalidDomain(String),

    #[error("Client I/O failed while {context}: {source}")]
    Client {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to HTTP proxy {addr}: {source}")]
    UpstreamDial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("HTTP proxy I/O failed while {context}: {source}")]
    UpstreamIo {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Empty response from HTTP proxy")]
    EmptyResponse,

    #[error("Invalid response from HTTP proxy: {0}")]
    MalformedResponse(String),

    #[error("HTTP proxy returned status code {code}: {line}")]
    UpstreamStatus { code: u16, line: String },
}

impl GatewayError {
    pub(crate) fn client(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| GatewayError::Client { context, source }
    }

    pub(crate) fn upstream_io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| GatewayError::UpstreamIo { context, source }
    }

    /// SOCKS5 reply code to send before closing, if any.
    pub fn reply_code(&self) -> Option<u8> {
        match self {
            GatewayError::Bind { .. }
            | GatewayError::InvalidUpstream { .. }
            | GatewayError::UnsupportedVersion(_)
            | GatewayError::Client { .. } => None,
            GatewayError::UnsupportedCommand(_) => Some(reply::COMMAND_NOT_SUPPORTED),
            GatewayError::UnsupportedAddressType(_) => Some(reply::ADDRESS_TYPE_NOT_SUPPORTED),
            GatewayError::InvalidDomain(_) => Some(reply::GENERAL_FAILURE),
            GatewayError::UpstreamDial { source, .. } => Some(match source.kind() {
                io::ErrorKind::ConnectionRefused => reply::CONNECTION_REFUSED,
                io::ErrorKind::NetworkUnreachable => reply::NETWORK_UNREACHABLE,
                io::ErrorKind::HostUnreachable => reply::HOST_UNREACHABLE,
                _ => reply::GENERAL_FAILURE,
            }),
            GatewayError::UpstreamIo { .. }
            | GatewayError::EmptyResponse
            | GatewayError::MalformedResponse(_) => Some(reply::GENERAL_FAILURE),
            GatewayError::UpstreamStatus { code, .. } => Some(match code {
                403 | 407 => reply::CONNECTION_NOT_ALLOWED,
                502 | 503 => reply::HOST_UNREACHABLE,
                504 => reply::TTL_EXPIRED,
                _ => reply::GENERAL_FAILURE,
            }),
        }
    }
}
