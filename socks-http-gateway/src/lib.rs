//! SOCKS5 to HTTP CONNECT gateway.
//!
//! Accepts SOCKS5 clients, turns each CONNECT request into an HTTP
//! `CONNECT host:port` against a fixed upstream HTTP proxy, and relays
//! bytes both ways once the proxy answers `200`.

pub mod config;
pub mod error;
pub mod http_connect;
pub mod relay;
pub mod server;
pub mod session;
pub mod socks5;

pub use config::{GatewayConfig, UpstreamProxy};
pub use error::{GatewayError, Result};
pub use server::{bind, run, serve};
