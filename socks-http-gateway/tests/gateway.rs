//! End-to-end tests: a SOCKS5 client talks to the gateway, which talks to
//! an in-process fake HTTP proxy.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socks_http_gateway::{serve, UpstreamProxy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const SUCCESS_REPLY: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

/// HTTP proxy stand-in: answers every CONNECT with a canned response and
/// hands the accepted socket plus the request head to the test.
struct FakeProxy {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    tunnels: mpsc::Receiver<(String, TcpStream)>,
}

impl FakeProxy {
    async fn start(response: &'static [u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (tx, tunnels) = mpsc::channel(16);

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let head = read_head(&mut stream).await;
                    stream.write_all(response).await.unwrap();
                    let _ = tx.send((head, stream)).await;
                });
            }
        });

        Self {
            addr,
            accepted,
            tunnels,
        }
    }

    fn upstream(&self) -> UpstreamProxy {
        UpstreamProxy {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
        }
    }

    async fn next_tunnel(&mut self) -> (String, TcpStream) {
        timeout(WAIT, self.tunnels.recv())
            .await
            .expect("proxy saw no CONNECT")
            .expect("proxy stopped")
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).await.unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

async fn start_gateway(upstream: UpstreamProxy) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, upstream));
    addr
}

fn domain_request(domain: &str, port: u16) -> Vec<u8> {
    let mut req = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
    req.extend_from_slice(domain.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    req
}

/// Run the handshake and send `request`; returns the stream and the reply.
async fn socks_request(gateway: SocketAddr, request: &[u8]) -> (TcpStream, [u8; 10]) {
    let mut stream = TcpStream::connect(gateway).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    timeout(WAIT, stream.read_exact(&mut method))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(method, [0x05, 0x00]);

    stream.write_all(request).await.unwrap();
    let mut reply = [0u8; 10];
    timeout(WAIT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    (stream, reply)
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("connection left open")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_domain_connect_relays_both_ways() {
    let mut proxy = FakeProxy::start(b"HTTP/1.1 200 Connection Established\r\n\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    let (mut client, reply) = socks_request(gateway, &domain_request("example.com", 443)).await;
    assert_eq!(reply, SUCCESS_REPLY);

    let (head, mut upstream) = proxy.next_tunnel().await;
    assert_eq!(
        head,
        "CONNECT example.com:443 HTTP/1.1\r\n\
         Host: example.com:443\r\n\
         Proxy-Connection: Keep-Alive\r\n\r\n"
    );

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut buf = [0u8; 18];
    timeout(WAIT, upstream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"GET / HTTP/1.1\r\n\r\n");

    upstream.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
    let mut buf = [0u8; 27];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"HTTP/1.1 204 No Content\r\n\r\n");
}

#[tokio::test]
async fn test_ipv4_connect_request_line() {
    let mut proxy = FakeProxy::start(b"HTTP/1.1 200 OK\r\n\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    let (_client, reply) =
        socks_request(gateway, &[0x05, 0x01, 0x00, 0x01, 10, 1, 2, 3, 0x1f, 0x90]).await;
    assert_eq!(reply, SUCCESS_REPLY);

    let (head, _upstream) = proxy.next_tunnel().await;
    assert!(head.starts_with("CONNECT 10.1.2.3:8080 HTTP/1.1\r\n"));
    assert!(head.contains("\r\nHost: 10.1.2.3:8080\r\n"));
}

#[tokio::test]
async fn test_forbidden_upstream_fails_session() {
    let mut proxy = FakeProxy::start(b"HTTP/1.1 403 Forbidden\r\n\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    let (mut client, reply) = socks_request(gateway, &domain_request("blocked.test", 80)).await;
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x02);
    assert_closed(&mut client).await;

    // The proxy connection is abandoned, not relayed.
    let (_, mut upstream) = proxy.next_tunnel().await;
    assert_closed(&mut upstream).await;
}

#[tokio::test]
async fn test_wrong_version_closes_without_reply() {
    let proxy = FakeProxy::start(b"HTTP/1.1 200 OK\r\n\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    let mut client = TcpStream::connect(gateway).await.unwrap();
    client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();
    assert_closed(&mut client).await;
    assert_eq!(proxy.accepted(), 0);
}

#[tokio::test]
async fn test_ipv6_target_never_dials() {
    let proxy = FakeProxy::start(b"HTTP/1.1 200 OK\r\n\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    let mut req = vec![0x05, 0x01, 0x00, 0x04];
    req.extend_from_slice(&[0u8; 15]);
    req.extend_from_slice(&[1, 0x01, 0xbb]);
    let (mut client, reply) = socks_request(gateway, &req).await;
    assert_eq!(reply[1], 0x08);
    assert_closed(&mut client).await;
    assert_eq!(proxy.accepted(), 0);
}

#[tokio::test]
async fn test_non_connect_command_never_dials() {
    let proxy = FakeProxy::start(b"HTTP/1.1 200 OK\r\n\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    // UDP ASSOCIATE
    let (mut client, reply) =
        socks_request(gateway, &[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await;
    assert_eq!(reply[1], 0x07);
    assert_closed(&mut client).await;
    assert_eq!(proxy.accepted(), 0);
}

#[tokio::test]
async fn test_unreachable_proxy_reports_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let gateway = start_gateway(UpstreamProxy {
        host: dead.ip().to_string(),
        port: dead.port(),
    })
    .await;

    let (mut client, reply) = socks_request(gateway, &domain_request("example.com", 80)).await;
    assert_eq!(reply[1], 0x05);
    assert_closed(&mut client).await;
}

#[tokio::test]
async fn test_client_close_closes_upstream() {
    let mut proxy = FakeProxy::start(b"HTTP/1.1 200 Connection Established\r\n\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    let (client, reply) = socks_request(gateway, &domain_request("example.com", 22)).await;
    assert_eq!(reply, SUCCESS_REPLY);
    let (_, mut upstream) = proxy.next_tunnel().await;

    drop(client);
    assert_closed(&mut upstream).await;
}

#[tokio::test]
async fn test_upstream_close_closes_client() {
    let mut proxy = FakeProxy::start(b"HTTP/1.1 200 Connection Established\r\n\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    let (mut client, _) = socks_request(gateway, &domain_request("example.com", 22)).await;
    let (_, upstream) = proxy.next_tunnel().await;

    drop(upstream);
    assert_closed(&mut client).await;
}

#[tokio::test]
async fn test_early_tunnel_bytes_reach_client() {
    let mut proxy = FakeProxy::start(b"HTTP/1.1 200 OK\r\n\r\nSSH-2.0-test\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    let (mut client, reply) = socks_request(gateway, &domain_request("git.test", 22)).await;
    assert_eq!(reply, SUCCESS_REPLY);
    let _tunnel = proxy.next_tunnel().await;

    let mut banner = [0u8; 14];
    timeout(WAIT, client.read_exact(&mut banner))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&banner, b"SSH-2.0-test\r\n");
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_interfere() {
    let mut proxy = FakeProxy::start(b"HTTP/1.1 200 Connection Established\r\n\r\n").await;
    let gateway = start_gateway(proxy.upstream()).await;

    let (mut alpha, _) = socks_request(gateway, &domain_request("alpha.test", 1001)).await;
    let (mut beta, _) = socks_request(gateway, &domain_request("beta.test", 1002)).await;

    let mut alpha_up = None;
    let mut beta_up = None;
    for _ in 0..2 {
        let (head, stream) = proxy.next_tunnel().await;
        if head.starts_with("CONNECT alpha.test:1001 ") {
            alpha_up = Some(stream);
        } else if head.starts_with("CONNECT beta.test:1002 ") {
            beta_up = Some(stream);
        } else {
            panic!("unexpected CONNECT: {head}");
        }
    }
    let mut alpha_up = alpha_up.unwrap();
    let mut beta_up = beta_up.unwrap();

    alpha.write_all(b"from-alpha").await.unwrap();
    beta.write_all(b"from-beta!").await.unwrap();
    alpha_up.write_all(b"to-alpha").await.unwrap();
    beta_up.write_all(b"to-beta!").await.unwrap();

    let mut buf = [0u8; 10];
    timeout(WAIT, alpha_up.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"from-alpha");
    timeout(WAIT, beta_up.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"from-beta!");

    let mut buf = [0u8; 8];
    timeout(WAIT, alpha.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"to-alpha");
    timeout(WAIT, beta.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"to-beta!");
}
