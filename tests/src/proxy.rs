#![cfg(test)]
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use rcat_common::config::{ConnectionSpec, ProxyProtocol, ProxySpec};
use rcat_common::error::{Error, ProxyError};
use rcat_common::network::target::Destination;
use rcat_core::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::support::{read_all, reversing_server, scripted};

async fn read_until_nul(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        match stream.read_u8().await? {
            0 => return Ok(out),
            byte => out.push(byte),
        }
    }
}

/// Minimal SOCKS5 server: one client, optional username/password, CONNECT
/// only. Reports the requested target and then splices to `upstream`.
async fn socks5_proxy(
    upstream: SocketAddr,
    credentials: Option<(&'static str, &'static str)>,
) -> anyhow::Result<(SocketAddr, oneshot::Receiver<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let session: anyhow::Result<()> = async {
            let (mut client, _) = listener.accept().await?;

            let mut head = [0u8; 2];
            client.read_exact(&mut head).await?;
            let mut methods = vec![0u8; usize::from(head[1])];
            client.read_exact(&mut methods).await?;

            match credentials {
                Some((user, pass)) => {
                    anyhow::ensure!(methods.contains(&0x02), "client offered no password auth");
                    client.write_all(&[0x05, 0x02]).await?;

                    let _version = client.read_u8().await?;
                    let mut username = vec![0u8; usize::from(client.read_u8().await?)];
                    client.read_exact(&mut username).await?;
                    let mut password = vec![0u8; usize::from(client.read_u8().await?)];
                    client.read_exact(&mut password).await?;

                    let accepted = username == user.as_bytes() && password == pass.as_bytes();
                    client.write_all(&[0x01, if accepted { 0x00 } else { 0x01 }]).await?;
                    if !accepted {
                        return Ok(());
                    }
                }
                None => client.write_all(&[0x05, 0x00]).await?,
            }

            let mut request = [0u8; 4];
            client.read_exact(&mut request).await?;
            let host = match request[3] {
                0x01 => {
                    let mut octets = [0u8; 4];
                    client.read_exact(&mut octets).await?;
                    Ipv4Addr::from(octets).to_string()
                }
                0x03 => {
                    let mut name = vec![0u8; usize::from(client.read_u8().await?)];
                    client.read_exact(&mut name).await?;
                    String::from_utf8(name)?
                }
                0x04 => {
                    let mut octets = [0u8; 16];
                    client.read_exact(&mut octets).await?;
                    Ipv6Addr::from(octets).to_string()
                }
                other => anyhow::bail!("unknown address type {other}"),
            };
            let port = client.read_u16().await?;
            let _ = tx.send(format!("{host}:{port}"));

            let mut server = TcpStream::connect(upstream).await?;
            client.write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 0]).await?;
            tokio::io::copy_bidirectional(&mut client, &mut server).await?;
            Ok(())
        }
        .await;
        let _ = session;
    });

    Ok((addr, rx))
}

/// SOCKS4/4a server. Reports "userid@host:port".
async fn socks4_proxy(upstream: SocketAddr) -> anyhow::Result<(SocketAddr, oneshot::Receiver<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let session: anyhow::Result<()> = async {
            let (mut client, _) = listener.accept().await?;

            let mut request = [0u8; 8];
            client.read_exact(&mut request).await?;
            anyhow::ensure!(request[0] == 0x04 && request[1] == 0x01, "not a SOCKS4 connect");
            let port = u16::from_be_bytes([request[2], request[3]]);
            let user_id = String::from_utf8(read_until_nul(&mut client).await?)?;

            let ip = Ipv4Addr::new(request[4], request[5], request[6], request[7]);
            let host = if ip.octets()[..3] == [0, 0, 0] && ip.octets()[3] != 0 {
                String::from_utf8(read_until_nul(&mut client).await?)?
            } else {
                ip.to_string()
            };
            let _ = tx.send(format!("{user_id}@{host}:{port}"));

            let mut server = TcpStream::connect(upstream).await?;
            client.write_all(&[0x00, 0x5a, 0, 0, 0, 0, 0, 0]).await?;
            tokio::io::copy_bidirectional(&mut client, &mut server).await?;
            Ok(())
        }
        .await;
        let _ = session;
    });

    Ok((addr, rx))
}

/// HTTP CONNECT proxy answering with `status`.
struct HttpProxy {
    addr: SocketAddr,
    /// The request head the client sent.
    head: oneshot::Receiver<String>,
    /// After a refusal: whatever the client sent before closing.
    after_refusal: oneshot::Receiver<Vec<u8>>,
}

async fn http_proxy(upstream: SocketAddr, status: &'static str) -> anyhow::Result<HttpProxy> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (head_tx, head) = oneshot::channel();
    let (closed_tx, after_refusal) = oneshot::channel();

    tokio::spawn(async move {
        let session: anyhow::Result<()> = async {
            let (mut client, _) = listener.accept().await?;

            let mut request = Vec::new();
            while !request.ends_with(b"\r\n\r\n") {
                request.push(client.read_u8().await?);
            }
            let _ = head_tx.send(String::from_utf8(request)?);

            client.write_all(format!("HTTP/1.1 {status}\r\n\r\n").as_bytes()).await?;
            if !status.starts_with('2') {
                let mut rest = Vec::new();
                client.read_to_end(&mut rest).await?;
                let _ = closed_tx.send(rest);
                return Ok(());
            }

            let mut server = TcpStream::connect(upstream).await?;
            tokio::io::copy_bidirectional(&mut client, &mut server).await?;
            Ok(())
        }
        .await;
        let _ = session;
    });

    Ok(HttpProxy {
        addr,
        head,
        after_refusal,
    })
}

fn proxied(host: &str, port: u16, proxy: ProxySpec) -> ConnectionSpec {
    let mut spec = ConnectionSpec::connect(Destination::new(host, port));
    spec.proxy = Some(proxy);
    spec
}

#[tokio::test]
async fn socks5_with_password_relays_both_ways() -> anyhow::Result<()> {
    let upstream = reversing_server().await?;
    let (proxy_addr, requested) = socks5_proxy(upstream, Some(("alice", "secret"))).await?;

    let proxy = ProxySpec::new(ProxyProtocol::Socks5, "127.0.0.1", proxy_addr.port())
        .with_credentials("alice", Some("secret".to_string()));
    let engine = Engine::new(proxied("internal.example", 7000, proxy))?;

    let (mut local, output) = scripted(b"ping");
    let outcomes = engine.connect(&mut local).await?;

    assert_eq!(requested.await?, "internal.example:7000");
    assert_eq!(read_all(output).await?, b"gnip");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].bytes_sent, 4);
    assert_eq!(outcomes[0].bytes_received, 4);
    Ok(())
}

#[tokio::test]
async fn socks5_wrong_password_is_auth_failure() -> anyhow::Result<()> {
    let upstream = reversing_server().await?;
    let (proxy_addr, _requested) = socks5_proxy(upstream, Some(("alice", "secret"))).await?;

    let proxy = ProxySpec::new(ProxyProtocol::Socks5, "127.0.0.1", proxy_addr.port())
        .with_credentials("alice", Some("guess".to_string()));
    let engine = Engine::new(proxied("internal.example", 7000, proxy))?;

    let (mut local, _output) = scripted(b"ping");
    let err = engine.connect(&mut local).await.unwrap_err();
    assert!(matches!(err, Error::Proxy(ProxyError::AuthFailed)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn socks4a_carries_user_id_and_hostname() -> anyhow::Result<()> {
    let upstream = reversing_server().await?;
    let (proxy_addr, requested) = socks4_proxy(upstream).await?;

    let proxy = ProxySpec::new(ProxyProtocol::Socks4, "127.0.0.1", proxy_addr.port())
        .with_credentials("bob", None);
    let engine = Engine::new(proxied("db.internal", 5432, proxy))?;

    let (mut local, output) = scripted(b"abc");
    engine.connect(&mut local).await?;

    assert_eq!(requested.await?, "bob@db.internal:5432");
    assert_eq!(read_all(output).await?, b"cba");
    Ok(())
}

#[tokio::test]
async fn http_connect_tunnels_after_200() -> anyhow::Result<()> {
    let upstream = reversing_server().await?;
    let mock = http_proxy(upstream, "200 Connection established").await?;

    let proxy = ProxySpec::new(ProxyProtocol::Http, "127.0.0.1", mock.addr.port());
    let engine = Engine::new(proxied("10.1.2.3", 443, proxy))?;

    let (mut local, output) = scripted(b"hello");
    engine.connect(&mut local).await?;

    let head = mock.head.await?;
    assert!(head.starts_with("CONNECT 10.1.2.3:443 HTTP/1.1\r\n"), "got {head:?}");
    assert!(!head.contains("Proxy-Authorization"));
    assert_eq!(read_all(output).await?, b"olleh");
    Ok(())
}

#[tokio::test]
async fn http_proxy_refusal_is_reported() -> anyhow::Result<()> {
    let upstream = reversing_server().await?;
    let mock = http_proxy(upstream, "403 Forbidden").await?;

    let proxy = ProxySpec::new(ProxyProtocol::Http, "127.0.0.1", mock.addr.port());
    let engine = Engine::new(proxied("10.1.2.3", 443, proxy))?;

    let (mut local, _output) = scripted(b"");
    let err = engine.connect(&mut local).await.unwrap_err();
    match err {
        Error::Proxy(ProxyError::HttpStatus(line)) => assert!(line.contains("403"), "got {line}"),
        other => panic!("expected HTTP status error, got {other:?}"),
    }

    // The refused connection is closed and nothing follows the request head.
    let rest = tokio::time::timeout(Duration::from_secs(2), mock.after_refusal).await??;
    assert!(rest.is_empty(), "got {rest:?}");
    Ok(())
}

#[tokio::test]
async fn socks5_sends_bracketed_ipv6_as_address() -> anyhow::Result<()> {
    let upstream = reversing_server().await?;
    let (proxy_addr, requested) = socks5_proxy(upstream, None).await?;

    let proxy = ProxySpec::new(ProxyProtocol::Socks5, "127.0.0.1", proxy_addr.port());
    let engine = Engine::new(proxied("[::1]", 22, proxy))?;

    let (mut local, output) = scripted(b"v6");
    engine.connect(&mut local).await?;

    // A domain would have come through verbatim, brackets included.
    assert_eq!(requested.await?, "::1:22");
    assert_eq!(read_all(output).await?, b"6v");
    Ok(())
}
