use std::io;
use std::net::SocketAddr;

use rcat_common::config::{ProxySpec, Source};
use rcat_common::error::{Error, ProxyError, Result};
use rcat_common::network::endpoint::{Endpoint, Family};
use rcat_protocols::ProxyTarget;
use socket2::{Protocol, Type};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::network::SocketOptions;
use crate::resolver::{resolve, resolve_source};

const LISTEN_BACKLOG: i32 = 128;

/// Tries `candidates` in order until one accepts.
///
/// `deadline` covers the whole sequence, not each attempt. A source is
/// bound before every attempt and a failure to bind is not retried.
pub async fn connect(
    candidates: &[Endpoint],
    source: Option<&Source>,
    numeric: bool,
    deadline: Option<Instant>,
    opts: &SocketOptions,
    label: &str,
) -> Result<TcpStream> {
    if candidates.is_empty() {
        return Err(Error::connect(
            label,
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidate addresses"),
        ));
    }

    match deadline {
        Some(deadline) => timeout_at(deadline, try_candidates(candidates, source, numeric, opts, label))
            .await
            .map_err(|_| {
                Error::connect(label, io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))
            })?,
        None => try_candidates(candidates, source, numeric, opts, label).await,
    }
}

async fn try_candidates(
    candidates: &[Endpoint],
    source: Option<&Source>,
    numeric: bool,
    opts: &SocketOptions,
    label: &str,
) -> Result<TcpStream> {
    let mut last_error: Option<io::Error> = None;

    for endpoint in candidates {
        let local = match source {
            Some(source) => Some(resolve_source(source, endpoint, numeric).await?),
            None => None,
        };
        let socket = match socket(&endpoint.addr, local, opts) {
            Ok(socket) => socket,
            Err(e) => {
                let cause = skippable(e)?;
                debug!(%endpoint, error = %cause, "candidate socket failed");
                last_error = Some(cause);
                continue;
            }
        };

        match socket.connect(endpoint.addr).await {
            Ok(stream) => {
                debug!(%endpoint, "connected");
                return Ok(stream);
            }
            Err(e) => {
                debug!(%endpoint, error = %e, "candidate failed");
                last_error = Some(e);
            }
        }
    }

    let cause = last_error
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidate addresses"));
    Err(Error::connect(label, cause))
}

/// A socket that cannot be created for one candidate (say, IPv6 on a host
/// without it) just moves on to the next. A failed source bind stays fatal.
fn skippable(err: Error) -> Result<io::Error> {
    match err {
        Error::Io(cause) => Ok(cause),
        other => Err(other),
    }
}

/// Connects to the proxy, then asks it for `host:port`.
///
/// The target is handed to the proxy as given, so names are resolved on
/// the proxy side. The same deadline covers the connect and the handshake.
pub async fn connect_via_proxy(
    proxy: &ProxySpec,
    host: &str,
    port: u16,
    family: Family,
    numeric: bool,
    source: Option<&Source>,
    deadline: Option<Instant>,
    opts: &SocketOptions,
) -> Result<TcpStream> {
    let endpoints = resolve(Some(&proxy.address), proxy.port, family, numeric).await?;
    let label = format!("proxy {} port {}", proxy.address, proxy.port);
    let stream = connect(&endpoints, source, numeric, deadline, opts, &label).await?;

    let target = ProxyTarget::from_host(host, port);
    let handshake = rcat_protocols::negotiate(stream, proxy, &target);

    let negotiated: std::result::Result<TcpStream, ProxyError> = match deadline {
        Some(deadline) => match timeout_at(deadline, handshake).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "proxy handshake timed out",
            ))),
        },
        None => handshake.await,
    };

    Ok(negotiated?)
}

/// A TCP socket ready to connect, bound to `local` when given.
pub fn socket(remote: &SocketAddr, local: Option<SocketAddr>, opts: &SocketOptions) -> Result<TcpSocket> {
    let fixed_port = local.is_some_and(|addr| addr.port() != 0);
    let socket = opts
        .reusing_addr(opts.reuse_addr || fixed_port)
        .build(remote, Type::STREAM, Protocol::TCP)?;

    if let Some(local) = local {
        socket
            .bind(&local.into())
            .map_err(|source| Error::Bind { addr: local, source })?;
    }

    Ok(TcpSocket::from_std_stream(socket.into()))
}

/// Bound and listening, with SO_REUSEADDR.
pub fn listen(local: SocketAddr, opts: &SocketOptions) -> Result<TcpListener> {
    let socket = opts.reusing_addr(true).build(&local, Type::STREAM, Protocol::TCP)?;

    socket
        .bind(&local.into())
        .map_err(|source| Error::Bind { addr: local, source })?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|source| Error::Bind { addr: local, source })?;

    Ok(TcpListener::from_std(socket.into())?)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use rcat_common::config::ProxyProtocol;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn localhost(port: u16) -> Endpoint {
        Endpoint::from(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// A port that nothing listens on: bind, note the port, close.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn empty_candidate_set_is_a_connect_error() {
        let err = connect(&[], None, false, None, &SocketOptions::default(), "nowhere")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect { ref target, .. } if target == "nowhere"));
    }

    #[tokio::test]
    async fn refused_carries_last_cause() {
        let port = closed_port().await;
        let err = connect(&[localhost(port)], None, false, None, &SocketOptions::default(), "x")
            .await
            .unwrap_err();
        assert!(err.is_refused());
    }

    #[tokio::test]
    async fn falls_through_to_working_candidate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good = localhost(listener.local_addr().unwrap().port());
        let bad = localhost(closed_port().await);

        let stream = connect(&[bad, good], None, false, None, &SocketOptions::default(), "x")
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), good.addr);
    }

    #[tokio::test]
    async fn deadline_spans_all_candidates() {
        // TEST-NET-3 is never routed, so the attempt hangs until the deadline.
        let blackhole = Endpoint::from(SocketAddr::from(([203, 0, 113, 1], 9)));
        let deadline = Instant::now() + Duration::from_millis(200);

        let started = Instant::now();
        let result = connect(
            &[blackhole, blackhole, blackhole],
            None,
            false,
            Some(deadline),
            &SocketOptions::default(),
            "x",
        )
        .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn source_port_is_bound() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = localhost(listener.local_addr().unwrap().port());
        let source_port = closed_port().await;
        let source = Source {
            host: Some("127.0.0.1".to_string()),
            port: Some(source_port),
        };

        let stream = connect(&[target], Some(&source), true, None, &SocketOptions::default(), "x")
            .await
            .unwrap();
        assert_eq!(stream.local_addr().unwrap().port(), source_port);
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let err = listen(addr, &SocketOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Bind { addr: a, .. } if a == addr));
    }

    #[test]
    fn socket_failures_skip_but_bind_failures_do_not() {
        let unsupported = Error::Io(io::Error::from_raw_os_error(97));
        assert_eq!(skippable(unsupported).unwrap().raw_os_error(), Some(97));

        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let bind = Error::Bind {
            addr,
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(matches!(skippable(bind), Err(Error::Bind { .. })));
    }

    #[tokio::test]
    async fn ipv6_candidate_does_not_block_ipv4_fallback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Refused where IPv6 exists, no socket at all where it does not.
        let candidates = [
            Endpoint::new("::1".parse().unwrap(), port),
            Endpoint::new("127.0.0.1".parse().unwrap(), port),
        ];
        let stream = connect(&candidates, None, true, None, &SocketOptions::default(), "localhost")
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn http_proxy_rejection_surfaces_as_proxy_error() {
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_port = proxy_listener.local_addr().unwrap().port();

        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut client, _) = proxy_listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = client.read(&mut buf).await.unwrap();
            client
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();

            // The rejected stream must be closed, not left dangling.
            let mut rest = Vec::new();
            let _ = closed_tx.send(client.read_to_end(&mut rest).await.map(|_| rest));
        });

        let proxy = ProxySpec::new(ProxyProtocol::Http, "127.0.0.1", proxy_port);
        let err = connect_via_proxy(
            &proxy,
            "example.com",
            443,
            Family::Any,
            true,
            None,
            None,
            &SocketOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Proxy(ProxyError::HttpStatus(ref line)) if line.contains("407")));

        let rest = tokio::time::timeout(Duration::from_secs(2), closed_rx)
            .await
            .expect("proxy side never saw the connection close")
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());
    }
}
