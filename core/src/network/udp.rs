//! UDP "connections": a socket connected to one peer, read and written as a byte stream.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use rcat_common::config::Source;
use rcat_common::error::{Error, Result};
use rcat_common::network::endpoint::Endpoint;
use socket2::{Protocol, Type};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;

use crate::network::SocketOptions;
use crate::resolver::resolve_source;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;

/// Binds a local socket and records the first candidate as its peer.
///
/// Nothing is sent, so nothing can fail here beyond the bind itself.
pub async fn connect(
    candidates: &[Endpoint],
    source: Option<&Source>,
    numeric: bool,
    opts: &SocketOptions,
    label: &str,
) -> Result<UdpSocket> {
    let remote = candidates.first().ok_or_else(|| {
        Error::connect(
            label,
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidate addresses"),
        )
    })?;

    let local = match source {
        Some(source) => resolve_source(source, remote, numeric).await?,
        None => SocketAddr::new(remote.family().unspecified(), 0),
    };

    let socket = bind(local, opts)?;
    socket
        .connect(remote.addr)
        .await
        .map_err(|e| Error::connect(label, e))?;
    Ok(socket)
}

pub fn bind(local: SocketAddr, opts: &SocketOptions) -> Result<UdpSocket> {
    let socket = opts.build(&local, Type::DGRAM, Protocol::UDP)?;
    socket
        .bind(&local.into())
        .map_err(|source| Error::Bind { addr: local, source })?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// A connected UDP socket shared by a reading and a writing half.
#[derive(Debug)]
pub struct UdpLink {
    socket: Arc<UdpSocket>,
}

impl UdpLink {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
        }
    }

    pub fn into_split(self) -> (UdpReader, UdpWriter) {
        (
            UdpReader {
                socket: Arc::clone(&self.socket),
            },
            UdpWriter {
                socket: self.socket,
            },
        )
    }
}

/// One datagram per read. Empty datagrams are skipped, since a zero-length
/// read means EOF to every consumer. An ICMP port unreachable from the peer
/// ends the stream the same way.
#[derive(Debug)]
pub struct UdpReader {
    socket: Arc<UdpSocket>,
}

impl AsyncRead for UdpReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let before = buf.filled().len();
            match ready!(self.socket.poll_recv(cx, buf)) {
                Ok(()) if buf.filled().len() == before => continue,
                Ok(()) => return Poll::Ready(Ok(())),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => return Poll::Ready(Ok(())),
                Err(e) => return Poll::Ready(Err(e)),
            }
        }
    }
}

/// One datagram per write. Shutdown is a no-op: UDP has nothing to half-close.
#[derive(Debug)]
pub struct UdpWriter {
    socket: Arc<UdpSocket>,
}

impl AsyncWrite for UdpWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn link_reads_and_writes_datagrams() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = Endpoint::from(peer.local_addr().unwrap());

        let socket = connect(&[peer_addr], None, true, &SocketOptions::default(), "peer")
            .await
            .unwrap();
        let local_addr = socket.local_addr().unwrap();
        let (mut reader, mut writer) = UdpLink::new(socket).into_split();

        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, local_addr);

        peer.send_to(b"", from).await.unwrap();
        peer.send_to(b"pong", from).await.unwrap();
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test]
    async fn empty_candidates_fail() {
        let err = connect(&[], None, true, &SocketOptions::default(), "nowhere")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }
}
