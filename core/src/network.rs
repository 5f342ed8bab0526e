//! Live sockets and the options they are created with.

use std::io;
use std::net::SocketAddr;

use rcat_common::config::{ConnectionSpec, Transport};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

pub mod tcp;
pub mod udp;

use udp::UdpLink;

pub type NetReader = Box<dyn AsyncRead + Send + Unpin>;
pub type NetWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Socket-level knobs applied before bind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketOptions {
    pub tos: Option<u8>,
    pub broadcast: bool,
    pub recv_buffer: Option<usize>,
    pub send_buffer: Option<usize>,
    pub reuse_addr: bool,
}

impl SocketOptions {
    pub fn from_spec(spec: &ConnectionSpec) -> Self {
        Self {
            tos: spec.tos,
            broadcast: spec.broadcast,
            recv_buffer: spec.recv_buffer,
            send_buffer: spec.send_buffer,
            reuse_addr: false,
        }
    }

    pub fn reusing_addr(mut self, reuse: bool) -> Self {
        self.reuse_addr = reuse;
        self
    }

    /// Creates a non-blocking socket for `addr`'s family with every option applied.
    pub(crate) fn build(&self, addr: &SocketAddr, ty: Type, protocol: Protocol) -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(*addr), ty, Some(protocol))?;

        if self.reuse_addr {
            socket.set_reuse_address(true)?;
        }
        if self.broadcast && ty == Type::DGRAM {
            socket.set_broadcast(true)?;
        }
        if let Some(size) = self.recv_buffer {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.send_buffer {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(tos) = self.tos {
            if addr.is_ipv4() {
                socket.set_tos(u32::from(tos))?;
            } else {
                debug!(tos, "type of service only applies to IPv4 sockets, ignored");
            }
        }

        socket.set_nonblocking(true)?;
        Ok(socket)
    }
}

/// The network half of a relay.
#[derive(Debug)]
pub enum Link {
    Tcp(TcpStream),
    Udp(UdpLink),
}

impl Link {
    pub fn into_split(self) -> (NetReader, NetWriter) {
        match self {
            Link::Tcp(stream) => {
                let (reader, writer) = stream.into_split();
                (Box::new(reader), Box::new(writer))
            }
            Link::Udp(link) => {
                let (reader, writer) = link.into_split();
                (Box::new(reader), Box::new(writer))
            }
        }
    }
}

/// An established connection, owned by exactly one relay.
///
/// For a proxied connection `remote` is the proxy, not the final target.
#[derive(Debug)]
pub struct LiveConnection {
    pub link: Link,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub transport: Transport,
    /// Bytes received before the relay started: the datagram that locked a UDP listener's peer.
    pub initial: Option<Vec<u8>>,
}

impl LiveConnection {
    pub fn tcp(stream: TcpStream) -> io::Result<Self> {
        Ok(Self {
            local: stream.local_addr()?,
            remote: stream.peer_addr()?,
            link: Link::Tcp(stream),
            transport: Transport::Tcp,
            initial: None,
        })
    }

    /// `socket` must already be connected to its peer.
    pub fn udp(socket: UdpSocket, initial: Option<Vec<u8>>) -> io::Result<Self> {
        Ok(Self {
            local: socket.local_addr()?,
            remote: socket.peer_addr()?,
            link: Link::Udp(UdpLink::new(socket)),
            transport: Transport::Udp,
            initial,
        })
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
