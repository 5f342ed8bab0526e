//! # Listen mode
//!
//! A [`Listener`] owns one bound acceptor and serves clients strictly one
//! after another:
//!
//! ```text
//! Idle -> Accepting -> Relaying -> Accepting   (keep listening)
//!                              \-> Terminated  (otherwise)
//! ```
//!
//! Without keep-listening the acceptor is closed as soon as the first client
//! is accepted, so nobody else can ever connect. A UDP "client" is whoever
//! sends the first datagram. The socket is then connected to that peer and
//! only hears from it. A keep-listening UDP acceptor re-binds the same
//! address for the next peer.

use std::net::SocketAddr;

use rcat_common::config::{ConnectionSpec, Transport};
use rcat_common::error::{Error, Result};
use rcat_common::network::endpoint::Endpoint;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::local::LocalIoSource;
use crate::network::udp::{self, MAX_DATAGRAM};
use crate::network::{tcp, LiveConnection, SocketOptions};
use crate::relay::{relay, RelayOptions, RelayOutcome};

enum Acceptor {
    Tcp(TcpListener),
    /// `None` while the previous peer owns the socket.
    Udp(Option<UdpSocket>),
}

enum State {
    Idle,
    Accepting,
    Relaying(LiveConnection),
    Terminated,
}

pub struct Listener {
    acceptor: Option<Acceptor>,
    local_addr: SocketAddr,
    transport: Transport,
    keep_listening: bool,
    socket_opts: SocketOptions,
    relay_opts: RelayOptions,
    cancel: CancellationToken,
}

impl Listener {
    /// Binds `endpoint`. A bind failure is fatal and never retried.
    pub fn bind(endpoint: Endpoint, spec: &ConnectionSpec, cancel: CancellationToken) -> Result<Self> {
        let socket_opts = SocketOptions::from_spec(spec).reusing_addr(true);

        let (acceptor, local_addr) = match spec.transport {
            Transport::Tcp => {
                let listener = tcp::listen(endpoint.addr, &socket_opts)?;
                let local_addr = listener.local_addr()?;
                (Acceptor::Tcp(listener), local_addr)
            }
            Transport::Udp => {
                let socket = udp::bind(endpoint.addr, &socket_opts)?;
                let local_addr = socket.local_addr()?;
                (Acceptor::Udp(Some(socket)), local_addr)
            }
        };

        info!(
            "Listening on [{}] (family {}, port {})",
            local_addr.ip(),
            endpoint.family(),
            local_addr.port()
        );

        Ok(Self {
            acceptor: Some(acceptor),
            local_addr,
            transport: spec.transport,
            keep_listening: spec.keep_listening,
            socket_opts,
            relay_opts: RelayOptions::from_spec(spec),
            cancel,
        })
    }

    /// The bound address, with the real port when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts and relays clients until done. `local` is asked for a fresh
    /// local side for every client.
    ///
    /// With keep-listening a failed relay is logged and the next client is
    /// accepted; only cancellation or a broken acceptor ends the loop.
    pub async fn serve(mut self, local: &mut dyn LocalIoSource) -> Result<Vec<RelayOutcome>> {
        let mut outcomes: Vec<RelayOutcome> = Vec::new();
        let mut state = State::Idle;

        loop {
            state = match state {
                State::Idle => State::Accepting,

                State::Accepting => {
                    let conn = self.accept_one().await?;
                    if !self.keep_listening {
                        self.acceptor = None;
                    }
                    State::Relaying(conn)
                }

                State::Relaying(conn) => {
                    let result = match local.open() {
                        Ok(io) => relay(conn, io, &self.relay_opts, &self.cancel).await,
                        Err(e) => Err(Error::Io(e)),
                    };

                    match result {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(e) if self.keep_listening => warn!("{e}"),
                        Err(e) => return Err(e),
                    }

                    if self.keep_listening {
                        info!("Connection closed, listening again.");
                        State::Accepting
                    } else {
                        State::Terminated
                    }
                }

                State::Terminated => return Ok(outcomes),
            };
        }
    }

    async fn accept_one(&mut self) -> Result<LiveConnection> {
        let cancel = self.cancel.clone();
        let accepted = cancel.run_until_cancelled(self.accept()).await;
        let conn = accepted.unwrap_or(Err(Error::Cancelled))?;

        let peer = conn.remote;
        info!(
            "Connection from [{}] port {} [{}/*] accepted (family {}, sport {})",
            peer.ip(),
            conn.local.port(),
            self.transport,
            Endpoint::from(peer).family(),
            peer.port()
        );
        Ok(conn)
    }

    async fn accept(&mut self) -> Result<LiveConnection> {
        match self.acceptor.as_mut() {
            None => Err(Error::InvalidSpec("listener is closed".to_string())),
            Some(Acceptor::Tcp(listener)) => {
                let (stream, _peer) = listener.accept().await?;
                Ok(LiveConnection::tcp(stream)?)
            }
            Some(Acceptor::Udp(slot)) => {
                let socket = match slot.take() {
                    Some(socket) => socket,
                    None => udp::bind(self.local_addr, &self.socket_opts)?,
                };

                let mut datagram = vec![0u8; MAX_DATAGRAM];
                let (n, peer) = socket.recv_from(&mut datagram).await?;
                datagram.truncate(n);
                socket.connect(peer).await?;

                Ok(LiveConnection::udp(socket, Some(datagram))?)
            }
        }
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
