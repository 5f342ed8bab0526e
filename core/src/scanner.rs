//! Zero-I/O port probing.
//!
//! A [`Prober`] classifies one port; [`scan_with`] drives it over a port
//! list and yields results lazily, in the order the ports were given, no
//! matter which probe finishes first.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use rcat_common::network::endpoint::Family;
use socket2::{Protocol, Type};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Instant};
use tracing::trace;

use crate::network::{tcp, SocketOptions};

/// Payload of a UDP probe.
const UDP_PROBE: &[u8] = b"X";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanStatus {
    Open,
    /// Actively refused: RST for TCP, ICMP port unreachable for UDP.
    Closed,
    /// No answer before the timeout, or any other failure.
    Filtered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub port: u16,
    pub status: ScanStatus,
    pub elapsed: Duration,
}

impl ScanResult {
    pub fn is_open(&self) -> bool {
        self.status == ScanStatus::Open
    }
}

/// Defines the strategy for probing transport-layer ports.
///
/// A probe never fails: whatever goes wrong is folded into a status.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, port: u16) -> ScanResult;
}

/// Full TCP handshake, closed again right away.
#[derive(Debug, Clone)]
pub struct TcpProber {
    ip: IpAddr,
    source: Option<SocketAddr>,
    timeout: Duration,
    opts: SocketOptions,
}

impl TcpProber {
    pub fn new(ip: IpAddr, timeout: Duration) -> Self {
        Self {
            ip,
            source: None,
            timeout,
            opts: SocketOptions::default(),
        }
    }

    pub fn with_source(mut self, source: Option<SocketAddr>) -> Self {
        self.source = source;
        self
    }

    pub fn with_options(mut self, opts: SocketOptions) -> Self {
        self.opts = opts;
        self
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, port: u16) -> ScanResult {
        let started = Instant::now();
        let target = SocketAddr::new(self.ip, port);

        let status = match tcp::socket(&target, self.source, &self.opts) {
            Err(e) => {
                trace!(port, error = %e, "probe socket failed");
                ScanStatus::Filtered
            }
            Ok(socket) => match timeout(self.timeout, socket.connect(target)).await {
                Ok(Ok(_stream)) => ScanStatus::Open,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => ScanStatus::Closed,
                Ok(Err(_)) | Err(_) => ScanStatus::Filtered,
            },
        };

        ScanResult {
            port,
            status,
            elapsed: started.elapsed(),
        }
    }
}

/// Sends a one-byte datagram and waits for anything to come back.
#[derive(Debug, Clone)]
pub struct UdpProber {
    ip: IpAddr,
    source: Option<SocketAddr>,
    timeout: Duration,
    opts: SocketOptions,
}

impl UdpProber {
    pub fn new(ip: IpAddr, timeout: Duration) -> Self {
        Self {
            ip,
            source: None,
            timeout,
            opts: SocketOptions::default(),
        }
    }

    pub fn with_source(mut self, source: Option<SocketAddr>) -> Self {
        self.source = source;
        self
    }

    pub fn with_options(mut self, opts: SocketOptions) -> Self {
        self.opts = opts;
        self
    }

    async fn exchange(&self, target: SocketAddr) -> std::io::Result<()> {
        let local = self
            .source
            .unwrap_or_else(|| SocketAddr::new(Family::of(&target.ip()).unspecified(), 0));
        let fixed_port = local.port() != 0;
        let socket = self
            .opts
            .reusing_addr(self.opts.reuse_addr || fixed_port)
            .build(&local, Type::DGRAM, Protocol::UDP)?;
        socket.bind(&local.into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        socket.connect(target).await?;
        socket.send(UDP_PROBE).await?;

        let mut reply = [0u8; 64];
        socket.recv(&mut reply).await?;
        Ok(())
    }
}

#[async_trait]
impl Prober for UdpProber {
    async fn probe(&self, port: u16) -> ScanResult {
        let started = Instant::now();
        let target = SocketAddr::new(self.ip, port);

        let status = match timeout(self.timeout, self.exchange(target)).await {
            Ok(Ok(())) => ScanStatus::Open,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => ScanStatus::Closed,
            Ok(Err(_)) | Err(_) => ScanStatus::Filtered,
        };

        ScanResult {
            port,
            status,
            elapsed: started.elapsed(),
        }
    }
}

/// Probes `ports` and yields one result per port, in the given order.
///
/// Up to `concurrency` probes run at once. With an `interval` the probes
/// run one by one with that pause between them.
pub fn scan_with(
    prober: Arc<dyn Prober>,
    ports: Vec<u16>,
    concurrency: usize,
    interval: Option<Duration>,
) -> BoxStream<'static, ScanResult> {
    match interval {
        Some(pause) => stream::iter(ports.into_iter().enumerate())
            .then(move |(index, port)| {
                let prober = Arc::clone(&prober);
                async move {
                    if index > 0 {
                        sleep(pause).await;
                    }
                    prober.probe(port).await
                }
            })
            .boxed(),
        None => stream::iter(ports)
            .map(move |port| {
                let prober = Arc::clone(&prober);
                async move { prober.probe(port).await }
            })
            .buffered(concurrency.max(1))
            .boxed(),
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
