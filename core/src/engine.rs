//! Orchestrates one [`ConnectionSpec`]: connect, listen or scan.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use rcat_common::config::{ConnectionSpec, Mode, Transport};
use rcat_common::error::{Error, Result};
use rcat_common::network::services::service_label;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::listener::Listener;
use crate::local::LocalIoSource;
use crate::network::{tcp, udp, LiveConnection, SocketOptions};
use crate::relay::{relay, RelayOptions, RelayOutcome};
use crate::resolver::{resolve, resolve_source};
use crate::scanner::{scan_with, Prober, ScanResult, TcpProber, UdpProber};

#[derive(Debug)]
pub enum EngineOutcome {
    Relayed(Vec<RelayOutcome>),
    Scanned(Vec<ScanResult>),
}

pub struct Engine {
    spec: ConnectionSpec,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(spec: ConnectionSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            cancel: CancellationToken::new(),
        })
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    /// Cancelling this token unblocks any connect, accept or relay in progress.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, local: &mut dyn LocalIoSource) -> Result<EngineOutcome> {
        match self.spec.mode {
            Mode::Connect => Ok(EngineOutcome::Relayed(self.connect(local).await?)),
            Mode::Listen => {
                let listener = self.bind().await?;
                Ok(EngineOutcome::Relayed(listener.serve(local).await?))
            }
            Mode::Scan => {
                let results: Vec<ScanResult> = self.scan().await?.collect().await;
                Ok(EngineOutcome::Scanned(results))
            }
        }
    }

    /// Connects to every destination port in turn and relays each.
    ///
    /// With several ports a failed connect is logged and the next port is
    /// tried. The last error is returned only if nothing connected.
    pub async fn connect(&self, local: &mut dyn LocalIoSource) -> Result<Vec<RelayOutcome>> {
        let host = self.host()?;
        let ports: Vec<u16> = if self.spec.randomize_ports {
            self.spec.destination.ports.shuffled()
        } else {
            self.spec.destination.ports.iter().collect()
        };
        let single = ports.len() == 1;
        let relay_opts = RelayOptions::from_spec(&self.spec);

        let mut outcomes: Vec<RelayOutcome> = Vec::new();
        let mut last_error: Option<Error> = None;

        for port in ports {
            let conn = match self.cancellable(self.open(host, port)).await {
                Ok(conn) => conn,
                Err(e) if single || matches!(e, Error::Cancelled) => return Err(e),
                Err(e) => {
                    warn!("connect to {host} port {port} ({}) failed: {e}", self.spec.transport);
                    last_error = Some(e);
                    continue;
                }
            };

            info!(
                "Connection to {host} {port} port [{}/{}] succeeded!",
                self.spec.transport,
                service_label(port, self.spec.transport, self.spec.numeric)
            );
            let io = local.open()?;
            outcomes.push(relay(conn, io, &relay_opts, &self.cancel).await?);
        }

        match (outcomes.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(outcomes),
        }
    }

    /// Binds the listen address. The returned listener reports its real port.
    pub async fn bind(&self) -> Result<Listener> {
        let port = self
            .spec
            .destination
            .ports
            .as_single()
            .ok_or_else(|| Error::InvalidSpec("listen mode takes exactly one port".to_string()))?;

        let endpoints = resolve(
            self.spec.destination.host.as_deref(),
            port,
            self.spec.family,
            self.spec.numeric,
        )
        .await?;
        let endpoint = endpoints
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidSpec("nothing to listen on".to_string()))?;

        Listener::bind(endpoint, &self.spec, self.cancel.clone())
    }

    /// Resolves once and returns the lazy result stream. The stream ends
    /// early when the engine is cancelled.
    pub async fn scan(&self) -> Result<BoxStream<'static, ScanResult>> {
        let host = self.host()?;
        let first_port = self.spec.destination.ports.iter().next().unwrap_or_default();
        let endpoints = resolve(Some(host), first_port, self.spec.family, self.spec.numeric).await?;
        let target = endpoints
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidSpec("nothing to scan".to_string()))?;

        let source = match &self.spec.source {
            Some(source) => Some(resolve_source(source, &target, self.spec.numeric).await?),
            None => None,
        };

        let probe_timeout = self.spec.probe_timeout();
        let prober: Arc<dyn Prober> = match self.spec.transport {
            Transport::Tcp => Arc::new(
                TcpProber::new(target.ip(), probe_timeout)
                    .with_source(source)
                    .with_options(SocketOptions::from_spec(&self.spec)),
            ),
            Transport::Udp => Arc::new(
                UdpProber::new(target.ip(), probe_timeout)
                    .with_source(source)
                    .with_options(SocketOptions::from_spec(&self.spec)),
            ),
        };

        debug!(
            target = %target.ip(),
            ports = %self.spec.destination.ports,
            concurrency = self.spec.probe_concurrency(),
            "scan started"
        );

        let ports: Vec<u16> = self.spec.destination.ports.iter().collect();
        let results = scan_with(
            prober,
            ports,
            self.spec.probe_concurrency(),
            self.spec.interval,
        );
        Ok(results
            .take_until(self.cancel.clone().cancelled_owned())
            .boxed())
    }

    async fn open(&self, host: &str, port: u16) -> Result<LiveConnection> {
        let spec = &self.spec;
        let deadline = spec.timeout.map(|timeout| Instant::now() + timeout);
        let opts = SocketOptions::from_spec(spec);
        let source = spec.source.as_ref();
        let label = format!("{host} port {port}");

        match (spec.transport, &spec.proxy) {
            (Transport::Tcp, Some(proxy)) => {
                let stream = tcp::connect_via_proxy(
                    proxy,
                    host,
                    port,
                    spec.family,
                    spec.numeric,
                    source,
                    deadline,
                    &opts,
                )
                .await?;
                Ok(LiveConnection::tcp(stream)?)
            }
            (Transport::Tcp, None) => {
                let endpoints = resolve(Some(host), port, spec.family, spec.numeric).await?;
                let stream = tcp::connect(&endpoints, source, spec.numeric, deadline, &opts, &label).await?;
                Ok(LiveConnection::tcp(stream)?)
            }
            (Transport::Udp, _) => {
                let endpoints = resolve(Some(host), port, spec.family, spec.numeric).await?;
                let socket = udp::connect(&endpoints, source, spec.numeric, &opts, &label).await?;
                Ok(LiveConnection::udp(socket, None)?)
            }
        }
    }

    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.cancel
            .run_until_cancelled(fut)
            .await
            .unwrap_or(Err(Error::Cancelled))
    }

    fn host(&self) -> Result<&str> {
        self.spec
            .destination
            .host
            .as_deref()
            .ok_or_else(|| Error::InvalidSpec("a destination host is required".to_string()))
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
