//! # Bidirectional relay
//!
//! Moves bytes between a [`LiveConnection`] and a [`LocalIo`] until both
//! directions are done, one of them breaks, the idle window expires or the
//! caller cancels.
//!
//! The two directions are independent pumps. They share a pair of byte
//! counters and a [`Notify`] that tells the driver something moved, which
//! is what keeps the idle watchdog from firing. No locks are involved.
//!
//! Outgoing data (local to network) can be reshaped on the way:
//! * `crlf`: every bare `\n` becomes `\r\n`, also when the `\r` arrived in
//!   the previous read.
//! * `interval`: each line is held back for the interval before it is sent.

use std::borrow::Cow;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rcat_common::config::ConnectionSpec;
use rcat_common::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::local::LocalIo;
use crate::network::LiveConnection;

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Stands in for "no deadline" on timers that are disabled.
const NEVER: Duration = Duration::from_secs(60 * 60 * 24 * 365);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    pub crlf: bool,
    pub interval: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub half_close: bool,
    pub quit_after_eof: Option<Duration>,
    pub detach_stdin: bool,
    pub buffer_size: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            crlf: false,
            interval: None,
            idle_timeout: None,
            half_close: true,
            quit_after_eof: None,
            detach_stdin: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl RelayOptions {
    pub fn from_spec(spec: &ConnectionSpec) -> Self {
        Self {
            crlf: spec.crlf,
            interval: spec.interval,
            idle_timeout: spec.idle_window(),
            half_close: spec.half_close,
            quit_after_eof: spec.quit_after_eof,
            detach_stdin: spec.detach_stdin,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Why a relay stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Both directions reached EOF.
    Completed,
    /// The network side closed or broke and that ended the relay.
    RemoteClosed,
    /// The local side closed or broke and that ended the relay.
    LocalClosed,
    /// The `quit_after_eof` delay ran out after local EOF.
    QuitAfterEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Bytes written to the network, after CRLF expansion.
    pub bytes_sent: u64,
    /// Bytes written to the local side, including a UDP listener's first datagram.
    pub bytes_received: u64,
    pub reason: TerminationReason,
}

/// How one direction finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    Eof,
    ReaderGone,
    WriterGone,
}

/// Relays until done. Both sides are shut down and dropped before this
/// returns, on every path, and a spawned local program is killed.
pub async fn relay(
    conn: LiveConnection,
    local: LocalIo,
    opts: &RelayOptions,
    cancel: &CancellationToken,
) -> Result<RelayOutcome> {
    let LiveConnection {
        link,
        remote,
        initial,
        ..
    } = conn;
    let (mut net_reader, mut net_writer) = link.into_split();
    let LocalIo {
        reader: mut local_reader,
        writer: mut local_writer,
        mut child,
    } = local;

    let counters = Counters::default();

    let result = async {
        if let Some(data) = initial.filter(|data| !data.is_empty()) {
            local_writer.write_all(&data).await?;
            local_writer.flush().await?;
            counters.received.fetch_add(data.len() as u64, Ordering::Relaxed);
        }

        exchange(
            &mut net_reader,
            &mut net_writer,
            &mut local_reader,
            &mut local_writer,
            opts,
            cancel,
            &counters,
        )
        .await
    }
    .await;

    let _ = net_writer.shutdown().await;
    let _ = local_writer.shutdown().await;
    drop((net_reader, net_writer, local_reader, local_writer));

    if let Some(child) = child.as_mut() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }

    let outcome = RelayOutcome {
        bytes_sent: counters.sent.load(Ordering::Relaxed),
        bytes_received: counters.received.load(Ordering::Relaxed),
        reason: result?,
    };
    debug!(%remote, ?outcome, "relay finished");
    Ok(outcome)
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    activity: Notify,
}

async fn exchange<NR, NW, LR, LW>(
    net_reader: &mut NR,
    net_writer: &mut NW,
    local_reader: &mut LR,
    local_writer: &mut LW,
    opts: &RelayOptions,
    cancel: &CancellationToken,
    counters: &Counters,
) -> Result<TerminationReason>
where
    NR: AsyncRead + Unpin,
    NW: AsyncWrite + Unpin,
    LR: AsyncRead + Unpin,
    LW: AsyncWrite + Unpin,
{
    let inbound = pump(
        net_reader,
        local_writer,
        Shaper::passthrough(),
        &counters.received,
        &counters.activity,
        opts,
    );
    let outbound = pump(
        local_reader,
        net_writer,
        Shaper::outgoing(opts),
        &counters.sent,
        &counters.activity,
        opts,
    );
    tokio::pin!(inbound, outbound);

    let mut inbound_done = false;
    let mut outbound_done = opts.detach_stdin;

    let idle_window = opts.idle_timeout.unwrap_or(NEVER);
    let idle = sleep(idle_window);
    let quit = sleep(NEVER);
    tokio::pin!(idle, quit);
    let mut quit_armed = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),

            end = &mut inbound, if !inbound_done => {
                inbound_done = true;
                match end? {
                    PumpEnd::Eof => {
                        debug!("network reached EOF");
                        if opts.detach_stdin || !opts.half_close {
                            return Ok(TerminationReason::RemoteClosed);
                        }
                        if outbound_done {
                            return Ok(TerminationReason::Completed);
                        }
                    }
                    PumpEnd::ReaderGone => return Ok(TerminationReason::RemoteClosed),
                    PumpEnd::WriterGone => return Ok(TerminationReason::LocalClosed),
                }
            }

            end = &mut outbound, if !outbound_done => {
                outbound_done = true;
                match end? {
                    PumpEnd::Eof => {
                        debug!("local input reached EOF");
                        if !opts.half_close {
                            return Ok(TerminationReason::LocalClosed);
                        }
                        if inbound_done {
                            return Ok(TerminationReason::Completed);
                        }
                        if let Some(delay) = opts.quit_after_eof {
                            quit.as_mut().reset(Instant::now() + delay);
                            quit_armed = true;
                        }
                    }
                    PumpEnd::ReaderGone => return Ok(TerminationReason::LocalClosed),
                    PumpEnd::WriterGone => return Ok(TerminationReason::RemoteClosed),
                }
            }

            _ = counters.activity.notified() => {
                idle.as_mut().reset(Instant::now() + idle_window);
            }

            _ = &mut idle, if opts.idle_timeout.is_some() => {
                return Err(Error::RelayTimeout(idle_window));
            }

            _ = &mut quit, if quit_armed => return Ok(TerminationReason::QuitAfterEof),
        }
    }
}

/// Copies `reader` into `writer` until EOF.
///
/// With half-close the writer is shut down at EOF so the peer sees it.
/// A reset or broken pipe on either end is reported, not raised.
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    mut shaper: Shaper,
    counter: &AtomicU64,
    activity: &Notify,
    opts: &RelayOptions,
) -> io::Result<PumpEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; opts.buffer_size];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if is_disconnect(&e) => return Ok(PumpEnd::ReaderGone),
            Err(e) => return Err(e),
        };
        activity.notify_one();

        match shaper.forward(writer, &buf[..n], counter).await {
            Ok(()) => activity.notify_one(),
            Err(e) if is_disconnect(&e) => return Ok(PumpEnd::WriterGone),
            Err(e) => return Err(e),
        }
    }

    if opts.half_close {
        let _ = writer.shutdown().await;
    }
    Ok(PumpEnd::Eof)
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// Rewrites and paces one direction's data.
#[derive(Debug, Default)]
struct Shaper {
    crlf: Option<CrlfEncoder>,
    interval: Option<Duration>,
}

impl Shaper {
    fn passthrough() -> Self {
        Self::default()
    }

    fn outgoing(opts: &RelayOptions) -> Self {
        Self {
            crlf: opts.crlf.then(CrlfEncoder::default),
            interval: opts.interval,
        }
    }

    async fn forward<W>(&mut self, writer: &mut W, chunk: &[u8], counter: &AtomicU64) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let data: Cow<'_, [u8]> = match self.crlf.as_mut() {
            Some(encoder) => Cow::Owned(encoder.encode(chunk)),
            None => Cow::Borrowed(chunk),
        };

        match self.interval {
            None => {
                writer.write_all(&data).await?;
                writer.flush().await?;
                counter.fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            Some(pause) => {
                for line in data.split_inclusive(|byte| *byte == b'\n') {
                    sleep(pause).await;
                    writer.write_all(line).await?;
                    writer.flush().await?;
                    counter.fetch_add(line.len() as u64, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }
}

/// `\n` to `\r\n`, leaving existing `\r\n` pairs alone across chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct CrlfEncoder {
    last: Option<u8>,
}

impl CrlfEncoder {
    pub(crate) fn encode(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len() + chunk.len() / 8 + 1);
        for &byte in chunk {
            if byte == b'\n' && self.last != Some(b'\r') {
                out.push(b'\r');
            }
            out.push(byte);
            self.last = Some(byte);
        }
        out
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
