use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::network::endpoint::Family;
use crate::network::target::Destination;

/// Per-port wait when neither a scan timeout nor `-w` was given.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_SCAN_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Connect,
    Listen,
    /// Zero-I/O probing of a port range (`-z`).
    Scan,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    Socks4,
    Socks5,
    Http,
}

impl ProxyProtocol {
    pub fn default_port(&self) -> u16 {
        match self {
            ProxyProtocol::Socks4 | ProxyProtocol::Socks5 => 1080,
            ProxyProtocol::Http => 3128,
        }
    }
}

impl FromStr for ProxyProtocol {
    type Err = String;

    /// Accepts the `-X` spellings: "4", "5" and "connect".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "4" | "socks4" => Ok(ProxyProtocol::Socks4),
            "5" | "socks5" => Ok(ProxyProtocol::Socks5),
            "connect" | "http" => Ok(ProxyProtocol::Http),
            _ => Err(format!("unknown proxy protocol: {s}")),
        }
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyProtocol::Socks4 => write!(f, "SOCKS4"),
            ProxyProtocol::Socks5 => write!(f, "SOCKS5"),
            ProxyProtocol::Http => write!(f, "HTTP CONNECT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySpec {
    pub protocol: ProxyProtocol,
    pub address: String,
    pub port: u16,
    /// SOCKS4 user id, SOCKS5 / HTTP Basic user name.
    pub username: Option<String>,
    /// Sent as empty when a username is set without one.
    pub password: Option<String>,
}

impl ProxySpec {
    pub fn new(protocol: ProxyProtocol, address: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            address: address.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }
}

/// Local address and/or port to bind before connecting (`-s`, `-p`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Program handed the connection as its stdin/stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exec {
    /// `-e`: program and arguments, split on whitespace.
    Program(String),
    /// `-c`: command line passed to `sh -c`.
    Shell(String),
}

/// Everything the engine needs to know about one invocation.
///
/// Immutable once built; the engine only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub mode: Mode,
    pub transport: Transport,
    pub family: Family,
    pub destination: Destination,
    pub source: Option<Source>,
    /// Connect deadline, shared by every candidate address.
    ///
    /// Also the relay idle window unless `idle_timeout` is set.
    pub timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    /// Per-port probe timeout. Falls back to `timeout`, then [`DEFAULT_SCAN_TIMEOUT`].
    pub scan_timeout: Option<Duration>,
    pub scan_concurrency: usize,
    /// Delay between lines sent, or between ports scanned.
    pub interval: Option<Duration>,
    pub keep_listening: bool,
    pub tos: Option<u8>,
    pub crlf: bool,
    pub proxy: Option<ProxySpec>,
    /// Never touch DNS.
    pub numeric: bool,
    /// Never read local input.
    pub detach_stdin: bool,
    pub quit_after_eof: Option<Duration>,
    pub randomize_ports: bool,
    pub broadcast: bool,
    pub recv_buffer: Option<usize>,
    pub send_buffer: Option<usize>,
    /// Keep the other direction alive after one side reaches EOF.
    pub half_close: bool,
    pub exec: Option<Exec>,
}

impl Default for ConnectionSpec {
    fn default() -> Self {
        Self {
            mode: Mode::Connect,
            transport: Transport::Tcp,
            family: Family::Any,
            destination: Destination {
                host: None,
                ports: Default::default(),
            },
            source: None,
            timeout: None,
            idle_timeout: None,
            scan_timeout: None,
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
            interval: None,
            keep_listening: false,
            tos: None,
            crlf: false,
            proxy: None,
            numeric: false,
            detach_stdin: false,
            quit_after_eof: None,
            randomize_ports: false,
            broadcast: false,
            recv_buffer: None,
            send_buffer: None,
            half_close: true,
            exec: None,
        }
    }
}

impl ConnectionSpec {
    pub fn connect(destination: Destination) -> Self {
        Self {
            mode: Mode::Connect,
            destination,
            ..Default::default()
        }
    }

    pub fn listen(destination: Destination) -> Self {
        Self {
            mode: Mode::Listen,
            destination,
            ..Default::default()
        }
    }

    pub fn scan(destination: Destination) -> Self {
        Self {
            mode: Mode::Scan,
            destination,
            ..Default::default()
        }
    }

    pub fn idle_window(&self) -> Option<Duration> {
        self.idle_timeout.or(self.timeout)
    }

    pub fn probe_timeout(&self) -> Duration {
        self.scan_timeout.or(self.timeout).unwrap_or(DEFAULT_SCAN_TIMEOUT)
    }

    /// Probes in flight at once. Pacing with an interval means one at a time,
    /// and so does a fixed source port, which only one socket can hold.
    pub fn probe_concurrency(&self) -> usize {
        let fixed_source_port = self
            .source
            .as_ref()
            .is_some_and(|source| source.port.is_some_and(|port| port != 0));

        if self.interval.is_some() || fixed_source_port {
            1
        } else {
            self.scan_concurrency.max(1)
        }
    }

    /// Checks the cross-field invariants the engine relies on.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: &str| Err(Error::InvalidSpec(msg.to_string()));

        if self.destination.ports.is_empty() {
            return invalid("no port given");
        }

        match self.mode {
            Mode::Connect | Mode::Scan if self.destination.host.is_none() => {
                return invalid("a destination host is required");
            }
            Mode::Listen if self.destination.ports.as_single().is_none() => {
                return invalid("listen mode takes exactly one port");
            }
            _ => {}
        }

        if self.proxy.is_some() {
            if self.mode != Mode::Connect {
                return invalid("a proxy can only be used to connect");
            }
            if self.transport != Transport::Tcp {
                return invalid("a proxy cannot carry UDP");
            }
        }

        if self.keep_listening && self.mode != Mode::Listen {
            return invalid("keep listening requires listen mode");
        }

        if self.exec.is_some() && self.mode == Mode::Scan {
            return invalid("cannot execute a program in zero-I/O mode");
        }

        if self.scan_concurrency == 0 {
            return invalid("scan concurrency must be at least 1");
        }

        Ok(())
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
