//! Typed failures of the connection engine.
//!
//! Everything the engine can report back to its caller is one of these.
//! Turning them into messages and exit codes is left to the binary.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Name lookup failed, or produced nothing usable for the requested family.
    #[error("could not resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// Local bind or listen failed. Never retried.
    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Every candidate failed or the deadline expired. Carries the last cause.
    #[error("connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("proxy negotiation failed: {0}")]
    Proxy(#[from] ProxyError),

    /// No bytes moved in either direction for the whole idle window.
    #[error("connection idle for {0:?}, giving up")]
    RelayTimeout(Duration),

    #[error("{0}")]
    InvalidSpec(String),

    #[error("interrupted")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn connect(target: impl ToString, source: io::Error) -> Self {
        Error::Connect {
            target: target.to_string(),
            source,
        }
    }

    /// Whether the peer actively refused (RST / ICMP unreachable).
    pub fn is_refused(&self) -> bool {
        match self {
            Error::Connect { source, .. } | Error::Io(source) => {
                source.kind() == io::ErrorKind::ConnectionRefused
            }
            _ => false,
        }
    }
}

/// Why a SOCKS4 server denied a request (reply byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks4Rejection {
    /// 0x5B
    Rejected,
    /// 0x5C
    IdentdUnreachable,
    /// 0x5D
    IdentdMismatch,
    Unknown(u8),
}

impl Socks4Rejection {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x5B => Socks4Rejection::Rejected,
            0x5C => Socks4Rejection::IdentdUnreachable,
            0x5D => Socks4Rejection::IdentdMismatch,
            other => Socks4Rejection::Unknown(other),
        }
    }
}

impl std::fmt::Display for Socks4Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Socks4Rejection::Rejected => write!(f, "request rejected or failed"),
            Socks4Rejection::IdentdUnreachable => {
                write!(f, "request rejected because SOCKS server cannot connect to identd")
            }
            Socks4Rejection::IdentdMismatch => {
                write!(f, "request rejected because identd reported a different user id")
            }
            Socks4Rejection::Unknown(code) => write!(f, "unknown reply code 0x{code:02X}"),
        }
    }
}

/// Non-zero SOCKS5 reply field (RFC 1928, section 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks5Reply {
    GeneralFailure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Unknown(u8),
}

impl Socks5Reply {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Socks5Reply::GeneralFailure,
            0x02 => Socks5Reply::NotAllowed,
            0x03 => Socks5Reply::NetworkUnreachable,
            0x04 => Socks5Reply::HostUnreachable,
            0x05 => Socks5Reply::ConnectionRefused,
            0x06 => Socks5Reply::TtlExpired,
            0x07 => Socks5Reply::CommandNotSupported,
            0x08 => Socks5Reply::AddressTypeNotSupported,
            other => Socks5Reply::Unknown(other),
        }
    }
}

impl std::fmt::Display for Socks5Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Socks5Reply::GeneralFailure => "general SOCKS server failure",
            Socks5Reply::NotAllowed => "connection not allowed by ruleset",
            Socks5Reply::NetworkUnreachable => "network unreachable",
            Socks5Reply::HostUnreachable => "host unreachable",
            Socks5Reply::ConnectionRefused => "connection refused",
            Socks5Reply::TtlExpired => "TTL expired",
            Socks5Reply::CommandNotSupported => "command not supported",
            Socks5Reply::AddressTypeNotSupported => "address type not supported",
            Socks5Reply::Unknown(code) => return write!(f, "unknown reply code 0x{code:02X}"),
        };
        write!(f, "{text}")
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Short read, reset, or timeout while talking to the proxy.
    #[error("proxy i/o: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected version byte 0x{got:02X} (expected 0x{expected:02X})")]
    UnexpectedVersion { expected: u8, got: u8 },

    #[error("SOCKS4: {0}")]
    Socks4Rejected(Socks4Rejection),

    #[error("SOCKS5: no acceptable authentication method")]
    NoAcceptableAuth,

    #[error("SOCKS5: username/password authentication failed")]
    AuthFailed,

    #[error("SOCKS5: {0}")]
    Socks5Reply(Socks5Reply),

    /// Anything other than a 2xx answer to CONNECT, with the status line text.
    #[error("HTTP CONNECT: {0}")]
    HttpStatus(String),

    #[error("malformed proxy reply: {0}")]
    Malformed(String),

    #[error("{0}")]
    Unsupported(String),
}
