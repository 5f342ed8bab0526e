//! # Connection Target Model
//!
//! Defines where a connection goes (or where a listener binds).
//!
//! This module handles parsing and representing:
//! * A single port (e.g., `80`).
//! * A port range (e.g., `8000-8005`, reversed bounds are accepted).
//! * A comma separated mix of both (e.g., `22,80,8000-8005`).
//! * `host[:port]` pairs used for proxy addresses (IPv6 as `[::1]:1080`).

use std::fmt;
use std::str::FromStr;

use crate::network::range::{PortList, PortRange};

/// The remote side of a connect/scan, or the local side of a listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Host name or literal address. `None` means "any address" for listeners.
    pub host: Option<String>,
    pub ports: PortList,
}

impl Destination {
    pub fn new(host: impl Into<String>, ports: impl Into<PortList>) -> Self {
        Self {
            host: Some(host.into()),
            ports: ports.into(),
        }
    }

    /// A listen target bound to every local address.
    pub fn any(port: u16) -> Self {
        Self {
            host: None,
            ports: port.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.host.as_deref().unwrap_or("*");
        write!(f, "{} {}", host, self.ports)
    }
}

impl FromStr for PortList {
    type Err = String;

    /// Parses a string into a `PortList`.
    ///
    /// Supported formats:
    /// * **Port**: "80".
    /// * **Range**: "Start-End" (e.g., "8000-8005").
    /// * **List**: comma separated ports and ranges (e.g., "22,80-81").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut list = PortList::new();

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            list.add_range(parse_port_range(part)?);
        }

        if list.is_empty() {
            return Err(format!("invalid port value: {s}"));
        }
        Ok(list)
    }
}

/// Parses a single port, rejecting 0 and anything above 65535.
pub fn parse_port(s: &str) -> Result<u16, String> {
    let value: u32 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid port value: {s}"))?;

    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(format!("invalid port value: {s}")),
    }
}

/// Parses "80" or "8000-8005" into a range.
pub fn parse_port_range(s: &str) -> Result<PortRange, String> {
    let Some((start_str, end_str)) = s.split_once('-') else {
        return parse_port(s).map(PortRange::single);
    };

    let start_port = parse_port(start_str)?;
    let end_port = parse_port(end_str)?;
    Ok(PortRange::new(start_port, end_port))
}

/// Splits `host[:port]`, falling back to `default_port` when no port is given.
///
/// Bracketed IPv6 literals keep their colons (`[::1]:1080`), and a bare IPv6
/// literal without brackets is taken as a host with no port.
pub fn parse_host_port(s: &str, default_port: u16) -> Result<(String, u16), String> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| format!("unterminated IPv6 literal: {s}"))?;
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host.to_string(), parse_port(port)?)),
            None if tail.is_empty() => Ok((host.to_string(), default_port)),
            None => Err(format!("invalid address: {s}")),
        };
    }

    match s.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            if host.is_empty() {
                return Err(format!("missing host in address: {s}"));
            }
            Ok((host.to_string(), parse_port(port)?))
        }
        _ if s.is_empty() => Err("empty address".to_string()),
        _ => Ok((s.to_string(), default_port)),
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
