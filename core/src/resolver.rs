//! Host names to ordered candidate endpoints.

use std::net::{IpAddr, SocketAddr};

use rcat_common::config::Source;
use rcat_common::error::{Error, Result};
use rcat_common::network::endpoint::{Endpoint, Family};
use tokio::net::lookup_host;
use tracing::debug;

/// Resolves `host` into the endpoints a connector should try, in resolver order.
///
/// `None` is the any-address of `family` and never touches DNS. Neither do IP
/// literals. With `numeric` set, anything that is not a literal is an error.
pub async fn resolve(
    host: Option<&str>,
    port: u16,
    family: Family,
    numeric: bool,
) -> Result<Vec<Endpoint>> {
    let Some(host) = host else {
        return Ok(vec![Endpoint::new(family.unspecified(), port)]);
    };

    if let Some(ip) = parse_literal(host) {
        if !family.admits(&ip) {
            return Err(resolution(host, format!("{ip} does not match family {family}")));
        }
        return Ok(vec![Endpoint::new(ip, port)]);
    }

    if numeric {
        return Err(resolution(host, "not a numeric address and name lookups are disabled"));
    }

    let found: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| resolution(host, e.to_string()))?
        .collect();

    let endpoints: Vec<Endpoint> = found
        .into_iter()
        .filter(|addr| family.admits(&addr.ip()))
        .map(Endpoint::from)
        .collect();

    if endpoints.is_empty() {
        return Err(resolution(host, format!("no addresses for family {family}")));
    }

    debug!(host, count = endpoints.len(), "resolved");
    Ok(endpoints)
}

/// Local address to bind before talking to `remote`.
///
/// A port-only source binds the wildcard of the remote's family, so one
/// source works for both IPv4 and IPv6 candidates.
pub async fn resolve_source(source: &Source, remote: &Endpoint, numeric: bool) -> Result<SocketAddr> {
    let family: Family = remote.family();
    let port: u16 = source.port.unwrap_or(0);

    match source.host.as_deref() {
        None => Ok(SocketAddr::new(family.unspecified(), port)),
        Some(host) => {
            let candidates = resolve(Some(host), port, family, numeric).await?;
            candidates
                .first()
                .map(|endpoint| endpoint.addr)
                .ok_or_else(|| resolution(host, format!("no addresses for family {family}")))
        }
    }
}

/// Accepts `[::1]` as well as `::1`.
fn parse_literal(host: &str) -> Option<IpAddr> {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    bare.parse().ok()
}

fn resolution(host: &str, reason: impl Into<String>) -> Error {
    Error::Resolution {
        host: host.to_string(),
        reason: reason.into(),
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
