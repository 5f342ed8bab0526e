//! Proxy handshakes.
//!
//! Each protocol lives in its own module and exposes the same shape of
//! `negotiate(stream, target, ..)`. [`negotiate`] dispatches on the
//! configured protocol. After a successful handshake the stream is a plain
//! tunnel to the target; after a failure it is dropped, never reused.

use std::fmt;
use std::net::IpAddr;

use rcat_common::config::{ProxyProtocol, ProxySpec};
use rcat_common::error::ProxyError;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod http;
pub mod socks4;
pub mod socks5;

/// Address as the proxy should see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(IpAddr),
    /// Resolved by the proxy, not locally.
    Domain(String),
}

/// Where the proxy is asked to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub addr: TargetAddr,
    pub port: u16,
}

impl ProxyTarget {
    /// Literal addresses are sent as such, anything else as a domain name.
    /// An IPv6 literal may come wrapped in brackets.
    pub fn from_host(host: &str, port: u16) -> Self {
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let addr = match bare.parse::<IpAddr>() {
            Ok(ip) => TargetAddr::Ip(ip),
            Err(_) => TargetAddr::Domain(host.to_string()),
        };
        Self { addr, port }
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.addr {
            TargetAddr::Ip(IpAddr::V6(ip)) => write!(f, "[{}]:{}", ip, self.port),
            TargetAddr::Ip(ip) => write!(f, "{}:{}", ip, self.port),
            TargetAddr::Domain(name) => write!(f, "{}:{}", name, self.port),
        }
    }
}

/// Runs the handshake selected by `proxy.protocol` and hands back the tunnel.
pub async fn negotiate<S>(
    mut stream: S,
    proxy: &ProxySpec,
    target: &ProxyTarget,
) -> Result<S, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = proxy.username.as_deref();
    let password = proxy.password.as_deref();

    match proxy.protocol {
        ProxyProtocol::Socks4 => socks4::negotiate(&mut stream, target, username).await?,
        ProxyProtocol::Socks5 => {
            let credentials = username.map(|user| socks5::Credentials {
                username: user,
                password: password.unwrap_or_default(),
            });
            socks5::negotiate(&mut stream, target, credentials).await?
        }
        ProxyProtocol::Http => http::negotiate(&mut stream, target, username, password).await?,
    }

    tracing::debug!(protocol = %proxy.protocol, %target, "proxy tunnel established");
    Ok(stream)
}
