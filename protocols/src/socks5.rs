//! SOCKS5 CONNECT (RFC 1928) with optional username/password (RFC 1929).

use std::net::IpAddr;

use rcat_common::error::{ProxyError, Socks5Reply};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ProxyTarget, TargetAddr};

const VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;
const RESERVED: u8 = 0x00;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCEEDED: u8 = 0x00;

#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

pub async fn negotiate<S>(
    stream: &mut S,
    target: &ProxyTarget,
    credentials: Option<Credentials<'_>>,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&greeting(credentials.is_some())).await?;
    stream.flush().await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    expect_version(VERSION, choice[0])?;

    match (choice[1], credentials) {
        (METHOD_NO_AUTH, _) => {}
        (METHOD_USER_PASS, Some(credentials)) => authenticate(stream, credentials).await?,
        (METHOD_NONE_ACCEPTABLE, _) | (METHOD_USER_PASS, None) => {
            return Err(ProxyError::NoAcceptableAuth);
        }
        (method, _) => {
            return Err(ProxyError::Malformed(format!(
                "server selected a method that was not offered: 0x{method:02X}"
            )));
        }
    }

    stream.write_all(&connect_request(target)?).await?;
    stream.flush().await?;
    read_reply(stream).await
}

/// Method selection message. User/pass is only offered with credentials.
pub fn greeting(with_credentials: bool) -> Vec<u8> {
    if with_credentials {
        vec![VERSION, 2, METHOD_NO_AUTH, METHOD_USER_PASS]
    } else {
        vec![VERSION, 1, METHOD_NO_AUTH]
    }
}

async fn authenticate<S>(stream: &mut S, credentials: Credentials<'_>) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&auth_request(credentials)?).await?;
    stream.flush().await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    expect_version(AUTH_VERSION, status[0])?;

    if status[1] != 0x00 {
        return Err(ProxyError::AuthFailed);
    }
    Ok(())
}

pub fn auth_request(credentials: Credentials<'_>) -> Result<Vec<u8>, ProxyError> {
    let user = credentials.username.as_bytes();
    let pass = credentials.password.as_bytes();
    let (Ok(user_len), Ok(pass_len)) = (u8::try_from(user.len()), u8::try_from(pass.len())) else {
        return Err(ProxyError::Unsupported(
            "SOCKS5 username and password are limited to 255 bytes".to_string(),
        ));
    };

    let mut request: Vec<u8> = vec![AUTH_VERSION, user_len];
    request.extend_from_slice(user);
    request.push(pass_len);
    request.extend_from_slice(pass);
    Ok(request)
}

pub fn connect_request(target: &ProxyTarget) -> Result<Vec<u8>, ProxyError> {
    let mut request: Vec<u8> = vec![VERSION, CMD_CONNECT, RESERVED];

    match &target.addr {
        TargetAddr::Ip(IpAddr::V4(ipv4)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ipv4.octets());
        }
        TargetAddr::Ip(IpAddr::V6(ipv6)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ipv6.octets());
        }
        TargetAddr::Domain(name) => {
            let len = u8::try_from(name.len()).map_err(|_| {
                ProxyError::Unsupported(format!("domain name too long for SOCKS5: {name}"))
            })?;
            request.push(ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(name.as_bytes());
        }
    }

    request.extend_from_slice(&target.port.to_be_bytes());
    Ok(request)
}

async fn read_reply<S>(stream: &mut S) -> Result<(), ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    expect_version(VERSION, head[0])?;

    if head[1] != REPLY_SUCCEEDED {
        return Err(ProxyError::Socks5Reply(Socks5Reply::from_code(head[1])));
    }

    // BND.ADDR + BND.PORT, discarded so the tunnel starts clean.
    let remaining: usize = match head[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            usize::from(len[0]) + 2
        }
        atyp => {
            return Err(ProxyError::Malformed(format!(
                "unknown address type in reply: 0x{atyp:02X}"
            )));
        }
    };

    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound).await?;
    Ok(())
}

fn expect_version(expected: u8, got: u8) -> Result<(), ProxyError> {
    if expected != got {
        return Err(ProxyError::UnexpectedVersion { expected, got });
    }
    Ok(())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
