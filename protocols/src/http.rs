//! HTTP CONNECT tunnelling (RFC 9110, section 9.3.6).

use base64::prelude::*;
use rcat_common::error::ProxyError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProxyTarget;

/// Upper bound on the response head, so a misbehaving proxy cannot stall us forever.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

pub async fn negotiate<S>(
    stream: &mut S,
    target: &ProxyTarget,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request: String = connect_request(target, username, password);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let head: String = read_response_head(stream).await?;
    let status_line: &str = head.lines().next().unwrap_or_default().trim_end();
    check_status(status_line)
}

pub fn connect_request(target: &ProxyTarget, username: Option<&str>, password: Option<&str>) -> String {
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");

    if let Some(username) = username {
        let credentials = format!("{}:{}", username, password.unwrap_or_default());
        let encoded = BASE64_STANDARD.encode(credentials.as_bytes());
        request.push_str(&format!("Proxy-Authorization: Basic {encoded}\r\n"));
    }

    request.push_str("\r\n");
    request
}

/// Reads up to and including the blank line that ends the header block.
///
/// One byte at a time: whatever follows the head already belongs to the tunnel.
async fn read_response_head<S>(stream: &mut S) -> Result<String, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut head: Vec<u8> = Vec::with_capacity(256);
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") && !head.ends_with(b"\n\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(ProxyError::Malformed("response header block too large".to_string()));
        }
        stream.read_exact(&mut byte).await?;
        head.push(byte[0]);
    }

    String::from_utf8(head).map_err(|_| ProxyError::Malformed("response is not valid UTF-8".to_string()))
}

fn check_status(status_line: &str) -> Result<(), ProxyError> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();

    if !version.starts_with("HTTP/") || code.len() != 3 {
        return Err(ProxyError::Malformed(format!("bad status line: {status_line:?}")));
    }

    match code.parse::<u16>() {
        Ok(200..=299) => Ok(()),
        Ok(_) => Err(ProxyError::HttpStatus(status_line.to_string())),
        Err(_) => Err(ProxyError::Malformed(format!("bad status line: {status_line:?}"))),
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
