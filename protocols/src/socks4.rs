//! SOCKS4 / SOCKS4a CONNECT.
//!
//! Request: `VN=4 CD=1 DSTPORT DSTIP USERID NUL [DOMAIN NUL]`.
//! Reply: 8 bytes, `VN=0 CD DSTPORT DSTIP`, where CD 0x5A means granted.
//!
//! SOCKS4 has no room for IPv6. Domain names use the 4a extension
//! (`DSTIP = 0.0.0.1`, name appended after the user id).

use std::net::IpAddr;

use rcat_common::error::{ProxyError, Socks4Rejection};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ProxyTarget, TargetAddr};

const VERSION: u8 = 0x04;
const CMD_CONNECT: u8 = 0x01;
const REPLY_VERSION: u8 = 0x00;
const GRANTED: u8 = 0x5A;
const SOCKS4A_MARKER: [u8; 4] = [0, 0, 0, 1];

pub async fn negotiate<S>(
    stream: &mut S,
    target: &ProxyTarget,
    user_id: Option<&str>,
) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request: Vec<u8> = connect_request(target, user_id)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    check_reply(&reply)
}

pub fn connect_request(target: &ProxyTarget, user_id: Option<&str>) -> Result<Vec<u8>, ProxyError> {
    let mut request: Vec<u8> = vec![VERSION, CMD_CONNECT];
    request.extend_from_slice(&target.port.to_be_bytes());

    match &target.addr {
        TargetAddr::Ip(IpAddr::V4(ipv4)) => request.extend_from_slice(&ipv4.octets()),
        TargetAddr::Ip(IpAddr::V6(_)) => {
            return Err(ProxyError::Unsupported(
                "SOCKS4 does not support IPv6 destinations".to_string(),
            ));
        }
        TargetAddr::Domain(_) => request.extend_from_slice(&SOCKS4A_MARKER),
    }

    if let Some(user_id) = user_id {
        request.extend_from_slice(user_id.as_bytes());
    }
    request.push(0x00);

    if let TargetAddr::Domain(name) = &target.addr {
        request.extend_from_slice(name.as_bytes());
        request.push(0x00);
    }

    Ok(request)
}

fn check_reply(reply: &[u8; 8]) -> Result<(), ProxyError> {
    if reply[0] != REPLY_VERSION {
        return Err(ProxyError::UnexpectedVersion {
            expected: REPLY_VERSION,
            got: reply[0],
        });
    }

    match reply[1] {
        GRANTED => Ok(()),
        code => Err(ProxyError::Socks4Rejected(Socks4Rejection::from_code(code))),
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
