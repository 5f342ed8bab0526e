#![cfg(test)]
use std::io;
use std::net::SocketAddr;

use rcat_core::LocalIo;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;

/// A local side that types `input` and then hangs up. Whatever the
/// engine writes to the local side can be read from the returned stream.
///
/// Only the first `open` succeeds.
pub fn scripted(input: &'static [u8]) -> (impl FnMut() -> io::Result<LocalIo> + Send, DuplexStream) {
    let (ours, theirs) = duplex(64 * 1024);
    let mut slot = Some(ours);

    let source = move || -> io::Result<LocalIo> {
        let writer = slot
            .take()
            .ok_or_else(|| io::Error::other("local side already opened"))?;
        Ok(LocalIo::new(input, writer))
    };

    (source, theirs)
}

/// TCP server that answers every connection with its input reversed
/// once the client has finished sending.
pub async fn reversing_server() -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut data = Vec::new();
                if stream.read_to_end(&mut data).await.is_ok() {
                    data.reverse();
                    let _ = stream.write_all(&data).await;
                    let _ = stream.shutdown().await;
                }
            });
        }
    });

    Ok(addr)
}

pub async fn read_all(mut stream: DuplexStream) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await?;
    Ok(out)
}
