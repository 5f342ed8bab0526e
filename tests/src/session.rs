#![cfg(test)]
use std::time::Duration;

use rcat_common::config::{ConnectionSpec, Exec, Transport};
use rcat_common::network::target::Destination;
use rcat_core::{Engine, ExecSource, TerminationReason};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::support::{read_all, scripted};

fn listen_spec(transport: Transport) -> ConnectionSpec {
    let mut spec = ConnectionSpec::listen(Destination::new("127.0.0.1", 0));
    spec.transport = transport;
    spec
}

#[tokio::test]
async fn tcp_listen_and_connect_engines_talk() -> anyhow::Result<()> {
    let server = Engine::new(listen_spec(Transport::Tcp))?;
    let listener = server.bind().await?;
    let port = listener.local_addr().port();

    let (mut server_local, server_output) = scripted(b"from server");
    let serving = tokio::spawn(async move { listener.serve(&mut server_local).await });

    let client = Engine::new(ConnectionSpec::connect(Destination::new("127.0.0.1", port)))?;
    let (mut client_local, client_output) = scripted(b"from client");
    let outcomes = client.connect(&mut client_local).await?;

    assert_eq!(read_all(client_output).await?, b"from server");
    assert_eq!(outcomes[0].reason, TerminationReason::Completed);

    let served = serving.await??;
    assert_eq!(served.len(), 1);
    assert_eq!(read_all(server_output).await?, b"from client");
    Ok(())
}

#[tokio::test]
async fn exec_program_serves_connection() -> anyhow::Result<()> {
    let mut spec = listen_spec(Transport::Tcp);
    spec.exec = Some(Exec::Program("tr a-z A-Z".to_string()));
    let engine = Engine::new(spec)?;
    let listener = engine.bind().await?;
    let addr = listener.local_addr();

    let serving = tokio::spawn(async move {
        let mut local = ExecSource(Exec::Program("tr a-z A-Z".to_string()));
        listener.serve(&mut local).await
    });

    let mut client = TcpStream::connect(addr).await?;
    client.write_all(b"shout this\n").await?;
    client.shutdown().await?;

    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await?;
    assert_eq!(reply, b"SHOUT THIS\n");

    serving.await??;
    Ok(())
}

#[tokio::test]
async fn udp_connect_reaches_listener() -> anyhow::Result<()> {
    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let port = peer.local_addr()?.port();

    let mut spec = ConnectionSpec::connect(Destination::new("127.0.0.1", port));
    spec.transport = Transport::Udp;
    spec.quit_after_eof = Some(Duration::from_millis(500));
    let engine = Engine::new(spec)?;

    let (mut local, output) = scripted(b"datagram");
    let client = tokio::spawn(async move { engine.connect(&mut local).await });

    let mut buf = [0u8; 64];
    let (n, from) = peer.recv_from(&mut buf).await?;
    assert_eq!(&buf[..n], b"datagram");
    peer.send_to(b"answer", from).await?;

    // UDP never signals EOF, so the relay ends once the quit delay runs out.
    let outcomes = client.await??;
    assert_eq!(outcomes[0].reason, TerminationReason::QuitAfterEof);
    assert_eq!(outcomes[0].bytes_received, 6);
    assert_eq!(read_all(output).await?, b"answer");
    Ok(())
}
