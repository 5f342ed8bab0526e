#![cfg(test)]
use std::time::Duration;

use futures::StreamExt;
use rcat_common::config::{ConnectionSpec, Transport};
use rcat_common::network::range::{PortList, PortRange};
use rcat_common::network::target::Destination;
use rcat_core::{Engine, ScanResult, ScanStatus};
use tokio::net::{TcpListener, UdpSocket};

#[tokio::test]
async fn tcp_scan_over_loopback() -> anyhow::Result<()> {
    let open_a = TcpListener::bind("127.0.0.1:0").await?;
    let open_b = TcpListener::bind("127.0.0.1:0").await?;
    let closed = TcpListener::bind("127.0.0.1:0").await?.local_addr()?.port();

    let mut ports = PortList::new();
    ports.add_single(open_a.local_addr()?.port());
    ports.add_single(closed);
    ports.add_single(open_b.local_addr()?.port());

    let mut spec = ConnectionSpec::scan(Destination::new("127.0.0.1", ports.clone()));
    spec.scan_timeout = Some(Duration::from_secs(2));
    let engine = Engine::new(spec)?;

    let results: Vec<ScanResult> = engine.scan().await?.collect().await;

    let order: Vec<u16> = results.iter().map(|r| r.port).collect();
    assert_eq!(order, ports.iter().collect::<Vec<_>>());
    for result in &results {
        let expected = if result.port == closed {
            ScanStatus::Closed
        } else {
            ScanStatus::Open
        };
        assert_eq!(result.status, expected, "port {}", result.port);
    }
    Ok(())
}

#[tokio::test]
async fn cancelled_scan_stops_early() -> anyhow::Result<()> {
    // Nothing answers on the UDP side, so every probe waits out its timeout.
    let silent = UdpSocket::bind("127.0.0.1:0").await?;
    let port = silent.local_addr()?.port();

    let range = PortRange::new(port, port.saturating_add(20));
    let mut spec = ConnectionSpec::scan(Destination::new("127.0.0.1", range));
    spec.transport = Transport::Udp;
    spec.scan_timeout = Some(Duration::from_secs(30));
    let engine = Engine::new(spec)?;

    let cancel = engine.cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let stream = engine.scan().await?;
    let results = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<ScanResult>>()).await?;
    assert!(results.is_empty(), "got {results:?}");
    Ok(())
}
