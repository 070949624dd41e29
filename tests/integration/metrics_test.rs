// tests/integration/metrics_test.rs

//! The Prometheus endpoint served next to the signaling listener.

use super::test_helpers::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Reserves a free localhost port for the metrics listener.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn scrape(port: u16) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}

#[tokio::test]
async fn test_metrics_endpoint_reports_pairing() {
    let port = free_port();
    let mut config = test_config();
    config.metrics.enabled = true;
    config.metrics.port = port;
    let server = start_server(config).await;

    let (mut a, mut b) = connect_pair(&server).await;
    send_text(&mut a, "offer").await;
    assert_eq!(recv_text(&mut b).await, "offer");

    // The metrics listener is bound by a background task after startup.
    let response = eventually(|| scrape(port)).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("text/plain"), "{response}");
    assert!(response.contains("pairlink_pairs_formed_total"), "{response}");
    assert!(response.contains("pairlink_messages_relayed_total"), "{response}");
    assert!(
        response.contains("pairlink_notices_sent_total{status=\"paired\"}"),
        "{response}"
    );
    server.shutdown().await;
}
