// tests/integration/tls_test.rs

//! Serving `wss://` with the certificates under `tests/fixtures`.

use super::test_helpers::*;
use pairlink::config::Config;
use pairlink::server::{self, ServerHandle};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::{TlsConnector, rustls};
use tokio_tungstenite::WebSocketStream;

type TlsClient = WebSocketStream<TlsStream<TcpStream>>;

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn tls_config() -> Config {
    let mut config = test_config();
    config.tls.enabled = true;
    config.tls.cert_path = fixture("server.crt");
    config.tls.key_path = fixture("server.key");
    config
}

fn client_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    let mut reader = BufReader::new(File::open(fixture("ca.crt")).unwrap());
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn try_connect_tls(server: &ServerHandle) -> anyhow::Result<TlsClient> {
    let tcp = TcpStream::connect(server.local_addr()).await?;
    let domain = rustls::pki_types::ServerName::try_from("localhost")?;
    let tls = client_connector().connect(domain, tcp).await?;
    let (ws, _response) = tokio_tungstenite::client_async("wss://localhost/", tls).await?;
    Ok(ws)
}

async fn connect_tls(server: &ServerHandle) -> TlsClient {
    try_connect_tls(server).await.expect("TLS connect failed")
}

/// Starts a server expected to fail during setup and returns the full error chain.
async fn start_error(config: Config) -> String {
    match server::start(config).await {
        Ok(server) => {
            server.shutdown().await;
            panic!("server started despite a broken TLS setup");
        }
        Err(e) => format!("{e:#}"),
    }
}

#[tokio::test]
async fn test_tls_clients_pair_and_relay() {
    let server = start_server(tls_config()).await;
    let mut a = connect_tls(&server).await;
    assert_eq!(recv_text(&mut a).await, WAITING);
    let mut b = connect_tls(&server).await;
    assert_eq!(recv_text(&mut b).await, PAIRED);
    assert_eq!(recv_text(&mut a).await, PAIRED);

    let offer = r#"{"type":"offer","sdp":"v=0\r\n"}"#;
    send_text(&mut a, offer).await;
    assert_eq!(recv_text(&mut b).await, offer);
    send_text(&mut b, "answer").await;
    assert_eq!(recv_text(&mut a).await, "answer");

    server.shutdown().await;
    assert_eq!(recv_text(&mut a).await, SHUTTING_DOWN);
    assert_closed(&mut a).await;
}

#[tokio::test]
async fn test_plain_websocket_rejected_by_tls_listener() {
    let server = start_server(tls_config()).await;
    assert!(try_connect(&server).await.is_err());

    // The failed handshake does not affect later TLS clients.
    let mut a = connect_tls(&server).await;
    assert_eq!(recv_text(&mut a).await, WAITING);
    server.shutdown().await;
}

#[tokio::test]
async fn test_stalled_tls_handshake_times_out_and_frees_slot() {
    let mut config = tls_config();
    config.max_clients = 1;
    config.limits.handshake_timeout = Duration::from_millis(200);
    let server = start_server(config).await;

    // Holds the only slot without ever sending a ClientHello.
    let mut idle = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), idle.read(&mut buf))
        .await
        .expect("server never dropped the stalled handshake");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected bytes: {read:?}");

    let mut a = eventually(|| try_connect_tls(&server)).await;
    assert_eq!(recv_text(&mut a).await, WAITING);
    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_certificate_file_fails_startup() {
    let mut config = tls_config();
    config.tls.cert_path = fixture("does-not-exist.crt");
    let err = start_error(config).await;
    assert!(err.contains("Failed to open certificate file"), "{err}");
    assert!(err.contains("does-not-exist.crt"), "{err}");
}

#[tokio::test]
async fn test_empty_certificate_file_fails_startup() {
    let empty = tempfile::NamedTempFile::new().unwrap();
    let mut config = tls_config();
    config.tls.cert_path = empty.path().to_str().unwrap().to_string();
    let err = start_error(config).await;
    assert!(err.contains("No certificates found"), "{err}");
}

#[tokio::test]
async fn test_missing_private_key_fails_startup() {
    let mut config = tls_config();
    config.tls.key_path = fixture("does-not-exist.key");
    let err = start_error(config).await;
    assert!(err.contains("Failed to open private key file"), "{err}");

    // A certificate in place of the key holds no private key.
    let mut config = tls_config();
    config.tls.key_path = fixture("server.crt");
    let err = start_error(config).await;
    assert!(err.contains("No private key found"), "{err}");
}
